use tracing::info;
use uuid::Uuid;

use crate::error::{Result, ReviewError};
use crate::ledger::{log_store_error, RatingLedger};
use crate::models::{Teacher, TeacherPatch, TeacherProfile};

/// Teacher registration and profile maintenance.
///
/// Shares the ledger's store and per-teacher locks, so profile edits never
/// race review mutations on the same document.
#[derive(Clone)]
pub struct TeacherDirectory {
    ledger: RatingLedger,
}

impl TeacherDirectory {
    pub fn new(ledger: RatingLedger) -> Self {
        Self { ledger }
    }

    pub async fn register(&self, mut profile: TeacherProfile) -> Result<Teacher> {
        profile.name = profile.name.trim().to_string();
        validate_profile(&profile)?;
        let teacher = Teacher::new(Uuid::new_v4(), profile, self.ledger.clock().now());
        let teacher = self
            .ledger
            .store()
            .insert(&teacher)
            .await
            .map_err(log_store_error)?;

        info!(teacher_id = %teacher.id, name = %teacher.profile.name, "teacher registered");
        Ok(teacher)
    }

    pub async fn list(&self) -> Result<Vec<Teacher>> {
        self.ledger.store().list().await.map_err(log_store_error)
    }

    pub async fn get(&self, teacher_id: Uuid) -> Result<Teacher> {
        self.ledger
            .store()
            .load(teacher_id)
            .await
            .map_err(log_store_error)
    }

    /// Applies the fields present in `patch`; reviews and stats are untouched.
    /// A rename onto another teacher's name is rejected by the store's save.
    pub async fn update(&self, teacher_id: Uuid, patch: TeacherPatch) -> Result<Teacher> {
        let (teacher, ()) = self
            .ledger
            .mutate(teacher_id, |teacher| {
                let mut profile = teacher.profile.clone();
                apply_patch(&mut profile, &patch);
                validate_profile(&profile)?;
                teacher.profile = profile;
                Ok(())
            })
            .await?;

        info!(%teacher_id, "teacher updated");
        Ok(teacher)
    }

    pub async fn delete(&self, teacher_id: Uuid) -> Result<()> {
        self.ledger
            .store()
            .delete(teacher_id)
            .await
            .map_err(log_store_error)?;

        info!(%teacher_id, "teacher removed");
        Ok(())
    }
}

fn apply_patch(profile: &mut TeacherProfile, patch: &TeacherPatch) {
    if let Some(name) = &patch.name {
        profile.name = name.trim().to_string();
    }
    if let Some(age) = patch.age {
        profile.age = age;
    }
    if let Some(proficiency) = &patch.proficiency {
        profile.proficiency = proficiency.clone();
    }
    if let Some(pct) = patch.tenth_percentage {
        profile.tenth_percentage = Some(pct);
    }
    if let Some(pct) = patch.twelfth_percentage {
        profile.twelfth_percentage = Some(pct);
    }
    if let Some(locality) = &patch.locality {
        profile.locality = locality.clone();
    }
    if let Some(latitude) = patch.latitude {
        profile.latitude = latitude;
    }
    if let Some(longitude) = patch.longitude {
        profile.longitude = longitude;
    }
    if let Some(subjects) = &patch.subjects {
        profile.subjects = subjects.clone();
    }
    if let Some(classes) = &patch.classes_offered {
        profile.classes_offered = classes.clone();
    }
    if let Some(qualifications) = &patch.qualifications {
        profile.qualifications = qualifications.clone();
    }
    if let Some(about) = &patch.about {
        profile.about = about.clone();
    }
}

fn validate_profile(profile: &TeacherProfile) -> Result<()> {
    for (field, value) in [
        ("name", &profile.name),
        ("proficiency", &profile.proficiency),
        ("locality", &profile.locality),
        ("about", &profile.about),
    ] {
        if value.trim().is_empty() {
            return Err(ReviewError::validation(format!("Teacher {field} is required")));
        }
    }
    if !(-90.0..=90.0).contains(&profile.latitude) || !(-180.0..=180.0).contains(&profile.longitude) {
        return Err(ReviewError::validation("Teacher coordinates are out of range"));
    }
    for pct in [profile.tenth_percentage, profile.twelfth_percentage]
        .into_iter()
        .flatten()
    {
        if !(0.0..=100.0).contains(&pct) {
            return Err(ReviewError::validation("Percentages must be between 0 and 100"));
        }
    }
    Ok(())
}
