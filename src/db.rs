use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{info, warn};
use uuid::Uuid;

use crate::directory::TeacherDirectory;
use crate::error::{ReviewError, StoreError};
use crate::ledger::RatingLedger;
use crate::models::{ClassOffering, NewReview, Qualification, Review, Teacher, TeacherProfile};
use crate::stats::RatingStats;
use crate::store::{StoreResult, TeacherStore};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

const TEACHER_COLUMNS: &str =
    "id, profile, reviews, rating, version, created_at, updated_at";

/// Teachers stored one row per document, with reviews and stats as JSONB.
#[derive(Debug, Clone)]
pub struct PgTeacherStore {
    pool: PgPool,
}

impl PgTeacherStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn exists(&self, id: Uuid) -> StoreResult<bool> {
        let row = sqlx::query("SELECT 1 FROM tutor_reviews.teachers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

fn teacher_from_row(row: &PgRow) -> StoreResult<Teacher> {
    let Json(profile): Json<TeacherProfile> = row.try_get("profile")?;
    let Json(reviews): Json<Vec<Review>> = row.try_get("reviews")?;
    let Json(rating): Json<RatingStats> = row.try_get("rating")?;

    Ok(Teacher {
        id: row.try_get("id")?,
        profile,
        reviews,
        rating,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn duplicate_or(err: sqlx::Error, name: &str) -> StoreError {
    match err.as_database_error() {
        Some(db) if db.is_unique_violation() => StoreError::Duplicate(name.to_string()),
        _ => StoreError::Database(err),
    }
}

#[async_trait]
impl TeacherStore for PgTeacherStore {
    async fn load(&self, id: Uuid) -> StoreResult<Teacher> {
        let query = format!("SELECT {TEACHER_COLUMNS} FROM tutor_reviews.teachers WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        teacher_from_row(&row)
    }

    async fn save(&self, teacher: &Teacher) -> StoreResult<Teacher> {
        let query = format!(
            r#"
            UPDATE tutor_reviews.teachers
            SET name = $3, profile = $4, reviews = $5, rating = $6,
                version = version + 1, updated_at = $7
            WHERE id = $1 AND version = $2
            RETURNING {TEACHER_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(teacher.id)
            .bind(teacher.version)
            .bind(&teacher.profile.name)
            .bind(Json(&teacher.profile))
            .bind(Json(&teacher.reviews))
            .bind(Json(&teacher.rating))
            .bind(teacher.updated_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| duplicate_or(err, &teacher.profile.name))?;

        if let Some(row) = row {
            return teacher_from_row(&row);
        }
        // Zero rows: either someone else bumped the version or the teacher is gone.
        if self.exists(teacher.id).await? {
            Err(StoreError::Conflict {
                teacher_id: teacher.id,
                expected: teacher.version,
            })
        } else {
            Err(StoreError::NotFound(teacher.id))
        }
    }

    async fn insert(&self, teacher: &Teacher) -> StoreResult<Teacher> {
        let query = format!(
            r#"
            INSERT INTO tutor_reviews.teachers
            (id, name, profile, reviews, rating, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {TEACHER_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(teacher.id)
            .bind(&teacher.profile.name)
            .bind(Json(&teacher.profile))
            .bind(Json(&teacher.reviews))
            .bind(Json(&teacher.rating))
            .bind(teacher.version)
            .bind(teacher.created_at)
            .bind(teacher.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| duplicate_or(err, &teacher.profile.name))?;
        teacher_from_row(&row)
    }

    async fn list(&self) -> StoreResult<Vec<Teacher>> {
        let query = format!("SELECT {TEACHER_COLUMNS} FROM tutor_reviews.teachers ORDER BY name");
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(teacher_from_row).collect()
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM tutor_reviews.teachers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }
}

fn seed_profile(
    name: &str,
    age: u32,
    proficiency: &str,
    locality: &str,
    (latitude, longitude): (f64, f64),
    subjects: &[&str],
    about: &str,
) -> TeacherProfile {
    TeacherProfile {
        name: name.to_string(),
        age,
        proficiency: proficiency.to_string(),
        tenth_percentage: Some(92.4),
        twelfth_percentage: Some(89.0),
        locality: locality.to_string(),
        latitude,
        longitude,
        subjects: subjects.iter().map(|s| s.to_string()).collect(),
        classes_offered: vec![ClassOffering {
            id: format!("{}-core", proficiency.to_lowercase()),
            subject: proficiency.to_string(),
            standards: vec![9, 10, 11, 12],
            format: "offline".to_string(),
        }],
        qualifications: vec![Qualification {
            degree: "M.Sc".to_string(),
            field: proficiency.to_string(),
            institution: "University of Mysore".to_string(),
            year: 2014,
        }],
        about: about.to_string(),
    }
}

/// Registers a few teachers with reviews. Teachers that already exist by
/// name are left alone.
pub async fn seed(directory: &TeacherDirectory, ledger: &RatingLedger) -> anyhow::Result<usize> {
    let teachers = vec![
        (
            seed_profile(
                "Asha Rao",
                34,
                "Mathematics",
                "Koramangala",
                (12.9352, 77.6245),
                &["Algebra", "Calculus"],
                "Board exam coaching with weekly problem sets",
            ),
            vec![(5, "Made calculus finally click"), (4, "Tough but fair homework")],
        ),
        (
            seed_profile(
                "Vikram Shah",
                41,
                "Physics",
                "Indiranagar",
                (12.9719, 77.6412),
                &["Mechanics", "Optics"],
                "Former lab instructor, focuses on experiments",
            ),
            vec![(3, "Knows the material, sessions run long")],
        ),
        (
            seed_profile(
                "Neha Iyer",
                29,
                "Chemistry",
                "Jayanagar",
                (12.9250, 77.5938),
                &["Organic", "Physical"],
                "Small batches, lots of revision tests",
            ),
            Vec::new(),
        ),
    ];

    let existing: Vec<String> = directory
        .list()
        .await?
        .into_iter()
        .map(|t| t.profile.name)
        .collect();
    let mut registered = 0usize;

    for (profile, reviews) in teachers {
        if existing.contains(&profile.name) {
            continue;
        }
        let teacher = directory.register(profile).await?;
        registered += 1;

        for (n, (rating, comment)) in reviews.into_iter().enumerate() {
            ledger
                .add_review(
                    teacher.id,
                    NewReview {
                        student_id: format!("seed-student-{}", n + 1),
                        comment: Some(comment.to_string()),
                        rating,
                    },
                )
                .await?;
        }
    }

    Ok(registered)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub inserted: usize,
    pub skipped: usize,
}

#[derive(serde::Deserialize)]
struct CsvRow {
    teacher_name: String,
    student_id: String,
    comment: Option<String>,
    rating: String,
}

/// Imports reviews from CSV, each one going through the ledger so the
/// aggregates stay consistent. Rows naming unknown teachers or carrying a
/// non-integer or out-of-range rating are skipped; a structurally broken
/// file still aborts the import.
pub async fn import_csv<R: std::io::Read>(
    directory: &TeacherDirectory,
    ledger: &RatingLedger,
    source: R,
) -> anyhow::Result<ImportSummary> {
    let teachers: HashMap<String, Uuid> = directory
        .list()
        .await?
        .into_iter()
        .map(|t| (t.profile.name, t.id))
        .collect();

    let mut reader = csv::Reader::from_reader(source);
    let mut summary = ImportSummary::default();

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result?;
        let Some(&teacher_id) = teachers.get(row.teacher_name.trim()) else {
            warn!(line = line + 2, teacher = %row.teacher_name, "unknown teacher, skipping row");
            summary.skipped += 1;
            continue;
        };

        let Ok(rating) = row.rating.trim().parse::<i64>() else {
            warn!(line = line + 2, rating = %row.rating, "rating is not an integer, skipping row");
            summary.skipped += 1;
            continue;
        };

        let review = NewReview {
            student_id: row.student_id,
            comment: row.comment,
            rating,
        };
        match ledger.add_review(teacher_id, review).await {
            Ok(_) => summary.inserted += 1,
            Err(ReviewError::Validation(message)) => {
                warn!(line = line + 2, %message, "invalid review, skipping row");
                summary.skipped += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }

    info!(inserted = summary.inserted, skipped = summary.skipped, "review import finished");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::testing::profile;
    use crate::store::MemoryTeacherStore;

    fn services() -> (TeacherDirectory, RatingLedger) {
        let ledger = RatingLedger::new(Arc::new(MemoryTeacherStore::new()));
        (TeacherDirectory::new(ledger.clone()), ledger)
    }

    #[tokio::test]
    async fn seed_is_idempotent() {
        let (directory, ledger) = services();
        assert_eq!(seed(&directory, &ledger).await.unwrap(), 3);
        assert_eq!(seed(&directory, &ledger).await.unwrap(), 0);

        let teachers = directory.list().await.unwrap();
        assert_eq!(teachers.len(), 3);
        for teacher in teachers {
            assert!(teacher.rating.verify(&teacher.reviews).is_ok());
        }
    }

    #[tokio::test]
    async fn import_routes_rows_through_ledger() {
        let (directory, ledger) = services();
        let teacher = directory.register(profile("Asha Rao")).await.unwrap();

        let data = "teacher_name,student_id,comment,rating\n\
                    Asha Rao,s-1,Great pacing,5\n\
                    Asha Rao,s-2,,3\n\
                    Nobody,s-3,Who?,4\n\
                    Asha Rao,s-4,Out of range,7\n";
        let summary = import_csv(&directory, &ledger, data.as_bytes()).await.unwrap();
        assert_eq!(summary, ImportSummary { inserted: 2, skipped: 2 });

        let current = ledger.get_teacher_reviews(teacher.id).await.unwrap();
        assert_eq!(current.rating_stats.count, 2);
        assert_eq!(current.rating_stats.total, 8);
        assert_eq!(current.reviews[1].comment, None);
    }

    #[tokio::test]
    async fn import_skips_non_integer_ratings_and_keeps_going() {
        let (directory, ledger) = services();
        let teacher = directory.register(profile("Asha Rao")).await.unwrap();

        let data = "teacher_name,student_id,comment,rating\n\
                    Asha Rao,s-1,Great pacing,5\n\
                    Asha Rao,s-2,Half star,4.5\n\
                    Asha Rao,s-3,Spelled out,five\n\
                    Asha Rao,s-4,Padded, 4 \n";
        let summary = import_csv(&directory, &ledger, data.as_bytes()).await.unwrap();
        assert_eq!(summary, ImportSummary { inserted: 2, skipped: 2 });

        let current = ledger.get_teacher_reviews(teacher.id).await.unwrap();
        assert_eq!(current.rating_stats.total, 9);
        let students: Vec<_> = current.reviews.iter().map(|r| r.student_id.as_str()).collect();
        assert_eq!(students, vec!["s-1", "s-4"]);
    }
}
