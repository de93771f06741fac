//! Ports the ledger depends on: teacher persistence, id generation, and time.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::Teacher;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Document store for teachers with their embedded reviews and stats.
///
/// `save` is a single atomic write guarded by `Teacher::version`: it succeeds
/// only when the stored version still equals the caller's copy, and returns
/// the teacher with the bumped version. Names are unique across teachers on
/// both `insert` and `save`; a clash is `StoreError::Duplicate`.
#[async_trait]
pub trait TeacherStore: Send + Sync {
    async fn load(&self, id: Uuid) -> StoreResult<Teacher>;

    async fn save(&self, teacher: &Teacher) -> StoreResult<Teacher>;

    async fn insert(&self, teacher: &Teacher) -> StoreResult<Teacher>;

    async fn list(&self) -> StoreResult<Vec<Teacher>>;

    async fn delete(&self, id: Uuid) -> StoreResult<()>;
}

pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Process-local store, used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryTeacherStore {
    teachers: Mutex<HashMap<Uuid, Teacher>>,
}

impl MemoryTeacherStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_teachers<T>(&self, f: impl FnOnce(&mut HashMap<Uuid, Teacher>) -> T) -> T {
        let mut guard = self.teachers.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

#[async_trait]
impl TeacherStore for MemoryTeacherStore {
    async fn load(&self, id: Uuid) -> StoreResult<Teacher> {
        self.with_teachers(|teachers| teachers.get(&id).cloned().ok_or(StoreError::NotFound(id)))
    }

    async fn save(&self, teacher: &Teacher) -> StoreResult<Teacher> {
        self.with_teachers(|teachers| {
            let stored = teachers
                .get(&teacher.id)
                .ok_or(StoreError::NotFound(teacher.id))?;
            if stored.version != teacher.version {
                return Err(StoreError::Conflict {
                    teacher_id: teacher.id,
                    expected: teacher.version,
                });
            }
            if teachers
                .values()
                .any(|other| other.id != teacher.id && other.profile.name == teacher.profile.name)
            {
                return Err(StoreError::Duplicate(teacher.profile.name.clone()));
            }
            let mut next = teacher.clone();
            next.version += 1;
            teachers.insert(next.id, next.clone());
            Ok(next)
        })
    }

    async fn insert(&self, teacher: &Teacher) -> StoreResult<Teacher> {
        self.with_teachers(|teachers| {
            if teachers
                .values()
                .any(|existing| existing.profile.name == teacher.profile.name)
            {
                return Err(StoreError::Duplicate(teacher.profile.name.clone()));
            }
            teachers.insert(teacher.id, teacher.clone());
            Ok(teacher.clone())
        })
    }

    async fn list(&self) -> StoreResult<Vec<Teacher>> {
        let mut all: Vec<Teacher> = self.with_teachers(|teachers| teachers.values().cloned().collect());
        all.sort_by(|a, b| a.profile.name.cmp(&b.profile.name));
        Ok(all)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        self.with_teachers(|teachers| {
            teachers
                .remove(&id)
                .map(|_| ())
                .ok_or(StoreError::NotFound(id))
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::TimeZone;

    use super::*;
    use crate::models::TeacherProfile;

    #[derive(Debug, Default)]
    pub struct SequentialIds(AtomicUsize);

    impl IdGenerator for SequentialIds {
        fn next_id(&self) -> String {
            format!("review-{}", self.0.fetch_add(1, Ordering::SeqCst) + 1)
        }
    }

    #[derive(Debug, Clone, Copy)]
    pub struct FixedClock(pub DateTime<Utc>);

    impl Default for FixedClock {
        fn default() -> Self {
            Self(Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap())
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    pub fn profile(name: &str) -> TeacherProfile {
        TeacherProfile {
            name: name.to_string(),
            age: 34,
            proficiency: "Mathematics".to_string(),
            tenth_percentage: Some(91.0),
            twelfth_percentage: Some(88.5),
            locality: "Koramangala".to_string(),
            latitude: 12.9352,
            longitude: 77.6245,
            subjects: vec!["Algebra".to_string(), "Calculus".to_string()],
            classes_offered: Vec::new(),
            qualifications: Vec::new(),
            about: "Ten years of board exam coaching".to_string(),
        }
    }
}
