use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stats::{Rating, RatingStats};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: String,
    pub student_id: String,
    pub comment: Option<String>,
    pub rating: Rating,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassOffering {
    pub id: String,
    pub subject: String,
    #[serde(default)]
    pub standards: Vec<u8>,
    pub format: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Qualification {
    pub degree: String,
    pub field: String,
    pub institution: String,
    pub year: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherProfile {
    pub name: String,
    pub age: u32,
    pub proficiency: String,
    #[serde(default)]
    pub tenth_percentage: Option<f64>,
    #[serde(default)]
    pub twelfth_percentage: Option<f64>,
    pub locality: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default)]
    pub classes_offered: Vec<ClassOffering>,
    #[serde(default)]
    pub qualifications: Vec<Qualification>,
    pub about: String,
}

/// A teacher document: profile, embedded reviews, and the cached stats
/// derived from them. `version` backs optimistic concurrency in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Teacher {
    pub id: Uuid,
    #[serde(flatten)]
    pub profile: TeacherProfile,
    pub reviews: Vec<Review>,
    pub rating: RatingStats,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Teacher {
    pub fn new(id: Uuid, profile: TeacherProfile, now: DateTime<Utc>) -> Self {
        Self {
            id,
            profile,
            reviews: Vec::new(),
            rating: RatingStats::empty(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn review_index(&self, review_id: &str) -> Option<usize> {
        self.reviews.iter().position(|review| review.id == review_id)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReview {
    pub student_id: String,
    #[serde(default)]
    pub comment: Option<String>,
    pub rating: i64,
}

/// Partial update of a review. Absent fields are left untouched; an empty
/// comment clears the stored one.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviewPatch {
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub rating: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherPatch {
    pub name: Option<String>,
    pub age: Option<u32>,
    pub proficiency: Option<String>,
    pub tenth_percentage: Option<f64>,
    pub twelfth_percentage: Option<f64>,
    pub locality: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub subjects: Option<Vec<String>>,
    pub classes_offered: Option<Vec<ClassOffering>>,
    pub qualifications: Option<Vec<Qualification>>,
    pub about: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewWithStats {
    pub review: Review,
    pub rating: RatingStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherReviews {
    pub reviews: Vec<Review>,
    pub rating_stats: RatingStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdatedStats {
    pub rating: RatingStats,
}

#[derive(Debug, Clone)]
pub struct TeacherSummary {
    pub name: String,
    pub locality: String,
    pub average: f64,
    pub review_count: u64,
}

#[derive(Debug, Clone)]
pub struct RecentReview {
    pub teacher_name: String,
    pub student_id: String,
    pub rating: Rating,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}
