//! Review mutations with their rating aggregates kept in lockstep.
//!
//! Every write runs load → mutate → save against one teacher document. Within
//! a process the span is serialized by a per-teacher async mutex; across
//! processes the store's version check rejects stale writes and the whole span
//! is retried. The mutation is applied to a loaded copy, so nothing becomes
//! visible unless the save lands.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{Result, ReviewError, StoreError};
use crate::models::{
    NewReview, Review, ReviewPatch, ReviewWithStats, Teacher, TeacherReviews, UpdatedStats,
};
use crate::retry::RetryPolicy;
use crate::stats::{Rating, RatingStats};
use crate::store::{Clock, IdGenerator, SystemClock, TeacherStore, UuidGenerator};

#[derive(Debug, Default)]
struct TeacherLocks {
    inner: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl TeacherLocks {
    async fn acquire(&self, teacher_id: Uuid) -> TeacherGuard<'_> {
        let lock = {
            let mut locks = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(teacher_id).or_default().clone()
        };
        TeacherGuard {
            locks: self,
            teacher_id,
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Drops the entry once nobody holds or waits on it. Waiters own a clone
    /// of the `Arc`, so a count of one means the map is the only owner.
    fn prune(&self, teacher_id: Uuid) {
        let mut locks = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(lock) = locks.get(&teacher_id) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(&teacher_id);
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Holds a teacher's lock; releasing it prunes the registry entry, also when
/// the owning future is dropped mid-flight.
struct TeacherGuard<'a> {
    locks: &'a TeacherLocks,
    teacher_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for TeacherGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks.prune(self.teacher_id);
    }
}

#[derive(Clone)]
pub struct RatingLedger {
    store: Arc<dyn TeacherStore>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    locks: Arc<TeacherLocks>,
}

impl RatingLedger {
    pub fn new(store: Arc<dyn TeacherStore>) -> Self {
        Self {
            store,
            ids: Arc::new(UuidGenerator),
            clock: Arc::new(SystemClock),
            retry: RetryPolicy::default(),
            locks: Arc::default(),
        }
    }

    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub(crate) fn store(&self) -> &dyn TeacherStore {
        self.store.as_ref()
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub async fn add_review(&self, teacher_id: Uuid, input: NewReview) -> Result<ReviewWithStats> {
        let rating = Rating::new(input.rating)?;
        let review = Review {
            id: self.ids.next_id(),
            student_id: input.student_id,
            comment: input.comment.and_then(non_empty),
            rating,
            created_at: self.clock.now(),
        };

        let (teacher, review) = self
            .mutate(teacher_id, |teacher| {
                teacher.reviews.push(review.clone());
                teacher.rating = teacher.rating.apply(None, Some(rating));
                Ok(review.clone())
            })
            .await?;

        info!(%teacher_id, review_id = %review.id, %rating, "review added");
        Ok(ReviewWithStats {
            review,
            rating: teacher.rating,
        })
    }

    pub async fn get_teacher_reviews(&self, teacher_id: Uuid) -> Result<TeacherReviews> {
        let teacher = self.store.load(teacher_id).await.map_err(log_store_error)?;
        Ok(TeacherReviews {
            reviews: teacher.reviews,
            rating_stats: teacher.rating,
        })
    }

    pub async fn edit_review(
        &self,
        teacher_id: Uuid,
        review_id: &str,
        patch: ReviewPatch,
    ) -> Result<ReviewWithStats> {
        let rating = patch.rating.map(Rating::new).transpose()?;

        let (teacher, review) = self
            .mutate(teacher_id, |teacher| {
                let idx = find_review(teacher, review_id)?;
                let before = teacher.reviews[idx].rating;

                if let Some(after) = rating.filter(|after| *after != before) {
                    teacher.rating = teacher.rating.apply(Some(before), Some(after));
                    teacher.reviews[idx].rating = after;
                }
                if let Some(comment) = &patch.comment {
                    teacher.reviews[idx].comment = non_empty(comment.clone());
                }

                Ok(teacher.reviews[idx].clone())
            })
            .await?;

        info!(%teacher_id, review_id, rating = %review.rating, "review edited");
        Ok(ReviewWithStats {
            review,
            rating: teacher.rating,
        })
    }

    pub async fn delete_review(&self, teacher_id: Uuid, review_id: &str) -> Result<UpdatedStats> {
        let (teacher, removed) = self
            .mutate(teacher_id, |teacher| {
                let idx = find_review(teacher, review_id)?;
                let removed = teacher.reviews.remove(idx);
                teacher.rating = teacher.rating.apply(Some(removed.rating), None);
                Ok(removed)
            })
            .await?;

        info!(%teacher_id, review_id, rating = %removed.rating, "review deleted");
        Ok(UpdatedStats {
            rating: teacher.rating,
        })
    }

    /// Recomputes the cached stats from the review list, for documents
    /// written before the aggregates were maintained or edited out of band.
    pub async fn rebuild_stats(&self, teacher_id: Uuid) -> Result<UpdatedStats> {
        let (teacher, drift) = self
            .mutate(teacher_id, |teacher| {
                let drift = teacher.rating.verify(&teacher.reviews).err();
                teacher.rating = RatingStats::from_reviews(&teacher.reviews);
                Ok(drift)
            })
            .await?;

        if let Some(problems) = drift {
            warn!(%teacher_id, ?problems, "rebuilt drifted rating stats");
        }
        Ok(UpdatedStats {
            rating: teacher.rating,
        })
    }

    /// Runs `apply` against a fresh copy of the teacher and persists the
    /// result, retrying the whole span on version conflicts.
    pub(crate) async fn mutate<T, F>(&self, teacher_id: Uuid, apply: F) -> Result<(Teacher, T)>
    where
        F: Fn(&mut Teacher) -> Result<T> + Sync,
        T: Send,
    {
        let _guard = self.locks.acquire(teacher_id).await;
        let this = self;
        let apply = &apply;

        this.retry
            .retry_async(
                move |attempt| async move {
                    if attempt > 0 {
                        warn!(%teacher_id, attempt, "retrying after version conflict");
                    }
                    let mut teacher = this.store.load(teacher_id).await?;
                    let value = apply(&mut teacher)?;
                    teacher.updated_at = this.clock.now();
                    let saved = this.store.save(&teacher).await?;
                    Ok::<_, ReviewError>((saved, value))
                },
                |err: &ReviewError| matches!(err, ReviewError::Store(StoreError::Conflict { .. })),
            )
            .await
            .map_err(|err| match err {
                ReviewError::Store(StoreError::Conflict { .. }) => {
                    warn!(%teacher_id, attempts = this.retry.max_attempts, "giving up on conflicting writes");
                    ReviewError::Conflict {
                        teacher_id,
                        attempts: this.retry.max_attempts,
                    }
                }
                ReviewError::Store(source) => {
                    error!(%teacher_id, error = %source, "teacher store failure");
                    ReviewError::Store(source)
                }
                other => other,
            })
    }
}

fn find_review(teacher: &Teacher, review_id: &str) -> Result<usize> {
    teacher
        .review_index(review_id)
        .ok_or_else(|| ReviewError::ReviewNotFound {
            teacher_id: teacher.id,
            review_id: review_id.to_string(),
        })
}

fn non_empty(comment: String) -> Option<String> {
    let trimmed = comment.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub(crate) fn log_store_error(err: StoreError) -> ReviewError {
    let err = ReviewError::from(err);
    if let ReviewError::Store(source) = &err {
        error!(error = %source, "teacher store failure");
    }
    err
}
