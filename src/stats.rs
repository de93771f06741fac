//! Rating aggregation.
//!
//! A teacher's [`RatingStats`] is a cached projection of its review list. Every
//! review mutation is expressed as a `(before, after)` pair of ratings and fed
//! through [`RatingStats::apply`], which returns the new projection without
//! touching storage. [`RatingStats::from_reviews`] rebuilds the projection from
//! scratch and [`RatingStats::verify`] reports drift between the two.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ReviewError;
use crate::models::Review;

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;

/// Star value in `MIN_RATING..=MAX_RATING`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Rating(u8);

impl Rating {
    pub fn new(value: i64) -> Result<Self, ReviewError> {
        if value < MIN_RATING as i64 || value > MAX_RATING as i64 {
            return Err(ReviewError::validation(format!(
                "Rating must be between {MIN_RATING} and {MAX_RATING}"
            )));
        }
        Ok(Rating(value as u8))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn all() -> impl DoubleEndedIterator<Item = Rating> {
        (MIN_RATING..=MAX_RATING).map(Rating)
    }
}

impl TryFrom<i64> for Rating {
    type Error = ReviewError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Rating::new(value)
    }
}

impl From<Rating> for u8 {
    fn from(value: Rating) -> Self {
        value.0
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingStats {
    pub breakdown: BTreeMap<u8, u64>,
    pub total: u64,
    pub count: u64,
    pub average: f64,
}

impl Default for RatingStats {
    fn default() -> Self {
        Self::empty()
    }
}

impl RatingStats {
    pub fn empty() -> Self {
        Self {
            breakdown: Rating::all().map(|r| (r.value(), 0)).collect(),
            total: 0,
            count: 0,
            average: 0.0,
        }
    }

    pub fn from_reviews(reviews: &[Review]) -> Self {
        reviews
            .iter()
            .fold(Self::empty(), |stats, review| stats.apply(None, Some(review.rating)))
    }

    pub fn stars(&self, rating: Rating) -> u64 {
        self.breakdown.get(&rating.value()).copied().unwrap_or(0)
    }

    /// Folds one review mutation into the aggregate.
    ///
    /// `(None, Some(r))` adds a review, `(Some(r), None)` removes one and
    /// `(Some(a), Some(b))` re-rates one; the count only moves on add/remove.
    pub fn apply(&self, before: Option<Rating>, after: Option<Rating>) -> Self {
        let mut next = self.clone();

        if let Some(old) = before {
            let slot = next.breakdown.entry(old.value()).or_insert(0);
            *slot = slot.saturating_sub(1);
            next.total = next.total.saturating_sub(old.value() as u64);
            if after.is_none() {
                next.count = next.count.saturating_sub(1);
            }
        }

        if let Some(new) = after {
            *next.breakdown.entry(new.value()).or_insert(0) += 1;
            next.total += new.value() as u64;
            if before.is_none() {
                next.count += 1;
            }
        }

        next.average = average(next.total, next.count);
        next
    }

    /// Sums two aggregates, as if their reviews were one list.
    pub fn merge(&self, other: &RatingStats) -> Self {
        let mut merged = self.clone();
        for (&star, &n) in &other.breakdown {
            *merged.breakdown.entry(star).or_insert(0) += n;
        }
        merged.total += other.total;
        merged.count += other.count;
        merged.average = average(merged.total, merged.count);
        merged
    }

    /// Lists every invariant the cached stats break relative to `reviews`.
    pub fn verify(&self, reviews: &[Review]) -> Result<(), Vec<String>> {
        let expected = Self::from_reviews(reviews);
        let mut problems = Vec::new();

        if self.count != reviews.len() as u64 {
            problems.push(format!(
                "count is {} but there are {} reviews",
                self.count,
                reviews.len()
            ));
        }
        if self.total != expected.total {
            problems.push(format!(
                "total is {} but ratings sum to {}",
                self.total, expected.total
            ));
        }
        let histogram_sum: u64 = self.breakdown.values().sum();
        if histogram_sum != self.count {
            problems.push(format!(
                "breakdown sums to {histogram_sum} but count is {}",
                self.count
            ));
        }
        for rating in Rating::all() {
            let (cached, actual) = (self.stars(rating), expected.stars(rating));
            if cached != actual {
                problems.push(format!(
                    "breakdown[{rating}] is {cached} but {actual} reviews have that rating"
                ));
            }
        }
        if let Some(star) = self.breakdown.keys().find(|k| Rating::new(**k as i64).is_err()) {
            problems.push(format!("breakdown has out-of-range key {star}"));
        }
        if self.average != average(self.total, self.count) {
            problems.push(format!(
                "average is {} but total/count is {}",
                self.average,
                average(self.total, self.count)
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

fn average(total: u64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        total as f64 / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn rating(value: i64) -> Rating {
        Rating::new(value).unwrap()
    }

    fn review(id: &str, value: i64) -> Review {
        Review {
            id: id.to_string(),
            student_id: "student-1".to_string(),
            comment: None,
            rating: rating(value),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn rating_rejects_out_of_range_values() {
        assert!(Rating::new(0).is_err());
        assert!(Rating::new(6).is_err());
        assert!(Rating::new(-3).is_err());
        assert_eq!(Rating::new(1).unwrap().value(), 1);
        assert_eq!(Rating::new(5).unwrap().value(), 5);
    }

    #[test]
    fn rating_deserializes_through_validation() {
        let ok: Rating = serde_json::from_str("4").unwrap();
        assert_eq!(ok.value(), 4);
        assert!(serde_json::from_str::<Rating>("9").is_err());
        assert!(serde_json::from_str::<Rating>("4.5").is_err());
    }

    #[test]
    fn empty_stats_have_every_star_bucket() {
        let stats = RatingStats::empty();
        assert_eq!(stats.breakdown.len(), 5);
        assert!(stats.breakdown.values().all(|&n| n == 0));
        assert_eq!(stats.average, 0.0);
    }

    #[test]
    fn add_edit_delete_adjust_aggregates() {
        let stats = RatingStats::empty().apply(None, Some(rating(5)));
        assert_eq!((stats.count, stats.total, stats.average), (1, 5, 5.0));

        let stats = stats.apply(None, Some(rating(3)));
        assert_eq!((stats.count, stats.total, stats.average), (2, 8, 4.0));

        let stats = stats.apply(Some(rating(5)), Some(rating(1)));
        assert_eq!((stats.count, stats.total, stats.average), (2, 4, 2.0));
        assert_eq!(stats.stars(rating(5)), 0);
        assert_eq!(stats.stars(rating(1)), 1);

        let stats = stats.apply(Some(rating(3)), None);
        assert_eq!((stats.count, stats.total, stats.average), (1, 1, 1.0));
    }

    #[test]
    fn removing_last_review_zeroes_average() {
        let stats = RatingStats::empty()
            .apply(None, Some(rating(4)))
            .apply(Some(rating(4)), None);
        assert_eq!(stats, RatingStats::empty());
        assert_eq!(stats.average, 0.0);
        assert!(!stats.average.is_nan());
    }

    #[test]
    fn identity_mutation_is_a_no_op() {
        let stats = RatingStats::empty().apply(None, Some(rating(2)));
        assert_eq!(stats.apply(None, None), stats);
    }

    #[test]
    fn merge_matches_stats_over_the_combined_reviews() {
        let left = vec![review("a", 5), review("b", 4)];
        let right = vec![review("c", 1)];
        let merged = RatingStats::from_reviews(&left).merge(&RatingStats::from_reviews(&right));

        let all: Vec<Review> = left.into_iter().chain(right).collect();
        assert_eq!(merged, RatingStats::from_reviews(&all));
        assert_eq!(merged.average, 10.0 / 3.0);

        let empty = RatingStats::empty().merge(&RatingStats::empty());
        assert_eq!(empty, RatingStats::empty());
        assert!(!empty.average.is_nan());
    }

    #[test]
    fn verify_reports_drift() {
        let reviews = vec![review("a", 5), review("b", 2)];
        let good = RatingStats::from_reviews(&reviews);
        assert!(good.verify(&reviews).is_ok());

        let mut bad = good.clone();
        bad.total = 9;
        bad.breakdown.insert(1, 1);
        let problems = bad.verify(&reviews).unwrap_err();
        assert!(problems.iter().any(|p| p.starts_with("total")));
        assert!(problems.iter().any(|p| p.starts_with("breakdown sums")));
        assert!(problems.iter().any(|p| p.starts_with("breakdown[1]")));
        assert!(problems.iter().any(|p| p.starts_with("average")));
    }

    #[test]
    fn stats_serialize_with_string_star_keys() {
        let stats = RatingStats::empty().apply(None, Some(rating(5)));
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["breakdown"]["5"], 1);
        assert_eq!(json["breakdown"]["1"], 0);

        let back: RatingStats = serde_json::from_value(json).unwrap();
        assert_eq!(back, stats);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn rating_strategy() -> impl Strategy<Value = Rating> {
        (1_i64..=5).prop_map(|v| Rating::new(v).unwrap())
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(Rating),
        Edit(usize, Rating),
        Delete(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            rating_strategy().prop_map(Op::Add),
            (any::<usize>(), rating_strategy()).prop_map(|(i, r)| Op::Edit(i, r)),
            any::<usize>().prop_map(Op::Delete),
        ]
    }

    fn check(stats: &RatingStats, ratings: &[Rating]) -> Result<(), TestCaseError> {
        let total: u64 = ratings.iter().map(|r| r.value() as u64).sum();
        prop_assert_eq!(stats.count, ratings.len() as u64);
        prop_assert_eq!(stats.total, total);
        prop_assert_eq!(stats.breakdown.values().sum::<u64>(), stats.count);
        for star in Rating::all() {
            let n = ratings.iter().filter(|r| **r == star).count() as u64;
            prop_assert_eq!(stats.stars(star), n);
        }
        if stats.count == 0 {
            prop_assert_eq!(stats.average, 0.0);
        } else {
            prop_assert_eq!(stats.average, total as f64 / ratings.len() as f64);
        }
        Ok(())
    }

    proptest! {
        #[test]
        fn prop_invariants_hold_after_every_op(ops in prop::collection::vec(op_strategy(), 0..60)) {
            let mut stats = RatingStats::empty();
            let mut ratings: Vec<Rating> = Vec::new();

            for op in ops {
                match op {
                    Op::Add(r) => {
                        stats = stats.apply(None, Some(r));
                        ratings.push(r);
                    }
                    Op::Edit(i, r) if !ratings.is_empty() => {
                        let idx = i % ratings.len();
                        stats = stats.apply(Some(ratings[idx]), Some(r));
                        ratings[idx] = r;
                    }
                    Op::Delete(i) if !ratings.is_empty() => {
                        let idx = i % ratings.len();
                        stats = stats.apply(Some(ratings.remove(idx)), None);
                    }
                    _ => {}
                }
                check(&stats, &ratings)?;
            }
        }

        #[test]
        fn prop_add_then_delete_is_identity(
            seed in prop::collection::vec(rating_strategy(), 0..20),
            r in rating_strategy()
        ) {
            let before = seed
                .iter()
                .fold(RatingStats::empty(), |s, r| s.apply(None, Some(*r)));
            let after = before.apply(None, Some(r)).apply(Some(r), None);
            prop_assert_eq!(after, before);
        }

        #[test]
        fn prop_edit_matches_delete_then_add(
            seed in prop::collection::vec(rating_strategy(), 0..20),
            a in rating_strategy(),
            b in rating_strategy()
        ) {
            let base = seed
                .iter()
                .fold(RatingStats::empty(), |s, r| s.apply(None, Some(*r)))
                .apply(None, Some(a));
            let edited = base.apply(Some(a), Some(b));
            let replaced = base.apply(Some(a), None).apply(None, Some(b));
            prop_assert_eq!(edited, replaced);
        }
    }
}
