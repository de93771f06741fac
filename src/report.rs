use std::fmt::Write;

use chrono::{DateTime, Duration, Utc};

use crate::models::{RecentReview, Teacher, TeacherSummary};
use crate::stats::{Rating, RatingStats};

pub fn rank_teachers(teachers: &[Teacher]) -> Vec<TeacherSummary> {
    let mut ranked: Vec<TeacherSummary> = teachers
        .iter()
        .filter(|t| t.rating.count > 0)
        .map(|t| TeacherSummary {
            name: t.profile.name.clone(),
            locality: t.profile.locality.clone(),
            average: t.rating.average,
            review_count: t.rating.count,
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.average
            .partial_cmp(&a.average)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.review_count.cmp(&a.review_count))
            .then_with(|| a.name.cmp(&b.name))
    });
    ranked
}

/// Star histogram summed over every teacher's cached stats.
pub fn combined_breakdown(teachers: &[Teacher]) -> RatingStats {
    teachers
        .iter()
        .fold(RatingStats::empty(), |acc, t| acc.merge(&t.rating))
}

/// Start of a `since_days` window ending at `now`; at least one day wide.
/// `None` when the window reaches past the representable time range.
pub fn since_cutoff(now: DateTime<Utc>, since_days: i64) -> Option<DateTime<Utc>> {
    let window = Duration::try_days(since_days.max(1))?;
    now.checked_sub_signed(window)
}

pub fn recent_reviews(teachers: &[Teacher], since: Option<DateTime<Utc>>) -> Vec<RecentReview> {
    let mut recent: Vec<RecentReview> = teachers
        .iter()
        .flat_map(|t| {
            t.reviews.iter().map(move |r| RecentReview {
                teacher_name: t.profile.name.clone(),
                student_id: r.student_id.clone(),
                rating: r.rating,
                comment: r.comment.clone(),
                created_at: r.created_at,
            })
        })
        .filter(|r| since.map_or(true, |cutoff| r.created_at >= cutoff))
        .collect();
    recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    recent
}

pub fn build_report(
    locality: Option<&str>,
    since: Option<DateTime<Utc>>,
    teachers: &[Teacher],
    limit: usize,
) -> String {
    let teachers: Vec<Teacher> = teachers
        .iter()
        .filter(|t| locality.map_or(true, |l| t.profile.locality.eq_ignore_ascii_case(l)))
        .cloned()
        .collect();
    let ranked = rank_teachers(&teachers);
    let combined = combined_breakdown(&teachers);
    let recent = recent_reviews(&teachers, since);

    let mut output = String::new();
    let scope = locality.unwrap_or("all localities");

    let _ = writeln!(output, "# Tutor Ratings Report");
    let _ = writeln!(
        output,
        "Generated for {} ({} teachers, {} reviews, overall average {:.2})",
        scope,
        teachers.len(),
        combined.count,
        combined.average
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Top Rated Teachers");

    if ranked.is_empty() {
        let _ = writeln!(output, "No reviewed teachers yet.");
    } else {
        for summary in ranked.iter().take(limit) {
            let _ = writeln!(
                output,
                "- {} ({}) averages {:.2} across {} reviews",
                summary.name, summary.locality, summary.average, summary.review_count
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Star Distribution");
    for rating in Rating::all().rev() {
        let n = combined.stars(rating);
        let share = if combined.count == 0 {
            0.0
        } else {
            n as f64 * 100.0 / combined.count as f64
        };
        let _ = writeln!(output, "- {rating} stars: {n} ({share:.0}%)");
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Reviews");
    if recent.is_empty() {
        let _ = writeln!(output, "No reviews recorded for this window.");
    } else {
        for review in recent.iter().take(5) {
            let _ = writeln!(
                output,
                "- {} rated {} {}/5 on {}: {}",
                review.student_id,
                review.teacher_name,
                review.rating,
                review.created_at.date_naive(),
                review.comment.as_deref().unwrap_or("(no comment)")
            );
        }
    }

    let unreviewed: Vec<&str> = teachers
        .iter()
        .filter(|t| t.rating.count == 0)
        .map(|t| t.profile.name.as_str())
        .collect();
    if !unreviewed.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Awaiting First Review");
        for name in unreviewed {
            let _ = writeln!(output, "- {name}");
        }
    }

    output
}
