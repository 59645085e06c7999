//! Scoring Engine: weighted aggregation and category assignment.
//!
//! Pure functions, no I/O. Callers validate that every metric is in
//! [0, 100] before calling; out-of-range input is a programming error.

use crate::models::analysis::{Category, MetricScores};

pub const MAX_SCORE: u32 = 100;

/// Weights in percent: experience 50, skills 30, education 20.
/// Supplemental is tracked but never weighted.
const EXPERIENCE_WEIGHT: u32 = 50;
const SKILLS_WEIGHT: u32 = 30;
const EDUCATION_WEIGHT: u32 = 20;

/// `floor(0.50·experience + 0.30·skills + 0.20·education)`.
///
/// The weighted sum is computed exactly in integer hundredths and floored
/// once at the end.
///
/// # Panics
/// Panics if any input exceeds `MAX_SCORE`.
pub fn overall_score(experience: u32, skills: u32, education: u32) -> u32 {
    assert!(
        experience <= MAX_SCORE && skills <= MAX_SCORE && education <= MAX_SCORE,
        "metric scores must be within [0, {MAX_SCORE}]: experience={experience} skills={skills} education={education}"
    );
    (EXPERIENCE_WEIGHT * experience + SKILLS_WEIGHT * skills + EDUCATION_WEIGHT * education) / 100
}

/// Maps an overall score to its band. Bands are closed-open except the top
/// band, which includes 100.
///
/// # Panics
/// Panics if `overall` exceeds `MAX_SCORE`.
pub fn category(overall: u32) -> Category {
    assert!(
        overall <= MAX_SCORE,
        "overall score must be within [0, {MAX_SCORE}]: {overall}"
    );
    match overall {
        90..=100 => Category::BestMatch,
        70..=89 => Category::GoodMatch,
        50..=69 => Category::PartialMatch,
        _ => Category::Mismatched,
    }
}

/// Convenience wrapper used by the worker: overall score and category.
pub fn score_and_categorize(scores: &MetricScores) -> (u32, Category) {
    debug_assert!(in_range(scores), "unvalidated scores: {scores:?}");
    let overall = overall_score(scores.experience, scores.skills, scores.education);
    (overall, category(overall))
}

/// True when every metric is within [0, 100].
pub fn in_range(scores: &MetricScores) -> bool {
    [
        scores.education,
        scores.skills,
        scores.experience,
        scores.supplemental,
    ]
    .iter()
    .all(|s| *s <= MAX_SCORE)
}
