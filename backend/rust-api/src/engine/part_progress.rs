use chrono::{DateTime, Utc};

use crate::models::progress::PartProgress;

/// Merges a raw position report into the stored high-water mark.
///
/// The merge is a max over (furthest_position, percent_watched) with a
/// sticky completion flag, so it is idempotent, commutative and
/// associative: duplicate, stale and out-of-order reports from
/// multiple tabs or devices all converge to the same state.
pub fn merge_report(
    existing: Option<&PartProgress>,
    learner_id: &str,
    part_id: &str,
    position: f64,
    duration_seconds: f64,
    completion_threshold: f64,
    now: DateTime<Utc>,
) -> PartProgress {
    let position = position.max(0.0);
    let percent = if duration_seconds > 0.0 {
        (position / duration_seconds * 100.0).min(100.0)
    } else {
        0.0
    };

    let prior_position = existing.map(|p| p.furthest_position).unwrap_or(0.0);
    let prior_percent = existing.map(|p| p.percent_watched).unwrap_or(0.0);
    let prior_completed = existing.map(|p| p.completed).unwrap_or(false);
    let prior_minutes = existing.map(|p| p.minutes_spent).unwrap_or(0.0);

    let furthest_position = prior_position.max(position);
    let percent_watched = prior_percent.max(percent);

    // Minutes accrue from high-water advancement only, never from
    // client-reported elapsed time.
    let advanced_seconds = (furthest_position - prior_position).max(0.0);

    PartProgress {
        id: PartProgress::storage_key(learner_id, part_id),
        learner_id: learner_id.to_string(),
        part_id: part_id.to_string(),
        furthest_position,
        percent_watched,
        completed: prior_completed || percent_watched >= completion_threshold,
        minutes_spent: prior_minutes + advanced_seconds / 60.0,
        updated_at: now,
    }
}

/// Document parts carry no playback position; a single acknowledgement
/// completes them.
pub fn acknowledge_document(
    existing: Option<&PartProgress>,
    learner_id: &str,
    part_id: &str,
    now: DateTime<Utc>,
) -> PartProgress {
    let prior_minutes = existing.map(|p| p.minutes_spent).unwrap_or(0.0);
    PartProgress {
        id: PartProgress::storage_key(learner_id, part_id),
        learner_id: learner_id.to_string(),
        part_id: part_id.to_string(),
        furthest_position: existing.map(|p| p.furthest_position).unwrap_or(1.0).max(1.0),
        percent_watched: 100.0,
        completed: true,
        minutes_spent: prior_minutes,
        updated_at: now,
    }
}
