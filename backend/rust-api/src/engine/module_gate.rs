use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::models::course::CourseModule;
use crate::models::progress::{ModuleProgress, ModuleStatus};

/// Per-part gate view: what the learner may touch right now.
#[derive(Debug, Clone)]
pub struct PartGate {
    pub part_id: String,
    pub order: u32,
    pub available: bool,
    pub completed: bool,
}

#[derive(Debug)]
pub struct GateOutcome {
    pub parts: Vec<PartGate>,
    pub progress: ModuleProgress,
    /// True exactly once: on the evaluation that first reaches
    /// `Completed`. Drives the module-completed signal.
    pub newly_completed: bool,
}

/// True when the given part may accept events: the first part is always
/// available, later parts unlock once every preceding mandatory part is
/// completed. Optional parts never gate their successors.
pub fn is_part_available(
    module: &CourseModule,
    part_id: &str,
    completed: &HashMap<String, bool>,
) -> bool {
    let Some(target) = module.parts.iter().find(|p| p.id == part_id) else {
        return false;
    };
    module
        .parts
        .iter()
        .filter(|p| p.mandatory && p.order < target.order)
        .all(|p| completed.get(&p.id).copied().unwrap_or(false))
}

/// Recomputes the module rollup from part-level state.
///
/// `completed` maps part_id to completion (video/document: sticky flag;
/// quiz: any passed attempt). `touched` holds part ids with any
/// recorded progress. The stored status is merged forward-only so a
/// recomputation can never regress what the learner already earned.
pub fn evaluate(
    module: &CourseModule,
    course_id: &str,
    learner_id: &str,
    stored: Option<&ModuleProgress>,
    completed: &HashMap<String, bool>,
    touched: &HashSet<String>,
    minutes_spent: f64,
    now: DateTime<Utc>,
) -> GateOutcome {
    let mut parts: Vec<PartGate> = module
        .parts
        .iter()
        .map(|p| PartGate {
            part_id: p.id.clone(),
            order: p.order,
            available: is_part_available(module, &p.id, completed),
            completed: completed.get(&p.id).copied().unwrap_or(false),
        })
        .collect();
    parts.sort_by_key(|p| p.order);

    let mandatory_total = module.parts.iter().filter(|p| p.mandatory).count();
    let mandatory_done = module
        .parts
        .iter()
        .filter(|p| p.mandatory && completed.get(&p.id).copied().unwrap_or(false))
        .count();

    let percent = if mandatory_total == 0 {
        100.0
    } else {
        mandatory_done as f64 / mandatory_total as f64 * 100.0
    };

    let computed_status = if mandatory_done == mandatory_total {
        ModuleStatus::Completed
    } else if module.parts.iter().any(|p| touched.contains(&p.id)) {
        ModuleStatus::InProgress
    } else {
        ModuleStatus::Available
    };

    let prior_status = stored.map(|s| s.status).unwrap_or(ModuleStatus::Locked);
    let status = prior_status.merge_forward(computed_status);

    let started_at = stored.and_then(|s| s.started_at).or_else(|| {
        if status.rank() >= ModuleStatus::InProgress.rank() {
            Some(now)
        } else {
            None
        }
    });
    let completed_at = stored.and_then(|s| s.completed_at).or_else(|| {
        if status == ModuleStatus::Completed {
            Some(now)
        } else {
            None
        }
    });

    let prior_percent = stored.map(|s| s.percent_complete).unwrap_or(0.0);
    let prior_minutes = stored.map(|s| s.minutes_spent).unwrap_or(0.0);

    let progress = ModuleProgress {
        id: ModuleProgress::storage_key(learner_id, &module.id),
        learner_id: learner_id.to_string(),
        module_id: module.id.clone(),
        course_id: course_id.to_string(),
        status,
        percent_complete: percent.max(prior_percent),
        minutes_spent: minutes_spent.max(prior_minutes),
        started_at,
        completed_at,
        updated_at: now,
    };

    let newly_completed =
        status == ModuleStatus::Completed && prior_status != ModuleStatus::Completed;

    GateOutcome {
        parts,
        progress,
        newly_completed,
    }
}
