use chrono::{DateTime, Utc};

use crate::models::course::Course;
use crate::models::progress::{Enrollment, EnrollmentStatus, ModuleProgress, ModuleStatus};

#[derive(Debug)]
pub struct EnrollmentOutcome {
    pub enrollment: Enrollment,
    /// True exactly once: on the recompute that first certifies.
    pub newly_certified: bool,
}

/// Recomputes the course-level rollup from scratch on every child
/// mutation. Derived values are never incrementally patched, so missed
/// updates cannot cause drift.
///
/// `quiz_scores` holds the best passing `percent_score` for each
/// quiz-bearing mandatory part that has one.
pub fn recompute(
    course: &Course,
    learner_id: &str,
    modules: &[ModuleProgress],
    quiz_scores: &[f64],
    total_minutes: f64,
    existing: Option<&Enrollment>,
    now: DateTime<Utc>,
) -> EnrollmentOutcome {
    let find = |module_id: &str| modules.iter().find(|m| m.module_id == module_id);

    let module_count = course.modules.len();
    let percent_sum: f64 = course
        .modules
        .iter()
        .map(|m| find(&m.id).map(|p| p.percent_complete).unwrap_or(0.0))
        .sum();
    let percent_complete = if module_count == 0 {
        100.0
    } else {
        percent_sum / module_count as f64
    };

    let all_completed = !course.modules.is_empty()
        && course
            .modules
            .iter()
            .all(|m| find(&m.id).is_some_and(|p| p.status == ModuleStatus::Completed));
    let any_progress = modules
        .iter()
        .any(|m| m.status.rank() >= ModuleStatus::InProgress.rank() || m.percent_complete > 0.0);

    let computed_status = if all_completed {
        EnrollmentStatus::Completed
    } else if any_progress {
        EnrollmentStatus::InProgress
    } else {
        EnrollmentStatus::NotStarted
    };

    let prior = existing.cloned().unwrap_or_else(|| {
        Enrollment::new(learner_id, &course.id, now)
    });
    let status = if computed_status.rank() > prior.status.rank() {
        computed_status
    } else {
        prior.status
    };

    let mut enrollment = Enrollment {
        status,
        percent_complete: percent_complete.max(prior.percent_complete),
        total_minutes_spent: total_minutes.max(prior.total_minutes_spent),
        updated_at: now,
        ..prior
    };

    // Certification is stamped exactly once; later recomputes on an
    // already-certified enrollment leave the verdict untouched.
    let mut newly_certified = false;
    if status == EnrollmentStatus::Completed && !enrollment.certified {
        let quiz_part_count = course.quiz_parts().count();
        let final_score = if quiz_part_count == 0 {
            None
        } else {
            Some(quiz_scores.iter().sum::<f64>() / quiz_scores.len().max(1) as f64)
        };
        // A course with no quizzes certifies on completion alone.
        let meets_threshold = final_score
            .map(|s| s >= course.certification_threshold)
            .unwrap_or(true);
        enrollment.final_score = final_score;
        if meets_threshold {
            enrollment.certified = true;
            enrollment.certified_at = Some(now);
            newly_certified = true;
        }
    }

    EnrollmentOutcome {
        enrollment,
        newly_certified,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::course::{CourseModule, Part, PartContent};
    use crate::models::quiz::{Quiz, Question, QuestionKind};

    fn quiz_part(id: &str, order: u32) -> Part {
        Part {
            id: id.to_string(),
            title: format!("quiz {}", id),
            order,
            content: PartContent::Quiz {
                quiz: Quiz {
                    id: format!("{}-quiz", id),
                    pass_threshold_percent: 70.0,
                    max_attempts: 3,
                    time_limit_seconds: None,
                    shuffle_questions: false,
                    questions: vec![Question {
                        id: "q1".into(),
                        prompt: "q".into(),
                        point_value: 1,
                        kind: QuestionKind::TrueFalse { correct: true },
                    }],
                },
            },
            mandatory: true,
        }
    }

    fn video_part(id: &str, order: u32) -> Part {
        Part {
            id: id.to_string(),
            title: format!("video {}", id),
            order,
            content: PartContent::Video {
                duration_seconds: 600.0,
                completion_threshold: None,
            },
            mandatory: true,
        }
    }

    fn course(with_quiz: bool, threshold: f64) -> Course {
        let mut parts = vec![video_part("p1", 1)];
        if with_quiz {
            parts.push(quiz_part("p2", 2));
        }
        Course {
            id: "course-1".into(),
            title: "course".into(),
            certification_threshold: threshold,
            modules: vec![
                CourseModule {
                    id: "mod-1".into(),
                    title: "m1".into(),
                    order: 1,
                    parts,
                },
                CourseModule {
                    id: "mod-2".into(),
                    title: "m2".into(),
                    order: 2,
                    parts: vec![video_part("p3", 1)],
                },
            ],
        }
    }

    fn module_progress(module_id: &str, status: ModuleStatus, percent: f64) -> ModuleProgress {
        ModuleProgress {
            id: format!("learner-1:{}", module_id),
            learner_id: "learner-1".into(),
            module_id: module_id.to_string(),
            course_id: "course-1".into(),
            status,
            percent_complete: percent,
            minutes_spent: 0.0,
            started_at: Some(Utc::now()),
            completed_at: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn percent_is_the_mean_over_all_modules() {
        let c = course(false, 0.0);
        let modules = vec![module_progress("mod-1", ModuleStatus::InProgress, 50.0)];
        let outcome = recompute(&c, "learner-1", &modules, &[], 10.0, None, Utc::now());
        // mod-2 has no progress record yet and counts as zero.
        assert_eq!(outcome.enrollment.percent_complete, 25.0);
        assert_eq!(outcome.enrollment.status, EnrollmentStatus::InProgress);
        assert!(!outcome.enrollment.certified);
    }

    #[test]
    fn completion_of_every_module_completes_the_enrollment() {
        let c = course(false, 0.0);
        let modules = vec![
            module_progress("mod-1", ModuleStatus::Completed, 100.0),
            module_progress("mod-2", ModuleStatus::Completed, 100.0),
        ];
        let outcome = recompute(&c, "learner-1", &modules, &[], 42.0, None, Utc::now());
        assert_eq!(outcome.enrollment.status, EnrollmentStatus::Completed);
        // No quizzes: completion alone certifies.
        assert!(outcome.enrollment.certified);
        assert!(outcome.newly_certified);
        assert_eq!(outcome.enrollment.final_score, None);
    }

    #[test]
    fn final_score_is_mean_of_passing_quiz_scores() {
        let c = course(true, 75.0);
        let modules = vec![
            module_progress("mod-1", ModuleStatus::Completed, 100.0),
            module_progress("mod-2", ModuleStatus::Completed, 100.0),
        ];
        let outcome = recompute(&c, "learner-1", &modules, &[80.0], 10.0, None, Utc::now());
        assert_eq!(outcome.enrollment.final_score, Some(80.0));
        assert!(outcome.enrollment.certified);
        assert!(outcome.newly_certified);
    }

    #[test]
    fn below_threshold_completes_without_certifying() {
        let c = course(true, 90.0);
        let modules = vec![
            module_progress("mod-1", ModuleStatus::Completed, 100.0),
            module_progress("mod-2", ModuleStatus::Completed, 100.0),
        ];
        let outcome = recompute(&c, "learner-1", &modules, &[80.0], 10.0, None, Utc::now());
        assert_eq!(outcome.enrollment.status, EnrollmentStatus::Completed);
        assert!(!outcome.enrollment.certified);
        assert!(!outcome.newly_certified);
        assert_eq!(outcome.enrollment.final_score, Some(80.0));
    }

    #[test]
    fn certification_is_stamped_exactly_once() {
        let c = course(true, 0.0);
        let modules = vec![
            module_progress("mod-1", ModuleStatus::Completed, 100.0),
            module_progress("mod-2", ModuleStatus::Completed, 100.0),
        ];
        let now = Utc::now();
        let first = recompute(&c, "learner-1", &modules, &[95.0], 10.0, None, now);
        assert!(first.newly_certified);
        let stamped_at = first.enrollment.certified_at;

        let later = now + chrono::Duration::hours(1);
        let second = recompute(
            &c,
            "learner-1",
            &modules,
            &[95.0],
            12.0,
            Some(&first.enrollment),
            later,
        );
        assert!(!second.newly_certified);
        assert_eq!(second.enrollment.certified_at, stamped_at);
        assert_eq!(second.enrollment.final_score, Some(95.0));
    }

    #[test]
    fn status_never_moves_backward() {
        let c = course(false, 0.0);
        let modules = vec![
            module_progress("mod-1", ModuleStatus::Completed, 100.0),
            module_progress("mod-2", ModuleStatus::Completed, 100.0),
        ];
        let done = recompute(&c, "learner-1", &modules, &[], 5.0, None, Utc::now());
        // Recompute with missing module records must not regress.
        let sparse = vec![module_progress("mod-1", ModuleStatus::Completed, 100.0)];
        let after = recompute(
            &c,
            "learner-1",
            &sparse,
            &[],
            5.0,
            Some(&done.enrollment),
            Utc::now(),
        );
        assert_eq!(after.enrollment.status, EnrollmentStatus::Completed);
        assert_eq!(after.enrollment.percent_complete, 100.0);
    }
}
