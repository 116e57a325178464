//! End-to-end progression flows through the decision core: a learner
//! working a course from the first video through certification, with
//! the gate, merge and rollup layers driven the same way the services
//! drive them.

use std::collections::{HashMap, HashSet};

use chrono::{Duration, TimeZone, Utc};

use learntrack_api::engine::{attempt, enrollment, module_gate, part_progress};
use learntrack_api::error::EngineError;
use learntrack_api::models::course::{Course, CourseModule, Part, PartContent};
use learntrack_api::models::progress::{EnrollmentStatus, ModuleStatus, PartProgress};
use learntrack_api::models::quiz::{
    Answer, AttemptState, Choice, Question, QuestionKind, Quiz, QuizAttempt,
};

const LEARNER: &str = "learner-1";
const COMPLETION_THRESHOLD: f64 = 90.0;

fn now() -> chrono::DateTime<chrono::Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap()
}

fn choice(id: &str, correct: bool) -> Choice {
    Choice {
        id: id.to_string(),
        text: format!("choice {}", id),
        correct,
    }
}

fn quiz_fixture() -> Quiz {
    Quiz {
        id: "quiz-1".to_string(),
        pass_threshold_percent: 60.0,
        max_attempts: 2,
        time_limit_seconds: Some(600),
        shuffle_questions: false,
        questions: vec![
            Question {
                id: "q1".to_string(),
                prompt: "Pick one".to_string(),
                point_value: 2,
                kind: QuestionKind::SingleChoice {
                    choices: vec![choice("a", true), choice("b", false)],
                },
            },
            Question {
                id: "q2".to_string(),
                prompt: "Pick all that apply".to_string(),
                point_value: 3,
                kind: QuestionKind::MultiChoice {
                    choices: vec![choice("a", true), choice("b", true), choice("c", false)],
                },
            },
            Question {
                id: "q3".to_string(),
                prompt: "True or false".to_string(),
                point_value: 1,
                kind: QuestionKind::TrueFalse { correct: true },
            },
        ],
    }
}

/// Two modules: module 1 is video + document + quiz, module 2 is a
/// single document.
fn course_fixture() -> Course {
    Course {
        id: "course-1".to_string(),
        title: "Intro course".to_string(),
        certification_threshold: 70.0,
        modules: vec![
            CourseModule {
                id: "mod-1".to_string(),
                title: "Basics".to_string(),
                order: 1,
                parts: vec![
                    Part {
                        id: "part-video".to_string(),
                        title: "Welcome video".to_string(),
                        order: 1,
                        content: PartContent::Video {
                            duration_seconds: 300.0,
                            completion_threshold: None,
                        },
                        mandatory: true,
                    },
                    Part {
                        id: "part-doc".to_string(),
                        title: "Reading".to_string(),
                        order: 2,
                        content: PartContent::Document,
                        mandatory: true,
                    },
                    Part {
                        id: "part-quiz".to_string(),
                        title: "Checkpoint quiz".to_string(),
                        order: 3,
                        content: PartContent::Quiz {
                            quiz: quiz_fixture(),
                        },
                        mandatory: true,
                    },
                ],
            },
            CourseModule {
                id: "mod-2".to_string(),
                title: "Wrap-up".to_string(),
                order: 2,
                parts: vec![Part {
                    id: "part-final-doc".to_string(),
                    title: "Summary".to_string(),
                    order: 1,
                    content: PartContent::Document,
                    mandatory: true,
                }],
            },
        ],
    }
}

/// Replays the gate evaluation the way the rollup service does: build
/// the completion and touched maps from part records and attempts.
struct ModuleState {
    completed: HashMap<String, bool>,
    touched: HashSet<String>,
    minutes: f64,
}

fn module_state(
    module: &CourseModule,
    parts: &HashMap<String, PartProgress>,
    attempts: &[QuizAttempt],
) -> ModuleState {
    let mut completed = HashMap::new();
    let mut touched = HashSet::new();
    let mut minutes = 0.0;

    for part in &module.parts {
        if let Some(record) = parts.get(&part.id) {
            if record.furthest_position > 0.0 || record.percent_watched > 0.0 {
                touched.insert(part.id.clone());
            }
            completed.insert(part.id.clone(), record.completed);
            minutes += record.minutes_spent;
        }
        if let PartContent::Quiz { quiz } = &part.content {
            let quiz_attempts: Vec<&QuizAttempt> =
                attempts.iter().filter(|a| a.quiz_id == quiz.id).collect();
            if !quiz_attempts.is_empty() {
                touched.insert(part.id.clone());
            }
            let passed = quiz_attempts.iter().any(|a| a.passed);
            completed.insert(part.id.clone(), passed);
            minutes += quiz_attempts.iter().map(|a| a.minutes_spent()).sum::<f64>();
        }
    }

    ModuleState {
        completed,
        touched,
        minutes,
    }
}

#[test]
fn quiz_part_locked_until_preceding_parts_complete() {
    let course = course_fixture();
    let module = &course.modules[0];
    let mut parts: HashMap<String, PartProgress> = HashMap::new();
    let t = now();

    // Nothing done yet: only the first part accepts events.
    let state = module_state(module, &parts, &[]);
    assert!(module_gate::is_part_available(
        module,
        "part-video",
        &state.completed
    ));
    assert!(!module_gate::is_part_available(
        module,
        "part-doc",
        &state.completed
    ));
    assert!(!module_gate::is_part_available(
        module,
        "part-quiz",
        &state.completed
    ));

    // Watching 80% of the video is progress but not completion.
    let video = part_progress::merge_report(
        None,
        LEARNER,
        "part-video",
        240.0,
        300.0,
        COMPLETION_THRESHOLD,
        t,
    );
    assert!(!video.completed);
    parts.insert("part-video".to_string(), video);

    let state = module_state(module, &parts, &[]);
    assert!(!module_gate::is_part_available(
        module,
        "part-doc",
        &state.completed
    ));

    // Crossing the threshold unlocks the next part but not the quiz.
    let video = part_progress::merge_report(
        parts.get("part-video"),
        LEARNER,
        "part-video",
        280.0,
        300.0,
        COMPLETION_THRESHOLD,
        t + Duration::minutes(4),
    );
    assert!(video.completed);
    parts.insert("part-video".to_string(), video);

    let state = module_state(module, &parts, &[]);
    assert!(module_gate::is_part_available(
        module,
        "part-doc",
        &state.completed
    ));
    assert!(!module_gate::is_part_available(
        module,
        "part-quiz",
        &state.completed
    ));

    // Acknowledging the document finally opens the quiz.
    let doc = part_progress::acknowledge_document(
        None,
        LEARNER,
        "part-doc",
        t + Duration::minutes(5),
    );
    parts.insert("part-doc".to_string(), doc);

    let state = module_state(module, &parts, &[]);
    assert!(module_gate::is_part_available(
        module,
        "part-quiz",
        &state.completed
    ));
}

#[test]
fn duplicate_and_stale_reports_converge() {
    let t = now();
    let first = part_progress::merge_report(
        None,
        LEARNER,
        "part-video",
        280.0,
        300.0,
        COMPLETION_THRESHOLD,
        t,
    );
    // A stale report from a second tab arrives afterwards.
    let merged = part_progress::merge_report(
        Some(&first),
        LEARNER,
        "part-video",
        120.0,
        300.0,
        COMPLETION_THRESHOLD,
        t + Duration::minutes(1),
    );

    assert_eq!(merged.furthest_position, first.furthest_position);
    assert_eq!(merged.percent_watched, first.percent_watched);
    assert!(merged.completed);
    // The stale report advanced nothing, so no minutes accrued.
    assert_eq!(merged.minutes_spent, first.minutes_spent);

    // Replaying the same report is a no-op apart from the timestamp.
    let replayed = part_progress::merge_report(
        Some(&merged),
        LEARNER,
        "part-video",
        280.0,
        300.0,
        COMPLETION_THRESHOLD,
        t + Duration::minutes(2),
    );
    assert_eq!(replayed.furthest_position, merged.furthest_position);
    assert_eq!(replayed.minutes_spent, merged.minutes_spent);
    assert!(replayed.completed);
}

#[test]
fn module_rollup_never_regresses() {
    let course = course_fixture();
    let module = &course.modules[0];
    let t = now();

    let mut parts: HashMap<String, PartProgress> = HashMap::new();
    parts.insert(
        "part-video".to_string(),
        part_progress::merge_report(
            None,
            LEARNER,
            "part-video",
            290.0,
            300.0,
            COMPLETION_THRESHOLD,
            t,
        ),
    );

    let state = module_state(module, &parts, &[]);
    let first = module_gate::evaluate(
        module,
        &course.id,
        LEARNER,
        None,
        &state.completed,
        &state.touched,
        state.minutes,
        t,
    );
    assert_eq!(first.progress.status, ModuleStatus::InProgress);
    assert!(first.progress.started_at.is_some());

    // A later evaluation from an empty completion map (say, a partial
    // read during backfill) must not pull the stored status backwards.
    let empty = ModuleState {
        completed: HashMap::new(),
        touched: HashSet::new(),
        minutes: 0.0,
    };
    let second = module_gate::evaluate(
        module,
        &course.id,
        LEARNER,
        Some(&first.progress),
        &empty.completed,
        &empty.touched,
        empty.minutes,
        t + Duration::minutes(1),
    );
    assert_eq!(second.progress.status, ModuleStatus::InProgress);
    assert!(!second.newly_completed);
}

#[test]
fn full_attempt_lifecycle_to_certification() {
    let course = course_fixture();
    let module = &course.modules[0];
    let quiz = quiz_fixture();
    let t = now();

    // Complete the two content parts.
    let mut parts: HashMap<String, PartProgress> = HashMap::new();
    parts.insert(
        "part-video".to_string(),
        part_progress::merge_report(
            None,
            LEARNER,
            "part-video",
            300.0,
            300.0,
            COMPLETION_THRESHOLD,
            t,
        ),
    );
    parts.insert(
        "part-doc".to_string(),
        part_progress::acknowledge_document(None, LEARNER, "part-doc", t),
    );

    // First attempt: one wrong answer, below the pass threshold.
    let mut first = attempt::new_attempt(&quiz, LEARNER, &[], t).unwrap();
    assert_eq!(first.attempt_number, 1);
    attempt::record_response(
        &mut first,
        "q1",
        Answer::Choice {
            choice_id: "b".to_string(),
        },
        t,
    )
    .unwrap();
    attempt::record_response(&mut first, "q3", Answer::Bool { value: true }, t).unwrap();

    // Starting a second attempt while the first is open is rejected.
    let err = attempt::new_attempt(&quiz, LEARNER, &[first.clone()], t).unwrap_err();
    assert!(matches!(err, EngineError::AttemptInProgress));

    assert!(attempt::finalize(
        &quiz,
        &mut first,
        t + Duration::minutes(5),
        attempt::FinalizeCause::Submitted,
    ));
    assert_eq!(first.state, AttemptState::Submitted);
    assert!(!first.passed);

    // A repeated submit is a no-op.
    assert!(!attempt::finalize(
        &quiz,
        &mut first,
        t + Duration::minutes(6),
        attempt::FinalizeCause::Submitted,
    ));

    // Second attempt: all correct.
    let mut second =
        attempt::new_attempt(&quiz, LEARNER, &[first.clone()], t + Duration::minutes(10)).unwrap();
    assert_eq!(second.attempt_number, 2);
    let t2 = t + Duration::minutes(10);
    attempt::record_response(
        &mut second,
        "q1",
        Answer::Choice {
            choice_id: "a".to_string(),
        },
        t2,
    )
    .unwrap();
    attempt::record_response(
        &mut second,
        "q2",
        Answer::Choices {
            choice_ids: vec!["a".to_string(), "b".to_string()],
        },
        t2,
    )
    .unwrap();
    attempt::record_response(&mut second, "q3", Answer::Bool { value: true }, t2).unwrap();
    assert!(attempt::finalize(
        &quiz,
        &mut second,
        t2 + Duration::minutes(3),
        attempt::FinalizeCause::Submitted,
    ));
    assert!(second.passed);
    assert_eq!(second.percent_score, 100.0);

    // The cap is now exhausted.
    let err = attempt::new_attempt(
        &quiz,
        LEARNER,
        &[first.clone(), second.clone()],
        t + Duration::minutes(20),
    )
    .unwrap_err();
    assert!(matches!(err, EngineError::AttemptsExhausted));

    // Module 1 rolls up to completed exactly once.
    let attempts = vec![first, second];
    let state = module_state(module, &parts, &attempts);
    let outcome = module_gate::evaluate(
        module,
        &course.id,
        LEARNER,
        None,
        &state.completed,
        &state.touched,
        state.minutes,
        t + Duration::minutes(20),
    );
    assert_eq!(outcome.progress.status, ModuleStatus::Completed);
    assert_eq!(outcome.progress.percent_complete, 100.0);
    assert!(outcome.newly_completed);

    let again = module_gate::evaluate(
        module,
        &course.id,
        LEARNER,
        Some(&outcome.progress),
        &state.completed,
        &state.touched,
        state.minutes,
        t + Duration::minutes(21),
    );
    assert!(!again.newly_completed);

    // Complete module 2 and recompute the enrollment.
    let module2 = &course.modules[1];
    let mut parts2: HashMap<String, PartProgress> = HashMap::new();
    parts2.insert(
        "part-final-doc".to_string(),
        part_progress::acknowledge_document(
            None,
            LEARNER,
            "part-final-doc",
            t + Duration::minutes(25),
        ),
    );
    let state2 = module_state(module2, &parts2, &[]);
    let outcome2 = module_gate::evaluate(
        module2,
        &course.id,
        LEARNER,
        None,
        &state2.completed,
        &state2.touched,
        state2.minutes,
        t + Duration::minutes(25),
    );
    assert_eq!(outcome2.progress.status, ModuleStatus::Completed);

    let modules = vec![outcome.progress, outcome2.progress];
    let rollup = enrollment::recompute(
        &course,
        LEARNER,
        &modules,
        &[100.0],
        42.0,
        None,
        t + Duration::minutes(26),
    );
    assert_eq!(rollup.enrollment.status, EnrollmentStatus::Completed);
    assert_eq!(rollup.enrollment.percent_complete, 100.0);
    assert_eq!(rollup.enrollment.final_score, Some(100.0));
    assert!(rollup.enrollment.certified);
    assert!(rollup.newly_certified);

    // Certification is stamped once; a later recompute keeps the stamp
    // but never re-signals.
    let again = enrollment::recompute(
        &course,
        LEARNER,
        &modules,
        &[100.0],
        43.0,
        Some(&rollup.enrollment),
        t + Duration::minutes(30),
    );
    assert!(again.enrollment.certified);
    assert_eq!(
        again.enrollment.certified_at,
        rollup.enrollment.certified_at
    );
    assert!(!again.newly_certified);
}

#[test]
fn timed_attempt_closes_at_the_deadline() {
    let quiz = quiz_fixture();
    let t = now();

    let mut open = attempt::new_attempt(&quiz, LEARNER, &[], t).unwrap();
    assert_eq!(open.deadline, Some(t + Duration::seconds(600)));

    attempt::record_response(
        &mut open,
        "q1",
        Answer::Choice {
            choice_id: "a".to_string(),
        },
        t + Duration::minutes(5),
    )
    .unwrap();

    // Past the deadline the attempt no longer accepts responses.
    let err = attempt::record_response(
        &mut open,
        "q3",
        Answer::Bool { value: true },
        t + Duration::minutes(11),
    )
    .unwrap_err();
    assert!(matches!(err, EngineError::AttemptClosed));

    assert!(attempt::is_expired(
        &open,
        t + Duration::minutes(11),
        Duration::days(14)
    ));

    // The sweeper finalizes with whatever was recorded in time.
    assert!(attempt::finalize(
        &quiz,
        &mut open,
        t + Duration::minutes(11),
        attempt::FinalizeCause::DeadlineExpired,
    ));
    assert_eq!(open.state, AttemptState::TimedOut);
    assert_eq!(open.raw_score, 2);
}

#[test]
fn course_without_passed_quiz_completes_but_does_not_certify() {
    let course = course_fixture();
    let t = now();

    // Both modules completed, but the only passing score is below the
    // certification threshold of 70.
    let modules: Vec<_> = course
        .modules
        .iter()
        .map(|m| {
            let state = ModuleState {
                completed: m.parts.iter().map(|p| (p.id.clone(), true)).collect(),
                touched: m.parts.iter().map(|p| p.id.clone()).collect(),
                minutes: 10.0,
            };
            module_gate::evaluate(
                m,
                &course.id,
                LEARNER,
                None,
                &state.completed,
                &state.touched,
                state.minutes,
                t,
            )
            .progress
        })
        .collect();

    let rollup = enrollment::recompute(&course, LEARNER, &modules, &[65.0], 20.0, None, t);
    assert_eq!(rollup.enrollment.status, EnrollmentStatus::Completed);
    assert_eq!(rollup.enrollment.final_score, Some(65.0));
    assert!(!rollup.enrollment.certified);
    assert!(!rollup.newly_certified);
}

#[test]
fn responses_from_two_tabs_survive_when_each_writer_starts_fresh() {
    let quiz = quiz_fixture();
    let t = now();

    // The store holds the authoritative record; every writer reloads it
    // inside its critical section before mutating, the way the attempt
    // service does under its (learner, quiz) lock.
    let mut stored = attempt::new_attempt(&quiz, LEARNER, &[], t).unwrap();

    // Tab A answers q1 against the current record.
    let mut tab_a = stored.clone();
    attempt::record_response(
        &mut tab_a,
        "q1",
        Answer::Choice {
            choice_id: "a".to_string(),
        },
        t,
    )
    .unwrap();
    stored = tab_a;

    // Tab B reloads before writing, so its update lands on top of
    // tab A's answer instead of a stale empty response map.
    let mut tab_b = stored.clone();
    attempt::record_response(&mut tab_b, "q3", Answer::Bool { value: true }, t).unwrap();
    stored = tab_b;

    assert_eq!(stored.responses.len(), 2);
    assert!(stored.responses.contains_key("q1"));
    assert!(stored.responses.contains_key("q3"));
}

#[test]
fn submit_cannot_overwrite_a_timed_out_verdict() {
    let quiz = quiz_fixture();
    let t = now();

    let mut stored = attempt::new_attempt(&quiz, LEARNER, &[], t).unwrap();
    attempt::record_response(
        &mut stored,
        "q1",
        Answer::Choice {
            choice_id: "a".to_string(),
        },
        t,
    )
    .unwrap();

    // The sweeper finalizes the attempt past its deadline.
    assert!(attempt::finalize(
        &quiz,
        &mut stored,
        t + Duration::minutes(11),
        attempt::FinalizeCause::DeadlineExpired,
    ));
    assert_eq!(stored.state, AttemptState::TimedOut);
    let verdict = (stored.raw_score, stored.percent_score, stored.passed);

    // A submit racing the sweeper reloads the closed record and must
    // leave it untouched: closed attempts are immutable.
    assert!(!attempt::finalize(
        &quiz,
        &mut stored,
        t + Duration::minutes(12),
        attempt::FinalizeCause::Submitted,
    ));
    assert_eq!(stored.state, AttemptState::TimedOut);
    assert_eq!(
        (stored.raw_score, stored.percent_score, stored.passed),
        verdict
    );
    assert_eq!(stored.finished_at, Some(t + Duration::minutes(11)));
}
