use serde::{Deserialize, Serialize};

use super::quiz::Quiz;

/// Authored course content. Read-only from the engine's perspective;
/// the authoring tools own these documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    /// Minimum final score (mean of passing quiz scores) required to
    /// certify. 0 means completion alone certifies.
    pub certification_threshold: f64,
    pub modules: Vec<CourseModule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseModule {
    pub id: String,
    pub title: String,
    /// 1-based, unique within the course.
    pub order: u32,
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part {
    pub id: String,
    pub title: String,
    /// 1-based, unique within the module.
    pub order: u32,
    #[serde(flatten)]
    pub content: PartContent,
    /// Optional parts never gate their successors and are excluded from
    /// completion percentages.
    #[serde(default = "default_mandatory")]
    pub mandatory: bool,
}

fn default_mandatory() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PartContent {
    Video {
        /// Total length in seconds.
        duration_seconds: f64,
        /// Per-video override of the completion threshold percentage.
        #[serde(default)]
        completion_threshold: Option<f64>,
    },
    Document,
    Quiz {
        quiz: Quiz,
    },
}

impl Part {
    pub fn is_quiz(&self) -> bool {
        matches!(self.content, PartContent::Quiz { .. })
    }

    pub fn quiz(&self) -> Option<&Quiz> {
        match &self.content {
            PartContent::Quiz { quiz } => Some(quiz),
            _ => None,
        }
    }
}

impl Course {
    /// Locates the module that owns the given part.
    pub fn module_for_part(&self, part_id: &str) -> Option<&CourseModule> {
        self.modules
            .iter()
            .find(|m| m.parts.iter().any(|p| p.id == part_id))
    }

    pub fn module(&self, module_id: &str) -> Option<&CourseModule> {
        self.modules.iter().find(|m| m.id == module_id)
    }

    pub fn part(&self, part_id: &str) -> Option<&Part> {
        self.modules
            .iter()
            .flat_map(|m| m.parts.iter())
            .find(|p| p.id == part_id)
    }

    /// Locates the module owning the quiz-bearing part for the given quiz.
    pub fn module_for_quiz(&self, quiz_id: &str) -> Option<(&CourseModule, &Part)> {
        for module in &self.modules {
            for part in &module.parts {
                if part.quiz().is_some_and(|q| q.id == quiz_id) {
                    return Some((module, part));
                }
            }
        }
        None
    }

    /// All quiz-bearing mandatory parts, used for the final-score mean.
    pub fn quiz_parts(&self) -> impl Iterator<Item = &Part> {
        self.modules
            .iter()
            .flat_map(|m| m.parts.iter())
            .filter(|p| p.mandatory && p.is_quiz())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::quiz::Quiz;

    fn quiz_def(id: &str) -> Quiz {
        Quiz {
            id: id.to_string(),
            pass_threshold_percent: 70.0,
            max_attempts: 3,
            time_limit_seconds: None,
            shuffle_questions: false,
            questions: Vec::new(),
        }
    }

    fn part(id: &str, order: u32, content: PartContent, mandatory: bool) -> Part {
        Part {
            id: id.to_string(),
            title: id.to_string(),
            order,
            content,
            mandatory,
        }
    }

    #[test]
    fn quiz_parts_yield_only_mandatory_quiz_definitions() {
        let course = Course {
            id: "course-1".into(),
            title: "course".into(),
            certification_threshold: 70.0,
            modules: vec![CourseModule {
                id: "mod-1".into(),
                title: "module".into(),
                order: 1,
                parts: vec![
                    part(
                        "video",
                        1,
                        PartContent::Video {
                            duration_seconds: 60.0,
                            completion_threshold: None,
                        },
                        true,
                    ),
                    part(
                        "graded",
                        2,
                        PartContent::Quiz {
                            quiz: quiz_def("quiz-graded"),
                        },
                        true,
                    ),
                    part(
                        "practice",
                        3,
                        PartContent::Quiz {
                            quiz: quiz_def("quiz-practice"),
                        },
                        false,
                    ),
                ],
            }],
        };

        // Every yielded part resolves a quiz definition, so callers can
        // use `filter_map(|p| p.quiz())` without losing entries.
        let quizzes: Vec<&str> = course
            .quiz_parts()
            .filter_map(|p| p.quiz())
            .map(|q| q.id.as_str())
            .collect();
        assert_eq!(quizzes, vec!["quiz-graded"]);
        assert_eq!(course.quiz_parts().count(), quizzes.len());
    }
}
