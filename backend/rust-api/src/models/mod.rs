pub mod course;
pub mod event;
pub mod progress;
pub mod quiz;

pub use course::{Course, CourseModule, Part, PartContent};
pub use progress::{Enrollment, EnrollmentStatus, ModuleProgress, ModuleStatus, PartProgress};
pub use quiz::{Answer, AttemptState, Choice, Question, QuestionKind, Quiz, QuizAttempt};
