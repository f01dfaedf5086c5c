pub mod domain;
pub mod goals;
pub mod json_contract;
pub mod pipeline;
pub mod ports;
pub mod prompts;
pub mod quiz;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use domain::{
    level_for, Article, ArticleStatus, Goal, GoalLog, GoalLogStatus, Progress, Quiz, Segment, SegmentAnnotation,
    TermExplanation, TermKind,
};
pub use goals::{GoalAdvance, GoalProgressTracker, RolloverReport};
pub use json_contract::LlmOracleExt;
pub use pipeline::{AnalysisResult, AnalysisService, AnnotatedSegment, SegmentDetail};
pub use ports::{
    ArticleStore, AnnotationStore, Clock, Database, GoalStore, HttpResponse, HttpTransport, LlmOracle, PortError,
    PortResult, ProgressStore, QuizStore,
};
pub use quiz::{GeneratedQuiz, QuizEngine, QuizGrade};
