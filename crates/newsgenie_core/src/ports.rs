//! crates/newsgenie_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or APIs.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::time::Duration;

use crate::domain::{
    Article, ArticleStatus, Goal, GoalLog, GradedArticle, NewArticle, NewGoal, NewGoalLog,
    NewQuiz, Progress, Quiz, SegmentAnnotation, TermExplanation,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port and core operations.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Upstream timed out: {0}")]
    UpstreamTimeout(String),
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("Language model response violated the JSON contract: {0}")]
    JsonContract(String),
    /// A unique constraint rejected an insert.
    #[error("Duplicate item: {0}")]
    Duplicate(String),
    /// Optimistic retries were exhausted.
    #[error("Concurrent update conflict: {0}")]
    ConcurrencyConflict(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

impl PortError {
    /// Transport-level failures a caller may reasonably retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::UpstreamTimeout(_) | Self::UpstreamUnavailable(_))
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Persistence Ports
//=========================================================================================

#[async_trait]
pub trait ArticleStore: Send + Sync {
    async fn create_article(&self, article: NewArticle) -> PortResult<Article>;

    async fn get_article(&self, article_id: i64) -> PortResult<Article>;

    /// Like `get_article`, but another user's article is reported as missing.
    async fn get_owned_article(&self, user_id: i64, article_id: i64) -> PortResult<Article> {
        let article = self.get_article(article_id).await?;
        if article.user_id != user_id {
            return Err(PortError::NotFound(format!("Article {} not found", article_id)));
        }
        Ok(article)
    }

    /// Writes a grading outcome atomically and reports the status it replaced.
    ///
    /// CORRECT is sticky: when the stored status is already CORRECT the row is
    /// left untouched, whatever `status` says.
    async fn record_grade(&self, article_id: i64, status: ArticleStatus) -> PortResult<GradedArticle>;

    async fn count_articles_in_log(&self, goal_log_id: i64, status: ArticleStatus) -> PortResult<i64>;
}

#[async_trait]
pub trait AnnotationStore: Send + Sync {
    /// Fails with `Duplicate` if the (article, segment) pair already exists.
    async fn create_annotation(
        &self,
        article_id: i64,
        segment_index: i32,
        terms: Vec<TermExplanation>,
    ) -> PortResult<SegmentAnnotation>;

    async fn get_annotation(&self, article_id: i64, segment_index: i32) -> PortResult<SegmentAnnotation>;

    /// Sets `detailed_explain` on the given term positions, but only where the
    /// stored term still lacks one. Returns the annotation as stored afterwards.
    async fn fill_term_details(
        &self,
        annotation_id: i64,
        details: Vec<(usize, String)>,
    ) -> PortResult<SegmentAnnotation>;
}

#[async_trait]
pub trait GoalStore: Send + Sync {
    /// Registers the user if unknown and stores a new goal, which becomes the active one.
    async fn create_goal(&self, goal: NewGoal) -> PortResult<Goal>;

    /// The most recently configured goal of a user, if any.
    async fn find_active_goal(&self, user_id: i64) -> PortResult<Option<Goal>>;

    async fn find_goal_log(&self, user_id: i64, date: NaiveDate) -> PortResult<Option<GoalLog>>;

    async fn get_goal_log(&self, goal_log_id: i64) -> PortResult<GoalLog>;

    /// Fails with `Duplicate` if the user already has a log for that date.
    async fn insert_goal_log(&self, log: NewGoalLog) -> PortResult<GoalLog>;

    /// Compare-and-set on `expected_version`; the stored version becomes
    /// `expected_version + 1`. Returns false when another writer won.
    async fn update_goal_log(&self, log: &GoalLog, expected_version: i64) -> PortResult<bool>;

    async fn list_users_with_goals(&self) -> PortResult<Vec<i64>>;
}

#[async_trait]
pub trait QuizStore: Send + Sync {
    async fn find_quiz_by_article(&self, article_id: i64) -> PortResult<Option<Quiz>>;

    /// Fails with `Duplicate` if the article already has a quiz.
    async fn insert_quiz(&self, quiz: NewQuiz) -> PortResult<Quiz>;
}

/// Outcome of crediting one article's correct answer to a user's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressCredit {
    Applied,
    /// The progress row moved past `expected_version`; nothing was written.
    Conflict,
    /// The article was credited before; nothing was written.
    AlreadyCredited,
}

#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn get_or_create_progress(&self, user_id: i64) -> PortResult<Progress>;

    /// Writes `progress` and marks the article as credited in one atomic step.
    ///
    /// The progress write is a compare-and-set on `expected_version` (the stored
    /// version becomes `expected_version + 1`). Nothing is written unless both
    /// the version matches and the article is still uncredited.
    async fn credit_progress(
        &self,
        progress: &Progress,
        expected_version: i64,
        article_id: i64,
    ) -> PortResult<ProgressCredit>;

    /// Clears `completed_today` for every user, returning how many rows changed.
    async fn reset_completed_today(&self) -> PortResult<u64>;
}

/// Every persistence port at once; what the composition root hands to components.
pub trait Database: ArticleStore + AnnotationStore + GoalStore + QuizStore + ProgressStore {}

impl<T> Database for T where T: ArticleStore + AnnotationStore + GoalStore + QuizStore + ProgressStore {}

//=========================================================================================
// External Service Ports
//=========================================================================================

#[async_trait]
pub trait LlmOracle: Send + Sync {
    /// Returns the model's free-text completion for a system prompt and user input.
    async fn complete(&self, system_prompt: &str, user_text: &str) -> PortResult<String>;
}

/// A raw HTTP response, before any status interpretation.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        timeout: Duration,
    ) -> PortResult<HttpResponse>;
}

/// Source of the service's calendar date.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}
