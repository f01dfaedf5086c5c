//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use newsgenie_core::goals::GoalProgressTracker;
use newsgenie_core::pipeline::AnalysisService;
use newsgenie_core::ports::{Clock, Database, HttpTransport, LlmOracle};
use newsgenie_core::quiz::QuizEngine;
use std::sync::Arc;
use tokio::sync::Semaphore;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub analysis: Arc<AnalysisService>,
    pub quiz: Arc<QuizEngine>,
    pub goals: GoalProgressTracker,
}

/// Everything the core services are built from.
pub struct StateParts {
    pub db: Arc<dyn Database>,
    pub oracle: Arc<dyn LlmOracle>,
    pub transport: Arc<dyn HttpTransport>,
    pub clock: Arc<dyn Clock>,
    pub user_agent: String,
    pub llm_max_concurrency: usize,
}

impl AppState {
    /// Wires the core services around one shared LLM concurrency limiter.
    pub fn build(parts: StateParts) -> Self {
        let limiter = Arc::new(Semaphore::new(parts.llm_max_concurrency));
        let goals = GoalProgressTracker::new(parts.db.clone(), parts.clock);
        let analysis = AnalysisService::new(
            parts.transport,
            parts.user_agent,
            parts.oracle.clone(),
            parts.db.clone(),
            limiter,
            goals.clone(),
        );
        let quiz = QuizEngine::new(parts.oracle, parts.db, goals.clone());

        Self {
            analysis: Arc::new(analysis),
            quiz: Arc::new(quiz),
            goals,
        }
    }
}
