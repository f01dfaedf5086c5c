//! crates/newsgenie_core/src/goals.rs
//!
//! The daily goal and level state machine. Every mutation of a goal log or a
//! progress row is a compare-and-set on its version, retried a bounded number
//! of times, so concurrent correct answers never lose an increment.

use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::domain::{Article, ArticleStatus, Goal, GoalLog, NewGoal, NewGoalLog, Progress};
use crate::ports::{Clock, Database, PortError, PortResult, ProgressCredit};

/// Attempts per compare-and-set loop before giving up with a conflict.
pub const MAX_CAS_ATTEMPTS: usize = 8;

/// Goal state after a correct answer was handed off.
#[derive(Debug, Clone)]
pub struct GoalAdvance {
    pub goal_log: Option<GoalLog>,
    pub newly_completed: bool,
    pub progress: Progress,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RolloverReport {
    pub logs_created: usize,
    pub logs_skipped: usize,
    pub failures: usize,
    pub progress_reset: u64,
}

#[derive(Clone)]
pub struct GoalProgressTracker {
    db: Arc<dyn Database>,
    clock: Arc<dyn Clock>,
}

impl GoalProgressTracker {
    pub fn new(db: Arc<dyn Database>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Stores a new daily target for the user. It applies from the next log
    /// opened; a log already open for today keeps its target.
    #[instrument(skip(self))]
    pub async fn set_goal(&self, user_id: i64, domain: &str, numbers: i32) -> PortResult<Goal> {
        let domain = domain.trim();
        if domain.is_empty() {
            return Err(PortError::Validation("goal domain must not be empty".to_string()));
        }
        if numbers < 1 {
            return Err(PortError::Validation(format!(
                "goal numbers must be at least 1, got {}",
                numbers
            )));
        }

        let goal = self
            .db
            .create_goal(NewGoal {
                user_id,
                domain: domain.to_string(),
                numbers,
            })
            .await?;
        info!(user_id, goal_id = goal.id, numbers, "goal configured");
        Ok(goal)
    }

    /// Today's log for the user, created from the active goal on first use.
    pub async fn get_or_create_today_log(&self, user_id: i64) -> PortResult<GoalLog> {
        let today = self.clock.today();
        if let Some(log) = self.db.find_goal_log(user_id, today).await? {
            return Ok(log);
        }

        let goal = self
            .db
            .find_active_goal(user_id)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("User {} has no reading goal configured", user_id)))?;

        let new_log = NewGoalLog {
            user_id,
            date: today,
            target_count: goal.numbers,
        };
        match self.db.insert_goal_log(new_log).await {
            Ok(log) => {
                info!(user_id, date = %today, target = log.target_count, "goal log created");
                Ok(log)
            }
            Err(PortError::Duplicate(_)) => {
                debug!(user_id, date = %today, "goal log created concurrently, re-reading");
                self.db.find_goal_log(user_id, today).await?.ok_or_else(|| {
                    PortError::Unexpected(format!("goal log for user {} on {} vanished", user_id, today))
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Hands off one correct answer: recounts the article's log, then credits
    /// progress. Safe to repeat after a failure; `None` means the article had
    /// already been credited.
    #[instrument(skip(self, article), fields(article_id = article.id, user_id = article.user_id))]
    pub async fn record_correct_answer(&self, article: &Article) -> PortResult<Option<GoalAdvance>> {
        let (goal_log, newly_completed) = match article.goal_log_id {
            Some(log_id) => {
                let (log, newly) = self.advance_log(log_id).await?;
                (Some(log), newly)
            }
            None => (None, false),
        };
        let goal_completed = goal_log.as_ref().is_some_and(GoalLog::is_completed);
        let Some(progress) = self.credit_progress(article, goal_completed).await? else {
            debug!(article_id = article.id, "article already credited");
            return Ok(None);
        };

        info!(
            operation = "goal_advance",
            article_id = article.id,
            value = progress.value,
            level = progress.level,
            goal_completed,
            newly_completed,
            outcome = "ok",
            "progress advanced"
        );
        Ok(Some(GoalAdvance {
            goal_log,
            newly_completed,
            progress,
        }))
    }

    async fn advance_log(&self, log_id: i64) -> PortResult<(GoalLog, bool)> {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let mut log = self.db.get_goal_log(log_id).await?;
            let was_completed = log.is_completed();
            let correct = self.db.count_articles_in_log(log_id, ArticleStatus::Correct).await?;
            let correct = i32::try_from(correct).unwrap_or(i32::MAX);

            if !log.apply_correct_count(correct) {
                return Ok((log, false));
            }
            let expected = log.version;
            if self.db.update_goal_log(&log, expected).await? {
                log.version = expected + 1;
                return Ok((log.clone(), !was_completed && log.is_completed()));
            }
            debug!(log_id, attempt, "goal log changed underneath, retrying");
        }
        warn!(log_id, "goal log update kept conflicting");
        Err(PortError::ConcurrencyConflict(format!("goal log {} is being updated concurrently", log_id)))
    }

    async fn credit_progress(&self, article: &Article, goal_completed: bool) -> PortResult<Option<Progress>> {
        let user_id = article.user_id;
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let mut progress = self.db.get_or_create_progress(user_id).await?;
            let expected = progress.version;
            progress.record_correct(goal_completed);
            match self.db.credit_progress(&progress, expected, article.id).await? {
                ProgressCredit::Applied => {
                    progress.version = expected + 1;
                    return Ok(Some(progress));
                }
                ProgressCredit::AlreadyCredited => return Ok(None),
                ProgressCredit::Conflict => debug!(user_id, attempt, "progress changed underneath, retrying"),
            }
        }
        warn!(user_id, "progress update kept conflicting");
        Err(PortError::ConcurrencyConflict(format!("progress of user {} is being updated concurrently", user_id)))
    }

    /// Start-of-day housekeeping: open today's log for every user with a goal
    /// and clear the completed-today flags.
    pub async fn roll_over_day(&self) -> PortResult<RolloverReport> {
        let today = self.clock.today();
        let mut report = RolloverReport::default();

        for user_id in self.db.list_users_with_goals().await? {
            match self.db.find_goal_log(user_id, today).await {
                Ok(Some(_)) => report.logs_skipped += 1,
                Ok(None) => match self.get_or_create_today_log(user_id).await {
                    Ok(_) => report.logs_created += 1,
                    Err(e) => {
                        warn!(user_id, error = %e, "could not open today's goal log");
                        report.failures += 1;
                    }
                },
                Err(e) => {
                    warn!(user_id, error = %e, "could not look up today's goal log");
                    report.failures += 1;
                }
            }
        }
        report.progress_reset = self.db.reset_completed_today().await?;

        info!(
            operation = "rollover",
            date = %today,
            created = report.logs_created,
            skipped = report.logs_skipped,
            failures = report.failures,
            progress_reset = report.progress_reset,
            "daily rollover finished"
        );
        Ok(report)
    }
}
