//! services/api/src/scheduler.rs
//!
//! Background task that rolls goal state over at every local midnight.

use newsgenie_core::goals::GoalProgressTracker;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::adapters::clock::SystemClock;

/// Slack after midnight so the clock already reports the new date.
const AFTER_MIDNIGHT: Duration = Duration::from_secs(1);

/// Runs until `shutdown` is cancelled.
pub async fn run_daily_rollover(tracker: GoalProgressTracker, clock: SystemClock, shutdown: CancellationToken) {
    loop {
        let wait = clock.until_next_midnight() + AFTER_MIDNIGHT;
        info!(wait_secs = wait.as_secs(), "next goal rollover scheduled");

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("goal rollover task stopped");
                return;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        match tracker.roll_over_day().await {
            Ok(report) if report.failures > 0 => {
                warn!(operation = "rollover", failures = report.failures, "daily rollover finished with failures")
            }
            Ok(_) => {}
            Err(e) => error!(operation = "rollover", error = %e, "daily rollover failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;
    use newsgenie_core::testing::{FixedClock, InMemoryStore};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn cancelled_task_returns_without_rolling_over() {
        let db = Arc::new(InMemoryStore::new());
        db.seed_goal(1, "economy", 2);
        let tracker = GoalProgressTracker::new(
            db.clone(),
            Arc::new(FixedClock::new(chrono::NaiveDate::from_ymd_opt(2026, 1, 1).unwrap())),
        );
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_daily_rollover(
            tracker,
            SystemClock::new(FixedOffset::east_opt(0).unwrap()),
            shutdown.clone(),
        ));

        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(db.goal_log_count(), 0);
    }
}
