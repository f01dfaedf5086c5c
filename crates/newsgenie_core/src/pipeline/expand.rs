//! Lazy, idempotent filling of detailed term explanations.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::domain::{SegmentAnnotation, TermExplanation};
use crate::ports::{Database, LlmOracle, PortError, PortResult};
use crate::prompts;

pub struct DetailExpander {
    oracle: Arc<dyn LlmOracle>,
    db: Arc<dyn Database>,
    limiter: Arc<Semaphore>,
}

impl DetailExpander {
    pub fn new(oracle: Arc<dyn LlmOracle>, db: Arc<dyn Database>, limiter: Arc<Semaphore>) -> Self {
        Self { oracle, db, limiter }
    }

    /// Fills every missing detail concurrently and persists once.
    ///
    /// Terms whose call fails stay as they were. A fully detailed annotation
    /// is returned untouched without any oracle call.
    pub async fn expand(&self, annotation: SegmentAnnotation) -> PortResult<SegmentAnnotation> {
        let missing = annotation.missing_detail();
        if missing.is_empty() {
            return Ok(annotation);
        }
        let started = Instant::now();

        let tasks = missing.iter().map(|&position| {
            let term = &annotation.terms[position];
            async move { self.expand_term(term).await.map(|detail| (position, detail)) }
        });
        let details: Vec<(usize, String)> = join_all(tasks).await.into_iter().flatten().collect();

        let filled = details.len();
        let updated = if details.is_empty() {
            annotation
        } else {
            self.db.fill_term_details(annotation.id, details).await?
        };

        info!(
            operation = "expand",
            article_id = updated.article_id,
            segment_index = updated.segment_index,
            requested = missing.len(),
            filled,
            duration_ms = started.elapsed().as_millis() as u64,
            outcome = if filled == missing.len() { "ok" } else { "partial" },
            "detail expansion finished"
        );
        Ok(updated)
    }

    async fn expand_term(&self, term: &TermExplanation) -> Option<String> {
        let result: PortResult<String> = async {
            let _permit = self
                .limiter
                .acquire()
                .await
                .map_err(|e| PortError::Unexpected(e.to_string()))?;
            let input = prompts::expand_term_input(&term.keyword, &term.short_explain);
            let text = self.oracle.complete(prompts::EXPAND_TERM, &input).await?;
            let text = text.trim();
            if text.is_empty() {
                return Err(PortError::Unexpected("model returned an empty explanation".to_string()));
            }
            Ok(text.to_string())
        }
        .await;

        match result {
            Ok(detail) => Some(detail),
            Err(e) => {
                warn!(operation = "expand", keyword = %term.keyword, error = %e, "detail generation failed, keeping term as is");
                None
            }
        }
    }
}
