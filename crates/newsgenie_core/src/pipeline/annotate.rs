//! Concurrent per-segment term extraction.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use crate::domain::{Segment, SegmentAnnotation, TermExplanation};
use crate::json_contract::LlmOracleExt;
use crate::ports::{Database, LlmOracle, PortError, PortResult};
use crate::prompts;

/// One segment's stored annotation, plus whether its oracle call failed.
#[derive(Debug, Clone)]
pub struct AnnotatedSegment {
    pub annotation: SegmentAnnotation,
    pub extraction_failed: bool,
}

pub struct TermAnnotator {
    oracle: Arc<dyn LlmOracle>,
    db: Arc<dyn Database>,
    limiter: Arc<Semaphore>,
}

impl TermAnnotator {
    pub fn new(oracle: Arc<dyn LlmOracle>, db: Arc<dyn Database>, limiter: Arc<Semaphore>) -> Self {
        Self { oracle, db, limiter }
    }

    /// Annotates every segment concurrently and waits for all of them.
    ///
    /// An oracle failure only empties that segment's term list. Storage
    /// failures abort the whole batch.
    #[instrument(skip(self, segments), fields(segments = segments.len()))]
    pub async fn annotate_all(&self, article_id: i64, segments: &[Segment]) -> PortResult<Vec<AnnotatedSegment>> {
        let started = Instant::now();

        let tasks = segments.iter().map(|segment| self.annotate_one(article_id, segment));
        let results = join_all(tasks).await;

        let mut annotated = results.into_iter().collect::<PortResult<Vec<_>>>()?;
        annotated.sort_by_key(|a| a.annotation.segment_index);

        let failed = annotated.iter().filter(|a| a.extraction_failed).count();
        info!(
            operation = "annotate",
            article_id,
            segments = annotated.len(),
            failed,
            duration_ms = started.elapsed().as_millis() as u64,
            outcome = if failed == 0 { "ok" } else { "partial" },
            "term extraction finished"
        );
        Ok(annotated)
    }

    async fn annotate_one(&self, article_id: i64, segment: &Segment) -> PortResult<AnnotatedSegment> {
        let (terms, extraction_failed) = match self.extract_terms(&segment.text).await {
            Ok(terms) => (terms, false),
            Err(e) => {
                warn!(
                    operation = "annotate",
                    article_id,
                    segment_index = segment.index,
                    error = %e,
                    outcome = "degraded",
                    "term extraction failed, storing empty annotation"
                );
                (Vec::new(), true)
            }
        };

        let annotation = self
            .db
            .create_annotation(article_id, segment.index, terms)
            .await?;
        Ok(AnnotatedSegment {
            annotation,
            extraction_failed,
        })
    }

    async fn extract_terms(&self, text: &str) -> PortResult<Vec<TermExplanation>> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        let mut terms: Vec<TermExplanation> = self.oracle.complete_json(prompts::EXTRACT_TERMS, text).await?;
        // detail is always produced lazily, never trusted from this call
        for term in &mut terms {
            term.detailed_explain = None;
        }
        Ok(terms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InMemoryStore, ScriptedOracle};
    use std::time::Duration;

    fn segments() -> Vec<Segment> {
        (0..4)
            .map(|i| Segment {
                index: i,
                text: format!("sentence {}", i),
            })
            .collect()
    }

    #[tokio::test]
    async fn every_segment_gets_an_annotation_even_when_some_fail() {
        let oracle = ScriptedOracle::new(|_, user| {
            if user == "sentence 2" {
                Ok("not json at all".to_string())
            } else {
                Ok(format!(
                    r#"[{{"kind":"person","keyword":"{}","short_explain":"x","detailed_explain":"ignored"}}]"#,
                    user
                ))
            }
        });
        let db = Arc::new(InMemoryStore::new());
        let annotator = TermAnnotator::new(Arc::new(oracle), db.clone(), Arc::new(Semaphore::new(8)));

        let result = annotator.annotate_all(7, &segments()).await.unwrap();

        assert_eq!(result.len(), 4);
        assert!(result[2].extraction_failed);
        assert!(result[2].annotation.terms.is_empty());
        assert_eq!(result[1].annotation.terms[0].keyword, "sentence 1");
        assert!(result[1].annotation.terms[0].detailed_explain.is_none());
        assert_eq!(db.annotation_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_is_capped_by_the_limiter() {
        let oracle = Arc::new(ScriptedOracle::new(|_, _| Ok("[]".to_string())).with_latency(Duration::from_millis(50)));
        let db = Arc::new(InMemoryStore::new());
        let annotator = TermAnnotator::new(oracle.clone(), db, Arc::new(Semaphore::new(2)));

        annotator.annotate_all(1, &segments()).await.unwrap();

        assert_eq!(oracle.calls(), 4);
        assert_eq!(oracle.max_in_flight(), 2);
    }
}
