//! crates/newsgenie_core/src/pipeline/analysis.rs
//!
//! Composes fetch, extraction, annotation and expansion into the two
//! article-facing operations.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{info, instrument};

use crate::domain::{NewArticle, Segment, TermExplanation};
use crate::goals::GoalProgressTracker;
use crate::pipeline::annotate::{AnnotatedSegment, TermAnnotator};
use crate::pipeline::expand::DetailExpander;
use crate::pipeline::extract::SegmentExtractor;
use crate::pipeline::fetch::{validate_article_url, ContentFetcher};
use crate::ports::{Database, HttpTransport, LlmOracle, PortResult};

#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub article_id: i64,
    pub title: String,
    pub segments: Vec<Segment>,
    pub annotations: Vec<AnnotatedSegment>,
    /// Segment indexes whose term extraction failed and were stored empty.
    pub incomplete_segments: Vec<i32>,
}

#[derive(Debug, Clone)]
pub struct SegmentDetail {
    pub annotation_id: i64,
    pub segment_index: i32,
    pub terms: Vec<TermExplanation>,
    pub has_full_detail: bool,
}

pub struct AnalysisService {
    fetcher: ContentFetcher,
    extractor: SegmentExtractor,
    annotator: TermAnnotator,
    expander: DetailExpander,
    goals: GoalProgressTracker,
    db: Arc<dyn Database>,
}

impl AnalysisService {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        user_agent: impl Into<String>,
        oracle: Arc<dyn LlmOracle>,
        db: Arc<dyn Database>,
        limiter: Arc<Semaphore>,
        goals: GoalProgressTracker,
    ) -> Self {
        Self {
            fetcher: ContentFetcher::new(transport, user_agent),
            extractor: SegmentExtractor::new(oracle.clone()),
            annotator: TermAnnotator::new(oracle.clone(), db.clone(), limiter.clone()),
            expander: DetailExpander::new(oracle, db.clone(), limiter),
            goals,
            db,
        }
    }

    /// Fetches, segments and annotates an article for the user.
    ///
    /// Today's goal log is resolved before any network work so a user without
    /// a goal fails fast. Nothing is persisted unless extraction succeeds.
    #[instrument(skip(self))]
    pub async fn analyze_from_url(&self, user_id: i64, url: &str) -> PortResult<AnalysisResult> {
        let started = Instant::now();
        let url = validate_article_url(url)?;
        let goal_log = self.goals.get_or_create_today_log(user_id).await?;

        let html = self.fetcher.fetch(url.as_str()).await?;
        let extracted = self.extractor.extract(&html).await?;

        let article = self
            .db
            .create_article(NewArticle {
                user_id,
                goal_log_id: Some(goal_log.id),
                url: url.to_string(),
                title: extracted.title,
                segments: extracted.segments,
            })
            .await?;

        let annotations = self.annotator.annotate_all(article.id, &article.segments).await?;
        let incomplete_segments: Vec<i32> = annotations
            .iter()
            .filter(|a| a.extraction_failed)
            .map(|a| a.annotation.segment_index)
            .collect();

        info!(
            operation = "analyze",
            article_id = article.id,
            user_id,
            segments = article.segments.len(),
            incomplete = incomplete_segments.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            outcome = if incomplete_segments.is_empty() { "ok" } else { "partial" },
            "article analyzed"
        );
        Ok(AnalysisResult {
            article_id: article.id,
            title: article.title,
            segments: article.segments,
            annotations,
            incomplete_segments,
        })
    }

    /// One segment of the user's article, with missing term details filled in when `expand` is set.
    #[instrument(skip(self))]
    pub async fn get_segment_detail(
        &self,
        user_id: i64,
        article_id: i64,
        segment_index: i32,
        expand: bool,
    ) -> PortResult<SegmentDetail> {
        self.db.get_owned_article(user_id, article_id).await?;
        let annotation = self.db.get_annotation(article_id, segment_index).await?;
        let annotation = if expand {
            self.expander.expand(annotation).await?
        } else {
            annotation
        };

        Ok(SegmentDetail {
            annotation_id: annotation.id,
            segment_index: annotation.segment_index,
            has_full_detail: annotation.has_full_detail(),
            terms: annotation.terms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::PortError;
    use crate::prompts;
    use crate::testing::{FixedClock, InMemoryStore, ScriptedOracle, StubTransport};
    use chrono::NaiveDate;

    const PAGE: &str = "<html><body><h1>Rates rise</h1><p>The Fed moved.</p><p>Markets fell.</p></body></html>";
    const SEGMENTS: &str = r#"[{"id":0,"text":"Rates rise"},{"id":1,"text":"The Fed moved."},{"id":2,"text":"Markets fell."}]"#;

    struct Fixture {
        db: Arc<InMemoryStore>,
        oracle: Arc<ScriptedOracle>,
        transport: Arc<StubTransport>,
        service: AnalysisService,
    }

    fn fixture(oracle: ScriptedOracle) -> Fixture {
        let db = Arc::new(InMemoryStore::new());
        db.seed_goal(9, "economy", 3);
        let oracle = Arc::new(oracle);
        let transport = Arc::new(StubTransport::ok(PAGE));
        let clock = Arc::new(FixedClock::new(NaiveDate::from_ymd_opt(2026, 5, 4).unwrap()));
        let goals = GoalProgressTracker::new(db.clone(), clock);
        let service = AnalysisService::new(
            transport.clone(),
            "test-agent",
            oracle.clone(),
            db.clone(),
            Arc::new(Semaphore::new(4)),
            goals,
        );
        Fixture {
            db,
            oracle,
            transport,
            service,
        }
    }

    fn happy_oracle() -> ScriptedOracle {
        ScriptedOracle::new(|system, user| {
            if system == prompts::EXTRACT_SEGMENTS {
                Ok(SEGMENTS.to_string())
            } else if system == prompts::EXTRACT_TERMS {
                Ok(format!(r#"[{{"kind":"domain_term","keyword":"{}","short_explain":"s"}}]"#, user))
            } else {
                Ok("a longer explanation".to_string())
            }
        })
    }

    #[tokio::test]
    async fn analysis_returns_every_segment_with_the_first_as_title() {
        let fx = fixture(happy_oracle());

        let result = fx.service.analyze_from_url(9, "https://news.example.com/a/1").await.unwrap();

        assert_eq!(result.title, "Rates rise");
        assert_eq!(result.segments.len(), 3);
        assert_eq!(result.annotations.len(), 3);
        assert!(result.incomplete_segments.is_empty());
        assert_eq!(result.annotations[2].annotation.terms[0].keyword, "Markets fell.");
        assert_eq!(fx.db.article_count(), 1);
        assert_eq!(fx.db.goal_log_count(), 1);
        assert_eq!(fx.transport.last_user_agent().as_deref(), Some("test-agent"));
    }

    #[tokio::test]
    async fn malformed_segment_json_persists_nothing() {
        let fx = fixture(ScriptedOracle::new(|_, _| Ok("[{\"id\": 0, \"text\": ".to_string())));

        let err = fx.service.analyze_from_url(9, "https://news.example.com/a/1").await.unwrap_err();

        assert!(matches!(err, PortError::JsonContract(_)));
        assert_eq!(fx.db.article_count(), 0);
        assert_eq!(fx.db.annotation_count(), 0);
    }

    #[tokio::test]
    async fn malformed_term_json_degrades_to_an_empty_segment() {
        let fx = fixture(ScriptedOracle::new(|system, user| {
            if system == prompts::EXTRACT_SEGMENTS {
                Ok(SEGMENTS.to_string())
            } else if user == "The Fed moved." {
                Ok("I could not find any terms".to_string())
            } else {
                Ok("[]".to_string())
            }
        }));

        let result = fx.service.analyze_from_url(9, "https://news.example.com/a/1").await.unwrap();

        assert_eq!(result.annotations.len(), 3);
        assert_eq!(result.incomplete_segments, vec![1]);
        assert!(result.annotations[1].annotation.terms.is_empty());
    }

    #[tokio::test]
    async fn empty_extraction_is_a_validation_error() {
        let fx = fixture(ScriptedOracle::new(|_, _| Ok(r#"[{"id":0,"text":"   "}]"#.to_string())));

        let err = fx.service.analyze_from_url(9, "https://news.example.com/a/1").await.unwrap_err();

        assert!(matches!(err, PortError::Validation(_)));
        assert_eq!(fx.db.article_count(), 0);
    }

    #[tokio::test]
    async fn user_without_goal_fails_before_fetching() {
        let fx = fixture(happy_oracle());

        let err = fx.service.analyze_from_url(77, "https://news.example.com/a/1").await.unwrap_err();

        assert!(matches!(err, PortError::NotFound(_)));
        assert_eq!(fx.transport.calls(), 0);
        assert_eq!(fx.oracle.calls(), 0);
    }

    #[tokio::test]
    async fn invalid_url_is_rejected_up_front() {
        let fx = fixture(happy_oracle());

        let err = fx.service.analyze_from_url(9, "not a url").await.unwrap_err();

        assert!(matches!(err, PortError::Validation(_)));
        assert_eq!(fx.db.goal_log_count(), 0);
    }

    #[tokio::test]
    async fn detail_expansion_is_idempotent() {
        let fx = fixture(happy_oracle());
        let result = fx.service.analyze_from_url(9, "https://news.example.com/a/1").await.unwrap();
        let calls_after_analysis = fx.oracle.calls();

        let plain = fx.service.get_segment_detail(9, result.article_id, 1, false).await.unwrap();
        assert!(!plain.has_full_detail);
        assert_eq!(fx.oracle.calls(), calls_after_analysis);

        let expanded = fx.service.get_segment_detail(9, result.article_id, 1, true).await.unwrap();
        assert!(expanded.has_full_detail);
        assert_eq!(expanded.terms[0].detailed_explain.as_deref(), Some("a longer explanation"));
        assert_eq!(fx.oracle.calls(), calls_after_analysis + 1);

        let again = fx.service.get_segment_detail(9, result.article_id, 1, true).await.unwrap();
        assert!(again.has_full_detail);
        assert_eq!(again.annotation_id, expanded.annotation_id);
        assert_eq!(fx.oracle.calls(), calls_after_analysis + 1);
    }

    #[tokio::test]
    async fn repeated_segment_ids_still_annotate_every_segment() {
        let fx = fixture(ScriptedOracle::new(|system, _| {
            if system == prompts::EXTRACT_SEGMENTS {
                Ok(r#"[{"id":0,"text":"Rates rise"},{"id":1,"text":"A."},{"id":1,"text":"B."}]"#.to_string())
            } else {
                Ok("[]".to_string())
            }
        }));

        let result = fx.service.analyze_from_url(9, "https://news.example.com/a/1").await.unwrap();

        assert_eq!(result.segments.len(), 2);
        assert_eq!(result.segments[1].text, "A.");
        assert_eq!(result.annotations.len(), 2);
        assert_eq!(fx.db.article_count(), 1);
        assert_eq!(fx.db.annotation_count(), 2);
    }

    #[tokio::test]
    async fn unknown_segment_or_foreign_article_is_not_found() {
        let fx = fixture(happy_oracle());
        let result = fx.service.analyze_from_url(9, "https://news.example.com/a/1").await.unwrap();
        let calls = fx.oracle.calls();

        let err = fx.service.get_segment_detail(9, result.article_id, 7, true).await.unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));

        let err = fx.service.get_segment_detail(10, result.article_id, 1, true).await.unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));
        assert_eq!(fx.oracle.calls(), calls);
    }
}
