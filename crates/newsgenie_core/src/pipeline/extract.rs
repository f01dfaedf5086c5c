//! Turns raw HTML into ordered sentence segments through the language model.

use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Instant;
use tracing::{info, warn};

use crate::domain::Segment;
use crate::json_contract::LlmOracleExt;
use crate::ports::{LlmOracle, PortError, PortResult};
use crate::prompts;

/// Title used when the model returns no segment 0.
pub const UNTITLED: &str = "(untitled)";

static NOISE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>|<noscript\b.*?</noscript\s*>|<!--.*?-->")
        .unwrap()
});
static BLANK_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n+").unwrap());

/// Drops scripts, styles and comments so the model only sees markup worth reading.
pub fn strip_html_noise(html: &str) -> String {
    let without = NOISE.replace_all(html, "");
    BLANK_RUNS.replace_all(&without, "\n").into_owned()
}

/// Orders segments by id and leaves at most one per id, so every index can key
/// its own annotation. The first non-blank occurrence of an id wins.
fn normalize_segments(segments: &mut Vec<Segment>) {
    segments.retain(|s| s.index >= 0 && !s.text.trim().is_empty());
    // stable, so repeats keep the model's order
    segments.sort_by_key(|s| s.index);
    segments.dedup_by_key(|s| s.index);
}

#[derive(Debug, Clone)]
pub struct ExtractedArticle {
    pub title: String,
    pub segments: Vec<Segment>,
}

pub struct SegmentExtractor {
    oracle: Arc<dyn LlmOracle>,
}

impl SegmentExtractor {
    pub fn new(oracle: Arc<dyn LlmOracle>) -> Self {
        Self { oracle }
    }

    /// Contract violations are fatal here: an article cannot be stored without its text.
    pub async fn extract(&self, html: &str) -> PortResult<ExtractedArticle> {
        let started = Instant::now();
        let cleaned = strip_html_noise(html);

        let mut segments: Vec<Segment> = self
            .oracle
            .complete_json(prompts::EXTRACT_SEGMENTS, &cleaned)
            .await
            .inspect_err(|e| warn!(operation = "extract", error = %e, "segment extraction failed"))?;

        let returned = segments.len();
        normalize_segments(&mut segments);
        if segments.is_empty() {
            return Err(PortError::Validation(
                "no article text could be extracted from the page".to_string(),
            ));
        }
        if segments.len() != returned {
            warn!(
                operation = "extract",
                returned,
                kept = segments.len(),
                "dropped blank, negative or repeated segment ids"
            );
        }

        let title = segments
            .iter()
            .find(|s| s.index == 0)
            .map(|s| s.text.trim().to_string())
            .unwrap_or_else(|| UNTITLED.to_string());

        info!(
            operation = "extract",
            segments = segments.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            outcome = "ok",
            "segments extracted"
        );
        Ok(ExtractedArticle { title, segments })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedOracle;

    #[test]
    fn noise_is_stripped() {
        let html = "<html><script>var a = '<p>';</script><style>p{}</style><!-- ad --><p>Body</p></html>";
        assert_eq!(strip_html_noise(html), "<html><p>Body</p></html>");
    }

    #[tokio::test]
    async fn segment_zero_becomes_title() {
        let oracle = ScriptedOracle::new(|_, _| {
            Ok(r#"```json
[{"id":1,"text":"First."},{"id":0,"text":"Headline"},{"id":2,"p":"Second."}]
```"#
                .to_string())
        });
        let extracted = SegmentExtractor::new(Arc::new(oracle)).extract("<html/>").await.unwrap();

        assert_eq!(extracted.title, "Headline");
        let order: Vec<i32> = extracted.segments.iter().map(|s| s.index).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(extracted.segments[2].text, "Second.");
    }

    #[tokio::test]
    async fn repeated_and_negative_ids_keep_first_occurrence() {
        let oracle = ScriptedOracle::new(|_, _| {
            Ok(r#"[{"id":0,"text":"Head"},{"id":1,"text":"A."},{"id":-1,"text":"Junk"},{"id":1,"text":"B."},{"id":2,"text":" "},{"id":2,"text":"C."}]"#
                .to_string())
        });
        let extracted = SegmentExtractor::new(Arc::new(oracle)).extract("<html/>").await.unwrap();

        let kept: Vec<(i32, &str)> = extracted.segments.iter().map(|s| (s.index, s.text.as_str())).collect();
        assert_eq!(kept, vec![(0, "Head"), (1, "A."), (2, "C.")]);
    }

    #[tokio::test]
    async fn missing_title_gets_placeholder() {
        let oracle = ScriptedOracle::new(|_, _| Ok(r#"[{"id":1,"text":"Only body."}]"#.to_string()));
        let extracted = SegmentExtractor::new(Arc::new(oracle)).extract("<html/>").await.unwrap();
        assert_eq!(extracted.title, UNTITLED);
        assert_eq!(extracted.segments.len(), 1);
    }

    #[tokio::test]
    async fn empty_result_is_a_validation_error() {
        let oracle = ScriptedOracle::new(|_, _| Ok(r#"[{"id":0,"text":"  "}]"#.to_string()));
        let err = SegmentExtractor::new(Arc::new(oracle)).extract("<html/>").await.unwrap_err();
        assert!(matches!(err, PortError::Validation(_)));
    }

    #[tokio::test]
    async fn malformed_json_is_fatal() {
        let oracle = ScriptedOracle::new(|_, _| Ok("Sorry, I could not read that page.".to_string()));
        let err = SegmentExtractor::new(Arc::new(oracle)).extract("<html/>").await.unwrap_err();
        assert!(matches!(err, PortError::JsonContract(_)));
    }
}
