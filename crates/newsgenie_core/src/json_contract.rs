//! crates/newsgenie_core/src/json_contract.rs
//!
//! Recovers a JSON payload from a language-model answer. Answers may wrap the
//! payload in a fenced code block or surround it with prose; this module only
//! decides whether a payload exists and parses. Whether a violation is fatal is
//! up to the caller.

use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::LazyLock;

use crate::ports::{LlmOracle, PortError, PortResult};

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").unwrap());

/// Returns the inside of the first fenced code block, or the trimmed text when
/// there is none.
pub fn strip_code_fence(text: &str) -> &str {
    match FENCED_BLOCK.captures(text).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => text.trim(),
    }
}

/// Finds the first balanced top-level JSON array or object by bracket matching.
///
/// Brackets inside JSON strings are ignored. An opener that never balances is
/// skipped and the scan resumes at the next one.
pub fn locate_json_span(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut start = 0;
    while let Some(offset) = text[start..].find(['{', '[']) {
        let open = start + offset;
        if let Some(close) = matching_close(bytes, open) {
            return Some(&text[open..=close]);
        }
        start = open + 1;
    }
    None
}

fn matching_close(bytes: &[u8], open: usize) -> Option<usize> {
    let mut stack: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => stack.push(b'}'),
            b'[' => stack.push(b']'),
            b'}' | b']' => {
                if stack.pop() != Some(b) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Applies the full contract: fence stripping, span location, typed parsing.
pub fn parse_json_payload<T: DeserializeOwned>(response: &str) -> PortResult<T> {
    let body = strip_code_fence(response);
    let span = locate_json_span(body).ok_or_else(|| {
        PortError::JsonContract(format!("no JSON array or object in response: {}", preview(response)))
    })?;
    serde_json::from_str(span).map_err(|e| PortError::JsonContract(format!("{} in {}", e, preview(span))))
}

fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}

/// Structured completions built on top of the text contract.
#[async_trait]
pub trait LlmOracleExt {
    async fn complete_json<T>(&self, system_prompt: &str, user_text: &str) -> PortResult<T>
    where
        T: DeserializeOwned + Send;
}

#[async_trait]
impl<O> LlmOracleExt for O
where
    O: LlmOracle + ?Sized,
{
    async fn complete_json<T>(&self, system_prompt: &str, user_text: &str) -> PortResult<T>
    where
        T: DeserializeOwned + Send,
    {
        let raw = self.complete(system_prompt, user_text).await?;
        parse_json_payload(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        answer: bool,
        description: String,
    }

    #[test]
    fn plain_object_parses() {
        let v: Verdict = parse_json_payload(r#"{"answer":true,"description":"ok"}"#).unwrap();
        assert!(v.answer);
    }

    #[test]
    fn fenced_block_with_language_tag() {
        let raw = "```json\n[{\"id\":0,\"text\":\"Title\"}]\n```";
        let v: Vec<serde_json::Value> = parse_json_payload(raw).unwrap();
        assert_eq!(v.len(), 1);
    }

    #[test]
    fn prose_around_payload() {
        let raw = "Sure! Here is the quiz you asked for:\n{\"answer\": false, \"description\": \"Rates {rose}.\"}\nHope it helps.";
        let v: Verdict = parse_json_payload(raw).unwrap();
        assert_eq!(
            v,
            Verdict {
                answer: false,
                description: "Rates {rose}.".into()
            }
        );
    }

    #[test]
    fn brackets_inside_strings_are_ignored() {
        let raw = r#"[{"id":1,"text":"a ] tricky \" [ line"}] trailing ]"#;
        assert_eq!(
            locate_json_span(raw),
            Some(r#"[{"id":1,"text":"a ] tricky \" [ line"}]"#)
        );
    }

    #[test]
    fn unbalanced_opener_is_skipped() {
        let raw = "note: {oops ] then [1, 2]";
        assert_eq!(locate_json_span(raw), Some("[1, 2]"));
    }

    #[test]
    fn missing_payload_is_a_contract_violation() {
        let err = parse_json_payload::<Verdict>("I cannot help with that.").unwrap_err();
        assert!(matches!(err, PortError::JsonContract(_)));
    }

    #[test]
    fn unparseable_span_is_a_contract_violation() {
        let err = parse_json_payload::<Vec<i32>>("[1, 2, oops]").unwrap_err();
        assert!(matches!(err, PortError::JsonContract(_)));
    }

    #[test]
    fn wrong_shape_is_a_contract_violation() {
        let err = parse_json_payload::<Verdict>("[true]").unwrap_err();
        assert!(matches!(err, PortError::JsonContract(_)));
    }
}
