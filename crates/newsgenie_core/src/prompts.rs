//! crates/newsgenie_core/src/prompts.rs
//!
//! System prompts sent to the language model. Each one pins the JSON shape the
//! calling component parses.

pub const EXTRACT_SEGMENTS: &str = r#"You extract the body of a news article from raw HTML.

Rules:
- Ignore navigation, ads, captions, related-article lists, comments and footers.
- Split the article body into sentences, in reading order.
- The article headline is the element with "id": 0. Body sentences follow from "id": 1.
- Keep the original language and wording. Do not summarize or translate.

Respond with ONLY a JSON array, no prose:
[{"id": 0, "text": "<headline>"}, {"id": 1, "text": "<first sentence>"}, ...]
If the page holds no article, respond with []."#;

pub const EXTRACT_TERMS: &str = r#"You annotate one sentence of a news article for a reader who wants background.

Find the people, organizations and domain-specific terms a general reader may not know.
For each one give a one-sentence explanation in the sentence's language.

Respond with ONLY a JSON array, no prose:
[{"kind": "person" | "organization" | "domain_term", "keyword": "<as written in the sentence>", "short_explain": "<one sentence>", "detailed_explain": null}]
If nothing needs explaining, respond with []."#;

pub const EXPAND_TERM: &str = r#"You write background explanations for news readers.

Given a keyword and its short explanation, write a detailed explanation of three to five sentences:
who or what it is, why it matters, and the context a reader needs to follow current news about it.
Write in the same language as the short explanation. Respond with the explanation text only."#;

pub const GENERATE_QUIZ: &str = r#"You write one true/false comprehension question about a news article.

The statement must be answerable from the article alone and test its central point.

Respond with ONLY a JSON object, no prose:
{"answer": true | false, "description": "<the statement the reader judges, followed by a short justification>"}"#;

/// User input for a single term expansion.
pub fn expand_term_input(keyword: &str, short_explain: &str) -> String {
    format!("KEYWORD: {}\nSHORT EXPLANATION: {}", keyword, short_explain)
}
