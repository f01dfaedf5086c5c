//! crates/newsgenie_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database; the few that travel through
//! the language model's JSON answers carry serde derives.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

//=========================================================================================
// Articles and Segments
//=========================================================================================

/// One sentence-level unit of an article. Index 0 is the title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(rename = "id", alias = "index")]
    pub index: i32,
    #[serde(alias = "p")]
    pub text: String,
}

/// Reading outcome of an article, driven only by quiz grading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArticleStatus {
    Noread,
    Correct,
    Wrong,
}

impl ArticleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Noread => "NOREAD",
            Self::Correct => "CORRECT",
            Self::Wrong => "WRONG",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "NOREAD" => Some(Self::Noread),
            "CORRECT" => Some(Self::Correct),
            "WRONG" => Some(Self::Wrong),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Article {
    pub id: i64,
    pub user_id: i64,
    pub goal_log_id: Option<i64>,
    pub url: String,
    pub title: String,
    pub segments: Vec<Segment>,
    pub status: ArticleStatus,
    /// Set once this article's correct answer has been credited to progress.
    pub progress_credited: bool,
    pub created_at: DateTime<Utc>,
}

impl Article {
    /// The article body as the quiz generator sees it, one segment per line.
    pub fn joined_text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Everything needed to persist a freshly extracted article.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub user_id: i64,
    pub goal_log_id: Option<i64>,
    pub url: String,
    pub title: String,
    pub segments: Vec<Segment>,
}

/// Result of an atomic grading write.
#[derive(Debug, Clone)]
pub struct GradedArticle {
    pub article: Article,
    pub previous_status: ArticleStatus,
}

impl GradedArticle {
    /// True when this write moved the article into CORRECT.
    pub fn became_correct(&self) -> bool {
        self.previous_status != ArticleStatus::Correct
            && self.article.status == ArticleStatus::Correct
    }

    /// CORRECT but not yet credited, either just now or by an earlier
    /// submission whose goal hand-off failed.
    pub fn awaits_credit(&self) -> bool {
        self.article.status == ArticleStatus::Correct && !self.article.progress_credited
    }
}

//=========================================================================================
// Annotations
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermKind {
    Person,
    #[serde(alias = "company")]
    Organization,
    #[serde(alias = "domain_terms")]
    DomainTerm,
}

/// A named term found in a segment, with a short and an optional long explanation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermExplanation {
    #[serde(rename = "kind", alias = "type")]
    pub kind: TermKind,
    pub keyword: String,
    #[serde(rename = "short_explain", alias = "explain", alias = "shortExplain")]
    pub short_explain: String,
    #[serde(
        rename = "detailed_explain",
        alias = "detailedExplain",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub detailed_explain: Option<String>,
}

impl TermExplanation {
    pub fn needs_detail(&self) -> bool {
        self.detailed_explain
            .as_deref()
            .map_or(true, |d| d.trim().is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct SegmentAnnotation {
    pub id: i64,
    pub article_id: i64,
    pub segment_index: i32,
    pub terms: Vec<TermExplanation>,
}

impl SegmentAnnotation {
    /// Positions of the terms still waiting for a detailed explanation.
    pub fn missing_detail(&self) -> Vec<usize> {
        self.terms
            .iter()
            .enumerate()
            .filter(|(_, t)| t.needs_detail())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn has_full_detail(&self) -> bool {
        self.terms.iter().all(|t| !t.needs_detail())
    }
}

//=========================================================================================
// Goals, Goal Logs and Progress
//=========================================================================================

/// A user-configured daily reading target.
#[derive(Debug, Clone)]
pub struct Goal {
    pub id: i64,
    pub user_id: i64,
    pub domain: String,
    pub numbers: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GoalLogStatus {
    InProgress,
    Completed,
}

impl GoalLogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "IN_PROGRESS" => Some(Self::InProgress),
            "COMPLETED" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// The per-day instance of a goal, unique per (user, date).
#[derive(Debug, Clone)]
pub struct GoalLog {
    pub id: i64,
    pub user_id: i64,
    pub date: NaiveDate,
    pub target_count: i32,
    pub current_count: i32,
    pub status: GoalLogStatus,
    pub version: i64,
}

impl GoalLog {
    /// Applies a freshly counted number of CORRECT articles.
    ///
    /// The count never moves backwards and COMPLETED is terminal. Returns
    /// true when anything changed.
    pub fn apply_correct_count(&mut self, correct: i32) -> bool {
        let next_count = self.current_count.max(correct);
        let next_status = if self.status == GoalLogStatus::Completed || next_count >= self.target_count
        {
            GoalLogStatus::Completed
        } else {
            GoalLogStatus::InProgress
        };
        let changed = next_count != self.current_count || next_status != self.status;
        self.current_count = next_count;
        self.status = next_status;
        changed
    }

    pub fn is_completed(&self) -> bool {
        self.status == GoalLogStatus::Completed
    }
}

/// A goal as submitted by its user.
#[derive(Debug, Clone)]
pub struct NewGoal {
    pub user_id: i64,
    pub domain: String,
    pub numbers: i32,
}

#[derive(Debug, Clone)]
pub struct NewGoalLog {
    pub user_id: i64,
    pub date: NaiveDate,
    pub target_count: i32,
}

pub const LEVEL_TWO_AFTER: i32 = 100;
pub const LEVEL_THREE_AFTER: i32 = 200;

/// Tier for a cumulative progress value: 1 up to 100, 2 up to 200, then 3.
pub fn level_for(value: i32) -> i32 {
    if value > LEVEL_THREE_AFTER {
        3
    } else if value > LEVEL_TWO_AFTER {
        2
    } else {
        1
    }
}

/// Per-user cumulative counter ("level tracker").
#[derive(Debug, Clone)]
pub struct Progress {
    pub id: i64,
    pub user_id: i64,
    pub value: i32,
    pub level: i32,
    pub completed_today: bool,
    pub version: i64,
}

impl Progress {
    /// One more correct answer. The level is re-derived, never carried.
    pub fn record_correct(&mut self, goal_completed: bool) {
        self.value += 1;
        self.level = level_for(self.value);
        if goal_completed {
            self.completed_today = true;
        }
    }
}

//=========================================================================================
// Quizzes
//=========================================================================================

/// A true/false quiz, one per article.
#[derive(Debug, Clone)]
pub struct Quiz {
    pub id: i64,
    pub article_id: i64,
    pub answer: bool,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct NewQuiz {
    pub article_id: i64,
    pub answer: bool,
    pub description: String,
}
