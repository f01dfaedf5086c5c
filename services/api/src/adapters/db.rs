//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, the concrete implementation of the
//! persistence ports from the `core` crate. It handles all interactions with the
//! PostgreSQL database using `sqlx`.
//!
//! Uniqueness races are settled by the schema: inserts use `ON CONFLICT DO
//! NOTHING RETURNING` and report an empty result as `PortError::Duplicate`.
//! Goal logs and progress rows are updated with a version compare-and-set.
//! A progress credit also flips the article's `progress_credited` marker in
//! the same transaction.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use newsgenie_core::domain::{
    Article, ArticleStatus, Goal, GoalLog, GoalLogStatus, GradedArticle, NewArticle, NewGoal, NewGoalLog, NewQuiz,
    Progress, Quiz, Segment, SegmentAnnotation, TermExplanation,
};
use newsgenie_core::ports::{
    AnnotationStore, ArticleStore, GoalStore, PortError, PortResult, ProgressCredit, ProgressStore, QuizStore,
};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements every persistence port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

const ARTICLE_COLUMNS: &str = "id, user_id, goal_log_id, url, title, segments, status, progress_credited, created_at";
const GOAL_LOG_COLUMNS: &str = "id, user_id, log_date, target_count, current_count, status, version";
const PROGRESS_COLUMNS: &str = "id, user_id, value, level, completed_today, version";

#[derive(FromRow)]
struct ArticleRecord {
    id: i64,
    user_id: i64,
    goal_log_id: Option<i64>,
    url: String,
    title: String,
    segments: Json<Vec<Segment>>,
    status: String,
    progress_credited: bool,
    created_at: DateTime<Utc>,
}
impl ArticleRecord {
    fn to_domain(self) -> PortResult<Article> {
        Ok(Article {
            id: self.id,
            user_id: self.user_id,
            goal_log_id: self.goal_log_id,
            url: self.url,
            title: self.title,
            segments: self.segments.0,
            status: parse_article_status(&self.status)?,
            progress_credited: self.progress_credited,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct GradedArticleRecord {
    #[sqlx(flatten)]
    article: ArticleRecord,
    previous_status: String,
}

#[derive(FromRow)]
struct AnnotationRecord {
    id: i64,
    article_id: i64,
    segment_index: i32,
    terms: Json<Vec<TermExplanation>>,
}
impl AnnotationRecord {
    fn to_domain(self) -> SegmentAnnotation {
        SegmentAnnotation {
            id: self.id,
            article_id: self.article_id,
            segment_index: self.segment_index,
            terms: self.terms.0,
        }
    }
}

#[derive(FromRow)]
struct GoalRecord {
    id: i64,
    user_id: i64,
    domain: String,
    numbers: i32,
    created_at: DateTime<Utc>,
}
impl GoalRecord {
    fn to_domain(self) -> Goal {
        Goal {
            id: self.id,
            user_id: self.user_id,
            domain: self.domain,
            numbers: self.numbers,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct GoalLogRecord {
    id: i64,
    user_id: i64,
    log_date: NaiveDate,
    target_count: i32,
    current_count: i32,
    status: String,
    version: i64,
}
impl GoalLogRecord {
    fn to_domain(self) -> PortResult<GoalLog> {
        let status = GoalLogStatus::parse(&self.status)
            .ok_or_else(|| PortError::Unexpected(format!("unknown goal log status '{}'", self.status)))?;
        Ok(GoalLog {
            id: self.id,
            user_id: self.user_id,
            date: self.log_date,
            target_count: self.target_count,
            current_count: self.current_count,
            status,
            version: self.version,
        })
    }
}

#[derive(FromRow)]
struct QuizRecord {
    id: i64,
    article_id: i64,
    answer: bool,
    description: String,
}
impl QuizRecord {
    fn to_domain(self) -> Quiz {
        Quiz {
            id: self.id,
            article_id: self.article_id,
            answer: self.answer,
            description: self.description,
        }
    }
}

#[derive(FromRow)]
struct ProgressRecord {
    id: i64,
    user_id: i64,
    value: i32,
    level: i32,
    completed_today: bool,
    version: i64,
}
impl ProgressRecord {
    fn to_domain(self) -> Progress {
        Progress {
            id: self.id,
            user_id: self.user_id,
            value: self.value,
            level: self.level,
            completed_today: self.completed_today,
            version: self.version,
        }
    }
}

fn parse_article_status(raw: &str) -> PortResult<ArticleStatus> {
    ArticleStatus::parse(raw).ok_or_else(|| PortError::Unexpected(format!("unknown article status '{}'", raw)))
}

//=========================================================================================
// `ArticleStore` Implementation
//=========================================================================================

#[async_trait]
impl ArticleStore for DbAdapter {
    async fn create_article(&self, article: NewArticle) -> PortResult<Article> {
        let sql = format!(
            "INSERT INTO articles (user_id, goal_log_id, url, title, segments) VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            ARTICLE_COLUMNS
        );
        let record = sqlx::query_as::<_, ArticleRecord>(&sql)
            .bind(article.user_id)
            .bind(article.goal_log_id)
            .bind(&article.url)
            .bind(&article.title)
            .bind(Json(&article.segments))
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)?;
        record.to_domain()
    }

    async fn get_article(&self, article_id: i64) -> PortResult<Article> {
        let sql = format!("SELECT {} FROM articles WHERE id = $1", ARTICLE_COLUMNS);
        let record = sqlx::query_as::<_, ArticleRecord>(&sql)
            .bind(article_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => PortError::NotFound(format!("Article {} not found", article_id)),
                _ => unexpected(e),
            })?;
        record.to_domain()
    }

    async fn record_grade(&self, article_id: i64, status: ArticleStatus) -> PortResult<GradedArticle> {
        // The row lock in `previous` serialises concurrent graders of one article.
        let sql = format!(
            "WITH previous AS (SELECT id, status FROM articles WHERE id = $1 FOR UPDATE) \
             UPDATE articles AS a \
             SET status = CASE WHEN previous.status = 'CORRECT' THEN previous.status ELSE $2 END \
             FROM previous WHERE a.id = previous.id \
             RETURNING {}, previous.status AS previous_status",
            ARTICLE_COLUMNS
                .split(", ")
                .map(|c| format!("a.{}", c))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let record = sqlx::query_as::<_, GradedArticleRecord>(&sql)
            .bind(article_id)
            .bind(status.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?
            .ok_or_else(|| PortError::NotFound(format!("Article {} not found", article_id)))?;

        Ok(GradedArticle {
            previous_status: parse_article_status(&record.previous_status)?,
            article: record.article.to_domain()?,
        })
    }

    async fn count_articles_in_log(&self, goal_log_id: i64, status: ArticleStatus) -> PortResult<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM articles WHERE goal_log_id = $1 AND status = $2")
            .bind(goal_log_id)
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)
    }
}

//=========================================================================================
// `AnnotationStore` Implementation
//=========================================================================================

#[async_trait]
impl AnnotationStore for DbAdapter {
    async fn create_annotation(
        &self,
        article_id: i64,
        segment_index: i32,
        terms: Vec<TermExplanation>,
    ) -> PortResult<SegmentAnnotation> {
        let record = sqlx::query_as::<_, AnnotationRecord>(
            "INSERT INTO segment_annotations (article_id, segment_index, terms) VALUES ($1, $2, $3) \
             ON CONFLICT (article_id, segment_index) DO NOTHING \
             RETURNING id, article_id, segment_index, terms",
        )
        .bind(article_id)
        .bind(segment_index)
        .bind(Json(&terms))
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| {
            PortError::Duplicate(format!(
                "annotation for article {} segment {} already exists",
                article_id, segment_index
            ))
        })?;
        Ok(record.to_domain())
    }

    async fn get_annotation(&self, article_id: i64, segment_index: i32) -> PortResult<SegmentAnnotation> {
        let record = sqlx::query_as::<_, AnnotationRecord>(
            "SELECT id, article_id, segment_index, terms FROM segment_annotations \
             WHERE article_id = $1 AND segment_index = $2",
        )
        .bind(article_id)
        .bind(segment_index)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| {
            PortError::NotFound(format!(
                "Segment {} of article {} not found",
                segment_index, article_id
            ))
        })?;
        Ok(record.to_domain())
    }

    async fn fill_term_details(
        &self,
        annotation_id: i64,
        details: Vec<(usize, String)>,
    ) -> PortResult<SegmentAnnotation> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let mut annotation = sqlx::query_as::<_, AnnotationRecord>(
            "SELECT id, article_id, segment_index, terms FROM segment_annotations WHERE id = $1 FOR UPDATE",
        )
        .bind(annotation_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("Annotation {} not found", annotation_id)))?
        .to_domain();

        let mut changed = false;
        for (position, detail) in details {
            if let Some(term) = annotation.terms.get_mut(position) {
                if term.needs_detail() {
                    term.detailed_explain = Some(detail);
                    changed = true;
                }
            }
        }

        if changed {
            sqlx::query("UPDATE segment_annotations SET terms = $2 WHERE id = $1")
                .bind(annotation_id)
                .bind(Json(&annotation.terms))
                .execute(&mut *tx)
                .await
                .map_err(unexpected)?;
        }
        tx.commit().await.map_err(unexpected)?;
        Ok(annotation)
    }
}

//=========================================================================================
// `GoalStore` Implementation
//=========================================================================================

#[async_trait]
impl GoalStore for DbAdapter {
    async fn create_goal(&self, goal: NewGoal) -> PortResult<Goal> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        // Callers are identified by header, so the first goal registers them.
        sqlx::query("INSERT INTO users (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
            .bind(goal.user_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;

        let record = sqlx::query_as::<_, GoalRecord>(
            "INSERT INTO goals (user_id, domain, numbers) VALUES ($1, $2, $3) \
             RETURNING id, user_id, domain, numbers, created_at",
        )
        .bind(goal.user_id)
        .bind(&goal.domain)
        .bind(goal.numbers)
        .fetch_one(&mut *tx)
        .await
        .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn find_active_goal(&self, user_id: i64) -> PortResult<Option<Goal>> {
        let record = sqlx::query_as::<_, GoalRecord>(
            "SELECT id, user_id, domain, numbers, created_at FROM goals \
             WHERE user_id = $1 ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(GoalRecord::to_domain))
    }

    async fn find_goal_log(&self, user_id: i64, date: NaiveDate) -> PortResult<Option<GoalLog>> {
        let sql = format!("SELECT {} FROM goal_logs WHERE user_id = $1 AND log_date = $2", GOAL_LOG_COLUMNS);
        sqlx::query_as::<_, GoalLogRecord>(&sql)
            .bind(user_id)
            .bind(date)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?
            .map(GoalLogRecord::to_domain)
            .transpose()
    }

    async fn get_goal_log(&self, goal_log_id: i64) -> PortResult<GoalLog> {
        let sql = format!("SELECT {} FROM goal_logs WHERE id = $1", GOAL_LOG_COLUMNS);
        sqlx::query_as::<_, GoalLogRecord>(&sql)
            .bind(goal_log_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?
            .ok_or_else(|| PortError::NotFound(format!("Goal log {} not found", goal_log_id)))?
            .to_domain()
    }

    async fn insert_goal_log(&self, log: NewGoalLog) -> PortResult<GoalLog> {
        let sql = format!(
            "INSERT INTO goal_logs (user_id, log_date, target_count) VALUES ($1, $2, $3) \
             ON CONFLICT (user_id, log_date) DO NOTHING RETURNING {}",
            GOAL_LOG_COLUMNS
        );
        sqlx::query_as::<_, GoalLogRecord>(&sql)
            .bind(log.user_id)
            .bind(log.date)
            .bind(log.target_count)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?
            .ok_or_else(|| {
                PortError::Duplicate(format!(
                    "goal log for user {} on {} already exists",
                    log.user_id, log.date
                ))
            })?
            .to_domain()
    }

    async fn update_goal_log(&self, log: &GoalLog, expected_version: i64) -> PortResult<bool> {
        let result = sqlx::query(
            "UPDATE goal_logs SET current_count = $3, status = $4, version = $2 + 1 \
             WHERE id = $1 AND version = $2",
        )
        .bind(log.id)
        .bind(expected_version)
        .bind(log.current_count)
        .bind(log.status.as_str())
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_users_with_goals(&self) -> PortResult<Vec<i64>> {
        sqlx::query_scalar::<_, i64>("SELECT DISTINCT user_id FROM goals ORDER BY user_id")
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)
    }
}

//=========================================================================================
// `QuizStore` Implementation
//=========================================================================================

#[async_trait]
impl QuizStore for DbAdapter {
    async fn find_quiz_by_article(&self, article_id: i64) -> PortResult<Option<Quiz>> {
        let record = sqlx::query_as::<_, QuizRecord>(
            "SELECT id, article_id, answer, description FROM quizzes WHERE article_id = $1",
        )
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(QuizRecord::to_domain))
    }

    async fn insert_quiz(&self, quiz: NewQuiz) -> PortResult<Quiz> {
        let record = sqlx::query_as::<_, QuizRecord>(
            "INSERT INTO quizzes (article_id, answer, description) VALUES ($1, $2, $3) \
             ON CONFLICT (article_id) DO NOTHING RETURNING id, article_id, answer, description",
        )
        .bind(quiz.article_id)
        .bind(quiz.answer)
        .bind(&quiz.description)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::Duplicate(format!("quiz for article {} already exists", quiz.article_id)))?;
        Ok(record.to_domain())
    }
}

//=========================================================================================
// `ProgressStore` Implementation
//=========================================================================================

#[async_trait]
impl ProgressStore for DbAdapter {
    async fn get_or_create_progress(&self, user_id: i64) -> PortResult<Progress> {
        sqlx::query("INSERT INTO progress (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;

        let sql = format!("SELECT {} FROM progress WHERE user_id = $1", PROGRESS_COLUMNS);
        let record = sqlx::query_as::<_, ProgressRecord>(&sql)
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn credit_progress(
        &self,
        progress: &Progress,
        expected_version: i64,
        article_id: i64,
    ) -> PortResult<ProgressCredit> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        // The row lock taken here makes a concurrent credit of the same article
        // wait and then see the marker already set.
        let claimed = sqlx::query("UPDATE articles SET progress_credited = true WHERE id = $1 AND NOT progress_credited")
            .bind(article_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?
            .rows_affected();
        if claimed == 0 {
            tx.rollback().await.map_err(unexpected)?;
            return Ok(ProgressCredit::AlreadyCredited);
        }

        let updated = sqlx::query(
            "UPDATE progress SET value = $3, level = $4, completed_today = $5, version = $2 + 1 \
             WHERE user_id = $1 AND version = $2",
        )
        .bind(progress.user_id)
        .bind(expected_version)
        .bind(progress.value)
        .bind(progress.level)
        .bind(progress.completed_today)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?
        .rows_affected();
        if updated == 0 {
            tx.rollback().await.map_err(unexpected)?;
            return Ok(ProgressCredit::Conflict);
        }

        tx.commit().await.map_err(unexpected)?;
        Ok(ProgressCredit::Applied)
    }

    async fn reset_completed_today(&self) -> PortResult<u64> {
        let result = sqlx::query(
            "UPDATE progress SET completed_today = false, version = version + 1 WHERE completed_today",
        )
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(result.rows_affected())
    }
}
