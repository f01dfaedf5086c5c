//! crates/newsgenie_core/src/quiz.rs
//!
//! True/false quizzes: idempotent generation per article and grading with the
//! hand-off to the goal tracker.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument};

use crate::domain::{ArticleStatus, NewQuiz, Quiz};
use crate::goals::{GoalAdvance, GoalProgressTracker};
use crate::json_contract::LlmOracleExt;
use crate::ports::{Database, LlmOracle, PortError, PortResult};
use crate::prompts;

#[derive(Debug, Deserialize)]
struct QuizVerdict {
    answer: bool,
    description: String,
}

#[derive(Debug, Clone)]
pub struct GeneratedQuiz {
    pub quiz: Quiz,
    /// True when the quiz was already stored and the model was not asked.
    pub is_existing: bool,
}

#[derive(Debug, Clone)]
pub struct QuizGrade {
    pub is_correct: bool,
    pub correct_answer: bool,
    pub description: String,
    pub article_status: ArticleStatus,
    /// Present when this submission credited the article's correct answer.
    pub goal: Option<GoalAdvance>,
}

pub struct QuizEngine {
    oracle: Arc<dyn LlmOracle>,
    db: Arc<dyn Database>,
    goals: GoalProgressTracker,
}

impl QuizEngine {
    pub fn new(oracle: Arc<dyn LlmOracle>, db: Arc<dyn Database>, goals: GoalProgressTracker) -> Self {
        Self { oracle, db, goals }
    }

    /// The stored quiz of one of the user's articles.
    pub async fn get_quiz(&self, user_id: i64, article_id: i64) -> PortResult<Quiz> {
        self.db.get_owned_article(user_id, article_id).await?;
        self.stored_quiz(article_id).await
    }

    async fn stored_quiz(&self, article_id: i64) -> PortResult<Quiz> {
        self.db
            .find_quiz_by_article(article_id)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("Quiz for article {} not found", article_id)))
    }

    /// Get-or-create. A lost insert race returns the winner's row as existing.
    #[instrument(skip(self))]
    pub async fn generate_quiz(&self, user_id: i64, article_id: i64) -> PortResult<GeneratedQuiz> {
        let article = self.db.get_owned_article(user_id, article_id).await?;
        if let Some(quiz) = self.db.find_quiz_by_article(article_id).await? {
            debug!(article_id, quiz_id = quiz.id, "returning stored quiz");
            return Ok(GeneratedQuiz {
                quiz,
                is_existing: true,
            });
        }

        let started = Instant::now();
        let verdict: QuizVerdict = self
            .oracle
            .complete_json(prompts::GENERATE_QUIZ, &article.joined_text())
            .await?;

        let new_quiz = NewQuiz {
            article_id,
            answer: verdict.answer,
            description: verdict.description.trim().to_string(),
        };
        match self.db.insert_quiz(new_quiz).await {
            Ok(quiz) => {
                info!(
                    operation = "generate_quiz",
                    article_id,
                    quiz_id = quiz.id,
                    duration_ms = started.elapsed().as_millis() as u64,
                    outcome = "created",
                    "quiz generated"
                );
                Ok(GeneratedQuiz {
                    quiz,
                    is_existing: false,
                })
            }
            Err(PortError::Duplicate(_)) => {
                let quiz = self.db.find_quiz_by_article(article_id).await?.ok_or_else(|| {
                    PortError::Unexpected(format!("quiz for article {} vanished after conflict", article_id))
                })?;
                info!(
                    operation = "generate_quiz",
                    article_id,
                    quiz_id = quiz.id,
                    outcome = "lost_race",
                    "quiz created concurrently, returning stored one"
                );
                Ok(GeneratedQuiz {
                    quiz,
                    is_existing: true,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Grades an answer, stores the article's new status and advances goals
    /// when a correct answer on the article has not been credited yet.
    #[instrument(skip(self))]
    pub async fn submit_quiz(&self, user_id: i64, article_id: i64, answer: bool) -> PortResult<QuizGrade> {
        let quiz = self.get_quiz(user_id, article_id).await?;

        let is_correct = quiz.answer == answer;
        let status = if is_correct {
            ArticleStatus::Correct
        } else {
            ArticleStatus::Wrong
        };
        let graded = self.db.record_grade(article_id, status).await?;

        // A failed hand-off leaves the article uncredited, so the next correct
        // submission runs it again.
        let goal = if is_correct && graded.awaits_credit() {
            self.goals.record_correct_answer(&graded.article).await?
        } else {
            None
        };

        info!(
            operation = "submit_quiz",
            article_id,
            is_correct,
            status = graded.article.status.as_str(),
            became_correct = graded.became_correct(),
            advanced = goal.is_some(),
            outcome = "graded",
            "quiz graded"
        );
        Ok(QuizGrade {
            is_correct,
            correct_answer: quiz.answer,
            description: quiz.description,
            article_status: graded.article.status,
            goal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{GoalLogStatus, NewArticle, Segment};
    use crate::ports::{ArticleStore, GoalStore, ProgressStore};
    use crate::testing::{FixedClock, InMemoryStore, ScriptedOracle};
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct Fixture {
        db: Arc<InMemoryStore>,
        tracker: GoalProgressTracker,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(InMemoryStore::new());
        let clock = Arc::new(FixedClock::new(NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()));
        let tracker = GoalProgressTracker::new(db.clone(), clock);
        Fixture { db, tracker }
    }

    impl Fixture {
        fn engine(&self, oracle: Arc<ScriptedOracle>) -> QuizEngine {
            QuizEngine::new(oracle, self.db.clone(), self.tracker.clone())
        }

        async fn article(&self, goal_log_id: Option<i64>) -> i64 {
            self.db
                .create_article(NewArticle {
                    user_id: 1,
                    goal_log_id,
                    url: "https://example.com/n/1".to_string(),
                    title: "Rates rise".to_string(),
                    segments: vec![
                        Segment {
                            index: 0,
                            text: "Rates rise".to_string(),
                        },
                        Segment {
                            index: 1,
                            text: "The central bank raised rates.".to_string(),
                        },
                    ],
                })
                .await
                .unwrap()
                .id
        }
    }

    fn quiz_oracle(answer: bool) -> Arc<ScriptedOracle> {
        Arc::new(ScriptedOracle::new(move |_, _| {
            Ok(format!(
                "Here you go:\n```json\n{{\"answer\": {}, \"description\": \"The bank raised rates.\"}}\n```",
                answer
            ))
        }))
    }

    #[tokio::test]
    async fn generates_once_then_returns_existing() {
        let fx = fixture();
        let article_id = fx.article(None).await;
        let oracle = quiz_oracle(true);
        let engine = fx.engine(oracle.clone());

        let first = engine.generate_quiz(1, article_id).await.unwrap();
        let second = engine.generate_quiz(1, article_id).await.unwrap();

        assert!(!first.is_existing);
        assert!(second.is_existing);
        assert_eq!(first.quiz.id, second.quiz.id);
        assert_eq!(oracle.calls(), 1);
    }

    #[tokio::test]
    async fn prompt_receives_joined_segments() {
        let fx = fixture();
        let article_id = fx.article(None).await;
        let oracle = Arc::new(ScriptedOracle::new(|system, user| {
            assert_eq!(system, prompts::GENERATE_QUIZ);
            assert_eq!(user, "Rates rise\nThe central bank raised rates.");
            Ok(r#"{"answer": false, "description": "d"}"#.to_string())
        }));

        let generated = fx.engine(oracle).generate_quiz(1, article_id).await.unwrap();
        assert!(!generated.quiz.answer);
    }

    #[tokio::test]
    async fn concurrent_generation_persists_one_quiz() {
        let fx = fixture();
        let article_id = fx.article(None).await;
        let flip = Arc::new(AtomicBool::new(false));
        let oracle = {
            let flip = flip.clone();
            Arc::new(
                ScriptedOracle::new(move |_, _| {
                    let answer = flip.fetch_xor(true, Ordering::SeqCst);
                    Ok(format!(r#"{{"answer": {}, "description": "v{}"}}"#, answer, answer))
                })
                .with_latency(Duration::from_millis(20)),
            )
        };
        let engine = fx.engine(oracle.clone());

        let (a, b) = tokio::join!(engine.generate_quiz(1, article_id), engine.generate_quiz(1, article_id));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(fx.db.quiz_count(), 1);
        assert_eq!(oracle.calls(), 2);
        assert_ne!(a.is_existing, b.is_existing);
        assert_eq!(a.quiz.id, b.quiz.id);
        assert_eq!(a.quiz.answer, b.quiz.answer);
        assert_eq!(a.quiz.description, b.quiz.description);
    }

    #[tokio::test]
    async fn missing_article_is_not_found() {
        let fx = fixture();
        let err = fx.engine(quiz_oracle(true)).generate_quiz(1, 404).await.unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));
    }

    #[tokio::test]
    async fn malformed_quiz_is_fatal_and_nothing_is_stored() {
        let fx = fixture();
        let article_id = fx.article(None).await;
        let oracle = Arc::new(ScriptedOracle::new(|_, _| Ok("{\"answer\": maybe}".to_string())));

        let err = fx.engine(oracle).generate_quiz(1, article_id).await.unwrap_err();

        assert!(matches!(err, PortError::JsonContract(_)));
        assert_eq!(fx.db.quiz_count(), 0);
    }

    #[tokio::test]
    async fn submit_without_quiz_is_not_found() {
        let fx = fixture();
        let article_id = fx.article(None).await;
        let err = fx.engine(quiz_oracle(true)).submit_quiz(1, article_id, true).await.unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));
    }

    #[tokio::test]
    async fn wrong_answer_marks_wrong_and_leaves_goals_alone() {
        let fx = fixture();
        fx.db.seed_goal(1, "economy", 1);
        let log = fx.tracker.get_or_create_today_log(1).await.unwrap();
        let article_id = fx.article(Some(log.id)).await;
        let engine = fx.engine(quiz_oracle(true));
        engine.generate_quiz(1, article_id).await.unwrap();

        let grade = engine.submit_quiz(1, article_id, false).await.unwrap();

        assert!(!grade.is_correct);
        assert!(grade.correct_answer);
        assert_eq!(grade.article_status, ArticleStatus::Wrong);
        assert!(grade.goal.is_none());
        let stored = fx.db.get_goal_log(log.id).await.unwrap();
        assert_eq!(stored.current_count, 0);
        assert_eq!(stored.status, GoalLogStatus::InProgress);
    }

    #[tokio::test]
    async fn correct_answer_completes_single_article_goal() {
        let fx = fixture();
        fx.db.seed_goal(1, "economy", 1);
        let log = fx.tracker.get_or_create_today_log(1).await.unwrap();
        let article_id = fx.article(Some(log.id)).await;
        let engine = fx.engine(quiz_oracle(false));
        engine.generate_quiz(1, article_id).await.unwrap();

        let grade = engine.submit_quiz(1, article_id, false).await.unwrap();

        assert!(grade.is_correct);
        assert_eq!(grade.article_status, ArticleStatus::Correct);
        let goal = grade.goal.unwrap();
        assert!(goal.newly_completed);
        assert_eq!(goal.goal_log.unwrap().status, GoalLogStatus::Completed);
        assert_eq!(goal.progress.value, 1);
        assert!(goal.progress.completed_today);
    }

    #[tokio::test]
    async fn resubmitting_never_double_counts_or_downgrades() {
        let fx = fixture();
        let article_id = fx.article(None).await;
        let engine = fx.engine(quiz_oracle(true));
        engine.generate_quiz(1, article_id).await.unwrap();

        let first = engine.submit_quiz(1, article_id, true).await.unwrap();
        let again = engine.submit_quiz(1, article_id, true).await.unwrap();
        let wrong = engine.submit_quiz(1, article_id, false).await.unwrap();

        assert_eq!(first.goal.unwrap().progress.value, 1);
        assert!(again.goal.is_none());
        assert!(!wrong.is_correct);
        assert_eq!(wrong.article_status, ArticleStatus::Correct);
    }

    #[tokio::test]
    async fn failed_hand_off_is_credited_on_the_next_correct_answer() {
        let fx = fixture();
        fx.db.seed_goal(1, "economy", 1);
        let log = fx.tracker.get_or_create_today_log(1).await.unwrap();
        let article_id = fx.article(Some(log.id)).await;
        let engine = fx.engine(quiz_oracle(true));
        engine.generate_quiz(1, article_id).await.unwrap();

        fx.db.set_credit_failure(true);
        let err = engine.submit_quiz(1, article_id, true).await.unwrap_err();
        assert!(matches!(err, PortError::Unexpected(_)));
        assert_eq!(fx.db.get_article(article_id).await.unwrap().status, ArticleStatus::Correct);
        assert_eq!(fx.db.get_or_create_progress(1).await.unwrap().value, 0);

        fx.db.set_credit_failure(false);
        let retry = engine.submit_quiz(1, article_id, true).await.unwrap();
        let goal = retry.goal.unwrap();
        assert_eq!(goal.progress.value, 1);
        assert!(goal.progress.completed_today);
        assert_eq!(goal.goal_log.unwrap().status, GoalLogStatus::Completed);

        let again = engine.submit_quiz(1, article_id, true).await.unwrap();
        assert!(again.goal.is_none());
        assert_eq!(fx.db.get_or_create_progress(1).await.unwrap().value, 1);
    }

    #[tokio::test]
    async fn other_users_articles_are_not_found() {
        let fx = fixture();
        let article_id = fx.article(None).await;
        let engine = fx.engine(quiz_oracle(true));
        engine.generate_quiz(1, article_id).await.unwrap();

        assert!(matches!(
            engine.generate_quiz(2, article_id).await.unwrap_err(),
            PortError::NotFound(_)
        ));
        assert!(matches!(engine.get_quiz(2, article_id).await.unwrap_err(), PortError::NotFound(_)));
        let err = engine.submit_quiz(2, article_id, true).await.unwrap_err();

        assert!(matches!(err, PortError::NotFound(_)));
        assert_eq!(fx.db.get_article(article_id).await.unwrap().status, ArticleStatus::Noread);
        assert_eq!(fx.db.get_or_create_progress(1).await.unwrap().value, 0);
    }
}
