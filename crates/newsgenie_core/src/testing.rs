//! Testing utilities: in-memory ports that behave like the real adapters.
//!
//! The store enforces the same uniqueness, sticky-grade and version rules as
//! the Postgres adapter, so race-safety can be exercised without a database.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::domain::{
    Article, ArticleStatus, Goal, GoalLog, GoalLogStatus, GradedArticle, NewArticle, NewGoal,
    NewGoalLog, NewQuiz, Progress, Quiz, SegmentAnnotation, TermExplanation,
};
use crate::ports::{
    AnnotationStore, ArticleStore, Clock, GoalStore, HttpResponse, HttpTransport, LlmOracle,
    PortError, PortResult, ProgressCredit, ProgressStore, QuizStore,
};

//=========================================================================================
// In-memory store
//=========================================================================================

#[derive(Default)]
struct State {
    next_id: i64,
    users: Vec<i64>,
    articles: HashMap<i64, Article>,
    annotations: HashMap<i64, SegmentAnnotation>,
    goals: Vec<Goal>,
    goal_logs: HashMap<i64, GoalLog>,
    quizzes: HashMap<i64, Quiz>,
    progress: HashMap<i64, Progress>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn push_goal(&mut self, goal: NewGoal) -> Goal {
        if !self.users.contains(&goal.user_id) {
            self.users.push(goal.user_id);
        }
        let stored = Goal {
            id: self.next_id(),
            user_id: goal.user_id,
            domain: goal.domain,
            numbers: goal.numbers,
            created_at: Utc::now(),
        };
        self.goals.push(stored.clone());
        stored
    }
}

/// Store for all persistence ports, held in memory.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
    yield_on_access: AtomicBool,
    fail_credit: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call yield to the scheduler first, so concurrent tasks interleave
    /// between a read and the write that depends on it.
    pub fn set_conflict_yield(&self, enabled: bool) {
        self.yield_on_access.store(enabled, Ordering::SeqCst);
    }

    /// Makes `credit_progress` fail as a lost database connection would.
    pub fn set_credit_failure(&self, enabled: bool) {
        self.fail_credit.store(enabled, Ordering::SeqCst);
    }

    pub fn seed_goal(&self, user_id: i64, domain: &str, numbers: i32) -> Goal {
        self.lock().push_goal(NewGoal {
            user_id,
            domain: domain.to_string(),
            numbers,
        })
    }

    pub fn user_count(&self) -> usize {
        self.lock().users.len()
    }

    pub fn seed_progress(&self, user_id: i64, value: i32) -> Progress {
        let mut state = self.lock();
        let progress = Progress {
            id: state.next_id(),
            user_id,
            value,
            level: crate::domain::level_for(value),
            completed_today: false,
            version: 0,
        };
        state.progress.insert(user_id, progress.clone());
        progress
    }

    pub fn article_count(&self) -> usize {
        self.lock().articles.len()
    }

    pub fn annotation_count(&self) -> usize {
        self.lock().annotations.len()
    }

    pub fn goal_log_count(&self) -> usize {
        self.lock().goal_logs.len()
    }

    pub fn quiz_count(&self) -> usize {
        self.lock().quizzes.len()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("in-memory store poisoned")
    }

    async fn pause(&self) {
        if self.yield_on_access.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl ArticleStore for InMemoryStore {
    async fn create_article(&self, article: NewArticle) -> PortResult<Article> {
        self.pause().await;
        let mut state = self.lock();
        let stored = Article {
            id: state.next_id(),
            user_id: article.user_id,
            goal_log_id: article.goal_log_id,
            url: article.url,
            title: article.title,
            segments: article.segments,
            status: ArticleStatus::Noread,
            progress_credited: false,
            created_at: Utc::now(),
        };
        state.articles.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_article(&self, article_id: i64) -> PortResult<Article> {
        self.pause().await;
        self.lock()
            .articles
            .get(&article_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Article {} not found", article_id)))
    }

    async fn record_grade(&self, article_id: i64, status: ArticleStatus) -> PortResult<GradedArticle> {
        self.pause().await;
        let mut state = self.lock();
        let article = state
            .articles
            .get_mut(&article_id)
            .ok_or_else(|| PortError::NotFound(format!("Article {} not found", article_id)))?;
        let previous_status = article.status;
        if previous_status != ArticleStatus::Correct {
            article.status = status;
        }
        Ok(GradedArticle {
            article: article.clone(),
            previous_status,
        })
    }

    async fn count_articles_in_log(&self, goal_log_id: i64, status: ArticleStatus) -> PortResult<i64> {
        self.pause().await;
        let count = self
            .lock()
            .articles
            .values()
            .filter(|a| a.goal_log_id == Some(goal_log_id) && a.status == status)
            .count();
        Ok(count as i64)
    }
}

#[async_trait]
impl AnnotationStore for InMemoryStore {
    async fn create_annotation(
        &self,
        article_id: i64,
        segment_index: i32,
        terms: Vec<TermExplanation>,
    ) -> PortResult<SegmentAnnotation> {
        self.pause().await;
        let mut state = self.lock();
        if state
            .annotations
            .values()
            .any(|a| a.article_id == article_id && a.segment_index == segment_index)
        {
            return Err(PortError::Duplicate(format!(
                "annotation ({}, {}) already exists",
                article_id, segment_index
            )));
        }
        let annotation = SegmentAnnotation {
            id: state.next_id(),
            article_id,
            segment_index,
            terms,
        };
        state.annotations.insert(annotation.id, annotation.clone());
        Ok(annotation)
    }

    async fn get_annotation(&self, article_id: i64, segment_index: i32) -> PortResult<SegmentAnnotation> {
        self.pause().await;
        self.lock()
            .annotations
            .values()
            .find(|a| a.article_id == article_id && a.segment_index == segment_index)
            .cloned()
            .ok_or_else(|| {
                PortError::NotFound(format!(
                    "Segment {} of article {} not found",
                    segment_index, article_id
                ))
            })
    }

    async fn fill_term_details(
        &self,
        annotation_id: i64,
        details: Vec<(usize, String)>,
    ) -> PortResult<SegmentAnnotation> {
        self.pause().await;
        let mut state = self.lock();
        let annotation = state
            .annotations
            .get_mut(&annotation_id)
            .ok_or_else(|| PortError::NotFound(format!("Annotation {} not found", annotation_id)))?;
        for (position, detail) in details {
            if let Some(term) = annotation.terms.get_mut(position) {
                if term.needs_detail() {
                    term.detailed_explain = Some(detail);
                }
            }
        }
        Ok(annotation.clone())
    }
}

#[async_trait]
impl GoalStore for InMemoryStore {
    async fn create_goal(&self, goal: NewGoal) -> PortResult<Goal> {
        self.pause().await;
        Ok(self.lock().push_goal(goal))
    }

    async fn find_active_goal(&self, user_id: i64) -> PortResult<Option<Goal>> {
        self.pause().await;
        Ok(self
            .lock()
            .goals
            .iter()
            .filter(|g| g.user_id == user_id)
            .max_by_key(|g| (g.created_at, g.id))
            .cloned())
    }

    async fn find_goal_log(&self, user_id: i64, date: NaiveDate) -> PortResult<Option<GoalLog>> {
        self.pause().await;
        Ok(self
            .lock()
            .goal_logs
            .values()
            .find(|l| l.user_id == user_id && l.date == date)
            .cloned())
    }

    async fn get_goal_log(&self, goal_log_id: i64) -> PortResult<GoalLog> {
        self.pause().await;
        self.lock()
            .goal_logs
            .get(&goal_log_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Goal log {} not found", goal_log_id)))
    }

    async fn insert_goal_log(&self, log: NewGoalLog) -> PortResult<GoalLog> {
        self.pause().await;
        let mut state = self.lock();
        if state
            .goal_logs
            .values()
            .any(|l| l.user_id == log.user_id && l.date == log.date)
        {
            return Err(PortError::Duplicate(format!(
                "goal log for user {} on {} already exists",
                log.user_id, log.date
            )));
        }
        let stored = GoalLog {
            id: state.next_id(),
            user_id: log.user_id,
            date: log.date,
            target_count: log.target_count,
            current_count: 0,
            status: GoalLogStatus::InProgress,
            version: 0,
        };
        state.goal_logs.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn update_goal_log(&self, log: &GoalLog, expected_version: i64) -> PortResult<bool> {
        self.pause().await;
        let mut state = self.lock();
        let stored = state
            .goal_logs
            .get_mut(&log.id)
            .ok_or_else(|| PortError::NotFound(format!("Goal log {} not found", log.id)))?;
        if stored.version != expected_version {
            return Ok(false);
        }
        stored.current_count = log.current_count;
        stored.status = log.status;
        stored.version = expected_version + 1;
        Ok(true)
    }

    async fn list_users_with_goals(&self) -> PortResult<Vec<i64>> {
        self.pause().await;
        let mut users: Vec<i64> = self.lock().goals.iter().map(|g| g.user_id).collect();
        users.sort_unstable();
        users.dedup();
        Ok(users)
    }
}

#[async_trait]
impl QuizStore for InMemoryStore {
    async fn find_quiz_by_article(&self, article_id: i64) -> PortResult<Option<Quiz>> {
        self.pause().await;
        Ok(self.lock().quizzes.get(&article_id).cloned())
    }

    async fn insert_quiz(&self, quiz: NewQuiz) -> PortResult<Quiz> {
        self.pause().await;
        let mut state = self.lock();
        if state.quizzes.contains_key(&quiz.article_id) {
            return Err(PortError::Duplicate(format!(
                "quiz for article {} already exists",
                quiz.article_id
            )));
        }
        let stored = Quiz {
            id: state.next_id(),
            article_id: quiz.article_id,
            answer: quiz.answer,
            description: quiz.description,
        };
        state.quizzes.insert(stored.article_id, stored.clone());
        Ok(stored)
    }
}

#[async_trait]
impl ProgressStore for InMemoryStore {
    async fn get_or_create_progress(&self, user_id: i64) -> PortResult<Progress> {
        self.pause().await;
        let mut state = self.lock();
        if let Some(existing) = state.progress.get(&user_id) {
            return Ok(existing.clone());
        }
        let created = Progress {
            id: state.next_id(),
            user_id,
            value: 0,
            level: 1,
            completed_today: false,
            version: 0,
        };
        state.progress.insert(user_id, created.clone());
        Ok(created)
    }

    async fn credit_progress(
        &self,
        progress: &Progress,
        expected_version: i64,
        article_id: i64,
    ) -> PortResult<ProgressCredit> {
        self.pause().await;
        if self.fail_credit.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("connection reset while crediting progress".to_string()));
        }
        let mut state = self.lock();
        let credited = state
            .articles
            .get(&article_id)
            .ok_or_else(|| PortError::NotFound(format!("Article {} not found", article_id)))?
            .progress_credited;
        if credited {
            return Ok(ProgressCredit::AlreadyCredited);
        }
        let stored = state
            .progress
            .get_mut(&progress.user_id)
            .ok_or_else(|| PortError::NotFound(format!("Progress of user {} not found", progress.user_id)))?;
        if stored.version != expected_version {
            return Ok(ProgressCredit::Conflict);
        }
        stored.value = progress.value;
        stored.level = progress.level;
        stored.completed_today = progress.completed_today;
        stored.version = expected_version + 1;
        if let Some(article) = state.articles.get_mut(&article_id) {
            article.progress_credited = true;
        }
        Ok(ProgressCredit::Applied)
    }

    async fn reset_completed_today(&self) -> PortResult<u64> {
        self.pause().await;
        let mut reset = 0;
        for progress in self.lock().progress.values_mut() {
            if progress.completed_today {
                progress.completed_today = false;
                progress.version += 1;
                reset += 1;
            }
        }
        Ok(reset)
    }
}

//=========================================================================================
// Scripted oracle
//=========================================================================================

type Script = dyn Fn(&str, &str) -> PortResult<String> + Send + Sync;

/// An oracle whose answers come from a closure over (system prompt, user text).
pub struct ScriptedOracle {
    script: Box<Script>,
    latency: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedOracle {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&str, &str) -> PortResult<String> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            latency: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Every call sleeps this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmOracle for ScriptedOracle {
    async fn complete(&self, system_prompt: &str, user_text: &str) -> PortResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let answer = (self.script)(system_prompt, user_text);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        answer
    }
}

//=========================================================================================
// Stub transport and clock
//=========================================================================================

/// A transport that answers every GET with the same canned response.
pub struct StubTransport {
    response: HttpResponse,
    latency: Option<Duration>,
    calls: AtomicUsize,
    last_user_agent: Mutex<Option<String>>,
}

impl StubTransport {
    pub fn ok(body: &str) -> Self {
        Self::status(200, body)
    }

    pub fn status(status: u16, body: &str) -> Self {
        Self {
            response: HttpResponse {
                status,
                body: body.to_string(),
            },
            latency: None,
            calls: AtomicUsize::new(0),
            last_user_agent: Mutex::new(None),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_user_agent(&self) -> Option<String> {
        self.last_user_agent.lock().expect("stub transport poisoned").clone()
    }
}

#[async_trait]
impl HttpTransport for StubTransport {
    async fn get(&self, _url: &str, headers: &[(&str, &str)], _timeout: Duration) -> PortResult<HttpResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let agent = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("user-agent"))
            .map(|(_, value)| value.to_string());
        *self.last_user_agent.lock().expect("stub transport poisoned") = agent;

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        Ok(self.response.clone())
    }
}

/// A clock stuck on one date until moved.
pub struct FixedClock {
    today: Mutex<NaiveDate>,
}

impl FixedClock {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            today: Mutex::new(today),
        }
    }

    pub fn set(&self, today: NaiveDate) {
        *self.today.lock().expect("fixed clock poisoned") = today;
    }
}

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        *self.today.lock().expect("fixed clock poisoned")
    }
}
