//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    Json,
};
use newsgenie_core::domain::{Goal, Quiz, Segment, TermExplanation, TermKind};
use newsgenie_core::goals::GoalAdvance;
use newsgenie_core::pipeline::{AnalysisResult, AnnotatedSegment, SegmentDetail};
use newsgenie_core::ports::PortError;
use newsgenie_core::quiz::{GeneratedQuiz, QuizGrade};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{OpenApi, ToSchema};

use crate::error::ApiError;
use crate::web::envelope::{ApiSuccess, Envelope, ErrorBody};
use crate::web::middleware::UserId;
use crate::web::state::AppState;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        create_goal_handler,
        analyze_handler,
        segment_detail_handler,
        get_quiz_handler,
        generate_quiz_handler,
        submit_quiz_handler,
    ),
    components(
        schemas(
            CreateGoalRequest,
            GoalResponse,
            AnalyzeRequest,
            AnalyzeResponse,
            SegmentDto,
            SegmentAnnotationDto,
            TermDto,
            SegmentDetailResponse,
            QuizView,
            GeneratedQuizResponse,
            SubmitAnswerRequest,
            QuizResultResponse,
            GoalStateDto,
            GoalLogDto,
            ProgressDto,
            ErrorBody,
        )
    ),
    tags(
        (name = "goals", description = "Daily reading targets."),
        (name = "news", description = "Article analysis and term explanations."),
        (name = "quiz", description = "True/false quizzes and daily goal progress.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Request and Response Structs
//=========================================================================================

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateGoalRequest {
    /// News domain the user wants to follow, e.g. `Politics`.
    pub domain: String,
    /// Articles to read correctly per day; at least 1.
    pub numbers: i32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GoalResponse {
    pub id: i64,
    pub domain: String,
    pub numbers: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AnalyzeRequest {
    /// Absolute http(s) URL of the news article.
    pub article_url: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SegmentDto {
    pub id: i32,
    pub text: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TermDto {
    /// One of `person`, `organization`, `domain_term`.
    pub kind: String,
    pub keyword: String,
    pub short_explain: String,
    pub detailed_explain: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SegmentAnnotationDto {
    pub annotation_id: i64,
    pub segment_index: i32,
    pub terms: Vec<TermDto>,
    /// True when term extraction failed and the list was stored empty.
    pub extraction_failed: bool,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    pub article_id: i64,
    pub title: String,
    pub segments: Vec<SegmentDto>,
    pub annotations: Vec<SegmentAnnotationDto>,
    pub incomplete_segments: Vec<i32>,
}

#[derive(Debug, Deserialize)]
pub struct DetailQuery {
    /// Generate missing detailed explanations before answering.
    #[serde(default)]
    pub detail: bool,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SegmentDetailResponse {
    pub annotation_id: i64,
    pub segment_index: i32,
    pub terms: Vec<TermDto>,
    pub has_full_detail: bool,
}

/// A stored quiz statement, without its answer.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuizView {
    pub article_id: i64,
    pub description: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedQuizResponse {
    pub quiz_id: i64,
    pub article_id: i64,
    /// true = O, false = X.
    pub answer: bool,
    pub description: String,
    pub is_existing: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitAnswerRequest {
    pub answer: bool,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GoalLogDto {
    pub id: i64,
    pub status: String,
    pub current_count: i32,
    pub target_count: i32,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProgressDto {
    pub value: i32,
    pub level: i32,
    pub completed_today: bool,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GoalStateDto {
    pub goal_log: Option<GoalLogDto>,
    pub newly_completed: bool,
    pub progress: ProgressDto,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuizResultResponse {
    pub is_correct: bool,
    pub correct_answer: bool,
    pub description: String,
    pub article_status: String,
    /// Present only when this submission credited the daily goal.
    pub goal: Option<GoalStateDto>,
}

//=========================================================================================
// Domain to DTO Conversions
//=========================================================================================

fn kind_label(kind: TermKind) -> &'static str {
    match kind {
        TermKind::Person => "person",
        TermKind::Organization => "organization",
        TermKind::DomainTerm => "domain_term",
    }
}

impl From<Goal> for GoalResponse {
    fn from(goal: Goal) -> Self {
        Self {
            id: goal.id,
            domain: goal.domain,
            numbers: goal.numbers,
        }
    }
}

impl From<TermExplanation> for TermDto {
    fn from(term: TermExplanation) -> Self {
        Self {
            kind: kind_label(term.kind).to_string(),
            keyword: term.keyword,
            short_explain: term.short_explain,
            detailed_explain: term.detailed_explain,
        }
    }
}

impl From<Segment> for SegmentDto {
    fn from(segment: Segment) -> Self {
        Self {
            id: segment.index,
            text: segment.text,
        }
    }
}

impl From<AnnotatedSegment> for SegmentAnnotationDto {
    fn from(annotated: AnnotatedSegment) -> Self {
        Self {
            annotation_id: annotated.annotation.id,
            segment_index: annotated.annotation.segment_index,
            terms: annotated.annotation.terms.into_iter().map(TermDto::from).collect(),
            extraction_failed: annotated.extraction_failed,
        }
    }
}

impl From<AnalysisResult> for AnalyzeResponse {
    fn from(result: AnalysisResult) -> Self {
        Self {
            article_id: result.article_id,
            title: result.title,
            segments: result.segments.into_iter().map(SegmentDto::from).collect(),
            annotations: result.annotations.into_iter().map(SegmentAnnotationDto::from).collect(),
            incomplete_segments: result.incomplete_segments,
        }
    }
}

impl From<SegmentDetail> for SegmentDetailResponse {
    fn from(detail: SegmentDetail) -> Self {
        Self {
            annotation_id: detail.annotation_id,
            segment_index: detail.segment_index,
            terms: detail.terms.into_iter().map(TermDto::from).collect(),
            has_full_detail: detail.has_full_detail,
        }
    }
}

impl From<Quiz> for QuizView {
    fn from(quiz: Quiz) -> Self {
        Self {
            article_id: quiz.article_id,
            description: quiz.description,
        }
    }
}

impl From<GeneratedQuiz> for GeneratedQuizResponse {
    fn from(generated: GeneratedQuiz) -> Self {
        Self {
            quiz_id: generated.quiz.id,
            article_id: generated.quiz.article_id,
            answer: generated.quiz.answer,
            description: generated.quiz.description,
            is_existing: generated.is_existing,
        }
    }
}

impl From<GoalAdvance> for GoalStateDto {
    fn from(advance: GoalAdvance) -> Self {
        Self {
            goal_log: advance.goal_log.map(|log| GoalLogDto {
                id: log.id,
                status: log.status.as_str().to_string(),
                current_count: log.current_count,
                target_count: log.target_count,
            }),
            newly_completed: advance.newly_completed,
            progress: ProgressDto {
                value: advance.progress.value,
                level: advance.progress.level,
                completed_today: advance.progress.completed_today,
            },
        }
    }
}

impl From<QuizGrade> for QuizResultResponse {
    fn from(grade: QuizGrade) -> Self {
        Self {
            is_correct: grade.is_correct,
            correct_answer: grade.correct_answer,
            description: grade.description,
            article_status: grade.article_status.as_str().to_string(),
            goal: grade.goal.map(GoalStateDto::from),
        }
    }
}

//=========================================================================================
// Extractor Rejections
//=========================================================================================

fn bad_request(message: String) -> ApiError {
    ApiError::Port(PortError::Validation(message))
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value).map_err(|e| bad_request(e.body_text()))
}

fn path_params<T>(path: Result<Path<T>, PathRejection>) -> Result<T, ApiError> {
    path.map(|Path(value)| value).map_err(|e| bad_request(e.body_text()))
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Set the caller's daily reading goal.
///
/// The newest goal is the active one; it applies from the next daily log.
#[utoipa::path(
    post,
    path = "/goals",
    tag = "goals",
    request_body = CreateGoalRequest,
    responses(
        (status = 201, description = "Goal stored", body = Envelope<GoalResponse>),
        (status = 400, description = "Empty domain or numbers below 1", body = ErrorBody),
        (status = 401, description = "Missing x-user-id header", body = ErrorBody)
    ),
    params(
        ("x-user-id" = i64, Header, description = "Numeric id of the calling user.")
    )
)]
pub async fn create_goal_handler(
    State(state): State<Arc<AppState>>,
    user: UserId,
    body: Result<Json<CreateGoalRequest>, JsonRejection>,
) -> Result<ApiSuccess<GoalResponse>, ApiError> {
    let request = json_body(body)?;
    let goal = state.goals.set_goal(user.0, &request.domain, request.numbers).await?;
    Ok(ApiSuccess::created(goal.into()))
}

/// Fetch, segment and annotate a news article.
///
/// Creates today's goal log on first use; the caller must have a reading goal.
#[utoipa::path(
    post,
    path = "/news/analyze",
    tag = "news",
    request_body = AnalyzeRequest,
    responses(
        (status = 200, description = "Article analysed; check incompleteSegments for degraded segments", body = Envelope<AnalyzeResponse>),
        (status = 400, description = "Invalid URL or no extractable text", body = ErrorBody),
        (status = 401, description = "Missing x-user-id header", body = ErrorBody),
        (status = 404, description = "User has no reading goal", body = ErrorBody),
        (status = 502, description = "Model answer violated the JSON contract", body = ErrorBody),
        (status = 503, description = "Article site or model unavailable", body = ErrorBody),
        (status = 504, description = "Article site or model timed out", body = ErrorBody)
    ),
    params(
        ("x-user-id" = i64, Header, description = "Numeric id of the calling user.")
    )
)]
pub async fn analyze_handler(
    State(state): State<Arc<AppState>>,
    user: UserId,
    body: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<ApiSuccess<AnalyzeResponse>, ApiError> {
    let request = json_body(body)?;
    let result = state.analysis.analyze_from_url(user.0, &request.article_url).await?;
    Ok(ApiSuccess::ok(result.into()))
}

/// Term explanations of one segment, optionally expanded with detail.
#[utoipa::path(
    get,
    path = "/news/{article_id}/{segment_index}",
    tag = "news",
    responses(
        (status = 200, description = "Segment annotation", body = Envelope<SegmentDetailResponse>),
        (status = 404, description = "Article or segment unknown to the caller", body = ErrorBody)
    ),
    params(
        ("article_id" = i64, Path, description = "Article id."),
        ("segment_index" = i32, Path, description = "Segment index within the article."),
        ("detail" = Option<bool>, Query, description = "Fill missing detailed explanations first."),
        ("x-user-id" = i64, Header, description = "Numeric id of the calling user.")
    )
)]
pub async fn segment_detail_handler(
    State(state): State<Arc<AppState>>,
    user: UserId,
    path: Result<Path<(i64, i32)>, PathRejection>,
    query: Result<Query<DetailQuery>, QueryRejection>,
) -> Result<ApiSuccess<SegmentDetailResponse>, ApiError> {
    let (article_id, segment_index) = path_params(path)?;
    let Query(query) = query.map_err(|e| bad_request(e.body_text()))?;
    let detail = state
        .analysis
        .get_segment_detail(user.0, article_id, segment_index, query.detail)
        .await?;
    Ok(ApiSuccess::ok(detail.into()))
}

/// The quiz statement of an article, without the answer.
#[utoipa::path(
    get,
    path = "/quiz/{article_id}",
    tag = "quiz",
    responses(
        (status = 200, description = "Stored quiz", body = Envelope<QuizView>),
        (status = 404, description = "No quiz generated yet", body = ErrorBody)
    ),
    params(
        ("article_id" = i64, Path, description = "Article id."),
        ("x-user-id" = i64, Header, description = "Numeric id of the calling user.")
    )
)]
pub async fn get_quiz_handler(
    State(state): State<Arc<AppState>>,
    user: UserId,
    path: Result<Path<i64>, PathRejection>,
) -> Result<ApiSuccess<QuizView>, ApiError> {
    let article_id = path_params(path)?;
    let quiz = state.quiz.get_quiz(user.0, article_id).await?;
    Ok(ApiSuccess::ok(quiz.into()))
}

/// Get or create the true/false quiz of an article.
#[utoipa::path(
    post,
    path = "/quiz/{article_id}",
    tag = "quiz",
    responses(
        (status = 200, description = "Quiz, with isExisting=true when it was already stored", body = Envelope<GeneratedQuizResponse>),
        (status = 404, description = "Article unknown", body = ErrorBody),
        (status = 502, description = "Model answer violated the JSON contract", body = ErrorBody)
    ),
    params(
        ("article_id" = i64, Path, description = "Article id."),
        ("x-user-id" = i64, Header, description = "Numeric id of the calling user.")
    )
)]
pub async fn generate_quiz_handler(
    State(state): State<Arc<AppState>>,
    user: UserId,
    path: Result<Path<i64>, PathRejection>,
) -> Result<ApiSuccess<GeneratedQuizResponse>, ApiError> {
    let article_id = path_params(path)?;
    let generated = state.quiz.generate_quiz(user.0, article_id).await?;
    Ok(ApiSuccess::ok(generated.into()))
}

/// Grade an answer and credit the daily goal for an article's correct answer once.
#[utoipa::path(
    post,
    path = "/quiz/{article_id}/submit",
    tag = "quiz",
    request_body = SubmitAnswerRequest,
    responses(
        (status = 200, description = "Grading result", body = Envelope<QuizResultResponse>),
        (status = 404, description = "Article unknown to the caller or without a quiz", body = ErrorBody),
        (status = 409, description = "Concurrent updates exhausted their retries", body = ErrorBody)
    ),
    params(
        ("article_id" = i64, Path, description = "Article id."),
        ("x-user-id" = i64, Header, description = "Numeric id of the calling user.")
    )
)]
pub async fn submit_quiz_handler(
    State(state): State<Arc<AppState>>,
    user: UserId,
    path: Result<Path<i64>, PathRejection>,
    body: Result<Json<SubmitAnswerRequest>, JsonRejection>,
) -> Result<ApiSuccess<QuizResultResponse>, ApiError> {
    let article_id = path_params(path)?;
    let request = json_body(body)?;
    let grade = state.quiz.submit_quiz(user.0, article_id, request.answer).await?;
    Ok(ApiSuccess::ok(grade.into()))
}
