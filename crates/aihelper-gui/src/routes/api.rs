use std::path::Path as FsPath;

use aihelper_core::{
    DocumentFormat, LoadOutcome, PipelineKind, PresenterState, WorkflowOutcome,
};
use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{FromRequestParts, Multipart, Path},
    http::{StatusCode, header, request::Parts},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TopicRequest {
    pub topic: String,
}

#[derive(Debug, Deserialize)]
pub struct ScrapeRequest {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct ExtractRequest {
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
}

#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    pub recipient: String,
}

#[derive(Debug, Serialize)]
pub struct PipelineInfo {
    pub id: PipelineKind,
    pub title: &'static str,
}

#[derive(Debug, Serialize)]
pub struct NewSessionResponse {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct PipelineSnapshot {
    pub pipeline: PipelineKind,
    pub title: &'static str,
    #[serde(flatten)]
    pub state: PresenterState,
}

impl PipelineSnapshot {
    fn new(pipeline: PipelineKind, state: PresenterState) -> Self {
        Self {
            pipeline,
            title: pipeline.title(),
            state,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub pipelines: Vec<PipelineSnapshot>,
}

#[derive(Debug, Serialize)]
pub struct StageOutput {
    pub key: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    pub pipeline: PipelineKind,
    pub result: String,
    pub stages: Vec<StageOutput>,
    pub trace_markdown: String,
}

impl WorkflowResponse {
    fn new(pipeline: PipelineKind, outcome: WorkflowOutcome) -> Self {
        let trace_markdown = outcome.trace_summary().render_markdown();
        Self {
            pipeline,
            result: outcome.output,
            stages: outcome
                .stage_outputs
                .into_iter()
                .map(|(key, text)| StageOutput { key, text })
                .collect(),
            trace_markdown,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TextResponse {
    pub pipeline: PipelineKind,
    pub result: String,
}

#[derive(Debug, Serialize)]
pub struct ScrapeResponse {
    pub url: String,
    pub characters: usize,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct EmailResponse {
    pub status: &'static str,
    pub subject: &'static str,
}

pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/pipelines", get(list_pipelines))
        .route("/sessions", post(create_session))
        .route("/sessions/:id", get(get_session).delete(end_session))
        .route("/sessions/:id/research", post(research))
        .route("/sessions/:id/essay", post(essay))
        .route("/sessions/:id/scrape", post(scrape))
        .route("/sessions/:id/extract", post(extract))
        .route("/sessions/:id/documents", post(upload_document))
        .route("/sessions/:id/ask", post(ask))
        .route(
            "/sessions/:id/pipelines/:pipeline",
            get(get_pipeline).delete(clear_pipeline),
        )
        .route("/sessions/:id/pipelines/:pipeline/email", post(email_result))
}

async fn list_pipelines(GuardedState(_state): GuardedState) -> Json<Vec<PipelineInfo>> {
    Json(
        PipelineKind::ALL
            .iter()
            .map(|pipeline| PipelineInfo {
                id: *pipeline,
                title: pipeline.title(),
            })
            .collect(),
    )
}

async fn create_session(
    GuardedState(_state): GuardedState,
) -> (StatusCode, Json<NewSessionResponse>) {
    (
        StatusCode::CREATED,
        Json(NewSessionResponse {
            session_id: Uuid::new_v4().to_string(),
        }),
    )
}

async fn get_session(
    GuardedState(state): GuardedState,
    Path(session_id): Path<String>,
) -> Json<SessionResponse> {
    let assistant = state.assistant();
    let pipelines = PipelineKind::ALL
        .iter()
        .map(|pipeline| PipelineSnapshot::new(*pipeline, assistant.state(&session_id, *pipeline)))
        .collect();
    Json(SessionResponse {
        session_id,
        pipelines,
    })
}

#[instrument(skip_all, fields(session_id = %session_id))]
async fn end_session(
    GuardedState(state): GuardedState,
    Path(session_id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.assistant().end_session(&session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip_all, fields(session_id = %session_id))]
async fn research(
    GuardedState(state): GuardedState,
    Path(session_id): Path<String>,
    Json(payload): Json<TopicRequest>,
) -> Result<Json<WorkflowResponse>, AppError> {
    let assistant = state.assistant();
    let outcome = state
        .run(
            &session_id,
            PipelineKind::Research,
            assistant.research(&session_id, &payload.topic),
        )
        .await?;
    Ok(Json(WorkflowResponse::new(PipelineKind::Research, outcome)))
}

#[instrument(skip_all, fields(session_id = %session_id))]
async fn essay(
    GuardedState(state): GuardedState,
    Path(session_id): Path<String>,
    Json(payload): Json<TopicRequest>,
) -> Result<Json<WorkflowResponse>, AppError> {
    let assistant = state.assistant();
    let outcome = state
        .run(
            &session_id,
            PipelineKind::Essay,
            assistant.write_essay(&session_id, &payload.topic),
        )
        .await?;
    Ok(Json(WorkflowResponse::new(PipelineKind::Essay, outcome)))
}

#[instrument(skip_all, fields(session_id = %session_id))]
async fn scrape(
    GuardedState(state): GuardedState,
    Path(session_id): Path<String>,
    Json(payload): Json<ScrapeRequest>,
) -> Result<Json<ScrapeResponse>, AppError> {
    let assistant = state.assistant();
    let content = state
        .run(
            &session_id,
            PipelineKind::WebScraper,
            assistant.scrape(&session_id, &payload.url),
        )
        .await?;
    Ok(Json(ScrapeResponse {
        url: payload.url.trim().to_string(),
        characters: content.chars().count(),
        content,
    }))
}

#[instrument(skip_all, fields(session_id = %session_id))]
async fn extract(
    GuardedState(state): GuardedState,
    Path(session_id): Path<String>,
    Json(payload): Json<ExtractRequest>,
) -> Result<Json<TextResponse>, AppError> {
    let assistant = state.assistant();
    let result = state
        .run(
            &session_id,
            PipelineKind::WebScraper,
            assistant.extract(&session_id, &payload.description),
        )
        .await?;
    Ok(Json(TextResponse {
        pipeline: PipelineKind::WebScraper,
        result,
    }))
}

/// Multipart upload with a single `file` field.
#[instrument(skip_all, fields(session_id = %session_id))]
async fn upload_document(
    GuardedState(state): GuardedState,
    Path(session_id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<LoadOutcome>, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("invalid upload: {err}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let name = field.file_name().unwrap_or("document").to_string();
        // Browsers fall back to octet-stream for types they do not know.
        let format = match field.content_type() {
            Some(mime) if mime != "application/octet-stream" => DocumentFormat::from_mime(mime),
            _ => DocumentFormat::from_path(FsPath::new(&name)),
        }?;
        let bytes = field
            .bytes()
            .await
            .map_err(|err| AppError::bad_request(format!("failed to read upload: {err}")))?;

        let assistant = state.assistant();
        let outcome = state
            .run(
                &session_id,
                PipelineKind::DocumentQa,
                assistant.load_document(&session_id, &name, format, bytes.to_vec()),
            )
            .await?;
        return Ok(Json(outcome));
    }

    Err(AppError::bad_request("multipart field `file` is required"))
}

#[instrument(skip_all, fields(session_id = %session_id))]
async fn ask(
    GuardedState(state): GuardedState,
    Path(session_id): Path<String>,
    Json(payload): Json<AskRequest>,
) -> Result<Json<TextResponse>, AppError> {
    let assistant = state.assistant();
    let result = state
        .run(
            &session_id,
            PipelineKind::DocumentQa,
            assistant.ask(&session_id, &payload.question),
        )
        .await?;
    Ok(Json(TextResponse {
        pipeline: PipelineKind::DocumentQa,
        result,
    }))
}

fn parse_pipeline(raw: &str) -> Result<PipelineKind, AppError> {
    raw.parse()
        .map_err(|_| AppError::new(StatusCode::NOT_FOUND, format!("unknown pipeline `{raw}`")))
}

async fn get_pipeline(
    GuardedState(state): GuardedState,
    Path((session_id, pipeline)): Path<(String, String)>,
) -> Result<Json<PipelineSnapshot>, AppError> {
    let pipeline = parse_pipeline(&pipeline)?;
    let snapshot = state.assistant().state(&session_id, pipeline);
    Ok(Json(PipelineSnapshot::new(pipeline, snapshot)))
}

#[instrument(skip_all, fields(session_id = %session_id))]
async fn clear_pipeline(
    GuardedState(state): GuardedState,
    Path((session_id, pipeline)): Path<(String, String)>,
) -> Result<Json<PipelineSnapshot>, AppError> {
    let pipeline = parse_pipeline(&pipeline)?;
    let assistant = state.assistant();
    assistant.clear(&session_id, pipeline).await?;
    Ok(Json(PipelineSnapshot::new(
        pipeline,
        assistant.state(&session_id, pipeline),
    )))
}

#[instrument(skip_all, fields(session_id = %session_id))]
async fn email_result(
    GuardedState(state): GuardedState,
    Path((session_id, pipeline)): Path<(String, String)>,
    Json(payload): Json<EmailRequest>,
) -> Result<Json<EmailResponse>, AppError> {
    let pipeline = parse_pipeline(&pipeline)?;
    let assistant = state.assistant();
    state
        .run(
            &session_id,
            pipeline,
            assistant.email_result(&session_id, pipeline, &payload.recipient),
        )
        .await?;
    Ok(Json(EmailResponse {
        status: "sent",
        subject: pipeline.email_subject(),
    }))
}

pub struct GuardedState(pub AppState);

#[async_trait]
impl FromRequestParts<AppState> for GuardedState {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let app_state = state.clone();

        if !app_state.gui_enabled() {
            return Err(AppError::new(StatusCode::FORBIDDEN, "GUI disabled"));
        }

        if let Some(expected) = app_state.auth_token() {
            let provided = parts
                .headers
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.strip_prefix("Bearer "))
                .map(str::trim);

            match provided {
                Some(token) if token == expected.as_str() => {}
                _ => {
                    return Err(AppError::new(
                        StatusCode::UNAUTHORIZED,
                        "invalid auth token",
                    ));
                }
            }
        }

        Ok(GuardedState(app_state))
    }
}
