use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use uuid::Uuid;

use viva_core::engine::{StartOutcome, SubmitOutcome, VivaEngine};
use viva_core::examiner::{QuestionKind, SubjectContext};
use viva_core::ledger::{Question, TurnResponse};
use viva_core::openai::OpenAiProvider;
use viva_core::session::{MediaArtifacts, Session, SessionId, SessionKind};
use viva_core::store::MemoryStore;
use viva_core::VivaError;

pub type Engine = VivaEngine<OpenAiProvider, MemoryStore>;
pub type AppState = Arc<Engine>;

/// HTTP-facing error wrapper: maps the engine taxonomy onto status codes.
pub enum ApiError {
    Unauthorized,
    Engine(VivaError),
}

impl From<VivaError> for ApiError {
    fn from(err: VivaError) -> Self {
        ApiError::Engine(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "Missing or malformed bearer token".to_string(),
            ),
            ApiError::Engine(err) => {
                let status = match &err {
                    VivaError::NotFound => StatusCode::NOT_FOUND,
                    VivaError::Forbidden => StatusCode::FORBIDDEN,
                    VivaError::InvalidState { .. } | VivaError::NoPendingTurn => {
                        StatusCode::BAD_REQUEST
                    }
                    VivaError::Inconsistent(_) => {
                        tracing::error!(error = %err, "session invariant violation surfaced to API");
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, err.to_string())
            }
        };
        (status, Json(serde_json::json!({ "detail": detail }))).into_response()
    }
}

/// Extracts the actor from the `Authorization: Bearer <token>` header.
///
/// Token verification proper lives in the excluded auth collaborator; here
/// the opaque token is the actor's id.
fn actor_from(headers: &HeaderMap) -> Result<Uuid, ApiError> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;
    let token = header.strip_prefix("Bearer ").ok_or(ApiError::Unauthorized)?;
    token.parse::<Uuid>().map_err(|_| ApiError::Unauthorized)
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub submission_id: Uuid,
    pub session_type: SessionKind,
    pub assignment_context: String,
    #[serde(default)]
    pub written_answers: String,
    #[serde(default = "default_difficulty")]
    pub difficulty_level: String,
}

fn default_difficulty() -> String {
    "intermediate".to_string()
}

pub async fn create_session(
    State(engine): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<Session>, ApiError> {
    let actor = actor_from(&headers)?;
    let context = SubjectContext {
        assignment_context: req.assignment_context,
        written_answers: req.written_answers,
        difficulty_level: req.difficulty_level,
        ..SubjectContext::default()
    };
    let session = engine
        .create_session(req.submission_id, actor, req.session_type, context)
        .await?;
    Ok(Json(session))
}

pub async fn start_session(
    State(engine): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<StartOutcome>, ApiError> {
    let actor = actor_from(&headers)?;
    let outcome = engine.start(SessionId(id), actor).await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    pub response_text: Option<String>,
    pub response_media_ref: Option<String>,
    pub response_duration_seconds: Option<f64>,
}

pub async fn submit_response(
    State(engine): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<RespondRequest>,
) -> Result<Json<SubmitOutcome>, ApiError> {
    let actor = actor_from(&headers)?;
    let response = TurnResponse {
        text: req.response_text,
        media_ref: req.response_media_ref,
        duration_seconds: req.response_duration_seconds,
    };
    let outcome = engine.submit_response(SessionId(id), actor, response).await?;
    Ok(Json(outcome))
}

pub async fn get_session(
    State(engine): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Session>, ApiError> {
    let actor = actor_from(&headers)?;
    let session = engine.get(SessionId(id), actor).await?;
    Ok(Json(session))
}

pub async fn attach_media(
    State(engine): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(artifacts): Json<MediaArtifacts>,
) -> Result<StatusCode, ApiError> {
    let actor = actor_from(&headers)?;
    engine.attach_media(SessionId(id), actor, artifacts).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct TranscriptRequest {
    pub transcript: String,
}

/// Media-pipeline callback. In deployment this endpoint sits behind the
/// pipeline's service credentials, not a respondent token.
pub async fn attach_transcript(
    State(engine): State<AppState>,
    Path((id, index)): Path<(Uuid, u32)>,
    Json(req): Json<TranscriptRequest>,
) -> Result<StatusCode, ApiError> {
    engine
        .attach_transcript(SessionId(id), index, req.transcript)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct PracticeRequest {
    pub assignment_context: String,
    #[serde(default = "default_preference")]
    pub difficulty_preference: String,
    #[serde(default = "default_question_count")]
    pub question_count: usize,
}

fn default_preference() -> String {
    "similar".to_string()
}

fn default_question_count() -> usize {
    5
}

pub async fn practice_questions(
    State(engine): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PracticeRequest>,
) -> Result<Json<Vec<Question>>, ApiError> {
    actor_from(&headers)?;
    let difficulty_level = match req.difficulty_preference.as_str() {
        "easier" => "beginner",
        "harder" => "advanced",
        _ => "intermediate",
    }
    .to_string();
    let ctx = SubjectContext {
        assignment_context: req.assignment_context,
        difficulty_level,
        question_kind: QuestionKind::Conceptual,
        ..SubjectContext::default()
    };
    let questions = engine.practice_questions(&ctx, req.question_count).await;
    Ok(Json(questions))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_parses_to_actor() {
        let actor = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            format!("Bearer {actor}").parse().unwrap(),
        );
        assert_eq!(actor_from(&headers).ok(), Some(actor));
    }

    #[test]
    fn missing_or_malformed_token_is_unauthorized() {
        let headers = HeaderMap::new();
        assert!(matches!(actor_from(&headers), Err(ApiError::Unauthorized)));

        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer not-a-uuid".parse().unwrap(),
        );
        assert!(matches!(actor_from(&headers), Err(ApiError::Unauthorized)));

        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Basic dXNlcjpwYXNz".parse().unwrap(),
        );
        assert!(matches!(actor_from(&headers), Err(ApiError::Unauthorized)));
    }
}
