//! HTTP API endpoint handlers.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{
        HeaderMap, HeaderName, StatusCode,
        header::{CACHE_CONTROL, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED},
    },
    response::{IntoResponse, Response},
};
use parley_shared::time::{parse_http_date_millis, parse_rfc3339_millis};

use crate::{
    domain::{ClientContext, Counter, RateLimitAction, SessionFilter, SessionId, SessionStatus, Timestamp},
    infrastructure::dto::http::{
        ClientContextDto, CreateSessionRequest, GetMessagesQuery, GetMessagesResponse,
        ListSessionsQuery, MessageDto, SendMessageRequest, SendMessageResponse,
        SessionListResponse, SessionResponse,
    },
    ui::state::AppState,
    usecase::{CacheValidators, ChatError, MessagesOutcome, MessagesQuery},
};

use super::{
    auth::RequestContext,
    error::{ApiError, record_chat_error},
};

const CACHE_POLICY: &str = "private, no-cache";

fn parse_session_id(raw: String) -> Result<SessionId, ApiError> {
    SessionId::new(raw).map_err(|e| ApiError::BadRequest(e.to_string()))
}

/// `since` cursor: RFC 3339 or Unix milliseconds
fn parse_since(raw: Option<&str>) -> Result<Option<Timestamp>, ApiError> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(None);
    };
    parse_rfc3339_millis(raw)
        .or_else(|| raw.parse::<i64>().ok())
        .map(|millis| Some(Timestamp::new(millis)))
        .ok_or_else(|| ApiError::BadRequest(format!("invalid since cursor '{}'", raw)))
}

fn header_str<'a>(headers: &'a HeaderMap, name: HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn cache_headers(validators: &CacheValidators) -> [(HeaderName, String); 3] {
    [
        (ETAG, validators.etag.clone()),
        (LAST_MODIFIED, validators.last_modified()),
        (CACHE_CONTROL, CACHE_POLICY.to_string()),
    ]
}

fn chat_failure(state: &AppState, e: ChatError) -> ApiError {
    record_chat_error(state.metrics.as_ref(), &e);
    ApiError::from(e)
}

/// Health check endpoint
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Debug endpoint exposing the transport counters
pub async fn debug_metrics(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let snapshot = state.metrics.snapshot();
    Json(serde_json::json!({
        "active_connections": snapshot.active_connections,
        "registered_connections": state.registry.count(),
        "counters": snapshot.counters,
    }))
}

/// `POST /api/chat/messages`: one exchange, reply inline
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Json(request): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, ApiError> {
    ctx.admit(&state, RateLimitAction::Api)?;

    let context = request.client_name.map(|client_name| {
        ClientContext::from(ClientContextDto {
            client_name: Some(client_name),
            ..Default::default()
        })
    });
    let exchange = state
        .send_message_usecase
        .execute(ctx.user_id(), &request.session_id, &request.content, context)
        .await
        .map_err(|e| chat_failure(&state, e))?;
    state.metrics.increment(Counter::MessagesReceived);

    Ok(Json(SendMessageResponse {
        success: true,
        message_id: exchange.reply.id.into_string(),
        content: exchange.reply.content,
        r#type: exchange.reply.role.as_str().to_string(),
        session_id: exchange.session.id.into_string(),
    }))
}

/// `GET /api/chat/messages`: conditional page retrieval
///
/// `If-Modified-Since` has one-second resolution and misses activity within
/// the second it names; clients that need every change should send
/// `If-None-Match` with the returned `ETag`.
pub async fn get_messages(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    headers: HeaderMap,
    Query(query): Query<GetMessagesQuery>,
) -> Result<Response, ApiError> {
    ctx.admit(&state, RateLimitAction::Api)?;

    let query = MessagesQuery {
        since: parse_since(query.since.as_deref())?,
        session_id: query.session_id,
        limit: state.config.page_size(query.limit),
        offset: query.offset.unwrap_or(0),
        if_none_match: header_str(&headers, IF_NONE_MATCH).map(str::to_string),
        if_modified_since: header_str(&headers, IF_MODIFIED_SINCE)
            .and_then(parse_http_date_millis)
            .map(|millis| millis.div_euclid(1000)),
    };
    let outcome = state
        .get_messages_usecase
        .execute(ctx.user_id(), query)
        .await
        .map_err(|e| chat_failure(&state, e))?;

    let response = match outcome {
        MessagesOutcome::NotModified { validators, .. } => {
            (StatusCode::NOT_MODIFIED, cache_headers(&validators)).into_response()
        }
        MessagesOutcome::Page(page) => {
            let body = GetMessagesResponse {
                success: true,
                session_id: page.session_id.into_string(),
                messages: page.messages.into_iter().map(MessageDto::from).collect(),
                has_more: page.has_more,
            };
            (cache_headers(&page.validators), Json(body)).into_response()
        }
    };
    Ok(response)
}

/// `POST /api/chat/sessions`
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Json(request): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    ctx.admit(&state, RateLimitAction::Api)?;

    let requested_id = request
        .session_id
        .filter(|id| !id.trim().is_empty())
        .map(parse_session_id)
        .transpose()?;
    let session = state
        .session_lifecycle
        .create_session(ctx.user_id(), requested_id, request.context.into())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            success: true,
            session: session.into(),
        }),
    ))
}

/// `GET /api/chat/sessions`: the caller's sessions, most recently active first
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Query(query): Query<ListSessionsQuery>,
) -> Result<Json<SessionListResponse>, ApiError> {
    ctx.admit(&state, RateLimitAction::Api)?;

    let status = match query.status.as_deref() {
        Some(raw) => Some(
            SessionStatus::parse(raw)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown session status '{}'", raw)))?,
        ),
        None => None,
    };
    let filter = SessionFilter {
        owner: Some(ctx.user_id().clone()),
        status,
        limit: Some(state.config.page_size(query.limit)),
        offset: query.offset.unwrap_or(0),
    };
    let sessions = state.session_lifecycle.list_sessions(&filter).await?;

    Ok(Json(SessionListResponse {
        success: true,
        sessions: sessions.into_iter().map(Into::into).collect(),
    }))
}

/// `GET /api/chat/sessions/{session_id}`
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(session_id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    ctx.admit(&state, RateLimitAction::Api)?;

    let session_id = parse_session_id(session_id)?;
    let session = state
        .session_lifecycle
        .get_session(&session_id, ctx.user_id())
        .await?;

    Ok(Json(SessionResponse {
        success: true,
        session: session.into(),
    }))
}

/// `PATCH /api/chat/sessions/{session_id}/context`
pub async fn update_session_context(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(session_id): Path<String>,
    Json(context): Json<ClientContextDto>,
) -> Result<Json<SessionResponse>, ApiError> {
    ctx.admit(&state, RateLimitAction::Api)?;

    let session_id = parse_session_id(session_id)?;
    let session = state
        .session_lifecycle
        .update_context(&session_id, ctx.user_id(), context.into())
        .await?;

    Ok(Json(SessionResponse {
        success: true,
        session: session.into(),
    }))
}

/// `DELETE /api/chat/sessions/{session_id}`
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    ctx.admit(&state, RateLimitAction::Api)?;

    let session_id = parse_session_id(session_id)?;
    state
        .session_lifecycle
        .delete_session(&session_id, ctx.user_id())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
