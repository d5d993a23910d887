//! Request authentication.
//!
//! The bearer token comes from the `Authorization: Bearer` header or, for
//! browser sockets that cannot set headers, the `token` query parameter.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Query},
    http::{header::AUTHORIZATION, request::Parts},
};
use serde::Deserialize;

use crate::{
    domain::{AuthContext, Counter, RateLimitAction, UserId, service::admit},
    ui::state::AppState,
};

use super::error::ApiError;

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Authenticated caller of a request, resolved once by the auth gate
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub auth: AuthContext,
}

impl RequestContext {
    pub fn user_id(&self) -> &UserId {
        &self.auth.user_id
    }

    /// Admit one request against `action`'s rate limit
    pub fn admit(&self, state: &AppState, action: RateLimitAction) -> Result<(), ApiError> {
        let decision = admit(state.rate_limiter.as_ref(), action, self.user_id().as_str());
        if decision.allowed {
            return Ok(());
        }
        state.metrics.increment(Counter::RateLimited);
        tracing::info!("User '{}' rate limited on {}", self.user_id(), action);
        Err(ApiError::RateLimited {
            retry_after_secs: decision.retry_after_secs(),
        })
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    let from_header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string());
    if from_header.is_some() {
        return from_header;
    }

    Query::<TokenQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(query)| query.token)
}

impl FromRequestParts<Arc<AppState>> for RequestContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).unwrap_or_default();
        let auth = state.token_validator.validate(&token).await.map_err(|e| {
            tracing::debug!("Rejected {} {}: {}", parts.method, parts.uri.path(), e);
            ApiError::Unauthorized(e)
        })?;
        Ok(Self { auth })
    }
}
