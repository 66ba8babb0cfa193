//! Cookie/header identity.
//!
//! Every request routed through [`identify`] gets a [`RequestContext`]: the
//! caller's token (from the auth cookie, then the auth header, else freshly
//! issued) and a new request id.

use std::sync::Arc;

use axum::extract::{FromRequestParts, Request, State};
use axum::http::{header, request::Parts, HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;
use uuid::Uuid;

use crate::api::response::ApiError;
use crate::context::RequestContext;
use crate::AppState;

pub async fn identify(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let auth = &state.config.auth;

    let presented = cookie_value(req.headers(), &auth.cookie_name).or_else(|| {
        req.headers()
            .get(auth.header_name.as_str())
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    });

    let (owner, issued) = match presented {
        Some(token) => match Uuid::parse_str(&token) {
            Ok(uuid) => (uuid.to_string(), false),
            Err(_) => return ApiError::unauthorized("Invalid auth token").into_response(),
        },
        None => (Uuid::new_v4().to_string(), true),
    };

    let ctx = RequestContext::new(owner, Uuid::new_v4().to_string());
    debug!(token = %ctx.owner, request_id = %ctx.request_id, issued, "Got user token");
    let cookie = issued.then(|| {
        format!(
            "{}={}; Max-Age={}; Path=/; HttpOnly",
            auth.cookie_name, ctx.owner, auth.cookie_max_age
        )
    });
    req.extensions_mut().insert(ctx);

    let mut response = next.run(req).await;
    if let Some(value) = cookie.and_then(|c| HeaderValue::from_str(&c).ok()) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    response
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, ApiError> {
        // Missing context is a wiring bug on our side, not a client error
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .ok_or_else(|| ApiError::internal("This endpoint must be behind the identity layer"))
    }
}
