//! API middleware
//!
//! Contains:
//! - Shared application state
//! - JSON API errors
//! - Session resolution: binds each request to exactly one session and
//!   issues the session cookie when a new one is created

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::session::{SessionError, SessionManager};

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    /// Cookie carrying the session token
    pub cookie_name: Arc<str>,
    /// Public site host for rendering
    pub site_host: Arc<str>,
}

impl AppState {
    pub fn new(sessions: SessionManager, cookie_name: &str, site_host: &str) -> Self {
        Self {
            sessions: Arc::new(sessions),
            cookie_name: Arc::from(cookie_name),
            site_host: Arc::from(site_host),
        }
    }
}

/// Error response for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
            },
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new("SESSION_UNAVAILABLE", message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.error.code.as_str() {
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "SESSION_UNAVAILABLE" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(self)).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::EmptyKey => ApiError::validation_error("Key must not be empty"),
            SessionError::NoSession | SessionError::NotFound => ApiError::not_found("Not found"),
            SessionError::Corrupted { .. } => ApiError::not_found("Session not found"),
            SessionError::InvalidExpiry(msg) => ApiError::validation_error(msg),
            SessionError::Backend(e) => {
                tracing::error!("Session backend error: {}", e);
                ApiError::service_unavailable("Session storage is unavailable")
            }
        }
    }
}

/// Extract session token from request
///
/// Looks at `Authorization: Bearer <token>` first, then the session cookie.
pub fn extract_session_token(request: &Request, cookie_name: &str) -> Option<String> {
    if let Some(auth_header) = request.headers().get(header::AUTHORIZATION) {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token.trim().to_string());
            }
        }
    }

    for cookie_header in request.headers().get_all(header::COOKIE) {
        if let Ok(cookie_str) = cookie_header.to_str() {
            for cookie in cookie_str.split(';') {
                if let Some((name, value)) = cookie.trim().split_once('=') {
                    if name == cookie_name {
                        return Some(value.to_string());
                    }
                }
            }
        }
    }

    None
}

/// Build the `Set-Cookie` value for a session token
pub fn session_cookie(cookie_name: &str, token: &str, max_age_secs: u64) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        cookie_name, token, max_age_secs
    )
}

/// Session middleware
///
/// Resolves the request's session (creating one if needed) and makes it
/// available to handlers as `Extension<WebSession>`. A storage outage
/// answers 503 rather than handing out a fresh session.
pub async fn session_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_session_token(&request, &state.cookie_name);

    let web_session = state
        .sessions
        .resolve(token.as_deref())
        .await
        .map_err(|e| {
            tracing::error!("Session resolution failed: {}", e);
            ApiError::service_unavailable("Session storage is unavailable")
        })?;

    let new_cookie = web_session.is_new().then(|| {
        session_cookie(
            &state.cookie_name,
            web_session.id(),
            web_session.max_duration().as_secs(),
        )
    });

    request.extensions_mut().insert(web_session);
    let mut response = next.run(request).await;

    if let Some(cookie) = new_cookie {
        // a handler may already have replaced or cleared the cookie
        if !response.headers().contains_key(header::SET_COOKIE) {
            match HeaderValue::from_str(&cookie) {
                Ok(value) => {
                    response.headers_mut().insert(header::SET_COOKIE, value);
                }
                Err(e) => tracing::error!("Invalid session cookie header: {}", e),
            }
        }
    }

    Ok(response)
}
