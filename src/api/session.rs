//! Session API endpoints
//!
//! Handlers read and write the visitor's session through the
//! `WebSession` resolved by the session middleware; none of them know which
//! backend is active.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::middleware::{session_cookie, ApiError, AppState};
use crate::render::HostRender;
use crate::session::WebSession;

/// Content key marking a logged-in visitor
pub const STATUS_KEY: &str = "status";
/// Content key holding the logged-in user's id
pub const USER_ID_KEY: &str = "id";

/// Login state derived from session content
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UserStatus {
    pub is_login: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl UserStatus {
    /// Read login state from the session
    ///
    /// Any failure along the way (missing keys, unexpected types, storage
    /// errors) means "not logged in".
    pub async fn from_session(session: &WebSession) -> Self {
        match session.get_as::<String>(STATUS_KEY).await {
            Ok(status) if status == "login" => {}
            _ => return Self::default(),
        }
        match session.get(USER_ID_KEY).await {
            Ok(Value::String(id)) if !id.is_empty() => Self {
                is_login: true,
                user_id: Some(id),
            },
            Ok(Value::Number(n)) => Self {
                is_login: true,
                user_id: Some(n.to_string()),
            },
            Ok(_) => Self::default(),
            Err(e) => {
                tracing::debug!("Session {} has no user id: {}", session.id(), e);
                Self::default()
            }
        }
    }
}

/// Session info response
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub id: String,
    pub created_at: String,
    pub expires_at: String,
    pub is_new: bool,
    pub user: UserStatus,
}

impl SessionResponse {
    async fn build(session: &WebSession) -> Self {
        Self {
            id: session.id().to_string(),
            created_at: session.session().created_at().to_rfc3339(),
            expires_at: session.session().expires_at().to_rfc3339(),
            is_new: session.is_new(),
            user: UserStatus::from_session(session).await,
        }
    }
}

/// Content value response
#[derive(Debug, Serialize)]
pub struct ContentResponse {
    pub key: String,
    pub value: Value,
}

/// Request body for storing a content value
#[derive(Debug, Deserialize)]
pub struct SetContentInput {
    pub value: Value,
}

/// GET /api/v1/session
pub async fn get_session(Extension(session): Extension<WebSession>) -> Json<SessionResponse> {
    Json(SessionResponse::build(&session).await)
}

/// GET /api/v1/session/content/{key}
pub async fn get_content(
    Extension(session): Extension<WebSession>,
    Path(key): Path<String>,
) -> Result<Json<ContentResponse>, ApiError> {
    let value = session.get(&key).await?;
    Ok(Json(ContentResponse { key, value }))
}

/// PUT /api/v1/session/content/{key}
pub async fn set_content(
    Extension(session): Extension<WebSession>,
    Path(key): Path<String>,
    Json(input): Json<SetContentInput>,
) -> Result<StatusCode, ApiError> {
    session.set(&key, input.value).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/v1/session/content/{key}
pub async fn delete_content(
    Extension(session): Extension<WebSession>,
    Path(key): Path<String>,
) -> Result<StatusCode, ApiError> {
    session.delete(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/session/refresh
pub async fn refresh_session(
    Extension(mut session): Extension<WebSession>,
) -> Result<Json<SessionResponse>, ApiError> {
    session.refresh().await?;
    Ok(Json(SessionResponse::build(&session).await))
}

/// DELETE /api/v1/session - drop the session and clear the cookie
pub async fn delete_session(
    State(state): State<AppState>,
    Extension(session): Extension<WebSession>,
) -> Result<impl IntoResponse, ApiError> {
    state.sessions.destroy(session.id()).await?;

    let clear_cookie = session_cookie(&state.cookie_name, "", 0);
    let mut headers = HeaderMap::new();
    let value = HeaderValue::from_str(&clear_cookie)
        .map_err(|e| ApiError::internal_error(e.to_string()))?;
    headers.insert(header::SET_COOKIE, value);

    Ok((StatusCode::NO_CONTENT, headers))
}

/// GET /api/v1/site
pub async fn get_site(State(state): State<AppState>) -> Json<&'static HostRender> {
    Json(HostRender::global(&state.site_host))
}
