//! API layer - HTTP handlers and routing
//!
//! Every route runs behind the session middleware, so handlers always see a
//! resolved `WebSession`.

pub mod middleware;
pub mod session;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use middleware::{ApiError, AppState};

/// Build the API router
pub fn build_api_router() -> Router<AppState> {
    Router::new()
        .route(
            "/session",
            get(session::get_session).delete(session::delete_session),
        )
        .route("/session/refresh", post(session::refresh_session))
        .route(
            "/session/content/{key}",
            get(session::get_content)
                .put(session::set_content)
                .delete(session::delete_content),
        )
        .route("/site", get(session::get_site))
}

/// Build the complete router with middleware
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", build_api_router())
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::session_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{
        new_id, KvClient, KvStorage, LocalKv, MemoryStorage, SessionManager, SessionStorage,
    };
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use axum::response::Response;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app_with(storage: Arc<dyn SessionStorage>) -> Router {
        let manager = SessionManager::new(storage, Duration::from_secs(3600));
        build_router(AppState::new(manager, "session", "localhost:8080"))
    }

    fn memory_app() -> Router {
        app_with(Arc::new(MemoryStorage::new()))
    }

    async fn send(app: &Router, request: Request<Body>) -> Response {
        app.clone().oneshot(request).await.unwrap()
    }

    fn request(method: &str, uri: &str, cookie: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = cookie {
            builder = builder.header(header::COOKIE, format!("session={token}"));
        }
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn set_cookie_token(response: &Response) -> Option<String> {
        let raw = response.headers().get(header::SET_COOKIE)?.to_str().ok()?;
        let (pair, _) = raw.split_once(';')?;
        pair.strip_prefix("session=").map(str::to_string)
    }

    #[tokio::test]
    async fn test_new_visitor_gets_cookie() {
        let app = memory_app();
        let response = send(&app, request("GET", "/api/v1/session", None, None)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let token = set_cookie_token(&response).expect("session cookie");
        let body = json_body(response).await;
        assert_eq!(body["id"], json!(token));
        assert_eq!(body["is_new"], json!(true));
        assert_eq!(body["user"]["is_login"], json!(false));
    }

    #[tokio::test]
    async fn test_existing_session_reused() {
        let app = memory_app();
        let response = send(&app, request("GET", "/api/v1/session", None, None)).await;
        let token = set_cookie_token(&response).unwrap();

        let response = send(&app, request("GET", "/api/v1/session", Some(&token), None)).await;
        assert!(response.headers().get(header::SET_COOKIE).is_none());
        let body = json_body(response).await;
        assert_eq!(body["id"], json!(token));
        assert_eq!(body["is_new"], json!(false));
    }

    #[tokio::test]
    async fn test_content_roundtrip_over_http() {
        let app = memory_app();
        let response = send(&app, request("GET", "/api/v1/session", None, None)).await;
        let token = set_cookie_token(&response).unwrap();

        let response = send(
            &app,
            request("PUT", "/api/v1/session/content/cart", Some(&token), Some(json!({ "value": "3-items" }))),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = send(&app, request("GET", "/api/v1/session/content/cart", Some(&token), None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({ "key": "cart", "value": "3-items" }));

        let response = send(&app, request("DELETE", "/api/v1/session/content/cart", Some(&token), None)).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = send(&app, request("GET", "/api/v1/session/content/cart", Some(&token), None)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["error"]["code"], json!("NOT_FOUND"));
    }

    #[tokio::test]
    async fn test_login_status_from_content() {
        let storage: Arc<dyn SessionStorage> = Arc::new(KvStorage::new(LocalKv::new(), "blog").unwrap());
        let app = app_with(storage);
        let response = send(&app, request("GET", "/api/v1/session", None, None)).await;
        let token = set_cookie_token(&response).unwrap();

        for (key, value) in [("status", json!("login")), ("id", json!("42"))] {
            let uri = format!("/api/v1/session/content/{key}");
            let response = send(&app, request("PUT", &uri, Some(&token), Some(json!({ "value": value })))).await;
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }

        let body = json_body(send(&app, request("GET", "/api/v1/session", Some(&token), None)).await).await;
        assert_eq!(body["user"], json!({ "is_login": true, "user_id": "42" }));

        send(&app, request("DELETE", "/api/v1/session/content/id", Some(&token), None)).await;
        let body = json_body(send(&app, request("GET", "/api/v1/session", Some(&token), None)).await).await;
        assert_eq!(body["user"], json!({ "is_login": false }));
    }

    #[tokio::test]
    async fn test_logout_clears_session() {
        let app = memory_app();
        let response = send(&app, request("GET", "/api/v1/session", None, None)).await;
        let token = set_cookie_token(&response).unwrap();

        let response = send(&app, request("DELETE", "/api/v1/session", Some(&token), None)).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let cookie = response.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.contains("Max-Age=0"));

        let response = send(&app, request("GET", "/api/v1/session", Some(&token), None)).await;
        let new_token = set_cookie_token(&response).unwrap();
        assert_ne!(new_token, token);
    }

    #[tokio::test]
    async fn test_refresh_endpoint() {
        let app = memory_app();
        let response = send(&app, request("GET", "/api/v1/session", None, None)).await;
        let token = set_cookie_token(&response).unwrap();
        let before = json_body(response).await["expires_at"].as_str().unwrap().to_string();

        let response = send(&app, request("POST", "/api/v1/session/refresh", Some(&token), None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let after = chrono::DateTime::parse_from_rfc3339(body["expires_at"].as_str().unwrap()).unwrap();
        let before = chrono::DateTime::parse_from_rfc3339(&before).unwrap();
        assert!(after >= before);
    }

    #[tokio::test]
    async fn test_site_host() {
        let app = memory_app();
        let response = send(&app, request("GET", "/api/v1/site", None, None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert!(body["host"].as_str().unwrap().starts_with("http"));
    }

    struct DownKv;

    #[async_trait]
    impl KvClient for DownKv {
        async fn set(&self, _: &str, _: &str, _: Duration) -> anyhow::Result<()> {
            anyhow::bail!("connection refused")
        }
        async fn get(&self, _: &str) -> anyhow::Result<Option<String>> {
            anyhow::bail!("connection refused")
        }
        async fn del(&self, _: &str) -> anyhow::Result<()> {
            anyhow::bail!("connection refused")
        }
        async fn keys(&self, _: &str) -> anyhow::Result<Vec<String>> {
            anyhow::bail!("connection refused")
        }
    }

    #[tokio::test]
    async fn test_backend_outage_returns_503_without_cookie() {
        let app = app_with(Arc::new(KvStorage::new(DownKv, "blog").unwrap()));
        let response = send(&app, request("GET", "/api/v1/session", Some(&new_id()), None)).await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], json!("SESSION_UNAVAILABLE"));
        assert!(!body.to_string().contains("connection refused"));
    }
}
