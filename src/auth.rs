//! Bearer token check for the host's control endpoints

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, Response, StatusCode},
    middleware::Next,
};
use std::sync::Arc;

/// Authentication configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Token the host UI must present (None = auth disabled)
    pub token: Option<String>,
}

impl AuthConfig {
    /// Load auth config from `HOST_TOKEN`
    pub fn from_env() -> Self {
        let token = std::env::var("HOST_TOKEN")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        if token.is_some() {
            tracing::info!("Host authentication enabled");
        } else {
            tracing::warn!("Host authentication DISABLED - anyone can drive the host's intents!");
        }
        Self { token }
    }

    pub fn is_enabled(&self) -> bool {
        self.token.is_some()
    }

    /// Check a presented token
    pub fn validate(&self, presented: &str) -> bool {
        match &self.token {
            Some(token) => constant_time_eq(token.as_bytes(), presented.as_bytes()),
            None => true,
        }
    }
}

/// Constant-time byte comparison to prevent timing attacks
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

fn bearer_token(request: &Request<Body>) -> Option<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// Middleware requiring `Authorization: Bearer <HOST_TOKEN>` on host routes
pub async fn host_auth_middleware(
    State(auth_config): State<Arc<AuthConfig>>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    if !auth_config.is_enabled() {
        return next.run(request).await;
    }

    if let Some(token) = bearer_token(&request) {
        if auth_config.validate(token) {
            return next.run(request).await;
        }
    }

    tracing::warn!("Rejected unauthenticated request to {}", request.uri().path());
    let mut response = Response::new(Body::from("Unauthorized"));
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        header::HeaderValue::from_static("Bearer realm=\"tonedeaf host\""),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_config_disabled() {
        let config = AuthConfig { token: None };
        assert!(!config.is_enabled());
        assert!(config.validate("anything"));
    }

    #[test]
    fn test_auth_config_enabled() {
        let config = AuthConfig {
            token: Some("s3cret".to_string()),
        };
        assert!(config.is_enabled());
        assert!(config.validate("s3cret"));
        assert!(!config.validate("s3cre"));
        assert!(!config.validate(""));
    }

    #[test]
    fn test_bearer_token_parsing() {
        let request = Request::builder()
            .header(header::AUTHORIZATION, "Bearer  abc ")
            .body(Body::empty())
            .unwrap();
        assert_eq!(bearer_token(&request), Some("abc"));

        let basic = Request::builder()
            .header(header::AUTHORIZATION, "Basic YWRtaW46c2VjcmV0")
            .body(Body::empty())
            .unwrap();
        assert_eq!(bearer_token(&basic), None);
    }

    fn guarded(token: Option<&str>) -> axum::Router {
        let auth = Arc::new(AuthConfig {
            token: token.map(str::to_string),
        });
        axum::Router::new()
            .route("/api/intent", axum::routing::post(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(auth, host_auth_middleware))
    }

    fn intent_request(authorization: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri("/api/intent");
        if let Some(value) = authorization {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_middleware_rejects_missing_or_wrong_token() {
        use tower::ServiceExt;

        let response = guarded(Some("s3cret"))
            .oneshot(intent_request(None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));

        let response = guarded(Some("s3cret"))
            .oneshot(intent_request(Some("Bearer nope")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = guarded(Some("s3cret"))
            .oneshot(intent_request(Some("Bearer s3cret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_middleware_passes_through_when_disabled() {
        use tower::ServiceExt;

        let response = guarded(None).oneshot(intent_request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"hello", b"hell"));
        assert!(constant_time_eq(b"", b""));
    }
}
