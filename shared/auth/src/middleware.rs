use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::jwt::{Claims, JwtService};

/// Authentication middleware that validates JWT bearer tokens
pub async fn auth_middleware(
    State(jwt_service): State<JwtService>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = extract_token_from_headers(&headers).ok_or(StatusCode::UNAUTHORIZED)?;

    let claims = jwt_service
        .validate_token(&token)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}

/// Admin-only authorization middleware; runs after `auth_middleware`
pub async fn admin_only_middleware(request: Request, next: Next) -> Result<Response, StatusCode> {
    let claims = request
        .extensions()
        .get::<Claims>()
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if claims.is_admin() {
        Ok(next.run(request).await)
    } else {
        Err(StatusCode::FORBIDDEN)
    }
}

// Lets handlers take `claims: Claims` directly once the middleware has run.
#[async_trait]
impl<S> FromRequestParts<S> for Claims
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Claims>()
            .cloned()
            .ok_or(StatusCode::UNAUTHORIZED)
    }
}

/// Extract JWT token from Authorization header
fn extract_token_from_headers(headers: &HeaderMap) -> Option<String> {
    let auth_header = headers.get("Authorization")?;
    let auth_str = auth_header.to_str().ok()?;

    auth_str.strip_prefix("Bearer ").map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_is_extracted() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(extract_token_from_headers(&headers).as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn non_bearer_schemes_are_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", HeaderValue::from_static("Basic dXNlcg=="));
        assert!(extract_token_from_headers(&headers).is_none());
    }

    #[tokio::test]
    async fn admin_middleware_gates_by_role() {
        use axum::{body::Body, http::Request, routing::get, Router};
        use creatorpay_common::JwtConfig;
        use tower::ServiceExt;
        use uuid::Uuid;

        let config = JwtConfig {
            secret: "test-secret".to_string(),
            expiration_hours: 1,
            issuer: "creatorpay".to_string(),
        };
        let claims = |roles: Vec<String>| {
            Claims::new(
                Uuid::new_v4(),
                "ada".to_string(),
                "ada@example.com".to_string(),
                roles,
                &config,
            )
        };
        let app = || {
            Router::new()
                .route("/admin", get(|| async { "ok" }))
                .layer(axum::middleware::from_fn(admin_only_middleware))
        };

        // No claims at all: authentication never ran.
        let request = Request::builder().uri("/admin").body(Body::empty()).unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // Authenticated but without the admin role.
        let mut request = Request::builder().uri("/admin").body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(claims(vec!["creator".to_string()]));
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let mut request = Request::builder().uri("/admin").body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(claims(vec!["admin".to_string()]));
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
