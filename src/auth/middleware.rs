//! Authentication Middleware
//! Mission: validate JWTs on protected routes and resolve the caller into a
//! `Principal` handlers can trust without re-touching the token.

use crate::auth::{jwt::JwtHandler, models::Claims};
use crate::principal::Principal;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

pub async fn auth_middleware(
    State(jwt_handler): State<Arc<JwtHandler>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|t| t.to_string())
        .ok_or(AuthError::MissingToken)?;

    let claims = jwt_handler.validate_token(&token).map_err(|_| AuthError::InvalidToken)?;
    let principal = Principal::new(claims.sub.clone(), claims.role, claims.tenant.clone());

    req.extensions_mut().insert(claims);
    req.extensions_mut().insert(principal);

    Ok(next.run(req).await)
}

pub fn extract_claims(req: &Request) -> Option<&Claims> {
    req.extensions().get::<Claims>()
}

pub fn extract_principal(req: &Request) -> Option<&Principal> {
    req.extensions().get::<Principal>()
}

#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingToken => (StatusCode::UNAUTHORIZED, "missing authorization token"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid or expired token"),
        };
        (status, message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::principal::Role;
    use axum::{body::Body, http::Request as HttpRequest};
    use uuid::Uuid;

    #[test]
    fn auth_errors_map_to_unauthorized() {
        assert_eq!(AuthError::MissingToken.into_response().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::InvalidToken.into_response().status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn extract_claims_reads_request_extensions() {
        let mut req = HttpRequest::new(Body::empty());
        assert!(extract_claims(&req).is_none());

        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            username: "test".to_string(),
            role: Role::Merchant,
            tenant: "t1".to_string(),
            exp: 1234567890,
        };
        req.extensions_mut().insert(claims.clone());

        let extracted = extract_claims(&req);
        assert_eq!(extracted.unwrap().username, "test");
    }
}
