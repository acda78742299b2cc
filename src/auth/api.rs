//! Authentication API Endpoints
//! Mission: login and tenant-scoped user management

use crate::auth::{
    jwt::JwtHandler,
    models::{LoginRequest, LoginResponse, UserResponse},
    user_store::UserStore,
};
use crate::principal::{Principal, Role};
use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Shared auth state
#[derive(Clone)]
pub struct AuthState {
    pub user_store: Arc<UserStore>,
    pub jwt_handler: Arc<JwtHandler>,
}

impl AuthState {
    pub fn new(user_store: Arc<UserStore>, jwt_handler: Arc<JwtHandler>) -> Self {
        Self { user_store, jwt_handler }
    }
}

/// Login endpoint - POST /v1/auth/login
pub async fn login(
    State(state): State<AuthState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AuthApiError> {
    info!(username = %payload.username, "login attempt");

    let valid = state
        .user_store
        .verify_password(&payload.username, &payload.password)
        .map_err(|_| AuthApiError::InternalError)?;

    if !valid {
        warn!(username = %payload.username, "failed login attempt");
        return Err(AuthApiError::InvalidCredentials);
    }

    let user = state
        .user_store
        .get_user_by_username(&payload.username)
        .map_err(|_| AuthApiError::InternalError)?
        .ok_or(AuthApiError::InvalidCredentials)?;

    let (token, expires_in) = state
        .jwt_handler
        .generate_token(&user)
        .map_err(|_| AuthApiError::InternalError)?;

    info!(username = %user.username, role = user.role.as_str(), "login successful");

    Ok(Json(LoginResponse {
        token,
        expires_in,
        role: user.role,
        user: UserResponse::from_user(&user),
    }))
}

/// Current caller's identity - GET /v1/auth/me
pub async fn get_current_user(
    Extension(principal): Extension<Principal>,
) -> Result<Json<UserResponse>, AuthApiError> {
    Ok(Json(UserResponse {
        id: principal.actor_id.clone(),
        username: principal.actor_id.clone(),
        role: principal.role,
        tenant: principal.tenant.clone(),
        created_at: String::new(),
    }))
}

/// List users in the caller's tenant - GET /v1/admin/users (platform_admin only)
pub async fn list_users(
    State(state): State<AuthState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<UserResponse>>, AuthApiError> {
    if principal.role != Role::PlatformAdmin {
        return Err(AuthApiError::Forbidden);
    }

    let users = state
        .user_store
        .list_users(&principal.tenant)
        .map_err(|_| AuthApiError::InternalError)?;

    let response: Vec<UserResponse> = users.iter().map(UserResponse::from_user).collect();

    Ok(Json(response))
}

/// Create a user in the caller's tenant - POST /v1/admin/users (platform_admin only)
pub async fn create_user(
    State(state): State<AuthState>,
    Extension(principal): Extension<Principal>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<Json<UserResponse>, AuthApiError> {
    if principal.role != Role::PlatformAdmin {
        return Err(AuthApiError::Forbidden);
    }

    if payload.password.len() < 8 {
        return Err(AuthApiError::WeakPassword);
    }

    let user = state
        .user_store
        .create_user(&payload.username, &payload.password, payload.role, &principal.tenant)
        .map_err(|e| {
            warn!(error = %e, "failed to create user");
            AuthApiError::UserAlreadyExists
        })?;

    info!(username = %user.username, role = user.role.as_str(), "user created");

    Ok(Json(UserResponse::from_user(&user)))
}

/// Delete a user - DELETE /v1/admin/users/:id (platform_admin only)
pub async fn delete_user(
    State(state): State<AuthState>,
    Extension(principal): Extension<Principal>,
    Path(user_id): Path<String>,
) -> Result<StatusCode, AuthApiError> {
    if principal.role != Role::PlatformAdmin {
        return Err(AuthApiError::Forbidden);
    }

    let uuid = Uuid::parse_str(&user_id).map_err(|_| AuthApiError::InvalidUserId)?;

    if uuid.to_string() == principal.actor_id {
        return Err(AuthApiError::CannotDeleteSelf);
    }

    state
        .user_store
        .delete_user(&uuid)
        .map_err(|_| AuthApiError::UserNotFound)?;

    info!(user_id = %user_id, "user deleted");

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
    pub role: Role,
}

#[derive(Debug)]
pub enum AuthApiError {
    InvalidCredentials,
    Unauthorized,
    Forbidden,
    UserNotFound,
    UserAlreadyExists,
    WeakPassword,
    InvalidUserId,
    CannotDeleteSelf,
    InternalError,
}

impl IntoResponse for AuthApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthApiError::InvalidCredentials => {
                (StatusCode::UNAUTHORIZED, "invalid username or password")
            }
            AuthApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "authentication required"),
            AuthApiError::Forbidden => (StatusCode::FORBIDDEN, "insufficient permissions"),
            AuthApiError::UserNotFound => (StatusCode::NOT_FOUND, "user not found"),
            AuthApiError::UserAlreadyExists => (StatusCode::CONFLICT, "username already exists"),
            AuthApiError::WeakPassword => (
                StatusCode::BAD_REQUEST,
                "password must be at least 8 characters",
            ),
            AuthApiError::InvalidUserId => (StatusCode::BAD_REQUEST, "invalid user id format"),
            AuthApiError::CannotDeleteSelf => {
                (StatusCode::BAD_REQUEST, "cannot delete your own account")
            }
            AuthApiError::InternalError => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
            }
        };

        (status, message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::User;
    use chrono::Utc;

    #[test]
    fn user_response_from_user_hides_password_hash() {
        let user = User {
            id: Uuid::new_v4(),
            username: "testuser".to_string(),
            password_hash: "hash123".to_string(),
            role: Role::Merchant,
            tenant: "t1".to_string(),
            created_at: Utc::now().to_rfc3339(),
        };

        let response = UserResponse::from_user(&user);
        assert_eq!(response.username, "testuser");
        assert_eq!(response.role, Role::Merchant);
    }

    #[test]
    fn auth_api_error_responses_map_to_expected_status() {
        assert_eq!(
            AuthApiError::InvalidCredentials.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(AuthApiError::Forbidden.into_response().status(), StatusCode::FORBIDDEN);
        assert_eq!(AuthApiError::UserNotFound.into_response().status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AuthApiError::UserAlreadyExists.into_response().status(),
            StatusCode::CONFLICT
        );
    }
}
