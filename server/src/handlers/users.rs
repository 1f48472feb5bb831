use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Json,
};

use crate::auth::{self, AuthUser, BearerToken};
use crate::models::user::{Credentials, ProfileUpdate, TokenResponse};
use crate::models::UserProfile;
use crate::state::AppState;
use crate::utils::response::{created, empty_success, success};
use crate::utils::AppError;

pub async fn register(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> Result<Response, AppError> {
    let user = auth::register(state.store.as_ref(), &credentials).await?;
    Ok(created(UserProfile::from(&user), "User registered").into_response())
}

pub async fn obtain_token(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> Result<Response, AppError> {
    let token =
        auth::issue_token(state.store.as_ref(), &credentials, state.token_ttl).await?;
    let payload = TokenResponse {
        token,
        token_type: "Bearer",
    };
    Ok(success(payload, "Token issued").into_response())
}

/// Logs out by revoking the token the request was made with.
pub async fn revoke_token(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    BearerToken(token): BearerToken,
) -> Result<Response, AppError> {
    auth::revoke_token(state.store.as_ref(), &token).await?;
    tracing::info!(user_id = user.id, "Token revoked");
    Ok(empty_success("Token revoked").into_response())
}

pub async fn me(AuthUser(user): AuthUser) -> Response {
    success(UserProfile::from(&user), "User retrieved").into_response()
}

pub async fn update_me(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(update): Json<ProfileUpdate>,
) -> Result<Response, AppError> {
    let user = auth::update_profile(state.store.as_ref(), &user, &update).await?;
    Ok(success(UserProfile::from(&user), "User updated").into_response())
}
