//! Authentication: user accounts, bearer tokens and request extractors.
//!
//! Handlers take [`AuthUser`] to require a signed-in caller and [`StaffUser`]
//! to require a staff account. The caller's identity is always derived from
//! the `Authorization: Bearer <token>` header, never from the request body.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use chrono::{DateTime, Duration, Utc};
use tracing::info;

pub mod credentials;

use crate::models::user::{normalize_email, validate_password, Credentials, ProfileUpdate};
use crate::models::{NewUser, User};
use crate::state::AppState;
use crate::store::UserRepository;
use crate::utils::AppError;
use credentials::{generate_token, hash_password, hash_token, verify_password};

/// The authenticated caller.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

/// An authenticated caller with `is_staff` set.
#[derive(Debug, Clone)]
pub struct StaffUser(pub User);

/// The raw bearer token of the request, unchecked.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

fn bearer_token(parts: &Parts) -> Result<&str, AppError> {
    let auth_header = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            AppError::AuthError("Authentication credentials were not provided.".to_string())
        })?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .ok_or_else(|| {
            AppError::AuthError("Invalid authorization format. Expected 'Bearer <token>'".to_string())
        })?;

    if token.is_empty() {
        return Err(AppError::AuthError("Empty bearer token".to_string()));
    }
    Ok(token)
}

#[async_trait]
impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, AppError> {
        bearer_token(parts).map(|token| Self(token.to_string()))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let token = bearer_token(parts)?;
        let user = state
            .store
            .find_user_by_token(&hash_token(token))
            .await?
            .ok_or_else(|| AppError::AuthError("Invalid token.".to_string()))?;
        Ok(Self(user))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for StaffUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_staff {
            return Err(AppError::Forbidden(
                "You do not have permission to perform this action.".to_string(),
            ));
        }
        Ok(Self(user))
    }
}

/// Registers a regular (non-staff) account.
pub async fn register<S>(store: &S, credentials: &Credentials) -> Result<User, AppError>
where
    S: UserRepository + ?Sized,
{
    let email = normalize_email(&credentials.email)?;
    validate_password(&credentials.password)?;

    let user = store
        .create_user(&NewUser {
            email,
            password_hash: hash_password(&credentials.password),
            is_staff: false,
        })
        .await?;
    info!(user_id = user.id, "User registered");
    Ok(user)
}

/// Checks the credentials and issues a new bearer token valid for `ttl`.
pub async fn issue_token<S>(
    store: &S,
    credentials: &Credentials,
    ttl: Duration,
) -> Result<String, AppError>
where
    S: UserRepository + ?Sized,
{
    let invalid = || AppError::AuthError("Unable to log in with provided credentials.".to_string());

    let email = normalize_email(&credentials.email).map_err(|_| invalid())?;
    let user = store.find_user_by_email(&email).await?.ok_or_else(invalid)?;
    if !verify_password(&credentials.password, &user.password_hash) {
        return Err(invalid());
    }

    let expires_at = Utc::now()
        .checked_add_signed(ttl)
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    let token = generate_token();
    store
        .store_token(user.id, &hash_token(&token), expires_at)
        .await?;
    info!(user_id = user.id, %expires_at, "Token issued");
    Ok(token)
}

/// Invalidates a bearer token. Unknown tokens are ignored.
pub async fn revoke_token<S>(store: &S, token: &str) -> Result<(), AppError>
where
    S: UserRepository + ?Sized,
{
    store.revoke_token(&hash_token(token)).await?;
    Ok(())
}

/// Applies a partial profile update; a new password is re-hashed.
pub async fn update_profile<S>(
    store: &S,
    user: &User,
    update: &ProfileUpdate,
) -> Result<User, AppError>
where
    S: UserRepository + ?Sized,
{
    let email = match &update.email {
        Some(email) => normalize_email(email)?,
        None => user.email.clone(),
    };
    let password_hash = match &update.password {
        Some(password) => {
            validate_password(password)?;
            hash_password(password)
        }
        None => user.password_hash.clone(),
    };

    Ok(store.update_user(user.id, &email, &password_hash).await?)
}

/// Creates the staff account if no user with that email exists yet.
pub async fn ensure_staff<S>(store: &S, email: &str, password: &str) -> Result<User, AppError>
where
    S: UserRepository + ?Sized,
{
    let email = normalize_email(email)?;
    if let Some(existing) = store.find_user_by_email(&email).await? {
        return Ok(existing);
    }
    validate_password(password)?;

    let user = store
        .create_user(&NewUser {
            email,
            password_hash: hash_password(password),
            is_staff: true,
        })
        .await?;
    info!(user_id = user.id, "Staff account created");
    Ok(user)
}
