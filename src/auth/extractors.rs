use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use tracing::{debug, warn};

use super::jwt::JwtKeys;
use crate::{
    error::AppError,
    state::AppState,
    users::repo_types::{PublicUser, Role},
};

/// Stage one of the gate: a valid bearer token whose subject still exists.
/// Holds the user as loaded for this request, without the password hash.
pub struct AuthUser(pub PublicUser);

/// Stage two: an `AuthUser` whose role is admin.
pub struct AdminUser(pub PublicUser);

fn bearer_token(parts: &Parts) -> Result<&str, AppError> {
    let header = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthenticated("No token, authorization failed"))?;

    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AppError::Unauthenticated("Invalid Authorization header"))
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;

        let keys = JwtKeys::from_ref(state);
        let claims = keys.verify(token).map_err(|e| {
            warn!(error = %e, "rejecting bearer token");
            AppError::Unauthenticated("Token is not valid")
        })?;

        let user = state.users.find_by_id(claims.sub).await?.ok_or_else(|| {
            warn!(user_id = %claims.sub, "token subject no longer exists");
            AppError::Unauthenticated("Token is not valid")
        })?;

        debug!(user_id = %user.id, role = %user.role, "authenticated");
        Ok(AuthUser(user))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        match user.role {
            Role::Admin => Ok(AdminUser(user)),
            Role::User => {
                warn!(user_id = %user.id, "admin route denied");
                Err(AppError::Forbidden)
            }
        }
    }
}
