use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{AuthResponse, LoginRequest, RegisterRequest, UserEnvelope},
        extractors::AuthUser,
        jwt::JwtKeys,
        services,
    },
    error::AppError,
    extract::AppJson,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/me", get(get_me))
}

#[instrument(skip_all)]
pub async fn register(
    State(state): State<AppState>,
    State(keys): State<JwtKeys>,
    AppJson(payload): AppJson<RegisterRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    services::register(&state, &keys, payload).await.map(Json)
}

#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    State(keys): State<JwtKeys>,
    AppJson(payload): AppJson<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    services::login(&state, &keys, payload).await.map(Json)
}

pub async fn get_me(AuthUser(user): AuthUser) -> Json<UserEnvelope> {
    Json(UserEnvelope { user })
}
