use axum::{
    extract::{multipart::Field, DefaultBodyLimit, Multipart, Path, State},
    routing::{get, put},
    Json, Router,
};
use bytes::BytesMut;
use tracing::{instrument, warn};

use super::{
    dto::{CreateUserRequest, CreatedUser, MessageResponse, SearchPage, SearchQuery, UpdateUserRequest},
    repo_types::PublicUser,
    services::{self, ProfileUpdate},
};
use crate::{
    auth::{
        dto::UserEnvelope,
        extractors::{AdminUser, AuthUser},
    },
    error::AppError,
    extract::{AppJson, AppQuery},
    images::services::{too_large, UploadItem},
    state::AppState,
};

/// Headroom on top of the image limit for the other multipart fields.
const FORM_OVERHEAD: usize = 64 * 1024;

pub fn user_routes(upload_limit: usize) -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route("/users/search", get(search_users))
        .route(
            "/users/profile",
            put(update_profile).layer(DefaultBodyLimit::max(upload_limit + FORM_OVERHEAD)),
        )
        .route(
            "/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
}

#[instrument(skip_all)]
pub async fn list_users(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
) -> Result<Json<Vec<PublicUser>>, AppError> {
    Ok(Json(state.users.list().await?))
}

#[instrument(skip(state, _admin))]
pub async fn search_users(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    AppQuery(query): AppQuery<SearchQuery>,
) -> Result<Json<SearchPage>, AppError> {
    services::search(&state, query).await.map(Json)
}

#[instrument(skip(state, _user))]
pub async fn get_user(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<PublicUser>, AppError> {
    services::get_user(&state, &id).await.map(Json)
}

#[instrument(skip_all)]
pub async fn create_user(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    AppJson(payload): AppJson<CreateUserRequest>,
) -> Result<Json<CreatedUser>, AppError> {
    services::create_user(&state, payload).await.map(Json)
}

#[instrument(skip(state, _admin, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<String>,
    AppJson(payload): AppJson<UpdateUserRequest>,
) -> Result<Json<PublicUser>, AppError> {
    services::update_user(&state, &id, payload).await.map(Json)
}

#[instrument(skip(state, _admin))]
pub async fn delete_user(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    services::delete_user(&state, &id).await?;
    Ok(Json(MessageResponse {
        message: "User deleted successfully".into(),
    }))
}

/// PUT /users/profile (multipart)
/// Fields: name, email, profileImage (optional file).
#[instrument(skip_all)]
pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    mut mp: Multipart,
) -> Result<Json<UserEnvelope>, AppError> {
    let max_bytes = state.config.uploads.max_bytes;
    let mut update = ProfileUpdate::default();

    while let Some(field) = mp
        .next_field()
        .await
        .map_err(|e| AppError::invalid_upload(e.body_text()))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("name") => update.name = Some(read_text(field).await?),
            Some("email") => update.email = Some(read_text(field).await?),
            Some("profileImage") => {
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let file_name = field.file_name().map(str::to_string);
                let body = read_capped(field, max_bytes).await?;
                // Browsers send an empty, unnamed part when no file was picked.
                if body.is_empty() && file_name.as_deref().unwrap_or_default().is_empty() {
                    continue;
                }
                update.image = Some(UploadItem {
                    body,
                    content_type,
                    file_name,
                });
            }
            other => warn!(field = ?other, "ignoring unknown multipart field"),
        }
    }

    let user = services::update_profile(&state, &me, update).await?;
    Ok(Json(UserEnvelope { user }))
}

async fn read_text(field: Field<'_>) -> Result<String, AppError> {
    field
        .text()
        .await
        .map_err(|e| AppError::invalid_upload(e.body_text()))
}

/// Streams a file field, giving up as soon as it exceeds `max_bytes`.
async fn read_capped(mut field: Field<'_>, max_bytes: usize) -> Result<bytes::Bytes, AppError> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| AppError::invalid_upload(e.body_text()))?
    {
        if buf.len() + chunk.len() > max_bytes {
            return Err(too_large(max_bytes));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}
