use tracing::{info, warn};
use uuid::Uuid;

use super::{
    dto::{
        CreateUserRequest, CreatedUser, SearchPage, SearchQuery, UpdateUserRequest,
        DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
    },
    repo_types::{NewUser, PublicUser, Role, UserChanges},
};
use crate::{
    auth::{
        password::{generate_temporary_password, hash_password},
        services::{normalize_email, normalize_name, MIN_PASSWORD_LEN},
    },
    error::AppError,
    images::services::{discard_image, store_image, validate_upload, UploadItem},
    state::AppState,
};

/// Fields of a profile edit. Absent fields keep their current value.
#[derive(Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub image: Option<UploadItem>,
}

/// Path ids that are not UUIDs can't name a user.
pub fn parse_user_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::user_not_found())
}

/// `Err(DuplicateEmail)` when `email` belongs to someone other than `owner`.
async fn ensure_email_free(st: &AppState, email: &str, owner: Option<Uuid>) -> Result<(), AppError> {
    match st.users.find_by_email(email).await? {
        Some(existing) if Some(existing.id) != owner => {
            warn!(email = %email, "email already in use");
            Err(AppError::DuplicateEmail)
        }
        _ => Ok(()),
    }
}

/// Applies a user's own profile edit. `me` comes from the auth gate, so a
/// user can only ever edit their own record.
///
/// The new image is written and the old one removed before the record is
/// updated; a failed store write leaves the new file orphaned.
pub async fn update_profile(
    st: &AppState,
    me: &PublicUser,
    update: ProfileUpdate,
) -> Result<PublicUser, AppError> {
    let mut changes = UserChanges::default();

    if let Some(raw) = update.email.filter(|e| !e.trim().is_empty()) {
        let email = normalize_email(&raw)?;
        if email != me.email {
            ensure_email_free(st, &email, Some(me.id)).await?;
            changes.email = Some(email);
        }
    }

    if let Some(name) = update.name {
        changes.name = Some(normalize_name(&name)?);
    }

    if let Some(item) = update.image {
        validate_upload(&item, st.config.uploads.max_bytes)?;
        let reference = store_image(st.storage.as_ref(), item).await?;

        let placeholder = st.config.uploads.default_image_path();
        if let Err(e) = discard_image(st.storage.as_ref(), &me.profile_image, &placeholder).await {
            warn!(error = ?e, previous = %me.profile_image, "could not remove previous image");
        }
        changes.profile_image = Some(reference);
    }

    let user = st
        .users
        .update(me.id, changes)
        .await?
        .ok_or_else(AppError::user_not_found)?;
    info!(user_id = %user.id, "profile updated");
    Ok(user)
}

pub async fn get_user(st: &AppState, raw_id: &str) -> Result<PublicUser, AppError> {
    let id = parse_user_id(raw_id)?;
    st.users
        .find_by_id(id)
        .await?
        .ok_or_else(AppError::user_not_found)
}

pub async fn search(st: &AppState, query: SearchQuery) -> Result<SearchPage, AppError> {
    let needle = query.q.unwrap_or_default();
    let page = query.page.unwrap_or(1).max(1);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let offset = (page - 1).saturating_mul(limit);

    let (users, total) = st.users.search(needle.trim(), limit, offset).await?;
    Ok(SearchPage {
        users,
        total_pages: (total + limit - 1) / limit,
        current_page: page,
    })
}

pub async fn create_user(st: &AppState, req: CreateUserRequest) -> Result<CreatedUser, AppError> {
    let name = normalize_name(&req.name)?;
    let email = normalize_email(&req.email)?;
    ensure_email_free(st, &email, None).await?;

    let (password, temporary_password) = match req.password {
        Some(p) if p.len() < MIN_PASSWORD_LEN => {
            return Err(AppError::validation("Password too short"));
        }
        Some(p) => (p, None),
        None => {
            let p = generate_temporary_password();
            (p.clone(), Some(p))
        }
    };

    let user = st
        .users
        .insert(NewUser {
            name,
            email,
            password_hash: hash_password(&password)?,
            role: req.role.unwrap_or(Role::User),
            profile_image: st.config.uploads.default_image_path(),
        })
        .await?;

    info!(user_id = %user.id, role = %user.role, "user created by admin");
    Ok(CreatedUser {
        user,
        temporary_password,
    })
}

pub async fn update_user(
    st: &AppState,
    raw_id: &str,
    req: UpdateUserRequest,
) -> Result<PublicUser, AppError> {
    let id = parse_user_id(raw_id)?;
    let current = st
        .users
        .find_by_id(id)
        .await?
        .ok_or_else(AppError::user_not_found)?;

    let mut changes = UserChanges {
        role: req.role,
        ..Default::default()
    };
    if let Some(name) = req.name {
        changes.name = Some(normalize_name(&name)?);
    }
    if let Some(raw) = req.email {
        let email = normalize_email(&raw)?;
        if email != current.email {
            ensure_email_free(st, &email, Some(id)).await?;
            changes.email = Some(email);
        }
    }

    let user = st
        .users
        .update(id, changes)
        .await?
        .ok_or_else(AppError::user_not_found)?;
    info!(user_id = %user.id, role = %user.role, "user updated by admin");
    Ok(user)
}

/// Removes the account and, best effort, its uploaded image. Tokens already
/// issued to it stay valid until they expire but no longer pass the gate.
pub async fn delete_user(st: &AppState, raw_id: &str) -> Result<(), AppError> {
    let id = parse_user_id(raw_id)?;
    let removed = st
        .users
        .delete(id)
        .await?
        .ok_or_else(AppError::user_not_found)?;

    let placeholder = st.config.uploads.default_image_path();
    if let Err(e) = discard_image(st.storage.as_ref(), &removed.profile_image, &placeholder).await {
        warn!(error = ?e, user_id = %id, "could not remove image of deleted user");
    }
    info!(user_id = %id, "user deleted");
    Ok(())
}
