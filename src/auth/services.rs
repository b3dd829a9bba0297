use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, warn};

use super::{
    dto::{AuthResponse, LoginRequest, RegisterRequest},
    jwt::JwtKeys,
    password::{hash_password, verify_password},
};
use crate::{
    config::AdminSeed,
    error::AppError,
    state::AppState,
    users::repo_types::{NewUser, PublicUser, Role},
};

pub const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Trim + lowercase, then syntax check.
pub(crate) fn normalize_email(raw: &str) -> Result<String, AppError> {
    let email = raw.trim().to_lowercase();
    if !is_valid_email(&email) {
        return Err(AppError::validation("Invalid email"));
    }
    Ok(email)
}

pub(crate) fn normalize_name(raw: &str) -> Result<String, AppError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(AppError::validation("Name is required"));
    }
    Ok(name.to_string())
}

fn issue_for(keys: &JwtKeys, user: PublicUser) -> Result<AuthResponse, AppError> {
    let token = keys.issue(user.id, user.role)?;
    Ok(AuthResponse { token, user })
}

pub async fn register(
    st: &AppState,
    keys: &JwtKeys,
    req: RegisterRequest,
) -> Result<AuthResponse, AppError> {
    let name = normalize_name(&req.name)?;
    let email = normalize_email(&req.email)?;
    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(AppError::validation("Password too short"));
    }

    if st.users.find_by_email(&email).await?.is_some() {
        warn!(email = %email, "email already registered");
        return Err(AppError::DuplicateEmail);
    }

    let password_hash = hash_password(&req.password)?;
    let user = st
        .users
        .insert(NewUser {
            name,
            email,
            password_hash,
            role: Role::User,
            profile_image: st.config.uploads.default_image_path(),
        })
        .await?;

    info!(user_id = %user.id, email = %user.email, "user registered");
    issue_for(keys, user)
}

pub async fn login(
    st: &AppState,
    keys: &JwtKeys,
    req: LoginRequest,
) -> Result<AuthResponse, AppError> {
    let email = req.email.trim().to_lowercase();

    let Some(user) = st.users.find_by_email(&email).await? else {
        warn!(email = %email, "login unknown email");
        return Err(AppError::AccountNotFound);
    };

    if !verify_password(&req.password, &user.password_hash)? {
        warn!(email = %email, user_id = %user.id, "login invalid password");
        return Err(AppError::InvalidCredentials);
    }

    info!(user_id = %user.id, "user logged in");
    issue_for(keys, user.into_public())
}

/// Creates the configured admin account unless its email is already taken.
/// An existing account is left as is, whatever its role.
pub async fn ensure_admin(st: &AppState, seed: &AdminSeed) -> anyhow::Result<()> {
    let email = seed.email.trim().to_lowercase();
    if let Some(existing) = st.users.find_by_email(&email).await? {
        if existing.role != Role::Admin {
            warn!(email = %email, "bootstrap admin email belongs to a non-admin account");
        }
        return Ok(());
    }
    let user = st
        .users
        .insert(NewUser {
            name: seed.name.clone(),
            email,
            password_hash: hash_password(&seed.password)?,
            role: Role::Admin,
            profile_image: st.config.uploads.default_image_path(),
        })
        .await?;
    info!(user_id = %user.id, email = %user.email, "bootstrap admin created");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register_req(name: &str, email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            name: name.into(),
            email: email.into(),
            password: password.into(),
        }
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("a@x.com"));
        assert!(!is_valid_email("a@x"));
        assert!(!is_valid_email("a x@y.com"));
        assert_eq!(normalize_email("  A@X.Com ").unwrap(), "a@x.com");
    }

    #[tokio::test]
    async fn registered_token_names_the_new_user() {
        let (st, _dir) = AppState::fake().await;
        let keys = JwtKeys::new(&st.config.jwt);

        let res = register(&st, &keys, register_req("Ann", "Ann@X.com", "password1"))
            .await
            .unwrap();
        let claims = keys.verify(&res.token).unwrap();
        assert_eq!(claims.sub, res.user.id);
        assert_eq!(claims.role, Role::User);
        assert_eq!(res.user.email, "ann@x.com");
        assert_eq!(res.user.profile_image, "/uploads/profile_default.jpg");

        let err = register(&st, &keys, register_req("Other", "ann@x.com", "password2"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DuplicateEmail));
    }

    #[tokio::test]
    async fn register_validates_input() {
        let (st, _dir) = AppState::fake().await;
        let keys = JwtKeys::new(&st.config.jwt);
        let err = register(&st, &keys, register_req("Ann", "ann@x.com", "short"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        let err = register(&st, &keys, register_req("  ", "ann@x.com", "password1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn login_distinguishes_unknown_email_from_bad_password() {
        let (st, _dir) = AppState::fake().await;
        let keys = JwtKeys::new(&st.config.jwt);
        register(&st, &keys, register_req("Ann", "ann@x.com", "password1"))
            .await
            .unwrap();

        let err = login(
            &st,
            &keys,
            LoginRequest {
                email: "ann@x.com".into(),
                password: "wrong-password".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidCredentials));

        let err = login(
            &st,
            &keys,
            LoginRequest {
                email: "nobody@x.com".into(),
                password: "password1".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::AccountNotFound));

        let ok = login(
            &st,
            &keys,
            LoginRequest {
                email: "ANN@x.com".into(),
                password: "password1".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(keys.verify(&ok.token).unwrap().sub, ok.user.id);
    }

    #[tokio::test]
    async fn ensure_admin_is_idempotent() {
        let (st, _dir) = AppState::fake().await;
        let seed = AdminSeed {
            name: "Root".into(),
            email: "Root@X.com".into(),
            password: "Admin@123".into(),
        };
        ensure_admin(&st, &seed).await.unwrap();
        ensure_admin(&st, &seed).await.unwrap();

        let users = st.users.list().await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].role, Role::Admin);
        assert_eq!(users[0].email, "root@x.com");
    }
}
