//! Client-side session state: who is logged in, with which token, and what
//! the last request did. The token survives restarts through a [`TokenStore`].

use std::{
    io,
    path::PathBuf,
    sync::Mutex,
};

use anyhow::Context;
use tracing::warn;

use crate::{
    auth::dto::AuthResponse,
    users::repo_types::{PublicUser, Role},
};

/// Persistence for the bearer token between client runs.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Option<String>;
    fn save(&self, token: &str) -> anyhow::Result<()>;
    fn clear(&self) -> anyhow::Result<()>;
}

#[derive(Default)]
pub struct MemoryTokenStore {
    slot: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            slot: Mutex::new(Some(token.into())),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Option<String> {
        self.slot.lock().ok().and_then(|s| s.clone())
    }

    fn save(&self, token: &str) -> anyhow::Result<()> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| anyhow::anyhow!("token slot poisoned"))?;
        *slot = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> anyhow::Result<()> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| anyhow::anyhow!("token slot poisoned"))?;
        *slot = None;
        Ok(())
    }
}

/// Token kept in a single file.
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Option<String> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        let token = raw.trim();
        (!token.is_empty()).then(|| token.to_string())
    }

    fn save(&self, token: &str) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        std::fs::write(&self.path, token)
            .with_context(|| format!("write {}", self.path.display()))
    }

    fn clear(&self) -> anyhow::Result<()> {
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                Err(e).with_context(|| format!("remove {}", self.path.display()))
            }
            _ => Ok(()),
        }
    }
}

pub struct ClientSession<S: TokenStore> {
    store: S,
    token: Option<String>,
    user: Option<PublicUser>,
    loading: bool,
    error: Option<String>,
}

impl<S: TokenStore> ClientSession<S> {
    /// Rehydrates the token from `store`. The user stays unknown until the
    /// caller confirms the token with the server.
    pub fn new(store: S) -> Self {
        Self {
            token: store.load(),
            store,
            user: None,
            loading: false,
            error: None,
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn user(&self) -> Option<&PublicUser> {
        self.user.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub fn is_admin(&self) -> bool {
        match self.user.as_ref().map(|u| u.role) {
            Some(Role::Admin) => true,
            Some(Role::User) | None => false,
        }
    }

    pub fn begin(&mut self) {
        self.loading = true;
        self.error = None;
    }

    /// Login or registration succeeded.
    pub fn authenticated(&mut self, res: AuthResponse) {
        if let Err(e) = self.store.save(&res.token) {
            warn!(error = ?e, "could not persist session token");
        }
        self.token = Some(res.token);
        self.user = Some(res.user);
        self.loading = false;
    }

    pub fn rejected(&mut self, message: impl Into<String>) {
        self.loading = false;
        self.error = Some(message.into());
    }

    /// Fresh copy of the current user, from `/auth/me` or a profile edit.
    pub fn set_user(&mut self, user: PublicUser) {
        self.user = Some(user);
        self.loading = false;
    }

    /// The stored token was refused by the server.
    pub fn restore_failed(&mut self) {
        self.drop_credentials();
        self.loading = false;
    }

    pub fn logout(&mut self) {
        self.drop_credentials();
        self.error = None;
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    fn drop_credentials(&mut self) {
        if let Err(e) = self.store.clear() {
            warn!(error = ?e, "could not clear persisted session token");
        }
        self.token = None;
        self.user = None;
    }
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;
    use uuid::Uuid;

    use super::*;

    fn user(role: Role) -> PublicUser {
        PublicUser {
            id: Uuid::new_v4(),
            name: "Ann".into(),
            email: "ann@x.com".into(),
            role,
            profile_image: "/uploads/profile_default.jpg".into(),
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn rehydrates_from_store() {
        let session = ClientSession::new(MemoryTokenStore::with_token("tok"));
        assert!(session.is_authenticated());
        assert_eq!(session.token(), Some("tok"));
        assert!(session.user().is_none());

        let empty = ClientSession::new(MemoryTokenStore::default());
        assert!(!empty.is_authenticated());
    }

    #[test]
    fn login_logout_cycle_keeps_store_in_sync() {
        let mut session = ClientSession::new(MemoryTokenStore::default());
        session.begin();
        assert!(session.is_loading());

        session.authenticated(AuthResponse {
            token: "t1".into(),
            user: user(Role::Admin),
        });
        assert!(!session.is_loading());
        assert!(session.is_admin());
        assert_eq!(session.store.load().as_deref(), Some("t1"));

        session.logout();
        assert!(!session.is_authenticated());
        assert!(session.user().is_none());
        assert_eq!(session.store.load(), None);
    }

    #[test]
    fn rejection_records_error_until_cleared() {
        let mut session = ClientSession::new(MemoryTokenStore::default());
        session.begin();
        session.rejected("Invalid credentials");
        assert_eq!(session.error(), Some("Invalid credentials"));
        assert!(!session.is_loading());
        session.clear_error();
        assert_eq!(session.error(), None);
    }

    #[test]
    fn restore_failure_forgets_token() {
        let mut session = ClientSession::new(MemoryTokenStore::with_token("stale"));
        session.restore_failed();
        assert!(!session.is_authenticated());
        assert_eq!(session.store.load(), None);
    }

    #[test]
    fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("nested/token"));
        assert_eq!(store.load(), None);
        store.save("abc").unwrap();
        assert_eq!(store.load().as_deref(), Some("abc"));
        store.clear().unwrap();
        store.clear().unwrap();
        assert_eq!(store.load(), None);
    }
}
