use std::{collections::HashMap, sync::RwLock};

use axum::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo::{StoreError, UserRepo};
use super::repo_types::{NewUser, PublicUser, User, UserChanges};

/// Process-local store used when no database is configured, and by tests.
#[derive(Default)]
pub struct MemoryUserRepo {
    rows: RwLock<HashMap<Uuid, User>>,
}

impl MemoryUserRepo {
    pub fn new() -> Self {
        Self::default()
    }

    fn email_taken(rows: &HashMap<Uuid, User>, email: &str, except: Option<Uuid>) -> bool {
        rows.values()
            .any(|u| Some(u.id) != except && u.email.eq_ignore_ascii_case(email))
    }

    fn sorted(rows: impl Iterator<Item = User>) -> Vec<PublicUser> {
        let mut out: Vec<User> = rows.collect();
        out.sort_by_key(|u| (u.created_at, u.id));
        out.into_iter().map(User::into_public).collect()
    }
}

fn poisoned() -> StoreError {
    StoreError::Other(anyhow::anyhow!("user store lock poisoned"))
}

#[async_trait]
impl UserRepo for MemoryUserRepo {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<PublicUser>, StoreError> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        Ok(rows.get(&id).cloned().map(User::into_public))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        Ok(rows
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn insert(&self, user: NewUser) -> Result<PublicUser, StoreError> {
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        if Self::email_taken(&rows, &user.email, None) {
            return Err(StoreError::DuplicateEmail);
        }
        let now = OffsetDateTime::now_utc();
        let row = User {
            id: Uuid::new_v4(),
            name: user.name,
            email: user.email,
            password_hash: user.password_hash,
            role: user.role,
            profile_image: user.profile_image,
            created_at: now,
            updated_at: now,
        };
        rows.insert(row.id, row.clone());
        Ok(row.into_public())
    }

    async fn update(
        &self,
        id: Uuid,
        changes: UserChanges,
    ) -> Result<Option<PublicUser>, StoreError> {
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        if let Some(email) = &changes.email {
            if Self::email_taken(&rows, email, Some(id)) {
                return Err(StoreError::DuplicateEmail);
            }
        }
        let Some(row) = rows.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = changes.name {
            row.name = name;
        }
        if let Some(email) = changes.email {
            row.email = email;
        }
        if let Some(role) = changes.role {
            row.role = role;
        }
        if let Some(image) = changes.profile_image {
            row.profile_image = image;
        }
        row.updated_at = OffsetDateTime::now_utc();
        Ok(Some(row.clone().into_public()))
    }

    async fn delete(&self, id: Uuid) -> Result<Option<PublicUser>, StoreError> {
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        Ok(rows.remove(&id).map(User::into_public))
    }

    async fn list(&self) -> Result<Vec<PublicUser>, StoreError> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        Ok(Self::sorted(rows.values().cloned()))
    }

    async fn search(
        &self,
        needle: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<PublicUser>, i64), StoreError> {
        let needle = needle.to_lowercase();
        let rows = self.rows.read().map_err(|_| poisoned())?;
        let matches = Self::sorted(rows.values().cloned().filter(|u| {
            u.name.to_lowercase().contains(&needle) || u.email.to_lowercase().contains(&needle)
        }));
        let total = matches.len() as i64;
        let page = matches
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::repo_types::Role;

    fn new_user(name: &str, email: &str) -> NewUser {
        NewUser {
            name: name.into(),
            email: email.into(),
            password_hash: "hash".into(),
            role: Role::User,
            profile_image: "/uploads/profile_default.jpg".into(),
        }
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_email_case_insensitively() {
        let repo = MemoryUserRepo::new();
        repo.insert(new_user("A", "a@x.com")).await.unwrap();
        let err = repo.insert(new_user("B", "A@X.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail));
    }

    #[tokio::test]
    async fn update_is_partial_and_keeps_email_unique() {
        let repo = MemoryUserRepo::new();
        let a = repo.insert(new_user("A", "a@x.com")).await.unwrap();
        repo.insert(new_user("B", "b@x.com")).await.unwrap();

        let err = repo
            .update(
                a.id,
                UserChanges {
                    email: Some("b@x.com".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail));

        let updated = repo
            .update(
                a.id,
                UserChanges {
                    role: Some(Role::Admin),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.role, Role::Admin);
        assert_eq!(updated.email, "a@x.com");
        assert_eq!(updated.name, "A");
    }

    #[tokio::test]
    async fn search_pages_over_name_and_email() {
        let repo = MemoryUserRepo::new();
        repo.insert(new_user("Anna", "anna@x.com")).await.unwrap();
        repo.insert(new_user("Bob", "bob@joanna.org")).await.unwrap();
        repo.insert(new_user("Carl", "carl@x.com")).await.unwrap();

        let (page, total) = repo.search("ANNA", 1, 0).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(page.len(), 1);

        let (page, _) = repo.search("anna", 1, 1).await.unwrap();
        assert_eq!(page.len(), 1);

        let (page, total) = repo.search("", 10, 0).await.unwrap();
        assert_eq!((page.len(), total), (3, 3));
    }

    #[tokio::test]
    async fn delete_returns_removed_row_once() {
        let repo = MemoryUserRepo::new();
        let a = repo.insert(new_user("A", "a@x.com")).await.unwrap();
        assert!(repo.delete(a.id).await.unwrap().is_some());
        assert!(repo.delete(a.id).await.unwrap().is_none());
        assert!(repo.find_by_id(a.id).await.unwrap().is_none());
    }
}
