use anyhow::Context;
use axum::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::repo_types::{NewUser, PublicUser, User, UserChanges};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("email already in use")]
    DuplicateEmail,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The credential store. Emails passed in are expected to be normalized
/// (trimmed, lower-cased); lookups still compare case-insensitively.
#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<PublicUser>, StoreError>;

    /// The only lookup that returns the password hash; used by login.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn insert(&self, user: NewUser) -> Result<PublicUser, StoreError>;

    /// Returns `None` when no row has `id`.
    async fn update(&self, id: Uuid, changes: UserChanges)
        -> Result<Option<PublicUser>, StoreError>;

    /// Returns the removed row, if any.
    async fn delete(&self, id: Uuid) -> Result<Option<PublicUser>, StoreError>;

    async fn list(&self) -> Result<Vec<PublicUser>, StoreError>;

    /// Case-insensitive substring match on name or email, oldest first.
    /// Returns the requested page and the total number of matches.
    async fn search(
        &self,
        needle: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<PublicUser>, i64), StoreError>;
}

const PUBLIC_COLUMNS: &str = "id, name, email, role, profile_image, created_at, updated_at";

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgUserRepo {
    db: PgPool,
}

impl PgUserRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn map_sqlx(err: sqlx::Error, what: &'static str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::DuplicateEmail,
        _ => StoreError::Other(anyhow::Error::new(err).context(what)),
    }
}

/// Escapes LIKE metacharacters so the needle matches literally.
pub(crate) fn like_pattern(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len() + 2);
    out.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

#[async_trait]
impl UserRepo for PgUserRepo {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<PublicUser>, StoreError> {
        sqlx::query_as::<_, PublicUser>(&format!(
            "SELECT {PUBLIC_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| map_sqlx(e, "find user by id"))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, password_hash, role, profile_image, created_at, updated_at
            FROM users
            WHERE lower(email) = lower($1)
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| map_sqlx(e, "find user by email"))
    }

    async fn insert(&self, user: NewUser) -> Result<PublicUser, StoreError> {
        sqlx::query_as::<_, PublicUser>(&format!(
            r#"
            INSERT INTO users (id, name, email, password_hash, role, profile_image)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {PUBLIC_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(&user.profile_image)
        .fetch_one(&self.db)
        .await
        .map_err(|e| map_sqlx(e, "insert user"))
    }

    async fn update(
        &self,
        id: Uuid,
        changes: UserChanges,
    ) -> Result<Option<PublicUser>, StoreError> {
        sqlx::query_as::<_, PublicUser>(&format!(
            r#"
            UPDATE users
               SET name          = COALESCE($2, name),
                   email         = COALESCE($3, email),
                   role          = COALESCE($4, role),
                   profile_image = COALESCE($5, profile_image),
                   updated_at    = now()
             WHERE id = $1
            RETURNING {PUBLIC_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(changes.name)
        .bind(changes.email)
        .bind(changes.role.map(|r| r.as_str()))
        .bind(changes.profile_image)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| map_sqlx(e, "update user"))
    }

    async fn delete(&self, id: Uuid) -> Result<Option<PublicUser>, StoreError> {
        sqlx::query_as::<_, PublicUser>(&format!(
            "DELETE FROM users WHERE id = $1 RETURNING {PUBLIC_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| map_sqlx(e, "delete user"))
    }

    async fn list(&self) -> Result<Vec<PublicUser>, StoreError> {
        sqlx::query_as::<_, PublicUser>(&format!(
            "SELECT {PUBLIC_COLUMNS} FROM users ORDER BY created_at ASC"
        ))
        .fetch_all(&self.db)
        .await
        .map_err(|e| map_sqlx(e, "list users"))
    }

    async fn search(
        &self,
        needle: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<PublicUser>, i64), StoreError> {
        let pattern = like_pattern(needle);
        let rows = sqlx::query_as::<_, PublicUser>(&format!(
            r#"
            SELECT {PUBLIC_COLUMNS}
              FROM users
             WHERE name ILIKE $1 OR email ILIKE $1
             ORDER BY created_at ASC
             LIMIT $2 OFFSET $3
            "#
        ))
        .bind(&pattern)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await
        .map_err(|e| map_sqlx(e, "search users"))?;

        let (total,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM users WHERE name ILIKE $1 OR email ILIKE $1",
        )
        .bind(&pattern)
        .fetch_one(&self.db)
        .await
        .context("count search matches")?;

        Ok((rows, total))
    }
}

#[cfg(test)]
mod tests {
    use sqlx::postgres::PgPoolOptions;

    use super::*;
    use crate::users::repo_types::Role;

    #[test]
    fn like_pattern_escapes_metacharacters() {
        assert_eq!(like_pattern("ann"), "%ann%");
        assert_eq!(like_pattern("50%_off\\"), "%50\\%\\_off\\\\%");
    }

    async fn pg_repo() -> PgUserRepo {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a test database");
        let db = PgPoolOptions::new()
            .max_connections(2)
            .connect(&url)
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&db).await.unwrap();
        PgUserRepo::new(db)
    }

    /// Unique marker so tests sharing one database only see their own rows.
    fn tag() -> String {
        Uuid::new_v4().simple().to_string()
    }

    fn new_user(name: &str, email: &str, role: Role) -> NewUser {
        NewUser {
            name: name.into(),
            email: email.into(),
            password_hash: "$argon2id$stub".into(),
            role,
            profile_image: "/uploads/profile_default.jpg".into(),
        }
    }

    #[tokio::test]
    #[ignore] // Requires actual database
    async fn pg_email_is_unique_ignoring_case() {
        let repo = pg_repo().await;
        let t = tag();
        let a = repo
            .insert(new_user("A", &format!("a-{t}@x.com"), Role::Admin))
            .await
            .unwrap();
        assert_eq!(a.role, Role::Admin);

        let err = repo
            .insert(new_user("B", &format!("A-{t}@X.COM"), Role::User))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail));

        let found = repo
            .find_by_email(&format!("A-{t}@x.com"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, a.id);
        assert_eq!(found.role, Role::Admin);
        assert_eq!(found.password_hash, "$argon2id$stub");

        repo.delete(a.id).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires actual database
    async fn pg_update_only_touches_given_columns() {
        let repo = pg_repo().await;
        let t = tag();
        let a = repo
            .insert(new_user("A", &format!("a-{t}@x.com"), Role::User))
            .await
            .unwrap();
        let b = repo
            .insert(new_user("B", &format!("b-{t}@x.com"), Role::User))
            .await
            .unwrap();

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
        assert_eq!(updated.name, "A");
        assert_eq!(updated.email, a.email);
        assert_eq!(updated.profile_image, a.profile_image);
        assert!(updated.updated_at >= a.updated_at);

        let err = repo
            .update(
                a.id,
                UserChanges {
                    email: Some(b.email.clone()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail));

        assert!(repo
            .update(Uuid::new_v4(), UserChanges::default())
            .await
            .unwrap()
            .is_none());

        repo.delete(a.id).await.unwrap();
        repo.delete(b.id).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires actual database
    async fn pg_search_matches_literally_and_counts() {
        let repo = pg_repo().await;
        let t = tag();
        let mut ids = Vec::new();
        for name in ["50% off", "50x off", "Fifty off"] {
            let user = repo
                .insert(new_user(
                    &format!("{name} {t}"),
                    &format!("{}-{t}@x.com", ids.len()),
                    Role::User,
                ))
                .await
                .unwrap();
            ids.push(user.id);
        }

        let (page, total) = repo.search(&t, 2, 0).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 2);

        let (page, total) = repo.search("50% OFF", 10, 0).await.unwrap();
        assert!(page.iter().all(|u| u.name.starts_with("50% off")));
        assert!(page.iter().any(|u| u.id == ids[0]));
        assert!(total >= 1);
        assert!(!page.iter().any(|u| u.id == ids[1]));

        for id in ids {
            assert!(repo.delete(id).await.unwrap().is_some());
            assert!(repo.find_by_id(id).await.unwrap().is_none());
        }
    }
}
