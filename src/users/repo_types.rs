use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Access level of an account. Every role check matches on this exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown role `{0}`")]
pub struct UnknownRole(String);

impl TryFrom<String> for Role {
    type Error = UnknownRole;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            _ => Err(UnknownRole(value)),
        }
    }
}

/// User record in the database, password hash included.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String, // Argon2 PHC string
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub profile_image: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl User {
    pub fn into_public(self) -> PublicUser {
        PublicUser {
            id: self.id,
            name: self.name,
            email: self.email,
            role: self.role,
            profile_image: self.profile_image,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// User as seen by everything outside the store: no password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub profile_image: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Values for a row about to be inserted. Email must already be normalized.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub profile_image: String,
}

/// Partial update; `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
    pub profile_image: Option<String>,
}

impl UserChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.email.is_none()
            && self.role.is_none()
            && self.profile_image.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_only_known_values() {
        assert_eq!(Role::try_from("admin".to_string()).unwrap(), Role::Admin);
        assert_eq!(Role::try_from("user".to_string()).unwrap(), Role::User);
        assert!(Role::try_from("Admin ".to_string()).is_err());
    }

    #[test]
    fn public_user_json_has_no_hash_and_uses_camel_case() {
        let user = User {
            id: Uuid::new_v4(),
            name: "Ada".into(),
            email: "ada@example.com".into(),
            password_hash: "$argon2id$secret".into(),
            role: Role::Admin,
            profile_image: "/uploads/profile_default.jpg".into(),
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        };
        let json = serde_json::to_value(user.into_public()).unwrap();
        assert_eq!(json["role"], "admin");
        assert_eq!(json["profileImage"], "/uploads/profile_default.jpg");
        assert!(json.get("passwordHash").is_none());
        assert!(!json.to_string().contains("argon2"));
    }
}
