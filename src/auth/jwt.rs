use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use time::{Duration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use super::claims::Claims;
use crate::{config::JwtConfig, state::AppState, users::repo_types::Role};

/// Tokens are not renewable; clients log in again after this.
pub const TOKEN_TTL: Duration = Duration::hours(24);

/// Signature, structure, issuer/audience or expiry check failed.
#[derive(Debug, thiserror::Error)]
#[error("invalid or expired token")]
pub struct InvalidToken(#[source] jsonwebtoken::errors::Error);

/// Holds JWT signing and verification keys with config data.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    ttl: Duration,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        JwtKeys::new(&state.config.jwt)
    }
}

impl JwtKeys {
    pub fn new(cfg: &JwtConfig) -> Self {
        let JwtConfig {
            secret,
            issuer,
            audience,
        } = cfg;
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.clone(),
            audience: audience.clone(),
            ttl: TOKEN_TTL,
        }
    }

    #[cfg(test)]
    fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn issue(&self, user_id: Uuid, role: Role) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let exp = now + self.ttl;
        let claims = Claims {
            sub: user_id,
            role,
            iat: now.unix_timestamp().max(0) as usize,
            exp: exp.unix_timestamp().max(0) as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id = %user_id, role = %role, "jwt signed");
        Ok(token)
    }

    /// Purely cryptographic: never consults the user store.
    pub fn verify(&self, token: &str) -> Result<Claims, InvalidToken> {
        let mut validation = Validation::default();
        validation.leeway = 0;
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(InvalidToken)?;
        debug!(user_id = %data.claims.sub, "jwt verified");
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_keys(secret: &str, issuer: &str, audience: &str) -> JwtKeys {
        JwtKeys::new(&JwtConfig {
            secret: secret.into(),
            issuer: issuer.into(),
            audience: audience.into(),
        })
    }

    #[test]
    fn issue_and_verify_round_trip() {
        let keys = make_keys("dev-secret", "test-issuer", "test-aud");
        let user_id = Uuid::new_v4();
        let token = keys.issue(user_id, Role::Admin).expect("issue");
        let claims = keys.verify(&token).expect("verify token");
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.role, Role::Admin);
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
        assert_eq!(claims.exp - claims.iat, 24 * 60 * 60);
    }

    #[test]
    fn verify_rejects_other_secret() {
        let good = make_keys("secret-a", "iss", "aud");
        let bad = make_keys("secret-b", "iss", "aud");
        let token = good.issue(Uuid::new_v4(), Role::User).unwrap();
        assert!(bad.verify(&token).is_err());
    }

    #[test]
    fn verify_rejects_wrong_issuer_or_audience() {
        let good = make_keys("same-secret", "good-iss", "good-aud");
        let bad = make_keys("same-secret", "bad-iss", "bad-aud");
        let token = good.issue(Uuid::new_v4(), Role::User).unwrap();
        assert!(bad.verify(&token).is_err());
    }

    #[test]
    fn verify_rejects_expired_and_garbage() {
        let keys = make_keys("dev-secret", "iss", "aud").with_ttl(Duration::seconds(-5));
        let token = keys.issue(Uuid::new_v4(), Role::User).unwrap();
        let err = keys.verify(&token).unwrap_err();
        assert_eq!(err.to_string(), "invalid or expired token");

        assert!(keys.verify("not.a.jwt").is_err());
        assert!(keys.verify("").is_err());
    }
}
