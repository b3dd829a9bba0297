use std::path::PathBuf;

use anyhow::Context;
use serde::Deserialize;

pub const DEFAULT_UPLOAD_MAX_BYTES: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Directory on disk that holds uploaded images.
    pub dir: PathBuf,
    /// URL prefix the directory is served under, e.g. `/uploads`.
    pub public_prefix: String,
    pub max_bytes: usize,
    /// File name (inside `dir`) of the placeholder every new account points at.
    pub default_image: String,
}

impl UploadConfig {
    pub fn default_image_path(&self) -> String {
        format!("{}/{}", self.public_prefix, self.default_image)
    }
}

/// Account created (if missing) at startup so a fresh deployment has an admin.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminSeed {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// `None` runs the server against the in-memory store.
    pub database_url: Option<String>,
    pub jwt: JwtConfig,
    pub uploads: UploadConfig,
    pub admin_seed: Option<AdminSeed>,
}

/// URL prefix uploads are mounted under. Must be an absolute path other
/// than `/`; a trailing slash is dropped.
fn public_prefix(raw: &str) -> anyhow::Result<String> {
    let prefix = raw.trim().trim_end_matches('/');
    anyhow::ensure!(
        prefix.starts_with('/'),
        "UPLOAD_PUBLIC_PREFIX must be an absolute path below `/`, got {raw:?}"
    );
    Ok(prefix.to_string())
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty());
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "userhub".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "userhub-clients".into()),
        };
        let uploads = UploadConfig {
            dir: std::env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("uploads")),
            public_prefix: public_prefix(
                &std::env::var("UPLOAD_PUBLIC_PREFIX").unwrap_or_else(|_| "/uploads".into()),
            )?,
            max_bytes: std::env::var("UPLOAD_MAX_BYTES")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(DEFAULT_UPLOAD_MAX_BYTES),
            default_image: std::env::var("UPLOAD_DEFAULT_IMAGE")
                .unwrap_or_else(|_| "profile_default.jpg".into()),
        };
        let admin_seed = match (
            std::env::var("ADMIN_EMAIL"),
            std::env::var("ADMIN_PASSWORD"),
        ) {
            (Ok(email), Ok(password)) => Some(AdminSeed {
                name: std::env::var("ADMIN_NAME").unwrap_or_else(|_| "Administrator".into()),
                email,
                password,
            }),
            _ => None,
        };
        Ok(Self {
            database_url,
            jwt,
            uploads,
            admin_seed,
        })
    }

    /// Configuration used by unit tests; uploads land in `upload_dir`.
    pub fn for_tests(upload_dir: PathBuf) -> Self {
        Self {
            database_url: None,
            jwt: JwtConfig {
                secret: "test-secret".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
            },
            uploads: UploadConfig {
                dir: upload_dir,
                public_prefix: "/uploads".into(),
                max_bytes: DEFAULT_UPLOAD_MAX_BYTES,
                default_image: "profile_default.jpg".into(),
            },
            admin_seed: None,
        }
    }
}
