use std::{io, path::PathBuf};

use anyhow::Context;
use axum::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

/// Where uploaded profile images live. Objects are addressed by bare file
/// name; the public reference is `<prefix>/<name>`.
#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn put_object(&self, name: &str, body: Bytes) -> anyhow::Result<()>;

    /// Best effort: a missing object is not an error.
    async fn delete_object(&self, name: &str) -> anyhow::Result<()>;

    fn public_path(&self, name: &str) -> String;

    /// Maps a stored reference back to an object name, if it points into
    /// this store.
    fn object_name<'a>(&self, reference: &'a str) -> Option<&'a str>;
}

/// Files in a local directory served by `ServeDir`.
#[derive(Clone)]
pub struct LocalStorage {
    root: PathBuf,
    public_prefix: String,
}

impl LocalStorage {
    pub async fn new(root: PathBuf, public_prefix: &str) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("create upload dir {}", root.display()))?;
        Ok(Self {
            root,
            public_prefix: public_prefix.trim_end_matches('/').to_string(),
        })
    }

    fn path_for(&self, name: &str) -> anyhow::Result<PathBuf> {
        anyhow::ensure!(is_plain_file_name(name), "invalid object name {name:?}");
        Ok(self.root.join(name))
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
}

#[async_trait]
impl StorageClient for LocalStorage {
    async fn put_object(&self, name: &str, body: Bytes) -> anyhow::Result<()> {
        let path = self.path_for(name)?;
        tokio::fs::write(&path, &body)
            .await
            .with_context(|| format!("write {}", path.display()))?;
        debug!(path = %path.display(), bytes = body.len(), "stored upload");
        Ok(())
    }

    async fn delete_object(&self, name: &str) -> anyhow::Result<()> {
        let path = self.path_for(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "removed upload");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "upload already gone");
                Ok(())
            }
            Err(e) => Err(e).with_context(|| format!("remove {}", path.display())),
        }
    }

    fn public_path(&self, name: &str) -> String {
        format!("{}/{}", self.public_prefix, name)
    }

    fn object_name<'a>(&self, reference: &'a str) -> Option<&'a str> {
        reference
            .strip_prefix(self.public_prefix.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|name| is_plain_file_name(name))
    }
}
