use std::path::Path;

use anyhow::Context;
use bytes::Bytes;
use rand::Rng;
use time::OffsetDateTime;
use tracing::info;

use crate::{error::AppError, storage::StorageClient};

/// An image received from a client, not yet written anywhere.
pub struct UploadItem {
    pub body: Bytes,
    pub content_type: String,
    pub file_name: Option<String>,
}

/// Type and size checks; nothing is persisted before these pass.
pub fn validate_upload(item: &UploadItem, max_bytes: usize) -> Result<(), AppError> {
    if !item.content_type.starts_with("image/") {
        return Err(AppError::invalid_upload("Only image files are allowed"));
    }
    if item.body.len() > max_bytes {
        return Err(too_large(max_bytes));
    }
    Ok(())
}

pub fn too_large(max_bytes: usize) -> AppError {
    AppError::invalid_upload(format!("File too large (max {} bytes)", max_bytes))
}

/// `<unix millis>-<random>.<ext>`, extension taken from the client's file
/// name when it has one.
pub fn generate_file_name(item: &UploadItem) -> String {
    let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000_000);
    match extension_for(item) {
        Some(ext) => format!("{millis}-{suffix}.{ext}"),
        None => format!("{millis}-{suffix}"),
    }
}

fn extension_for(item: &UploadItem) -> Option<String> {
    item.file_name
        .as_deref()
        .and_then(|n| Path::new(n).extension())
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase())
        .or_else(|| ext_from_mime(&item.content_type).map(str::to_string))
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

/// Writes the upload under a fresh name and returns its public reference.
pub async fn store_image(storage: &dyn StorageClient, item: UploadItem) -> anyhow::Result<String> {
    let name = generate_file_name(&item);
    storage
        .put_object(&name, item.body)
        .await
        .with_context(|| format!("put_object {}", name))?;
    info!(file = %name, "profile image stored");
    Ok(storage.public_path(&name))
}

/// Deletes the file behind `reference` unless it is the placeholder or
/// points outside the store.
pub async fn discard_image(
    storage: &dyn StorageClient,
    reference: &str,
    placeholder: &str,
) -> anyhow::Result<()> {
    if reference == placeholder {
        return Ok(());
    }
    match storage.object_name(reference) {
        Some(name) => storage.delete_object(name).await,
        None => Ok(()),
    }
}

#[cfg(test)]
mod image_tests {
    use super::*;
    use crate::storage::LocalStorage;

    fn item(ct: &str, len: usize, name: Option<&str>) -> UploadItem {
        UploadItem {
            body: Bytes::from(vec![0u8; len]),
            content_type: ct.into(),
            file_name: name.map(Into::into),
        }
    }

    #[test]
    fn test_ext_from_mime() {
        assert_eq!(ext_from_mime("image/jpeg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/png"), Some("png"));
        assert_eq!(ext_from_mime("application/octet-stream"), None);
    }

    #[test]
    fn rejects_non_images_and_oversize() {
        assert!(matches!(
            validate_upload(&item("text/plain", 10, None), 100),
            Err(AppError::InvalidUpload(_))
        ));
        assert!(matches!(
            validate_upload(&item("image/png", 101, None), 100),
            Err(AppError::InvalidUpload(_))
        ));
        assert!(validate_upload(&item("image/png", 100, None), 100).is_ok());
    }

    #[test]
    fn file_names_keep_original_extension() {
        let name = generate_file_name(&item("image/png", 1, Some("Me At Beach.JPEG")));
        assert!(name.ends_with(".jpeg"), "{name}");
        let name = generate_file_name(&item("image/png", 1, None));
        assert!(name.ends_with(".png"), "{name}");
        let name = generate_file_name(&item("image/x-unknown", 1, Some("noext")));
        assert!(!name.contains('.'), "{name}");

        let a = generate_file_name(&item("image/png", 1, None));
        let b = generate_file_name(&item("image/png", 1, None));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn discard_skips_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("profile_default.jpg"), b"x").unwrap();
        let storage = LocalStorage::new(dir.path().to_path_buf(), "/uploads")
            .await
            .unwrap();

        discard_image(&storage, "/uploads/profile_default.jpg", "/uploads/profile_default.jpg")
            .await
            .unwrap();
        assert!(dir.path().join("profile_default.jpg").exists());

        let reference = store_image(&storage, item("image/png", 4, Some("a.png")))
            .await
            .unwrap();
        let name = reference.strip_prefix("/uploads/").unwrap();
        assert!(dir.path().join(name).exists());

        discard_image(&storage, &reference, "/uploads/profile_default.jpg")
            .await
            .unwrap();
        assert!(!dir.path().join(name).exists());
    }
}
