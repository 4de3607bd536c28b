use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use tokio::fs;
use uuid::Uuid;

use crate::{
    errors::{AppError, Result},
    storage::BlobStore,
};

pub struct LocalBlobStore {
    base_path: PathBuf,
}

impl LocalBlobStore {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();

        std::fs::create_dir_all(&base_path)
            .map_err(|e| AppError::Storage(format!("Failed to create storage directory: {}", e)))?;

        Ok(Self { base_path })
    }
}

/// Splits `data:<mime>;base64,<payload>` into (extension, decoded bytes).
fn decode_data_url(data_url: &str) -> Result<(String, Vec<u8>)> {
    let rest = data_url
        .strip_prefix("data:")
        .ok_or_else(|| AppError::Validation("expected a data: URL".to_string()))?;

    let (header, payload) = rest
        .split_once(";base64,")
        .ok_or_else(|| AppError::Validation("expected a base64 data URL".to_string()))?;

    let extension = match header {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        other => {
            return Err(AppError::Validation(format!(
                "unsupported image type: {}",
                other
            )))
        }
    };

    let bytes = general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| AppError::Validation(format!("invalid base64 payload: {}", e)))?;

    if bytes.is_empty() {
        return Err(AppError::Validation("empty image payload".to_string()));
    }

    Ok((extension.to_string(), bytes))
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn upload(&self, owner_uid: &str, data_url: &str) -> Result<String> {
        let (extension, bytes) = decode_data_url(data_url)?;

        let relative = format!("users/{}/deals/{}.{}", owner_uid, Uuid::new_v4(), extension);
        let full_path = self.base_path.join(&relative);

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::Storage(format!("Failed to create directory: {}", e)))?;
        }

        fs::write(&full_path, bytes)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to write file: {}", e)))?;

        Ok(format!("/uploads/{}", relative))
    }
}
