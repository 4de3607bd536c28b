use async_trait::async_trait;

use crate::config::Config;
use crate::errors::Result;

pub mod local;

pub use local::LocalBlobStore;

/// Pass-through blob dependency for listing screenshots: takes a base64
/// `data:image/...;base64,` URL, returns a servable URL.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, owner_uid: &str, data_url: &str) -> Result<String>;
}

pub fn create_blob_store(config: &Config) -> Result<Box<dyn BlobStore>> {
    let storage = LocalBlobStore::new(&config.upload_dir)?;
    Ok(Box::new(storage))
}
