//! Local copies of listing photos, attached to Telegram notifications.
//!
//! Downloads are indexed in a small JSON file so a retried notification reuses
//! the files fetched by an earlier run.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

use crate::config::StorageConfig;
use crate::models::{Listing, ListingId};
use crate::utils::error::{AppError, Result};
use crate::utils::fs::write_atomic_async;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredImage {
    pub remote: String,
    pub local: PathBuf,
}

pub struct ImageStore {
    client: Client,
    dir: PathBuf,
    index_path: PathBuf,
    max_images: usize,
    index: Mutex<BTreeMap<ListingId, Vec<StoredImage>>>,
}

impl ImageStore {
    pub fn open(config: &StorageConfig) -> Result<Self> {
        let index = match fs::read_to_string(&config.image_index_file) {
            Ok(contents) if contents.trim().is_empty() => BTreeMap::new(),
            Ok(contents) => serde_json::from_str(&contents).map_err(|source| AppError::StoreCorrupted {
                path: config.image_index_file.clone(),
                source,
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            client: Client::builder().timeout(DOWNLOAD_TIMEOUT).build()?,
            dir: config.image_dir.clone(),
            index_path: config.image_index_file.clone(),
            max_images: config.max_images,
            index: Mutex::new(index),
        })
    }

    /// Local paths of up to `max_images` photos of `listing`, downloading what is missing.
    ///
    /// Failed downloads are logged and skipped; a notification without a photo
    /// is still worth sending.
    pub async fn fetch(&self, listing: &Listing) -> Vec<PathBuf> {
        let wanted: Vec<&String> = listing.image_refs.iter().take(self.max_images).collect();
        if wanted.is_empty() {
            return Vec::new();
        }

        let known = self.index.lock().await.get(&listing.id).cloned().unwrap_or_default();

        let mut stored = Vec::with_capacity(wanted.len());
        for (position, remote) in wanted.into_iter().enumerate() {
            if let Some(image) = known.iter().find(|i| &i.remote == remote && i.local.exists()) {
                debug!(listing_id = %listing.id, path = %image.local.display(), "Reusing downloaded image");
                stored.push(image.clone());
                continue;
            }

            let local = self.dir.join(file_name(&listing.id, position, remote));
            match self.download(remote, &local).await {
                Ok(()) => stored.push(StoredImage {
                    remote: remote.clone(),
                    local,
                }),
                Err(e) => warn!(listing_id = %listing.id, url = %remote, error = %e, "Image download failed"),
            }
        }

        let paths = stored.iter().map(|image| image.local.clone()).collect();
        if stored != known {
            let mut index = self.index.lock().await;
            index.insert(listing.id.clone(), stored);
            if let Err(e) = self.save(&index).await {
                warn!(path = %self.index_path.display(), error = %e, "Could not save image index");
            }
        }
        paths
    }

    #[cfg(test)]
    async fn get(&self, id: &ListingId) -> Vec<StoredImage> {
        self.index.lock().await.get(id).cloned().unwrap_or_default()
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<()> {
        let resp = self.client.get(remote).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::Api {
                service: "image host",
                status: status.as_u16(),
                message: remote.to_string(),
            });
        }

        let bytes = resp.bytes().await?;
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(local, &bytes).await?;
        debug!(path = %local.display(), bytes = bytes.len(), "Image downloaded");
        Ok(())
    }

    async fn save(&self, index: &BTreeMap<ListingId, Vec<StoredImage>>) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(index)?;
        write_atomic_async(self.index_path.clone(), bytes).await
    }
}

/// `<id>_<position>.<ext>`, keeping the remote extension when it looks like an image.
fn file_name(id: &ListingId, position: usize, remote: &str) -> String {
    let extension = Url::parse(remote)
        .ok()
        .and_then(|url| {
            Path::new(url.path())
                .extension()
                .map(|ext| ext.to_string_lossy().to_lowercase())
        })
        .filter(|ext| matches!(ext.as_str(), "jpg" | "jpeg" | "png" | "webp" | "gif"))
        .unwrap_or_else(|| "jpg".to_string());
    format!("{}_{}.{}", id, position, extension)
}
