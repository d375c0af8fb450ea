use anyhow::{Result, bail};
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

use botdesk_types::models::JsonMap;
use botdesk_types::validation::Upload;

/// Folder (relative to the storage root) that knowledge base uploads go to.
const KNOWLEDGE_BASE_DIR: &str = "knowledge-bases";

/// Private on-disk storage for uploaded documents. Nothing in here is served
/// over HTTP.
///
/// Files are addressed by a relative `file_path` such as
/// `knowledge-bases/{uuid}.pdf`, which is what gets recorded in the database.
pub struct Storage {
    dir: PathBuf,
}

/// An upload that has been written to disk.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub file_path: String,
    pub size: u64,
    pub sha256: String,
}

impl StoredFile {
    /// Knowledge base metadata describing the stored file.
    pub fn metadata(&self, extension: &str) -> JsonMap {
        let mut map = JsonMap::new();
        map.insert("size".into(), self.size.into());
        map.insert("extension".into(), extension.into());
        map.insert("sha256".into(), self.sha256.clone().into());
        map
    }
}

impl Storage {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(dir.join(KNOWLEDGE_BASE_DIR)).await?;
        info!("Private storage directory: {}", dir.display());
        Ok(Self { dir })
    }

    /// Absolute path of a stored file. Rejects paths that could escape the
    /// storage root.
    pub fn resolve(&self, file_path: &str) -> Result<PathBuf> {
        let relative = Path::new(file_path);
        if file_path.is_empty()
            || !relative.components().all(|c| matches!(c, Component::Normal(_)))
        {
            bail!("invalid storage path '{}'", file_path);
        }
        Ok(self.dir.join(relative))
    }

    /// Write an upload under a freshly generated name.
    pub async fn store(&self, upload: &Upload) -> Result<StoredFile> {
        let file_path = format!("{}/{}.{}", KNOWLEDGE_BASE_DIR, Uuid::new_v4(), upload.extension);
        let path = self.resolve(&file_path)?;

        let mut file = fs::File::create(&path).await?;
        file.write_all(&upload.bytes).await?;
        file.flush().await?;

        let sha256 = hex::encode(Sha256::digest(&upload.bytes));
        info!("Stored {} ({} bytes)", file_path, upload.bytes.len());

        Ok(StoredFile {
            file_path,
            size: upload.bytes.len() as u64,
            sha256,
        })
    }

    /// Delete a stored file. A file that is already gone is not an error;
    /// returns whether anything was removed.
    pub async fn delete(&self, file_path: &str) -> Result<bool> {
        let path = self.resolve(file_path)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted stored file {}", file_path);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Stored file {} already gone", file_path);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}
