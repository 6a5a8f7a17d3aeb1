use std::path::Path;
use uuid::Uuid;

use crate::api::error;
use crate::modules::attachment::model::{StoredFile, UploadConfig};

const FALLBACK_MIME: &str = "application/octet-stream";

/// Blob storage for message attachments.
#[async_trait::async_trait]
pub trait AttachmentStorage: Send + Sync {
    /// Uploads larger than this are rejected before they are buffered whole.
    fn max_file_size(&self) -> usize;

    async fn store(
        &self,
        original_name: &str,
        bytes: Vec<u8>,
        declared_mime: Option<&str>,
    ) -> Result<StoredFile, error::SystemError>;

    /// Deletes a stored file. Removing a file that is already gone succeeds.
    async fn remove(&self, stored: &StoredFile) -> Result<(), error::SystemError>;
}

/// Writes uploads to a local directory served as static files.
#[derive(Debug, Clone)]
pub struct LocalAttachmentStorage {
    config: UploadConfig,
}

impl LocalAttachmentStorage {
    pub fn new(config: UploadConfig) -> Self {
        Self { config }
    }

    pub fn upload_dir(&self) -> &str {
        &self.config.upload_dir
    }

    /// Generate unique filename, keeping the original extension
    fn generate_filename(original_name: &str) -> String {
        let extension =
            Path::new(original_name).extension().and_then(|ext| ext.to_str()).unwrap_or("");
        let uuid = Uuid::now_v7();
        if extension.is_empty() {
            uuid.to_string()
        } else {
            format!("{}.{}", uuid, extension.to_ascii_lowercase())
        }
    }
}

/// Part header wins unless it is missing or the generic binary type.
pub fn resolve_mime(original_name: &str, declared_mime: Option<&str>) -> String {
    match declared_mime.map(str::trim) {
        Some(mime) if !mime.is_empty() && mime != FALLBACK_MIME => mime.to_string(),
        _ => mime_guess::from_path(original_name).first_or_octet_stream().essence_str().to_string(),
    }
}

#[async_trait::async_trait]
impl AttachmentStorage for LocalAttachmentStorage {
    fn max_file_size(&self) -> usize {
        self.config.max_file_size
    }

    async fn store(
        &self,
        original_name: &str,
        bytes: Vec<u8>,
        declared_mime: Option<&str>,
    ) -> Result<StoredFile, error::SystemError> {
        if bytes.is_empty() {
            return Err(error::SystemError::invalid_argument("Uploaded file is empty"));
        }
        if bytes.len() > self.config.max_file_size {
            return Err(error::SystemError::invalid_argument(format!(
                "File size exceeds maximum allowed size of {} bytes",
                self.config.max_file_size
            )));
        }

        let mime = resolve_mime(original_name, declared_mime);
        let filename = Self::generate_filename(original_name);

        tokio::fs::create_dir_all(&self.config.upload_dir).await?;
        let file_path = Path::new(&self.config.upload_dir).join(&filename);
        tokio::fs::write(&file_path, &bytes).await?;

        tracing::debug!("Stored attachment {} ({} bytes, {})", filename, bytes.len(), mime);

        Ok(StoredFile {
            url: format!("{}/{}", self.config.base_url.trim_end_matches('/'), filename),
            name: filename,
            mime,
            size: bytes.len() as i64,
        })
    }

    async fn remove(&self, stored: &StoredFile) -> Result<(), error::SystemError> {
        let name = stored.name.as_str();
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            return Err(error::SystemError::invalid_argument("Invalid attachment name"));
        }

        match tokio::fs::remove_file(Path::new(&self.config.upload_dir).join(name)).await {
            Ok(()) => {
                tracing::debug!("Removed attachment {}", name);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
