/// Attachment upload configuration
#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub max_file_size: usize,
    pub upload_dir: String,
    /// Public prefix the stored file is served under.
    pub base_url: String,
}

impl UploadConfig {
    pub fn from_env(env: &crate::constants::Env) -> Self {
        Self {
            max_file_size: env.max_upload_bytes,
            upload_dir: env.upload_dir.clone(),
            base_url: format!("{}/uploads", env.public_base_url.trim_end_matches('/')),
        }
    }
}

/// What the storage hands back; messaging treats it as opaque metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFile {
    /// Generated file name inside the upload directory.
    pub name: String,
    pub url: String,
    pub mime: String,
    pub size: i64,
}

/// A file part read from a multipart request, not yet stored.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub original_name: String,
    pub declared_mime: Option<String>,
    pub bytes: Vec<u8>,
}
