pub mod handle;
pub mod model;
pub mod storage;

pub use model::{StoredFile, UploadConfig, UploadedFile};
pub use storage::{AttachmentStorage, LocalAttachmentStorage};
