//! Drive storage for converted files.
//!
//! The request pipeline only sees the [`DriveService`] trait: it hands over an
//! [`UploadDescriptor`] and receives an opaque [`DriveFile`] back. How and
//! where bytes are kept is up to the implementation.
//!
//! - [`local`] - [`LocalDrive`], a drive backed by a local directory.

pub mod local;

pub use local::LocalDrive;

use crate::{DriveFileId, FolderId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Everything the drive needs to add a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadDescriptor {
    /// Owner of the new file; `None` for anonymous uploads.
    pub owner: Option<UserId>,
    /// File to ingest. The drive copies it and never modifies the source.
    pub source_path: PathBuf,
    /// Display name of the stored file.
    pub name: String,
    /// Free-form comment attached to the file.
    pub comment: String,
    /// Target folder, or the owner's root when `None`.
    pub folder_id: Option<FolderId>,
    /// Replace an existing file of the same name in the same folder.
    pub force: bool,
}

/// A file stored in the drive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveFile {
    pub id: DriveFileId,
    pub created_at: DateTime<Utc>,
    pub owner: Option<UserId>,
    pub name: String,
    pub content_type: String,
    pub size: u64,
    pub comment: Option<String>,
    pub folder_id: Option<FolderId>,
    /// Path relative to the drive's public root, `/`-separated.
    pub storage_key: String,
}

/// Failures raised by a [`DriveService`].
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The file to ingest is missing or unreadable.
    #[error("source file {path} is unreadable: {reason}")]
    SourceUnreadable { path: PathBuf, reason: String },

    /// A file with the same name already exists and `force` was not set.
    #[error("a file named {name:?} already exists in this folder")]
    NameConflict { name: String },

    /// The drive's own storage failed.
    #[error("drive I/O failed while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Adds files to a drive.
#[async_trait]
pub trait DriveService: Send + Sync {
    async fn add_file(&self, upload: UploadDescriptor) -> Result<DriveFile, StorageError>;
}
