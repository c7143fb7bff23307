//! JSON representation of stored drive files.

use crate::storage::DriveFile;
use crate::{DriveFileId, FolderId, UserId};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Options controlling how much of a file is revealed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackOptions {
    /// The requester owns the file. Owner-only fields (comment, folder) are
    /// included only then.
    pub self_owned: bool,
}

/// A drive file as returned to HTTP callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackedDriveFile {
    pub id: DriveFileId,
    pub created_at: DateTime<Utc>,
    pub name: String,
    #[serde(rename = "type")]
    pub content_type: String,
    pub size: u64,
    pub user_id: Option<UserId>,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<FolderId>,
}

/// Converts stored files into [`PackedDriveFile`]s.
pub trait AssetPacker: Send + Sync {
    fn pack(&self, file: &DriveFile, options: PackOptions) -> PackedDriveFile;
}

/// Packs files with URLs rooted at a public base URL.
#[derive(Debug, Clone)]
pub struct DrivePacker {
    base_url: String,
}

impl DrivePacker {
    /// `base_url` is the externally visible origin; a trailing `/` is
    /// dropped.
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { base_url }
    }

    pub fn file_url(&self, file: &DriveFile) -> String {
        format!("{}/files/{}", self.base_url, file.storage_key)
    }
}

impl AssetPacker for DrivePacker {
    fn pack(&self, file: &DriveFile, options: PackOptions) -> PackedDriveFile {
        PackedDriveFile {
            id: file.id.clone(),
            created_at: file.created_at,
            name: file.name.clone(),
            content_type: file.content_type.clone(),
            size: file.size,
            user_id: file.owner.clone(),
            url: self.file_url(file),
            comment: options.self_owned.then(|| file.comment.clone()).flatten(),
            folder_id: options.self_owned.then(|| file.folder_id.clone()).flatten(),
        }
    }
}
