use super::{DriveFile, DriveService, StorageError, UploadDescriptor};
use crate::DriveFileId;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// A drive that keeps file contents under a local directory.
///
/// Each stored file lives in its own directory, `<root>/<id>/<name>.<ext>`,
/// so the root can be served as static content.
///
/// File metadata is indexed in memory only. The index grows with every upload
/// and is not rebuilt on [`LocalDrive::open`]: after a restart the files are
/// still on disk and served, but the drive no longer knows about them, so
/// name conflicts against them go undetected. This is a single-process
/// development drive, not a production one.
#[derive(Debug)]
pub struct LocalDrive {
    root: PathBuf,
    files: RwLock<HashMap<DriveFileId, DriveFile>>,
}

impl LocalDrive {
    /// Opens a drive rooted at `root`, creating the directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|source| StorageError::Io {
                context: "creating the drive root",
                source,
            })?;
        Ok(Self {
            root,
            files: RwLock::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn get(&self, id: &DriveFileId) -> Option<DriveFile> {
        self.files.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }

    fn find_same_name(&self, upload: &UploadDescriptor) -> Option<DriveFileId> {
        self.files
            .read()
            .values()
            .find(|f| {
                f.owner == upload.owner && f.folder_id == upload.folder_id && f.name == upload.name
            })
            .map(|f| f.id.clone())
    }

    async fn remove_stored(&self, id: &DriveFileId) {
        if let Err(e) = tokio::fs::remove_dir_all(self.root.join(id.as_str())).await {
            tracing::warn!(file_id = %id, "failed to remove stored file: {e}");
        }
    }
}

#[async_trait]
impl DriveService for LocalDrive {
    #[tracing::instrument(skip_all, fields(name = %upload.name))]
    async fn add_file(&self, upload: UploadDescriptor) -> Result<DriveFile, StorageError> {
        let unreadable = |reason: String| StorageError::SourceUnreadable {
            path: upload.source_path.clone(),
            reason,
        };

        let meta = tokio::fs::metadata(&upload.source_path)
            .await
            .map_err(|e| unreadable(e.to_string()))?;
        if !meta.is_file() {
            return Err(unreadable("not a regular file".to_string()));
        }

        if !upload.force && self.find_same_name(&upload).is_some() {
            return Err(StorageError::NameConflict { name: upload.name });
        }

        let id = DriveFileId::new(format!("{:016x}", rand::rng().random::<u64>()));
        let extension = upload
            .source_path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        let file_name = match &extension {
            Some(ext) => format!("{}.{ext}", sanitize(&upload.name)),
            None => sanitize(&upload.name),
        };

        let dir = self.root.join(id.as_str());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StorageError::Io {
                context: "creating the file directory",
                source,
            })?;
        let size = match tokio::fs::copy(&upload.source_path, dir.join(&file_name)).await {
            Ok(size) => size,
            Err(e) => {
                self.remove_stored(&id).await;
                return Err(unreadable(e.to_string()));
            }
        };

        let file = DriveFile {
            id: id.clone(),
            created_at: Utc::now(),
            owner: upload.owner.clone(),
            name: upload.name.clone(),
            content_type: content_type_for(extension.as_deref()).to_string(),
            size,
            comment: Some(upload.comment.clone()),
            folder_id: upload.folder_id.clone(),
            storage_key: format!("{id}/{file_name}"),
        };

        // Re-check under the write lock: a concurrent upload may have taken
        // the name while we were copying.
        let replaced = {
            let mut files = self.files.write();
            let existing = files
                .values()
                .find(|f| {
                    f.owner == upload.owner
                        && f.folder_id == upload.folder_id
                        && f.name == upload.name
                })
                .map(|f| f.id.clone());

            match existing {
                Some(_) if !upload.force => None,
                Some(old) => {
                    files.remove(&old);
                    files.insert(id.clone(), file.clone());
                    Some(Some(old))
                }
                None => {
                    files.insert(id.clone(), file.clone());
                    Some(None)
                }
            }
        };

        match replaced {
            None => {
                self.remove_stored(&id).await;
                Err(StorageError::NameConflict { name: upload.name })
            }
            Some(old) => {
                if let Some(old) = old {
                    tracing::debug!(old_id = %old, new_id = %id, "replacing file with the same name");
                    self.remove_stored(&old).await;
                }
                tracing::info!(file_id = %id, size, "stored drive file");
                Ok(file)
            }
        }
    }
}

/// Maps a lowercase file extension to a MIME type.
pub fn content_type_for(extension: Option<&str>) -> &'static str {
    match extension {
        Some("wav") => "audio/wav",
        Some("mid" | "midi") => "audio/midi",
        Some("mp3") => "audio/mpeg",
        Some("ogg") => "audio/ogg",
        Some("flac") => "audio/flac",
        _ => "application/octet-stream",
    }
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "file".to_string(),
        _ => cleaned,
    }
}
