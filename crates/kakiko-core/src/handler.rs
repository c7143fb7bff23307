//! The MML-to-drive-file request pipeline.
//!
//! [`KakikoHandler::handle`] runs one request end to end:
//!
//! 1. convert the MML through a [`Converter`];
//! 2. map any conversion failure to [`Error::Syntax`];
//! 3. name the upload after the current local time;
//! 4. add the produced file to the [`DriveService`];
//! 5. pack the stored file for its owner.
//!
//! Storage failures are not handled here; they surface as
//! [`Error::Storage`].

use crate::converter::{ConversionOutcome, Converter};
use crate::naming::{LocalClock, UploadNamer, WallClock};
use crate::pack::{AssetPacker, PackOptions, PackedDriveFile};
use crate::storage::{DriveService, UploadDescriptor};
use crate::{ConversionRequest, Error, Result, UserId};
use std::path::PathBuf;

/// Prefix of the comment attached to every stored file. The submitted MML
/// follows it verbatim.
pub const COMMENT_PREFIX: &str = "KAKIKO | MML:";

/// Converts MML into a stored drive file.
#[derive(Debug, Clone)]
pub struct KakikoHandler<C, D, P, K = LocalClock> {
    converter: C,
    drive: D,
    packer: P,
    namer: UploadNamer<K>,
}

impl<C, D, P, K> KakikoHandler<C, D, P, K>
where
    C: Converter,
    D: DriveService,
    P: AssetPacker,
    K: WallClock,
{
    pub fn new(converter: C, drive: D, packer: P, namer: UploadNamer<K>) -> Self {
        Self {
            converter,
            drive,
            packer,
            namer,
        }
    }

    pub fn converter(&self) -> &C {
        &self.converter
    }

    pub fn drive(&self) -> &D {
        &self.drive
    }

    /// Handles one conversion request on behalf of `caller`.
    ///
    /// # Errors
    ///
    /// - [`Error::Syntax`] if the converter did not produce a file, whatever
    ///   the reason.
    /// - [`Error::ServiceShutdown`] if the conversion was cancelled by a
    ///   shutdown.
    /// - [`Error::Storage`] if the drive rejected the upload.
    #[tracing::instrument(skip_all, fields(caller = caller.map(UserId::as_str)))]
    pub async fn handle(
        &self,
        caller: Option<&UserId>,
        request: ConversionRequest,
    ) -> Result<PackedDriveFile> {
        let ConversionRequest { mml } = request;

        let path = match self.converter.convert(&mml).await {
            ConversionOutcome::Produced(file) => file.path,
            ConversionOutcome::Cancelled => return Err(Error::ServiceShutdown),
            _ => return Err(Error::Syntax),
        };

        let upload = UploadDescriptor {
            owner: caller.cloned(),
            source_path: PathBuf::from(path),
            name: self.namer.next_name(),
            comment: format!("{COMMENT_PREFIX}{mml}"),
            folder_id: None,
            force: false,
        };

        let file = self.drive.add_file(upload).await?;
        Ok(self.packer.pack(&file, PackOptions { self_owned: true }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::ConvertedFile;
    use crate::pack::DrivePacker;
    use crate::storage::{DriveFile, StorageError};
    use crate::{DriveFileId, SYNTAX_ERROR_CODE, SYNTAX_ERROR_MESSAGE};
    use async_trait::async_trait;
    use chrono::{NaiveDate, NaiveDateTime, Utc};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Replies with a canned outcome and records every input.
    struct ScriptedConverter {
        outcome: ConversionOutcome,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedConverter {
        fn new(outcome: ConversionOutcome) -> Self {
            Self {
                outcome,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn producing(path: &str) -> Self {
            Self::new(ConversionOutcome::Produced(ConvertedFile {
                path: path.to_string(),
                duration: Duration::from_millis(5),
            }))
        }
    }

    #[async_trait]
    impl Converter for ScriptedConverter {
        async fn convert(&self, mml: &str) -> ConversionOutcome {
            self.seen.lock().push(mml.to_string());
            self.outcome.clone()
        }
    }

    /// Records uploads without touching the filesystem.
    #[derive(Default)]
    struct RecordingDrive {
        uploads: Mutex<Vec<UploadDescriptor>>,
        fail: bool,
        next_id: AtomicUsize,
    }

    #[async_trait]
    impl DriveService for RecordingDrive {
        async fn add_file(
            &self,
            upload: UploadDescriptor,
        ) -> core::result::Result<DriveFile, StorageError> {
            self.uploads.lock().push(upload.clone());
            if self.fail {
                return Err(StorageError::SourceUnreadable {
                    path: upload.source_path,
                    reason: "gone".to_string(),
                });
            }
            let id = format!("{:016x}", self.next_id.fetch_add(1, Ordering::Relaxed));
            Ok(DriveFile {
                id: DriveFileId::new(id.clone()),
                created_at: Utc::now(),
                owner: upload.owner,
                storage_key: format!("{id}/{}.mid", upload.name),
                name: upload.name,
                content_type: "audio/midi".to_string(),
                size: 42,
                comment: Some(upload.comment),
                folder_id: upload.folder_id,
            })
        }
    }

    struct FixedClock(NaiveDateTime);

    impl WallClock for FixedClock {
        fn now(&self) -> NaiveDateTime {
            self.0
        }
    }

    fn handler(
        converter: ScriptedConverter,
        drive: RecordingDrive,
    ) -> KakikoHandler<ScriptedConverter, RecordingDrive, DrivePacker, FixedClock> {
        let at = NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(7, 8, 9)
            .unwrap();
        KakikoHandler::new(
            converter,
            drive,
            DrivePacker::new("http://localhost:3000"),
            UploadNamer::with_clock(FixedClock(at), false),
        )
    }

    fn request(mml: &str) -> ConversionRequest {
        ConversionRequest {
            mml: mml.to_string(),
        }
    }

    #[tokio::test]
    async fn successful_conversion_is_stored_and_packed() {
        let h = handler(
            ScriptedConverter::producing("/tmp/out123.mid"),
            RecordingDrive::default(),
        );
        let caller = UserId::new("alice");

        let packed = h.handle(Some(&caller), request("CDEFGAB")).await.unwrap();

        assert_eq!(packed.name, "2024-03-05_07_08_09");
        assert_eq!(packed.user_id, Some(caller.clone()));
        assert_eq!(packed.comment.as_deref(), Some("KAKIKO | MML:CDEFGAB"));
        assert_eq!(
            packed.url,
            format!("http://localhost:3000/files/{}/2024-03-05_07_08_09.mid", packed.id)
        );

        let uploads = h.drive().uploads.lock();
        assert_eq!(
            uploads.as_slice(),
            &[UploadDescriptor {
                owner: Some(caller),
                source_path: PathBuf::from("/tmp/out123.mid"),
                name: "2024-03-05_07_08_09".to_string(),
                comment: "KAKIKO | MML:CDEFGAB".to_string(),
                folder_id: None,
                force: false,
            }]
        );
    }

    #[tokio::test]
    async fn mml_reaches_converter_and_comment_verbatim() {
        let mml = "T120 L4 O3 [CDE]2 | \"quoted\"; echo $HOME\n";
        let h = handler(
            ScriptedConverter::producing("/tmp/a.wav"),
            RecordingDrive::default(),
        );

        h.handle(None, request(mml)).await.unwrap();

        assert_eq!(h.converter().seen.lock().as_slice(), &[mml.to_string()]);
        let uploads = h.drive().uploads.lock();
        assert_eq!(uploads[0].comment, format!("KAKIKO | MML:{mml}"));
        assert_eq!(uploads[0].owner, None);
    }

    #[tokio::test]
    async fn rejected_conversion_is_a_syntax_error() {
        let h = handler(
            ScriptedConverter::new(ConversionOutcome::Rejected {
                status: Some(1),
                stderr: "Data is empty.".to_string(),
            }),
            RecordingDrive::default(),
        );

        let err = h.handle(None, request("!!!invalid!!!")).await.unwrap_err();

        assert!(matches!(err, Error::Syntax));
        let api = err.to_api_error();
        assert_eq!(api.code, SYNTAX_ERROR_CODE);
        assert_eq!(api.message, SYNTAX_ERROR_MESSAGE);
        assert!(h.drive().uploads.lock().is_empty());
    }

    #[tokio::test]
    async fn every_failure_kind_collapses_to_syntax_error() {
        for outcome in [
            ConversionOutcome::LaunchFailed {
                reason: "no such file".to_string(),
            },
            ConversionOutcome::TimedOut {
                after: Duration::from_secs(30),
            },
            ConversionOutcome::InvalidOutput {
                reason: "empty".to_string(),
            },
        ] {
            let h = handler(ScriptedConverter::new(outcome), RecordingDrive::default());
            let err = h.handle(None, request("C")).await.unwrap_err();
            assert!(matches!(err, Error::Syntax));
        }
    }

    #[tokio::test]
    async fn cancelled_conversion_reports_shutdown() {
        let h = handler(
            ScriptedConverter::new(ConversionOutcome::Cancelled),
            RecordingDrive::default(),
        );
        let err = h.handle(None, request("C")).await.unwrap_err();
        assert!(matches!(err, Error::ServiceShutdown));
    }

    #[tokio::test]
    async fn storage_failure_propagates() {
        let h = handler(
            ScriptedConverter::producing("/tmp/gone.wav"),
            RecordingDrive {
                fail: true,
                ..RecordingDrive::default()
            },
        );
        let err = h.handle(None, request("C")).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Storage(StorageError::SourceUnreadable { .. })
        ));
    }

    #[tokio::test]
    async fn repeated_requests_upload_twice_with_the_same_name() {
        let h = handler(
            ScriptedConverter::producing("/tmp/out.mid"),
            RecordingDrive::default(),
        );

        let first = h.handle(None, request("C")).await.unwrap();
        let second = h.handle(None, request("C")).await.unwrap();

        assert_ne!(first.id, second.id);
        let uploads = h.drive().uploads.lock();
        assert_eq!(uploads.len(), 2);
        assert_eq!(uploads[0].name, uploads[1].name);
    }
}
