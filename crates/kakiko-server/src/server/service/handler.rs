//! HTTP endpoints for MML conversion.
//!
//! This module defines [`KakikoService`], the shared state behind the axum
//! router. It owns the conversion [`WorkerPool`], the [`LocalDrive`] and the
//! request pipeline wiring them together.
//!
//! ## Endpoints
//!
//! - `POST /api/midi_kakiko` - [`midi_kakiko`]
//! - `GET /healthz` - [`healthz`]

use crate::server::{
    config::ServerConfig,
    pool::manager::WorkerPool,
    telemetry::{increment_requests, increment_uploads},
};
use anyhow::Context;
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, HeaderName, StatusCode},
    response::IntoResponse,
};
use kakiko_core::{
    ConversionRequest, Error, UserId,
    converter::ProcessConverter,
    handler::KakikoHandler,
    naming::UploadNamer,
    pack::{DrivePacker, PackedDriveFile},
    storage::LocalDrive,
};
use std::path::Path;
use std::sync::Arc;

type Pipeline = KakikoHandler<WorkerPool, LocalDrive, DrivePacker>;

/// Shared state of the HTTP service.
#[derive(Clone)]
pub struct KakikoService {
    pipeline: Arc<Pipeline>,
    caller_header: HeaderName,
}

impl KakikoService {
    /// Opens the drive and spawns the conversion workers.
    pub async fn new(config: &ServerConfig) -> anyhow::Result<Self> {
        let drive = LocalDrive::open(&config.drive_root)
            .await
            .with_context(|| format!("failed to open drive at {}", config.drive_root.display()))?;

        let pool = WorkerPool::spawn(
            ProcessConverter::new(config.converter.clone()),
            config.num_workers,
            config.queue_depth,
            config.shutdown_timeout,
        );

        let pipeline = KakikoHandler::new(
            pool,
            drive,
            DrivePacker::new(config.public_base_url.as_str()),
            UploadNamer::new(config.name_suffix),
        );

        Ok(Self {
            pipeline: Arc::new(pipeline),
            caller_header: config.caller_header.clone(),
        })
    }

    pub fn pool(&self) -> &WorkerPool {
        self.pipeline.converter()
    }

    /// Directory the stored files are served from.
    pub fn drive_root(&self) -> &Path {
        self.pipeline.drive().root()
    }

    /// Stops accepting conversions and drains the worker pool.
    pub async fn shutdown(&self) -> Result<(), Error> {
        self.pool().shutdown().await
    }

    fn caller(&self, headers: &HeaderMap) -> Option<UserId> {
        headers
            .get(&self.caller_header)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(UserId::new)
    }
}

/// Converts the MML in the body and stores the result in the caller's drive.
///
/// Responds with the packed drive file, or with an error body whose code is
/// `MIDI_KAKIKO_ERROR` whenever the converter produced nothing.
#[tracing::instrument(skip_all)]
pub async fn midi_kakiko(
    State(service): State<KakikoService>,
    headers: HeaderMap,
    body: Result<Json<ConversionRequest>, JsonRejection>,
) -> Result<Json<PackedDriveFile>, Error> {
    increment_requests();

    let Json(request) = body.map_err(|rejection| Error::InvalidRequest {
        reason: rejection.body_text(),
    })?;
    let caller = service.caller(&headers);

    let packed = service.pipeline.handle(caller.as_ref(), request).await?;
    increment_uploads();
    Ok(Json(packed))
}

/// Reports whether the service still accepts conversions.
pub async fn healthz(State(service): State<KakikoService>) -> impl IntoResponse {
    if service.pool().is_accepting() {
        (StatusCode::OK, "SERVING")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT_SERVING")
    }
}
