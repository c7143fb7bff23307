use crate::server::{
    pool::request::WorkRequest,
    telemetry::{increment_conversion_failures, record_conversion_duration},
};
use kakiko_core::converter::{ConversionOutcome, ProcessConverter};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Worker task that runs conversions received on `rx`, one at a time.
///
/// Each worker owns its own [`ProcessConverter`], so the number of workers
/// bounds the number of converter processes alive at once. A running
/// conversion is abandoned (and its child killed) when either the shared
/// `shutdown` token fires or the requester stops waiting for the reply.
///
/// # Request Types
///
/// - [`WorkRequest::Convert`] - Runs the converter and replies with the
///   [`ConversionOutcome`].
/// - [`WorkRequest::Shutdown`] - Acknowledges and stops the loop.
pub async fn worker_loop(
    worker_id: usize,
    mut rx: mpsc::Receiver<WorkRequest>,
    converter: ProcessConverter,
    shutdown: CancellationToken,
) {
    tracing::trace!("Worker {worker_id} started");

    while let Some(work) = rx.recv().await {
        match work {
            WorkRequest::Convert { mml, mut response } => {
                if response.is_closed() {
                    tracing::debug!("Worker {worker_id} skipping abandoned conversion");
                    continue;
                }

                let outcome = tokio::select! {
                    outcome = converter.run(&mml, &shutdown) => outcome,
                    () = response.closed() => {
                        tracing::debug!("Worker {worker_id} requester went away, killing converter");
                        continue;
                    }
                };

                match &outcome {
                    ConversionOutcome::Produced(file) => {
                        record_conversion_duration(file.duration.as_millis() as f64);
                    }
                    failed => increment_conversion_failures(failed.kind()),
                }

                if response.send(outcome).is_err() {
                    tracing::debug!("Worker {worker_id} could not deliver outcome");
                }
            }
            WorkRequest::Shutdown { response } => {
                tracing::debug!("Worker {worker_id} received shutdown signal");

                if response.send(()).is_err() {
                    tracing::error!("Worker {worker_id} failed to acknowledge shutdown");
                }
                break;
            }
        }
    }

    tracing::trace!("Worker {worker_id} stopped");
}
