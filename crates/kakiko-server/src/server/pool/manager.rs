//! Asynchronous worker pool for MML conversions.
//!
//! This module defines the [`WorkerPool`] struct, which owns a set of
//! conversion workers and hands them [`WorkRequest`]s. Dispatch is round-robin,
//! preferring a worker whose queue still has room, and the pool supports
//! coordinated shutdown via a shared [`CancellationToken`].
//!
//! Each worker listens on its own bounded [`mpsc::Receiver`] and runs one
//! converter process at a time, so `num_workers` bounds the number of
//! concurrent subprocesses and `queue_depth` bounds how much work can wait
//! before callers are back-pressured.

use crate::server::{
    pool::{request::WorkRequest, worker::worker_loop},
    telemetry::{
        decrement_conversions_inflight, increment_conversion_failures,
        increment_conversions_inflight,
    },
};
use async_trait::async_trait;
use core::time::Duration;
use kakiko_core::{
    Error,
    converter::{ConversionOutcome, Converter, ProcessConverter},
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot,
    },
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;

/// A cooperative pool of asynchronous workers that run conversions.
pub struct WorkerPool {
    workers: Vec<mpsc::Sender<WorkRequest>>,
    next_worker: AtomicUsize,
    shutdown_token: CancellationToken,
    shutdown_timeout: Duration,
    accepting: AtomicBool,
    inflight: AtomicUsize,
}

/// Counts a conversion as in flight for as long as it is alive.
struct InflightGuard<'a>(&'a AtomicUsize);

impl<'a> InflightGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        increment_conversions_inflight();
        Self(counter)
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
        decrement_conversions_inflight();
    }
}

impl WorkerPool {
    /// Constructs a [`WorkerPool`] from initialized worker channels and a
    /// shared cancellation token.
    pub const fn new(
        workers: Vec<mpsc::Sender<WorkRequest>>,
        shutdown_token: CancellationToken,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            workers,
            next_worker: AtomicUsize::new(0),
            shutdown_token,
            shutdown_timeout,
            accepting: AtomicBool::new(true),
            inflight: AtomicUsize::new(0),
        }
    }

    /// Spawns `num_workers` workers, each with its own clone of `converter`
    /// and a queue of `queue_depth` requests.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(
        converter: ProcessConverter,
        num_workers: usize,
        queue_depth: usize,
        shutdown_timeout: Duration,
    ) -> Self {
        let shutdown_token = CancellationToken::new();
        let mut workers = Vec::with_capacity(num_workers);

        for worker_id in 0..num_workers {
            let (tx, rx) = mpsc::channel(queue_depth);
            workers.push(tx);
            tokio::spawn(worker_loop(
                worker_id,
                rx,
                converter.clone(),
                shutdown_token.clone(),
            ));
        }

        Self::new(workers, shutdown_token, shutdown_timeout)
    }

    /// Returns the index of the next worker to receive work (round-robin).
    ///
    /// Uses a relaxed atomic increment to minimize contention.
    pub fn next_worker_index(&self) -> usize {
        self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len()
    }

    /// Whether new conversions are still accepted.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire) && !self.shutdown_token.is_cancelled()
    }

    /// Number of conversions currently queued or running.
    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Acquire)
    }

    /// Sends a [`WorkRequest`] to a worker.
    ///
    /// Starting from the round-robin position, the first worker with free
    /// queue capacity takes the request. Workers whose channel is closed are
    /// skipped. When every live queue is full, the request waits on the first
    /// live worker after the round-robin position.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The pool is shutting down.
    /// - No worker channel is open.
    pub async fn send_to_next_worker(&self, request: WorkRequest) -> Result<(), Error> {
        if !self.is_accepting() {
            return Err(Error::ServiceShutdown);
        }

        let start = self.next_worker_index();
        let mut request = request;
        let mut waiting_on = None;
        for offset in 0..self.workers.len() {
            let worker_idx = (start + offset) % self.workers.len();
            match self.workers[worker_idx].try_send(request) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(returned)) => {
                    waiting_on.get_or_insert(worker_idx);
                    request = returned;
                }
                Err(TrySendError::Closed(returned)) => {
                    tracing::error!("Worker {worker_idx} channel closed, skipping it");
                    request = returned;
                }
            }
        }

        let Some(worker_idx) = waiting_on else {
            return Err(Error::ChannelError {
                context: "every worker channel is closed".to_string(),
            });
        };

        match self.workers[worker_idx].send(request).await {
            Ok(()) => Ok(()),
            Err(_) => Err(Error::ChannelError {
                context: format!("Worker {worker_idx} channel closed"),
            }),
        }
    }

    /// Queues one conversion and waits for its outcome.
    ///
    /// # Errors
    ///
    /// - [`Error::ServiceShutdown`] if the pool no longer accepts work.
    /// - [`Error::ChannelError`] if no worker could take the request, or the
    ///   worker went away before replying.
    pub async fn submit(&self, mml: &str) -> Result<ConversionOutcome, Error> {
        let _guard = InflightGuard::enter(&self.inflight);

        let (tx, rx) = oneshot::channel();
        let result = match self
            .send_to_next_worker(WorkRequest::Convert {
                mml: mml.to_string(),
                response: tx,
            })
            .await
        {
            Ok(()) => rx.await.map_err(|_| Error::ChannelError {
                context: "worker dropped the conversion reply".to_string(),
            }),
            Err(e) => Err(e),
        };

        // Workers exit during shutdown; a reply lost to that is a shutdown,
        // not a broken pool.
        match result {
            Err(Error::ChannelError { .. }) if !self.is_accepting() => Err(Error::ServiceShutdown),
            other => other,
        }
    }

    /// Gracefully shuts down all workers in the pool.
    ///
    /// - Refuses new conversions.
    /// - Waits up to `shutdown_timeout` for in-flight conversions to finish.
    /// - Cancels the shared [`CancellationToken`], killing any converter
    ///   still running.
    /// - Sends a [`WorkRequest::Shutdown`] to each worker and waits (up to 3
    ///   seconds per worker) for acknowledgements.
    pub async fn shutdown(&self) -> Result<(), Error> {
        // === Phase 0: Stop accepting new requests ===
        tracing::info!("Refusing new conversions");
        self.accepting.store(false, Ordering::Release);

        // === Phase 1: Wait for in-flight conversions to drain ===
        tracing::info!("Draining in-flight conversions ({} active)", self.inflight());
        let drain_result = timeout(self.shutdown_timeout, async {
            while self.inflight() > 0 {
                sleep(Duration::from_millis(50)).await;
            }
        })
        .await;

        match drain_result {
            Ok(()) => {
                tracing::debug!("All in-flight conversions drained successfully");
            }
            Err(_) => {
                tracing::warn!(
                    "Graceful drain timed out ({} conversions still active)",
                    self.inflight()
                );
            }
        }

        // === Phase 2: Cancel any remaining work ===
        tracing::debug!("Cancelling remaining work via shutdown token");
        self.shutdown_token.cancel();

        // === Phase 3: Notify workers to shut down ===
        tracing::debug!("Notifying all workers to shut down");
        let mut shutdown_handles = Vec::with_capacity(self.workers.len());

        for (i, worker) in self.workers.iter().enumerate() {
            let (tx, rx) = oneshot::channel();
            if let Err(e) = worker.send(WorkRequest::Shutdown { response: tx }).await {
                tracing::error!("Failed to send shutdown to worker {i}: {e}");
            } else {
                shutdown_handles.push((i, rx));
            }
        }

        tracing::debug!("Waiting for up to 3s per worker for shutdown acknowledgements");

        let timeout_futures = shutdown_handles.into_iter().map(|(i, rx)| async move {
            match timeout(Duration::from_secs(3), rx).await {
                Ok(Ok(())) => {
                    tracing::trace!("Worker {i} shutdown acknowledged");
                }
                Ok(Err(e)) => {
                    tracing::error!("Worker {i} returned error: {e}");
                }
                Err(_) => {
                    tracing::warn!("Worker {i} shutdown timed out");
                }
            }
        });

        futures::future::join_all(timeout_futures).await;

        tracing::info!("Worker pool shutdown complete");

        Ok(())
    }
}

#[async_trait]
impl Converter for WorkerPool {
    /// Runs the conversion on a pool worker. Only a pool that is shutting down
    /// reports [`ConversionOutcome::Cancelled`]; a broken pool reports
    /// [`ConversionOutcome::LaunchFailed`].
    async fn convert(&self, mml: &str) -> ConversionOutcome {
        match self.submit(mml).await {
            Ok(outcome) => outcome,
            Err(Error::ServiceShutdown) => {
                tracing::debug!("conversion refused, pool is shutting down");
                ConversionOutcome::Cancelled
            }
            Err(e) => {
                tracing::error!("conversion could not be dispatched: {e}");
                let outcome = ConversionOutcome::LaunchFailed {
                    reason: e.to_string(),
                };
                increment_conversion_failures(outcome.kind());
                outcome
            }
        }
    }
}
