//! Bounded pool of conversion workers.
//!
//! - [`manager`] - [`manager::WorkerPool`], dispatch and graceful shutdown.
//! - [`request`] - Messages sent to workers.
//! - [`worker`] - The per-worker receive loop.

pub mod manager;
pub mod request;
pub mod worker;
