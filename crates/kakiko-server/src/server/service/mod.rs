//! HTTP service and routing.
//!
//! ## Structure
//!
//! - [`handler`] - Shared service state and the endpoint handlers.
//! - [`routes`] - The axum [`Router`](axum::Router) tying them together.

pub mod handler;
pub mod routes;
