//! Container lifecycle engine for Berth.
//!
//! The [`Engine`](engine::Engine) owns the container store and drives a
//! [`RuntimeBackend`](backend::RuntimeBackend) through the lifecycle
//! state machine. Queries, waits, health checks, and pruning are layered
//! on top of it in their own modules.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod backend;
pub mod container;
pub mod engine;
pub mod event;
pub mod filter;
pub mod health;
pub mod pod;
pub mod prune;
pub mod query;
pub mod report;
pub mod signal;
pub mod state;
pub mod store;
pub mod top;
pub mod volume;
pub mod wait;
