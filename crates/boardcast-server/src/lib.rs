//! # boardcast-server
//!
//! Axum HTTP + `WebSocket` surface for boardcast.
//!
//! - Static client page, password login and a signed session cookie
//! - `/ws` upgrade handed to the hub's connection handler
//! - Content read, snapshot save and restore behind the session
//! - Health and Prometheus metrics endpoints
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
