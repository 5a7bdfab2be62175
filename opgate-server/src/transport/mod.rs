//! Transport layer for the server
//!
//! A transport accepts client connections, turns requests into coordinator
//! calls and renders the results. All transports share one [`AppCoordinator`],
//! and with it one rate limiter and one operation store.
//!
//! # Available Transports
//!
//! - [`http`]: REST API with multipart uploads and JSON responses

pub mod http;


use crate::backend::AppCoordinator;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Common interface for all transport implementations
///
/// Each transport is responsible for:
/// - Accepting client connections
/// - Applying the per-client rate limit
/// - Forwarding requests to the coordinator
/// - Sending responses back to clients
#[async_trait]
pub trait Transport {
    /// Start the transport server
    ///
    /// Runs until an error occurs or the server shuts down.
    async fn start(self, coordinator: Arc<AppCoordinator>) -> Result<()>;
}
