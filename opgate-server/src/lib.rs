//! # opgate server
//!
//! HTTP front end for the opgate library: per-client rate limiting and
//! idempotent, asynchronously processed uploads, with all state kept in a
//! shared cache.
//!
//! ## Purpose
//!
//! Clients upload pairs of documents (before/after) for comparison. Processing
//! takes a while, so an upload only creates an operation and returns its id;
//! the client polls the operation until it is done. The server can run as many
//! instances as needed behind a load balancer as long as they share one
//! memcached: limits, operations and idempotency keys all live there.
//!
//! ## Quick Start
//!
//! ```bash
//! # Show all available options
//! opgate --help
//!
//! # Single instance with the in-process cache
//! opgate --http-port 8080
//!
//! # Shared state through memcached (build with --features memcached)
//! opgate --cache memcached --memcached-url tcp://127.0.0.1:11211
//!
//! # List all available environment variables
//! opgate --list-env-vars
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Upload one pair
//! curl -X POST http://localhost:8080/upload \
//!   -H "X-Operation-Key: batch-2024-06-01" \
//!   -F "files=@before.pdf" -F "files=@after.pdf"
//!
//! # Poll the operation
//! curl "http://localhost:8080/get?id=<operation_id>"
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │        HTTP Transport        │
//! │  rate limit middleware, API  │
//! └──────────────┬───────────────┘
//!                │
//!          ┌─────▼──────┐
//!          │Coordinator │
//!          └──┬──────┬──┘
//!             │      │
//!    ┌────────▼┐  ┌──▼─────────────┐
//!    │ Limiter │  │ OperationStore │
//!    └────────┬┘  └──┬─────────────┘
//!             │      │
//!        ┌────▼──────▼────┐
//!        │ TimeoutCache   │
//!        │ memory|memcached│
//!        └────────────────┘
//! ```
//!
//! When the cache fails, rate limiting lets requests through and uploads and
//! status lookups answer `500`; `/health` reports `503` until it recovers.

pub mod backend;
pub mod config;
#[cfg(feature = "memcached")]
pub mod memcached;
pub mod transport;
