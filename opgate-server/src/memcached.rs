//! Memcached cache backend
//!
//! Shares rate limit buckets and operations between server instances.
//! Requires the `memcached` feature flag.

use async_memcached::{AsciiProtocol, Client};
use async_trait::async_trait;
use opgate::{CacheClient, CacheError};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Memcached-backed [`CacheClient`]
///
/// Holds a single connection. Each call takes the connection out of its slot
/// and returns it only after a complete reply, so a call that fails or is
/// cancelled mid-flight leaves the slot empty and the next call reconnects.
/// A reply that arrives after its caller gave up can never be read as the
/// answer to a later command.
pub struct MemcachedCache {
    url: String,
    client: Mutex<Option<Client>>,
}

impl std::fmt::Debug for MemcachedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemcachedCache")
            .field("url", &redact_url(&self.url))
            .finish()
    }
}

impl MemcachedCache {
    /// Connect to the memcached server at `url`
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = Self::open(url).await?;
        debug!(url = %redact_url(url), "Memcached cache connected");

        Ok(Self {
            url: url.to_string(),
            client: Mutex::new(Some(client)),
        })
    }

    async fn open(url: &str) -> Result<Client, CacheError> {
        Client::new(url).await.map_err(|e| {
            CacheError::Unavailable(format!("Failed to connect to memcached: {e}"))
        })
    }

    /// Take the pooled connection, opening a new one when the slot is empty
    async fn checkout(&self, slot: &mut Option<Client>) -> Result<Client, CacheError> {
        match slot.take() {
            Some(client) => Ok(client),
            None => Self::open(&self.url).await,
        }
    }

    fn discard(&self, error: &dyn std::fmt::Display) {
        warn!(url = %redact_url(&self.url), error = %error, "Memcached call failed, dropping connection");
    }
}

#[async_trait]
impl CacheClient for MemcachedCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut slot = self.client.lock().await;
        let mut client = self.checkout(&mut slot).await?;

        match client.get(key).await {
            Ok(value) => {
                *slot = Some(client);
                let data = value.and_then(|value| value.data);
                if data.is_some() {
                    debug!(key, "Cache HIT (memcached)");
                } else {
                    debug!(key, "Cache MISS (memcached)");
                }
                Ok(data)
            }
            Err(e) => {
                self.discard(&e);
                Err(CacheError::Backend(format!("Memcached GET failed: {e}")))
            }
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        let mut slot = self.client.lock().await;
        let mut client = self.checkout(&mut slot).await?;
        let ttl_seconds = ttl.as_secs() as i64;

        match client.set(key, value, Some(ttl_seconds), None).await {
            Ok(_) => {
                *slot = Some(client);
                debug!(key, ttl_seconds, "Cache SET (memcached)");
                Ok(())
            }
            Err(e) => {
                self.discard(&e);
                Err(CacheError::Backend(format!("Memcached SET failed: {e}")))
            }
        }
    }

    async fn health_check(&self) -> bool {
        let mut slot = self.client.lock().await;
        let mut client = match self.checkout(&mut slot).await {
            Ok(client) => client,
            Err(e) => {
                debug!(error = %e, "Memcached health check failed");
                return false;
            }
        };

        // Use version command as health check
        match client.version().await {
            Ok(_) => {
                *slot = Some(client);
                true
            }
            Err(e) => {
                debug!(error = %e, "Memcached health check failed");
                false
            }
        }
    }

    fn provider_name(&self) -> &'static str {
        "memcached"
    }
}

/// Redact credentials from a memcached URL for logging
fn redact_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            let prefix = &url[..=colon_pos];
            let suffix = &url[at_pos..];
            return format!("{prefix}***{suffix}");
        }
    }
    url.to_string()
}
