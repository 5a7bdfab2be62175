//! Server configuration and CLI argument parsing
//!
//! All settings come from command-line arguments or environment variables
//! with the OPGATE_ prefix.
//!
//! # Configuration Priority
//!
//! 1. CLI arguments (highest priority)
//! 2. Environment variables
//! 3. Default values (lowest priority)
//!
//! # Example Usage
//!
//! ```bash
//! # Using CLI arguments
//! opgate --http-port 9090 --cache memcached --memcached-url tcp://127.0.0.1:11211
//!
//! # Using environment variables
//! export OPGATE_HTTP_PORT=8080
//! export OPGATE_REQUESTS_PER_MINUTE=120
//! opgate
//!
//! # Mixed (CLI overrides env)
//! export OPGATE_HTTP_PORT=8080
//! opgate --http-port 9090  # Uses port 9090
//! ```

use anyhow::{Result, anyhow};
use clap::Parser;
use opgate::{CoordinatorConfig, LimiterConfig, StorageBackend, UploadPolicy};
use std::time::Duration;

/// Longest relative expiry memcached accepts; larger values are read as
/// absolute Unix timestamps
pub const MEMCACHED_MAX_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Main configuration structure for the server
#[derive(Debug, Clone)]
pub struct Config {
    pub http: HttpConfig,
    pub cache: CacheConfig,
    pub rate_limit: LimiterConfig,
    /// Lifetime of operation records and their idempotency keys
    pub operation_ttl: Duration,
    pub coordinator: CoordinatorConfig,
    /// Logging level (error, warn, info, debug, trace)
    pub log_level: String,
}

/// HTTP transport configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Host address to bind to (e.g., "0.0.0.0")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

/// Shared cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub backend: StorageBackend,
    /// Memcached server, e.g. `tcp://127.0.0.1:11211`
    pub memcached_url: String,
    /// Deadline for every cache call
    pub timeout: Duration,
    /// Expected number of keys for the memory backend
    pub capacity: usize,
    /// Sweep interval for the memory backend
    pub cleanup_interval: Duration,
}

/// Command-line arguments for the server
///
/// All arguments can also be set via environment variables with the OPGATE_
/// prefix. CLI arguments take precedence over environment variables.
#[derive(Parser, Debug)]
#[command(
    name = "opgate",
    about = "Rate-limited, idempotent upload operations over a shared cache",
    long_about = "Accepts file pair uploads as asynchronous operations, deduplicated by the X-Operation-Key header, and serves their status. Requests are rate limited per client with a token bucket kept in the shared cache.\n\nEnvironment variables with OPGATE_ prefix are supported. CLI arguments take precedence over environment variables."
)]
pub struct Args {
    // HTTP Transport
    #[arg(
        long,
        value_name = "HOST",
        help = "HTTP host",
        default_value = "127.0.0.1",
        env = "OPGATE_HTTP_HOST"
    )]
    pub http_host: String,
    #[arg(
        long,
        value_name = "PORT",
        help = "HTTP port",
        default_value_t = 8080,
        env = "OPGATE_HTTP_PORT"
    )]
    pub http_port: u16,

    // Cache
    #[arg(
        long,
        value_name = "BACKEND",
        help = "Cache backend: memory, memcached",
        default_value = "memory",
        env = "OPGATE_CACHE"
    )]
    pub cache: StorageBackend,
    #[arg(
        long,
        value_name = "URL",
        help = "Memcached server URL",
        default_value = "tcp://127.0.0.1:11211",
        env = "OPGATE_MEMCACHED_URL"
    )]
    pub memcached_url: String,
    #[arg(
        long,
        value_name = "MS",
        help = "Deadline for each cache call (milliseconds)",
        default_value_t = 500,
        env = "OPGATE_CACHE_TIMEOUT_MS"
    )]
    pub cache_timeout_ms: u64,
    #[arg(
        long,
        value_name = "SIZE",
        help = "Initial capacity of the memory cache",
        default_value_t = 100_000,
        env = "OPGATE_CACHE_CAPACITY"
    )]
    pub cache_capacity: usize,
    #[arg(
        long,
        value_name = "SECS",
        help = "Cleanup interval of the memory cache (seconds)",
        default_value_t = 60,
        env = "OPGATE_CACHE_CLEANUP_INTERVAL"
    )]
    pub cache_cleanup_interval: u64,

    // Rate limiting
    #[arg(
        long,
        value_name = "BOOL",
        help = "Enable per-client rate limiting",
        default_value_t = true,
        action = clap::ArgAction::Set,
        env = "OPGATE_RATE_LIMIT_ENABLED"
    )]
    pub rate_limit_enabled: bool,
    #[arg(
        long,
        value_name = "N",
        help = "Token refill rate per client (requests per minute)",
        default_value_t = 60,
        env = "OPGATE_REQUESTS_PER_MINUTE"
    )]
    pub requests_per_minute: u32,
    #[arg(
        long,
        value_name = "N",
        help = "Token bucket capacity (burst size)",
        default_value_t = 60,
        env = "OPGATE_BUCKET_CAPACITY"
    )]
    pub bucket_capacity: u32,

    // Operations
    #[arg(
        long,
        value_name = "SECS",
        help = "Lifetime of operations and operation keys (seconds)",
        default_value_t = 3600,
        env = "OPGATE_OPERATION_TTL"
    )]
    pub operation_ttl: u64,
    #[arg(
        long,
        value_name = "SECS",
        help = "Average processing time of one file pair (seconds)",
        default_value_t = 10,
        env = "OPGATE_AVERAGE_SECONDS_PER_PAIR"
    )]
    pub average_seconds_per_pair: u64,

    // Uploads
    #[arg(
        long,
        value_name = "N",
        help = "Maximum number of files per upload",
        default_value_t = 20,
        env = "OPGATE_MAX_FILES"
    )]
    pub max_files: usize,
    #[arg(
        long,
        value_name = "BYTES",
        help = "Maximum size of a single file (bytes)",
        default_value_t = 10 * 1024 * 1024,
        env = "OPGATE_MAX_FILE_SIZE"
    )]
    pub max_file_size: u64,
    #[arg(
        long,
        value_name = "TYPES",
        help = "Comma-separated list of accepted MIME types",
        value_delimiter = ',',
        default_value = "application/pdf",
        env = "OPGATE_ALLOWED_MIME_TYPES"
    )]
    pub allowed_mime_types: Vec<String>,

    // General options
    #[arg(
        long,
        value_name = "LEVEL",
        help = "Log level: error, warn, info, debug, trace",
        default_value = "info",
        env = "OPGATE_LOG_LEVEL"
    )]
    pub log_level: String,

    // Utility options
    #[arg(
        long,
        help = "List all environment variables and exit",
        action = clap::ArgAction::SetTrue
    )]
    pub list_env_vars: bool,
}

impl Config {
    /// Build configuration from environment variables and CLI arguments
    ///
    /// # Errors
    ///
    /// Returns an error if the parsed values fail [`validation`](Self::validate).
    pub fn from_env_and_args() -> Result<Self> {
        let args = Args::parse();

        if args.list_env_vars {
            Self::print_env_vars();
            std::process::exit(0);
        }

        Self::from_args(args)
    }

    /// Build and validate configuration from already parsed arguments
    pub fn from_args(args: Args) -> Result<Self> {
        let config = Config {
            http: HttpConfig {
                host: args.http_host,
                port: args.http_port,
            },
            cache: CacheConfig {
                backend: args.cache,
                memcached_url: args.memcached_url,
                timeout: Duration::from_millis(args.cache_timeout_ms),
                capacity: args.cache_capacity,
                cleanup_interval: Duration::from_secs(args.cache_cleanup_interval),
            },
            rate_limit: LimiterConfig {
                requests_per_minute: args.requests_per_minute,
                bucket_capacity: args.bucket_capacity,
                enabled: args.rate_limit_enabled,
                storage_backend: args.cache,
            },
            operation_ttl: Duration::from_secs(args.operation_ttl),
            coordinator: CoordinatorConfig {
                average_seconds_per_pair: args.average_seconds_per_pair,
                upload: UploadPolicy {
                    max_files: args.max_files,
                    max_file_size: args.max_file_size,
                    allowed_mime_types: args
                        .allowed_mime_types
                        .into_iter()
                        .map(|mime| mime.trim().to_string())
                        .filter(|mime| !mime.is_empty())
                        .collect(),
                },
            },
            log_level: args.log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.cache.backend == StorageBackend::Memcached
            && self.operation_ttl > MEMCACHED_MAX_TTL
        {
            return Err(anyhow!(
                "Operation TTL of {}s exceeds the memcached maximum of {}s",
                self.operation_ttl.as_secs(),
                MEMCACHED_MAX_TTL.as_secs()
            ));
        }
        if self.cache.backend == StorageBackend::Memcached && !cfg!(feature = "memcached") {
            return Err(anyhow!(
                "The memcached cache backend is not available in this build.\n\n\
                Rebuild with the memcached feature:\n  \
                cargo build --release --features memcached\n\n\
                or run with the in-process cache:\n  \
                opgate --cache memory"
            ));
        }
        if self.cache.timeout.is_zero() {
            return Err(anyhow!("Cache timeout must be greater than zero"));
        }
        if self.rate_limit.requests_per_minute == 0 {
            return Err(anyhow!("Requests per minute must be greater than zero"));
        }
        if self.rate_limit.bucket_capacity == 0 {
            return Err(anyhow!("Bucket capacity must be greater than zero"));
        }
        if self.operation_ttl.is_zero() {
            return Err(anyhow!("Operation TTL must be greater than zero"));
        }
        if self.coordinator.average_seconds_per_pair == 0 {
            return Err(anyhow!("Average seconds per pair must be greater than zero"));
        }

        let upload = &self.coordinator.upload;
        if upload.max_files < 2 {
            return Err(anyhow!(
                "Max files must allow at least one pair, got {}",
                upload.max_files
            ));
        }
        if upload.max_file_size == 0 {
            return Err(anyhow!("Max file size must be greater than zero"));
        }
        if upload.allowed_mime_types.is_empty() {
            return Err(anyhow!("At least one allowed MIME type is required"));
        }

        Ok(())
    }

    /// Print all available environment variables and their descriptions
    fn print_env_vars() {
        println!("opgate Environment Variables");
        println!("============================");
        println!();
        println!("All environment variables use the OPGATE_ prefix.");
        println!("CLI arguments take precedence over environment variables.");
        println!();

        println!("HTTP Configuration:");
        println!("  OPGATE_HTTP_HOST=<host>                  HTTP host [default: 127.0.0.1]");
        println!("  OPGATE_HTTP_PORT=<port>                  HTTP port [default: 8080]");
        println!();

        println!("Cache Configuration:");
        println!(
            "  OPGATE_CACHE=<backend>                   Cache backend: memory, memcached [default: memory]"
        );
        println!(
            "  OPGATE_MEMCACHED_URL=<url>               Memcached server [default: tcp://127.0.0.1:11211]"
        );
        println!("  OPGATE_CACHE_TIMEOUT_MS=<ms>             Deadline per cache call [default: 500]");
        println!(
            "  OPGATE_CACHE_CAPACITY=<size>             Memory cache capacity [default: 100000]"
        );
        println!(
            "  OPGATE_CACHE_CLEANUP_INTERVAL=<secs>     Memory cache cleanup interval [default: 60]"
        );
        println!();

        println!("Rate Limiting:");
        println!("  OPGATE_RATE_LIMIT_ENABLED=true|false     Enable rate limiting [default: true]");
        println!("  OPGATE_REQUESTS_PER_MINUTE=<n>           Refill rate per client [default: 60]");
        println!("  OPGATE_BUCKET_CAPACITY=<n>               Burst size per client [default: 60]");
        println!();

        println!("Operations and Uploads:");
        println!(
            "  OPGATE_OPERATION_TTL=<secs>              Lifetime of operations and keys [default: 3600]"
        );
        println!(
            "  OPGATE_AVERAGE_SECONDS_PER_PAIR=<secs>   Processing estimate per pair [default: 10]"
        );
        println!("  OPGATE_MAX_FILES=<n>                     Files per upload [default: 20]");
        println!(
            "  OPGATE_MAX_FILE_SIZE=<bytes>             Size limit per file [default: 10485760]"
        );
        println!(
            "  OPGATE_ALLOWED_MIME_TYPES=<types>        Comma-separated MIME types [default: application/pdf]"
        );
        println!();

        println!("General Configuration:");
        println!(
            "  OPGATE_LOG_LEVEL=<level>                 Log level: error, warn, info, debug, trace [default: info]"
        );
        println!();

        println!("Examples:");
        println!("  # Share limits and operations between instances through memcached");
        println!("  export OPGATE_CACHE=memcached");
        println!("  export OPGATE_MEMCACHED_URL=tcp://10.0.0.5:11211");
        println!();
        println!("  # Run server (CLI args override env vars)");
        println!("  opgate --http-port 9090");
    }
}
