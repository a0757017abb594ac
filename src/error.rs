//! Custom error types for the gateway.
//!
//! This module defines the crate-level error type, `GatewayError`. Using the `thiserror`
//! crate, it gives one consistent way to report the failures that can happen while a
//! pipeline is assembled, started and torn down.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically TOML syntax problems or type
//!   mismatches in the configuration file or environment overrides.
//! - **`Configuration`**: Semantic errors in a configuration that parsed correctly
//!   (unknown log level, zero ring capacity, ...).
//! - **`ThreadSpawn`**: The OS refused to create a worker thread.
//! - **`Communication`**: A classified transport failure that reached the owner of a
//!   producer, see [`crate::communication::CommunicationError`].
//!
//! Transport failures inside the read loop never travel as `GatewayError`; they stay
//! `CommunicationError` values until the escalation policy decides they are fatal.

use crate::communication::CommunicationError;
use thiserror::Error;

/// Convenience alias for results using the gateway error type.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Primary error type of the gateway.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Configuration loading failed (file syntax, type mismatch, env override).
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration parsed but holds values the gateway cannot run with.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Logging backend could not be installed.
    #[error("Logging initialization error: {0}")]
    Logging(String),

    /// A ring buffer was requested with no pads.
    #[error("Ring buffer capacity must be at least one pad")]
    InvalidCapacity,

    /// The operating system could not start a worker thread.
    #[error("Failed to spawn worker thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),

    /// A worker thread panicked before returning its result.
    #[error("Worker thread '{thread}' panicked: {message}")]
    WorkerPanicked {
        /// Name given to the thread at spawn time.
        thread: String,
        /// Panic payload rendered as text.
        message: String,
    },

    /// The worker thread was already resolved (joined or detached).
    #[error("Worker thread '{0}' has already terminated")]
    ThreadTerminated(String),

    /// A fatal transport error surfaced to the owner of a producer.
    #[error("Communication failure: {0}")]
    Communication(#[from] CommunicationError),
}
