//! Crate-level error types for `locengine-kernel`.
//!
//! Provides a unified [`KernelError`] that composes the typed errors of every
//! sub-module together with [`error_stack::Report`] for context-carrying
//! propagation at the engine boundary.
//!
//! # Usage
//!
//! ```rust,ignore
//! use locengine_kernel::error::{KernelError, KernelResult};
//! use error_stack::ResultExt;
//!
//! fn boot() -> KernelResult<()> {
//!     let config = EngineConfig::load("gps.toml")
//!         .map_err(KernelError::from)
//!         .map_err(error_stack::Report::new)
//!         .attach("loading gps.toml")?;
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Crate-level error type for `locengine-kernel`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KernelError {
    #[error("Queue error: {0}")]
    Queue(#[from] crate::queue::QueueError),

    #[error("Registry error: {0}")]
    Registry(#[from] crate::adapter::RegistryError),

    #[error("Sync request error: {0}")]
    SyncRequest(#[from] crate::sync_req::SyncRequestError),

    #[error("Transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    /// A configuration-related error.
    #[error("Config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal / untyped error described by a message string.
    #[error("{0}")]
    Internal(String),
}

/// Convenience result alias using [`error_stack::Report`].
pub type KernelResult<T> = Result<T, error_stack::Report<KernelError>>;
