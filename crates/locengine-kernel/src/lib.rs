//! Concurrency and arbitration core of a GNSS location engine.
//!
//! Everything that mutates engine state runs on a single command-queue
//! worker. Modem indications fan out to registered adapters, AGPS data
//! connections are shared through per-bearer state machines, network
//! initiated prompts are tracked with deadlines, and a small slot pool lets
//! callers block on a request until its indication arrives.

// types module
pub mod types;

// transport seams
pub mod transport;

// error module
pub mod error;

// logging module
pub mod logging;

// config module
pub mod config;

// command queue
pub mod queue;

// adapters and registry
pub mod adapter;

// fix session façade
pub mod session;

// AGPS resource arbitration
pub mod arbiter;

// network-initiated sessions
pub mod ni;

// sync request bridge
pub mod sync_req;

// engine façade
pub mod engine;
pub use engine::LocEngine;

#[cfg(test)]
mod test_support;

pub use adapter::{AdapterKey, AdapterRegistry, LocAdapter, MaskUpdate};
pub use config::EngineConfig;
pub use error::{KernelError, KernelResult};
pub use transport::{FrameworkCallbacks, LocTransport, RequestKind, RequestSender};
pub use types::*;
