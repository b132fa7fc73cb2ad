//! Test doubles for `locengine-kernel`.
//!
//! [`MockTransport`] and [`RecordingCallbacks`] stand in for the modem and
//! the framework; [`RecordingAdapter`] is a listener whose first-handling
//! answers are configurable.

pub mod adapter;
pub mod transport;

pub use adapter::{AdapterEvent, RecordingAdapter};
pub use transport::{FrameworkEvent, MockTransport, RecordingCallbacks, TransportCall};

use anyhow::Result;
use locengine_kernel::config::EngineConfig;
use locengine_kernel::types::EventMask;
use locengine_kernel::LocEngine;
use std::sync::Arc;

/// An engine wired to fresh recording doubles.
pub struct Harness {
    pub engine: LocEngine,
    pub transport: Arc<MockTransport>,
    pub callbacks: Arc<RecordingCallbacks>,
}

impl Harness {
    /// Spawns an engine on the current tokio runtime.
    pub fn start(config: EngineConfig, mask: EventMask) -> Result<Self> {
        let transport = MockTransport::new();
        let callbacks = RecordingCallbacks::new();
        let engine = LocEngine::spawn(
            config,
            mask,
            transport.clone(),
            callbacks.clone(),
            tokio::runtime::Handle::current(),
        )
        .map_err(|report| anyhow::anyhow!("{report:?}"))?;
        Ok(Self {
            engine,
            transport,
            callbacks,
        })
    }

    /// Waits until every queued command and the follow-ups it spawned ran.
    ///
    /// Commands may enqueue further commands; each flush drains one level.
    pub fn settle(&self) -> Result<()> {
        for _ in 0..4 {
            self.engine.flush()?;
        }
        tracing::trace!("engine settled");
        Ok(())
    }
}
