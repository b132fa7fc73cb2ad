//! Fix-session façade.
//!
//! [`EngineAdapter`] owns the [`FixSession`] and routes every intercept point
//! through a runtime-swappable [`SessionPolicy`] before falling back to the
//! transport/framework path. It is part of the engine state and therefore only
//! touched by the command-queue worker.

mod policy;

pub use policy::{DefaultPolicy, SessionPolicy};

use crate::transport::{FrameworkCallbacks, LocTransport, TransportError};
use crate::types::{AidingData, EngineStatus, Location, PositionMode, SvStatus};
use std::sync::Arc;
use tracing::{debug, info};

/// Current positioning mode and whether a session is running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixSession {
    pub mode: PositionMode,
    pub in_session: bool,
}

pub struct EngineAdapter {
    delegate: Arc<dyn SessionPolicy>,
    session: FixSession,
    engine_status: EngineStatus,
    pending_aiding: AidingData,
}

impl Default for EngineAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineAdapter {
    pub fn new() -> Self {
        Self {
            delegate: Arc::new(DefaultPolicy),
            session: FixSession::default(),
            engine_status: EngineStatus::None,
            pending_aiding: AidingData::default(),
        }
    }

    pub fn session(&self) -> FixSession {
        self.session
    }

    pub fn is_in_session(&self) -> bool {
        self.session.in_session
    }

    pub fn engine_status(&self) -> EngineStatus {
        self.engine_status
    }

    pub fn delegate(&self) -> &Arc<dyn SessionPolicy> {
        &self.delegate
    }

    /// Aiding data waiting for the engine to turn off.
    pub fn pending_aiding(&self) -> AidingData {
        self.pending_aiding
    }

    /// Ending a session always invalidates the mode, so the next start cannot
    /// reuse a stale one.
    pub fn set_in_session(&mut self, in_session: bool) {
        self.session.in_session = in_session;
        if !in_session {
            self.session.mode = PositionMode::invalid();
        }
    }

    /// Swaps in a new delegate.
    ///
    /// Setting the current delegate again is a no-op. Otherwise the current
    /// mode and running state are replayed into `new` before it takes over.
    pub fn set_delegate(&mut self, new: Arc<dyn SessionPolicy>) {
        if std::ptr::addr_eq(Arc::as_ptr(&self.delegate), Arc::as_ptr(&new)) {
            debug!(policy = new.name(), "delegate already active");
            return;
        }
        if self.session.mode.is_valid() {
            new.set_position_mode(&self.session.mode);
        }
        if self.session.in_session {
            new.start_fix();
        }
        info!(old = self.delegate.name(), new = new.name(), "session delegate replaced");
        self.delegate = new;
    }

    // ------------------------------------------------------------------
    // Intercept points
    // ------------------------------------------------------------------

    pub fn set_position_mode(
        &mut self,
        mode: PositionMode,
        transport: &dyn LocTransport,
    ) -> Result<(), TransportError> {
        self.session.mode = mode;
        if self.delegate.set_position_mode(&mode) {
            return Ok(());
        }
        transport.set_position_mode(&mode)
    }

    pub fn start_fix(&mut self, transport: &dyn LocTransport) -> Result<(), TransportError> {
        if !self.delegate.start_fix() {
            transport.start_fix()?;
        }
        self.set_in_session(true);
        Ok(())
    }

    pub fn stop_fix(&mut self, transport: &dyn LocTransport) -> Result<(), TransportError> {
        if !self.delegate.stop_fix() {
            transport.stop_fix()?;
        }
        self.set_in_session(false);
        Ok(())
    }

    pub fn report_position(&self, location: &Location, callbacks: &dyn FrameworkCallbacks) {
        if !self.delegate.report_position(location) {
            callbacks.location(location);
        }
    }

    pub fn report_sv(&self, status: &SvStatus, callbacks: &dyn FrameworkCallbacks) {
        if !self.delegate.report_sv(status) {
            callbacks.sv_status(status);
        }
    }

    /// Records the engine status and flushes deferred aiding deletion once
    /// the engine is off.
    pub fn report_status(
        &mut self,
        status: EngineStatus,
        transport: &dyn LocTransport,
        callbacks: &dyn FrameworkCallbacks,
    ) -> Result<(), TransportError> {
        if matches!(status, EngineStatus::EngineOn | EngineStatus::EngineOff) {
            self.engine_status = status;
        }
        if !self.delegate.report_status(status) {
            callbacks.status(status);
        }
        if status == EngineStatus::EngineOff && !self.pending_aiding.is_empty() {
            let data = std::mem::take(&mut self.pending_aiding);
            debug!(mask = data.0, "issuing deferred aiding data deletion");
            transport.delete_aiding_data(data)?;
        }
        Ok(())
    }

    /// Deletes aiding data now, or once the engine turns off if it is on.
    pub fn delete_aiding_data(
        &mut self,
        data: AidingData,
        transport: &dyn LocTransport,
    ) -> Result<(), TransportError> {
        if self.engine_status == EngineStatus::EngineOn {
            self.pending_aiding = self.pending_aiding | data;
            debug!(mask = self.pending_aiding.0, "aiding data deletion deferred");
            return Ok(());
        }
        transport.delete_aiding_data(data)
    }

    /// Re-establishes a running session after the modem restarted.
    pub fn handle_engine_up(&mut self, transport: &dyn LocTransport) -> Result<(), TransportError> {
        self.engine_status = EngineStatus::None;
        if !self.session.in_session {
            return Ok(());
        }
        let mode = self.session.mode;
        self.set_in_session(false);
        if mode.is_valid() {
            self.set_position_mode(mode, transport)?;
        }
        self.start_fix(transport)
    }

    pub fn handle_engine_down(&mut self) {
        self.engine_status = EngineStatus::EngineOff;
    }
}
