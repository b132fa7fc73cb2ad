//! The engine's own adapter.
//!
//! [`EngineListener`] is the registry entry that contributes the engine's
//! event mask. Its work runs inline, on the worker, inside the command that
//! dispatches the event: the handlers below are applied before any other
//! adapter sees the event, so a host command queued right after an
//! indication always observes its effect.

use super::state::EngineState;
use crate::adapter::LocAdapter;
use crate::arbiter::RsrcEvent;
use crate::queue::QueueHandle;
use crate::types::{
    AgpsType, ConnHandle, EngineStatus, EventMask, Location, NiNotification, NiPayload,
    ResourceType, SvStatus,
};
use tracing::{debug, warn};

pub struct EngineListener {
    mask: EventMask,
}

impl EngineListener {
    pub(crate) fn new(mask: EventMask) -> Self {
        Self { mask }
    }
}

impl LocAdapter for EngineListener {
    fn name(&self) -> &str {
        "engine"
    }

    fn event_mask(&self) -> EventMask {
        self.mask
    }
}

impl EngineState {
    /// Whether the engine adapter is still registered.
    pub(crate) fn engine_registered(&self) -> bool {
        self.listener_key.is_some()
    }

    /// Whether the engine takes first-handling requests ahead of other
    /// adapters.
    pub(crate) fn engine_handles_requests(&self) -> bool {
        self.engine_registered() && self.io.config.agps.supports_agps_requests
    }

    // ------------------------------------------------------------------
    // Broadcast
    // ------------------------------------------------------------------

    pub(crate) fn on_position(&mut self, location: &Location) {
        self.session.report_position(location, &*self.io.callbacks);
    }

    pub(crate) fn on_sv(&mut self, status: &SvStatus) {
        self.session.report_sv(status, &*self.io.callbacks);
    }

    pub(crate) fn on_status(&mut self, status: EngineStatus) {
        if let Err(err) = self
            .session
            .report_status(status, &*self.io.transport, &*self.io.callbacks)
        {
            warn!(error = %err, "status handling failed");
        }
    }

    pub(crate) fn on_nmea(&mut self, timestamp_ms: u64, sentence: &str) {
        self.io.callbacks.nmea(timestamp_ms, sentence);
    }

    pub(crate) fn on_engine_up(&mut self) {
        self.arbiter.drop_all_subscribers(ResourceType::Cellular);
        self.arbiter.drop_all_subscribers(ResourceType::LowBandwidth);
        if let Err(err) = self.session.handle_engine_up(&*self.io.transport) {
            warn!(error = %err, "session restart failed");
        }
    }

    pub(crate) fn on_engine_down(&mut self) {
        // Waiting NI sessions hold a dead modem handle.
        self.io.ni.reset_on_engine_restart();
        self.io.restart_epoch.advance();
        self.session.handle_engine_down();
        self.on_status(EngineStatus::EngineOff);
    }

    // ------------------------------------------------------------------
    // First-handling
    // ------------------------------------------------------------------

    pub(crate) fn on_xtra_servers(&mut self, servers: &[String]) {
        self.io.callbacks.xtra_servers(servers);
    }

    pub(crate) fn on_xtra_data_request(&mut self) {
        self.io.callbacks.request_xtra_data();
    }

    pub(crate) fn on_time_request(&mut self) {
        self.io.callbacks.request_time();
    }

    pub(crate) fn on_location_request(&mut self) {
        self.io.callbacks.request_location();
    }

    pub(crate) fn on_request_atl(
        &mut self,
        handle: ConnHandle,
        agps_type: AgpsType,
        q: &QueueHandle<EngineState>,
    ) {
        let mut svc = self.io.servicer(q);
        if !self.arbiter.request_atl(handle, agps_type, &mut svc) {
            self.io.fail_atl_open(handle, agps_type);
        }
    }

    pub(crate) fn on_release_atl(&mut self, handle: ConnHandle, q: &QueueHandle<EngineState>) {
        let mut svc = self.io.servicer(q);
        if !self.arbiter.release_atl(handle, &mut svc) {
            self.io.fail_atl_close(handle);
        }
    }

    pub(crate) fn on_request_supl_es(&mut self, handle: ConnHandle, q: &QueueHandle<EngineState>) {
        let mut svc = self.io.servicer(q);
        if !self.arbiter.request_supl_es(handle, &mut svc) {
            self.io.fail_atl_open(handle, AgpsType::SuplEs);
        }
    }

    /// Data call came up (`Granted`) or went away (`Released`).
    pub(crate) fn on_data_call(&mut self, event: RsrcEvent, q: &QueueHandle<EngineState>) {
        let mut svc = self.io.servicer(q);
        self.arbiter.on_event(ResourceType::DataCall, event, &mut svc);
    }

    pub(crate) fn on_ni_request(&mut self, notification: NiNotification, payload: NiPayload) {
        if self.io.ni.request(notification, payload).is_none() {
            debug!("NI request not started");
        }
    }
}
