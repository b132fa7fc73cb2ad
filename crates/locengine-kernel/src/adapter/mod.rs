//! Listener adapters and the registry that dispatches modem events to them.
//!
//! Every method on [`LocAdapter`] has a default. Broadcast events default to
//! doing nothing; first-handling requests default to declining (`false`), so
//! an adapter only overrides what it actually services.

mod registry;

pub use registry::{AdapterKey, AdapterRegistry, MaskUpdate, RegistryError};

use crate::types::{
    AgpsType, ConnHandle, EngineStatus, EventMask, Location, NiNotification, NiPayload, SvStatus,
};

/// A listener registered with the engine.
///
/// Adapters never own engine state. Methods are invoked on the command-queue
/// worker; an adapter that needs to act on engine state enqueues a command
/// instead of blocking.
pub trait LocAdapter: Send + Sync {
    /// Diagnostic name used in logs.
    fn name(&self) -> &str {
        "adapter"
    }

    /// Capabilities this adapter wants the transport to report.
    fn event_mask(&self) -> EventMask;

    fn is_in_session(&self) -> bool {
        false
    }

    // ------------------------------------------------------------------
    // Broadcast events
    // ------------------------------------------------------------------

    fn report_position(&self, location: &Location) {}

    fn report_sv(&self, status: &SvStatus) {}

    fn report_status(&self, status: EngineStatus) {}

    fn report_nmea(&self, timestamp_ms: u64, sentence: &str) {}

    fn handle_engine_up(&self) {}

    fn handle_engine_down(&self) {}

    // ------------------------------------------------------------------
    // First-handling requests
    // ------------------------------------------------------------------

    fn report_xtra_server(&self, servers: &[String]) -> bool {
        false
    }

    fn request_xtra_data(&self) -> bool {
        false
    }

    fn request_time(&self) -> bool {
        false
    }

    fn request_location(&self) -> bool {
        false
    }

    fn request_atl(&self, handle: ConnHandle, agps_type: AgpsType) -> bool {
        false
    }

    fn release_atl(&self, handle: ConnHandle) -> bool {
        false
    }

    fn request_supl_es(&self, handle: ConnHandle) -> bool {
        false
    }

    fn report_data_call_opened(&self) -> bool {
        false
    }

    fn report_data_call_closed(&self) -> bool {
        false
    }

    /// A handler that accepts the request takes the payload out of `payload`.
    fn request_ni_notify(
        &self,
        notification: &NiNotification,
        payload: &mut Option<NiPayload>,
    ) -> bool {
        false
    }
}
