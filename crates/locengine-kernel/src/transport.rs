//! Seams to the outside world.
//!
//! [`LocTransport`] is the modem side: the kernel calls into it and receives
//! asynchronous indications back through the engine entry points.
//! [`FrameworkCallbacks`] is the hosting framework side: callbacks run on the
//! command-queue worker or an NI wait task, never concurrently for the same
//! callback.

use crate::types::{
    AgpsStatus, AgpsType, AidingData, Bearer, ClientHandle, ConnHandle, EngineStatus, EventMask,
    Location, NiNotification, NiPayload, NiResponse, PositionMode, ServerAddr, SvStatus,
};
use thiserror::Error;

/// Errors reported by a transport call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("transport rejected the request: {0}")]
    Rejected(String),

    #[error("transport is not connected")]
    Disconnected,
}

/// Outcome of asking the modem to bring up a dedicated data call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DataCallError {
    /// Modem is busy; the open may be retried later.
    #[error("data call service busy")]
    Busy,

    #[error("data call not supported")]
    Unsupported,

    #[error("data call failed")]
    Failed,
}

/// Request categories that can come back to the modem as "not handled".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Atl,
    SuplEs,
    XtraData,
    Time,
    Location,
    Ni,
}

/// Sends a raw request on behalf of a blocking caller.
///
/// Only the send is synchronous; the answer arrives later as an indication.
pub trait RequestSender: Send + Sync {
    fn send_request(
        &self,
        client: ClientHandle,
        request_id: u32,
        payload: &[u8],
    ) -> Result<(), TransportError>;
}

/// Modem-facing capability interface.
pub trait LocTransport: RequestSender {
    fn open(&self, mask: EventMask) -> Result<(), TransportError>;
    fn close(&self) -> Result<(), TransportError>;

    fn start_fix(&self) -> Result<(), TransportError>;
    fn stop_fix(&self) -> Result<(), TransportError>;
    fn set_position_mode(&self, mode: &PositionMode) -> Result<(), TransportError>;
    fn set_server(&self, server: &ServerAddr) -> Result<(), TransportError>;
    fn delete_aiding_data(&self, data: AidingData) -> Result<(), TransportError>;

    fn atl_open_status(
        &self,
        handle: ConnHandle,
        success: bool,
        apn: &str,
        bearer: Option<Bearer>,
        agps_type: AgpsType,
    ) -> Result<(), TransportError>;
    fn atl_close_status(&self, handle: ConnHandle, success: bool) -> Result<(), TransportError>;

    fn open_data_call(&self) -> Result<(), DataCallError>;
    fn close_data_call(&self) -> Result<(), DataCallError>;

    fn inform_ni_response(
        &self,
        response: NiResponse,
        payload: NiPayload,
    ) -> Result<(), TransportError>;

    /// Explicit "nobody can service this" answer for a first-handling request.
    fn request_not_handled(&self, kind: RequestKind) -> Result<(), TransportError>;
}

/// Framework-facing callbacks.
pub trait FrameworkCallbacks: Send + Sync {
    fn location(&self, location: &Location);
    fn status(&self, status: EngineStatus);
    fn sv_status(&self, status: &SvStatus);
    fn nmea(&self, timestamp_ms: u64, sentence: &str);
    fn capabilities(&self, capabilities: u32) {}
    fn ni_notify(&self, notification: &NiNotification);
    fn agps_status(&self, status: &AgpsStatus);
    /// XTRA download servers announced by the modem.
    fn xtra_servers(&self, servers: &[String]) {}
    fn request_xtra_data(&self) {}
    fn request_time(&self) {}
    fn request_location(&self) {}
}
