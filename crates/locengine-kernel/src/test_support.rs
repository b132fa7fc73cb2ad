//! In-crate recording doubles for unit tests.

use crate::transport::{
    DataCallError, FrameworkCallbacks, LocTransport, RequestKind, RequestSender, TransportError,
};
use crate::types::{
    AgpsStatus, AgpsType, AidingData, Bearer, ClientHandle, ConnHandle, EngineStatus, EventMask,
    Location, NiNotification, NiPayload, NiResponse, PositionMode, ServerAddr, SvStatus,
};
use parking_lot::Mutex;
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Open(EventMask),
    Close,
    StartFix,
    StopFix,
    SetPositionMode(PositionMode),
    SetServer(ServerAddr),
    DeleteAidingData(AidingData),
    AtlOpenStatus {
        handle: ConnHandle,
        success: bool,
        agps_type: AgpsType,
    },
    AtlCloseStatus {
        handle: ConnHandle,
        success: bool,
    },
    OpenDataCall,
    CloseDataCall,
    NiResponse(NiResponse, Vec<u8>),
    NotHandled(RequestKind),
    SendRequest(ClientHandle, u32),
    Location,
    Status(EngineStatus),
    Sv,
    Nmea,
    NiNotify(u32),
    Agps(AgpsStatus),
}

/// Records every transport and framework call in order.
#[derive(Default)]
pub struct Recorder {
    calls: Mutex<Vec<Call>>,
    data_call_results: Mutex<VecDeque<Result<(), DataCallError>>>,
    fail_sends: Mutex<bool>,
}

impl Recorder {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    /// Results handed out by successive `open_data_call` calls; `Ok` once
    /// the script runs out.
    pub fn script_data_call(&self, results: impl IntoIterator<Item = Result<(), DataCallError>>) {
        self.data_call_results.lock().extend(results);
    }

    pub fn fail_sends(&self) {
        *self.fail_sends.lock() = true;
    }

    fn push(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

impl RequestSender for Recorder {
    fn send_request(
        &self,
        client: ClientHandle,
        request_id: u32,
        _payload: &[u8],
    ) -> Result<(), TransportError> {
        self.push(Call::SendRequest(client, request_id));
        if *self.fail_sends.lock() {
            return Err(TransportError::Rejected("scripted failure".into()));
        }
        Ok(())
    }
}

impl LocTransport for Recorder {
    fn open(&self, mask: EventMask) -> Result<(), TransportError> {
        self.push(Call::Open(mask));
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        self.push(Call::Close);
        Ok(())
    }

    fn start_fix(&self) -> Result<(), TransportError> {
        self.push(Call::StartFix);
        Ok(())
    }

    fn stop_fix(&self) -> Result<(), TransportError> {
        self.push(Call::StopFix);
        Ok(())
    }

    fn set_position_mode(&self, mode: &PositionMode) -> Result<(), TransportError> {
        self.push(Call::SetPositionMode(*mode));
        Ok(())
    }

    fn set_server(&self, server: &ServerAddr) -> Result<(), TransportError> {
        self.push(Call::SetServer(server.clone()));
        Ok(())
    }

    fn delete_aiding_data(&self, data: AidingData) -> Result<(), TransportError> {
        self.push(Call::DeleteAidingData(data));
        Ok(())
    }

    fn atl_open_status(
        &self,
        handle: ConnHandle,
        success: bool,
        _apn: &str,
        _bearer: Option<Bearer>,
        agps_type: AgpsType,
    ) -> Result<(), TransportError> {
        self.push(Call::AtlOpenStatus {
            handle,
            success,
            agps_type,
        });
        Ok(())
    }

    fn atl_close_status(&self, handle: ConnHandle, success: bool) -> Result<(), TransportError> {
        self.push(Call::AtlCloseStatus { handle, success });
        Ok(())
    }

    fn open_data_call(&self) -> Result<(), DataCallError> {
        self.push(Call::OpenDataCall);
        self.data_call_results.lock().pop_front().unwrap_or(Ok(()))
    }

    fn close_data_call(&self) -> Result<(), DataCallError> {
        self.push(Call::CloseDataCall);
        Ok(())
    }

    fn inform_ni_response(
        &self,
        response: NiResponse,
        payload: NiPayload,
    ) -> Result<(), TransportError> {
        self.push(Call::NiResponse(response, payload.as_bytes().to_vec()));
        Ok(())
    }

    fn request_not_handled(&self, kind: RequestKind) -> Result<(), TransportError> {
        self.push(Call::NotHandled(kind));
        Ok(())
    }
}

impl FrameworkCallbacks for Recorder {
    fn location(&self, _location: &Location) {
        self.push(Call::Location);
    }

    fn status(&self, status: EngineStatus) {
        self.push(Call::Status(status));
    }

    fn sv_status(&self, _status: &SvStatus) {
        self.push(Call::Sv);
    }

    fn nmea(&self, _timestamp_ms: u64, _sentence: &str) {
        self.push(Call::Nmea);
    }

    fn ni_notify(&self, notification: &NiNotification) {
        self.push(Call::NiNotify(notification.id));
    }

    fn agps_status(&self, status: &AgpsStatus) {
        self.push(Call::Agps(status.clone()));
    }
}
