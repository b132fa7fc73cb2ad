use locengine_kernel::transport::{
    DataCallError, FrameworkCallbacks, LocTransport, RequestKind, RequestSender, TransportError,
};
use locengine_kernel::types::{
    AgpsStatus, AgpsType, AidingData, Bearer, ClientHandle, ConnHandle, EngineStatus, EventMask,
    Location, NiNotification, NiPayload, NiResponse, PositionMode, ServerAddr, SvStatus,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Everything the engine asked the modem to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
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
        apn: String,
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
    SendRequest {
        client: ClientHandle,
        request_id: u32,
    },
}

type SendHook = Box<dyn Fn(ClientHandle, u32, &[u8]) + Send + Sync>;

/// Recording [`LocTransport`] with scriptable failures.
#[derive(Default)]
pub struct MockTransport {
    calls: Mutex<Vec<TransportCall>>,
    data_call_results: Mutex<VecDeque<Result<(), DataCallError>>>,
    send_error: Mutex<Option<TransportError>>,
    on_send: Mutex<Option<SendHook>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&TransportCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    /// Clears the captured call history.
    pub fn clear_history(&self) {
        self.calls.lock().clear();
    }

    /// Results for successive `open_data_call` calls; `Ok` once exhausted.
    pub fn script_data_call(&self, results: impl IntoIterator<Item = Result<(), DataCallError>>) {
        self.data_call_results.lock().extend(results);
    }

    /// Makes every `send_request` fail with `error`.
    pub fn fail_sends_with(&self, error: TransportError) {
        *self.send_error.lock() = Some(error);
    }

    /// Runs `hook` inside each successful `send_request`, e.g. to answer
    /// before the caller starts waiting.
    pub fn on_send(&self, hook: impl Fn(ClientHandle, u32, &[u8]) + Send + Sync + 'static) {
        *self.on_send.lock() = Some(Box::new(hook));
    }

    fn record(&self, call: TransportCall) {
        self.calls.lock().push(call);
    }
}

impl RequestSender for MockTransport {
    fn send_request(
        &self,
        client: ClientHandle,
        request_id: u32,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        self.record(TransportCall::SendRequest { client, request_id });
        if let Some(err) = self.send_error.lock().clone() {
            return Err(err);
        }
        if let Some(hook) = self.on_send.lock().as_ref() {
            hook(client, request_id, payload);
        }
        Ok(())
    }
}

impl LocTransport for MockTransport {
    fn open(&self, mask: EventMask) -> Result<(), TransportError> {
        self.record(TransportCall::Open(mask));
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        self.record(TransportCall::Close);
        Ok(())
    }

    fn start_fix(&self) -> Result<(), TransportError> {
        self.record(TransportCall::StartFix);
        Ok(())
    }

    fn stop_fix(&self) -> Result<(), TransportError> {
        self.record(TransportCall::StopFix);
        Ok(())
    }

    fn set_position_mode(&self, mode: &PositionMode) -> Result<(), TransportError> {
        self.record(TransportCall::SetPositionMode(*mode));
        Ok(())
    }

    fn set_server(&self, server: &ServerAddr) -> Result<(), TransportError> {
        self.record(TransportCall::SetServer(server.clone()));
        Ok(())
    }

    fn delete_aiding_data(&self, data: AidingData) -> Result<(), TransportError> {
        self.record(TransportCall::DeleteAidingData(data));
        Ok(())
    }

    fn atl_open_status(
        &self,
        handle: ConnHandle,
        success: bool,
        apn: &str,
        _bearer: Option<Bearer>,
        agps_type: AgpsType,
    ) -> Result<(), TransportError> {
        self.record(TransportCall::AtlOpenStatus {
            handle,
            success,
            apn: apn.to_string(),
            agps_type,
        });
        Ok(())
    }

    fn atl_close_status(&self, handle: ConnHandle, success: bool) -> Result<(), TransportError> {
        self.record(TransportCall::AtlCloseStatus { handle, success });
        Ok(())
    }

    fn open_data_call(&self) -> Result<(), DataCallError> {
        self.record(TransportCall::OpenDataCall);
        self.data_call_results.lock().pop_front().unwrap_or(Ok(()))
    }

    fn close_data_call(&self) -> Result<(), DataCallError> {
        self.record(TransportCall::CloseDataCall);
        Ok(())
    }

    fn inform_ni_response(
        &self,
        response: NiResponse,
        payload: NiPayload,
    ) -> Result<(), TransportError> {
        self.record(TransportCall::NiResponse(response, payload.as_bytes().to_vec()));
        Ok(())
    }

    fn request_not_handled(&self, kind: RequestKind) -> Result<(), TransportError> {
        self.record(TransportCall::NotHandled(kind));
        Ok(())
    }
}

/// What the engine reported up to the framework.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameworkEvent {
    Fix(Location),
    Status(EngineStatus),
    SvStatus,
    Nmea(String),
    Capabilities(u32),
    NiNotify(NiNotification),
    Agps(AgpsStatus),
    XtraServers(Vec<String>),
    XtraDataRequest,
    TimeRequest,
    LocationRequest,
}

/// Recording [`FrameworkCallbacks`].
#[derive(Default)]
pub struct RecordingCallbacks {
    events: Mutex<Vec<FrameworkEvent>>,
}

impl RecordingCallbacks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<FrameworkEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&FrameworkEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    /// Ids of every NI prompt raised so far.
    pub fn ni_ids(&self) -> Vec<u32> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                FrameworkEvent::NiNotify(n) => Some(n.id),
                _ => None,
            })
            .collect()
    }

    pub fn clear_history(&self) {
        self.events.lock().clear();
    }

    fn record(&self, event: FrameworkEvent) {
        self.events.lock().push(event);
    }
}

impl FrameworkCallbacks for RecordingCallbacks {
    fn location(&self, location: &Location) {
        self.record(FrameworkEvent::Fix(location.clone()));
    }

    fn status(&self, status: EngineStatus) {
        self.record(FrameworkEvent::Status(status));
    }

    fn sv_status(&self, _status: &SvStatus) {
        self.record(FrameworkEvent::SvStatus);
    }

    fn nmea(&self, _timestamp_ms: u64, sentence: &str) {
        self.record(FrameworkEvent::Nmea(sentence.to_string()));
    }

    fn capabilities(&self, capabilities: u32) {
        self.record(FrameworkEvent::Capabilities(capabilities));
    }

    fn ni_notify(&self, notification: &NiNotification) {
        self.record(FrameworkEvent::NiNotify(notification.clone()));
    }

    fn agps_status(&self, status: &AgpsStatus) {
        self.record(FrameworkEvent::Agps(status.clone()));
    }

    fn xtra_servers(&self, servers: &[String]) {
        self.record(FrameworkEvent::XtraServers(servers.to_vec()));
    }

    fn request_xtra_data(&self) {
        self.record(FrameworkEvent::XtraDataRequest);
    }

    fn request_time(&self) {
        self.record(FrameworkEvent::TimeRequest);
    }

    fn request_location(&self) {
        self.record(FrameworkEvent::LocationRequest);
    }
}
