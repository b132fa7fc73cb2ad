use locengine_kernel::adapter::LocAdapter;
use locengine_kernel::transport::RequestKind;
use locengine_kernel::types::{
    AgpsType, ConnHandle, EngineStatus, EventMask, Location, NiNotification, NiPayload, SvStatus,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// What a [`RecordingAdapter`] was handed.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterEvent {
    Position(Location),
    Sv,
    Status(EngineStatus),
    Nmea(String),
    EngineUp,
    EngineDown,
    Offered(RequestKind),
    AtlRequested(ConnHandle, AgpsType),
    AtlReleased(ConnHandle),
    /// NI request taken, with the payload bytes it claimed.
    NiTaken(u32, Vec<u8>),
}

/// A listener adapter that records every call and handles only the request
/// kinds it is told to.
pub struct RecordingAdapter {
    name: String,
    mask: EventMask,
    handles: HashSet<RequestKind>,
    in_session: AtomicBool,
    events: Mutex<Vec<AdapterEvent>>,
}

impl RecordingAdapter {
    pub fn new(name: impl Into<String>, mask: EventMask) -> Self {
        Self {
            name: name.into(),
            mask,
            handles: HashSet::new(),
            in_session: AtomicBool::new(false),
            events: Mutex::new(Vec::new()),
        }
    }

    /// Builder: answer `true` for requests of `kind`.
    pub fn handling(mut self, kind: RequestKind) -> Self {
        self.handles.insert(kind);
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn set_in_session(&self, in_session: bool) {
        self.in_session.store(in_session, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<AdapterEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&AdapterEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    fn record(&self, event: AdapterEvent) {
        self.events.lock().push(event);
    }

    fn offer(&self, kind: RequestKind) -> bool {
        self.record(AdapterEvent::Offered(kind));
        self.handles.contains(&kind)
    }
}

impl LocAdapter for RecordingAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn event_mask(&self) -> EventMask {
        self.mask
    }

    fn is_in_session(&self) -> bool {
        self.in_session.load(Ordering::SeqCst)
    }

    fn report_position(&self, location: &Location) {
        self.record(AdapterEvent::Position(location.clone()));
    }

    fn report_sv(&self, _status: &SvStatus) {
        self.record(AdapterEvent::Sv);
    }

    fn report_status(&self, status: EngineStatus) {
        self.record(AdapterEvent::Status(status));
    }

    fn report_nmea(&self, _timestamp_ms: u64, sentence: &str) {
        self.record(AdapterEvent::Nmea(sentence.to_string()));
    }

    fn handle_engine_up(&self) {
        self.record(AdapterEvent::EngineUp);
    }

    fn handle_engine_down(&self) {
        self.record(AdapterEvent::EngineDown);
    }

    fn request_xtra_data(&self) -> bool {
        self.offer(RequestKind::XtraData)
    }

    fn request_time(&self) -> bool {
        self.offer(RequestKind::Time)
    }

    fn request_location(&self) -> bool {
        self.offer(RequestKind::Location)
    }

    fn request_atl(&self, handle: ConnHandle, agps_type: AgpsType) -> bool {
        let handled = self.offer(RequestKind::Atl);
        if handled {
            self.record(AdapterEvent::AtlRequested(handle, agps_type));
        }
        handled
    }

    fn release_atl(&self, handle: ConnHandle) -> bool {
        let handled = self.offer(RequestKind::Atl);
        if handled {
            self.record(AdapterEvent::AtlReleased(handle));
        }
        handled
    }

    fn request_supl_es(&self, _handle: ConnHandle) -> bool {
        self.offer(RequestKind::SuplEs)
    }

    fn request_ni_notify(
        &self,
        notification: &NiNotification,
        payload: &mut Option<NiPayload>,
    ) -> bool {
        if !self.offer(RequestKind::Ni) {
            return false;
        }
        let bytes = payload
            .take()
            .map(|p| p.as_bytes().to_vec())
            .unwrap_or_default();
        self.record(AdapterEvent::NiTaken(notification.id, bytes));
        true
    }
}
