//! Domain value types shared across the kernel.
//!
//! These are plain data carried between the transport, the adapters and the
//! hosting framework. None of them own engine state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::time::Duration;

// ----------------------------------------------------------------------------
// Event mask
// ----------------------------------------------------------------------------

/// Capability bits an adapter subscribes to on the modem transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventMask(pub u64);

impl EventMask {
    pub const NONE: EventMask = EventMask(0);
    pub const POSITION: EventMask = EventMask(1 << 0);
    pub const SATELLITE: EventMask = EventMask(1 << 1);
    pub const STATUS: EventMask = EventMask(1 << 2);
    pub const NMEA: EventMask = EventMask(1 << 3);
    pub const AGPS_REQUEST: EventMask = EventMask(1 << 4);
    pub const XTRA_REQUEST: EventMask = EventMask(1 << 5);
    pub const TIME_REQUEST: EventMask = EventMask(1 << 6);
    pub const LOCATION_REQUEST: EventMask = EventMask(1 << 7);
    pub const NI_REQUEST: EventMask = EventMask(1 << 8);
    pub const ENGINE_STATE: EventMask = EventMask(1 << 9);

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: EventMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// Clears every bit set in `other`.
    pub const fn without(self, other: EventMask) -> EventMask {
        EventMask(self.0 & !other.0)
    }
}

impl BitOr for EventMask {
    type Output = EventMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        EventMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Fix session
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionModeKind {
    Standalone,
    MsBased,
    MsAssisted,
    /// No mode has been set since the last session ended.
    #[default]
    Invalid,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recurrence {
    #[default]
    Periodic,
    Single,
}

/// Fix criteria handed to the transport when a session starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionMode {
    pub mode: PositionModeKind,
    pub recurrence: Recurrence,
    pub min_interval: Duration,
    pub preferred_accuracy_m: u32,
    pub preferred_time: Duration,
}

impl PositionMode {
    pub fn new(mode: PositionModeKind, recurrence: Recurrence) -> Self {
        Self {
            mode,
            recurrence,
            ..Self::default()
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn invalid() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.mode != PositionModeKind::Invalid
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_m: Option<f64>,
    pub accuracy_m: Option<f32>,
    pub speed_mps: Option<f32>,
    pub bearing_deg: Option<f32>,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SvInfo {
    pub prn: u16,
    pub snr: f32,
    pub elevation: f32,
    pub azimuth: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SvStatus {
    pub svs: Vec<SvInfo>,
    pub used_in_fix_mask: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineStatus {
    #[default]
    None,
    SessionBegin,
    SessionEnd,
    EngineOn,
    EngineOff,
}

/// Aiding data categories to wipe, as a raw bit mask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AidingData(pub u32);

impl AidingData {
    pub const EPHEMERIS: AidingData = AidingData(1 << 0);
    pub const ALMANAC: AidingData = AidingData(1 << 1);
    pub const POSITION: AidingData = AidingData(1 << 2);
    pub const TIME: AidingData = AidingData(1 << 3);
    pub const ALL: AidingData = AidingData(u32::MAX);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for AidingData {
    type Output = AidingData;

    fn bitor(self, rhs: Self) -> Self::Output {
        AidingData(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerAddr {
    Url(String),
    Ipv4 { addr: std::net::Ipv4Addr, port: u16 },
}

// ----------------------------------------------------------------------------
// AGPS
// ----------------------------------------------------------------------------

/// Kind of data connection a request is for, as reported by the modem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgpsType {
    Supl,
    C2k,
    WwanAny,
    Wifi,
    SuplEs,
    /// Legacy requests that do not name a type.
    Invalid,
}

/// Shared bearer that a [`crate::arbiter::ResourceStateMachine`] arbitrates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceType {
    /// Cellular bearer used for SUPL/C2K assistance.
    Cellular,
    /// Any-WWAN channel used for small downloads such as XTRA.
    LowBandwidth,
    Wifi,
    /// Dedicated emergency data call.
    DataCall,
}

impl ResourceType {
    pub const ALL: [ResourceType; 4] = [
        ResourceType::Cellular,
        ResourceType::LowBandwidth,
        ResourceType::Wifi,
        ResourceType::DataCall,
    ];
}

impl AgpsType {
    pub fn resource(self) -> ResourceType {
        match self {
            AgpsType::Supl | AgpsType::C2k | AgpsType::Invalid => ResourceType::Cellular,
            AgpsType::WwanAny => ResourceType::LowBandwidth,
            AgpsType::Wifi => ResourceType::Wifi,
            AgpsType::SuplEs => ResourceType::DataCall,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceType::Cellular => "cellular",
            ResourceType::LowBandwidth => "low-bandwidth",
            ResourceType::Wifi => "wifi",
            ResourceType::DataCall => "data-call",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bearer {
    Ipv4,
    Ipv6,
    Ipv4v6,
}

/// Connection handle the modem uses to correlate ATL open/close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnHandle(pub i32);

/// Modem client the sync request bridge correlates indications for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientHandle(pub u64);

/// Data connection request raised towards the hosting framework.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgpsStatus {
    RequestConnection(AgpsType),
    ReleaseConnection(AgpsType),
}

/// Granted connection parameters reported back by the framework.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub apn: String,
    pub bearer: Option<Bearer>,
}

// ----------------------------------------------------------------------------
// Network-initiated requests
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NiType {
    Voice,
    UmtsSuplInit,
    UmtsCtrlPlane,
    EmergencySupl,
}

/// Which of the two NI slots a request occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NiClass {
    Normal,
    Emergency,
}

impl NiType {
    pub fn class(self) -> NiClass {
        match self {
            NiType::EmergencySupl => NiClass::Emergency,
            _ => NiClass::Normal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NiResponse {
    Accept,
    Deny,
    NoResponse,
    /// Resolves a session silently, without telling the modem.
    Ignore,
}

/// Prompt data handed to the framework for a network-initiated request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NiNotification {
    /// Assigned by the session manager when the request is accepted.
    pub id: u32,
    pub ni_type: NiType,
    /// Modem-suggested response window. Zero means "use the default".
    pub timeout_hint: Duration,
    pub default_response: NiResponse,
    pub requestor: String,
    pub text: String,
}

impl NiNotification {
    pub fn new(ni_type: NiType) -> Self {
        Self {
            id: 0,
            ni_type,
            timeout_hint: Duration::ZERO,
            default_response: NiResponse::NoResponse,
            requestor: String::new(),
            text: String::new(),
        }
    }

    pub fn with_timeout_hint(mut self, hint: Duration) -> Self {
        self.timeout_hint = hint;
        self
    }

    pub fn with_text(mut self, requestor: impl Into<String>, text: impl Into<String>) -> Self {
        self.requestor = requestor.into();
        self.text = text.into();
        self
    }
}

/// Opaque modem payload that must be echoed back with the NI response.
///
/// Move-only: whichever path consumes it drops it exactly once.
#[derive(Debug, PartialEq, Eq)]
pub struct NiPayload(Box<[u8]>);

impl NiPayload {
    pub fn new(bytes: impl Into<Box<[u8]>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}
