//! Arbitration of on-demand data connections.
//!
//! One [`ResourceStateMachine`] per [`ResourceType`] tracks which subscribers
//! want the bearer. Side effects (opening/closing the bearer, telling a
//! subscriber what happened, scheduling a retry) go through a
//! [`ResourceServicer`], which the engine implements on top of the transport,
//! the framework callbacks and the command queue.

mod machine;

pub use machine::{ResourceStateMachine, RetryPolicy, RsrcState};

use crate::config::AgpsConfig;
use crate::types::{AgpsType, ConnHandle, ConnectionInfo, ResourceType};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Event reported for a bearer by whoever owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsrcEvent {
    Granted,
    Denied,
    Released,
}

/// What a subscriber is told.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsrcNotice {
    Granted,
    Denied,
    Released,
    Unsubscribed,
}

/// Result of asking for a bearer to be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// The request is out; GRANTED/DENIED follows asynchronously.
    Issued,
    /// Try again later.
    Busy,
    Rejected,
}

pub trait ResourceServicer {
    fn open(&mut self, resource: ResourceType) -> OpenOutcome;
    fn close(&mut self, resource: ResourceType);
    fn notify(&mut self, subscriber: &Subscriber, notice: RsrcNotice, connection: &ConnectionInfo);
    /// Calls back [`ResourceArbiter::retry_open`] with `cycle` after `delay`.
    fn schedule_retry(&mut self, resource: ResourceType, cycle: u64, delay: Duration);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberKind {
    /// Modem ATL connection of the given type.
    Atl(AgpsType),
    /// WiFi ATL; stays listed until the close completes.
    Wifi,
    /// Emergency SUPL over the dedicated data call.
    DataCall,
    /// Emergency SUPL carried on the ordinary cellular bearer.
    EmergencyAtl,
}

/// A party interested in a bearer, scoped to the request that created it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscriber {
    handle: ConnHandle,
    kind: SubscriberKind,
    resource: ResourceType,
    inactive: bool,
}

impl Subscriber {
    pub fn new(handle: ConnHandle, kind: SubscriberKind) -> Self {
        let resource = match kind {
            SubscriberKind::Atl(agps_type) => agps_type.resource(),
            SubscriberKind::Wifi => ResourceType::Wifi,
            SubscriberKind::DataCall => ResourceType::DataCall,
            SubscriberKind::EmergencyAtl => ResourceType::Cellular,
        };
        Self {
            handle,
            kind,
            resource,
            inactive: false,
        }
    }

    pub fn handle(&self) -> ConnHandle {
        self.handle
    }

    pub fn kind(&self) -> SubscriberKind {
        self.kind
    }

    /// Machine this subscriber belongs to.
    pub fn resource(&self) -> ResourceType {
        self.resource
    }

    /// Type reported back to the modem in ATL status calls.
    pub fn agps_type(&self) -> AgpsType {
        match self.kind {
            SubscriberKind::Atl(agps_type) => agps_type,
            SubscriberKind::Wifi => AgpsType::Wifi,
            SubscriberKind::DataCall => AgpsType::SuplEs,
            SubscriberKind::EmergencyAtl => AgpsType::Supl,
        }
    }

    pub fn is_emergency(&self) -> bool {
        matches!(
            self.kind,
            SubscriberKind::DataCall | SubscriberKind::EmergencyAtl | SubscriberKind::Atl(AgpsType::SuplEs)
        )
    }

    pub fn waits_for_close(&self) -> bool {
        self.kind == SubscriberKind::Wifi
    }

    pub fn is_inactive(&self) -> bool {
        self.inactive
    }

    fn set_inactive(&mut self) {
        self.inactive = true;
    }
}

/// All bearer state machines of the engine.
#[derive(Debug)]
pub struct ResourceArbiter {
    machines: BTreeMap<ResourceType, ResourceStateMachine>,
}

impl ResourceArbiter {
    /// Machines this device supports, per `config`.
    pub fn new(config: &AgpsConfig) -> Self {
        let mut machines = BTreeMap::new();
        if config.supl_capable {
            machines.insert(
                ResourceType::Cellular,
                ResourceStateMachine::new(ResourceType::Cellular),
            );
        }
        machines.insert(
            ResourceType::LowBandwidth,
            ResourceStateMachine::new(ResourceType::LowBandwidth),
        );
        machines.insert(
            ResourceType::Wifi,
            ResourceStateMachine::new(ResourceType::Wifi).with_single_subscriber(),
        );
        if config.use_emergency_data_call {
            machines.insert(
                ResourceType::DataCall,
                ResourceStateMachine::new(ResourceType::DataCall).with_retry(RetryPolicy {
                    max_retries: config.data_call_max_retries,
                    delay: config.data_call_retry_delay(),
                }),
            );
        }
        Self { machines }
    }

    pub fn machine(&self, resource: ResourceType) -> Option<&ResourceStateMachine> {
        self.machines.get(&resource)
    }

    pub fn machine_mut(&mut self, resource: ResourceType) -> Option<&mut ResourceStateMachine> {
        self.machines.get_mut(&resource)
    }

    pub fn state(&self, resource: ResourceType) -> Option<RsrcState> {
        self.machine(resource).map(ResourceStateMachine::state)
    }

    /// Subscribes to the machine the subscriber belongs to.
    ///
    /// Returns `false` if this device has no such machine.
    pub fn subscribe(&mut self, subscriber: Subscriber, svc: &mut dyn ResourceServicer) -> bool {
        let Some(machine) = self.machines.get_mut(&subscriber.resource()) else {
            warn!(resource = %subscriber.resource(), "no state machine for resource");
            return false;
        };
        machine.subscribe(subscriber, svc);
        true
    }

    /// Ordinary ATL open request from the modem.
    pub fn request_atl(
        &mut self,
        handle: ConnHandle,
        agps_type: AgpsType,
        svc: &mut dyn ResourceServicer,
    ) -> bool {
        match agps_type {
            AgpsType::SuplEs => self.request_supl_es(handle, svc),
            AgpsType::Wifi => self.subscribe(Subscriber::new(handle, SubscriberKind::Wifi), svc),
            _ => self.subscribe(Subscriber::new(handle, SubscriberKind::Atl(agps_type)), svc),
        }
    }

    /// Emergency SUPL request: dedicated data call if available, otherwise
    /// the cellular bearer with ordinary users evicted.
    pub fn request_supl_es(&mut self, handle: ConnHandle, svc: &mut dyn ResourceServicer) -> bool {
        if self.machines.contains_key(&ResourceType::DataCall) {
            debug!(handle = handle.0, "emergency SUPL over dedicated data call");
            return self.subscribe(Subscriber::new(handle, SubscriberKind::DataCall), svc);
        }
        self.request_emergency_atl(handle, svc)
    }

    /// Emergency SUPL on the cellular bearer; also the fallback once a data
    /// call was denied.
    pub fn request_emergency_atl(
        &mut self,
        handle: ConnHandle,
        svc: &mut dyn ResourceServicer,
    ) -> bool {
        let Some(cellular) = self.machines.get_mut(&ResourceType::Cellular) else {
            warn!(handle = handle.0, "no bearer for emergency SUPL");
            return false;
        };
        cellular.evict_ordinary(svc);
        cellular.subscribe(Subscriber::new(handle, SubscriberKind::EmergencyAtl), svc);
        true
    }

    /// Releases `handle` from whichever machine holds it.
    ///
    /// Returns `false` if no machine knew the handle.
    pub fn release_atl(&mut self, handle: ConnHandle, svc: &mut dyn ResourceServicer) -> bool {
        const SEARCH_ORDER: [ResourceType; 4] = [
            ResourceType::Cellular,
            ResourceType::LowBandwidth,
            ResourceType::DataCall,
            ResourceType::Wifi,
        ];
        for resource in SEARCH_ORDER {
            if let Some(machine) = self.machines.get_mut(&resource) {
                if machine.unsubscribe(handle, svc) {
                    return true;
                }
            }
        }
        warn!(handle = handle.0, "release for unknown ATL handle");
        false
    }

    pub fn on_event(
        &mut self,
        resource: ResourceType,
        event: RsrcEvent,
        svc: &mut dyn ResourceServicer,
    ) {
        match self.machines.get_mut(&resource) {
            Some(machine) => machine.on_event(event, svc),
            None => warn!(%resource, ?event, "event for unsupported resource"),
        }
    }

    /// Bearer granted with the given parameters.
    pub fn on_granted(
        &mut self,
        resource: ResourceType,
        connection: ConnectionInfo,
        svc: &mut dyn ResourceServicer,
    ) {
        if let Some(machine) = self.machines.get_mut(&resource) {
            machine.set_connection(connection);
        }
        self.on_event(resource, RsrcEvent::Granted, svc);
    }

    pub fn retry_open(
        &mut self,
        resource: ResourceType,
        cycle: u64,
        svc: &mut dyn ResourceServicer,
    ) {
        if let Some(machine) = self.machines.get_mut(&resource) {
            machine.retry_open(cycle, svc);
        }
    }

    pub fn drop_all_subscribers(&mut self, resource: ResourceType) {
        if let Some(machine) = self.machines.get_mut(&resource) {
            machine.drop_all_subscribers();
        }
    }
}
