//! Reference-counted state machine for one shared bearer.

use super::{OpenOutcome, ResourceServicer, RsrcEvent, RsrcNotice, Subscriber};
use crate::types::{ConnHandle, ConnectionInfo, ResourceType};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RsrcState {
    Idle,
    Pending,
    Granted,
    Releasing,
}

impl fmt::Display for RsrcState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RsrcState::Idle => "IDLE",
            RsrcState::Pending => "PENDING",
            RsrcState::Granted => "GRANTED",
            RsrcState::Releasing => "RELEASING",
        };
        f.write_str(name)
    }
}

/// Bounded re-open policy for bearers whose open can come back busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

#[derive(Debug)]
pub struct ResourceStateMachine {
    resource: ResourceType,
    state: RsrcState,
    subscribers: Vec<Subscriber>,
    single_subscriber: bool,
    retry: Option<RetryPolicy>,
    retries: u32,
    /// Bumped on every entry into PENDING; retries from older periods are
    /// dropped.
    pending_cycle: u64,
    connection: ConnectionInfo,
}

impl ResourceStateMachine {
    pub fn new(resource: ResourceType) -> Self {
        Self {
            resource,
            state: RsrcState::Idle,
            subscribers: Vec::new(),
            single_subscriber: false,
            retry: None,
            retries: 0,
            pending_cycle: 0,
            connection: ConnectionInfo::default(),
        }
    }

    /// Denies any subscriber beyond the first.
    pub fn with_single_subscriber(mut self) -> Self {
        self.single_subscriber = true;
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn resource(&self) -> ResourceType {
        self.resource
    }

    pub fn state(&self) -> RsrcState {
        self.state
    }

    pub fn subscribers(&self) -> &[Subscriber] {
        &self.subscribers
    }

    pub fn has_subscriber(&self, handle: ConnHandle) -> bool {
        self.subscribers.iter().any(|s| s.handle() == handle)
    }

    /// Current PENDING period, as passed to [`ResourceServicer::schedule_retry`].
    pub fn pending_cycle(&self) -> u64 {
        self.pending_cycle
    }

    pub fn connection(&self) -> &ConnectionInfo {
        &self.connection
    }

    /// Connection parameters handed to subscribers on the next GRANTED.
    pub fn set_connection(&mut self, connection: ConnectionInfo) {
        self.connection = connection;
    }

    fn has_active_subscribers(&self) -> bool {
        self.subscribers.iter().any(|s| !s.is_inactive())
    }

    fn transition(&mut self, next: RsrcState, cause: &str) {
        if next == RsrcState::Pending && self.state != RsrcState::Pending {
            self.pending_cycle += 1;
        }
        if self.state != next {
            debug!(
                resource = %self.resource,
                from = %self.state,
                to = %next,
                cause,
                "resource state change"
            );
        }
        self.state = next;
    }

    // ------------------------------------------------------------------
    // Subscriber operations
    // ------------------------------------------------------------------

    pub fn subscribe(&mut self, subscriber: Subscriber, svc: &mut dyn ResourceServicer) {
        if self.single_subscriber && !self.subscribers.is_empty() {
            warn!(resource = %self.resource, handle = subscriber.handle().0, "bearer already taken");
            svc.notify(&subscriber, RsrcNotice::Denied, &self.connection);
            return;
        }

        match self.state {
            RsrcState::Idle => {
                self.subscribers.push(subscriber);
                self.transition(RsrcState::Pending, "subscribe");
                self.retries = 0;
                self.issue_open(svc);
            }
            RsrcState::Pending | RsrcState::Releasing => {
                self.subscribers.push(subscriber);
            }
            RsrcState::Granted => {
                svc.notify(&subscriber, RsrcNotice::Granted, &self.connection);
                self.subscribers.push(subscriber);
            }
        }
    }

    /// Removes the subscriber with `handle`. Returns `false` if unknown.
    pub fn unsubscribe(&mut self, handle: ConnHandle, svc: &mut dyn ResourceServicer) -> bool {
        let Some(index) = self.subscribers.iter().position(|s| s.handle() == handle) else {
            return false;
        };

        if self.subscribers[index].waits_for_close() {
            self.subscribers[index].set_inactive();
        } else {
            let subscriber = self.subscribers.remove(index);
            svc.notify(&subscriber, RsrcNotice::Unsubscribed, &self.connection);
        }

        match self.state {
            RsrcState::Pending if self.subscribers.is_empty() => {
                self.transition(RsrcState::Idle, "last unsubscribe");
                svc.close(self.resource);
            }
            RsrcState::Pending | RsrcState::Granted if !self.has_active_subscribers() => {
                self.transition(RsrcState::Releasing, "no active subscribers");
                svc.close(self.resource);
            }
            _ => {}
        }
        true
    }

    /// Denies and removes every ordinary subscriber so an emergency request
    /// can take the bearer, releasing it if nobody is left.
    pub fn evict_ordinary(&mut self, svc: &mut dyn ResourceServicer) -> usize {
        let (evicted, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.subscribers)
            .into_iter()
            .partition(|s| !s.is_emergency());
        self.subscribers = kept;

        for subscriber in &evicted {
            svc.notify(subscriber, RsrcNotice::Denied, &self.connection);
        }
        if !evicted.is_empty() {
            warn!(resource = %self.resource, evicted = evicted.len(), "ordinary subscribers yield to emergency request");
        }

        if !evicted.is_empty() && self.subscribers.is_empty() {
            match self.state {
                RsrcState::Pending | RsrcState::Granted => {
                    self.transition(RsrcState::Releasing, "emergency eviction");
                    svc.close(self.resource);
                }
                _ => {}
            }
        }
        evicted.len()
    }

    /// Clears everything without a close call, for use after the transport
    /// died and the close would fail anyway.
    pub fn drop_all_subscribers(&mut self) {
        self.subscribers.clear();
        self.retries = 0;
        self.transition(RsrcState::Idle, "drop all");
    }

    // ------------------------------------------------------------------
    // Resource events
    // ------------------------------------------------------------------

    pub fn on_event(&mut self, event: RsrcEvent, svc: &mut dyn ResourceServicer) {
        match (event, self.state) {
            (RsrcEvent::Granted, RsrcState::Pending | RsrcState::Granted) => {
                self.transition(RsrcState::Granted, "granted");
                self.retries = 0;
                for subscriber in self.subscribers.iter().filter(|s| !s.is_inactive()) {
                    svc.notify(subscriber, RsrcNotice::Granted, &self.connection);
                }
            }
            (RsrcEvent::Granted, state) => {
                warn!(resource = %self.resource, %state, "stray GRANTED ignored");
            }

            (RsrcEvent::Denied, _) => self.deny_all(svc),

            (RsrcEvent::Released, RsrcState::Releasing) => {
                let (inactive, active): (Vec<_>, Vec<_>) = std::mem::take(&mut self.subscribers)
                    .into_iter()
                    .partition(Subscriber::is_inactive);
                for subscriber in &inactive {
                    svc.notify(subscriber, RsrcNotice::Released, &self.connection);
                }
                self.subscribers = active;

                if self.subscribers.is_empty() {
                    self.transition(RsrcState::Idle, "released");
                } else {
                    self.transition(RsrcState::Pending, "released with waiting subscribers");
                    self.retries = 0;
                    self.issue_open(svc);
                }
            }
            (RsrcEvent::Released, RsrcState::Granted) => {
                // Bearer went away underneath us.
                for subscriber in &self.subscribers {
                    svc.notify(subscriber, RsrcNotice::Released, &self.connection);
                }
                self.subscribers.clear();
                self.transition(RsrcState::Idle, "forced release");
            }
            (RsrcEvent::Released, RsrcState::Pending) if self.resource == ResourceType::DataCall => {
                self.deny_all(svc);
            }
            (RsrcEvent::Released, state) => {
                debug!(resource = %self.resource, %state, "RELEASED ignored");
            }
        }
    }

    /// Re-attempts a busy open scheduled during PENDING period `cycle`.
    ///
    /// Does nothing unless the machine is still in that same period.
    pub fn retry_open(&mut self, cycle: u64, svc: &mut dyn ResourceServicer) {
        if self.state != RsrcState::Pending {
            debug!(resource = %self.resource, state = %self.state, "retry no longer needed");
            return;
        }
        if cycle != self.pending_cycle {
            debug!(
                resource = %self.resource,
                cycle,
                current = self.pending_cycle,
                "retry from an earlier request dropped"
            );
            return;
        }
        self.issue_open(svc);
    }

    fn issue_open(&mut self, svc: &mut dyn ResourceServicer) {
        match svc.open(self.resource) {
            OpenOutcome::Issued => {}
            OpenOutcome::Busy => match self.retry {
                Some(policy) if self.retries < policy.max_retries => {
                    self.retries += 1;
                    debug!(resource = %self.resource, attempt = self.retries, "open busy, retrying");
                    svc.schedule_retry(self.resource, self.pending_cycle, policy.delay);
                }
                _ => {
                    warn!(resource = %self.resource, retries = self.retries, "open busy, giving up");
                    self.deny_all(svc);
                }
            },
            OpenOutcome::Rejected => {
                warn!(resource = %self.resource, "open rejected");
                self.deny_all(svc);
            }
        }
    }

    fn deny_all(&mut self, svc: &mut dyn ResourceServicer) {
        for subscriber in &self.subscribers {
            svc.notify(subscriber, RsrcNotice::Denied, &self.connection);
        }
        self.subscribers.clear();
        self.retries = 0;
        self.transition(RsrcState::Idle, "denied");
    }
}
