//! Worker-owned engine state and the side-effect plumbing around it.

use crate::adapter::{AdapterKey, AdapterRegistry, MaskUpdate};
use crate::arbiter::{
    OpenOutcome, ResourceArbiter, ResourceServicer, RsrcNotice, Subscriber, SubscriberKind,
};
use crate::config::EngineConfig;
use crate::ni::NiSessionManager;
use crate::queue::{Command, Epoch, QueueHandle};
use crate::session::EngineAdapter;
use crate::transport::{DataCallError, FrameworkCallbacks, LocTransport};
use crate::types::{AgpsStatus, AgpsType, ConnHandle, ConnectionInfo, NiPayload, ResourceType};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Everything only the command-queue worker may touch.
pub struct EngineState {
    pub(crate) io: EngineIo,
    pub(crate) registry: AdapterRegistry,
    pub(crate) session: EngineAdapter,
    pub(crate) arbiter: ResourceArbiter,
    pub(crate) listener_key: Option<AdapterKey>,
}

/// Outbound seams, split from the mutable parts so both can be borrowed at
/// once.
pub(crate) struct EngineIo {
    pub(crate) config: Arc<EngineConfig>,
    pub(crate) transport: Arc<dyn LocTransport>,
    pub(crate) callbacks: Arc<dyn FrameworkCallbacks>,
    pub(crate) ni: Arc<NiSessionManager<NiPayload>>,
    /// Advanced on engine restart; delayed work from before is dropped.
    pub(crate) restart_epoch: Epoch,
}

impl EngineState {
    pub(crate) fn new(
        config: Arc<EngineConfig>,
        transport: Arc<dyn LocTransport>,
        callbacks: Arc<dyn FrameworkCallbacks>,
        ni: Arc<NiSessionManager<NiPayload>>,
    ) -> Self {
        Self {
            registry: AdapterRegistry::new(config.max_adapters, config.excluded_event_mask),
            session: EngineAdapter::new(),
            arbiter: ResourceArbiter::new(&config.agps),
            listener_key: None,
            io: EngineIo {
                config,
                transport,
                callbacks,
                ni,
                restart_epoch: Epoch::new(),
            },
        }
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub fn session(&self) -> &EngineAdapter {
        &self.session
    }

    pub fn arbiter(&self) -> &ResourceArbiter {
        &self.arbiter
    }
}

impl EngineIo {
    pub(crate) fn servicer<'a>(&'a self, queue: &'a QueueHandle<EngineState>) -> EngineServicer<'a> {
        EngineServicer { io: self, queue }
    }

    pub(crate) fn apply_mask_update(&self, update: MaskUpdate) {
        let result = match update {
            MaskUpdate::Open(mask) => {
                debug!(%mask, "opening transport");
                self.transport.open(mask)
            }
            MaskUpdate::Close => {
                debug!("closing transport");
                self.transport.close()
            }
        };
        if let Err(err) = result {
            warn!(?update, error = %err, "transport mask update failed");
        }
    }

    pub(crate) fn fail_atl_open(&self, handle: ConnHandle, agps_type: AgpsType) {
        if let Err(err) = self
            .transport
            .atl_open_status(handle, false, "", None, agps_type)
        {
            warn!(handle = handle.0, error = %err, "ATL open status failed");
        }
    }

    pub(crate) fn fail_atl_close(&self, handle: ConnHandle) {
        if let Err(err) = self.transport.atl_close_status(handle, false) {
            warn!(handle = handle.0, error = %err, "ATL close status failed");
        }
    }
}

/// Bearer type requested from the framework for each machine.
fn connection_type(resource: ResourceType) -> AgpsType {
    match resource {
        ResourceType::Cellular => AgpsType::Supl,
        ResourceType::LowBandwidth => AgpsType::WwanAny,
        ResourceType::Wifi => AgpsType::Wifi,
        ResourceType::DataCall => AgpsType::SuplEs,
    }
}

/// [`ResourceServicer`] over the transport, the framework and the queue.
pub(crate) struct EngineServicer<'a> {
    io: &'a EngineIo,
    queue: &'a QueueHandle<EngineState>,
}

impl ResourceServicer for EngineServicer<'_> {
    fn open(&mut self, resource: ResourceType) -> OpenOutcome {
        if resource == ResourceType::DataCall {
            return match self.io.transport.open_data_call() {
                Ok(()) => OpenOutcome::Issued,
                Err(DataCallError::Busy) => OpenOutcome::Busy,
                Err(err) => {
                    debug!(error = %err, "data call open refused");
                    OpenOutcome::Rejected
                }
            };
        }
        self.io
            .callbacks
            .agps_status(&AgpsStatus::RequestConnection(connection_type(resource)));
        OpenOutcome::Issued
    }

    fn close(&mut self, resource: ResourceType) {
        if resource == ResourceType::DataCall {
            if let Err(err) = self.io.transport.close_data_call() {
                warn!(error = %err, "data call close failed");
            }
            return;
        }
        self.io
            .callbacks
            .agps_status(&AgpsStatus::ReleaseConnection(connection_type(resource)));
    }

    fn notify(&mut self, subscriber: &Subscriber, notice: RsrcNotice, connection: &ConnectionInfo) {
        let handle = subscriber.handle();
        let transport = &self.io.transport;
        let result = match (subscriber.kind(), notice) {
            (SubscriberKind::DataCall, RsrcNotice::Denied) => {
                // Fall back to the ordinary cellular bearer.
                let command = Command::guarded(
                    format!("emergency SUPL fallback {}", handle.0),
                    self.io.restart_epoch.ticket(),
                    move |s: &mut EngineState, q| {
                        let mut svc = s.io.servicer(q);
                        if !s.arbiter.request_emergency_atl(handle, &mut svc) {
                            s.io.fail_atl_open(handle, AgpsType::SuplEs);
                        }
                    },
                );
                if let Err(err) = self.queue.enqueue(command) {
                    warn!(handle = handle.0, error = %err, "emergency fallback not queued");
                }
                Ok(())
            }
            (_, RsrcNotice::Granted) => transport.atl_open_status(
                handle,
                true,
                &connection.apn,
                connection.bearer,
                subscriber.agps_type(),
            ),
            (_, RsrcNotice::Denied) => {
                transport.atl_open_status(handle, false, "", None, subscriber.agps_type())
            }
            (_, RsrcNotice::Released | RsrcNotice::Unsubscribed) => {
                transport.atl_close_status(handle, true)
            }
        };
        if let Err(err) = result {
            warn!(handle = handle.0, ?notice, error = %err, "ATL status report failed");
        }
    }

    fn schedule_retry(&mut self, resource: ResourceType, cycle: u64, delay: Duration) {
        let command = Command::guarded(
            format!("retry {resource} open"),
            self.io.restart_epoch.ticket(),
            move |s: &mut EngineState, q| {
                let mut svc = s.io.servicer(q);
                s.arbiter.retry_open(resource, cycle, &mut svc);
            },
        );
        if let Err(err) = self.queue.enqueue_after(delay, command) {
            warn!(%resource, error = %err, "retry not scheduled");
        }
    }
}
