//! Engine façade.
//!
//! [`LocEngine`] wires the command queue, adapter registry, session façade,
//! resource arbiter, NI session manager and sync request bridge together.
//!
//! Host-facing operations and transport indications never touch engine state
//! directly; each one enqueues a command and returns. An indication is handled
//! by one command: the engine's own handling first, then the other adapters.
//! The exceptions are
//! [`LocEngine::ni_respond`] and the sync request calls, which go to their
//! own lock-protected components because the caller may have to block.
//!
//! ```rust,ignore
//! let engine = LocEngine::spawn(
//!     EngineConfig::default(),
//!     EventMask::POSITION | EventMask::STATUS,
//!     transport,
//!     callbacks,
//!     tokio::runtime::Handle::current(),
//! )?;
//! engine.set_position_mode(PositionMode::new(PositionModeKind::MsBased, Recurrence::Periodic))?;
//! engine.start()?;
//! ```

mod listener;
mod state;

pub use listener::EngineListener;
pub use state::EngineState;

use crate::adapter::{LocAdapter, MaskUpdate};
use crate::arbiter::{RsrcEvent, RsrcState};
use crate::config::EngineConfig;
use crate::error::{KernelError, KernelResult};
use crate::ni::{NiResponder, NiSessionManager};
use crate::queue::{Command, CommandQueue, QueueError, QueueHandle, QueueMetrics};
use crate::session::{FixSession, SessionPolicy};
use crate::sync_req::{SyncRequestBridge, SyncRequestError};
use crate::transport::{FrameworkCallbacks, LocTransport, RequestKind};
use crate::types::{
    AgpsType, AidingData, Bearer, ClientHandle, ConnHandle, ConnectionInfo, EngineStatus,
    EventMask, Location, NiNotification, NiPayload, NiResponse, PositionMode, ResourceType,
    ServerAddr, SvStatus,
};
use error_stack::{Report, ResultExt};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Capability bits reported to the framework at start-up.
pub mod capability {
    pub const SCHEDULING: u32 = 0x01;
    pub const MSB: u32 = 0x02;
    pub const MSA: u32 = 0x04;
}

/// Forwards NI prompts to the framework and answers to the modem.
struct NiForwarder {
    callbacks: Arc<dyn FrameworkCallbacks>,
    queue: OnceLock<QueueHandle<EngineState>>,
}

impl NiResponder<NiPayload> for NiForwarder {
    fn notify(&self, notification: &NiNotification) {
        self.callbacks.ni_notify(notification);
    }

    fn deliver(&self, id: u32, response: NiResponse, payload: NiPayload) {
        let Some(queue) = self.queue.get() else {
            warn!(id, "NI response before engine start, dropped");
            return;
        };
        let command = Command::new(format!("NI response {id}"), move |s: &mut EngineState, _| {
            if let Err(err) = s.io.transport.inform_ni_response(response, payload) {
                warn!(id, error = %err, "NI response not delivered");
            }
        });
        if let Err(err) = queue.enqueue(command) {
            warn!(id, error = %err, "NI response dropped");
        }
    }
}

pub struct LocEngine {
    queue: CommandQueue<EngineState>,
    handle: QueueHandle<EngineState>,
    ni: Arc<NiSessionManager<NiPayload>>,
    sync: Arc<SyncRequestBridge>,
    transport: Arc<dyn LocTransport>,
    listener: Arc<dyn LocAdapter>,
}

impl LocEngine {
    /// Starts the worker and registers the engine's own adapter with
    /// `event_mask`, which opens the transport.
    ///
    /// NI wait tasks run on `runtime`.
    pub fn spawn(
        config: EngineConfig,
        event_mask: EventMask,
        transport: Arc<dyn LocTransport>,
        callbacks: Arc<dyn FrameworkCallbacks>,
        runtime: tokio::runtime::Handle,
    ) -> KernelResult<Self> {
        config
            .validate()
            .map_err(KernelError::from)
            .map_err(Report::new)
            .attach("validating engine configuration")?;
        let config = Arc::new(config);

        let forwarder = Arc::new(NiForwarder {
            callbacks: Arc::clone(&callbacks),
            queue: OnceLock::new(),
        });
        let ni = Arc::new(NiSessionManager::new(
            config.ni.clone(),
            runtime.clone(),
            forwarder.clone(),
        ));

        let state = EngineState::new(
            Arc::clone(&config),
            Arc::clone(&transport),
            callbacks,
            Arc::clone(&ni),
        );
        let queue = CommandQueue::spawn(&config.queue.thread_name, state, runtime)
            .map_err(KernelError::from)
            .map_err(Report::new)
            .attach("spawning engine worker")?;
        let handle = queue.handle();
        let _ = forwarder.queue.set(handle.clone());

        let listener: Arc<dyn LocAdapter> = Arc::new(EngineListener::new(event_mask));

        let capabilities = if config.agps.supl_capable {
            capability::SCHEDULING | capability::MSB | capability::MSA
        } else {
            capability::SCHEDULING
        };
        let registered = Arc::clone(&listener);
        handle
            .enqueue(Command::new("register engine", move |s: &mut EngineState, _| {
                match s.registry.add(registered) {
                    Ok((key, update)) => {
                        s.listener_key = Some(key);
                        s.io.apply_mask_update(update);
                    }
                    Err(err) => warn!(error = %err, "engine adapter not registered"),
                }
                s.io.callbacks.capabilities(capabilities);
            }))
            .map_err(KernelError::from)
            .map_err(Report::new)
            .attach("registering engine adapter")?;

        info!(%event_mask, "location engine started");
        Ok(Self {
            queue,
            handle,
            ni,
            sync: Arc::new(SyncRequestBridge::new()),
            transport,
            listener,
        })
    }

    fn submit<F>(&self, description: &str, run: F) -> Result<(), QueueError>
    where
        F: FnOnce(&mut EngineState, &QueueHandle<EngineState>) + Send + 'static,
    {
        self.handle.enqueue(Command::new(description, run))
    }

    /// Applies the engine's own handling, then delivers to every adapter,
    /// all within one command.
    fn broadcast<E, F>(&self, description: &str, engine: E, deliver: F) -> Result<(), QueueError>
    where
        E: FnOnce(&mut EngineState) + Send + 'static,
        F: FnMut(&dyn LocAdapter) + Send + 'static,
    {
        self.submit(description, move |s, _| {
            if s.engine_registered() {
                engine(s);
            }
            s.registry.broadcast(deliver);
        })
    }

    /// First-handling dispatch. The engine takes the request if it services
    /// AGPS requests; otherwise the other adapters are offered it in order.
    /// The modem is told explicitly when nobody took it.
    fn offer<E, F>(
        &self,
        description: &str,
        kind: RequestKind,
        engine: E,
        offer: F,
    ) -> Result<(), QueueError>
    where
        E: FnOnce(&mut EngineState, &QueueHandle<EngineState>) + Send + 'static,
        F: FnMut(&dyn LocAdapter) -> bool + Send + 'static,
    {
        self.submit(description, move |s, q| {
            if s.engine_handles_requests() {
                engine(s, q);
            } else if !s.registry.first_handling(offer) {
                report_not_handled(s, kind);
            }
        })
    }

    // ------------------------------------------------------------------
    // Host operations
    // ------------------------------------------------------------------

    pub fn set_position_mode(&self, mode: PositionMode) -> Result<(), QueueError> {
        self.submit("set position mode", move |s, _| {
            if let Err(err) = s.session.set_position_mode(mode, &*s.io.transport) {
                warn!(error = %err, "set position mode failed");
            }
        })
    }

    pub fn start(&self) -> Result<(), QueueError> {
        self.submit("start fix", |s, _| {
            if let Err(err) = s.session.start_fix(&*s.io.transport) {
                warn!(error = %err, "start fix failed");
            }
        })
    }

    pub fn stop(&self) -> Result<(), QueueError> {
        self.submit("stop fix", |s, _| {
            if let Err(err) = s.session.stop_fix(&*s.io.transport) {
                warn!(error = %err, "stop fix failed");
            }
        })
    }

    pub fn delete_aiding_data(&self, data: AidingData) -> Result<(), QueueError> {
        self.submit("delete aiding data", move |s, _| {
            if let Err(err) = s.session.delete_aiding_data(data, &*s.io.transport) {
                warn!(error = %err, "delete aiding data failed");
            }
        })
    }

    pub fn set_server(&self, server: ServerAddr) -> Result<(), QueueError> {
        self.submit("set server", move |s, _| {
            if let Err(err) = s.io.transport.set_server(&server) {
                warn!(error = %err, "set server failed");
            }
        })
    }

    pub fn set_delegate(&self, policy: Arc<dyn SessionPolicy>) -> Result<(), QueueError> {
        self.submit("set delegate", move |s, _| s.session.set_delegate(policy))
    }

    /// Registers `adapter`; a follow-up command re-applies the aggregate mask.
    pub fn add_adapter(&self, adapter: Arc<dyn LocAdapter>) -> Result<(), QueueError> {
        self.submit("add adapter", move |s, q| match s.registry.add(adapter) {
            Ok((_, update)) => enqueue_mask_update(q, update),
            Err(err) => warn!(error = %err, "adapter not added"),
        })
    }

    /// Unregisters `adapter`; removing the last one shuts the transport.
    pub fn remove_adapter(&self, adapter: Arc<dyn LocAdapter>) -> Result<(), QueueError> {
        self.submit("remove adapter", move |s, q| {
            let Some(key) = s.registry.key_of(&adapter) else {
                debug!(adapter = adapter.name(), "adapter not registered");
                return;
            };
            if s.listener_key == Some(key) {
                s.listener_key = None;
            }
            if let Some(update) = s.registry.remove(key) {
                enqueue_mask_update(q, update);
            }
        })
    }

    /// Framework brought up the data connection for `agps_type`.
    pub fn agps_data_conn_open(
        &self,
        agps_type: AgpsType,
        apn: impl Into<String>,
        bearer: Option<Bearer>,
    ) -> Result<(), QueueError> {
        let connection = ConnectionInfo {
            apn: apn.into(),
            bearer,
        };
        self.submit("data connection open", move |s, q| {
            let mut svc = s.io.servicer(q);
            s.arbiter
                .on_granted(agps_type.resource(), connection, &mut svc);
        })
    }

    pub fn agps_data_conn_closed(&self, agps_type: AgpsType) -> Result<(), QueueError> {
        self.resource_event("data connection closed", agps_type.resource(), RsrcEvent::Released)
    }

    pub fn agps_data_conn_failed(&self, agps_type: AgpsType) -> Result<(), QueueError> {
        self.resource_event("data connection failed", agps_type.resource(), RsrcEvent::Denied)
    }

    fn resource_event(
        &self,
        description: &str,
        resource: ResourceType,
        event: RsrcEvent,
    ) -> Result<(), QueueError> {
        self.submit(description, move |s, q| {
            let mut svc = s.io.servicer(q);
            s.arbiter.on_event(resource, event, &mut svc);
        })
    }

    /// User answer to an NI prompt.
    pub fn ni_respond(&self, id: u32, response: NiResponse) -> bool {
        self.ni.respond(id, response)
    }

    // ------------------------------------------------------------------
    // Transport indications
    // ------------------------------------------------------------------

    pub fn report_position(&self, location: Location) -> Result<(), QueueError> {
        let own = location.clone();
        self.broadcast(
            "broadcast position",
            move |s| s.on_position(&own),
            move |a| a.report_position(&location),
        )
    }

    pub fn report_sv(&self, status: SvStatus) -> Result<(), QueueError> {
        let own = status.clone();
        self.broadcast(
            "broadcast sv",
            move |s| s.on_sv(&own),
            move |a| a.report_sv(&status),
        )
    }

    pub fn report_status(&self, status: EngineStatus) -> Result<(), QueueError> {
        self.broadcast(
            "broadcast status",
            move |s| s.on_status(status),
            move |a| a.report_status(status),
        )
    }

    pub fn report_nmea(&self, timestamp_ms: u64, sentence: String) -> Result<(), QueueError> {
        let own = sentence.clone();
        self.broadcast(
            "broadcast nmea",
            move |s| s.on_nmea(timestamp_ms, &own),
            move |a| a.report_nmea(timestamp_ms, &sentence),
        )
    }

    pub fn report_xtra_server(&self, servers: Vec<String>) -> Result<(), QueueError> {
        let own = servers.clone();
        self.offer(
            "report xtra servers",
            RequestKind::XtraData,
            move |s, _| s.on_xtra_servers(&own),
            move |a| a.report_xtra_server(&servers),
        )
    }

    pub fn request_xtra_data(&self) -> Result<(), QueueError> {
        self.offer(
            "request xtra data",
            RequestKind::XtraData,
            |s, _| s.on_xtra_data_request(),
            |a| a.request_xtra_data(),
        )
    }

    pub fn request_time(&self) -> Result<(), QueueError> {
        self.offer(
            "request time",
            RequestKind::Time,
            |s, _| s.on_time_request(),
            |a| a.request_time(),
        )
    }

    pub fn request_location(&self) -> Result<(), QueueError> {
        self.offer(
            "request location",
            RequestKind::Location,
            |s, _| s.on_location_request(),
            |a| a.request_location(),
        )
    }

    pub fn request_atl(&self, handle: ConnHandle, agps_type: AgpsType) -> Result<(), QueueError> {
        self.offer(
            "request ATL",
            RequestKind::Atl,
            move |s, q| s.on_request_atl(handle, agps_type, q),
            move |a| a.request_atl(handle, agps_type),
        )
    }

    pub fn release_atl(&self, handle: ConnHandle) -> Result<(), QueueError> {
        self.offer(
            "release ATL",
            RequestKind::Atl,
            move |s, q| s.on_release_atl(handle, q),
            move |a| a.release_atl(handle),
        )
    }

    pub fn request_supl_es(&self, handle: ConnHandle) -> Result<(), QueueError> {
        self.offer(
            "request SUPL ES",
            RequestKind::SuplEs,
            move |s, q| s.on_request_supl_es(handle, q),
            move |a| a.request_supl_es(handle),
        )
    }

    pub fn report_data_call_opened(&self) -> Result<(), QueueError> {
        self.offer(
            "data call opened",
            RequestKind::SuplEs,
            |s, q| s.on_data_call(RsrcEvent::Granted, q),
            |a| a.report_data_call_opened(),
        )
    }

    pub fn report_data_call_closed(&self) -> Result<(), QueueError> {
        self.offer(
            "data call closed",
            RequestKind::SuplEs,
            |s, q| s.on_data_call(RsrcEvent::Released, q),
            |a| a.report_data_call_closed(),
        )
    }

    /// Network-initiated prompt. The payload is dropped if nobody handles it.
    pub fn request_ni_notify(
        &self,
        notification: NiNotification,
        payload: NiPayload,
    ) -> Result<(), QueueError> {
        self.submit("request NI notify", move |s, _| {
            if s.engine_handles_requests() {
                s.on_ni_request(notification, payload);
                return;
            }
            let mut payload = Some(payload);
            if !s
                .registry
                .first_handling(|a| a.request_ni_notify(&notification, &mut payload))
            {
                report_not_handled(s, RequestKind::Ni);
            }
        })
    }

    /// Modem (re)started: reopen with the current mask and tell adapters.
    pub fn engine_up(&self) -> Result<(), QueueError> {
        self.submit("engine up", |s, _| {
            let transport = &s.io.transport;
            if let Err(err) = transport.close() {
                warn!(error = %err, "transport close before reopen failed");
            }
            if let Err(err) = transport.open(s.registry.evt_mask()) {
                warn!(error = %err, "transport reopen failed");
            }
            if s.engine_registered() {
                s.on_engine_up();
            }
            s.registry.broadcast(|a| a.handle_engine_up());
        })
    }

    pub fn engine_down(&self) -> Result<(), QueueError> {
        self.broadcast(
            "broadcast engine down",
            |s| s.on_engine_down(),
            |a| a.handle_engine_down(),
        )
    }

    // ------------------------------------------------------------------
    // Sync requests
    // ------------------------------------------------------------------

    /// Sends a request and blocks the caller for its indication.
    pub fn send_sync_request(
        &self,
        client: ClientHandle,
        request_id: u32,
        payload: &[u8],
        timeout: Duration,
        indication_id: u32,
    ) -> Result<Vec<u8>, SyncRequestError> {
        self.sync.send_and_wait(
            &*self.transport,
            client,
            request_id,
            payload,
            timeout,
            indication_id,
        )
    }

    /// Asynchronous indication from the modem.
    pub fn on_indication(&self, client: ClientHandle, indication_id: u32, payload: &[u8]) -> bool {
        self.sync.on_indication_arrived(client, indication_id, payload)
    }

    /// Shared bridge, for indication threads that outlive a borrow.
    pub fn sync_requests(&self) -> Arc<SyncRequestBridge> {
        Arc::clone(&self.sync)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Blocks until queued commands ran, then reads the aggregate mask.
    pub fn evt_mask(&self) -> Result<EventMask, QueueError> {
        self.handle.query(|s| s.registry.evt_mask())
    }

    pub fn fix_session(&self) -> Result<FixSession, QueueError> {
        self.handle.query(|s| s.session.session())
    }

    pub fn resource_state(&self, resource: ResourceType) -> Result<Option<RsrcState>, QueueError> {
        self.handle.query(move |s| s.arbiter.state(resource))
    }

    pub fn adapter_count(&self) -> Result<usize, QueueError> {
        self.handle.query(|s| s.registry.len())
    }

    pub fn flush(&self) -> Result<(), QueueError> {
        self.handle.flush()
    }

    pub fn metrics(&self) -> QueueMetrics {
        self.handle.metrics()
    }

    pub fn ni_sessions(&self) -> &NiSessionManager<NiPayload> {
        &self.ni
    }

    /// Unregisters the engine adapter, drops outstanding NI sessions and
    /// stops the worker.
    pub fn shutdown(self) -> KernelResult<()> {
        let listener = Arc::clone(&self.listener);
        self.handle
            .query(move |s| {
                if let Some(update) = s.registry.remove_adapter(&listener) {
                    s.io.apply_mask_update(update);
                }
                s.listener_key = None;
            })
            .map_err(KernelError::from)
            .map_err(Report::new)
            .attach("unregistering engine adapter")?;
        self.ni.reset_on_engine_restart();
        self.queue
            .shutdown()
            .map_err(KernelError::from)
            .map_err(Report::new)
            .attach("stopping engine worker")?;
        info!("location engine stopped");
        Ok(())
    }
}

fn report_not_handled(s: &EngineState, kind: RequestKind) {
    warn!(?kind, "request not handled by any adapter");
    if let Err(err) = s.io.transport.request_not_handled(kind) {
        warn!(?kind, error = %err, "not-handled status failed");
    }
}

fn enqueue_mask_update(queue: &QueueHandle<EngineState>, update: MaskUpdate) {
    let description = match update {
        MaskUpdate::Open(mask) => format!("update event mask {mask}"),
        MaskUpdate::Close => "close transport".to_string(),
    };
    let command = Command::new(description, move |s: &mut EngineState, _| {
        s.io.apply_mask_update(update)
    });
    if let Err(err) = queue.enqueue(command) {
        warn!(?update, error = %err, "mask update dropped");
    }
}

#[cfg(test)]
mod tests;
