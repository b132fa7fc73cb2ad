//! Network-initiated authorization sessions.
//!
//! Two independent slots, one for ordinary and one for emergency requests,
//! each hold at most one outstanding session. Every accepted request gets a
//! wait task on the tokio runtime that resolves on whichever comes first: a
//! user response, the no-response deadline, or an engine restart.
//!
//! The opaque modem payload is owned by the session and moves out exactly
//! once: into [`NiResponder::deliver`], or dropped when the session is
//! ignored, rejected or reset.

use crate::config::NiConfig;
use crate::types::{NiClass, NiNotification, NiResponse};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Receives the prompt and the final answer of each session.
pub trait NiResponder<P>: Send + Sync + 'static {
    /// Raised once per accepted request.
    fn notify(&self, notification: &NiNotification);

    /// Final answer with ownership of the payload. Never called for
    /// [`NiResponse::Ignore`] or after a reset.
    fn deliver(&self, id: u32, response: NiResponse, payload: P);
}

enum Wake {
    Respond(NiResponse),
    Reset,
}

struct Outstanding<P> {
    id: u32,
    payload: P,
    wake: Option<oneshot::Sender<Wake>>,
}

struct Slot<P> {
    class: NiClass,
    outstanding: Mutex<Option<Outstanding<P>>>,
}

impl<P> Slot<P> {
    fn new(class: NiClass) -> Arc<Self> {
        Arc::new(Self {
            class,
            outstanding: Mutex::new(None),
        })
    }

    /// Signals the wait task of session `id` (any session if `None`).
    fn signal(&self, id: Option<u32>, response: NiResponse) -> bool {
        let mut guard = self.outstanding.lock();
        let Some(session) = guard.as_mut() else {
            return false;
        };
        if id.is_some_and(|id| id != session.id) {
            return false;
        }
        match session.wake.take() {
            Some(tx) => {
                let _ = tx.send(Wake::Respond(response));
                true
            }
            // Already answered; the wait task is finishing up.
            None => false,
        }
    }
}

pub struct NiSessionManager<P: Send + 'static> {
    normal: Arc<Slot<P>>,
    emergency: Arc<Slot<P>>,
    counter: AtomicU32,
    config: NiConfig,
    runtime: Handle,
    responder: Arc<dyn NiResponder<P>>,
}

impl<P: Send + 'static> NiSessionManager<P> {
    pub fn new(config: NiConfig, runtime: Handle, responder: Arc<dyn NiResponder<P>>) -> Self {
        Self {
            normal: Slot::new(NiClass::Normal),
            emergency: Slot::new(NiClass::Emergency),
            counter: AtomicU32::new(0),
            config,
            runtime,
            responder,
        }
    }

    fn slot(&self, class: NiClass) -> &Arc<Slot<P>> {
        match class {
            NiClass::Normal => &self.normal,
            NiClass::Emergency => &self.emergency,
        }
    }

    /// Starts a session for `notification`.
    ///
    /// Returns the assigned request id, or `None` if the slot is busy, in
    /// which case `payload` is dropped and no prompt is raised. An ordinary
    /// request is also refused while an emergency session is outstanding.
    pub fn request(&self, mut notification: NiNotification, payload: P) -> Option<u32> {
        let class = notification.ni_type.class();

        let emergency = self.emergency.outstanding.lock();
        if class == NiClass::Normal && emergency.is_some() {
            warn!(ni_type = ?notification.ni_type, "emergency NI session outstanding, dropping request");
            return None;
        }
        let mut outstanding = match class {
            NiClass::Emergency => emergency,
            NiClass::Normal => {
                drop(emergency);
                self.normal.outstanding.lock()
            }
        };
        if let Some(current) = outstanding.as_ref() {
            warn!(?class, current = current.id, "NI session already outstanding, dropping request");
            return None;
        }

        let id = self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        notification.id = id;
        let (tx, rx) = oneshot::channel();
        *outstanding = Some(Outstanding {
            id,
            payload,
            wake: Some(tx),
        });
        drop(outstanding);

        let budget = notification
            .timeout_hint
            .max(self.config.default_no_response_timeout())
            .saturating_add(self.config.grace_period());
        debug!(id, ?class, ?budget, "NI session started");

        self.runtime.spawn(await_response(
            Arc::clone(self.slot(class)),
            id,
            rx,
            budget,
            Arc::clone(&self.responder),
        ));
        self.responder.notify(&notification);
        Some(id)
    }

    /// Answers session `id`. Returns `false` if no such session is waiting.
    ///
    /// Accepting the emergency session silently resolves any ordinary session
    /// with [`NiResponse::Ignore`].
    pub fn respond(&self, id: u32, response: NiResponse) -> bool {
        if self.emergency.signal(Some(id), response) {
            if response == NiResponse::Accept && self.normal.signal(None, NiResponse::Ignore) {
                info!(id, "emergency NI accepted, ordinary session ignored");
            }
            return true;
        }
        if self.normal.signal(Some(id), response) {
            return true;
        }
        warn!(id, ?response, "response for unknown NI session");
        false
    }

    /// Drops every outstanding payload and wakes the wait tasks without any
    /// transport call; the modem handle they would answer on is gone.
    pub fn reset_on_engine_restart(&self) {
        for slot in [&self.emergency, &self.normal] {
            let taken = slot.outstanding.lock().take();
            if let Some(mut session) = taken {
                info!(id = session.id, class = ?slot.class, "NI session reset");
                if let Some(tx) = session.wake.take() {
                    let _ = tx.send(Wake::Reset);
                }
            }
        }
    }

    pub fn outstanding(&self, class: NiClass) -> Option<u32> {
        self.slot(class).outstanding.lock().as_ref().map(|s| s.id)
    }
}

async fn await_response<P: Send + 'static>(
    slot: Arc<Slot<P>>,
    id: u32,
    mut rx: oneshot::Receiver<Wake>,
    budget: Duration,
    responder: Arc<dyn NiResponder<P>>,
) {
    let wake = match tokio::time::timeout(budget, &mut rx).await {
        Ok(Ok(wake)) => wake,
        Ok(Err(_)) => Wake::Reset,
        // A response may have raced the deadline.
        Err(_) => rx
            .try_recv()
            .unwrap_or(Wake::Respond(NiResponse::NoResponse)),
    };

    let Wake::Respond(response) = wake else {
        debug!(id, "NI wait cancelled by reset");
        return;
    };

    let session = {
        let mut guard = slot.outstanding.lock();
        match guard.as_ref() {
            Some(current) if current.id == id => guard.take(),
            _ => None,
        }
    };
    let Some(session) = session else {
        return;
    };

    if response == NiResponse::Ignore {
        debug!(id, "NI session ignored");
        return;
    }
    debug!(id, ?response, "NI session resolved");
    responder.deliver(id, response, session.payload);
}
