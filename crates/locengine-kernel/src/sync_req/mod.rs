//! Blocking request/indication correlation over the async transport.
//!
//! A caller that needs a synchronous answer allocates one of a fixed pool of
//! [`POOL_SIZE`] wait slots, names the indication it expects, sends the
//! request and blocks on the slot's condition variable. Indication delivery
//! threads call [`SyncRequestBridge::on_indication_arrived`], which fills the
//! first matching slot.
//!
//! An indication that lands before the caller starts waiting is recorded as
//! arrived, so the following `wait` returns at once instead of missing the
//! wakeup.

use crate::transport::{RequestSender, TransportError};
use crate::types::ClientHandle;
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Number of wait slots.
pub const POOL_SIZE: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum SyncRequestError {
    #[error("all wait slots are in use")]
    PoolExhausted,

    #[error("request send failed: {0}")]
    SendFailed(#[from] TransportError),

    #[error("timed out waiting for indication")]
    Timeout,

    #[error("wait slot is already being waited on")]
    Busy,

    #[error("wait slot {0} is not allocated")]
    InvalidSlot(usize),

    #[error("internal sync request failure: {0}")]
    Internal(String),
}

/// Index of an allocated wait slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(usize);

impl SlotId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Default)]
struct SlotState {
    in_use: bool,
    client: Option<ClientHandle>,
    indication_id: u32,
    waiting: bool,
    arrived: bool,
    payload: Vec<u8>,
}

#[derive(Default)]
struct WaitSlot {
    state: Mutex<SlotState>,
    arrived: Condvar,
}

pub struct SyncRequestBridge {
    slots: [WaitSlot; POOL_SIZE],
}

impl Default for SyncRequestBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncRequestBridge {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| WaitSlot::default()),
        }
    }

    fn slot(&self, id: SlotId) -> Result<&WaitSlot, SyncRequestError> {
        self.slots.get(id.0).ok_or(SyncRequestError::InvalidSlot(id.0))
    }

    /// Claims the first free slot.
    pub fn allocate(&self) -> Result<SlotId, SyncRequestError> {
        for (index, slot) in self.slots.iter().enumerate() {
            let mut state = slot.state.lock();
            if !state.in_use {
                *state = SlotState {
                    in_use: true,
                    ..SlotState::default()
                };
                trace!(slot = index, "wait slot allocated");
                return Ok(SlotId(index));
            }
        }
        warn!("sync request pool exhausted");
        Err(SyncRequestError::PoolExhausted)
    }

    pub fn free(&self, id: SlotId) {
        if let Ok(slot) = self.slot(id) {
            *slot.state.lock() = SlotState::default();
            trace!(slot = id.0, "wait slot freed");
        }
    }

    /// Marks the slot as expecting `indication_id` from `client`.
    pub fn select_indication(
        &self,
        id: SlotId,
        client: ClientHandle,
        indication_id: u32,
    ) -> Result<(), SyncRequestError> {
        let slot = self.slot(id)?;
        let mut state = slot.state.lock();
        if !state.in_use {
            return Err(SyncRequestError::InvalidSlot(id.0));
        }
        state.client = Some(client);
        state.indication_id = indication_id;
        state.arrived = false;
        state.payload.clear();
        Ok(())
    }

    /// Blocks until the selected indication arrives or `timeout` elapses,
    /// then frees the slot.
    ///
    /// A second concurrent `wait` on the same slot gets
    /// [`SyncRequestError::Busy`] and leaves the slot to the first waiter.
    pub fn wait(&self, id: SlotId, timeout: Duration) -> Result<Vec<u8>, SyncRequestError> {
        let slot = self.slot(id)?;
        let mut state = slot.state.lock();
        if !state.in_use {
            return Err(SyncRequestError::InvalidSlot(id.0));
        }
        if state.waiting {
            return Err(SyncRequestError::Busy);
        }

        if !state.arrived {
            state.waiting = true;
            // A timeout past the end of the clock waits without a deadline.
            match Instant::now().checked_add(timeout) {
                Some(deadline) => {
                    while !state.arrived {
                        if slot.arrived.wait_until(&mut state, deadline).timed_out() {
                            break;
                        }
                    }
                }
                None => {
                    while !state.arrived {
                        slot.arrived.wait(&mut state);
                    }
                }
            }
            state.waiting = false;
        }

        let result = if state.arrived {
            Ok(std::mem::take(&mut state.payload))
        } else {
            debug!(slot = id.0, indication = state.indication_id, "sync request timed out");
            Err(SyncRequestError::Timeout)
        };
        *state = SlotState::default();
        result
    }

    /// Sends a request and blocks for its indication.
    ///
    /// If the send fails the slot is released at once and no wait happens.
    pub fn send_and_wait<T: RequestSender + ?Sized>(
        &self,
        sender: &T,
        client: ClientHandle,
        request_id: u32,
        payload: &[u8],
        timeout: Duration,
        indication_id: u32,
    ) -> Result<Vec<u8>, SyncRequestError> {
        let slot = self.allocate()?;
        if let Err(err) = self.select_indication(slot, client, indication_id) {
            self.free(slot);
            return Err(err);
        }

        if let Err(err) = sender.send_request(client, request_id, payload) {
            warn!(request_id, error = %err, "sync request send failed");
            self.free(slot);
            return Err(SyncRequestError::SendFailed(err));
        }

        match self.wait(slot, timeout) {
            Ok(payload) => Ok(payload),
            Err(SyncRequestError::Timeout) => Err(SyncRequestError::Timeout),
            Err(other) => Err(SyncRequestError::Internal(other.to_string())),
        }
    }

    /// Fills the first slot waiting for (`client`, `indication_id`).
    ///
    /// Returns `false` if nobody expected it.
    pub fn on_indication_arrived(
        &self,
        client: ClientHandle,
        indication_id: u32,
        payload: &[u8],
    ) -> bool {
        for (index, slot) in self.slots.iter().enumerate() {
            let mut state = slot.state.lock();
            let matches = state.in_use
                && !state.arrived
                && state.client == Some(client)
                && state.indication_id == indication_id;
            if !matches {
                continue;
            }

            state.payload.clear();
            state.payload.extend_from_slice(payload);
            state.arrived = true;
            if state.waiting {
                slot.arrived.notify_one();
            }
            trace!(slot = index, indication_id, "indication matched");
            return true;
        }
        trace!(indication_id, "unsolicited indication");
        false
    }

    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|s| s.state.lock().in_use).count()
    }
}
