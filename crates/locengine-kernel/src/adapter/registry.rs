//! Bounded adapter registry with broadcast and first-handling dispatch.

use super::LocAdapter;
use crate::types::EventMask;
use slotmap::{SlotMap, new_key_type};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

new_key_type! {
    /// Stable handle to a registered adapter.
    pub struct AdapterKey;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum RegistryError {
    #[error("adapter registry is full ({capacity} adapters)")]
    Full { capacity: usize },

    #[error("adapter '{0}' is already registered")]
    Duplicate(String),
}

/// Transport action a registry change calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskUpdate {
    /// (Re)open the transport with the new aggregate mask.
    Open(EventMask),
    /// The last adapter left; shut the transport down.
    Close,
}

/// Set of registered adapters.
///
/// Lives inside the engine state, so it is only ever touched by the
/// command-queue worker.
pub struct AdapterRegistry {
    adapters: SlotMap<AdapterKey, Arc<dyn LocAdapter>>,
    capacity: usize,
    excluded: EventMask,
}

impl AdapterRegistry {
    pub fn new(capacity: usize, excluded: EventMask) -> Self {
        Self {
            adapters: SlotMap::with_capacity_and_key(capacity),
            capacity,
            excluded,
        }
    }

    /// Registers `adapter` and returns the mask update to apply.
    pub fn add(
        &mut self,
        adapter: Arc<dyn LocAdapter>,
    ) -> Result<(AdapterKey, MaskUpdate), RegistryError> {
        if self.key_of(&adapter).is_some() {
            warn!(adapter = adapter.name(), "adapter already registered");
            return Err(RegistryError::Duplicate(adapter.name().to_string()));
        }
        if self.adapters.len() >= self.capacity {
            warn!(adapter = adapter.name(), capacity = self.capacity, "adapter registry full");
            return Err(RegistryError::Full {
                capacity: self.capacity,
            });
        }

        debug!(adapter = adapter.name(), mask = %adapter.event_mask(), "adapter registered");
        let key = self.adapters.insert(adapter);
        Ok((key, MaskUpdate::Open(self.evt_mask())))
    }

    /// Unregisters the adapter behind `key`.
    ///
    /// Returns `None` if the key is unknown.
    pub fn remove(&mut self, key: AdapterKey) -> Option<MaskUpdate> {
        let adapter = self.adapters.remove(key)?;
        debug!(adapter = adapter.name(), remaining = self.adapters.len(), "adapter removed");
        if self.adapters.is_empty() {
            Some(MaskUpdate::Close)
        } else {
            Some(MaskUpdate::Open(self.evt_mask()))
        }
    }

    /// Unregisters `adapter` by identity.
    pub fn remove_adapter(&mut self, adapter: &Arc<dyn LocAdapter>) -> Option<MaskUpdate> {
        let key = self.key_of(adapter)?;
        self.remove(key)
    }

    pub fn key_of(&self, adapter: &Arc<dyn LocAdapter>) -> Option<AdapterKey> {
        self.adapters
            .iter()
            .find(|(_, a)| std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(adapter)))
            .map(|(key, _)| key)
    }

    /// OR of every registered mask minus the globally unsupported bits.
    pub fn evt_mask(&self) -> EventMask {
        self.adapters
            .values()
            .fold(EventMask::NONE, |acc, a| acc | a.event_mask())
            .without(self.excluded)
    }

    /// Delivers an event to every adapter.
    pub fn broadcast(&self, mut deliver: impl FnMut(&dyn LocAdapter)) {
        for adapter in self.adapters.values() {
            deliver(adapter.as_ref());
        }
    }

    /// Offers a request to adapters until one handles it.
    ///
    /// Returns whether any adapter did.
    pub fn first_handling(&self, mut offer: impl FnMut(&dyn LocAdapter) -> bool) -> bool {
        for adapter in self.adapters.values() {
            if offer(adapter.as_ref()) {
                return true;
            }
        }
        false
    }

    pub fn is_in_session(&self) -> bool {
        self.adapters.values().any(|a| a.is_in_session())
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
