use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use thiserror::Error;

/// Errors produced by slot store implementations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SlotStoreError {
    /// Nothing is stored in the requested slot.
    #[error("key not found in slot: {slot}")]
    NotFound { slot: String },
    /// The stored value could not be decoded back to bytes.
    #[error("corrupt data in slot {slot}: {reason}")]
    CorruptData { slot: String, reason: String },
    /// Clearing the key slots did not finish within the bound.
    /// Keys deleted before the deadline stay deleted.
    #[error("timed out after {after:?} while clearing key slots")]
    Timeout { after: Duration },
    /// Clearing the key slots was cancelled by the caller.
    #[error("clearing key slots was cancelled")]
    Cancelled,
    /// Any failure of the underlying store client, including a closed handle.
    #[error("connection error: {reason}")]
    Connection { reason: String },
}

impl SlotStoreError {
    pub fn connection(reason: impl ToString) -> Self {
        SlotStoreError::Connection {
            reason: reason.to_string(),
        }
    }
}

/// Capability contract for persisting sealed key blobs in named slots.
///
/// Implementations treat blobs as opaque bytes and perform no retries; a failed
/// remote call surfaces immediately so the caller can decide whether to retry.
#[async_trait]
pub trait SlotStore: Send + Sync {
    /// Persist a blob in a slot, overwriting any existing entry.
    async fn put_key_in_slot(&self, slot: &str, key: &[u8]) -> Result<(), SlotStoreError>;

    /// Retrieve the blob stored in a slot.
    async fn get_key_in_slot(&self, slot: &str) -> Result<Vec<u8>, SlotStoreError>;

    /// Remove a slot (idempotent).
    async fn delete_key_slot(&self, slot: &str) -> Result<(), SlotStoreError>;

    /// Whether the slot currently holds a blob.
    async fn has_key_in_slot(&self, slot: &str) -> Result<bool, SlotStoreError>;

    /// Delete every slot owned by this store.
    async fn clear_key_slots(&self) -> Result<(), SlotStoreError>;

    /// Release the underlying handle. Repeated calls are a no-op.
    async fn close(&self) -> Result<(), SlotStoreError>;
}

/// In-memory slot store for tests and smoke runs.
#[derive(Debug, Default, Clone)]
pub struct InMemorySlotStore {
    slots: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    closed: Arc<AtomicBool>,
}

impl InMemorySlotStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_slots<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, Vec<u8>>) -> T,
    ) -> Result<T, SlotStoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SlotStoreError::connection("store closed"));
        }
        let mut slots = self
            .slots
            .lock()
            .map_err(|err| SlotStoreError::connection(format!("lock poisoned: {err}")))?;
        Ok(f(&mut slots))
    }
}

#[async_trait]
impl SlotStore for InMemorySlotStore {
    async fn put_key_in_slot(&self, slot: &str, key: &[u8]) -> Result<(), SlotStoreError> {
        self.with_slots(|slots| {
            slots.insert(slot.to_string(), key.to_vec());
        })
    }

    async fn get_key_in_slot(&self, slot: &str) -> Result<Vec<u8>, SlotStoreError> {
        self.with_slots(|slots| slots.get(slot).cloned())?
            .ok_or_else(|| SlotStoreError::NotFound {
                slot: slot.to_string(),
            })
    }

    async fn delete_key_slot(&self, slot: &str) -> Result<(), SlotStoreError> {
        self.with_slots(|slots| {
            slots.remove(slot);
        })
    }

    async fn has_key_in_slot(&self, slot: &str) -> Result<bool, SlotStoreError> {
        self.with_slots(|slots| slots.contains_key(slot))
    }

    async fn clear_key_slots(&self) -> Result<(), SlotStoreError> {
        self.with_slots(|slots| slots.clear())
    }

    async fn close(&self) -> Result<(), SlotStoreError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
