use std::sync::{
    atomic::{AtomicU8, Ordering},
    PoisonError, RwLock,
};

use async_trait::async_trait;
use keystore_core::storage::{SlotStore, SlotStoreError};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{info, instrument, trace};

use crate::{
    addressing::Namespace,
    client::{KvClient, RedisClient},
    codec::{decode_blob, encode_blob},
    config::RedisKeyStoreConfig,
    shred::{self, ShredOptions, ShredReport},
};

/// Lifecycle of a backend instance. There is no way back from `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    Open = 0,
    Closing = 1,
    Closed = 2,
}

impl LifecycleState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => LifecycleState::Open,
            1 => LifecycleState::Closing,
            _ => LifecycleState::Closed,
        }
    }
}

/// Slot store keeping base64-encoded sealed blobs in Redis under one namespace.
///
/// The client handle is injected and owned for shutdown only; operations from
/// any number of callers share it until `close` releases it.
pub struct RedisSlotStore<C: KvClient = RedisClient> {
    namespace: Namespace,
    client: RwLock<Option<C>>,
    state: AtomicU8,
    shred: ShredOptions,
    deletes: TaskTracker,
}

impl RedisSlotStore<RedisClient> {
    /// Connect to the configured Redis and build a store over the connection.
    pub async fn connect(config: &RedisKeyStoreConfig) -> Result<Self, SlotStoreError> {
        config
            .validate()
            .map_err(|err| SlotStoreError::connection(format!("invalid config: {err}")))?;
        let client = RedisClient::connect(&config.url).await?;
        Ok(Self::new(client, config.namespace()).with_shred_options(config.shred_options()))
    }
}

impl<C: KvClient> RedisSlotStore<C> {
    pub fn new(client: C, namespace: Namespace) -> Self {
        Self {
            namespace,
            client: RwLock::new(Some(client)),
            state: AtomicU8::new(LifecycleState::Open as u8),
            shred: ShredOptions::default(),
            deletes: TaskTracker::new(),
        }
    }

    /// A zero `scan_count` is raised to 1, since Redis rejects `COUNT 0`.
    pub fn with_shred_options(mut self, options: ShredOptions) -> Self {
        self.shred = ShredOptions {
            scan_count: options.scan_count.max(1),
            ..options
        };
        self
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn shred_options(&self) -> &ShredOptions {
        &self.shred
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Clone the live handle; the lock is released before any remote call.
    fn client(&self) -> Result<C, SlotStoreError> {
        let guard = self
            .client
            .read()
            .map_err(|err| SlotStoreError::connection(format!("lock poisoned: {err}")))?;
        guard
            .clone()
            .ok_or_else(|| SlotStoreError::connection("client closed"))
    }

    /// Shred every key under the namespace, giving up early if `cancel` fires.
    #[instrument(skip_all, fields(prefix = %self.namespace.prefix()))]
    pub async fn shred_all_with_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ShredReport, SlotStoreError> {
        let client = self.client()?;
        shred::shred(
            &client,
            &self.namespace.scan_pattern(),
            &self.shred,
            &self.deletes,
            cancel,
        )
        .await
    }

    /// Wait until every fire-and-forget delete issued by earlier shreds has finished.
    pub async fn settle_deletes(&self) {
        self.deletes.close();
        self.deletes.wait().await;
        self.deletes.reopen();
    }
}

#[async_trait]
impl<C: KvClient> SlotStore for RedisSlotStore<C> {
    #[instrument(skip_all, fields(prefix = %self.namespace.prefix()))]
    async fn put_key_in_slot(&self, slot: &str, key: &[u8]) -> Result<(), SlotStoreError> {
        trace!("Putting key in slot {}", self.namespace.describe(slot));
        let client = self.client()?;
        client
            .set(&self.namespace.store_key(slot), encode_blob(key))
            .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(prefix = %self.namespace.prefix()))]
    async fn get_key_in_slot(&self, slot: &str) -> Result<Vec<u8>, SlotStoreError> {
        trace!("Getting key in slot {}", self.namespace.describe(slot));
        let client = self.client()?;
        let encoded = client
            .get(&self.namespace.store_key(slot))
            .await?
            .ok_or_else(|| SlotStoreError::NotFound {
                slot: slot.to_string(),
            })?;
        decode_blob(&encoded).map_err(|err| SlotStoreError::CorruptData {
            slot: slot.to_string(),
            reason: err.to_string(),
        })
    }

    #[instrument(skip_all, fields(prefix = %self.namespace.prefix()))]
    async fn delete_key_slot(&self, slot: &str) -> Result<(), SlotStoreError> {
        trace!("Deleting key in slot {}", self.namespace.describe(slot));
        let client = self.client()?;
        client.del(&self.namespace.store_key(slot)).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(prefix = %self.namespace.prefix()))]
    async fn has_key_in_slot(&self, slot: &str) -> Result<bool, SlotStoreError> {
        trace!("Checking key in slot {}", self.namespace.describe(slot));
        let client = self.client()?;
        Ok(client.exists(&self.namespace.store_key(slot)).await? > 0)
    }

    async fn clear_key_slots(&self) -> Result<(), SlotStoreError> {
        self.shred_all_with_cancel(&CancellationToken::new())
            .await
            .map(|_| ())
    }

    async fn close(&self) -> Result<(), SlotStoreError> {
        let opened = self.state.compare_exchange(
            LifecycleState::Open as u8,
            LifecycleState::Closing as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if opened.is_err() {
            return Ok(());
        }

        info!(prefix = %self.namespace.prefix(), "Closing redis client");
        // A poisoned lock must not strand the store in `Closing`.
        let client = self
            .client
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(client) = client {
            client.disconnect().await;
        }
        self.state
            .store(LifecycleState::Closed as u8, Ordering::Release);
        Ok(())
    }
}
