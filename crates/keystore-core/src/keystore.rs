use std::sync::Arc;

use tracing::{debug, instrument};

use crate::{
    provider::{ProviderError, ValueProvider},
    storage::{SlotStore, SlotStoreError},
};

const ROOT_KEY_SLOT_PREFIX: &str = "root-key-";
const DEK_SLOT_PREFIX: &str = "dek-";

fn root_key_slot(id: &str) -> String {
    format!("{ROOT_KEY_SLOT_PREFIX}{id}")
}

fn dek_slot(id: &str) -> String {
    format!("{DEK_SLOT_PREFIX}{id}")
}

/// Key store for sealed root keys and data-encryption keys, backed by any `SlotStore`.
///
/// Blobs handed to this type are already sealed. The password, salt and context
/// providers are held for the sealing layer and never read by the slot store.
pub struct KeyStore<S: SlotStore> {
    slots: S,
    password: Arc<dyn ValueProvider>,
    salt: Arc<dyn ValueProvider>,
    context: Arc<dyn ValueProvider>,
}

impl<S: SlotStore> KeyStore<S> {
    pub fn new(
        slots: S,
        password: impl ValueProvider + 'static,
        salt: impl ValueProvider + 'static,
        context: impl ValueProvider + 'static,
    ) -> Self {
        Self {
            slots,
            password: Arc::new(password),
            salt: Arc::new(salt),
            context: Arc::new(context),
        }
    }

    /// The backing slot store.
    pub fn slots(&self) -> &S {
        &self.slots
    }

    pub async fn password(&self) -> Result<Vec<u8>, ProviderError> {
        self.password.provide().await
    }

    pub async fn salt(&self) -> Result<Vec<u8>, ProviderError> {
        self.salt.provide().await
    }

    pub async fn context(&self) -> Result<Vec<u8>, ProviderError> {
        self.context.provide().await
    }

    #[instrument(skip(self, sealed))]
    pub async fn save_sealed_root_key(&self, id: &str, sealed: &[u8]) -> Result<(), SlotStoreError> {
        self.slots.put_key_in_slot(&root_key_slot(id), sealed).await
    }

    #[instrument(skip(self))]
    pub async fn fetch_sealed_root_key(&self, id: &str) -> Result<Vec<u8>, SlotStoreError> {
        self.slots.get_key_in_slot(&root_key_slot(id)).await
    }

    #[instrument(skip(self))]
    pub async fn destroy_sealed_root_key(&self, id: &str) -> Result<(), SlotStoreError> {
        self.slots.delete_key_slot(&root_key_slot(id)).await
    }

    pub async fn has_sealed_root_key(&self, id: &str) -> Result<bool, SlotStoreError> {
        self.slots.has_key_in_slot(&root_key_slot(id)).await
    }

    #[instrument(skip(self, sealed))]
    pub async fn save_sealed_data_enc_key(
        &self,
        id: &str,
        sealed: &[u8],
    ) -> Result<(), SlotStoreError> {
        self.slots.put_key_in_slot(&dek_slot(id), sealed).await
    }

    #[instrument(skip(self))]
    pub async fn fetch_sealed_data_enc_key(&self, id: &str) -> Result<Vec<u8>, SlotStoreError> {
        self.slots.get_key_in_slot(&dek_slot(id)).await
    }

    #[instrument(skip(self))]
    pub async fn destroy_sealed_data_enc_key(&self, id: &str) -> Result<(), SlotStoreError> {
        self.slots.delete_key_slot(&dek_slot(id)).await
    }

    pub async fn has_sealed_data_enc_key(&self, id: &str) -> Result<bool, SlotStoreError> {
        self.slots.has_key_in_slot(&dek_slot(id)).await
    }

    /// Shred every root key and DEK held by the backing store.
    #[instrument(skip(self))]
    pub async fn destroy_all_keys(&self) -> Result<(), SlotStoreError> {
        self.slots.clear_key_slots().await
    }

    pub async fn close(&self) -> Result<(), SlotStoreError> {
        debug!("closing key store");
        self.slots.close().await
    }
}
