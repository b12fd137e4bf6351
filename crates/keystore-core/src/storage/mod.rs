mod slot_store;

pub use slot_store::{InMemorySlotStore, SlotStore, SlotStoreError};
