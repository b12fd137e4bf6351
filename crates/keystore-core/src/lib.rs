//! Storage-agnostic contracts for sealed key material: the slot store capability
//! every backend implements, and the key store that composes over it.

pub mod keystore;
pub mod provider;
pub mod storage;
