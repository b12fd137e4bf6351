use std::future::Future;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("value unavailable: {0}")]
    Unavailable(String),
}

/// Supplies one of the inputs used to seal keys (password, salt or context).
///
/// Providers are invoked on every use so that rotating the underlying value
/// takes effect without rebuilding the key store.
#[async_trait]
pub trait ValueProvider: Send + Sync {
    async fn provide(&self) -> Result<Vec<u8>, ProviderError>;
}

#[async_trait]
impl<F, Fut> ValueProvider for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<u8>, ProviderError>> + Send + 'static,
{
    async fn provide(&self) -> Result<Vec<u8>, ProviderError> {
        (self)().await
    }
}

/// Provider returning a fixed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticValue(Vec<u8>);

impl StaticValue {
    pub fn new(value: impl Into<Vec<u8>>) -> Self {
        Self(value.into())
    }
}

#[async_trait]
impl ValueProvider for StaticValue {
    async fn provide(&self) -> Result<Vec<u8>, ProviderError> {
        Ok(self.0.clone())
    }
}
