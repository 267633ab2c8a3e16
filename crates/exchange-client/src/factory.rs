//! Factory for stamping out exchange clients with shared wiring

use crate::client::ExchangeClient;
use crate::config::ExchangeConfig;
use crate::sub_client::PageBufferClientFactory;
use exchange_core::SystemMemoryUsageListener;
use std::sync::Arc;

/// Creates exchange clients that share one configuration, one sub-client
/// transport, and one memory tracker.
///
/// A query engine typically holds a single factory and creates one exchange
/// client per consuming operator.
pub struct ExchangeClientFactory {
    config: ExchangeConfig,
    client_factory: Arc<dyn PageBufferClientFactory>,
    memory_listener: Arc<dyn SystemMemoryUsageListener>,
}

impl ExchangeClientFactory {
    /// Create a factory from shared wiring
    pub fn new(
        config: ExchangeConfig,
        client_factory: Arc<dyn PageBufferClientFactory>,
        memory_listener: Arc<dyn SystemMemoryUsageListener>,
    ) -> Self {
        Self {
            config,
            client_factory,
            memory_listener,
        }
    }

    /// Shared configuration handed to every created client
    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    /// Create an independently identified exchange client
    pub fn create(&self) -> ExchangeClient {
        ExchangeClient::new(
            self.config.clone(),
            Arc::clone(&self.client_factory),
            Arc::clone(&self.memory_listener),
        )
    }
}
