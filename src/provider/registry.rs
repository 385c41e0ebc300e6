//! Which implementation handles which remote provider

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use crate::event::EventSource;
use crate::provider::{RemoteProvider, SyncError};

/// Maps every provider tag to its implementation. This is built once at startup
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<EventSource, Arc<dyn RemoteProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, for the source it reports. This replaces any provider previously registered for that source
    pub fn register(&mut self, provider: Arc<dyn RemoteProvider>) {
        let source = provider.source();
        if self.providers.insert(source, provider).is_some() {
            log::warn!("Replacing the provider registered for {}", source);
        }
    }

    pub fn with(mut self, provider: Arc<dyn RemoteProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, source: EventSource) -> Result<Arc<dyn RemoteProvider>, SyncError> {
        self.providers
            .get(&source)
            .cloned()
            .ok_or(SyncError::UnknownProvider(source))
    }

    pub fn sources(&self) -> impl Iterator<Item = EventSource> + '_ {
        self.providers.keys().copied()
    }
}

impl Debug for ProviderRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.providers.keys()).finish()
    }
}
