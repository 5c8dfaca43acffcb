//! Service state management.
//!
//! Contains the provider registry, callback router, flow table and shared
//! service state.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::KernelConfig;
use crate::flow::CallbackRouter;
use crate::provider::{FlowContext, ProviderRegistry};
use crate::scoring::ScoringAggregator;
use crate::session::{InMemorySessionCache, SessionCache, SessionError, SessionKey};

use super::flows::{FlowTable, FlowTemplate};

/// Shared service state.
///
/// Everything is behind `Arc`; cloning the state is cheap.
#[derive(Clone)]
pub struct ServiceState {
    /// Registered providers and platform descriptions.
    pub registry: Arc<ProviderRegistry>,
    /// Session storage shared with session-backed providers.
    pub sessions: Arc<dyn SessionCache>,
    /// Routes redirect callbacks to waiting flows.
    pub router: Arc<CallbackRouter>,
    /// Flows started over HTTP.
    pub flows: Arc<FlowTable>,
    /// Providers that can be reached through an authorization flow.
    pub flow_templates: Arc<BTreeMap<String, FlowTemplate>>,
    /// Score ordering and categories.
    pub aggregator: Arc<ScoringAggregator>,
    /// Context handed to providers.
    pub context: FlowContext,
    /// Loaded configuration.
    pub config: Arc<KernelConfig>,
}

impl ServiceState {
    /// Create service state from a registry and a session cache.
    ///
    /// The callback router is keyed with `config.callback_secret`.
    pub fn new(registry: ProviderRegistry, sessions: Arc<dyn SessionCache>, config: KernelConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            sessions,
            router: Arc::new(CallbackRouter::new(config.callback_secret.clone())),
            flows: Arc::new(FlowTable::new(config.session_capacity)),
            flow_templates: Arc::new(BTreeMap::new()),
            aggregator: Arc::new(ScoringAggregator::default()),
            context: FlowContext::default(),
            config: Arc::new(config),
        }
    }

    /// Create service state with an in-memory session cache.
    pub fn in_memory(registry: ProviderRegistry, config: KernelConfig) -> Self {
        let sessions: Arc<dyn SessionCache> = Arc::new(InMemorySessionCache::new(config.session()));
        Self::new(registry, sessions, config)
    }

    /// Replace the score aggregator.
    pub fn with_aggregator(mut self, aggregator: ScoringAggregator) -> Self {
        self.aggregator = Arc::new(aggregator);
        self
    }

    /// Offer an authorization flow for a provider.
    pub fn with_flow(mut self, provider_id: impl Into<String>, template: FlowTemplate) -> Self {
        Arc::make_mut(&mut self.flow_templates).insert(provider_id.into(), template);
        self
    }

    /// Replace the provider context.
    pub fn with_context(mut self, context: FlowContext) -> Self {
        self.context = context;
        self
    }

    /// Probe the session backend.
    ///
    /// Looks up a key that cannot exist; anything but a backend error means
    /// the store answered.
    pub async fn sessions_healthy(&self) -> bool {
        !matches!(
            self.sessions.load(&SessionKey::generate()).await,
            Err(SessionError::Backend(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_state_is_healthy() {
        let state = ServiceState::in_memory(ProviderRegistry::new(), KernelConfig::default());
        assert!(state.sessions_healthy().await);
        assert_eq!(state.router.pending_count(), 0);
    }

    #[test]
    fn test_state_clone_shares_registry() {
        let state = ServiceState::in_memory(ProviderRegistry::new(), KernelConfig::default());
        let cloned = state.clone();
        assert!(Arc::ptr_eq(&state.registry, &cloned.registry));
        assert!(Arc::ptr_eq(&state.router, &cloned.router));
        assert!(Arc::ptr_eq(&state.flows, &cloned.flows));
    }

    #[test]
    fn test_with_flow_registers_template() {
        let state = ServiceState::in_memory(ProviderRegistry::new(), KernelConfig::default()).with_flow(
            "Google",
            FlowTemplate::new(
                "Google",
                crate::flow::AuthorizationUrl::Template("https://auth.example/?state={state}".to_string()),
            ),
        );
        assert!(state.flow_templates.contains_key("Google"));
        assert!(state.flows.is_empty());
    }
}
