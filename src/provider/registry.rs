//! Provider registry.
//!
//! Maps provider ids to providers and keeps the static platform
//! descriptions they belong to. The registry is built once at startup and
//! shared read-only afterwards (`Arc<ProviderRegistry>`).

use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{FlowContext, Provider, ProviderError, ProviderKind};
use crate::fingerprint::fingerprint_hex;
use crate::types::{PlatformSpec, RequestPayload, VerificationResult};

/// Public description of a registered provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderDescriptor {
    /// Provider id.
    pub id: String,
    /// Platform display name.
    pub platform: String,
    /// Provider kind.
    pub kind: ProviderKind,
}

/// Registry of providers keyed by id.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<Provider>>,
    platforms: BTreeMap<String, PlatformSpec>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider. Ids are unique.
    pub fn register(&mut self, provider: impl Into<Provider>) -> Result<(), ProviderError> {
        let provider = provider.into();
        provider.config().validate()?;

        let id = provider.id().to_string();
        if self.providers.contains_key(&id) {
            return Err(ProviderError::DuplicateProvider(id));
        }
        tracing::debug!(provider = %id, kind = %provider.kind(), "provider registered");
        self.providers.insert(id, Arc::new(provider));
        Ok(())
    }

    /// Register a platform description. Replaces an earlier one with the same id.
    pub fn register_platform(&mut self, spec: PlatformSpec) {
        self.platforms.insert(spec.platform.clone(), spec);
    }

    /// Look up a provider.
    pub fn resolve(&self, id: &str) -> Result<Arc<Provider>, ProviderError> {
        self.providers
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(id.to_string()))
    }

    /// Whether a provider is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.providers.contains_key(id)
    }

    /// Resolve and verify.
    pub async fn verify(
        &self,
        id: &str,
        payload: &RequestPayload,
        ctx: &FlowContext,
    ) -> Result<VerificationResult, ProviderError> {
        let provider = self.resolve(id)?;
        provider.verify(payload, ctx).await
    }

    /// Verify one payload against several providers concurrently.
    ///
    /// Results are keyed by provider id; one provider failing does not affect
    /// the others.
    pub async fn verify_many(
        &self,
        ids: &[String],
        payload: &RequestPayload,
        ctx: &FlowContext,
    ) -> BTreeMap<String, Result<VerificationResult, ProviderError>> {
        let verifications = ids.iter().map(|id| async move {
            let result = self.verify(id, payload, ctx).await;
            (id.clone(), result)
        });
        join_all(verifications).await.into_iter().collect()
    }

    /// Descriptors of every provider, sorted by id.
    pub fn list(&self) -> Vec<ProviderDescriptor> {
        self.providers
            .values()
            .map(|p| ProviderDescriptor {
                id: p.id().to_string(),
                platform: p.platform().to_string(),
                kind: p.kind(),
            })
            .collect()
    }

    /// Registered platforms, sorted by id.
    pub fn platforms(&self) -> impl Iterator<Item = &PlatformSpec> {
        self.platforms.values()
    }

    /// A single platform.
    pub fn platform(&self, id: &str) -> Option<&PlatformSpec> {
        self.platforms.get(id)
    }

    /// Number of providers.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether no providers are registered.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Fingerprint of the provider and platform set.
    ///
    /// Changes whenever a provider declaration or platform description
    /// changes.
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        let configs: Vec<_> = self.providers.values().map(|p| (p.kind(), p.config())).collect();
        let platforms: Vec<_> = self.platforms.values().collect();
        fingerprint_hex(&(configs, platforms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::{EvidenceError, EvidenceRequest, EvidenceSource, RawEvidence};
    use crate::provider::{EvidenceCheck, ProviderConfig, StatelessProvider};
    use crate::types::{PlatformGroupSpec, ProviderSpec};
    use async_trait::async_trait;
    use serde_json::json;

    struct FixedSource(RawEvidence);

    #[async_trait]
    impl EvidenceSource for FixedSource {
        async fn fetch_evidence(&self, _request: &EvidenceRequest) -> Result<RawEvidence, EvidenceError> {
            Ok(self.0.clone())
        }
    }

    fn flag_provider(id: &str, evidence: RawEvidence) -> StatelessProvider {
        let config = ProviderConfig::new(
            id,
            "Test",
            EvidenceCheck::Flag {
                pointer: "/ok".to_string(),
            },
        );
        StatelessProvider::new(config, Arc::new(FixedSource(evidence)))
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = ProviderRegistry::new();
        registry.register(flag_provider("A", json!({"ok": true}))).unwrap();
        assert_eq!(
            registry.register(flag_provider("A", json!({"ok": true}))),
            Err(ProviderError::DuplicateProvider("A".to_string()))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve_unknown() {
        let registry = ProviderRegistry::new();
        assert_eq!(
            registry.resolve("Nope").unwrap_err(),
            ProviderError::UnknownProvider("Nope".to_string())
        );
    }

    #[tokio::test]
    async fn test_verify_many_isolates_results() {
        let mut registry = ProviderRegistry::new();
        registry.register(flag_provider("A", json!({"ok": true}))).unwrap();
        registry.register(flag_provider("B", json!({"ok": false}))).unwrap();

        let ids = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let results = registry
            .verify_many(&ids, &RequestPayload::new("0xabc"), &FlowContext::default())
            .await;

        assert!(results["A"].as_ref().unwrap().is_valid());
        assert!(!results["B"].as_ref().unwrap().is_valid());
        assert!(matches!(results["C"], Err(ProviderError::UnknownProvider(_))));
    }

    #[test]
    fn test_fingerprint_tracks_platforms() {
        let mut registry = ProviderRegistry::new();
        registry.register(flag_provider("A", json!({"ok": true}))).unwrap();
        let before = registry.fingerprint().unwrap();

        registry.register_platform(PlatformSpec {
            platform: "Test".to_string(),
            name: "Test".to_string(),
            description: "A test platform".to_string(),
            website: None,
            groups: vec![PlatformGroupSpec::new("Group", vec![ProviderSpec::new("A", "A")])],
        });

        assert_ne!(before, registry.fingerprint().unwrap());
        assert_eq!(registry.list()[0].kind, ProviderKind::Stateless);
    }
}
