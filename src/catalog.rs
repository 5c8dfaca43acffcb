//! Built-in platforms and providers.
//!
//! | Platform | Providers | Kind |
//! |----------|-----------|------|
//! | `AllowList` | `AllowList` | stateless |
//! | `Idena` | `IdenaState#{Newbie,Verified,Human}`, `IdenaStake#{1k,10k,100k}` | session-backed |
//! | `Google` | `Google` | OAuth exchange |
//! | `CyberConnect` | `CyberProfile{Premium,Paid,Free}` | stateless |
//! | `ETH` | platform description only | - |
//!
//! Evidence documents the built-in providers expect:
//!
//! ```text
//! AllowList     {"on_list": bool}
//! Idena         {"state": "Human", "stake": "105000.123", "validationTime": "<RFC 3339>"}
//! Google        {"email": "...", "verified_email": bool}
//! CyberConnect  {"tier": "premium" | "paid" | "free"}
//! ```

use std::sync::Arc;

use crate::evidence::{EvidenceSource, OAuthClient};
use crate::provider::{
    EvidenceCheck, ExpiryRule, OAuthExchangeProvider, ProviderConfig, ProviderError,
    ProviderRegistry, RecordPolicy, SessionBackedProvider, StatelessProvider,
};
use crate::session::SessionCache;
use crate::types::{proof_keys, PlatformGroupSpec, PlatformSpec, ProviderSpec, TierHierarchy};

/// Rejection shown when an address is not on the requested allow list.
pub const ALLOW_LIST_FAILURE: &str = "Address is not on the allow list";

/// Rejection shown when a Google email cannot be verified.
pub const GOOGLE_FAILURE: &str = "We couldn't verify the Google email you attempted to authorize with.";

/// Google consent-screen URL for the code grant. `{state}` is left for the
/// flow controller to fill in.
pub fn google_authorization_template(client_id: &str, redirect_uri: &str) -> String {
    format!(
        "https://accounts.google.com/o/oauth2/v2/auth?client_id={}&redirect_uri={}&response_type=code&scope=email&state={{state}}",
        urlencoding::encode(client_id),
        urlencoding::encode(redirect_uri)
    )
}

/// Idena identity states, lowest first.
pub fn idena_state_hierarchy() -> TierHierarchy {
    TierHierarchy::new("State", "state", ["Newbie", "Verified", "Human"])
}

/// Idena stake tiers with their minimum iDna amounts.
const IDENA_STAKE_TIERS: [(&str, f64); 3] = [("1k", 1_000.0), ("10k", 10_000.0), ("100k", 100_000.0)];

/// Idena stake tiers, lowest first.
pub fn idena_stake_hierarchy() -> TierHierarchy {
    TierHierarchy::new("Stake", "stake", IDENA_STAKE_TIERS.iter().map(|(tier, _)| *tier))
}

const CYBER_PROFILE_TIERS: [(&str, &str); 3] = [
    ("CyberProfilePremium", "premium"),
    ("CyberProfilePaid", "paid"),
    ("CyberProfileFree", "free"),
];

/// Idena identity expiry: the next validation ceremony.
fn idena_expiry() -> ExpiryRule {
    ExpiryRule::UntilEvidence {
        pointer: "/validationTime".to_string(),
    }
}

/// `IdenaState#<tier>` provider configurations.
pub fn idena_state_configs() -> Vec<ProviderConfig> {
    let hierarchy = idena_state_hierarchy();
    hierarchy
        .tiers()
        .iter()
        .map(|tier| {
            ProviderConfig::new(
                format!("IdenaState#{}", tier),
                "Idena",
                EvidenceCheck::Tier {
                    pointer: "/state".to_string(),
                    hierarchy: hierarchy.clone(),
                    required: tier.clone(),
                },
            )
            .with_error_label("Idena Status")
            .with_expiry(idena_expiry())
        })
        .collect()
}

/// `IdenaStake#<tier>` provider configurations.
pub fn idena_stake_configs() -> Vec<ProviderConfig> {
    let hierarchy = idena_stake_hierarchy();
    IDENA_STAKE_TIERS
        .iter()
        .map(|(tier, minimum)| {
            ProviderConfig::new(
                format!("IdenaStake#{}", tier),
                "Idena",
                EvidenceCheck::Threshold {
                    pointer: "/stake".to_string(),
                    minimum: *minimum,
                    label: hierarchy.label().to_string(),
                },
            )
            .with_record(RecordPolicy::address_only().with_fixed(hierarchy.record_key(), *tier))
            .with_error_label("Idena Stake")
            .with_expiry(idena_expiry())
        })
        .collect()
}

/// Allow-list membership provider configuration.
pub fn allow_list_config() -> ProviderConfig {
    ProviderConfig::new(
        "AllowList",
        "AllowList",
        EvidenceCheck::Flag {
            pointer: "/on_list".to_string(),
        },
    )
    .with_record(
        RecordPolicy::address_only()
            .address_as_given()
            .with_proof(proof_keys::ALLOW_LIST)
            .always(),
    )
    .requires_proof(proof_keys::ALLOW_LIST)
    .with_failure_message(ALLOW_LIST_FAILURE)
}

/// Google verified-email provider configuration.
pub fn google_config() -> ProviderConfig {
    ProviderConfig::new(
        "Google",
        "Google",
        EvidenceCheck::Flag {
            pointer: "/verified_email".to_string(),
        },
    )
    .with_record(RecordPolicy::default().with_evidence("email", "/email"))
    .with_failure_message(GOOGLE_FAILURE)
}

/// CyberConnect handle-tier provider configurations.
pub fn cyber_profile_configs() -> Vec<ProviderConfig> {
    CYBER_PROFILE_TIERS
        .iter()
        .map(|(id, tier)| {
            ProviderConfig::new(
                *id,
                "CyberConnect",
                EvidenceCheck::Equals {
                    pointer: "/tier".to_string(),
                    expected: tier.to_string(),
                },
            )
            .requiring_evm_address()
        })
        .collect()
}

/// Idena platform description.
pub fn idena_platform() -> PlatformSpec {
    let stake_group = IDENA_STAKE_TIERS
        .iter()
        .map(|(tier, _)| ProviderSpec::new(format!("IdenaStake#{}", tier), format!("more than {} iDna", tier)))
        .collect();
    PlatformSpec {
        platform: "Idena".to_string(),
        name: "Idena".to_string(),
        description: "Connect to Idena to verify your human identity.".to_string(),
        website: Some("https://idena.io/".to_string()),
        groups: vec![
            PlatformGroupSpec::new(
                "Identity State",
                idena_state_hierarchy()
                    .tiers()
                    .iter()
                    .map(|tier| ProviderSpec::new(format!("IdenaState#{}", tier), tier.clone()))
                    .collect(),
            ),
            PlatformGroupSpec::new("Identity Stake", stake_group),
        ],
    }
}

/// Ethereum activity platform description.
pub fn eth_platform() -> PlatformSpec {
    PlatformSpec {
        platform: "ETH".to_string(),
        name: "Ethereum".to_string(),
        description: "Verify Ethereum activity.".to_string(),
        website: Some(
            "https://support.gitcoin.co/gitcoin-knowledge-base/gitcoin-passport/navigating-your-ethereum-stamp-insights-and-updates"
                .to_string(),
        ),
        groups: vec![PlatformGroupSpec::new(
            "Ethereum Involvement Spectrum",
            vec![
                ProviderSpec::new("ETHEnthusiast", "ETH Enthusiast").with_description(
                    "Your journey begins here, showcasing initial engagement and support for the Ethereum ecosystem.",
                ),
                ProviderSpec::new("ETHPioneer", "ETH Pioneer").with_description(
                    "A step up, reflecting ongoing commitment and active participation in Ethereum's growth.",
                ),
                ProviderSpec::new("ETHAdvocate", "ETH Advocate")
                    .with_description("Continued commitment and participation in the Ethereum ecosystem."),
                ProviderSpec::new("ETHMaxi", "ETH Maxi").with_description(
                    "The ultimate badge of honor, embodying full-fledged advocacy and a dominant presence in the community.",
                ),
            ],
        )],
    }
}

/// Allow-list platform description.
pub fn allow_list_platform() -> PlatformSpec {
    PlatformSpec {
        platform: "AllowList".to_string(),
        name: "Guest List".to_string(),
        description: "Verify you are part of a community.".to_string(),
        website: None,
        groups: vec![PlatformGroupSpec::new(
            "Guest List",
            vec![ProviderSpec::new("AllowList", "Guest List")],
        )],
    }
}

/// Google platform description.
pub fn google_platform() -> PlatformSpec {
    PlatformSpec {
        platform: "Google".to_string(),
        name: "Google".to_string(),
        description: "Connect your existing Google Account to verify your email address.".to_string(),
        website: Some("https://www.google.com/".to_string()),
        groups: vec![PlatformGroupSpec::new(
            "Account Name",
            vec![ProviderSpec::new("Google", "Encrypted")],
        )],
    }
}

/// CyberConnect platform description.
pub fn cyber_profile_platform() -> PlatformSpec {
    PlatformSpec {
        platform: "CyberConnect".to_string(),
        name: "CyberConnect".to_string(),
        description: "Connect your CyberConnect profile to verify your handle.".to_string(),
        website: Some("https://cyberconnect.me/".to_string()),
        groups: vec![PlatformGroupSpec::new(
            "Handle",
            vec![
                ProviderSpec::new("CyberProfilePremium", "Premium handle (6 characters or fewer)"),
                ProviderSpec::new("CyberProfilePaid", "Paid handle (7 to 12 characters)"),
                ProviderSpec::new("CyberProfileFree", "Free handle (13 characters or more)"),
            ],
        )],
    }
}

/// Collaborators the built-in providers need.
///
/// Platforms whose collaborator is `None` are skipped.
#[derive(Clone, Default)]
pub struct CatalogSources {
    /// Allow-list registry lookups.
    pub allow_list: Option<Arc<dyn EvidenceSource>>,
    /// Idena identity lookups; needs `sessions` too.
    pub idena: Option<Arc<dyn EvidenceSource>>,
    /// Google OAuth client.
    pub google: Option<Arc<dyn OAuthClient>>,
    /// CyberConnect handle lookups.
    pub cyber_profile: Option<Arc<dyn EvidenceSource>>,
    /// Session cache for session-backed providers.
    pub sessions: Option<Arc<dyn SessionCache>>,
}

/// Register the built-in platforms and every provider whose collaborator is
/// available.
pub fn register_catalog(registry: &mut ProviderRegistry, sources: &CatalogSources) -> Result<(), ProviderError> {
    registry.register_platform(eth_platform());

    if let Some(source) = &sources.allow_list {
        registry.register_platform(allow_list_platform());
        registry.register(StatelessProvider::new(allow_list_config(), Arc::clone(source)))?;
    }

    if let (Some(source), Some(sessions)) = (&sources.idena, &sources.sessions) {
        registry.register_platform(idena_platform());
        for config in idena_state_configs().into_iter().chain(idena_stake_configs()) {
            registry.register(SessionBackedProvider::new(
                config,
                Arc::clone(source),
                Arc::clone(sessions),
            ))?;
        }
    }

    if let Some(client) = &sources.google {
        registry.register_platform(google_platform());
        registry.register(OAuthExchangeProvider::new(google_config(), Arc::clone(client)))?;
    }

    if let Some(source) = &sources.cyber_profile {
        registry.register_platform(cyber_profile_platform());
        for config in cyber_profile_configs() {
            registry.register(StatelessProvider::new(config, Arc::clone(source)))?;
        }
    }

    tracing::info!(
        providers = registry.len(),
        "provider catalog registered"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idena_platform_matches_provider_ids() {
        let platform = idena_platform();
        let ids: Vec<_> = platform.provider_ids().collect();
        assert_eq!(
            ids,
            vec![
                "IdenaState#Newbie",
                "IdenaState#Verified",
                "IdenaState#Human",
                "IdenaStake#1k",
                "IdenaStake#10k",
                "IdenaStake#100k",
            ]
        );

        let config_ids: Vec<_> = idena_state_configs()
            .into_iter()
            .chain(idena_stake_configs())
            .map(|c| c.id)
            .collect();
        assert_eq!(config_ids, ids);
    }

    #[test]
    fn test_all_configs_validate() {
        let configs = idena_state_configs()
            .into_iter()
            .chain(idena_stake_configs())
            .chain(cyber_profile_configs())
            .chain([allow_list_config(), google_config()]);
        for config in configs {
            assert!(config.validate().is_ok(), "{} should validate", config.id);
        }
    }

    #[test]
    fn test_google_authorization_template() {
        let url = google_authorization_template("client 1", "https://kernel.example/api/callback");
        assert!(url.contains("client_id=client%201"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fkernel.example%2Fapi%2Fcallback"));
        assert!(url.ends_with("state={state}"));
    }

    #[test]
    fn test_register_catalog_skips_missing_sources() {
        let mut registry = ProviderRegistry::new();
        register_catalog(&mut registry, &CatalogSources::default()).unwrap();

        assert!(registry.is_empty());
        assert!(registry.platform("ETH").is_some());
        assert!(registry.platform("Idena").is_none());
    }
}
