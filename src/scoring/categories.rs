//! Static platform categories.

use crate::types::PlatformCategory;

fn category(name: &str, description: &str, platforms: &[&str]) -> PlatformCategory {
    PlatformCategory {
        name: name.to_string(),
        description: description.to_string(),
        platforms: platforms.iter().map(|p| p.to_string()).collect(),
    }
}

/// The default display categories, in display order.
pub fn default_platform_categories() -> Vec<PlatformCategory> {
    vec![
        category(
            "Blockchain & Crypto Networks",
            "Connect your blockchain-based profiles and assets to prove your identity.",
            &[
                "ETH",
                "NFT",
                "GtcStaking",
                "Idena",
                "Gitcoin",
                "ZkSync",
                "GuildXYZ",
                "Lens",
                "Snapshot",
                "GnosisSafe",
                "Brightid",
                "TrustaLabs",
                "Ens",
                // Not in the stock web list; added so the bundled CyberConnect provider is displayed.
                "CyberConnect",
            ],
        ),
        category(
            "Government IDs",
            "Use your government-issued IDs or complete a KYC process with our partners to verify your identity.",
            &["Coinbase", "Holonym", "Outdid", "Binance"],
        ),
        category(
            "Social & Professional Platforms",
            "Link your profiles from established social media and professional networking sites for verification.",
            &["Github", "Linkedin", "Google", "Discord"],
        ),
        category(
            "Biometric Verification",
            "Connect your blockchain-based profiles and assets to prove your identity.",
            &["Civic"],
        ),
    ]
}
