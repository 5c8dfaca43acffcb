//! Platform configuration and derived score types.

use serde::{Deserialize, Serialize};

/// Display entry for one provider inside a platform group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpec {
    /// Provider id (registry key).
    pub name: String,
    /// Short title.
    pub title: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ProviderSpec {
    /// Create a provider entry without description.
    pub fn new(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            description: None,
        }
    }

    /// Attach a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Static grouping of related providers inside a platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformGroupSpec {
    /// Group heading.
    pub platform_group: String,
    /// Providers in display order.
    pub providers: Vec<ProviderSpec>,
}

impl PlatformGroupSpec {
    /// Create a group.
    pub fn new(platform_group: impl Into<String>, providers: Vec<ProviderSpec>) -> Self {
        Self {
            platform_group: platform_group.into(),
            providers,
        }
    }

    /// Provider ids in display order.
    pub fn provider_ids(&self) -> impl Iterator<Item = &str> {
        self.providers.iter().map(|p| p.name.as_str())
    }
}

/// Static description of a platform and its provider groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformSpec {
    /// Platform id ("Idena").
    pub platform: String,
    /// Display name.
    pub name: String,
    /// One-line description.
    pub description: String,
    /// Project website.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    /// Provider groups.
    pub groups: Vec<PlatformGroupSpec>,
}

impl PlatformSpec {
    /// All provider ids of the platform, group by group.
    pub fn provider_ids(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().flat_map(PlatformGroupSpec::provider_ids)
    }
}

/// Points earned on a platform relative to what it offers.
///
/// `earned_points` is clamped to `[0, possible_points]` on construction,
/// including when deserialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "PlatformScoreWire")]
pub struct PlatformScoreSpec {
    platform: String,
    earned_points: f64,
    possible_points: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlatformScoreWire {
    platform: String,
    #[serde(default)]
    earned_points: f64,
    #[serde(default)]
    possible_points: f64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

impl From<PlatformScoreWire> for PlatformScoreSpec {
    fn from(wire: PlatformScoreWire) -> Self {
        let mut score = Self::new(wire.platform, wire.earned_points, wire.possible_points);
        score.name = wire.name;
        score.description = wire.description;
        score
    }
}

impl PlatformScoreSpec {
    /// Create a score; non-finite or negative inputs count as zero.
    pub fn new(platform: impl Into<String>, earned_points: f64, possible_points: f64) -> Self {
        let possible = sanitize(possible_points);
        let earned = sanitize(earned_points).min(possible);
        Self {
            platform: platform.into(),
            earned_points: earned,
            possible_points: possible,
            name: None,
            description: None,
        }
    }

    /// Attach display text.
    pub fn with_display(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self.description = Some(description.into());
        self
    }

    /// Display name, when known.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Display description, when known.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Platform id.
    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// Points earned.
    pub fn earned_points(&self) -> f64 {
        self.earned_points
    }

    /// Points available.
    pub fn possible_points(&self) -> f64 {
        self.possible_points
    }

    /// Points still available.
    pub fn headroom(&self) -> f64 {
        self.possible_points - self.earned_points
    }
}

fn sanitize(points: f64) -> f64 {
    if points.is_finite() && points > 0.0 {
        points
    } else {
        0.0
    }
}

/// Static category: a named list of member platform ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformCategory {
    /// Category name.
    pub name: String,
    /// Category description.
    pub description: String,
    /// Member platform ids.
    pub platforms: Vec<String>,
}

/// Display-time category with its ordered platform scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    /// Category name.
    pub name: String,
    /// Category description.
    pub description: String,
    /// Platforms in canonical display order.
    pub platforms: Vec<PlatformScoreSpec>,
}
