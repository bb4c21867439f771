//! Feature identifiers and the static daily-cap table.
//!
//! The table is built once at startup (defaults + `QUOTA_LIMITS` overrides)
//! and shared read-only as `Arc<FeatureLimitTable>`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Every AI-backed operation that is metered per user per day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    ResumeGeneration,
    ResumeTailoring,
    AtsScoring,
    KeywordAnalysis,
    BulletEnhancement,
    SummaryGeneration,
    CoverLetter,
    JobDescriptionParsing,
}

impl Feature {
    pub const ALL: [Feature; 8] = [
        Feature::ResumeGeneration,
        Feature::ResumeTailoring,
        Feature::AtsScoring,
        Feature::KeywordAnalysis,
        Feature::BulletEnhancement,
        Feature::SummaryGeneration,
        Feature::CoverLetter,
        Feature::JobDescriptionParsing,
    ];

    /// Wire identifier, also used as the stored `feature` column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::ResumeGeneration => "resume_generation",
            Feature::ResumeTailoring => "resume_tailoring",
            Feature::AtsScoring => "ats_scoring",
            Feature::KeywordAnalysis => "keyword_analysis",
            Feature::BulletEnhancement => "bullet_enhancement",
            Feature::SummaryGeneration => "summary_generation",
            Feature::CoverLetter => "cover_letter",
            Feature::JobDescriptionParsing => "job_description_parsing",
        }
    }

    fn default_cap(&self) -> u32 {
        match self {
            Feature::ResumeGeneration => 20,
            Feature::ResumeTailoring => 20,
            Feature::AtsScoring => 30,
            Feature::KeywordAnalysis => 30,
            Feature::BulletEnhancement => 50,
            Feature::SummaryGeneration => 20,
            Feature::CoverLetter => 10,
            Feature::JobDescriptionParsing => 30,
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = LimitConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Feature::ALL
            .into_iter()
            .find(|f| f.as_str() == s.trim())
            .ok_or_else(|| LimitConfigError::UnknownFeature(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimitConfigError {
    #[error("unknown feature identifier '{0}'")]
    UnknownFeature(String),

    #[error("no daily limit configured for feature '{0}'")]
    NotConfigured(Feature),

    #[error("daily limit for '{0}' must be a positive integer")]
    ZeroCap(Feature),

    #[error("malformed limit override '{0}', expected feature=cap")]
    Malformed(String),
}

/// Immutable mapping from feature to its daily cap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureLimitTable {
    limits: BTreeMap<Feature, u32>,
}

impl FeatureLimitTable {
    /// The production table. Total over `Feature::ALL`.
    pub fn defaults() -> Self {
        Self {
            limits: Feature::ALL.iter().map(|f| (*f, f.default_cap())).collect(),
        }
    }

    /// Builds a table from explicit entries. Features left out stay unconfigured.
    #[cfg(test)]
    pub fn from_entries(
        entries: impl IntoIterator<Item = (Feature, u32)>,
    ) -> Result<Self, LimitConfigError> {
        let mut limits = BTreeMap::new();
        for (feature, cap) in entries {
            if cap == 0 {
                return Err(LimitConfigError::ZeroCap(feature));
            }
            limits.insert(feature, cap);
        }
        Ok(Self { limits })
    }

    /// Applies `feature=cap` overrides, comma separated. Blank input is a no-op.
    pub fn with_overrides(mut self, overrides: &str) -> Result<Self, LimitConfigError> {
        for pair in overrides.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, cap) = pair
                .split_once('=')
                .ok_or_else(|| LimitConfigError::Malformed(pair.to_string()))?;
            let feature: Feature = name.trim().parse()?;
            let cap: u32 = cap
                .trim()
                .parse()
                .map_err(|_| LimitConfigError::Malformed(pair.to_string()))?;
            if cap == 0 {
                return Err(LimitConfigError::ZeroCap(feature));
            }
            self.limits.insert(feature, cap);
        }
        Ok(self)
    }

    pub fn limit_for(&self, feature: Feature) -> Result<u32, LimitConfigError> {
        self.limits
            .get(&feature)
            .copied()
            .ok_or(LimitConfigError::NotConfigured(feature))
    }

    /// Parses a raw identifier and looks up its cap in one step.
    pub fn resolve(&self, feature_id: &str) -> Result<(Feature, u32), LimitConfigError> {
        let feature: Feature = feature_id.parse()?;
        Ok((feature, self.limit_for(feature)?))
    }

    /// Configured entries in declaration order.
    pub fn entries(&self) -> impl Iterator<Item = (Feature, u32)> + '_ {
        self.limits.iter().map(|(f, cap)| (*f, *cap))
    }
}
