//! Shared primitive types used across the entire pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Synthetic customer key, assigned sequentially by the identity resolver.
pub type UnifiedId = u64;

/// The canonical run identifier.
pub type RunId = String;

/// Logical name of an input source.
/// Declaration order is the order sources are visited everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    InstallBase,
    Opportunities,
    Projects,
    ServiceCredits,
}

impl SourceKind {
    pub const ALL: [SourceKind; 4] = [
        SourceKind::InstallBase,
        SourceKind::Opportunities,
        SourceKind::Projects,
        SourceKind::ServiceCredits,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::InstallBase    => "install_base",
            Self::Opportunities  => "opportunities",
            Self::Projects       => "projects",
            Self::ServiceCredits => "service_credits",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Customer identifier scheme, fixed per source by configuration.
/// Declaration order is the unified_id assignment order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdScheme {
    FiveDigit,
    NineDigit,
    Unresolved,
}

impl IdScheme {
    pub fn name(&self) -> &'static str {
        match self {
            Self::FiveDigit  => "five_digit",
            Self::NineDigit  => "nine_digit",
            Self::Unresolved => "unresolved",
        }
    }

    /// Expected digit count, if the scheme has one.
    pub fn digit_count(&self) -> Option<usize> {
        match self {
            Self::FiveDigit  => Some(5),
            Self::NineDigit  => Some(9),
            Self::Unresolved => None,
        }
    }
}

/// Ordinal propensity bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Low,
    Medium,
    High,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Low, Tier::Medium, Tier::High];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Low    => "low",
            Self::Medium => "medium",
            Self::High   => "high",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Self::Low    => 0,
            Self::Medium => 1,
            Self::High   => 2,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
