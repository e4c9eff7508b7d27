use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Canonical key-pool scopes.
///
/// A scope restricts which credentials may serve a request; it is fixed at
/// configuration time and never changes for a loaded credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Whole-world reads (bulk dumps, arbitrary nation lookups).
    Broad,
    /// Alliance-internal reads (bank, member details).
    Alliance,
    /// Reads bound to the operator's own nation.
    Personal,
    /// In-game message delivery.
    Messaging,
}

impl Scope {
    pub const ALL: [Self; 4] = [Self::Broad, Self::Alliance, Self::Personal, Self::Messaging];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Broad => "broad",
            Self::Alliance => "alliance",
            Self::Personal => "personal",
            Self::Messaging => "messaging",
        }
    }

    /// Environment variable holding this scope's comma-separated key list.
    pub const fn env_var(self) -> &'static str {
        match self {
            Self::Broad => "PNW_BROAD_API_KEYS",
            Self::Alliance => "PNW_ALLIANCE_API_KEYS",
            Self::Personal => "PNW_PERSONAL_API_KEYS",
            Self::Messaging => "PNW_MESSAGING_API_KEYS",
        }
    }
}

impl Display for Scope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "broad" => Ok(Self::Broad),
            "alliance" => Ok(Self::Alliance),
            "personal" => Ok(Self::Personal),
            "messaging" => Ok(Self::Messaging),
            other => Err(format!("unknown scope '{other}'")),
        }
    }
}
