use std::fmt;

use serde::{Deserialize, Serialize};

/// Broad topic categories a term can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicCategory {
    War,
    Geopolitical,
    Economic,
}

impl TopicCategory {
    pub fn emoji(&self) -> &'static str {
        match self {
            Self::War => "⚡",
            Self::Geopolitical => "🌐",
            Self::Economic => "💱",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::War => "War / conflict",
            Self::Geopolitical => "Geopolitics",
            Self::Economic => "Economic warfare",
        }
    }

    /// Stable lowercase name, as used in term files.
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::War => "war",
            Self::Geopolitical => "geopolitical",
            Self::Economic => "economic",
        }
    }

    /// Case-insensitive parse, accepting a few common spellings.
    pub fn from_variant_name(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "war" | "conflict" | "military" => Some(Self::War),
            "geopolitical" | "geopolitics" => Some(Self::Geopolitical),
            "economic" | "economy" | "economic_warfare" => Some(Self::Economic),
            _ => None,
        }
    }
}

impl fmt::Display for TopicCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.variant_name())
    }
}
