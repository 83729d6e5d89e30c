//! Engine configuration, loadable from `accord.toml`

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PolicyError, Result};

/// How alternative compatibility is decided during intersection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntersectionMode {
    /// Every requirement on each side needs a compatible counterpart.
    #[default]
    Strict,
    /// Tolerates partial mismatches. Not implemented; always rejected.
    Lax,
}

impl fmt::Display for IntersectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntersectionMode::Strict => write!(f, "strict"),
            IntersectionMode::Lax => write!(f, "lax"),
        }
    }
}

/// Which stock alternative selector the engine uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorKind {
    /// Fewest requirements.
    #[default]
    Minimal,
    /// Most requirements.
    Maximal,
    /// First supported alternative.
    First,
}

/// Top-level policy engine configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Treat requirements without a registered builder as compatible and
    /// satisfied instead of failing
    #[serde(default)]
    pub ignore_unknown_requirements: bool,

    /// Intersection mode; only `strict` is supported
    #[serde(default)]
    pub intersection: IntersectionMode,

    /// Alternative selection strategy
    #[serde(default)]
    pub selector: SelectorKind,
}

impl PolicyConfig {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| PolicyError::Config(e.to_string()))
    }

    /// Load engine config from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Try to load config, returning default if the file doesn't exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }
}
