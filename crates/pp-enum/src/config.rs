//! Enumeration settings.

use serde::{Deserialize, Serialize};

/// How a discrete latent site is marginalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnumMode {
    /// The support becomes a factor dimension and is eliminated by the backend.
    Parallel,
    /// The model is replayed once per support value and the replays are
    /// log-sum-exp'ed.
    Sequential,
}

/// Per-site inference options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferConfig {
    /// Enumeration mode; `None` samples the site.
    #[serde(default)]
    pub enumerate: Option<EnumMode>,
}

impl InferConfig {
    /// Enumerate with `mode`.
    pub fn enumerate(mode: EnumMode) -> Self {
        Self { enumerate: Some(mode) }
    }
}

/// Trace-level settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnumConfig {
    /// Deepest allowed plate stack.
    pub max_plate_nesting: usize,
    /// Mode applied to discrete latent sites without an explicit config.
    pub default_enumerate: Option<EnumMode>,
    /// Factor backend name.
    pub backend: String,
}

impl Default for EnumConfig {
    fn default() -> Self {
        Self { max_plate_nesting: 4, default_enumerate: None, backend: "dense".to_string() }
    }
}
