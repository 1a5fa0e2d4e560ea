//! Model context window limits.
//!
//! Built-in limits for common models plus an optional registry of user
//! overrides loaded from a JSON file.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Known model context window sizes.
pub const KNOWN_MODEL_LIMITS: &[(&str, u32)] = &[
    ("gpt-4o", 128_000),
    ("gpt-4o-mini", 128_000),
    ("gpt-4-turbo", 128_000),
    ("gpt-4-0125-preview", 128_000),
    ("gpt-4-32k", 32_768),
    ("gpt-4", 8_192),
    ("gpt-3.5-turbo", 16_385),
    ("gpt-3.5-turbo-16k", 16_385),
    ("gpt-3.5-turbo-instruct", 4_096),
];

/// Context window assumed for models missing from [`KNOWN_MODEL_LIMITS`].
pub const DEFAULT_MODEL_LIMIT: u32 = 128_000;

/// Maximum context window size for a model identifier.
///
/// Unlisted identifiers get [`DEFAULT_MODEL_LIMIT`]; the lookup has no
/// failure mode.
pub fn max_tokens_for_model(model: &str) -> u32 {
    KNOWN_MODEL_LIMITS
        .iter()
        .find(|(id, _)| *id == model)
        .map(|(_, limit)| *limit)
        .unwrap_or(DEFAULT_MODEL_LIMIT)
}

/// A user-supplied model limit override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelLimit {
    /// Model identifier or substring pattern (e.g. "gpt-4o" matches "gpt-4o-mini")
    pub model_pattern: String,
    /// Maximum context window size in tokens
    pub max_context_tokens: u32,
}

impl ModelLimit {
    pub fn new(model_pattern: impl Into<String>, max_context_tokens: u32) -> Self {
        Self {
            model_pattern: model_pattern.into(),
            max_context_tokens,
        }
    }
}

/// Registry layering user overrides over the built-in limits.
///
/// Overrides come from [`ModelLimitsRegistry::add_limit`] or a JSON file of
/// `ModelLimit` entries (default `~/.bonsai/model_limits.json`).
#[derive(Debug, Clone, Default)]
pub struct ModelLimitsRegistry {
    user_limits: HashMap<String, ModelLimit>,
    config_path: Option<PathBuf>,
}

impl ModelLimitsRegistry {
    /// Registry with built-in limits only.
    pub fn new() -> Self {
        Self {
            user_limits: HashMap::new(),
            config_path: None,
        }
    }

    /// Registry reading overrides from a specific file.
    pub fn with_config_path(path: impl Into<PathBuf>) -> Self {
        Self {
            user_limits: HashMap::new(),
            config_path: Some(path.into()),
        }
    }

    /// Load user overrides from the configured path.
    ///
    /// A missing file is not an error; a malformed one is.
    pub fn load_user_config(&mut self) -> std::io::Result<()> {
        let path = self.config_path.clone().unwrap_or_else(default_config_path);
        if !path.exists() {
            return Ok(());
        }

        let content = std::fs::read_to_string(&path)?;
        let limits: Vec<ModelLimit> = serde_json::from_str(&content).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;

        for limit in limits {
            self.user_limits.insert(limit.model_pattern.clone(), limit);
        }

        tracing::info!(
            "loaded {count} user model limits from {path}",
            count = self.user_limits.len(),
            path = path.display()
        );
        Ok(())
    }

    /// Add an override, replacing any previous one for the same pattern.
    pub fn add_limit(&mut self, limit: ModelLimit) {
        self.user_limits.insert(limit.model_pattern.clone(), limit);
    }

    /// Look up a limit: exact user override, then built-in identifier, then
    /// the longest user pattern that partially matches.
    pub fn get(&self, model: &str) -> Option<ModelLimit> {
        if let Some(limit) = self.user_limits.get(model) {
            return Some(limit.clone());
        }

        if let Some((id, tokens)) = KNOWN_MODEL_LIMITS.iter().find(|(id, _)| *id == model) {
            return Some(ModelLimit::new(*id, *tokens));
        }

        self.user_limits
            .values()
            .filter(|limit| {
                model.contains(limit.model_pattern.as_str())
                    || limit.model_pattern.contains(model)
            })
            .max_by_key(|limit| limit.model_pattern.len())
            .cloned()
    }

    /// Context window for a model, falling back to [`DEFAULT_MODEL_LIMIT`].
    pub fn max_tokens(&self, model: &str) -> u32 {
        self.get(model)
            .map(|limit| limit.max_context_tokens)
            .unwrap_or(DEFAULT_MODEL_LIMIT)
    }
}

/// Default override file path, `~/.bonsai/model_limits.json`.
fn default_config_path() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".bonsai").join("model_limits.json")
}
