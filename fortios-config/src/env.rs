//! Environment variable loading.

use crate::{ConfigError, Result};
use std::collections::BTreeMap;
use std::env;

/// Prefix of every variable the client reads.
pub const DEFAULT_PREFIX: &str = "FORTIOS";

/// Loads `PREFIX_KEY` variables as lower-cased `key` settings.
#[derive(Debug, Clone)]
pub struct EnvLoader {
    prefix: Option<String>,
}

impl EnvLoader {
    /// Create a new environment loader
    pub fn new(prefix: Option<String>) -> Self {
        Self { prefix }
    }

    /// Loader for the `FORTIOS_` prefix.
    pub fn fortios() -> Self {
        Self::new(Some(DEFAULT_PREFIX.to_string()))
    }

    /// Map a variable name to its settings key, or `None` when the name
    /// lacks the prefix.
    pub fn settings_key(&self, name: &str) -> Option<String> {
        match &self.prefix {
            Some(prefix) => name
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix('_'))
                .filter(|rest| !rest.is_empty())
                .map(str::to_lowercase),
            None => Some(name.to_lowercase()),
        }
    }

    /// Load every matching environment variable.
    pub fn load(&self) -> BTreeMap<String, String> {
        env::vars()
            .filter_map(|(name, value)| self.settings_key(&name).map(|key| (key, value)))
            .collect()
    }

    /// Load a specific environment variable
    pub fn load_var(&self, key: &str) -> Result<String> {
        let full_key = match &self.prefix {
            Some(prefix) => format!("{}_{}", prefix, key.to_uppercase()),
            None => key.to_uppercase(),
        };

        env::var(&full_key).map_err(ConfigError::EnvError)
    }

    /// Load with default value
    pub fn load_var_or(&self, key: &str, default: &str) -> String {
        self.load_var(key).unwrap_or_else(|_| default.to_string())
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self::fortios()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_key() {
        let loader = EnvLoader::fortios();
        assert_eq!(loader.settings_key("FORTIOS_HOST").as_deref(), Some("host"));
        assert_eq!(
            loader.settings_key("FORTIOS_MAX_ATTEMPTS").as_deref(),
            Some("max_attempts")
        );
        assert_eq!(loader.settings_key("FORTIOSX_HOST"), None);
        assert_eq!(loader.settings_key("FORTIOS_"), None);
        assert_eq!(loader.settings_key("HOME"), None);

        let bare = EnvLoader::new(None);
        assert_eq!(bare.settings_key("HOME").as_deref(), Some("home"));
    }

    #[test]
    fn test_env_loader_with_default() {
        let loader = EnvLoader::fortios();
        let value = loader.load_var_or("NONEXISTENT_VAR_12345", "default");

        assert_eq!(value, "default");
    }

    #[test]
    fn test_env_loader_missing_var() {
        let loader = EnvLoader::new(Some("FORTIOS_TEST".to_string()));
        assert!(loader.load_var("MISSING_VAR_67890").is_err());
    }
}
