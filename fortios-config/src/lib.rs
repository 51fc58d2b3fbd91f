//! Settings loading for the FortiOS client.
//!
//! Sources are merged into one key/value store, later sources overriding
//! earlier ones, then deserialized into [`Settings`] and validated.
//!
//! ```rust,no_run
//! use fortios_config::ConfigManager;
//!
//! # fn main() -> fortios_config::Result<()> {
//! let manager = ConfigManager::new();
//! manager.load_file("fortios.toml")?;
//! manager.load_env();
//! let config = manager.client_config()?;
//! # Ok(())
//! # }
//! ```

pub mod env;
pub mod error;
pub mod loader;
pub mod settings;
pub mod validation;

pub use env::{DEFAULT_PREFIX, EnvLoader};
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};
pub use settings::Settings;
pub use validation::{ConfigValidator, Validate};

use fortios_client::ClientConfig;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

/// Layered settings store.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: Arc<RwLock<HashMap<String, Value>>>,
    env: EnvLoader,
}

impl ConfigManager {
    /// Create a manager reading `FORTIOS_*` variables.
    pub fn new() -> Self {
        Self::with_env(EnvLoader::fortios())
    }

    /// Create with a custom environment variable prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self::with_env(EnvLoader::new(Some(prefix.into())))
    }

    fn with_env(env: EnvLoader) -> Self {
        Self {
            config: Arc::new(RwLock::new(HashMap::new())),
            env,
        }
    }

    /// Load prefixed environment variables.
    pub fn load_env(&self) {
        let vars = self.env.load();
        let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
        for (key, value) in vars {
            config.insert(key, Value::String(value));
        }
    }

    /// Load prefixed variables from a `.env` file without touching the
    /// process environment.
    pub fn load_dotenv(&self, path: impl AsRef<Path>) -> Result<()> {
        let entries = ConfigLoader::new(FileFormat::Env).load_file(path)?;
        let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
        for (name, value) in entries {
            if let Some(key) = self.env.settings_key(&name) {
                config.insert(key, value);
            }
        }
        Ok(())
    }

    /// Load a JSON, TOML or `.env` file, picking the format from its name.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let loader = ConfigLoader::auto(path)?;
        if loader.format() == FileFormat::Env {
            return self.load_dotenv(path);
        }
        let data = loader.load_file(path)?;
        self.extend(data);
        Ok(())
    }

    /// Load settings from a string in the given format.
    pub fn load_str(&self, content: &str, format: FileFormat) -> Result<()> {
        let data = ConfigLoader::new(format).parse(content)?;
        match format {
            FileFormat::Env => {
                let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
                for (name, value) in data {
                    if let Some(key) = self.env.settings_key(&name) {
                        config.insert(key, value);
                    }
                }
            }
            _ => self.extend(data),
        }
        Ok(())
    }

    fn extend(&self, data: serde_json::Map<String, Value>) {
        let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
        for (key, value) in data {
            config.insert(key, value);
        }
    }

    /// Set a configuration value
    pub fn set<T: serde::Serialize>(&self, key: &str, value: T) -> Result<()> {
        let json_value = serde_json::to_value(value)
            .map_err(|e| ConfigError::SerializationError(e.to_string()))?;

        let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
        config.insert(key.to_string(), json_value);

        Ok(())
    }

    /// Get a configuration value
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let config = self.config.read().unwrap_or_else(PoisonError::into_inner);

        let value = config
            .get(key)
            .ok_or_else(|| ConfigError::KeyNotFound(key.to_string()))?;

        serde_json::from_value(value.clone())
            .map_err(|e| ConfigError::DeserializationError(format!("{}: {}", key, e)))
    }

    /// Get a configuration value with default
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    /// Get a string value
    pub fn get_string(&self, key: &str) -> Result<String> {
        self.get(key)
    }

    /// Check if a key exists
    pub fn has(&self, key: &str) -> bool {
        let config = self.config.read().unwrap_or_else(PoisonError::into_inner);
        config.contains_key(key)
    }

    /// Get all configuration keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let config = self.config.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<String> = config.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Merge configuration from another manager; its values win.
    pub fn merge(&self, other: &ConfigManager) {
        let other_config = other
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        self.extend(other_config.into_iter().collect());
    }

    /// Deserialize the whole store and validate it.
    pub fn load_validated<T: DeserializeOwned + Validate>(&self) -> Result<T> {
        let json_value = {
            let config = self.config.read().unwrap_or_else(PoisonError::into_inner);
            Value::Object(config.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        };

        let validated: T = serde_json::from_value(json_value)
            .map_err(|e| ConfigError::DeserializationError(e.to_string()))?;

        validated.validate()?;

        Ok(validated)
    }

    /// Validated client settings.
    pub fn settings(&self) -> Result<Settings> {
        self.load_validated()
    }

    /// Client configuration built from the merged settings.
    pub fn client_config(&self) -> Result<ClientConfig> {
        self.settings()?.into_client_config()
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let manager = ConfigManager::new();
        manager.set("host", "fw1").unwrap();

        let value: String = manager.get("host").unwrap();
        assert_eq!(value, "fw1");
        assert!(matches!(manager.get::<String>("port"), Err(ConfigError::KeyNotFound(_))));
    }

    #[test]
    fn test_get_or_default() {
        let manager = ConfigManager::new();

        let value: u32 = manager.get_or("port", 443);
        assert_eq!(value, 443);
    }

    #[test]
    fn test_later_sources_win() {
        let manager = ConfigManager::new();
        manager
            .load_str("host = \"from-toml\"\nport = 8443\n", FileFormat::Toml)
            .unwrap();
        manager
            .load_str(r#"{"host": "from-json"}"#, FileFormat::Json)
            .unwrap();

        assert_eq!(manager.get_string("host").unwrap(), "from-json");
        assert_eq!(manager.get::<u32>("port").unwrap(), 8443);
    }

    #[test]
    fn test_env_content_uses_prefix() {
        let manager = ConfigManager::new();
        manager
            .load_str("FORTIOS_HOST=fw2\nOTHER_HOST=ignored\n", FileFormat::Env)
            .unwrap();

        assert_eq!(manager.keys(), vec!["host".to_string()]);
    }

    #[test]
    fn test_merge() {
        let base = ConfigManager::new();
        base.set("host", "base").unwrap();
        base.set("vdom", "root").unwrap();

        let overlay = ConfigManager::new();
        overlay.set("host", "overlay").unwrap();
        base.merge(&overlay);

        assert_eq!(base.get_string("host").unwrap(), "overlay");
        assert_eq!(base.get_string("vdom").unwrap(), "root");
    }

    #[test]
    fn test_client_config() {
        let manager = ConfigManager::new();
        manager.set("host", "192.0.2.7").unwrap();
        manager.set("port", "10443").unwrap();
        manager.set("max_attempts", 4).unwrap();

        let config = manager.client_config().unwrap();
        assert_eq!(config.host, "192.0.2.7");
        assert_eq!(config.port, 10443);
        assert_eq!(config.retry.max_attempts, 4);

        manager.set("port", 99999).unwrap();
        assert!(matches!(
            manager.client_config(),
            Err(ConfigError::ValidationError { .. })
        ));
    }
}
