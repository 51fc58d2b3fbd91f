//! Settings file loaders.

use crate::{ConfigError, Result};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

/// Supported settings file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Toml,
    Env,
}

impl FileFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "json" => Some(FileFormat::Json),
            "toml" => Some(FileFormat::Toml),
            "env" => Some(FileFormat::Env),
            _ => None,
        }
    }

    /// Detect the format of `path`. A bare `.env` file counts as `Env`.
    pub fn from_path(path: &Path) -> Option<Self> {
        if path.file_name().and_then(|n| n.to_str()) == Some(".env") {
            return Some(FileFormat::Env);
        }
        path.extension()
            .and_then(|s| s.to_str())
            .and_then(Self::from_extension)
    }
}

/// Settings file loader. Every format yields a flat JSON object.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    format: FileFormat,
}

impl ConfigLoader {
    pub fn new(format: FileFormat) -> Self {
        Self { format }
    }

    /// Pick the format from the file name.
    pub fn auto(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        FileFormat::from_path(path).map(Self::new).ok_or_else(|| {
            ConfigError::LoadError(format!("Unsupported settings file: {}", path.display()))
        })
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    /// Load settings from a file.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Map<String, Value>> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ConfigError::LoadError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        self.parse(&content)
    }

    /// Parse settings from a string.
    pub fn parse(&self, content: &str) -> Result<Map<String, Value>> {
        let value = match self.format {
            FileFormat::Json => Self::parse_json(content)?,
            FileFormat::Toml => Self::parse_toml(content)?,
            FileFormat::Env => return Self::parse_env(content),
        };

        match value {
            Value::Object(map) => Ok(map),
            other => Err(ConfigError::ParseError(format!(
                "expected a table of settings, found {}",
                type_name(&other)
            ))),
        }
    }

    fn parse_json(content: &str) -> Result<Value> {
        serde_json::from_str(content)
            .map_err(|e| ConfigError::ParseError(format!("JSON parse error: {}", e)))
    }

    fn parse_toml(content: &str) -> Result<Value> {
        let table: toml::Table = toml::from_str(content)
            .map_err(|e| ConfigError::ParseError(format!("TOML parse error: {}", e)))?;

        serde_json::to_value(table).map_err(|e| ConfigError::SerializationError(e.to_string()))
    }

    fn parse_env(content: &str) -> Result<Map<String, Value>> {
        dotenvy::from_read_iter(content.as_bytes())
            .map(|item| {
                item.map(|(key, value)| (key, Value::String(value)))
                    .map_err(|e| ConfigError::ParseError(format!(".env parse error: {}", e)))
            })
            .collect()
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
