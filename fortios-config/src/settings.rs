//! Flat client settings record.
//!
//! Values may arrive as native JSON/TOML types or as strings (environment
//! variables and `.env` files carry only strings); both are accepted.

use fortios_client::{
    CircuitBreakerConfig, ClientConfig, ErrorMode, Mode, RetryConfig,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::validation::{ConfigValidator, Validate};
use crate::{ConfigError, Result};

/// Client settings as read from files and the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub host: String,
    #[serde(deserialize_with = "lenient")]
    pub port: u32,
    pub scheme: String,
    #[serde(deserialize_with = "lenient_flag")]
    pub verify_tls: bool,
    #[serde(deserialize_with = "optional_text")]
    pub vdom: Option<String>,
    #[serde(deserialize_with = "optional_text")]
    pub token: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub timeout_secs: f64,
    #[serde(deserialize_with = "lenient")]
    pub connect_timeout_secs: f64,
    #[serde(deserialize_with = "lenient")]
    pub max_attempts: u32,
    #[serde(deserialize_with = "lenient")]
    pub base_delay_ms: u64,
    #[serde(deserialize_with = "lenient")]
    pub max_delay_ms: u64,
    #[serde(deserialize_with = "lenient")]
    pub jitter: f64,
    #[serde(deserialize_with = "lenient")]
    pub failure_threshold: u32,
    #[serde(deserialize_with = "lenient")]
    pub cooldown_secs: f64,
    #[serde(deserialize_with = "lenient_flag")]
    pub count_client_errors: bool,
    #[serde(deserialize_with = "lenient")]
    pub max_connections: usize,
    #[serde(deserialize_with = "lenient")]
    pub max_keepalive_connections: usize,
    #[serde(deserialize_with = "optional_text")]
    pub user_agent: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub operation_log_capacity: usize,
    /// `raise`, `return` or `print`.
    pub error_mode: String,
    /// `async` or `blocking`.
    pub mode: String,
}

impl Default for Settings {
    fn default() -> Self {
        let client = ClientConfig::default();
        Self {
            host: client.host,
            port: client.port as u32,
            scheme: client.scheme,
            verify_tls: client.verify_tls,
            vdom: None,
            token: None,
            timeout_secs: client.timeout.as_secs_f64(),
            connect_timeout_secs: client.connect_timeout.as_secs_f64(),
            max_attempts: client.retry.max_attempts,
            base_delay_ms: client.retry.base_delay.as_millis() as u64,
            max_delay_ms: client.retry.max_delay.as_millis() as u64,
            jitter: client.retry.jitter,
            failure_threshold: client.circuit_breaker.failure_threshold,
            cooldown_secs: client.circuit_breaker.cooldown.as_secs_f64(),
            count_client_errors: client.circuit_breaker.count_client_errors,
            max_connections: client.max_connections,
            max_keepalive_connections: client.max_keepalive_connections,
            user_agent: None,
            operation_log_capacity: client.operation_log_capacity,
            error_mode: "raise".to_string(),
            mode: "async".to_string(),
        }
    }
}

impl Validate for Settings {
    fn validate(&self) -> Result<()> {
        ConfigValidator::not_empty(&self.host, "host")?;
        ConfigValidator::is_port(self.port, "port")?;
        ConfigValidator::one_of(&self.scheme, &["http", "https"], "scheme")?;
        ConfigValidator::at_least(self.max_attempts, 1, "max_attempts")?;
        ConfigValidator::at_least(self.failure_threshold, 1, "failure_threshold")?;
        ConfigValidator::in_range(self.jitter, 0.0, 1.0, "jitter")?;
        seconds(self.timeout_secs, "timeout_secs")?;
        seconds(self.connect_timeout_secs, "connect_timeout_secs")?;
        seconds(self.cooldown_secs, "cooldown_secs")?;
        if self.timeout_secs == 0.0 {
            return Err(ConfigError::invalid("timeout_secs", "must be greater than zero"));
        }
        ConfigValidator::one_of(&self.error_mode, &["raise", "return", "print"], "error_mode")?;
        ConfigValidator::one_of(&self.mode, &["async", "blocking"], "mode")?;
        Ok(())
    }
}

impl Settings {
    /// Validate and convert into a client configuration.
    pub fn into_client_config(self) -> Result<ClientConfig> {
        self.validate()?;

        let port = u16::try_from(self.port)
            .map_err(|_| ConfigError::invalid("port", "out of range"))?;
        let error_mode = match self.error_mode.to_ascii_lowercase().as_str() {
            "return" => ErrorMode::Return,
            "print" => ErrorMode::Print,
            _ => ErrorMode::Raise,
        };
        let mode = match self.mode.to_ascii_lowercase().as_str() {
            "blocking" => Mode::Blocking,
            _ => Mode::Async,
        };

        let retry = RetryConfig {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: self.jitter,
        };
        let circuit_breaker =
            CircuitBreakerConfig::new(self.failure_threshold, Duration::from_secs_f64(self.cooldown_secs))
                .with_count_client_errors(self.count_client_errors);

        let mut builder = ClientConfig::builder()
            .host(self.host)
            .port(port)
            .scheme(self.scheme.to_ascii_lowercase())
            .verify_tls(self.verify_tls)
            .timeout(Duration::from_secs_f64(self.timeout_secs))
            .connect_timeout(Duration::from_secs_f64(self.connect_timeout_secs))
            .retry(retry)
            .circuit_breaker(circuit_breaker)
            .max_connections(self.max_connections)
            .max_keepalive_connections(self.max_keepalive_connections)
            .operation_log_capacity(self.operation_log_capacity)
            .error_mode(error_mode)
            .mode(mode);
        if let Some(vdom) = self.vdom {
            builder = builder.vdom(vdom);
        }
        if let Some(token) = self.token {
            builder = builder.token(token);
        }
        if let Some(user_agent) = self.user_agent {
            builder = builder.user_agent(user_agent);
        }

        let config = builder.build();
        config.validate()?;
        Ok(config)
    }
}

fn seconds(value: f64, field: &str) -> Result<()> {
    if !value.is_finite() || value < 0.0 || value > u32::MAX as f64 {
        return Err(ConfigError::invalid(field, "must be a non-negative number of seconds"));
    }
    Ok(())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Lenient<T> {
    Native(T),
    Text(String),
}

fn lenient<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: Display,
{
    match Lenient::<T>::deserialize(deserializer)? {
        Lenient::Native(value) => Ok(value),
        Lenient::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn lenient_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Lenient::<bool>::deserialize(deserializer)? {
        Lenient::Native(value) => Ok(value),
        Lenient::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(serde::de::Error::custom(format!("invalid boolean: {}", other))),
        },
    }
}

/// Blank strings count as unset.
fn optional_text<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|v| !v.trim().is_empty()))
}
