// FortiOS SDK - a resilient client core for the FortiOS REST API
//
// The transport core lives in `fortios-client`; settings loading and logging
// setup are optional companions enabled through cargo features.

// Re-export core functionality
pub use fortios_client::*;

// Re-export optional crates
#[cfg(feature = "config")]
pub use fortios_config;

#[cfg(feature = "log")]
pub use fortios_log;

/// Build a client from `FORTIOS_*` environment variables.
#[cfg(feature = "config")]
pub fn client_from_env() -> std::result::Result<Client, fortios_config::ConfigError> {
    let manager = fortios_config::ConfigManager::new();
    manager.load_env();
    let config = manager.client_config()?;
    Ok(Client::new(config)?)
}

// Prelude for common imports
pub mod prelude {
    pub use fortios_client::prelude::*;

    #[cfg(feature = "config")]
    pub use fortios_config::{ConfigManager, Settings};

    #[cfg(feature = "log")]
    pub use fortios_log::LogConfig;
}
