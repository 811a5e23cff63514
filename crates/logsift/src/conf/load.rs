//! Layered config loading from files and environment variables.

use std::path::Path;

use super::model::RunConfig;
use crate::error::ConfigError;

/// Search locations tried in order, each optional.
const CONFIG_PATHS: &[&str] = &["/etc/logsift/logsift", "config/logsift"];

impl RunConfig {
    /// Load configuration.
    /// Priority: Environment Variables > explicit file > search paths > Defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let defaults = config::Config::try_from(&RunConfig::default())?;
        let mut builder = config::Config::builder().add_source(defaults);

        for path in CONFIG_PATHS {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        if let Some(path) = explicit {
            tracing::info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path).required(true));
        }

        // LOGSIFT_PLUGINS__PLUGIN_CONCURRENCY=8, LOGSIFT_PLUGINS__ENABLED=httpd,errors
        builder = builder.add_source(
            config::Environment::with_prefix("LOGSIFT")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("plugins.enabled")
                .try_parsing(true),
        );

        let config: RunConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a standalone TOML document on top of the defaults.
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: RunConfig =
            toml::from_str(raw).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}
