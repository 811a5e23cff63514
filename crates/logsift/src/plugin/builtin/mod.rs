//! Plugins shipped with logsift.

mod data_engine;
mod error_summary;
mod errors;
mod httpd;
mod slow_requests;

pub use data_engine::DataEnginePlugin;
pub use error_summary::ErrorSummaryPlugin;
pub use errors::ErrorsPlugin;
pub use httpd::HttpdPlugin;
pub use slow_requests::SlowRequestsPlugin;

use super::Plugin;
use crate::conf::PluginsConfig;
use crate::error::ConfigError;

/// Built-in plugin names in registration order.
pub const BUILTIN: &[&str] = &[
    httpd::NAME,
    data_engine::NAME,
    errors::NAME,
    error_summary::NAME,
    slow_requests::NAME,
];

fn create(name: &str, config: &PluginsConfig) -> Option<Box<dyn Plugin>> {
    let plugin: Box<dyn Plugin> = match name {
        httpd::NAME => Box::new(HttpdPlugin),
        data_engine::NAME => Box::new(DataEnginePlugin),
        errors::NAME => Box::new(ErrorsPlugin),
        error_summary::NAME => Box::new(ErrorSummaryPlugin::default()),
        slow_requests::NAME => Box::new(SlowRequestsPlugin::new(config.slow_request_ms)),
        _ => return None,
    };
    Some(plugin)
}

/// Instantiate the enabled built-ins (all of them when none are listed).
pub fn from_config(config: &PluginsConfig) -> Result<Vec<Box<dyn Plugin>>, ConfigError> {
    if config.enabled.is_empty() {
        return Ok(BUILTIN.iter().filter_map(|name| create(name, config)).collect());
    }
    config
        .enabled
        .iter()
        .map(|name| {
            create(name.trim(), config).ok_or_else(|| ConfigError::UnknownPlugin(name.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_by_default() {
        let plugins = from_config(&PluginsConfig::default()).unwrap();
        let names: Vec<_> = plugins.iter().map(|p| p.descriptor().name).collect();
        assert_eq!(names, BUILTIN);
    }

    #[test]
    fn test_enabled_subset() {
        let config = PluginsConfig {
            enabled: vec!["errors".into(), " error_summary".into()],
            ..PluginsConfig::default()
        };
        let plugins = from_config(&config).unwrap();
        assert_eq!(plugins.len(), 2);
        assert_eq!(plugins[1].descriptor().dependencies, vec!["errors"]);
    }

    #[test]
    fn test_unknown_plugin() {
        let config = PluginsConfig {
            enabled: vec!["nope".into()],
            ..PluginsConfig::default()
        };
        assert!(matches!(from_config(&config), Err(ConfigError::UnknownPlugin(n)) if n == "nope"));
    }
}
