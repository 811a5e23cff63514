//! Pattern router: file name → log type.
//!
//! Rules are tried in order and the first match wins. A rule that matches
//! moves to the front so runs of same-typed files resolve on the first try.

use grep_matcher::Matcher;
use grep_regex::{RegexMatcher, RegexMatcherBuilder};
use parking_lot::Mutex;
use tracing::trace;

use crate::conf::RoutingConfig;
use crate::error::ConfigError;
use crate::parser::model::LogType;

/// Built-in rules, in initial priority order.
pub const DEFAULT_RULES: &[(&str, LogType)] = &[
    (r"^hyper.*\.(log|txt)$", LogType::DataEngine),
    (r"^(log|tabprotosrv)(_\d+)?.*\.txt$", LogType::Desktop),
    (r"^access.*\.log$", LogType::ProtocolServer),
    (r"^backgrounder.*\.log$", LogType::Backgrounder),
    (r"^(tabadmincontroller|controller).*\.log$", LogType::Controller),
    (r"^netstat.*\.(txt|log)$", LogType::Netstat),
];

pub struct RoutingRule {
    pattern: String,
    matcher: RegexMatcher,
    log_type: LogType,
}

impl RoutingRule {
    /// Case-insensitive match against the file name.
    pub fn new(pattern: &str, log_type: LogType) -> Result<Self, ConfigError> {
        let matcher = RegexMatcherBuilder::new()
            .case_insensitive(true)
            .build(pattern)
            .map_err(|e| ConfigError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            pattern: pattern.to_string(),
            matcher,
            log_type,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn log_type(&self) -> LogType {
        self.log_type
    }

    fn is_match(&self, file_name: &str) -> bool {
        self.matcher.is_match(file_name.as_bytes()).unwrap_or(false)
    }
}

impl std::fmt::Debug for RoutingRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingRule")
            .field("pattern", &self.pattern)
            .field("log_type", &self.log_type)
            .finish()
    }
}

#[derive(Debug)]
pub struct PatternRouter {
    rules: Mutex<Vec<RoutingRule>>,
}

impl PatternRouter {
    pub fn new(rules: Vec<RoutingRule>) -> Self {
        Self {
            rules: Mutex::new(rules),
        }
    }

    pub fn with_default_rules() -> Result<Self, ConfigError> {
        let rules = DEFAULT_RULES
            .iter()
            .map(|(pattern, log_type)| RoutingRule::new(pattern, *log_type))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(rules))
    }

    /// Configured rules, or the built-in table when none are configured.
    pub fn from_config(config: &RoutingConfig) -> Result<Self, ConfigError> {
        if config.rules.is_empty() {
            return Self::with_default_rules();
        }
        let rules = config
            .rules
            .iter()
            .map(|rule| RoutingRule::new(&rule.pattern, rule.log_type))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(rules))
    }

    /// Resolve a file name. The matching rule is promoted to the front; the
    /// others keep their relative order.
    pub fn resolve(&self, file_name: &str) -> Option<LogType> {
        let mut rules = self.rules.lock();
        let position = rules.iter().position(|rule| rule.is_match(file_name))?;
        let log_type = rules[position].log_type;
        if position > 0 {
            rules[..=position].rotate_right(1);
            trace!(file = file_name, from = position, "Promoted routing rule");
        }
        Some(log_type)
    }

    /// Snapshot of the current rule order.
    pub fn rules(&self) -> Vec<(String, LogType)> {
        self.rules
            .lock()
            .iter()
            .map(|rule| (rule.pattern.clone(), rule.log_type))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rules.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.lock().is_empty()
    }
}
