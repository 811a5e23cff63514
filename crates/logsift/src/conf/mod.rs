//! Run configuration (model + layered loading).

mod load;
mod model;

pub use model::{
    IngestConfig, LoggingConfig, OutputFormat, PluginsConfig, RoutingConfig, RuleConfig,
    RunConfig, StatusConfig, SummaryConfig, WriterConfig,
};
