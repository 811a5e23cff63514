//! logsift: ingest a log set, route files to parsers, run dependency-ordered
//! analysis plugins over the parsed records and record the run.

// Input
pub mod artifact;
pub mod reader;
pub mod router;
pub mod parser;
pub mod ingest;

// Storage and analysis
pub mod store;
pub mod event;
pub mod plugin;
pub mod schedule;
pub mod writer;
pub mod publish;

// Run orchestration
pub mod conf;
pub mod error;
pub mod logging;
pub mod status;
pub mod run;
