//! `engine` crate — core domain models, the flow validator, the
//! scheduler, the executor, the scan-cycle engine, and ambient
//! configuration for the whole engine process.

pub mod config;
pub mod dag;
pub mod error;
pub mod executor;
pub mod models;
pub mod runtime_cache;
pub mod scan;
pub mod validator;

pub use config::{ConfigFileError, EngineConfig};
pub use dag::schedule;
pub use error::EngineError;
pub use executor::{Collaborators, Executor};
pub use models::{Edge, ExecutionRecord, ExecutionStatus, FlowDocument, NodeInstance};
pub use runtime_cache::InMemoryRuntimeCache;
pub use scan::{InputStateManager, ScanEngine, ScanStats};
pub use validator::{validate_for_deploy, validate_for_save, ValidationReport};

#[cfg(test)]
mod executor_tests;
