//! `db` crate — pure persistence layer.
//!
//! Provides a connection pool, typed row structs, and repository functions
//! for the control database (flows, executions, tag metadata, libraries)
//! and the time-series store (tag values, system metrics). No business
//! logic lives here — `engine` and node implementations reach it only
//! through the `nodes::context::ControlStore`/`TimeSeriesStore` traits that
//! [`repository::control::PgControlStore`] and
//! [`repository::tsdb::PgTimeSeriesStore`] implement.

pub mod error;
pub mod models;
pub mod pool;
pub mod repository;
pub mod rows;

pub use error::DbError;
pub use pool::DbPool;
pub use repository::control;
pub use repository::control::PgControlStore;
pub use repository::tsdb;
pub use repository::tsdb::PgTimeSeriesStore;
