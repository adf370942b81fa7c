use crate::AppState;

pub mod executions;
pub mod flows;
pub mod libraries;
