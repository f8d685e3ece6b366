//! Core provisioning logic: types, configuration, planning, execution.

pub mod config;
pub mod envfile;
pub mod error;
pub mod executor;
pub mod parser;
pub mod planner;
pub mod prober;
pub mod resolver;
pub mod state;
pub mod types;
