//! Infrastructure layer: record store, work queue, job engine, workers, config.

pub mod config;
pub mod jobs;


pub use config::{ConfigError, ServiceConfig};
