//! Runtime glue: configuration loading, telemetry, and the runner that
//! supervises the forwarder for the lifetime of the process.

pub mod config;
pub mod runner;
pub mod telemetry;
