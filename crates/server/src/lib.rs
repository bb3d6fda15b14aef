//! Server half of gitgud: configuration, telemetry and the HTTP listener that
//! hosts the git smart HTTP gateway.

pub mod api;
pub mod config;
pub mod metrics_exporter;
pub mod supervisor;
pub mod telemetry;
