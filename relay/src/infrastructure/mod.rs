pub mod audit;
pub mod config;
pub mod metrics;
pub mod server;
pub mod telemetry;
