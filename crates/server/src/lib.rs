pub mod api;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod store_factory;
pub mod telemetry;
