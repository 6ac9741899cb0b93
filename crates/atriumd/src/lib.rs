pub mod api;
pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
pub mod measurements;
pub mod store;
pub mod telemetry;

pub use config::Config;
pub use config::LogLevel;
pub use error::Error;
