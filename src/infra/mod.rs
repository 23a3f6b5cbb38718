//! Infrastructure: configuration and process-wide operating state

pub mod config;
pub mod ops;

pub use config::Config;
pub use ops::OpsContext;
