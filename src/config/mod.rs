/// Seed catalog definitions and loader
pub mod catalog;

/// Database configuration and connection management
pub mod database;

/// Engine settings and config.toml loading
pub mod settings;

pub use settings::{AppConfig, EngineSettings};
