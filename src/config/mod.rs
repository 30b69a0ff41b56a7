//! Client configuration
//!
//! Provides unified configuration with:
//! - Serde defaults for every field
//! - JSON file loading
//! - `SUNVOY_*` environment overrides

pub mod settings;

pub use settings::{ClientConfig, ConfigError, Credentials, Endpoints};
