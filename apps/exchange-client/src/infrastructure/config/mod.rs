//! Configuration Module
//!
//! Configuration loading for the exchange client.

mod settings;

pub use settings::{
    ClientConfig, ConfigError, DEFAULT_API_BASE, DEFAULT_CREDENTIALS_PATH, HealthSettings,
    HttpSettings, LoginCredentials, health_url, normalize_base, order_book_stream_url,
};
