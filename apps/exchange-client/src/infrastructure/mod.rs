//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Environment-driven configuration and URL derivation.
pub mod config;

/// In-memory and file-backed credential stores.
pub mod credentials;

/// Request pipeline, token renewal and the typed exchange client.
pub mod http;

/// WebSocket push channel for the live order book.
pub mod feed;

/// Periodic backend health checks.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing integration.
pub mod telemetry;
