#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Exchange Client - Trading Data-Access Layer
//!
//! Client-side access to a trading exchange backend: authenticated HTTP
//! requests that renew expired sessions transparently, and a live order
//! book feed that prefers a WebSocket push channel and falls back to
//! polling.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and state machines
//!   - `credentials`: Bearer tokens and the access/refresh pair
//!   - `order_book`: Normalized order book snapshots
//!   - `feed`: Live feed state machine and status
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Credential storage and feed transport interfaces
//!   - `services`: Live feed controller
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `config`: Environment configuration and endpoint derivation
//!   - `credentials`: Credential store implementations
//!   - `http`: Request pipeline, renewal and typed API client
//!   - `feed`: WebSocket push connector
//!   - `health`: Backend health monitor
//!
//! # Data Flow
//!
//! ```text
//!                        ┌──────────────────┐
//! Caller ──► Exchange ──►│ Request Pipeline │──► HTTP API
//!            Client      └────────┬─────────┘       ▲
//!                                 │ 401             │
//!                        ┌────────▼─────────┐       │
//!                        │ Renewal (single  │───────┘ token/refresh/
//!                        │  flight)         │
//!                        └────────┬─────────┘
//!                                 ▼
//!                         Credential Store
//!
//!            ┌──────────── poll (2 s) ◄──── HTTP API
//! Live Feed ─┤
//!            └──────────── push ◄────────── WebSocket
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::credentials::{CredentialPair, Token};
pub use domain::feed::{FeedEvent, FeedState, FeedStatus, PollCommand, Transport, TransportError};
pub use domain::order_book::{OrderBookSnapshot, PriceLevel, Side};

// Ports and services
pub use application::ports::{
    CredentialStore, OrderBookSource, PushConnector, PushFrame, PushStream,
};
pub use application::services::{FeedSettings, FeedView, LiveFeedController};

// Configuration
pub use infrastructure::config::{ClientConfig, ConfigError, HealthSettings, HttpSettings};

// Credential stores
pub use infrastructure::credentials::{FileCredentialStore, InMemoryCredentialStore};

// HTTP client
pub use infrastructure::http::{
    ApiError, ApiRequest, ExchangeClient, FieldErrors, RequestAuth, RequestPipeline,
};

// Push channel
pub use infrastructure::feed::WsPushConnector;

// Health monitor
pub use infrastructure::health::{BackendStatus, HealthMonitor};

// Metrics
pub use infrastructure::metrics::{init_metrics, render_metrics};

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
