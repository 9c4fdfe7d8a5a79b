//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (credential storage, feed transports).
pub mod ports;

/// Application services (live order book feed).
pub mod services;
