//! Domain Layer - Core credential, order book and feed types.
//!
//! Pure types and state machines with no I/O. Everything that talks to the
//! network lives in the infrastructure layer.

/// Bearer tokens and the access/refresh pair.
pub mod credentials;

/// Order book snapshots and price levels.
pub mod order_book;

/// Live feed state machine and consumer-visible status.
pub mod feed;
