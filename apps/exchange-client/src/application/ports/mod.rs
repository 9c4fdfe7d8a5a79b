//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `CredentialStore`: Persistence of the access/refresh pair
//! - `OrderBookSource`: One-shot order book fetch used by the poll loop
//! - `PushConnector`: Opens the push channel for one symbol

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::domain::credentials::{CredentialPair, Token};
use crate::domain::feed::TransportError;
use crate::domain::order_book::OrderBookSnapshot;

// =============================================================================
// Credential Store
// =============================================================================

/// Holder of the current credential pair.
///
/// The only state that must survive a restart. Stores perform no validation
/// of token structure.
#[cfg_attr(test, mockall::automock)]
pub trait CredentialStore: Send + Sync {
    /// Current pair, if signed in.
    fn get(&self) -> Option<CredentialPair>;

    /// Replace the stored pair as a whole.
    fn set(&self, pair: CredentialPair);

    /// Forget the stored pair.
    fn clear(&self);

    /// Store `pair` only while the current access token equals `expected`.
    ///
    /// The check and the write are atomic with respect to `set` and `clear`.
    /// Returns whether the pair was stored.
    fn replace_if(&self, expected: &Token, pair: CredentialPair) -> bool;
}

// =============================================================================
// Feed Transports
// =============================================================================

/// Poll-side source of order book snapshots.
#[async_trait]
pub trait OrderBookSource: Send + Sync {
    /// Fetch a full snapshot for a symbol.
    async fn fetch_order_book(&self, symbol: &str) -> Result<OrderBookSnapshot, TransportError>;
}

/// One decoded push-channel message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushFrame {
    /// Symbol named by the message, when it names one.
    pub symbol: Option<String>,
    /// Full replacement snapshot.
    pub snapshot: OrderBookSnapshot,
}

/// Stream of push frames. End of stream means the channel closed.
pub type PushStream = Pin<Box<dyn Stream<Item = Result<PushFrame, TransportError>> + Send>>;

/// Opener of push channels.
///
/// A successful `open` is the channel's open event. Dropping the returned
/// stream closes the channel.
#[async_trait]
pub trait PushConnector: Send + Sync {
    /// Open a push channel for a symbol.
    async fn open(&self, symbol: &str) -> Result<PushStream, TransportError>;
}
