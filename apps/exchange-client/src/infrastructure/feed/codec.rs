//! Order Book Stream Codec
//!
//! Decodes push-channel text frames into full order book snapshots.
//!
//! Frames are JSON objects carrying `bids` and/or `asks` arrays of
//! `{"price", "total_quantity"}` levels, optionally tagged with `symbol`:
//!
//! ```json
//! {"symbol":"AAPL","bids":[{"price":"101.5","total_quantity":"3"}],"asks":[]}
//! ```
//!
//! A frame carrying only one side replaces the book with an empty other
//! side. Frames are never merged into an earlier snapshot. Malformed levels
//! are dropped individually and the rest of the frame is kept.

use crate::application::ports::PushFrame;
use crate::domain::order_book::{OrderBookSnapshot, PriceLevel};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Valid JSON that is not an order book snapshot.
    #[error("frame carries neither bids nor asks")]
    NotASnapshot,
}

/// JSON codec for order book push frames.
#[derive(Debug, Default, Clone)]
pub struct OrderBookCodec;

impl OrderBookCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one text frame into a normalized snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not JSON or has neither a `bids` nor
    /// an `asks` array.
    pub fn decode(&self, text: &str) -> Result<PushFrame, CodecError> {
        let value: serde_json::Value = serde_json::from_str(text.trim())?;
        let object = value.as_object().ok_or(CodecError::NotASnapshot)?;

        let bids = object.get("bids").filter(|v| v.is_array());
        let asks = object.get("asks").filter(|v| v.is_array());
        if bids.is_none() && asks.is_none() {
            return Err(CodecError::NotASnapshot);
        }

        let bids = levels("bids", bids);
        let asks = levels("asks", asks);

        let symbol = object
            .get("symbol")
            .and_then(serde_json::Value::as_str)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string);

        Ok(PushFrame {
            symbol,
            snapshot: OrderBookSnapshot::from_levels(bids, asks),
        })
    }
}

fn levels(side: &str, value: Option<&serde_json::Value>) -> Vec<PriceLevel> {
    let Some(items) = value.and_then(serde_json::Value::as_array) else {
        return Vec::new();
    };

    let mut dropped = 0_usize;
    let levels = items
        .iter()
        .filter_map(|item| {
            serde_json::from_value::<PriceLevel>(item.clone())
                .inspect_err(|_| dropped += 1)
                .ok()
        })
        .collect();

    if dropped > 0 {
        tracing::warn!(side, dropped, "Dropping malformed price levels from order book frame");
    }
    levels
}
