//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `LiveFeedController`: Owns the order book subscription lifecycle

mod live_feed;

pub use live_feed::{FeedSettings, FeedView, LiveFeedController};
