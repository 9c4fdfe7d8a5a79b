//! Order Book Push Channel
//!
//! WebSocket adapter for the live feed's push transport.

mod codec;
mod push;

pub use codec::{CodecError, OrderBookCodec};
pub use push::WsPushConnector;
