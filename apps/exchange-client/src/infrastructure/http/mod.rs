//! Exchange HTTP Adapter
//!
//! Request pipeline with transparent credential renewal, and the typed
//! client built on top of it.

mod api_types;
mod client;
mod error;
mod pipeline;
mod renewal;

pub use api_types::{
    AuthRequest, Candle, CandleInterval, Holding, NewOrder, Order, OrderFilter, OrderSide,
    OrderStatus, Portfolio, PriceQuote, TokenResponse, Trade, TradeFilter, decode, decode_list,
};
pub use client::ExchangeClient;
pub use error::{ApiError, FieldErrors};
pub use pipeline::{ApiRequest, RequestAuth, RequestPipeline, parse_success_body};
pub use renewal::{REFRESH_PATH, RenewalProcedure};
