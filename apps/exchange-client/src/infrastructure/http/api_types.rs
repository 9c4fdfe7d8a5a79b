//! Exchange API request and response types.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use super::error::ApiError;

// =============================================================================
// Requests
// =============================================================================

/// Username/password body for sign-in and registration.
#[derive(Debug, Clone, Serialize)]
pub struct AuthRequest<'a> {
    /// Account name.
    pub username: &'a str,
    /// Account password.
    pub password: &'a str,
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    /// Buy.
    #[serde(alias = "buy")]
    Buy,
    /// Sell.
    #[serde(alias = "sell")]
    Sell,
}

impl OrderSide {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limit order submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewOrder {
    /// Symbol to trade.
    pub symbol: String,
    /// Buy or sell.
    pub side: OrderSide,
    /// Limit price.
    pub price: Decimal,
    /// Quantity.
    pub quantity: Decimal,
}

impl NewOrder {
    /// Create a new limit order.
    #[must_use]
    pub fn new(symbol: impl Into<String>, side: OrderSide, price: Decimal, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            price,
            quantity,
        }
    }
}

/// Filter for listing own orders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderFilter {
    /// Comma separated statuses, e.g. `OPEN,PARTIAL`.
    pub status: Option<String>,
    /// Restrict to one symbol.
    pub symbol: Option<String>,
}

impl OrderFilter {
    /// Orders still resting on the book.
    #[must_use]
    pub fn open() -> Self {
        Self {
            status: Some("OPEN,PARTIAL".to_string()),
            symbol: None,
        }
    }

    /// Restrict to one symbol.
    #[must_use]
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }
}

/// Filter for listing own trades.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TradeFilter {
    /// Restrict to one symbol.
    pub symbol: Option<String>,
}

/// Candle aggregation interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CandleInterval {
    /// One minute.
    OneMinute,
    /// Five minutes.
    #[default]
    FiveMinutes,
    /// Fifteen minutes.
    FifteenMinutes,
    /// One hour.
    OneHour,
    /// One day.
    OneDay,
}

impl CandleInterval {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OneMinute => "1min",
            Self::FiveMinutes => "5min",
            Self::FifteenMinutes => "15min",
            Self::OneHour => "1h",
            Self::OneDay => "1day",
        }
    }

    /// Parse a wire name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1min" => Some(Self::OneMinute),
            "5min" => Some(Self::FiveMinutes),
            "15min" => Some(Self::FifteenMinutes),
            "1h" => Some(Self::OneHour),
            "1day" => Some(Self::OneDay),
            _ => None,
        }
    }
}

impl fmt::Display for CandleInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Responses
// =============================================================================

/// Token pair returned by sign-in.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// Access token.
    #[serde(default)]
    pub access: Option<String>,
    /// Refresh token.
    #[serde(default)]
    pub refresh: Option<String>,
    /// Error detail when sign-in was refused with a success status.
    #[serde(default)]
    pub detail: Option<String>,
}

/// Latest traded price of one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PriceQuote {
    /// Symbol.
    #[serde(deserialize_with = "symbol_name")]
    pub symbol: String,
    /// Last price.
    pub price: Decimal,
    /// When the price was last updated.
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    /// Resting, nothing filled.
    Open,
    /// Partially filled, remainder resting.
    Partial,
    /// Completely filled.
    Filled,
    /// Cancelled before completion.
    #[serde(alias = "CANCELED")]
    Cancelled,
    /// Status this client does not know.
    #[serde(other)]
    Unknown,
}

impl OrderStatus {
    /// Whether the order can still be cancelled.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open | Self::Partial)
    }
}

/// An order owned by the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawOrder")]
pub struct Order {
    /// Server-assigned identifier.
    pub id: String,
    /// Symbol.
    pub symbol: String,
    /// Buy or sell.
    pub side: OrderSide,
    /// Limit price.
    pub price: Decimal,
    /// Original quantity.
    pub quantity: Decimal,
    /// Quantity filled so far.
    pub filled_quantity: Decimal,
    /// Quantity still resting.
    pub remaining_quantity: Decimal,
    /// Lifecycle status.
    pub status: OrderStatus,
    /// Submission time.
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct RawOrder {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    #[serde(default)]
    symbol: Option<SymbolField>,
    #[serde(default)]
    symbol_name: Option<String>,
    side: OrderSide,
    price: Decimal,
    quantity: Decimal,
    #[serde(default)]
    filled_quantity: Option<Decimal>,
    #[serde(default)]
    remaining_quantity: Option<Decimal>,
    status: OrderStatus,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    created_at: Option<DateTime<Utc>>,
}

impl From<RawOrder> for Order {
    fn from(raw: RawOrder) -> Self {
        let filled_quantity = raw.filled_quantity.unwrap_or_default();
        Self {
            id: raw.id,
            symbol: resolve_symbol(raw.symbol, raw.symbol_name),
            side: raw.side,
            price: raw.price,
            quantity: raw.quantity,
            filled_quantity,
            remaining_quantity: raw
                .remaining_quantity
                .unwrap_or(raw.quantity - filled_quantity),
            status: raw.status,
            created_at: raw.created_at,
        }
    }
}

/// An execution involving the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawTrade")]
pub struct Trade {
    /// Server-assigned identifier.
    pub id: String,
    /// Symbol.
    pub symbol: String,
    /// The user's side of the trade, when reported.
    pub side: Option<OrderSide>,
    /// Execution price.
    pub price: Decimal,
    /// Executed quantity.
    pub quantity: Decimal,
    /// Execution time.
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct RawTrade {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    #[serde(default)]
    symbol: Option<SymbolField>,
    #[serde(default)]
    symbol_name: Option<String>,
    #[serde(default)]
    side: Option<OrderSide>,
    price: Decimal,
    quantity: Decimal,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    created_at: Option<DateTime<Utc>>,
}

impl From<RawTrade> for Trade {
    fn from(raw: RawTrade) -> Self {
        Self {
            id: raw.id,
            symbol: resolve_symbol(raw.symbol, raw.symbol_name),
            side: raw.side,
            price: raw.price,
            quantity: raw.quantity,
            created_at: raw.created_at,
        }
    }
}

/// Position in one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Holding {
    /// Symbol.
    #[serde(deserialize_with = "symbol_name")]
    pub symbol: String,
    /// Quantity free to sell.
    #[serde(default)]
    pub available_quantity: Decimal,
    /// Quantity reserved by open sell orders.
    #[serde(default)]
    pub reserved_quantity: Decimal,
}

impl Holding {
    /// Available plus reserved quantity.
    #[must_use]
    pub fn total_quantity(&self) -> Decimal {
        self.available_quantity + self.reserved_quantity
    }
}

/// Cash balances of the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Portfolio {
    /// Cash free to spend.
    #[serde(default)]
    pub available_balance: Decimal,
    /// Cash reserved by open buy orders.
    #[serde(default)]
    pub reserved_balance: Decimal,
}

impl Portfolio {
    /// Available plus reserved cash.
    #[must_use]
    pub fn total_balance(&self) -> Decimal {
        self.available_balance + self.reserved_balance
    }
}

/// One OHLC bar.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Candle {
    /// Bar open time.
    pub time: DateTime<Utc>,
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close price.
    pub close: Decimal,
    /// Traded volume, when reported.
    #[serde(default)]
    pub volume: Option<Decimal>,
}

// =============================================================================
// Decoding Helpers
// =============================================================================

#[derive(Deserialize)]
#[serde(untagged)]
enum SymbolField {
    Name(String),
    Object { name: String },
    #[allow(dead_code)]
    Other(serde::de::IgnoredAny),
}

fn resolve_symbol(symbol: Option<SymbolField>, symbol_name: Option<String>) -> String {
    match symbol {
        Some(SymbolField::Name(name) | SymbolField::Object { name }) if !name.is_empty() => name,
        _ => symbol_name.unwrap_or_default(),
    }
}

fn symbol_name<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let field = SymbolField::deserialize(deserializer)?;
    Ok(resolve_symbol(Some(field), None))
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

fn lenient_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }))
}

/// Decode a list endpoint body: a bare array, or an envelope carrying the
/// list under `results`, `orders` or `trades`.
///
/// # Errors
///
/// Returns `ApiError::Decode` if no list is found or an item does not match.
pub fn decode_list<T: DeserializeOwned>(body: serde_json::Value) -> Result<Vec<T>, ApiError> {
    let items = match body {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut map) => ["results", "orders", "trades"]
            .iter()
            .find_map(|key| match map.remove(*key) {
                Some(serde_json::Value::Array(items)) => Some(items),
                _ => None,
            })
            .ok_or_else(|| ApiError::Decode("expected a list or a paginated envelope".to_string()))?,
        other => {
            return Err(ApiError::Decode(format!("expected a list, got {other}")));
        }
    };

    items
        .into_iter()
        .map(|item| serde_json::from_value(item).map_err(|e| ApiError::Decode(e.to_string())))
        .collect()
}

/// Decode a single object body.
///
/// # Errors
///
/// Returns `ApiError::Decode` if the body does not match `T`.
pub fn decode<T: DeserializeOwned>(body: serde_json::Value) -> Result<T, ApiError> {
    serde_json::from_value(body).map_err(|e| ApiError::Decode(e.to_string()))
}
