//! Typed exchange API client.
//!
//! One method per backend operation, all routed through the
//! [`RequestPipeline`] so credential renewal stays invisible to callers.

use std::sync::Arc;

use async_trait::async_trait;

use super::api_types::{
    AuthRequest, Candle, CandleInterval, Holding, NewOrder, Order, OrderFilter, Portfolio,
    PriceQuote, TokenResponse, Trade, TradeFilter, decode, decode_list,
};
use super::error::ApiError;
use super::pipeline::{ApiRequest, RequestAuth, RequestPipeline};
use crate::application::ports::{CredentialStore, OrderBookSource};
use crate::domain::credentials::{CredentialPair, Token};
use crate::domain::feed::TransportError;
use crate::domain::order_book::OrderBookSnapshot;

/// Client for the exchange REST API.
#[derive(Debug, Clone)]
pub struct ExchangeClient {
    pipeline: Arc<RequestPipeline>,
}

impl ExchangeClient {
    /// Wrap a request pipeline.
    #[must_use]
    pub const fn new(pipeline: Arc<RequestPipeline>) -> Self {
        Self { pipeline }
    }

    /// Underlying pipeline.
    #[must_use]
    pub const fn pipeline(&self) -> &Arc<RequestPipeline> {
        &self.pipeline
    }

    fn store(&self) -> &Arc<dyn CredentialStore> {
        self.pipeline.credentials()
    }

    // =========================================================================
    // Market Data
    // =========================================================================

    /// Tradable symbols, optionally filtered by a search term.
    pub async fn symbols(&self, query: &str) -> Result<Vec<String>, ApiError> {
        let mut request = ApiRequest::get("symbols/");
        if !query.trim().is_empty() {
            request = request.query("q", query.trim());
        }
        let body = self.pipeline.send(&request, RequestAuth::Optional).await?;
        decode_list(body)
    }

    /// Full order book snapshot for a symbol, normalized.
    pub async fn order_book(&self, symbol: &str) -> Result<OrderBookSnapshot, ApiError> {
        let request = ApiRequest::get("orderbook/").query("symbol", symbol);
        let body = self.pipeline.send(&request, RequestAuth::Optional).await?;
        decode::<OrderBookSnapshot>(body).map(OrderBookSnapshot::normalized)
    }

    /// Latest prices of all symbols.
    pub async fn prices(&self) -> Result<Vec<PriceQuote>, ApiError> {
        let body = self
            .pipeline
            .send(&ApiRequest::get("prices/"), RequestAuth::Optional)
            .await?;
        decode_list(body)
    }

    /// OHLC candles for a symbol.
    pub async fn candles(
        &self,
        symbol: &str,
        interval: CandleInterval,
    ) -> Result<Vec<Candle>, ApiError> {
        let request = ApiRequest::get("candles/")
            .query("symbol", symbol)
            .query("interval", interval.as_str());
        let body = self.pipeline.send(&request, RequestAuth::Optional).await?;
        decode_list(body)
    }

    // =========================================================================
    // Session
    // =========================================================================

    /// Sign in and store the issued credential pair.
    pub async fn sign_in(&self, username: &str, password: &str) -> Result<CredentialPair, ApiError> {
        let request = ApiRequest::post("token/").json(&AuthRequest { username, password })?;
        let body = self.pipeline.send(&request, RequestAuth::Anonymous).await?;
        let response: TokenResponse = decode(body)?;

        let Some(access) = response.access.filter(|a| !a.is_empty()) else {
            return Err(ApiError::RequestFailed {
                status: 200,
                message: response
                    .detail
                    .unwrap_or_else(|| "Invalid credentials".to_string()),
                field_errors: None,
            });
        };

        let pair = CredentialPair {
            access: Token::new(access),
            refresh: response.refresh.filter(|r| !r.is_empty()).map(Token::new),
        };
        self.store().set(pair.clone());
        tracing::info!(username, "Signed in");
        Ok(pair)
    }

    /// Create an account.
    pub async fn register(&self, username: &str, password: &str) -> Result<serde_json::Value, ApiError> {
        let request = ApiRequest::post("register/").json(&AuthRequest { username, password })?;
        self.pipeline.send(&request, RequestAuth::Anonymous).await
    }

    /// Create an account, then sign in with it.
    pub async fn sign_up(&self, username: &str, password: &str) -> Result<CredentialPair, ApiError> {
        self.register(username, password).await?;
        self.sign_in(username, password).await
    }

    /// Forget the stored credentials.
    pub fn sign_out(&self) {
        self.store().clear();
        tracing::info!("Signed out");
    }

    /// Username carried by the stored access token.
    #[must_use]
    pub fn current_user(&self) -> Option<String> {
        self.store().get()?.access.username()
    }

    // =========================================================================
    // Trading
    // =========================================================================

    /// Submit a limit order.
    pub async fn place_order(&self, order: &NewOrder) -> Result<Order, ApiError> {
        let request = ApiRequest::post("orders/").json(order)?;
        let body = self.pipeline.send(&request, RequestAuth::Required).await?;
        decode(body)
    }

    /// Cancel a resting order.
    ///
    /// The id must be a single path segment of ASCII letters, digits, `-`
    /// or `_`; anything else is rejected before a request is made.
    pub async fn cancel_order(&self, order_id: &str) -> Result<serde_json::Value, ApiError> {
        if !is_path_segment(order_id) {
            return Err(ApiError::InvalidRequest(format!("invalid order id {order_id:?}")));
        }
        let request = ApiRequest::post(format!("orders/{order_id}/cancel/"));
        self.pipeline.send(&request, RequestAuth::Required).await
    }

    /// Cash balances.
    pub async fn portfolio(&self) -> Result<Portfolio, ApiError> {
        let body = self
            .pipeline
            .send(&ApiRequest::get("portfolio/"), RequestAuth::Required)
            .await?;
        decode(body)
    }

    /// Positions per symbol.
    pub async fn holdings(&self) -> Result<Vec<Holding>, ApiError> {
        let body = self
            .pipeline
            .send(&ApiRequest::get("holdings/"), RequestAuth::Required)
            .await?;
        decode_list(body)
    }

    /// Own orders matching a filter.
    pub async fn my_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, ApiError> {
        let mut request = ApiRequest::get("orders/");
        if let Some(status) = &filter.status {
            request = request.query("status", status);
        }
        if let Some(symbol) = &filter.symbol {
            request = request.query("symbol", symbol);
        }
        let body = self.pipeline.send(&request, RequestAuth::Required).await?;
        decode_list(body)
    }

    /// Own trades matching a filter.
    pub async fn my_trades(&self, filter: &TradeFilter) -> Result<Vec<Trade>, ApiError> {
        let mut request = ApiRequest::get("trades/");
        if let Some(symbol) = &filter.symbol {
            request = request.query("symbol", symbol);
        }
        let body = self.pipeline.send(&request, RequestAuth::Required).await?;
        decode_list(body)
    }
}

fn is_path_segment(id: &str) -> bool {
    !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_'))
}

#[async_trait]
impl OrderBookSource for ExchangeClient {
    async fn fetch_order_book(&self, symbol: &str) -> Result<OrderBookSnapshot, TransportError> {
        self.order_book(symbol).await.map_err(TransportError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::HttpSettings;
    use crate::infrastructure::credentials::InMemoryCredentialStore;

    fn client(store: Arc<InMemoryCredentialStore>) -> ExchangeClient {
        let pipeline = RequestPipeline::new(&HttpSettings::default(), store).unwrap();
        ExchangeClient::new(Arc::new(pipeline))
    }

    #[test]
    fn order_ids_must_be_single_segments() {
        assert!(is_path_segment("42"));
        assert!(is_path_segment("3f2b-9c_a1"));
        assert!(!is_path_segment(""));
        assert!(!is_path_segment("../portfolio"));
        assert!(!is_path_segment("1/cancel"));
        assert!(!is_path_segment("1?force=true"));
        assert!(!is_path_segment("1%2F2"));
    }

    #[test]
    fn current_user_without_credentials() {
        let client = client(Arc::new(InMemoryCredentialStore::new()));
        assert_eq!(client.current_user(), None);
    }

    #[test]
    fn sign_out_clears_store() {
        let store = Arc::new(InMemoryCredentialStore::with_pair(CredentialPair::new(
            Token::new("a"),
            Token::new("r"),
        )));
        let client = client(Arc::clone(&store));

        client.sign_out();

        assert!(store.get().is_none());
    }
}
