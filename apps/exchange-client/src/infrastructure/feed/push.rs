//! WebSocket Push Connector
//!
//! Opens one order book stream per symbol against the exchange's WebSocket
//! endpoint. A reader task owns the socket, decodes text frames and forwards
//! snapshots to the consumer through a bounded channel. Dropping the
//! consumer's stream makes the reader send a Close frame and exit.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Url;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::codec::OrderBookCodec;
use crate::application::ports::{PushConnector, PushFrame, PushStream};
use crate::domain::feed::TransportError;
use crate::infrastructure::config::order_book_stream_url;

/// Frames buffered between the reader task and the consumer.
const DEFAULT_BUFFER: usize = 64;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type FrameSender = mpsc::Sender<Result<PushFrame, TransportError>>;

/// Push connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WsPushConnector {
    api_base: Url,
    codec: OrderBookCodec,
    buffer: usize,
}

impl WsPushConnector {
    /// Create a connector deriving stream URLs from the HTTP API base.
    #[must_use]
    pub const fn new(api_base: Url) -> Self {
        Self {
            api_base,
            codec: OrderBookCodec::new(),
            buffer: DEFAULT_BUFFER,
        }
    }

    /// Set the number of frames buffered ahead of the consumer.
    #[must_use]
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    /// Stream endpoint for a symbol.
    #[must_use]
    pub fn stream_url(&self, symbol: &str) -> Url {
        order_book_stream_url(&self.api_base, symbol)
    }
}

#[async_trait]
impl PushConnector for WsPushConnector {
    async fn open(&self, symbol: &str) -> Result<PushStream, TransportError> {
        let url = self.stream_url(symbol);
        tracing::info!(url = %url, symbol, "Connecting to order book stream");

        let (socket, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Push(e.to_string()))?;

        let (tx, rx) = mpsc::channel(self.buffer);
        tokio::spawn(read_frames(socket, tx, self.codec.clone(), symbol.to_string()));

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

async fn read_frames(mut socket: Socket, tx: FrameSender, codec: OrderBookCodec, symbol: String) {
    loop {
        let message = tokio::select! {
            () = tx.closed() => {
                tracing::debug!(symbol = %symbol, "Consumer dropped, closing order book stream");
                let _ = socket.close(None).await;
                return;
            }
            message = socket.next() => message,
        };

        match message {
            Some(Ok(Message::Text(text))) => match codec.decode(&text) {
                Ok(frame) => {
                    if tx.send(Ok(frame)).await.is_err() {
                        let _ = socket.close(None).await;
                        return;
                    }
                }
                Err(e) => {
                    tracing::debug!(symbol = %symbol, error = %e, "Skipping non-snapshot frame");
                }
            },
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(symbol = %symbol, frame = ?frame, "Order book stream closed by server");
                return;
            }
            Some(Ok(Message::Binary(_))) => {
                tracing::debug!(symbol = %symbol, "Ignoring binary frame");
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::warn!(symbol = %symbol, error = %e, "Order book stream error");
                let _ = tx.send(Err(TransportError::Push(e.to_string()))).await;
                return;
            }
            None => {
                tracing::debug!(symbol = %symbol, "Order book stream ended");
                return;
            }
        }
    }
}
