//! Authenticated request pipeline.
//!
//! Every call goes out at most twice: the initial attempt and, after a
//! successful renewal triggered by `401 Unauthorized`, exactly one retry.
//! The retried attempt never renews again, whatever it returns.

use std::fmt;
use std::sync::Arc;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, StatusCode, Url};
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use super::error::ApiError;
use super::renewal::RenewalProcedure;
use crate::application::ports::CredentialStore;
use crate::domain::credentials::Token;
use crate::infrastructure::config::HttpSettings;
use crate::infrastructure::metrics;

// =============================================================================
// Request Description
// =============================================================================

/// How a request authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestAuth {
    /// A credential is mandatory. Without a stored access token the request
    /// goes straight to renewal.
    Required,
    /// Attach the access token when one is stored.
    Optional,
    /// Never attach a credential and never renew. A 401 is an ordinary
    /// failure (bad sign-in credentials, not an expired session).
    Anonymous,
}

/// One call against the exchange API.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<serde_json::Value>,
}

impl ApiRequest {
    /// Create a request for `path`, relative to the API base.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    /// GET request.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// POST request.
    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Append a query parameter.
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Set a JSON body.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Decode` if `body` cannot be represented as JSON.
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        self.body = Some(serde_json::to_value(body).map_err(|e| ApiError::Decode(e.to_string()))?);
        Ok(self)
    }

    /// HTTP method.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Resource path relative to the API base.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Query parameters in insertion order.
    #[must_use]
    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    /// JSON body, if any.
    #[must_use]
    pub const fn body(&self) -> Option<&serde_json::Value> {
        self.body.as_ref()
    }
}

/// Position in the bounded two-attempt sequence.
#[derive(Debug, Clone)]
enum Attempt {
    Initial,
    Renewed(Token),
}

impl Attempt {
    const fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Renewed(_) => "renewed",
        }
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// HTTP pipeline that attaches credentials and renews them transparently.
///
/// Stateless per call apart from the credential store; safe to share and
/// to call concurrently.
pub struct RequestPipeline {
    client: Client,
    api_base: Url,
    store: Arc<dyn CredentialStore>,
    renewal: RenewalProcedure,
}

impl fmt::Debug for RequestPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestPipeline")
            .field("api_base", &self.api_base.as_str())
            .finish_non_exhaustive()
    }
}

impl RequestPipeline {
    /// Create a pipeline for the configured API base.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(settings: &HttpSettings, store: Arc<dyn CredentialStore>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let renewal = RenewalProcedure::new(client.clone(), &settings.api_base, Arc::clone(&store))?;

        Ok(Self {
            client,
            api_base: settings.api_base.clone(),
            store,
            renewal,
        })
    }

    /// API base every request path is resolved against.
    #[must_use]
    pub const fn api_base(&self) -> &Url {
        &self.api_base
    }

    /// Credential store backing this pipeline.
    #[must_use]
    pub const fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Issue a request, renewing the access token once on `401`.
    ///
    /// A successful response with an empty or non-JSON body yields an empty
    /// JSON object.
    ///
    /// # Errors
    ///
    /// - `ApiError::SessionExpired` when authorization was rejected and could
    ///   not be renewed; the credential store has been cleared.
    /// - `ApiError::RequestFailed` for any other non-success status.
    /// - `ApiError::Network` when no response was received.
    pub async fn send(
        &self,
        request: &ApiRequest,
        auth: RequestAuth,
    ) -> Result<serde_json::Value, ApiError> {
        let mut attempt = Attempt::Initial;

        loop {
            let token = match (&attempt, auth) {
                (_, RequestAuth::Anonymous) => None,
                (Attempt::Initial, _) => self.store.get().map(|pair| pair.access),
                (Attempt::Renewed(token), _) => Some(token.clone()),
            };

            if auth == RequestAuth::Required && token.is_none() {
                tracing::debug!(path = %request.path, "No access token, renewing before request");
                attempt = self.renew_or_expire(None).await?;
                continue;
            }

            let (status, body) = self.execute(request, token.as_ref(), &attempt).await?;

            if status == StatusCode::UNAUTHORIZED
                && auth != RequestAuth::Anonymous
                && matches!(attempt, Attempt::Initial)
            {
                tracing::info!(path = %request.path, "Access token rejected, renewing");
                attempt = self.renew_or_expire(token.as_ref()).await?;
                continue;
            }

            if status.is_success() {
                return Ok(parse_success_body(&body));
            }

            return Err(ApiError::from_response(status, &body));
        }
    }

    async fn renew_or_expire(&self, stale: Option<&Token>) -> Result<Attempt, ApiError> {
        if let Some(token) = self.renewal.renew(stale).await? {
            return Ok(Attempt::Renewed(token));
        }

        tracing::warn!("Session expired, clearing credentials");
        self.store.clear();
        metrics::record_session_expired();
        Err(ApiError::SessionExpired)
    }

    async fn execute(
        &self,
        request: &ApiRequest,
        token: Option<&Token>,
        attempt: &Attempt,
    ) -> Result<(StatusCode, String), ApiError> {
        let url = self
            .api_base
            .join(request.path.trim_start_matches('/'))
            .map_err(|e| ApiError::Network(format!("invalid request path {}: {e}", request.path)))?;

        let request_id = Uuid::new_v4();
        let span = tracing::debug_span!(
            "api_request",
            method = %request.method,
            path = %request.path,
            request_id = %request_id,
            attempt = attempt.as_str(),
        );

        async move {
            let mut builder = self
                .client
                .request(request.method.clone(), url)
                .header(CONTENT_TYPE, "application/json")
                .header("X-Request-ID", request_id.to_string());

            if !request.query.is_empty() {
                builder = builder.query(&request.query);
            }
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }
            if let Some(token) = token {
                builder = builder.bearer_auth(token.as_str());
            }

            let response = builder.send().await.map_err(|e| {
                tracing::warn!(error = %e, "Request failed before a response");
                metrics::record_http_request(&request.method, None);
                ApiError::from(e)
            })?;

            let status = response.status();
            metrics::record_http_request(&request.method, Some(status));
            tracing::debug!(status = status.as_u16(), "Response received");

            let body = response.text().await?;
            Ok((status, body))
        }
        .instrument(span)
        .await
    }
}

/// Parse a success body, tolerating empty and malformed payloads.
#[must_use]
pub fn parse_success_body(body: &str) -> serde_json::Value {
    if body.trim().is_empty() {
        return serde_json::Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(body).unwrap_or_else(|e| {
        tracing::debug!(error = %e, "Ignoring unparseable success body");
        serde_json::Value::Object(serde_json::Map::new())
    })
}
