//! Access token renewal.
//!
//! Exchanges the stored refresh token for a new access token. Renewals are
//! serialized; a caller that waited behind another renewal reuses its result
//! instead of issuing a second exchange.

use std::sync::Arc;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::error::ApiError;
use crate::application::ports::CredentialStore;
use crate::domain::credentials::Token;
use crate::infrastructure::metrics::{self, RenewalOutcome};

/// Path of the refresh endpoint relative to the API base.
pub const REFRESH_PATH: &str = "token/refresh/";

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(default)]
    access: Option<String>,
    #[serde(default)]
    refresh: Option<String>,
}

/// Single-flight refresh token exchange.
pub struct RenewalProcedure {
    client: Client,
    endpoint: Url,
    store: Arc<dyn CredentialStore>,
    in_flight: Mutex<()>,
}

impl RenewalProcedure {
    /// Create a renewal procedure posting to `<api_base>/token/refresh/`.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint cannot be derived from the base URL.
    pub fn new(
        client: Client,
        api_base: &Url,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self, ApiError> {
        let endpoint = api_base
            .join(REFRESH_PATH)
            .map_err(|e| ApiError::Network(format!("invalid refresh endpoint: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            store,
            in_flight: Mutex::new(()),
        })
    }

    /// Obtain a fresh access token to replace `stale`.
    ///
    /// Returns the new token, or `None` when there is no refresh token or the
    /// server rejected it. When the stored access token no longer equals
    /// `stale`, the current token is returned without a network call. A
    /// renewed token is only stored if the credentials did not change while
    /// the exchange was in flight; a sign-out in that window stays in effect.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Network` if the refresh endpoint could not be
    /// reached. Stored credentials are left untouched in that case.
    pub async fn renew(&self, stale: Option<&Token>) -> Result<Option<Token>, ApiError> {
        let _guard = self.in_flight.lock().await;

        let current = self.store.get();
        if current.as_ref().map(|pair| &pair.access) != stale {
            tracing::debug!("Credentials changed while waiting, reusing current token");
            metrics::record_renewal(RenewalOutcome::Reused);
            return Ok(current.map(|pair| pair.access));
        }

        let Some(pair) = current else {
            metrics::record_renewal(RenewalOutcome::NoRefreshToken);
            return Ok(None);
        };
        let Some(refresh) = pair.refresh.as_ref() else {
            tracing::debug!("No refresh token stored, cannot renew");
            metrics::record_renewal(RenewalOutcome::NoRefreshToken);
            return Ok(None);
        };

        tracing::debug!(endpoint = %self.endpoint, "Renewing access token");

        let response = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .json(&RefreshRequest {
                refresh: refresh.as_str(),
            })
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Token renewal request failed");
                metrics::record_renewal(RenewalOutcome::Error);
                ApiError::from(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "Refresh token rejected");
            metrics::record_renewal(RenewalOutcome::Rejected);
            return Ok(None);
        }

        let body = response.text().await?;
        let access = serde_json::from_str::<RefreshResponse>(&body)
            .ok()
            .and_then(|r| Some((r.access.filter(|a| !a.is_empty())?, r.refresh)));

        let Some((access, refresh)) = access else {
            tracing::warn!("Refresh response carried no access token");
            metrics::record_renewal(RenewalOutcome::Rejected);
            return Ok(None);
        };

        let access = Token::new(access);
        let refresh = refresh.filter(|r| !r.is_empty()).map(Token::new);
        if !self
            .store
            .replace_if(&pair.access, pair.renewed(access.clone(), refresh))
        {
            tracing::info!("Credentials changed during renewal, discarding renewed token");
            metrics::record_renewal(RenewalOutcome::Superseded);
            return Ok(self.store.get().map(|pair| pair.access));
        }

        tracing::info!("Access token renewed");
        metrics::record_renewal(RenewalOutcome::Success);
        Ok(Some(access))
    }
}

#[cfg(test)]
mod tests {
    use mockall::predicate::always;

    use super::*;
    use crate::application::ports::MockCredentialStore;
    use crate::domain::credentials::CredentialPair;

    fn procedure(store: MockCredentialStore) -> RenewalProcedure {
        let base = Url::parse("http://127.0.0.1:9/api/").unwrap();
        RenewalProcedure::new(Client::new(), &base, Arc::new(store)).unwrap()
    }

    #[test]
    fn endpoint_is_relative_to_base() {
        let p = procedure(MockCredentialStore::new());
        assert_eq!(p.endpoint.as_str(), "http://127.0.0.1:9/api/token/refresh/");
    }

    #[tokio::test]
    async fn without_refresh_token_no_exchange_is_attempted() {
        let mut store = MockCredentialStore::new();
        store
            .expect_get()
            .return_const(Some(CredentialPair::access_only(Token::new("a1"))));
        store.expect_set().with(always()).never();
        store.expect_clear().never();

        let renewed = procedure(store).renew(Some(&Token::new("a1"))).await.unwrap();
        assert_eq!(renewed, None);
    }

    #[tokio::test]
    async fn changed_token_is_reused_without_exchange() {
        let mut store = MockCredentialStore::new();
        store
            .expect_get()
            .return_const(Some(CredentialPair::new(Token::new("a2"), Token::new("r1"))));
        store.expect_set().never();

        let renewed = procedure(store).renew(Some(&Token::new("a1"))).await.unwrap();
        assert_eq!(renewed, Some(Token::new("a2")));
    }
}
