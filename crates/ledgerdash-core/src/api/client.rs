//! API client for the banking REST backend.
//!
//! This module provides the `ApiClient` struct for making authenticated
//! requests for accounts, transactions, cards, loans and crypto holdings.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{header, Client, Method, Url};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::config::Config;
use crate::models::{Account, Card, CryptoHolding, Loan, Transaction};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of retries for rate-limited (429) requests.
/// Independent of query-level retries, which see only the final outcome.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Serialize)]
struct FreezeRequest {
    frozen: bool,
}

/// API client for the banking backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            token: None,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let mut client = Self::new(&config.api_base_url, config.request_timeout())?;
        if let Some(token) = &config.api_token {
            client.set_token(token.clone());
        }
        Ok(client)
    }

    /// Set the bearer token for authenticated requests
    pub fn set_token(&mut self, token: String) {
        self.token = Some(token);
    }

    /// Create a new ApiClient with the given token, sharing the connection pool.
    pub fn with_token(&self, token: String) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token: Some(token),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Join percent-encoded path segments onto the base URL.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .with_context(|| format!("Invalid API base URL: {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("API base URL cannot take a path: {}", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn auth_headers(&self) -> Result<header::HeaderMap> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );
        if let Some(ref token) = self.token {
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&format!("Bearer {}", token))?,
            );
        }
        Ok(headers)
    }

    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(response: reqwest::Response) -> Result<Option<reqwest::Response>> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body).into())
        }
    }

    async fn request<T, B>(&self, method: Method, url: Url, body: Option<&B>) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let mut builder = self
                .client
                .request(method.clone(), url.clone())
                .headers(self.auth_headers()?);
            if let Some(body) = body {
                builder = builder.json(body);
            }

            let response = builder
                .send()
                .await
                .map_err(ApiError::from)
                .with_context(|| format!("Failed to send {} request to {}", method, url))?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => {
                    debug!(%method, url = %url, "Request succeeded");
                    return response
                        .json()
                        .await
                        .with_context(|| format!("Failed to parse JSON response from {}", url));
                }
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited.into());
                    }
                    warn!(url = %url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
            }
        }
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        let url = self.endpoint(segments)?;
        self.request::<T, ()>(Method::GET, url, None).await
    }

    async fn post<T: DeserializeOwned, B: Serialize>(&self, segments: &[&str], body: &B) -> Result<T> {
        let url = self.endpoint(segments)?;
        self.request(Method::POST, url, Some(body)).await
    }

    // ===== Data Fetching Methods =====

    pub async fn fetch_accounts(&self) -> Result<Vec<Account>> {
        self.get(&["accounts"]).await.context("Failed to fetch accounts")
    }

    pub async fn fetch_transactions(&self, account_id: &str) -> Result<Vec<Transaction>> {
        self.get(&["accounts", account_id, "transactions"])
            .await
            .with_context(|| format!("Failed to fetch transactions for account {}", account_id))
    }

    pub async fn fetch_cards(&self) -> Result<Vec<Card>> {
        self.get(&["cards"]).await.context("Failed to fetch cards")
    }

    pub async fn fetch_loans(&self) -> Result<Vec<Loan>> {
        self.get(&["loans"]).await.context("Failed to fetch loans")
    }

    pub async fn fetch_crypto_holdings(&self) -> Result<Vec<CryptoHolding>> {
        self.get(&["crypto", "holdings"])
            .await
            .context("Failed to fetch crypto holdings")
    }

    // ===== Writes =====

    /// Freeze or unfreeze a card, returning the card as the server now sees it.
    pub async fn set_card_frozen(&self, card_id: &str, frozen: bool) -> Result<Card> {
        self.post(&["cards", card_id, "freeze"], &FreezeRequest { frozen })
            .await
            .with_context(|| format!("Failed to update freeze state of card {}", card_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> ApiClient {
        ApiClient::new(base_url, Duration::from_secs(5)).expect("Failed to build client")
    }

    #[test]
    fn test_endpoint_joins_segments() {
        let api = client("https://bank.example/api");
        assert_eq!(
            api.endpoint(&["accounts"]).unwrap().as_str(),
            "https://bank.example/api/accounts"
        );

        // Trailing slash on the base is not doubled
        let api = client("https://bank.example/api/");
        assert_eq!(
            api.endpoint(&["crypto", "holdings"]).unwrap().as_str(),
            "https://bank.example/api/crypto/holdings"
        );
    }

    #[test]
    fn test_endpoint_escapes_ids() {
        let api = client("https://bank.example/api");
        assert_eq!(
            api.endpoint(&["accounts", "chk 1/2", "transactions"])
                .unwrap()
                .as_str(),
            "https://bank.example/api/accounts/chk%201%2F2/transactions"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(client("not a url").endpoint(&["cards"]).is_err());
    }

    #[test]
    fn test_auth_headers() {
        let api = client("https://bank.example");
        assert!(api.auth_headers().unwrap().get(header::AUTHORIZATION).is_none());

        let api = api.with_token("secret".into());
        assert_eq!(
            api.auth_headers().unwrap()[header::AUTHORIZATION],
            "Bearer secret"
        );
    }

    #[test]
    fn test_from_config_carries_token() {
        let config = Config {
            api_base_url: "https://bank.example/v2".into(),
            api_token: Some("tok".into()),
            ..Config::default()
        };
        let api = ApiClient::from_config(&config).unwrap();
        assert_eq!(api.base_url(), "https://bank.example/v2");
        assert!(api.auth_headers().unwrap().contains_key(header::AUTHORIZATION));
    }
}
