//! Billing service client: pre-authorize, settle, balance, identity.

use async_trait::async_trait;
use chatrelay_models::TokenUsage;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{BillingError, Result};
use crate::http_client::{DEFAULT_TIMEOUT, build_http_client};
use crate::retry::BillingRetryConfig;

/// Machine-readable denial reason returned by pre-authorization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    BalanceNonPositive,
    BalanceBelowThreshold,
    #[serde(untagged)]
    Other(String),
}

impl DenyReason {
    /// Balance-related denials surface as `INSUFFICIENT_BALANCE`; anything
    /// else as `BILLING_DENIED`.
    pub fn is_balance_related(&self) -> bool {
        matches!(self, Self::BalanceNonPositive | Self::BalanceBelowThreshold)
    }
}

/// Result of a pre-authorization call.
#[derive(Debug, Clone, Deserialize)]
pub struct BillingOutcome {
    pub allowed: bool,
    #[serde(default)]
    pub reason: Option<DenyReason>,
    pub balance: f64,
}

/// Settlement action finalizing a pre-authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleAction {
    /// Deduct for a successful generation.
    Commit { usage: TokenUsage, model: String },
    /// Release the reservation.
    Rollback,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BalanceInfo {
    pub balance: f64,
    pub currency_name: String,
    #[serde(default)]
    pub topup_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IdentityRequest {
    pub provider: String,
    pub tenant: String,
    pub external_user_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityInfo {
    pub user_id: String,
    pub is_new: bool,
}

/// Billing service operations, behind a trait so the orchestrator can be
/// exercised against fakes.
#[async_trait]
pub trait BillingApi: Send + Sync {
    /// Check and reserve spending capacity before generation begins.
    async fn preauthorize(&self, user_id: &str) -> Result<BillingOutcome>;

    /// Finalize a pre-authorization, deducting or releasing it.
    async fn settle(&self, user_id: &str, action: SettleAction) -> Result<()>;

    /// Current balance plus display metadata.
    async fn balance(&self, user_id: &str) -> Result<BalanceInfo>;

    /// Map an external identity onto a wallet user id.
    async fn resolve_identity(&self, request: IdentityRequest) -> Result<IdentityInfo>;
}

/// HTTP implementation of [`BillingApi`].
pub struct HttpBillingClient {
    client: Client,
    base_url: String,
    api_key: String,
    retry_config: BillingRetryConfig,
}

#[derive(Serialize)]
struct PreauthorizeBody<'a> {
    user_id: &'a str,
}

#[derive(Serialize)]
struct SettleBody<'a> {
    user_id: &'a str,
    action: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    usage: Option<&'a TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl HttpBillingClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: build_http_client(DEFAULT_TIMEOUT),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            retry_config: BillingRetryConfig::default(),
        }
    }

    pub fn with_retry_config(mut self, config: BillingRetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    /// Run one billing call with retry on 5xx and network errors. Each
    /// attempt carries the api key plus a fresh request correlation id.
    async fn execute<T, F>(&self, operation: &str, build: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let mut last_error = None;

        for attempt in 0..=self.retry_config.max_retries {
            let request = build()
                .header("X-Api-Key", &self.api_key)
                .header("X-Request-Id", uuid::Uuid::new_v4().to_string());

            let error = match request.send().await {
                Ok(response) if response.status().is_success() => {
                    return Ok(response.json().await?);
                }
                Ok(response) => response_to_error(response).await,
                Err(e) => BillingError::Http(e),
            };

            if !error.is_retryable() || attempt == self.retry_config.max_retries {
                return Err(error);
            }

            let delay = self.retry_config.delay_for(attempt + 1);
            tracing::warn!(
                operation,
                attempt = attempt + 1,
                delay_ms = delay.as_millis(),
                %error,
                "Retrying billing request"
            );
            tokio::time::sleep(delay).await;
            last_error = Some(error);
        }

        Err(last_error.unwrap_or_else(|| BillingError::Api {
            status: 0,
            code: None,
            message: format!("Billing {operation} failed after retries"),
        }))
    }
}

#[async_trait]
impl BillingApi for HttpBillingClient {
    async fn preauthorize(&self, user_id: &str) -> Result<BillingOutcome> {
        self.execute("preauthorize", || {
            self.client
                .post(format!("{}/wallet/preauthorize", self.base_url))
                .json(&PreauthorizeBody { user_id })
        })
        .await
    }

    async fn settle(&self, user_id: &str, action: SettleAction) -> Result<()> {
        let (action_name, usage, model) = match &action {
            SettleAction::Commit { usage, model } => ("commit", Some(usage), Some(model.as_str())),
            SettleAction::Rollback => ("rollback", None, None),
        };
        let _: serde_json::Value = self
            .execute("settle", || {
                self.client
                    .post(format!("{}/wallet/settle", self.base_url))
                    .json(&SettleBody {
                        user_id,
                        action: action_name,
                        usage,
                        model,
                    })
            })
            .await?;
        Ok(())
    }

    async fn balance(&self, user_id: &str) -> Result<BalanceInfo> {
        self.execute("balance", || {
            self.client
                .get(format!("{}/wallet/balance", self.base_url))
                .query(&[("user_id", user_id)])
        })
        .await
    }

    async fn resolve_identity(&self, request: IdentityRequest) -> Result<IdentityInfo> {
        self.execute("resolve_identity", || {
            self.client
                .post(format!("{}/identity/resolve", self.base_url))
                .json(&request)
        })
        .await
    }
}

async fn response_to_error(response: reqwest::Response) -> BillingError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();

    let (code, message) = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) => (parsed.code, parsed.message.unwrap_or(body)),
        Err(_) => (None, body),
    };

    BillingError::Api {
        status,
        code,
        message: truncate_error_body(message),
    }
}

/// Truncate error bodies so a misbehaving service cannot flood logs.
/// The cut is moved back to a char boundary so multibyte text cannot panic.
fn truncate_error_body(message: String) -> String {
    const MAX_ERROR_BODY: usize = 512;
    if message.len() <= MAX_ERROR_BODY {
        return message;
    }
    let mut end = MAX_ERROR_BODY;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &message[..end])
}
