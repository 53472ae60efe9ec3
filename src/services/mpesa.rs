use crate::config::MpesaSettings;
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use serde_json::json;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

const MAX_ATTEMPTS: u32 = 3;
const BASE_DELAY_MS: u64 = 500;
/// Tokens are treated as stale this long before their stated expiry.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Gateway rejected the request: {0}")]
    Rejected(String),
    #[error("Gateway unavailable after {attempts} attempts: {message}")]
    Unavailable { attempts: u32, message: String },
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Unexpected gateway response: {0}")]
    Malformed(String),
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Short-lived OAuth token cache. Concurrent refreshes are harmless: both
/// callers fetch a valid token and the later store wins.
#[derive(Default)]
pub struct TokenCache {
    inner: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn fresh(&self) -> Option<String> {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.as_ref().and_then(|token| {
            (Instant::now() + TOKEN_REFRESH_MARGIN < token.expires_at)
                .then(|| token.value.clone())
        })
    }

    pub fn store(&self, value: String, expires_in: Duration) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(CachedToken {
            value,
            expires_at: Instant::now() + expires_in,
        });
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    // Daraja returns this as a string of seconds.
    expires_in: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StkPushResponse {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResponseCode")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription")]
    pub response_description: String,
    #[serde(rename = "CustomerMessage")]
    pub customer_message: String,
}

/// What an external receipt probe reports about a transaction. Optional
/// fields are matched against the submitter's claim only when present.
#[derive(Debug, Clone)]
pub struct ReceiptRecord {
    pub receipt_number: String,
    pub amount: Option<Decimal>,
    pub phone_number: Option<String>,
    pub checkout_request_id: Option<String>,
}

/// Seam for the manual receipt verifier's last-resort evidence source.
#[async_trait]
pub trait ReceiptLookup: Send + Sync {
    async fn lookup(
        &self,
        receipt_number: &str,
        amount: &Decimal,
        phone_number: &str,
    ) -> Result<Option<ReceiptRecord>, GatewayError>;
}

pub struct MpesaGateway {
    http: reqwest::Client,
    settings: MpesaSettings,
    token_cache: TokenCache,
}

impl MpesaGateway {
    pub fn new(settings: MpesaSettings, token_cache: TokenCache) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
            token_cache,
        }
    }

    /// `Base64(shortcode + passkey + timestamp)`, the push-request password.
    fn password(shortcode: &str, passkey: &str, timestamp: &str) -> String {
        BASE64.encode(format!("{shortcode}{passkey}{timestamp}"))
    }

    /// 14-digit `YYYYMMDDHHmmss` timestamp the password is derived from.
    fn timestamp(at: DateTime<Utc>) -> String {
        at.format("%Y%m%d%H%M%S").to_string()
    }

    /// The gateway only accepts whole-shilling amounts.
    fn gateway_amount(amount: &Decimal) -> i64 {
        amount
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
            .unwrap_or(0)
    }

    fn retry_delay(attempt: u32) -> Duration {
        Duration::from_millis(BASE_DELAY_MS * 2u64.pow(attempt))
    }

    async fn access_token(&self) -> Result<String, GatewayError> {
        if let Some(token) = self.token_cache.fresh() {
            return Ok(token);
        }

        let response = self
            .http
            .get(format!(
                "{}/oauth/v1/generate?grant_type=client_credentials",
                self.settings.base_url
            ))
            .basic_auth(&self.settings.consumer_key, Some(&self.settings.consumer_secret))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GatewayError::Rejected(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let token: TokenResponse = response.json().await?;
        let expires_in = token.expires_in.parse::<u64>().unwrap_or(3599);
        self.token_cache
            .store(token.access_token.clone(), Duration::from_secs(expires_in));

        Ok(token.access_token)
    }

    /// Prompts the payer's handset to authorize `amount`. Transient upstream
    /// failures (5xx, network) are retried with exponential backoff; a 4xx is
    /// never retried and surfaces the gateway's own description.
    pub async fn stk_push(
        &self,
        phone_number: &str,
        amount: &Decimal,
        account_reference: &str,
        description: &str,
    ) -> Result<StkPushResponse, GatewayError> {
        let token = self.access_token().await?;
        let timestamp = Self::timestamp(Utc::now());
        let payload = json!({
            "BusinessShortCode": self.settings.shortcode,
            "Password": Self::password(&self.settings.shortcode, &self.settings.passkey, &timestamp),
            "Timestamp": timestamp,
            "TransactionType": "CustomerPayBillOnline",
            "Amount": Self::gateway_amount(amount),
            "PartyA": phone_number,
            "PartyB": self.settings.shortcode,
            "PhoneNumber": phone_number,
            "CallBackURL": self.settings.callback_url,
            "AccountReference": account_reference,
            "TransactionDesc": description,
        });

        let url = format!("{}/mpesa/stkpush/v1/processrequest", self.settings.base_url);
        let body = self
            .send_with_retry(|| self.http.post(&url).bearer_auth(&token).json(&payload))
            .await?;

        let response: StkPushResponse =
            serde_json::from_value(body).map_err(|e| GatewayError::Malformed(e.to_string()))?;

        if response.response_code != "0" {
            return Err(GatewayError::Rejected(response.response_description));
        }

        Ok(response)
    }

    async fn send_with_retry(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<serde_json::Value, GatewayError> {
        let mut attempt = 0;
        loop {
            let failure = match build().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.json().await.map_err(GatewayError::Network);
                    }
                    let body = response.text().await.unwrap_or_default();
                    if status.is_client_error() {
                        return Err(GatewayError::Rejected(Self::error_description(status, &body)));
                    }
                    format!("upstream returned {status}: {body}")
                }
                Err(e) => format!("request failed: {e}"),
            };

            attempt += 1;
            if attempt >= MAX_ATTEMPTS {
                return Err(GatewayError::Unavailable {
                    attempts: attempt,
                    message: failure,
                });
            }

            let delay = Self::retry_delay(attempt);
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Gateway call failed, retrying: {}",
                failure
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn error_description(status: StatusCode, body: &str) -> String {
        serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|value| {
                value
                    .get("errorMessage")
                    .and_then(|message| message.as_str())
                    .map(String::from)
            })
            .unwrap_or_else(|| format!("gateway returned {status}"))
    }
}

#[async_trait]
impl ReceiptLookup for MpesaGateway {
    async fn lookup(
        &self,
        receipt_number: &str,
        _amount: &Decimal,
        _phone_number: &str,
    ) -> Result<Option<ReceiptRecord>, GatewayError> {
        let token = self.access_token().await?;
        let payload = json!({
            "BusinessShortCode": self.settings.shortcode,
            "TransactionID": receipt_number,
            "PartyA": self.settings.shortcode,
            "IdentifierType": "4",
            "Remarks": "Receipt verification",
        });

        let url = format!("{}/mpesa/transactionstatus/v1/query", self.settings.base_url);
        let body = self
            .send_with_retry(|| self.http.post(&url).bearer_auth(&token).json(&payload))
            .await?;

        let found = body
            .get("ResponseCode")
            .and_then(|code| code.as_str())
            .map(|code| code == "0")
            .unwrap_or(false);
        if !found {
            return Ok(None);
        }

        Ok(Some(ReceiptRecord {
            receipt_number: receipt_number.to_string(),
            amount: body
                .get("Amount")
                .and_then(|amount| amount.as_str())
                .and_then(|amount| amount.parse().ok()),
            phone_number: body
                .get("PhoneNumber")
                .and_then(|phone| phone.as_str())
                .map(String::from),
            checkout_request_id: body
                .get("CheckoutRequestID")
                .and_then(|id| id.as_str())
                .map(String::from),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::str::FromStr;

    #[test]
    fn password_is_base64_of_shortcode_passkey_timestamp() {
        let password = MpesaGateway::password("174379", "secretpass", "20260805143000");
        assert_eq!(password, BASE64.encode("174379secretpass20260805143000"));
    }

    #[test]
    fn timestamp_is_fourteen_digits() {
        let at = Utc.with_ymd_and_hms(2026, 8, 5, 14, 30, 0).unwrap();
        let stamp = MpesaGateway::timestamp(at);
        assert_eq!(stamp, "20260805143000");
        assert_eq!(stamp.len(), 14);
    }

    #[test]
    fn amounts_are_rounded_to_whole_shillings() {
        assert_eq!(MpesaGateway::gateway_amount(&Decimal::from(500)), 500);
        assert_eq!(
            MpesaGateway::gateway_amount(&Decimal::from_str("499.50").unwrap()),
            500
        );
        assert_eq!(
            MpesaGateway::gateway_amount(&Decimal::from_str("499.49").unwrap()),
            499
        );
    }

    #[test]
    fn retry_delay_doubles_per_attempt() {
        assert_eq!(MpesaGateway::retry_delay(1), Duration::from_millis(1000));
        assert_eq!(MpesaGateway::retry_delay(2), Duration::from_millis(2000));
    }

    #[test]
    fn token_cache_expires_within_refresh_margin() {
        let cache = TokenCache::default();
        assert!(cache.fresh().is_none());

        cache.store("token-a".to_string(), Duration::from_secs(3599));
        assert_eq!(cache.fresh().as_deref(), Some("token-a"));

        // A token with less lifetime left than the refresh margin is stale.
        cache.store("token-b".to_string(), Duration::from_secs(10));
        assert!(cache.fresh().is_none());
    }

    #[test]
    fn client_error_description_prefers_gateway_message() {
        let body = r#"{"requestId":"1-1","errorCode":"400.002.02","errorMessage":"Bad Request - Invalid Amount"}"#;
        assert_eq!(
            MpesaGateway::error_description(StatusCode::BAD_REQUEST, body),
            "Bad Request - Invalid Amount"
        );
        assert_eq!(
            MpesaGateway::error_description(StatusCode::BAD_REQUEST, "not json"),
            "gateway returned 400 Bad Request"
        );
    }
}
