// =============================================================================
// Binance USD-M Futures client — HMAC-SHA256 signed requests
// =============================================================================
//
// HMAC-SHA256 query signing targeted at the USD-M futures REST surface,
// extended with the retry/backoff/error-classification behaviour the Order
// Executor requires.
//
// SECURITY: the secret key is never logged or serialised. Every signed
// request carries `X-MBX-APIKEY` as a header and a 5000ms recvWindow.
// =============================================================================

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use sha2::Sha256;
use tracing::{debug, instrument, warn};

use crate::error::EngineError;

type HmacSha256 = Hmac<Sha256>;

const RECV_WINDOW: u64 = 5000;

/// Binance error codes that indicate an order-shape violation (filter
/// rejection) rather than a transient or generic client error.
const FILTER_ERROR_CODES: &[i64] = &[-1013, -2010, -4003, -4004, -4164];

/// Capability the Order Executor submits orders through. A trait so tests
/// can substitute an in-memory fake exchange.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn place_order(
        &self,
        symbol: &str,
        side: &str,
        qty_str: &str,
        reduce_only: bool,
    ) -> Result<serde_json::Value, EngineError>;

    async fn fetch_exchange_info(&self) -> Result<serde_json::Value, EngineError>;
}

#[derive(Clone)]
pub struct BinanceFuturesClient {
    secret: String,
    base_url: String,
    client: reqwest::Client,
}

impl BinanceFuturesClient {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>, use_testnet: bool) -> Self {
        let api_key = api_key.into();
        let secret = secret.into();

        let mut headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            headers.insert("X-MBX-APIKEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        let base_url = if use_testnet {
            "https://testnet.binancefuture.com".to_string()
        } else {
            "https://fapi.binance.com".to_string()
        };

        debug!(base_url, "BinanceFuturesClient initialised");

        Self {
            secret,
            base_url,
            client,
        }
    }

    fn sign(&self, query: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }
}

#[async_trait]
impl ExchangeClient for BinanceFuturesClient {
    #[instrument(skip(self), name = "binance::place_order")]
    async fn place_order(
        &self,
        symbol: &str,
        side: &str,
        qty_str: &str,
        reduce_only: bool,
    ) -> Result<serde_json::Value, EngineError> {
        let mut params = format!("symbol={symbol}&side={side}&type=MARKET&quantity={qty_str}");
        if reduce_only {
            params.push_str("&reduceOnly=true");
        }

        let qs = self.signed_query(&params);
        let url = format!("{}/fapi/v1/order?{}", self.base_url, qs);

        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| EngineError::Transient(format!("order request failed: {e}")))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| EngineError::Transient(format!("order response parse failed: {e}")))?;

        if status.is_success() {
            debug!(symbol, side, "order placed successfully");
            return Ok(body);
        }

        Err(classify_error(status, &body))
    }

    #[instrument(skip(self))]
    async fn fetch_exchange_info(&self) -> Result<serde_json::Value, EngineError> {
        let url = format!("{}/fapi/v1/exchangeInfo", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::Transient(format!("exchangeInfo request failed: {e}")))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| EngineError::Transient(format!("exchangeInfo parse failed: {e}")))?;

        if status.is_success() {
            return Ok(body);
        }
        Err(classify_error(status, &body))
    }
}

/// Map an HTTP status + Binance error body into the engine's error taxonomy:
/// 5xx and 429 are retriable (`Transient`); a recognised filter error code is
/// `FilterRejected` (no-retry, signals the caller to refresh the Precision
/// Catalog); any other 4xx is `Rejected` (no-retry, no catalog refresh — the
/// exchange rejected the order for a reason unrelated to order-shape
/// filters).
fn classify_error(status: StatusCode, body: &serde_json::Value) -> EngineError {
    let code = body.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
    let msg = body
        .get("msg")
        .and_then(|m| m.as_str())
        .unwrap_or("unknown exchange error")
        .to_string();

    if status.is_server_error() {
        return EngineError::Transient(format!("exchange {status}: {msg}"));
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        warn!(code, msg = %msg, "exchange rate limit hit, backing off");
        return EngineError::Transient(format!("rate limited ({status}): {msg}"));
    }

    if FILTER_ERROR_CODES.contains(&code) {
        return EngineError::FilterRejected {
            code: code.to_string(),
            msg,
        };
    }

    EngineError::Rejected(format!("non-retriable exchange rejection ({status}, code {code}): {msg}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn server_error_classifies_as_transient() {
        let err = classify_error(StatusCode::INTERNAL_SERVER_ERROR, &json!({"code": -1000, "msg": "oops"}));
        assert!(matches!(err, EngineError::Transient(_)));
    }

    #[test]
    fn rate_limit_classifies_as_transient() {
        let err = classify_error(StatusCode::TOO_MANY_REQUESTS, &json!({"code": -1003, "msg": "too many requests"}));
        assert!(matches!(err, EngineError::Transient(_)));
    }

    #[test]
    fn known_filter_code_classifies_as_filter_rejected() {
        let err = classify_error(StatusCode::BAD_REQUEST, &json!({"code": -1013, "msg": "filter failure: LOT_SIZE"}));
        match err {
            EngineError::FilterRejected { code, .. } => assert_eq!(code, "-1013"),
            other => panic!("expected FilterRejected, got {other:?}"),
        }
    }

    #[test]
    fn unrecognised_4xx_is_rejected_not_filter_rejected() {
        let err = classify_error(StatusCode::FORBIDDEN, &json!({"code": -2015, "msg": "invalid api key"}));
        assert!(matches!(err, EngineError::Rejected(_)));
    }
}
