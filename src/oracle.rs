// =============================================================================
// Model Oracle — prediction/outcome capability boundary
// =============================================================================
//
// The online-learning trainer itself is out of scope; this module is only
// the plumbing to it. `ModelOracle` is the capability trait the engine calls
// through; `HttpOracleClient` is the production adapter talking to an
// external trainer process, `NullOracle` is a deterministic test double.
// A bounded channel decouples `submit_outcome` from the hot dispatch loop.
// =============================================================================

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{instrument, warn};

use crate::position::Outcome;
use crate::types::Side;

/// Budget the dispatch loop allows a prediction call before falling back to
/// a neutral default.
pub const PREDICT_TIMEOUT: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub side: Option<Side>,
    pub confidence: f64,
}

impl Prediction {
    pub fn hold() -> Self {
        Self {
            side: None,
            confidence: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StopTake {
    pub stop_pct: f64,
    pub take_pct: f64,
}

/// Capability boundary to the external model/trainer. Every method is
/// infallible from the caller's perspective — failures are absorbed into a
/// safe default by the adapter, never propagated as an `EngineError`.
#[async_trait]
pub trait ModelOracle: Send + Sync {
    async fn predict(&self, symbol: &str, features: &[f64]) -> Prediction;
    async fn dynamic_stop_take(
        &self,
        symbol: &str,
        entry_price: f64,
        side: Side,
        features: &[f64],
        confidence: f64,
    ) -> StopTake;
    async fn submit_outcome(&self, outcome: &Outcome);
}

/// Production adapter: calls out to an external trainer process over HTTP.
pub struct HttpOracleClient {
    base_url: String,
    http: reqwest::Client,
    fallback_stop_take: StopTake,
}

impl HttpOracleClient {
    pub fn new(base_url: impl Into<String>, fallback_stop_take: StopTake) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
            fallback_stop_take,
        }
    }

    #[instrument(skip(self, features))]
    async fn predict_inner(&self, symbol: &str, features: &[f64]) -> anyhow::Result<Prediction> {
        let resp = self
            .http
            .post(format!("{}/predict", self.base_url))
            .json(&serde_json::json!({ "symbol": symbol, "features": features }))
            .send()
            .await?
            .error_for_status()?
            .json::<Prediction>()
            .await?;
        Ok(resp)
    }

    #[instrument(skip(self, features))]
    async fn dynamic_stop_take_inner(
        &self,
        symbol: &str,
        entry_price: f64,
        side: Side,
        features: &[f64],
        confidence: f64,
    ) -> anyhow::Result<StopTake> {
        let resp = self
            .http
            .post(format!("{}/stop_take", self.base_url))
            .json(&serde_json::json!({
                "symbol": symbol,
                "entry_price": entry_price,
                "side": side,
                "features": features,
                "confidence": confidence,
            }))
            .send()
            .await?
            .error_for_status()?
            .json::<StopTake>()
            .await?;
        Ok(resp)
    }
}

#[async_trait]
impl ModelOracle for HttpOracleClient {
    async fn predict(&self, symbol: &str, features: &[f64]) -> Prediction {
        match tokio::time::timeout(PREDICT_TIMEOUT, self.predict_inner(symbol, features)).await {
            Ok(Ok(prediction)) => prediction,
            Ok(Err(e)) => {
                warn!(symbol, error = %e, "oracle predict failed, falling back to Hold");
                Prediction::hold()
            }
            Err(_) => {
                warn!(symbol, "oracle predict exceeded timeout, falling back to Hold");
                Prediction::hold()
            }
        }
    }

    async fn dynamic_stop_take(
        &self,
        symbol: &str,
        entry_price: f64,
        side: Side,
        features: &[f64],
        confidence: f64,
    ) -> StopTake {
        match tokio::time::timeout(
            PREDICT_TIMEOUT,
            self.dynamic_stop_take_inner(symbol, entry_price, side, features, confidence),
        )
        .await
        {
            Ok(Ok(st)) => st,
            Ok(Err(e)) => {
                warn!(symbol, error = %e, "oracle stop/take failed, using fallback clamp range");
                self.fallback_stop_take
            }
            Err(_) => {
                warn!(symbol, "oracle stop/take exceeded timeout, using fallback clamp range");
                self.fallback_stop_take
            }
        }
    }

    #[instrument(skip(self, outcome))]
    async fn submit_outcome(&self, outcome: &Outcome) {
        if let Err(e) = self
            .http
            .post(format!("{}/outcome", self.base_url))
            .json(outcome)
            .send()
            .await
        {
            warn!(symbol = %outcome.symbol, error = %e, "failed to submit outcome to oracle");
        }
    }
}

/// Deterministic test double: fixed confidence/Hold prediction, a fixed
/// clamp-range stop/take, and a no-op `submit_outcome`. Used in tests and
/// whenever no trainer endpoint is configured.
pub struct NullOracle {
    pub fixed_prediction: Prediction,
    pub fixed_stop_take: StopTake,
}

impl Default for NullOracle {
    fn default() -> Self {
        Self {
            fixed_prediction: Prediction::hold(),
            fixed_stop_take: StopTake {
                stop_pct: 0.006,
                take_pct: 0.012,
            },
        }
    }
}

#[async_trait]
impl ModelOracle for NullOracle {
    async fn predict(&self, _symbol: &str, _features: &[f64]) -> Prediction {
        self.fixed_prediction
    }

    async fn dynamic_stop_take(
        &self,
        _symbol: &str,
        _entry_price: f64,
        _side: Side,
        _features: &[f64],
        _confidence: f64,
    ) -> StopTake {
        self.fixed_stop_take
    }

    async fn submit_outcome(&self, _outcome: &Outcome) {}
}

/// Spawn a background task that drains `Outcome`s from a bounded channel and
/// forwards each to `oracle.submit_outcome`, keeping the dispatch loop free
/// of any oracle I/O latency.
pub fn spawn_outcome_forwarder(
    oracle: std::sync::Arc<dyn ModelOracle>,
    mut rx: mpsc::Receiver<Outcome>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(outcome) = rx.recv().await {
            oracle.submit_outcome(&outcome).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CloseReason, Label};

    fn sample_outcome() -> Outcome {
        Outcome {
            symbol: "BTCUSDT".to_string(),
            side: Side::Long,
            entry_price: 100.0,
            exit_price: 101.0,
            qty: 0.01,
            opened_at_ns: 0,
            closed_at_ns: 1,
            close_reason: CloseReason::Take,
            label: Label::Win,
            pnl_usd: 0.01,
        }
    }

    #[tokio::test]
    async fn null_oracle_returns_fixed_values() {
        let oracle = NullOracle::default();
        let prediction = oracle.predict("BTCUSDT", &[1.0, 2.0]).await;
        assert_eq!(prediction, Prediction::hold());
        let st = oracle
            .dynamic_stop_take("BTCUSDT", 100.0, Side::Long, &[], 0.5)
            .await;
        assert!(st.stop_pct > 0.0 && st.take_pct > 0.0);
    }

    #[tokio::test]
    async fn null_oracle_submit_outcome_is_a_no_op() {
        let oracle = NullOracle::default();
        oracle.submit_outcome(&sample_outcome()).await;
    }

    #[tokio::test]
    async fn outcome_forwarder_drains_channel_into_oracle() {
        let oracle: std::sync::Arc<dyn ModelOracle> = std::sync::Arc::new(NullOracle::default());
        let (tx, rx) = mpsc::channel(4);
        let handle = spawn_outcome_forwarder(oracle, rx);
        tx.send(sample_outcome()).await.unwrap();
        drop(tx);
        handle.await.unwrap();
    }
}
