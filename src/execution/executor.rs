// =============================================================================
// Order Executor — bounded-queue submission with retry/backoff
// =============================================================================
//
// Orders are submitted through a bounded `mpsc` queue to a single worker
// task, so a slow exchange never blocks the dispatch loop. `Transient`
// failures are retried with full-jitter backoff up to `max_retries`;
// `FilterRejected`/anything else is returned to the caller immediately.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use super::binance::ExchangeClient;
use crate::error::EngineError;

const BACKOFF_BASE_MS: u64 = 200;
const BACKOFF_CAP_MS: u64 = 5_000;

fn backoff_delay_ms(attempt: u32) -> u64 {
    let exp = BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.min(8));
    let capped = exp.min(BACKOFF_CAP_MS);
    rand::thread_rng().gen_range(0..=capped.max(1))
}

struct OrderJob {
    symbol: String,
    side: String,
    qty_str: String,
    reduce_only: bool,
    reply: oneshot::Sender<Result<serde_json::Value, EngineError>>,
}

#[derive(Clone)]
pub struct OrderExecutorHandle {
    tx: mpsc::Sender<OrderJob>,
}

impl OrderExecutorHandle {
    /// Submit an order and await its terminal result (success, or a
    /// non-retriable rejection). Returns a `Transient` error immediately if
    /// the executor's queue is saturated, rather than blocking the caller.
    pub async fn submit(
        &self,
        symbol: &str,
        side: &str,
        qty_str: &str,
        reduce_only: bool,
    ) -> Result<serde_json::Value, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job = OrderJob {
            symbol: symbol.to_string(),
            side: side.to_string(),
            qty_str: qty_str.to_string(),
            reduce_only,
            reply: reply_tx,
        };

        if self.tx.try_send(job).is_err() {
            warn!(symbol, "order executor queue saturated, rejecting submission");
            return Err(EngineError::Transient("order executor queue full".to_string()));
        }

        match reply_rx.await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Transient(
                "order executor worker terminated before replying".to_string(),
            )),
        }
    }
}

/// Spawn the executor's single worker task, bound to `client`.
pub fn spawn_executor(
    client: Arc<dyn ExchangeClient>,
    capacity: usize,
    max_retries: u32,
) -> (OrderExecutorHandle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(capacity);
    let handle = tokio::spawn(run_worker(client, rx, max_retries));
    (OrderExecutorHandle { tx }, handle)
}

async fn run_worker(client: Arc<dyn ExchangeClient>, mut rx: mpsc::Receiver<OrderJob>, max_retries: u32) {
    while let Some(job) = rx.recv().await {
        let result = execute_with_retry(client.as_ref(), &job, max_retries).await;
        let _ = job.reply.send(result);
    }
}

async fn execute_with_retry(
    client: &dyn ExchangeClient,
    job: &OrderJob,
    max_retries: u32,
) -> Result<serde_json::Value, EngineError> {
    let mut attempt = 0;
    loop {
        match client
            .place_order(&job.symbol, &job.side, &job.qty_str, job.reduce_only)
            .await
        {
            Ok(body) => return Ok(body),
            Err(EngineError::Transient(msg)) if attempt < max_retries => {
                attempt += 1;
                warn!(symbol = %job.symbol, attempt, %msg, "order submission transient failure, retrying");
                tokio::time::sleep(Duration::from_millis(backoff_delay_ms(attempt))).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyExchange {
        fail_times: AtomicU32,
    }

    #[async_trait]
    impl ExchangeClient for FlakyExchange {
        async fn place_order(
            &self,
            _symbol: &str,
            _side: &str,
            _qty_str: &str,
            _reduce_only: bool,
        ) -> Result<serde_json::Value, EngineError> {
            if self.fail_times.load(Ordering::SeqCst) > 0 {
                self.fail_times.fetch_sub(1, Ordering::SeqCst);
                return Err(EngineError::Transient("temporary outage".to_string()));
            }
            Ok(serde_json::json!({"status": "FILLED"}))
        }

        async fn fetch_exchange_info(&self) -> Result<serde_json::Value, EngineError> {
            Ok(serde_json::json!({"symbols": []}))
        }
    }

    struct AlwaysFilterRejects;

    #[async_trait]
    impl ExchangeClient for AlwaysFilterRejects {
        async fn place_order(
            &self,
            _symbol: &str,
            _side: &str,
            _qty_str: &str,
            _reduce_only: bool,
        ) -> Result<serde_json::Value, EngineError> {
            Err(EngineError::FilterRejected {
                code: "-1013".to_string(),
                msg: "LOT_SIZE".to_string(),
            })
        }

        async fn fetch_exchange_info(&self) -> Result<serde_json::Value, EngineError> {
            Ok(serde_json::json!({"symbols": []}))
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures_retry() {
        let client: Arc<dyn ExchangeClient> = Arc::new(FlakyExchange {
            fail_times: AtomicU32::new(2),
        });
        let (handle, _join) = spawn_executor(client, 8, 5);
        let result = handle.submit("BTCUSDT", "BUY", "0.001", false).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let client: Arc<dyn ExchangeClient> = Arc::new(FlakyExchange {
            fail_times: AtomicU32::new(10),
        });
        let (handle, _join) = spawn_executor(client, 8, 2);
        let result = handle.submit("BTCUSDT", "BUY", "0.001", false).await;
        assert!(matches!(result, Err(EngineError::Transient(_))));
    }

    #[tokio::test]
    async fn filter_rejection_is_not_retried() {
        let client: Arc<dyn ExchangeClient> = Arc::new(AlwaysFilterRejects);
        let (handle, _join) = spawn_executor(client, 8, 5);
        let result = handle.submit("BTCUSDT", "BUY", "0.001", false).await;
        assert!(matches!(result, Err(EngineError::FilterRejected { .. })));
    }

    #[tokio::test]
    async fn queue_saturation_rejects_immediately() {
        let client: Arc<dyn ExchangeClient> = Arc::new(FlakyExchange {
            fail_times: AtomicU32::new(0),
        });
        let (tx, _rx) = mpsc::channel(1);
        let handle = OrderExecutorHandle { tx };
        drop(client);
        // No worker draining this channel's receiver — first send fills the
        // queue (capacity 1), second must bounce immediately.
        let handle2 = handle.clone();
        let _ = handle
            .tx
            .try_send(OrderJob {
                symbol: "BTCUSDT".to_string(),
                side: "BUY".to_string(),
                qty_str: "0.001".to_string(),
                reduce_only: false,
                reply: oneshot::channel().0,
            });
        let result = handle2.submit("BTCUSDT", "BUY", "0.001", false).await;
        assert!(matches!(result, Err(EngineError::Transient(_))));
    }
}
