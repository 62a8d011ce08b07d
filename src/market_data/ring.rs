// =============================================================================
// Tick ring — bounded per-symbol queue between the stream task and the
// dispatch loop
// =============================================================================
//
// A bounded `tokio::mpsc` channel feeds the single-consumer dispatch loop.
// When the loop falls behind and the channel fills, the producer drops the
// newest tick rather than blocking the WebSocket read loop, and records the
// drop so the control surface can report backpressure.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use crate::types::Tick;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 4096;

/// Producer handle: one per symbol stream task.
#[derive(Clone)]
pub struct TickProducer {
    symbol: String,
    tx: mpsc::Sender<Tick>,
    dropped: Arc<AtomicU64>,
}

impl TickProducer {
    /// Non-blocking send; increments the dropped-tick counter and logs at
    /// WARN on backpressure instead of awaiting channel capacity.
    pub fn try_send(&self, tick: Tick) {
        if let Err(e) = self.tx.try_send(tick) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(symbol = %self.symbol, error = %e, "tick dropped, dispatch loop saturated");
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Create a bounded tick channel for one symbol.
pub fn tick_channel(symbol: impl Into<String>, capacity: usize) -> (TickProducer, mpsc::Receiver<Tick>) {
    let (tx, rx) = mpsc::channel(capacity);
    let producer = TickProducer {
        symbol: symbol.into(),
        tx,
        dropped: Arc::new(AtomicU64::new(0)),
    };
    (producer, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(ts: u64) -> Tick {
        Tick {
            price: 100.0,
            volume: 1.0,
            bid: None,
            ask: None,
            timestamp_ns: ts,
            taker_sold: None,
        }
    }

    #[tokio::test]
    async fn send_and_receive_round_trip() {
        let (producer, mut rx) = tick_channel("BTCUSDT", 4);
        producer.try_send(tick(1));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.timestamp_ns, 1);
        assert_eq!(producer.dropped_count(), 0);
    }

    #[tokio::test]
    async fn overflow_increments_dropped_counter_without_blocking() {
        let (producer, _rx) = tick_channel("BTCUSDT", 1);
        producer.try_send(tick(1));
        producer.try_send(tick(2));
        producer.try_send(tick(3));
        assert_eq!(producer.dropped_count(), 2);
    }
}
