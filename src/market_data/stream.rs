// =============================================================================
// Market-Data Stream — one WebSocket per symbol, reconnect with full-jitter
// backoff
// =============================================================================
//
// Connects to the exchange's aggTrade stream, decodes each message into a
// `Tick`, and pushes it through the symbol's `TickProducer`. On disconnect,
// reconnects with exponential backoff (base 500ms, cap 30s) with full jitter
// rather than a fixed retry interval.
// =============================================================================

use anyhow::{Context, Result};
use futures_util::StreamExt;
use rand::Rng;
use tokio_tungstenite::connect_async;
use tracing::{error, info, warn};

use super::ring::TickProducer;
use crate::types::{now_ns, Tick};

const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_CAP_MS: u64 = 30_000;

/// A gap between consecutive ticks for a symbol larger than this is treated
/// as a reconnect/outage: `AppState::record_tick` resets that symbol's
/// indicator warm-up rather than trust state bridged across the gap.
pub const STALE_GAP_RESET_NS: u64 = 10_000_000_000;

fn stream_url(symbol: &str, use_testnet: bool) -> String {
    let lower = symbol.to_lowercase();
    if use_testnet {
        format!("wss://stream.binancefuture.com/ws/{lower}@aggTrade")
    } else {
        format!("wss://fstream.binance.com/ws/{lower}@aggTrade")
    }
}

/// Run the reconnect supervisor loop for `symbol` forever (until the process
/// shuts down). Returns only if `producer`'s receiver has been dropped.
pub async fn run_with_reconnect(symbol: String, use_testnet: bool, producer: TickProducer) {
    let mut attempt: u32 = 0;
    let mut last_tick_ns: Option<u64> = None;

    loop {
        match run_once(&symbol, use_testnet, &producer, &mut last_tick_ns).await {
            Ok(()) => {
                info!(symbol = %symbol, "market data stream ended cleanly, reconnecting");
                attempt = 0;
            }
            Err(e) => {
                warn!(symbol = %symbol, error = %e, attempt, "market data stream failed");
                attempt = attempt.saturating_add(1);
            }
        }

        let delay_ms = backoff_delay_ms(attempt);
        tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
    }
}

/// Exponential backoff with full jitter: a uniform random delay in
/// `[0, base * 2^attempt]`, capped at `BACKOFF_CAP_MS`.
fn backoff_delay_ms(attempt: u32) -> u64 {
    let exp = BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.min(10));
    let capped = exp.min(BACKOFF_CAP_MS);
    rand::thread_rng().gen_range(0..=capped.max(1))
}

async fn run_once(
    symbol: &str,
    use_testnet: bool,
    producer: &TickProducer,
    last_tick_ns: &mut Option<u64>,
) -> Result<()> {
    let url = stream_url(symbol, use_testnet);
    info!(url = %url, symbol, "connecting to market data stream");

    let (ws_stream, _response) = connect_async(&url)
        .await
        .context("failed to connect to market data WebSocket")?;

    info!(symbol, "market data stream connected");
    let (_write, mut read) = ws_stream.split();

    loop {
        match read.next().await {
            Some(Ok(tokio_tungstenite::tungstenite::Message::Text(text))) => {
                match parse_agg_trade(&text) {
                    Ok(tick) => {
                        if let Some(prev) = *last_tick_ns {
                            let gap = tick.timestamp_ns.saturating_sub(prev);
                            if gap > STALE_GAP_RESET_NS {
                                warn!(symbol, gap_ns = gap, "tick gap exceeds staleness threshold");
                            }
                        }
                        *last_tick_ns = Some(tick.timestamp_ns);
                        producer.try_send(tick);
                    }
                    Err(e) => warn!(symbol, error = %e, "failed to parse market data message"),
                }
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                error!(symbol, error = %e, "market data read error");
                return Err(e.into());
            }
            None => {
                warn!(symbol, "market data stream ended");
                return Ok(());
            }
        }
    }
}

/// Parse a Binance-shaped futures aggTrade frame into a `Tick`.
///
/// ```json
/// { "e": "aggTrade", "s": "BTCUSDT", "p": "37000.00", "q": "0.123", "m": true, "T": 1700000000000 }
/// ```
fn parse_agg_trade(text: &str) -> Result<Tick> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse aggTrade JSON")?;

    let price: f64 = root["p"]
        .as_str()
        .context("missing field p")?
        .parse()
        .context("failed to parse price")?;

    let quantity: f64 = root["q"]
        .as_str()
        .context("missing field q")?
        .parse()
        .context("failed to parse quantity")?;

    let is_buyer_maker = root["m"].as_bool().context("missing field m")?;

    let timestamp_ns = root["T"]
        .as_u64()
        .map(|ms| ms.saturating_mul(1_000_000))
        .unwrap_or_else(now_ns);

    Ok(Tick {
        price,
        volume: quantity,
        bid: None,
        ask: None,
        timestamp_ns,
        taker_sold: Some(is_buyer_maker),
    })
}
