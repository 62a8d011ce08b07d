// =============================================================================
// Market-Data Stream module
// =============================================================================
//
// `ring`/`stream` implement the tick pipeline this engine runs on: one
// reconnecting WebSocket per symbol feeding a bounded per-symbol channel that
// the dispatch loop drains.

pub mod ring;
pub mod stream;

pub use ring::{tick_channel, TickProducer, DEFAULT_CHANNEL_CAPACITY};
pub use stream::{run_with_reconnect, STALE_GAP_RESET_NS};
