// =============================================================================
// Order Executor module
// =============================================================================

pub mod binance;
pub mod executor;

pub use binance::{BinanceFuturesClient, ExchangeClient};
pub use executor::{spawn_executor, OrderExecutorHandle};
