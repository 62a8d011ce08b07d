// =============================================================================
// Signal Generator module
// =============================================================================
//
// `generator`/`cooldown` implement the weighted multi-component scorer this
// engine trades on.

pub mod cooldown;
pub mod generator;

pub use cooldown::Cooldown;
pub use generator::{Signal, SignalComponents, SignalGenerator};
