// =============================================================================
// Shared types used across the Aurora scalping engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Balance snapshot for a single asset from the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceInfo {
    pub asset: String,
    #[serde(default)]
    pub free: f64,
    #[serde(default)]
    pub locked: f64,
}

/// Long or short directional bias for a signal/position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Sign multiplier: `+1.0` for Long, `-1.0` for Short.
    pub fn sign(self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }

    /// The side that closes a position opened with `self`.
    pub fn opposite(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }

    /// Exchange order side string ("BUY"/"SELL") for an entry in this direction.
    pub fn entry_order_side(self) -> &'static str {
        match self {
            Self::Long => "BUY",
            Self::Short => "SELL",
        }
    }

    /// Exchange order side string for the order that closes a position in
    /// this direction.
    pub fn exit_order_side(self) -> &'static str {
        self.opposite().entry_order_side()
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "Long"),
            Self::Short => write!(f, "Short"),
        }
    }
}

/// Lifecycle state of the engine supervisor. `Starting -> Running <-> Paused
/// -> Halted -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineState {
    Starting,
    Running,
    Paused,
    Halted,
    Stopped,
}

impl Default for EngineState {
    fn default() -> Self {
        Self::Starting
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "Starting"),
            Self::Running => write!(f, "Running"),
            Self::Paused => write!(f, "Paused"),
            Self::Halted => write!(f, "Halted"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// A single normalised market-data observation for one symbol.
///
/// Invariant: `bid <= price <= ask` when both are present. Ticks for a given
/// symbol are monotonic in `timestamp_ns` — the stream layer is responsible
/// for upholding this before a `Tick` is constructed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Tick {
    pub price: f64,
    pub volume: f64,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub timestamp_ns: u64,
    /// `true` when the taker was the buyer's counterparty (i.e. the taker
    /// sold into the bid) — Binance's `is_buyer_maker` convention. `None`
    /// when the source frame carries no aggressor information.
    pub taker_sold: Option<bool>,
}

impl Tick {
    /// Signed traded volume used by the order-flow-imbalance indicator:
    /// positive for an inferred buy, negative for an inferred sell, zero
    /// when the aggressor side cannot be determined.
    ///
    /// Resolves Open Question 1: absent an explicit side flag, a tick with
    /// no aggressor information contributes neither buy nor sell volume.
    pub fn signed_volume(&self) -> f64 {
        match self.taker_sold {
            Some(true) => -self.volume,
            Some(false) => self.volume,
            None => 0.0,
        }
    }
}

/// Reason a position was closed, carried onto the resulting `Outcome`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    Stop,
    Take,
    TimeLimit,
    Manual,
    KillSwitch,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stop => write!(f, "Stop"),
            Self::Take => write!(f, "Take"),
            Self::TimeLimit => write!(f, "TimeLimit"),
            Self::Manual => write!(f, "Manual"),
            Self::KillSwitch => write!(f, "KillSwitch"),
        }
    }
}

/// Win/loss label attached to a closed position's `Outcome`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Label {
    Win,
    Loss,
}

/// Current UNIX time in nanoseconds.
pub fn now_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_sign_and_opposite() {
        assert_eq!(Side::Long.sign(), 1.0);
        assert_eq!(Side::Short.sign(), -1.0);
        assert_eq!(Side::Long.opposite(), Side::Short);
        assert_eq!(Side::Short.opposite(), Side::Long);
    }

    #[test]
    fn side_order_strings() {
        assert_eq!(Side::Long.entry_order_side(), "BUY");
        assert_eq!(Side::Long.exit_order_side(), "SELL");
        assert_eq!(Side::Short.entry_order_side(), "SELL");
        assert_eq!(Side::Short.exit_order_side(), "BUY");
    }

    #[test]
    fn tick_signed_volume_resolves_aggressor() {
        let mut t = Tick {
            price: 100.0,
            volume: 2.0,
            bid: None,
            ask: None,
            timestamp_ns: 0,
            taker_sold: Some(true),
        };
        assert_eq!(t.signed_volume(), -2.0);
        t.taker_sold = Some(false);
        assert_eq!(t.signed_volume(), 2.0);
        t.taker_sold = None;
        assert_eq!(t.signed_volume(), 0.0);
    }
}
