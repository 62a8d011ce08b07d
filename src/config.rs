// =============================================================================
// Settings & runtime configuration loading
// =============================================================================
//
// `Settings` holds every operator-tunable parameter the engine reads. It is
// cheap to clone, serialisable for the control-surface `/state` snapshot, and
// persisted atomically (tmp file + rename) whenever `POST /settings` changes
// it.
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

fn default_symbols() -> Vec<String> {
    vec!["BTCUSDT".to_string()]
}
fn default_position_size_usd() -> f64 {
    50.0
}
fn default_max_concurrent() -> usize {
    3
}
fn default_min_signal_strength() -> f64 {
    0.55
}
fn default_min_signal_interval_ns() -> u64 {
    30_000_000_000
}
fn default_stop_floor_pct() -> f64 {
    0.003
}
fn default_stop_cap_pct() -> f64 {
    0.012
}
fn default_take_floor_pct() -> f64 {
    0.006
}
fn default_take_cap_pct() -> f64 {
    0.020
}
fn default_daily_loss_floor_usd() -> f64 {
    -100.0
}
fn default_max_hold_ns() -> u64 {
    900_000_000_000
}
fn default_leverage() -> u32 {
    5
}
fn default_paused() -> bool {
    false
}
fn default_max_correlated() -> usize {
    0
}
fn default_momentum_threshold() -> f64 {
    0.01
}
fn default_volume_threshold() -> f64 {
    1.4
}

/// Operator-tunable engine settings. Every field has a
/// `#[serde(default)]` so older persisted session files keep loading as
/// fields are added.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
    #[serde(default = "default_position_size_usd")]
    pub position_size_usd: f64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_min_signal_strength")]
    pub min_signal_strength: f64,
    #[serde(default = "default_min_signal_interval_ns")]
    pub min_signal_interval_ns: u64,
    #[serde(default = "default_stop_floor_pct")]
    pub stop_floor_pct: f64,
    #[serde(default = "default_stop_cap_pct")]
    pub stop_cap_pct: f64,
    #[serde(default = "default_take_floor_pct")]
    pub take_floor_pct: f64,
    #[serde(default = "default_take_cap_pct")]
    pub take_cap_pct: f64,
    #[serde(default = "default_daily_loss_floor_usd")]
    pub daily_loss_floor_usd: f64,
    #[serde(default = "default_max_hold_ns")]
    pub max_hold_ns: u64,
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    #[serde(default = "default_paused")]
    pub paused: bool,
    /// 0 disables the correlated-exposure throttle.
    #[serde(default = "default_max_correlated")]
    pub max_correlated: usize,
    /// Raw momentum reading that maps to a full-strength `+-1.0` component.
    #[serde(default = "default_momentum_threshold")]
    pub momentum_threshold: f64,
    /// Volume-ratio floor at which the volume-confirmation component adds to
    /// a signal's magnitude; below 1.0 it instead reduces it by 30%.
    #[serde(default = "default_volume_threshold")]
    pub volume_threshold: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            position_size_usd: default_position_size_usd(),
            max_concurrent: default_max_concurrent(),
            min_signal_strength: default_min_signal_strength(),
            min_signal_interval_ns: default_min_signal_interval_ns(),
            stop_floor_pct: default_stop_floor_pct(),
            stop_cap_pct: default_stop_cap_pct(),
            take_floor_pct: default_take_floor_pct(),
            take_cap_pct: default_take_cap_pct(),
            daily_loss_floor_usd: default_daily_loss_floor_usd(),
            max_hold_ns: default_max_hold_ns(),
            leverage: default_leverage(),
            paused: default_paused(),
            max_correlated: default_max_correlated(),
            momentum_threshold: default_momentum_threshold(),
            volume_threshold: default_volume_threshold(),
        }
    }
}

impl Settings {
    /// Clamp a raw stop-loss percentage into the configured `[floor, cap]`
    /// band, resolving Open Question 2.
    pub fn clamp_stop_pct(&self, raw: f64) -> f64 {
        raw.clamp(self.stop_floor_pct, self.stop_cap_pct)
    }

    /// Clamp a raw take-profit percentage into the configured `[floor, cap]`
    /// band.
    pub fn clamp_take_pct(&self, raw: f64) -> f64 {
        raw.clamp(self.take_floor_pct, self.take_cap_pct)
    }
}

/// Exchange credentials and network target, sourced only from the
/// environment — never persisted to disk.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
    pub use_testnet: bool,
}

/// Top-level engine configuration: static file-backed `Settings` defaults
/// plus environment-sourced credentials.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub settings: Settings,
    pub credentials: Credentials,
    pub control_bind_addr: String,
    pub persistence_path: PathBuf,
}

impl EngineConfig {
    /// Load settings from an optional YAML file (falling back to defaults if
    /// absent) and credentials from the environment. Missing credentials are
    /// a fatal misconfiguration — the caller should exit with code 1.
    pub fn load(settings_path: Option<&Path>) -> Result<Self> {
        let settings = match settings_path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading settings file {}", path.display()))?;
                serde_yaml::from_str(&raw)
                    .with_context(|| format!("parsing settings file {}", path.display()))?
            }
            Some(path) => {
                warn!(path = %path.display(), "settings file not found, using defaults");
                Settings::default()
            }
            None => Settings::default(),
        };

        let api_key = std::env::var("API_KEY")
            .context("API_KEY environment variable is required (fatal: no exchange credentials)")?;
        let api_secret = std::env::var("API_SECRET").context(
            "API_SECRET environment variable is required (fatal: no exchange credentials)",
        )?;
        let use_testnet = std::env::var("USE_TESTNET")
            .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
            .unwrap_or(false);

        let control_bind_addr =
            std::env::var("CONTROL_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8787".to_string());
        let persistence_path = std::env::var("PERSISTENCE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("aurora_session.jsonl"));

        info!(
            symbols = ?settings.symbols,
            use_testnet,
            control_bind_addr,
            "engine configuration loaded"
        );

        Ok(Self {
            settings,
            credentials: Credentials {
                api_key,
                api_secret,
                use_testnet,
            },
            control_bind_addr,
            persistence_path,
        })
    }

    /// Persist `settings` atomically: write to a sibling `.tmp` file, fsync,
    /// then rename over the destination. Guarantees readers never observe a
    /// half-written settings file.
    pub fn persist_settings(path: &Path, settings: &Settings) -> Result<()> {
        let tmp_path = path.with_extension("tmp");
        let body = serde_json::to_vec_pretty(settings).context("serialising settings")?;
        std::fs::write(&tmp_path, &body)
            .with_context(|| format!("writing {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("renaming {} -> {}", tmp_path.display(), path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let s = Settings::default();
        assert!(s.stop_floor_pct < s.stop_cap_pct);
        assert!(s.take_floor_pct < s.take_cap_pct);
        assert!(!s.symbols.is_empty());
    }

    #[test]
    fn clamp_stop_respects_band() {
        let s = Settings::default();
        assert_eq!(s.clamp_stop_pct(0.0001), s.stop_floor_pct);
        assert_eq!(s.clamp_stop_pct(5.0), s.stop_cap_pct);
        assert_eq!(s.clamp_stop_pct(0.005), 0.005);
    }

    #[test]
    fn clamp_take_respects_band() {
        let s = Settings::default();
        assert_eq!(s.clamp_take_pct(0.0), s.take_floor_pct);
        assert_eq!(s.clamp_take_pct(9.0), s.take_cap_pct);
    }

    #[test]
    fn missing_settings_file_falls_back_to_defaults() {
        std::env::set_var("API_KEY", "test-key");
        std::env::set_var("API_SECRET", "test-secret");
        let cfg = EngineConfig::load(Some(Path::new("/nonexistent/path/settings.yaml"))).unwrap();
        assert_eq!(cfg.settings.symbols, Settings::default().symbols);
    }

    #[test]
    fn persist_settings_round_trips_via_tmp_rename() {
        let dir = std::env::temp_dir().join(format!(
            "aurora-cfg-test-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.json");
        let settings = Settings::default();
        EngineConfig::persist_settings(&path, &settings).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        let restored: Settings = serde_json::from_str(&raw).unwrap();
        assert_eq!(restored.symbols, settings.symbols);
        assert!(!path.with_extension("tmp").exists());
    }
}
