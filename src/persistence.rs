// =============================================================================
// Session persistence — append-only JSON-lines log
// =============================================================================
//
// One line per event: a settings snapshot, a closed-position `Outcome`, or a
// change to the active symbol set. Restoring from the log only reconstructs
// `settings` and `active_symbols` — open positions are never replayed from
// here (see DESIGN.md for why adopting them from the exchange is also out of
// scope today).
// =============================================================================

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Settings;
use crate::position::Outcome;

/// A single persisted session event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum SessionEvent {
    Settings { settings: Settings },
    Outcome { outcome: Outcome },
    SymbolsChanged { active_symbols: Vec<String> },
}

/// Result of replaying the log at boot.
#[derive(Debug, Clone, Default)]
pub struct PersistedState {
    pub settings: Option<Settings>,
    pub active_symbols: HashSet<String>,
}

/// Append-only session log writer. Wraps the open file handle in a mutex
/// since multiple components (control surface, position manager) may log
/// events concurrently.
pub struct SessionLog {
    file: Mutex<std::fs::File>,
}

impl SessionLog {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening session log {}", path.display()))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Append one event as a single JSON line, flushing immediately so a
    /// crash loses at most the in-flight write.
    pub fn append(&self, event: &SessionEvent) -> Result<()> {
        let mut line = serde_json::to_vec(event).context("serialising session event")?;
        line.push(b'\n');
        let mut file = self.file.lock().expect("session log mutex poisoned");
        file.write_all(&line).context("appending session event")?;
        file.flush().context("flushing session log")?;
        Ok(())
    }

    /// Replay `path` from the start, reconstructing the latest `Settings`
    /// seen and the final active-symbol set. Malformed lines are skipped
    /// with a warning rather than aborting the whole replay — a partially
    /// written last line (from a crash mid-append) must not prevent boot.
    pub fn load_latest(path: &Path) -> Result<PersistedState> {
        let mut state = PersistedState::default();

        let file = match std::fs::File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no prior session log found");
                return Ok(state);
            }
            Err(e) => return Err(e).context("opening session log for replay"),
        };

        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    warn!(lineno, error = %e, "session log read error, stopping replay");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SessionEvent>(&line) {
                Ok(SessionEvent::Settings { settings }) => state.settings = Some(settings),
                Ok(SessionEvent::SymbolsChanged { active_symbols }) => {
                    state.active_symbols = active_symbols.into_iter().collect();
                }
                Ok(SessionEvent::Outcome { .. }) => {}
                Err(e) => {
                    warn!(lineno, error = %e, "skipping malformed session log line");
                }
            }
        }

        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CloseReason, Label, Side};

    fn tmp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("aurora-persist-test-{}-{}", std::process::id(), name))
    }

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

    #[test]
    fn replay_reconstructs_latest_settings_and_symbols() {
        let path = tmp_path("replay.jsonl");
        let _ = std::fs::remove_file(&path);
        let log = SessionLog::open(&path).unwrap();

        let mut s1 = Settings::default();
        s1.max_concurrent = 1;
        log.append(&SessionEvent::Settings { settings: s1 }).unwrap();

        let mut s2 = Settings::default();
        s2.max_concurrent = 7;
        log.append(&SessionEvent::Settings { settings: s2 }).unwrap();

        log.append(&SessionEvent::SymbolsChanged {
            active_symbols: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
        })
        .unwrap();

        log.append(&SessionEvent::Outcome {
            outcome: sample_outcome(),
        })
        .unwrap();

        let restored = SessionLog::load_latest(&path).unwrap();
        assert_eq!(restored.settings.unwrap().max_concurrent, 7);
        assert_eq!(restored.active_symbols.len(), 2);
        assert!(restored.active_symbols.contains("ETHUSDT"));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_log_file_yields_empty_state() {
        let path = tmp_path("missing.jsonl");
        let _ = std::fs::remove_file(&path);
        let restored = SessionLog::load_latest(&path).unwrap();
        assert!(restored.settings.is_none());
        assert!(restored.active_symbols.is_empty());
    }

    #[test]
    fn malformed_trailing_line_does_not_abort_replay() {
        let path = tmp_path("malformed.jsonl");
        let _ = std::fs::remove_file(&path);
        let log = SessionLog::open(&path).unwrap();
        log.append(&SessionEvent::SymbolsChanged {
            active_symbols: vec!["BTCUSDT".to_string()],
        })
        .unwrap();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(b"{not valid json\n").unwrap();
        }
        let restored = SessionLog::load_latest(&path).unwrap();
        assert_eq!(restored.active_symbols.len(), 1);
        let _ = std::fs::remove_file(&path);
    }
}
