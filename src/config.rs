/// Replay configuration, persisted as `config.toml` in a config directory.
///
/// Everything has a default, so a missing file or a file with only a few keys
/// is fine:
///
///   lag_margin_ms       = 150
///   spec                = "PRIEST/Holy"
///   ability_files       = ["my_trinkets.toml"]
///   ignored_ability_ids = [6603]
///   log_filter          = "cooldown_ledger=debug"
use crate::error::{LedgerError, Result};
use crate::tracker::COOLDOWN_LAG_MARGIN_MS;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// How far (ms) the model may be off before a use-while-unavailable is
    /// reported as a desync.
    #[serde(default = "default_lag_margin")]
    pub lag_margin_ms: f64,

    /// Embedded spec profile key ("CLASS/Spec"). Empty = none.
    #[serde(default)]
    pub spec: String,

    /// Extra ability TOML files, merged over the spec profile in order.
    #[serde(default)]
    pub ability_files: Vec<PathBuf>,

    /// Ability ids whose "used" events are not real uses (auto attack,
    /// proc ticks, toys macroed into buttons).
    #[serde(default = "default_ignored")]
    pub ignored_ability_ids: Vec<u32>,

    /// Haste at the start of the encounter, as a fraction.
    #[serde(default)]
    pub initial_haste: f64,

    /// Major cooldowns for the drift rule. Empty = the spec profile's list.
    #[serde(default)]
    pub major_cds: Vec<u32>,

    /// Default tracing directive when RUST_LOG is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Directory for rolling log files. None = log to stderr.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

fn default_lag_margin() -> f64 { COOLDOWN_LAG_MARGIN_MS }

/// Melee auto attack.
fn default_ignored() -> Vec<u32> { vec![6603] }

fn default_log_filter() -> String { "cooldown_ledger=info".to_owned() }

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            lag_margin_ms:       default_lag_margin(),
            spec:                String::new(),
            ability_files:       Vec::new(),
            ignored_ability_ids: default_ignored(),
            initial_haste:       0.0,
            major_cds:           Vec::new(),
            log_filter:          default_log_filter(),
            log_dir:             None,
        }
    }
}

impl ReplayConfig {
    pub fn ignored_set(&self) -> HashSet<u32> {
        self.ignored_ability_ids.iter().copied().collect()
    }

    /// Resolve relative ability file paths against `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        for path in &mut self.ability_files {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

pub fn load_or_default(config_dir: &Path) -> Result<ReplayConfig> {
    let path = config_dir.join(CONFIG_FILE);
    if !path.exists() {
        tracing::debug!("No config at {:?}, using defaults", path);
        return Ok(ReplayConfig::default());
    }
    let raw = std::fs::read_to_string(&path).map_err(|e| LedgerError::io(&path, e))?;
    let mut cfg: ReplayConfig = toml::from_str(&raw)?;
    cfg.resolve_paths(config_dir);
    Ok(cfg)
}

pub fn save(config: &ReplayConfig, config_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(config_dir).map_err(|e| LedgerError::io(config_dir, e))?;
    let raw = toml::to_string_pretty(config)?;
    let path = config_dir.join(CONFIG_FILE);
    std::fs::write(&path, raw).map_err(|e| LedgerError::io(&path, e))?;
    Ok(())
}
