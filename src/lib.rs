pub mod abilities;
pub mod config;
pub mod effects;
pub mod engine;
pub mod error;
pub mod events;
pub mod reader;
pub mod rules;
pub mod state;
pub mod tracker;
pub mod update;

use abilities::AbilityBook;
use config::ReplayConfig;
use engine::{AdviceEvent, EngineState};
use events::CombatEvent;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tokio::sync::mpsc;
use tracker::Diagnostic;
use tracing_subscriber::EnvFilter;
use update::{SpellUsableUpdate, UpdateKind};

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Install the global tracing subscriber and panic hook.
///
/// `RUST_LOG` wins over `default_filter`. With a `log_dir` the output goes to
/// a daily-rolling `cooldown-ledger.log` there, otherwise to stderr.
pub fn init_logging(default_filter: &str, log_dir: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))?;

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::daily(dir, "cooldown-ledger.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            // Dropping the guard flushes and stops the writer; it must live
            // as long as the process.
            std::mem::forget(guard);

            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(non_blocking)
                .with_ansi(false)
                .try_init()
                .map_err(|e| anyhow::anyhow!("Logging init failed: {}", e))?;
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init()
                .map_err(|e| anyhow::anyhow!("Logging init failed: {}", e))?;
        }
    }

    // Panics go through tracing so they land in the log file too.
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown location".to_string());
        let message = if let Some(s) = info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        tracing::error!("PANIC at {}: {}", location, message);
    }));

    Ok(())
}

// ---------------------------------------------------------------------------
// Replay
// ---------------------------------------------------------------------------

/// Everything one replay produced, in stream order.
#[derive(Debug, Default, Serialize)]
pub struct ReplayReport {
    pub updates:     Vec<SpellUsableUpdate>,
    pub advice:      Vec<AdviceEvent>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct AbilitySummary {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name:             String,
    /// Cooldown cycles started (uses from full charges).
    pub cycles:           u32,
    /// Extra charges spent while already recharging.
    pub charges_used:     u32,
    /// Charges that came back without the cycle finishing.
    pub charges_restored: u32,
    pub desyncs:          u32,
}

#[derive(Debug, Default, Serialize)]
pub struct ReplaySummary {
    pub updates:   usize,
    pub advice:    usize,
    pub abilities: BTreeMap<u32, AbilitySummary>,
}

impl ReplayReport {
    pub fn summary(&self) -> ReplaySummary {
        let mut abilities: BTreeMap<u32, AbilitySummary> = BTreeMap::new();

        for u in &self.updates {
            let row = abilities.entry(u.ability_id).or_default();
            if row.name.is_empty() {
                row.name = u.ability_name.clone();
            }
            match u.kind {
                UpdateKind::BeginCooldown => row.cycles += 1,
                UpdateKind::UseCharge     => row.charges_used += 1,
                UpdateKind::RestoreCharge => row.charges_restored += 1,
                UpdateKind::EndCooldown   => {}
            }
        }
        for d in &self.diagnostics {
            if let Diagnostic::Desync { ability_id, .. } = d {
                abilities.entry(*ability_id).or_default().desyncs += 1;
            }
        }

        ReplaySummary {
            updates: self.updates.len(),
            advice:  self.advice.len(),
            abilities,
        }
    }
}

/// Replay one recorded encounter from a JSON-lines file.
///
/// Pipeline: reader -> decoder -> engine -> collectors
pub async fn replay_file(
    path:      &Path,
    book:      AbilityBook,
    major_cds: Vec<u32>,
    config:    &ReplayConfig,
) -> anyhow::Result<ReplayReport> {
    let (raw_tx,    raw_rx)        = mpsc::channel::<String>(2048);
    let (event_tx,  event_rx)      = mpsc::channel::<CombatEvent>(1024);
    let (update_tx, mut update_rx) = mpsc::channel::<SpellUsableUpdate>(1024);
    let (advice_tx, mut advice_rx) = mpsc::channel::<AdviceEvent>(128);

    let reader = {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || reader::read_lines(&path, raw_tx))
    };
    let decoder = tokio::spawn(events::run(raw_rx, event_tx, config.ignored_set()));
    let engine  = tokio::spawn(engine::run(
        event_rx,
        update_tx,
        advice_tx,
        EngineState::new(book, major_cds, config),
    ));

    let update_collector = tokio::spawn(async move {
        let mut out = Vec::new();
        while let Some(u) = update_rx.recv().await {
            out.push(u);
        }
        out
    });
    let advice_collector = tokio::spawn(async move {
        let mut out = Vec::new();
        while let Some(a) = advice_rx.recv().await {
            out.push(a);
        }
        out
    });

    let diagnostics = engine.await??;
    decoder.await??;
    let lines = reader.await??;

    let report = ReplayReport {
        updates: update_collector.await?,
        advice:  advice_collector.await?,
        diagnostics,
    };
    tracing::info!(
        "Replayed {:?}: {} lines, {} updates, {} advice, {} diagnostics",
        path, lines, report.updates.len(), report.advice.len(), report.diagnostics.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::CooldownEntry;

    fn update(kind: UpdateKind, ability_id: u32) -> SpellUsableUpdate {
        let entry = CooldownEntry {
            overall_start:     0.0,
            expected_duration: 1_000.0,
            expected_end:      1_000.0,
            charges_available: 0,
            max_charges:       1,
        };
        SpellUsableUpdate::from_entry(kind, ability_id, "Judgment", 0.0, &entry)
    }

    #[test]
    fn summary_counts_per_ability() {
        let report = ReplayReport {
            updates: vec![
                update(UpdateKind::BeginCooldown, 7),
                update(UpdateKind::UseCharge, 7),
                update(UpdateKind::RestoreCharge, 7),
                update(UpdateKind::EndCooldown, 7),
                update(UpdateKind::BeginCooldown, 7),
            ],
            advice: Vec::new(),
            diagnostics: vec![Diagnostic::NotOnCooldown {
                ability_id: 9,
                timestamp:  0.0,
                mutation:   tracker::Mutation::EndCooldown,
            }],
        };

        let summary = report.summary();
        assert_eq!(summary.updates, 5);
        let row = &summary.abilities[&7];
        assert_eq!(row.name, "Judgment");
        assert_eq!((row.cycles, row.charges_used, row.charges_restored, row.desyncs), (2, 1, 1, 0));
        assert!(!summary.abilities.contains_key(&9));
    }
}
