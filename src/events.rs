/// Decodes the replay event stream into typed `CombatEvent` values.
///
/// Event files are JSON lines, one event per line, tagged on `type`:
///
///   {"type":"ability_used","timestamp_ms":1200,"ability_id":31884}
///   {"type":"recovery_rate_changed","timestamp_ms":4000,"old_rate":0.2,"new_rate":0.5}
///   {"type":"encounter_ended","timestamp_ms":300000}
///
/// Blank lines and lines starting with `#` are skipped. Lines that fail to
/// decode are skipped too (logged at debug); a replay should survive a
/// partially corrupt export the same way it survives a gap in the log.
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::sync::mpsc::{Receiver, Sender};

/// Events the cooldown tracker reacts to. Every event is also a "tick":
/// the tracker completes any recharge that finished at or before its timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CombatEvent {
    /// The player used (cast) an ability.
    AbilityUsed {
        timestamp_ms: u64,
        ability_id:   u32,
    },
    BuffApplied {
        timestamp_ms: u64,
        ability_id:   u32,
    },
    BuffRemoved {
        timestamp_ms: u64,
        ability_id:   u32,
    },
    BuffStacked {
        timestamp_ms: u64,
        ability_id:   u32,
        #[serde(default)]
        stacks:       u32,
    },
    /// Haste (or an equivalent recovery stat) changed. Rates are fractions:
    /// 0.25 means +25%.
    RecoveryRateChanged {
        timestamp_ms: u64,
        old_rate:     f64,
        new_rate:     f64,
    },
    MaxChargesIncreased {
        timestamp_ms: u64,
        ability_id:   u32,
        #[serde(default = "default_charge_delta")]
        by:           u32,
    },
    MaxChargesDecreased {
        timestamp_ms: u64,
        ability_id:   u32,
        #[serde(default = "default_charge_delta")]
        by:           u32,
    },
    EncounterEnded {
        timestamp_ms: u64,
    },
    /// Anything else in the log. Carries no semantics beyond the tick.
    Other {
        timestamp_ms: u64,
        #[serde(default)]
        ability_id:   u32,
    },
}

fn default_charge_delta() -> u32 { 1 }

impl CombatEvent {
    pub fn timestamp_ms(&self) -> u64 {
        match self {
            Self::AbilityUsed         { timestamp_ms, .. } => *timestamp_ms,
            Self::BuffApplied         { timestamp_ms, .. } => *timestamp_ms,
            Self::BuffRemoved         { timestamp_ms, .. } => *timestamp_ms,
            Self::BuffStacked         { timestamp_ms, .. } => *timestamp_ms,
            Self::RecoveryRateChanged { timestamp_ms, .. } => *timestamp_ms,
            Self::MaxChargesIncreased { timestamp_ms, .. } => *timestamp_ms,
            Self::MaxChargesDecreased { timestamp_ms, .. } => *timestamp_ms,
            Self::EncounterEnded      { timestamp_ms }     => *timestamp_ms,
            Self::Other               { timestamp_ms, .. } => *timestamp_ms,
        }
    }

    /// Ability the event refers to, if any.
    pub fn ability_id(&self) -> Option<u32> {
        match self {
            Self::AbilityUsed         { ability_id, .. } => Some(*ability_id),
            Self::BuffApplied         { ability_id, .. } => Some(*ability_id),
            Self::BuffRemoved         { ability_id, .. } => Some(*ability_id),
            Self::BuffStacked         { ability_id, .. } => Some(*ability_id),
            Self::MaxChargesIncreased { ability_id, .. } => Some(*ability_id),
            Self::MaxChargesDecreased { ability_id, .. } => Some(*ability_id),
            Self::Other               { ability_id, .. } => Some(*ability_id),
            Self::RecoveryRateChanged { .. } | Self::EncounterEnded { .. } => None,
        }
    }
}

pub fn parse_line(raw: &str) -> Option<CombatEvent> {
    let line = raw.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::debug!("Skipping undecodable event line ({}): {}", e, line);
            None
        }
    }
}

/// Ability-used events for ids in `ignored` are dropped; they are log entries
/// that look like casts but are procs, ticks, or toys.
fn is_ignored(event: &CombatEvent, ignored: &HashSet<u32>) -> bool {
    matches!(event, CombatEvent::AbilityUsed { ability_id, .. } if ignored.contains(ability_id))
}

/// Async pipeline stage: receive raw lines, decode, forward typed events.
pub async fn run(
    mut rx:  Receiver<String>,
    tx:      Sender<CombatEvent>,
    ignored: HashSet<u32>,
) -> Result<()> {
    while let Some(line) = rx.recv().await {
        let Some(event) = parse_line(&line) else { continue };
        if is_ignored(&event, &ignored) {
            continue;
        }
        if tx.send(event).await.is_err() {
            break;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn parses_ability_used() {
        let e = parse_line(r#"{"type":"ability_used","timestamp_ms":1200,"ability_id":31884}"#)
            .expect("should parse");
        assert_eq!(e, CombatEvent::AbilityUsed { timestamp_ms: 1200, ability_id: 31884 });
        assert_eq!(e.timestamp_ms(), 1200);
        assert_eq!(e.ability_id(), Some(31884));
    }

    #[test]
    fn parses_rate_change_without_ability() {
        let e = parse_line(
            r#"{"type":"recovery_rate_changed","timestamp_ms":4000,"old_rate":0.2,"new_rate":0.5}"#,
        )
        .expect("should parse");
        match e {
            CombatEvent::RecoveryRateChanged { old_rate, new_rate, .. } => {
                assert_eq!(old_rate, 0.2);
                assert_eq!(new_rate, 0.5);
            }
            other => panic!("Wrong variant: {:?}", other),
        }
        assert_eq!(e.ability_id(), None);
    }

    #[test]
    fn charge_delta_defaults_to_one() {
        let e = parse_line(r#"{"type":"max_charges_increased","timestamp_ms":10,"ability_id":7}"#)
            .expect("should parse");
        assert_eq!(e, CombatEvent::MaxChargesIncreased { timestamp_ms: 10, ability_id: 7, by: 1 });
    }

    #[test]
    fn returns_none_for_garbage_and_comments() {
        assert!(parse_line("not an event").is_none());
        assert!(parse_line("").is_none());
        assert!(parse_line("   ").is_none());
        assert!(parse_line("# pull 3").is_none());
        assert!(parse_line(r#"{"type":"teleported","timestamp_ms":1}"#).is_none());
    }

    #[tokio::test]
    async fn run_drops_ignored_uses() {
        let (raw_tx, raw_rx) = mpsc::channel(8);
        let (ev_tx, mut ev_rx) = mpsc::channel(8);

        raw_tx.send(r#"{"type":"ability_used","timestamp_ms":1,"ability_id":6603}"#.to_owned()).await.unwrap();
        raw_tx.send(r#"{"type":"ability_used","timestamp_ms":2,"ability_id":31884}"#.to_owned()).await.unwrap();
        raw_tx.send(r#"{"type":"buff_applied","timestamp_ms":3,"ability_id":6603}"#.to_owned()).await.unwrap();
        drop(raw_tx);

        run(raw_rx, ev_tx, HashSet::from([6603])).await.unwrap();

        assert_eq!(ev_rx.recv().await.unwrap().timestamp_ms(), 2);
        // Only uses are filtered; other kinds with the same id pass through.
        assert_eq!(ev_rx.recv().await.unwrap().timestamp_ms(), 3);
        assert!(ev_rx.recv().await.is_none());
    }
}
