/// Replay engine: the stage that owns the cooldown tracker.
///
/// Receives typed CombatEvents via a channel, feeds each one to the tracker,
/// evaluates coaching rules against the result, deduplicates advice, and
/// forwards SpellUsableUpdates and AdviceEvents to the collectors.
///
/// Per-rule advice cooldowns prevent spam:
///   bad    → 8s minimum between firings of the same key
///   warn   → 12s
///   good   → 20s
use crate::{
    abilities::AbilityBook,
    config::ReplayConfig,
    effects::EffectSet,
    events::CombatEvent,
    rules::{cooldown_drift, RuleContext, RuleInput},
    state::ReadyTracker,
    tracker::{CooldownTracker, Diagnostic},
    update::SpellUsableUpdate,
};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc::{Receiver, Sender};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Good,
    Warn,
    Bad,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdviceEvent {
    pub key:          String,
    pub title:        String,
    pub message:      String,
    pub severity:     Severity,
    pub kv:           Vec<(String, String)>,
    pub timestamp_ms: u64,
}

// ---------------------------------------------------------------------------
// Advice dedup / cooldown
// ---------------------------------------------------------------------------

fn advice_cooldown_ms(severity: &Severity) -> u64 {
    match severity {
        Severity::Bad  =>  8_000,
        Severity::Warn => 12_000,
        Severity::Good => 20_000,
    }
}

pub struct EngineState {
    tracker:        CooldownTracker<AbilityBook>,
    ready:          ReadyTracker,
    major_cds:      Vec<u32>,
    advice_last_ms: HashMap<String, u64>,
}

impl EngineState {
    /// `profile_majors` is used unless the config names its own major cooldowns.
    pub fn new(book: AbilityBook, profile_majors: Vec<u32>, config: &ReplayConfig) -> Self {
        let effects = EffectSet::new(book.effects().to_vec());
        let tracker = CooldownTracker::new(book)
            .with_effects(effects)
            .with_lag_margin(config.lag_margin_ms)
            .with_haste(config.initial_haste);
        let major_cds = if config.major_cds.is_empty() {
            profile_majors
        } else {
            config.major_cds.clone()
        };
        Self {
            tracker,
            ready: ReadyTracker::default(),
            major_cds,
            advice_last_ms: HashMap::new(),
        }
    }

    pub fn tracker(&self) -> &CooldownTracker<AbilityBook> {
        &self.tracker
    }

    fn can_fire(&self, key: &str, severity: &Severity, now_ms: u64) -> bool {
        match self.advice_last_ms.get(key) {
            Some(last) => now_ms.saturating_sub(*last) >= advice_cooldown_ms(severity),
            None       => true,
        }
    }

    fn mark_fired(&mut self, key: &str, now_ms: u64) {
        self.advice_last_ms.insert(key.to_owned(), now_ms);
    }

    /// Run one event through the tracker and the rules.
    pub fn process(&mut self, event: &CombatEvent) -> (Vec<SpellUsableUpdate>, Vec<AdviceEvent>) {
        let now_ms = event.timestamp_ms();
        self.ready.observe_event(now_ms as f64);

        let updates = self.tracker.handle(event);

        let candidates = {
            let ctx = RuleContext {
                tracker: &self.tracker,
                ready:   &self.ready,
                now_ms,
            };
            let input = RuleInput { event, updates: &updates };
            cooldown_drift::evaluate(&input, &ctx, &self.major_cds)
        };

        self.ready.absorb(&updates);

        let mut advice = Vec::new();
        for a in candidates {
            if self.can_fire(&a.key, &a.severity, now_ms) {
                self.mark_fired(&a.key, now_ms);
                advice.push(a);
            }
        }
        (updates, advice)
    }

    /// Process and forward. Returns false once either collector has hung up.
    async fn forward(
        &mut self,
        event:     &CombatEvent,
        update_tx: &Sender<SpellUsableUpdate>,
        advice_tx: &Sender<AdviceEvent>,
    ) -> bool {
        let (updates, advice) = self.process(event);
        for u in updates {
            if update_tx.send(u).await.is_err() {
                return false;
            }
        }
        for a in advice {
            if advice_tx.send(a).await.is_err() {
                return false;
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Main engine task
// ---------------------------------------------------------------------------

/// Consume events until the encounter ends. A stream that stops without an
/// EncounterEnded is closed as if it had ended at the last event seen.
/// Returns the diagnostics recorded along the way.
pub async fn run(
    mut event_rx: Receiver<CombatEvent>,
    update_tx:    Sender<SpellUsableUpdate>,
    advice_tx:    Sender<AdviceEvent>,
    mut eng:      EngineState,
) -> Result<Vec<Diagnostic>> {
    let mut last_ms = None;
    let mut ended   = false;

    while let Some(event) = event_rx.recv().await {
        last_ms = Some(event.timestamp_ms());
        let is_end = matches!(event, CombatEvent::EncounterEnded { .. });

        if !eng.forward(&event, &update_tx, &advice_tx).await {
            tracing::warn!("Collector closed early, stopping replay");
            return Ok(eng.tracker.take_diagnostics());
        }
        if is_end {
            ended = true;
            break;
        }
    }

    if !ended {
        if let Some(timestamp_ms) = last_ms {
            tracing::debug!("Event stream ended without encounter end, closing @ {}", timestamp_ms);
            let end = CombatEvent::EncounterEnded { timestamp_ms };
            eng.forward(&end, &update_tx, &advice_tx).await;
        }
    }

    let diagnostics = eng.tracker.take_diagnostics();
    tracing::info!("Encounter closed with {} diagnostics", diagnostics.len());
    Ok(diagnostics)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
#[cfg(test)]
mod tests {
    use super::*;
    use crate::abilities::AbilityConfig;
    use crate::update::UpdateKind;
    use tokio::sync::mpsc;

    const WINGS: u32 = 31884;
    const JUDGMENT: u32 = 20271;

    fn engine() -> EngineState {
        let book = AbilityBook::new()
            .with(AbilityConfig::new(WINGS, "Avenging Wrath", 120_000))
            .with(AbilityConfig::new(JUDGMENT, "Judgment", 12_000));
        EngineState::new(book, vec![WINGS], &ReplayConfig::default())
    }

    fn used(timestamp_ms: u64, ability_id: u32) -> CombatEvent {
        CombatEvent::AbilityUsed { timestamp_ms, ability_id }
    }

    #[test]
    fn config_majors_override_profile() {
        let mut config = ReplayConfig::default();
        config.major_cds = vec![JUDGMENT];
        let eng = EngineState::new(AbilityBook::new(), vec![WINGS], &config);
        assert_eq!(eng.major_cds, vec![JUDGMENT]);
    }

    #[test]
    fn process_returns_updates_and_advice() {
        let mut eng = engine();
        let (updates, advice) = eng.process(&used(0, JUDGMENT));
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].kind, UpdateKind::BeginCooldown);
        assert!(advice.is_empty());

        let (_, advice) = eng.process(&used(20_000, WINGS));
        assert_eq!(advice.len(), 1);
        assert_eq!(advice[0].key, format!("cooldown_drift:{}", WINGS));
    }

    #[test]
    fn duplicate_advice_is_suppressed() {
        let mut eng = engine();
        assert!(eng.can_fire("k", &Severity::Warn, 1_000));
        eng.mark_fired("k", 1_000);
        assert!(!eng.can_fire("k", &Severity::Warn, 12_999));
        assert!(eng.can_fire("k", &Severity::Warn, 13_000));
        assert!(eng.can_fire("other", &Severity::Warn, 1_000));
    }

    #[tokio::test]
    async fn run_stops_at_encounter_end() {
        let (event_tx, event_rx)   = mpsc::channel(16);
        let (update_tx, mut update_rx) = mpsc::channel(16);
        let (advice_tx, _advice_rx) = mpsc::channel(16);

        event_tx.send(used(0, JUDGMENT)).await.unwrap();
        event_tx.send(CombatEvent::EncounterEnded { timestamp_ms: 5_000 }).await.unwrap();
        event_tx.send(used(6_000, JUDGMENT)).await.unwrap();
        drop(event_tx);

        let diagnostics = run(event_rx, update_tx, advice_tx, engine()).await.unwrap();
        assert!(diagnostics.is_empty());

        let mut kinds = Vec::new();
        while let Some(u) = update_rx.recv().await {
            kinds.push((u.kind, u.timestamp));
        }
        assert_eq!(
            kinds,
            vec![(UpdateKind::BeginCooldown, 0.0), (UpdateKind::EndCooldown, 12_000.0)]
        );
    }

    #[tokio::test]
    async fn run_closes_stream_without_encounter_end() {
        let (event_tx, event_rx)   = mpsc::channel(16);
        let (update_tx, mut update_rx) = mpsc::channel(16);
        let (advice_tx, _advice_rx) = mpsc::channel(16);

        event_tx.send(used(1_000, JUDGMENT)).await.unwrap();
        drop(event_tx);

        run(event_rx, update_tx, advice_tx, engine()).await.unwrap();

        let mut updates = Vec::new();
        while let Some(u) = update_rx.recv().await {
            updates.push(u);
        }
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[1].kind, UpdateKind::EndCooldown);
        assert!(updates[1].is_available);
    }

    #[tokio::test]
    async fn run_reports_desync_diagnostics() {
        let (event_tx, event_rx)   = mpsc::channel(16);
        let (update_tx, _update_rx) = mpsc::channel(16);
        let (advice_tx, _advice_rx) = mpsc::channel(16);

        event_tx.send(used(0, JUDGMENT)).await.unwrap();
        event_tx.send(used(4_000, JUDGMENT)).await.unwrap();
        drop(event_tx);

        let diagnostics = run(event_rx, update_tx, advice_tx, engine()).await.unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert!(matches!(diagnostics[0], Diagnostic::Desync { ability_id: JUDGMENT, .. }));
    }
}
