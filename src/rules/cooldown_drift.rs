/// Fires when a major cooldown is used long after it became ready.
///
/// "Drift" = time from the moment the cooldown was last fully charged (or the
/// start of the encounter, if it had not been used yet) to the use that
/// starts its next cycle. Every second of drift is a second of cooldown the
/// player never gets back.
///
/// Only uses that start a fresh cycle count. Spending a spare charge while
/// the ability is already recharging loses nothing.
use super::{advice, RuleContext, RuleInput, RuleOutput};
use crate::{
    abilities::AbilityLookup,
    engine::Severity,
    events::CombatEvent,
    update::{SpellUsableUpdate, UpdateKind},
};

pub const KEY: &str = "cooldown_drift";
const DRIFT_THRESHOLD_MS: f64 = 8_000.0;

pub fn evaluate<L: AbilityLookup>(
    input:        &RuleInput,
    ctx:          &RuleContext<L>,
    major_cd_ids: &[u32],
) -> RuleOutput {
    let CombatEvent::AbilityUsed { ability_id, .. } = input.event else {
        return vec![];
    };

    let cd_id = ctx.tracker.canonical_id(*ability_id);
    let is_major = major_cd_ids
        .iter()
        .any(|id| ctx.tracker.canonical_id(*id) == cd_id);
    if !is_major {
        return vec![];
    }

    let is_begin = |u: &&SpellUsableUpdate| u.ability_id == cd_id && u.kind == UpdateKind::BeginCooldown;
    if !input.updates.iter().any(|u| is_begin(&u)) {
        return vec![];
    }

    // The recharge may have completed on this same event, just before the use.
    let ended_now = input
        .updates
        .iter()
        .take_while(|u| !is_begin(u))
        .filter(|u| u.ability_id == cd_id && u.kind == UpdateKind::EndCooldown)
        .last()
        .map(|u| u.timestamp);

    let Some(ready_since) = ended_now.or_else(|| ctx.ready.ready_since(cd_id)) else {
        return vec![];
    };

    let drift_ms = ctx.now_ms as f64 - ready_since;
    if drift_ms < DRIFT_THRESHOLD_MS {
        return vec![];
    }

    let drift_s = drift_ms / 1_000.0;
    let name    = ctx.name_of(cd_id);

    vec![advice(
        &format!("{}:{}", KEY, cd_id),
        "Major cooldown held",
        format!(
            "{} sat ready for ~{:.0}s before use. Use it on cooldown unless saving it for a mechanic.",
            name, drift_s
        ),
        Severity::Warn,
        vec![
            ("drift".to_owned(), format!("{:.1}s", drift_s)),
            ("spell".to_owned(), name),
        ],
        ctx.now_ms,
    )]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abilities::{AbilityBook, AbilityConfig};
    use crate::state::ReadyTracker;
    use crate::tracker::CooldownTracker;

    const WINGS: u32 = 31884;

    fn setup() -> (CooldownTracker<AbilityBook>, ReadyTracker) {
        let book = AbilityBook::new().with(AbilityConfig::new(WINGS, "Avenging Wrath", 120_000));
        (CooldownTracker::new(book), ReadyTracker::default())
    }

    fn step(
        tracker: &mut CooldownTracker<AbilityBook>,
        ready:   &mut ReadyTracker,
        event:   CombatEvent,
    ) -> RuleOutput {
        ready.observe_event(event.timestamp_ms() as f64);
        let updates = tracker.handle(&event);
        let out = {
            let ctx   = RuleContext { tracker: &*tracker, ready: &*ready, now_ms: event.timestamp_ms() };
            let input = RuleInput { event: &event, updates: &updates };
            evaluate(&input, &ctx, &[WINGS])
        };
        ready.absorb(&updates);
        out
    }

    #[test]
    fn late_first_use_fires() {
        let (mut t, mut r) = setup();
        step(&mut t, &mut r, CombatEvent::Other { timestamp_ms: 0, ability_id: 0 });
        let out = step(&mut t, &mut r, CombatEvent::AbilityUsed { timestamp_ms: 15_000, ability_id: WINGS });
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].severity, Severity::Warn);
        assert!(out[0].message.contains("Avenging Wrath"));
        assert!(out[0].message.contains("15s"));
    }

    #[test]
    fn prompt_use_is_quiet() {
        let (mut t, mut r) = setup();
        step(&mut t, &mut r, CombatEvent::Other { timestamp_ms: 0, ability_id: 0 });
        let out = step(&mut t, &mut r, CombatEvent::AbilityUsed { timestamp_ms: 2_000, ability_id: WINGS });
        assert!(out.is_empty());
    }

    #[test]
    fn drift_measured_from_recharge_not_pull() {
        let (mut t, mut r) = setup();
        step(&mut t, &mut r, CombatEvent::AbilityUsed { timestamp_ms: 0, ability_id: WINGS });
        // Comes back at 120s; used at 125s = 5s drift.
        let out = step(&mut t, &mut r, CombatEvent::AbilityUsed { timestamp_ms: 125_000, ability_id: WINGS });
        assert!(out.is_empty());
        // Comes back at 245s; used at 260s = 15s drift.
        let out = step(&mut t, &mut r, CombatEvent::AbilityUsed { timestamp_ms: 260_000, ability_id: WINGS });
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn ignores_non_major_abilities() {
        let (mut t, mut r) = setup();
        step(&mut t, &mut r, CombatEvent::Other { timestamp_ms: 0, ability_id: 0 });
        let out = step(&mut t, &mut r, CombatEvent::AbilityUsed { timestamp_ms: 60_000, ability_id: 853 });
        assert!(out.is_empty());
    }
}
