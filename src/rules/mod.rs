pub mod cooldown_drift;

use crate::{
    abilities::AbilityLookup,
    engine::{AdviceEvent, Severity},
    events::CombatEvent,
    state::ReadyTracker,
    tracker::CooldownTracker,
    update::SpellUsableUpdate,
};

/// Read-only context passed to every rule evaluator.
pub struct RuleContext<'a, L> {
    /// Tracker state *after* the current event was handled.
    pub tracker: &'a CooldownTracker<L>,
    /// Ready times *before* the current event's updates were absorbed.
    pub ready:   &'a ReadyTracker,
    pub now_ms:  u64,
}

impl<'a, L: AbilityLookup> RuleContext<'a, L> {
    pub fn name_of(&self, ability_id: u32) -> String {
        self.tracker
            .lookup()
            .ability_name(ability_id)
            .map_or_else(|| format!("#{}", ability_id), str::to_owned)
    }
}

/// The current event being evaluated, with the updates it produced.
pub struct RuleInput<'a> {
    pub event:   &'a CombatEvent,
    pub updates: &'a [SpellUsableUpdate],
}

/// Rules return zero or more advice events.
/// Zero means the rule did not fire for this event.
pub type RuleOutput = Vec<AdviceEvent>;

// ---------------------------------------------------------------------------
// Convenience constructor so rules don't repeat boilerplate
// ---------------------------------------------------------------------------

pub fn advice(
    key:      &str,
    title:    &str,
    message:  String,
    severity: Severity,
    kv:       Vec<(String, String)>,
    now_ms:   u64,
) -> AdviceEvent {
    AdviceEvent {
        key:          key.to_owned(),
        title:        title.to_owned(),
        message,
        severity,
        kv,
        timestamp_ms: now_ms,
    }
}
