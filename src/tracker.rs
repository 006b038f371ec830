/// Cooldown availability tracker. Reconstructs every ability's charge and
/// recharge state from the replayed event stream.
///
/// The log never states a cooldown directly. The tracker predicts one from
/// ability config, haste, and mod-rate, and corrects itself whenever the log
/// shows an ability being used that it believed unavailable. Recharge
/// completion is detected lazily: an entry whose expected end has passed is
/// closed by the next event at or after that time.
///
/// All state is keyed by canonical ability id, so abilities sharing one
/// cooldown are tracked as one.
use crate::abilities::AbilityLookup;
use crate::effects::{EffectAction, EffectSet};
use crate::events::CombatEvent;
use crate::state::{CooldownEntry, RateLedger, RateTarget};
use crate::update::{SpellUsableUpdate, UpdateKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Divergence in milliseconds beyond which a use-while-unavailable is reported.
/// Smaller gaps are log timestamp noise.
pub const COOLDOWN_LAG_MARGIN_MS: f64 = 150.0;

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mutation {
    EndCooldown,
    ReduceCooldown,
}

/// Advisory record of the log and the model disagreeing. Never fatal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Diagnostic {
    /// The ability was used while the model had no charges left.
    Desync {
        ability_id:   u32,
        timestamp:    f64,
        remaining_ms: f64,
        before:       CooldownEntry,
    },
    /// A mutation targeted an ability that was not recharging.
    NotOnCooldown {
        ability_id: u32,
        timestamp:  f64,
        mutation:   Mutation,
    },
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

pub struct CooldownTracker<L> {
    lookup:        L,
    /// Active cooldowns. Abilities that are fully charged have no entry.
    cooldowns:     BTreeMap<u32, CooldownEntry>,
    rates:         RateLedger,
    effects:       EffectSet,
    /// Current haste as a fraction (0.3 = +30%).
    haste:         f64,
    now:           f64,
    lag_margin_ms: f64,
    pending:       Vec<SpellUsableUpdate>,
    diagnostics:   Vec<Diagnostic>,
}

impl<L: AbilityLookup> CooldownTracker<L> {
    pub fn new(lookup: L) -> Self {
        Self {
            lookup,
            cooldowns:     BTreeMap::new(),
            rates:         RateLedger::default(),
            effects:       EffectSet::default(),
            haste:         0.0,
            now:           0.0,
            lag_margin_ms: COOLDOWN_LAG_MARGIN_MS,
            pending:       Vec::new(),
            diagnostics:   Vec::new(),
        }
    }

    pub fn with_effects(mut self, effects: EffectSet) -> Self {
        self.effects = effects;
        self
    }

    pub fn with_lag_margin(mut self, lag_margin_ms: f64) -> Self {
        self.lag_margin_ms = lag_margin_ms;
        self
    }

    /// Haste in effect when the encounter starts.
    pub fn with_haste(mut self, haste: f64) -> Self {
        self.haste = haste;
        self
    }

    pub fn lookup(&self) -> &L {
        &self.lookup
    }

    /// Timestamp of the last handled event.
    pub fn now(&self) -> f64 {
        self.now
    }

    pub fn haste(&self) -> f64 {
        self.haste
    }

    pub fn rates(&self) -> &RateLedger {
        &self.rates
    }

    pub fn canonical_id(&self, ability_id: u32) -> u32 {
        self.lookup.canonical_id(ability_id)
    }

    pub fn entry(&self, ability_id: u32) -> Option<&CooldownEntry> {
        self.cooldowns.get(&self.canonical_id(ability_id))
    }

    /// Active cooldowns by canonical id, in id order.
    pub fn active(&self) -> impl Iterator<Item = (u32, &CooldownEntry)> {
        self.cooldowns.iter().map(|(id, entry)| (*id, entry))
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    /// Updates synthesized since the last drain, in the order they happened.
    pub fn drain_updates(&mut self) -> Vec<SpellUsableUpdate> {
        std::mem::take(&mut self.pending)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Whether the ability can be used. Not the opposite of `is_on_cooldown`:
    /// a two-charge ability with one charge left is both.
    pub fn is_available(&self, ability_id: u32) -> bool {
        self.entry(ability_id).map_or(true, |e| e.charges_available > 0)
    }

    pub fn is_on_cooldown(&self, ability_id: u32) -> bool {
        self.entry(ability_id).is_some()
    }

    pub fn charges_available(&self, ability_id: u32) -> u32 {
        match self.entry(ability_id) {
            Some(e) => e.charges_available,
            None => self.configured_max_charges(self.canonical_id(ability_id)),
        }
    }

    pub fn charges_on_cooldown(&self, ability_id: u32) -> u32 {
        self.entry(ability_id).map_or(0, CooldownEntry::charges_on_cooldown)
    }

    /// Time to recover one full charge under current conditions. This is not
    /// the time left on the cooldown. Zero for abilities without a cooldown.
    pub fn full_cooldown_duration(&self, ability_id: u32) -> f64 {
        self.expected_cooldown(self.canonical_id(ability_id), false)
    }

    /// Time until the next charge comes back, measured from `at`.
    pub fn cooldown_remaining(&self, ability_id: u32, at: f64) -> f64 {
        self.entry(ability_id).map_or(0.0, |e| e.expected_end - at)
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Start the ability's cooldown as though it was used at `timestamp`.
    /// Called for every use in the stream; consumers can call it to model
    /// uses the log does not show.
    pub fn begin_cooldown(&mut self, ability_id: u32, timestamp: f64) {
        let cd_id = self.canonical_id(ability_id);
        self.begin_canonical(cd_id, timestamp);
    }

    /// End the cooldown, or for a multi-charge ability restore one charge.
    ///
    /// `reset_cooldown` restarts the recharge cycle at `at` when charges are
    /// still missing afterwards; without it the restored charge leaves the
    /// cycle's progress untouched. `restore_all_charges` refills every charge.
    pub fn end_cooldown(
        &mut self,
        ability_id:          u32,
        at:                  f64,
        reset_cooldown:      bool,
        restore_all_charges: bool,
    ) {
        let cd_id = self.canonical_id(ability_id);
        self.end_canonical(cd_id, at, reset_cooldown, restore_all_charges);
    }

    /// Take `reduction_ms` off the remaining cooldown. Returns the reduction
    /// that actually landed, which is less than requested when the cooldown
    /// would have finished anyway.
    pub fn reduce_cooldown(&mut self, ability_id: u32, reduction_ms: f64, at: f64) -> f64 {
        let cd_id = self.canonical_id(ability_id);
        if !self.cooldowns.contains_key(&cd_id) {
            self.note_not_on_cooldown(cd_id, at, Mutation::ReduceCooldown);
            return 0.0;
        }
        if reduction_ms <= 0.0 {
            return 0.0;
        }

        // A flat reduction is not sped up by haste but it is by mod rate:
        // an 8s cooldown reduced by 2s at once ends at 6s normally, at 3s with
        // a doubled mod rate.
        let rate   = self.rates.effective(cd_id);
        let scaled = reduction_ms / rate;
        let mut effective = reduction_ms;

        let Some(entry) = self.cooldowns.get_mut(&cd_id) else { return 0.0 };
        entry.expected_end -= scaled;

        if at >= entry.expected_end {
            let carryover = at - entry.expected_end;
            if entry.charges_on_cooldown() == 1 {
                // This finishes the cooldown, so the overflow is wasted.
                effective = (scaled - carryover) * rate;
            }
            self.reset_cycle(cd_id, at, carryover);
            // Cycle already reset above.
            self.end_canonical(cd_id, at, false, false);
        }

        let effective = effective.max(0.0).min(reduction_ms);
        tracing::debug!(
            "Reduced cooldown of {} by {} (effective: {})",
            self.display_name(cd_id), reduction_ms, effective
        );
        effective
    }

    /// Multiply the cooldown recovery rate ("mod rate") of the target
    /// abilities by `multiplier` (1.15 for "recovers 15% faster"). Active
    /// cooldowns keep the progress they already made.
    pub fn apply_cooldown_rate_change(&mut self, target: impl Into<RateTarget>, multiplier: f64, at: f64) {
        if !(multiplier.is_finite() && multiplier > 0.0) {
            tracing::warn!("Ignoring invalid cooldown rate multiplier {}", multiplier);
            return;
        }
        match target.into() {
            RateTarget::All => {
                let change = self.rates.scale_global(multiplier);
                for (id, entry) in self.cooldowns.iter_mut() {
                    rescale_logged(*id, entry, at, change);
                }
                tracing::debug!("Applied global mod rate x{} (now {})", multiplier, self.rates.global());
            }
            RateTarget::Abilities(ids) => {
                for id in ids {
                    let cd_id  = self.canonical_id(id);
                    let change = self.rates.scale_ability(cd_id, multiplier);
                    if let Some(entry) = self.cooldowns.get_mut(&cd_id) {
                        rescale_logged(cd_id, entry, at, change);
                    }
                    tracing::debug!(
                        "Applied mod rate x{} to {} (now {})",
                        multiplier, self.display_name(cd_id), self.rates.ability(cd_id)
                    );
                }
            }
        }
    }

    /// Exact inverse of `apply_cooldown_rate_change`, for buffs that come and go.
    pub fn remove_cooldown_rate_change(&mut self, target: impl Into<RateTarget>, multiplier: f64, at: f64) {
        if !(multiplier.is_finite() && multiplier > 0.0) {
            tracing::warn!("Ignoring invalid cooldown rate multiplier {}", multiplier);
            return;
        }
        self.apply_cooldown_rate_change(target, 1.0 / multiplier, at);
    }

    // -----------------------------------------------------------------------
    // Replay
    // -----------------------------------------------------------------------

    /// Process one event and return the updates it produced.
    ///
    /// Order per event: finish recharges that completed by now, then the
    /// event's own handler, then any declarative effects it triggers.
    pub fn handle(&mut self, event: &CombatEvent) -> Vec<SpellUsableUpdate> {
        let ts = event.timestamp_ms() as f64;
        self.now = ts;
        self.expire_finished(ts);

        match event {
            CombatEvent::AbilityUsed { ability_id, .. } => self.begin_cooldown(*ability_id, ts),
            CombatEvent::RecoveryRateChanged { old_rate, new_rate, .. } => {
                self.on_haste_changed(*old_rate, *new_rate, ts)
            }
            CombatEvent::MaxChargesIncreased { ability_id, by, .. } => {
                if let Some(entry) = self.cooldowns.get_mut(&self.lookup.canonical_id(*ability_id)) {
                    entry.max_charges = entry.max_charges.saturating_add(*by);
                }
            }
            CombatEvent::MaxChargesDecreased { ability_id, by, .. } => {
                let cd_id = self.canonical_id(*ability_id);
                if let Some(entry) = self.cooldowns.get_mut(&cd_id) {
                    entry.max_charges = entry.max_charges.saturating_sub(*by).max(1);
                    if entry.max_charges <= entry.charges_available {
                        self.end_canonical(cd_id, ts, false, true);
                    }
                }
            }
            CombatEvent::EncounterEnded { .. } => self.close_all(),
            CombatEvent::BuffApplied { .. }
            | CombatEvent::BuffRemoved { .. }
            | CombatEvent::BuffStacked { .. }
            | CombatEvent::Other { .. } => {}
        }

        if !self.effects.is_empty() {
            for action in self.effects.actions_for(event) {
                self.apply_effect(action, ts);
            }
        }

        self.drain_updates()
    }

    /// Close every cooldown at its expected end with all charges restored, so
    /// nothing dangles past the end of the analysed window.
    pub fn close_all(&mut self) {
        let open: Vec<(u32, f64)> = self
            .cooldowns
            .iter()
            .map(|(id, e)| (*id, e.expected_end))
            .collect();
        for (cd_id, end) in open {
            self.end_canonical(cd_id, end, true, true);
        }
    }

    fn expire_finished(&mut self, ts: f64) {
        let ids: Vec<u32> = self.cooldowns.keys().copied().collect();
        for cd_id in ids {
            // A long gap between events can cover several charges.
            while let Some(end) = self
                .cooldowns
                .get(&cd_id)
                .map(|e| e.expected_end)
                .filter(|end| *end <= ts)
            {
                self.end_canonical(cd_id, end, true, false);
            }
        }
    }

    fn on_haste_changed(&mut self, old_haste: f64, new_haste: f64, ts: f64) {
        tracing::debug!(
            "Haste changed from {:.1}% to {:.1}% @ {} - updating cooldowns",
            old_haste * 100.0, new_haste * 100.0, ts
        );
        self.haste = new_haste;

        let changes: Vec<(u32, f64)> = self
            .cooldowns
            .iter()
            .filter_map(|(id, entry)| {
                let new_duration = self.expected_cooldown(*id, true);
                (new_duration > 0.0 && new_duration != entry.expected_duration)
                    .then(|| (*id, entry.expected_duration / new_duration))
            })
            .collect();

        for (cd_id, change) in changes {
            if let Some(entry) = self.cooldowns.get_mut(&cd_id) {
                rescale_logged(cd_id, entry, ts, change);
            }
        }
    }

    fn apply_effect(&mut self, action: EffectAction, ts: f64) {
        match action {
            EffectAction::ApplyRate { target, multiplier } => {
                self.apply_cooldown_rate_change(target, multiplier, ts)
            }
            EffectAction::RemoveRate { target, multiplier } => {
                self.remove_cooldown_rate_change(target, multiplier, ts)
            }
            // Triggers fire on every cast whether or not the target is
            // recharging. Only an explicit call on an idle ability is noteworthy.
            EffectAction::Reduce { spell_id, reduction_ms } => {
                if self.is_on_cooldown(spell_id) {
                    self.reduce_cooldown(spell_id, reduction_ms, ts);
                } else {
                    tracing::debug!(
                        "Skipping {}ms reduction of {} @ {}, not on cooldown",
                        reduction_ms, self.display_name(self.canonical_id(spell_id)), ts
                    );
                }
            }
            EffectAction::Restore { spell_id, reset, all } => {
                if self.is_on_cooldown(spell_id) {
                    self.end_cooldown(spell_id, ts, reset, all);
                } else {
                    tracing::debug!(
                        "Skipping charge restore of {} @ {}, not on cooldown",
                        self.display_name(self.canonical_id(spell_id)), ts
                    );
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn begin_canonical(&mut self, cd_id: u32, timestamp: f64) {
        let Some(entry) = self.cooldowns.get_mut(&cd_id) else {
            let duration = self.expected_cooldown(cd_id, false);
            if duration <= 0.0 {
                return; // unknown, or no cooldown
            }
            let max_charges = self.configured_max_charges(cd_id);
            let entry = CooldownEntry {
                overall_start:     timestamp,
                expected_duration: duration,
                expected_end:      timestamp + duration,
                charges_available: max_charges - 1,
                max_charges,
            };
            self.emit(UpdateKind::BeginCooldown, cd_id, timestamp, &entry);
            self.cooldowns.insert(cd_id, entry);
            return;
        };

        if entry.charges_available > 0 {
            entry.charges_available -= 1;
            let snapshot = entry.clone();
            self.emit(UpdateKind::UseCharge, cd_id, timestamp, &snapshot);
            return;
        }

        // The log says it was used, so it was available: our prediction is off.
        let remaining = entry.expected_end - timestamp;
        if remaining > self.lag_margin_ms {
            let before = entry.clone();
            tracing::warn!(
                "Cooldown desync - {} (id {}) used at {} while tracked with no charges; \
                 expected {:.0}ms left. Missing haste, CDR, resets, or wrong ability config?",
                self.display_name(cd_id), cd_id, timestamp, remaining
            );
            self.diagnostics.push(Diagnostic::Desync {
                ability_id:   cd_id,
                timestamp,
                remaining_ms: remaining,
                before,
            });
        }

        self.end_canonical(cd_id, timestamp, false, false);
        self.begin_canonical(cd_id, timestamp);
    }

    fn end_canonical(&mut self, cd_id: u32, at: f64, reset_cooldown: bool, restore_all_charges: bool) {
        let Some(entry) = self.cooldowns.get_mut(&cd_id) else {
            self.note_not_on_cooldown(cd_id, at, Mutation::EndCooldown);
            return;
        };

        if restore_all_charges {
            entry.charges_available = entry.max_charges;
        } else {
            entry.charges_available += 1;
        }

        if entry.is_full() {
            entry.charges_available = entry.max_charges;
            entry.expected_end      = at;
            let snapshot = entry.clone();
            self.cooldowns.remove(&cd_id);
            self.emit(UpdateKind::EndCooldown, cd_id, at, &snapshot);
        } else {
            if reset_cooldown {
                self.reset_cycle(cd_id, at, 0.0);
            }
            if let Some(snapshot) = self.cooldowns.get(&cd_id).cloned() {
                self.emit(UpdateKind::RestoreCharge, cd_id, at, &snapshot);
            }
        }
    }

    /// Start a fresh recharge cycle at `at`, minus `carryover_ms` of progress
    /// already banked. Does not touch charges or emit updates.
    fn reset_cycle(&mut self, cd_id: u32, at: f64, carryover_ms: f64) {
        let duration = self.expected_cooldown(cd_id, false);
        let Some(entry) = self.cooldowns.get_mut(&cd_id) else { return };
        if duration <= 0.0 {
            tracing::error!("Tried to reset cooldown of {} which has an entry but no cooldown", cd_id);
            return;
        }
        entry.expected_duration = duration;
        entry.expected_end      = at + duration - carryover_ms;
    }

    /// Expected recharge duration in whole milliseconds, including haste and
    /// mod rate. Active entries are kept current, so their value is used
    /// unless `force_lookup` asks for a fresh computation.
    fn expected_cooldown(&self, cd_id: u32, force_lookup: bool) -> f64 {
        if !force_lookup {
            if let Some(entry) = self.cooldowns.get(&cd_id) {
                return entry.expected_duration;
            }
        }
        self.lookup
            .cooldown_ms(cd_id, self.haste)
            .map_or(0.0, |base| (base / self.rates.effective(cd_id)).round())
    }

    fn configured_max_charges(&self, cd_id: u32) -> u32 {
        self.lookup.max_charges(cd_id).unwrap_or(1).max(1)
    }

    fn note_not_on_cooldown(&mut self, cd_id: u32, at: f64, mutation: Mutation) {
        tracing::debug!(
            "Tried {:?} on {}, but it wasn't on cooldown",
            mutation, self.display_name(cd_id)
        );
        self.diagnostics.push(Diagnostic::NotOnCooldown { ability_id: cd_id, timestamp: at, mutation });
    }

    fn display_name(&self, cd_id: u32) -> String {
        self.lookup
            .ability_name(cd_id)
            .map_or_else(|| format!("#{}", cd_id), str::to_owned)
    }

    fn emit(&mut self, kind: UpdateKind, cd_id: u32, timestamp: f64, entry: &CooldownEntry) {
        let name = self.lookup.ability_name(cd_id).unwrap_or_default();
        let update = SpellUsableUpdate::from_entry(kind, cd_id, name, timestamp, entry);
        tracing::debug!("{:?} on {} @ {}", kind, self.display_name(cd_id), timestamp);
        self.pending.push(update);
    }
}

fn rescale_logged(cd_id: u32, entry: &mut CooldownEntry, at: f64, change: f64) {
    let (old_duration, old_end) = (entry.expected_duration, entry.expected_end);
    entry.rescale(at, change);
    tracing::debug!(
        "Cooldown changed for active CD {} - duration {} -> {}, expected end {} -> {}",
        cd_id, old_duration, entry.expected_duration, old_end, entry.expected_end
    );
}
