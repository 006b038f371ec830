/// Cooldown data model: per-ability entries and the recovery-rate ledger.
///
/// Both live inside a single `CooldownTracker` for one encounter.
/// No locking is needed because replay is single-threaded.
use crate::update::{SpellUsableUpdate, UpdateKind};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

// ---------------------------------------------------------------------------
// Cooldown entries
// ---------------------------------------------------------------------------

/// An ability that is currently recharging. Spells without charges behave as
/// one-charge spells. The entry is removed when the last charge comes back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CooldownEntry {
    /// When the current cooldown cycle began (not necessarily the latest charge).
    pub overall_start:     f64,
    /// Full recharge duration under current conditions.
    pub expected_duration: f64,
    /// When the next charge is expected back.
    pub expected_end:      f64,
    pub charges_available: u32,
    pub max_charges:       u32,
}

impl CooldownEntry {
    pub fn charges_on_cooldown(&self) -> u32 {
        self.max_charges.saturating_sub(self.charges_available)
    }

    pub fn is_full(&self) -> bool {
        self.charges_available >= self.max_charges
    }

    /// Rescale the in-flight cycle for a recovery speed change of `change_ratio`
    /// (new rate / old rate) at `at`, keeping the fraction of the cycle still
    /// remaining unchanged.
    pub fn rescale(&mut self, at: f64, change_ratio: f64) {
        let time_left      = self.expected_end - at;
        let percentage     = time_left / self.expected_duration;
        let new_duration   = self.expected_duration / change_ratio;
        self.expected_duration = new_duration;
        self.expected_end      = at + new_duration * percentage;
    }
}

// ---------------------------------------------------------------------------
// Rate ledger
// ---------------------------------------------------------------------------

/// Which abilities a mod-rate change applies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RateTarget {
    All,
    Abilities(Vec<u32>),
}

impl From<u32> for RateTarget {
    fn from(id: u32) -> Self {
        Self::Abilities(vec![id])
    }
}

impl From<Vec<u32>> for RateTarget {
    fn from(ids: Vec<u32>) -> Self {
        Self::Abilities(ids)
    }
}

/// Global and per-ability cooldown recovery multipliers ("mod rate").
/// 1.0 means one second of recovery per second.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLedger {
    global:      f64,
    per_ability: HashMap<u32, f64>,
}

impl Default for RateLedger {
    fn default() -> Self {
        Self { global: 1.0, per_ability: HashMap::new() }
    }
}

impl RateLedger {
    pub fn global(&self) -> f64 {
        self.global
    }

    pub fn ability(&self, canonical_id: u32) -> f64 {
        self.per_ability.get(&canonical_id).copied().unwrap_or(1.0)
    }

    /// Effective rate = global x per-ability.
    pub fn effective(&self, canonical_id: u32) -> f64 {
        self.global * self.ability(canonical_id)
    }

    /// Multiply the global rate. Returns the change ratio (new / old).
    pub fn scale_global(&mut self, multiplier: f64) -> f64 {
        let old = self.global;
        self.global = old * multiplier;
        self.global / old
    }

    /// Multiply one ability's rate. Returns the change ratio (new / old).
    pub fn scale_ability(&mut self, canonical_id: u32, multiplier: f64) -> f64 {
        let old = self.ability(canonical_id);
        let new = old * multiplier;
        self.per_ability.insert(canonical_id, new);
        new / old
    }
}

// ---------------------------------------------------------------------------
// Ready tracker (consumer side, built from synthesized updates)
// ---------------------------------------------------------------------------

/// When each ability last became fully charged. Abilities never seen on
/// cooldown count as ready since the encounter began.
#[derive(Debug, Default)]
pub struct ReadyTracker {
    pub encounter_start: Option<f64>,
    ready_since:         HashMap<u32, f64>,
    recharging:          HashSet<u32>,
}

impl ReadyTracker {
    pub fn observe_event(&mut self, timestamp: f64) {
        if self.encounter_start.is_none() {
            self.encounter_start = Some(timestamp);
        }
    }

    pub fn absorb(&mut self, updates: &[SpellUsableUpdate]) {
        for u in updates {
            match u.kind {
                UpdateKind::EndCooldown => {
                    self.recharging.remove(&u.ability_id);
                    self.ready_since.insert(u.ability_id, u.timestamp);
                }
                UpdateKind::BeginCooldown => {
                    self.recharging.insert(u.ability_id);
                    self.ready_since.remove(&u.ability_id);
                }
                UpdateKind::UseCharge | UpdateKind::RestoreCharge => {}
            }
        }
    }

    /// Timestamp since which `canonical_id` has been fully charged, if it is.
    pub fn ready_since(&self, canonical_id: u32) -> Option<f64> {
        if self.recharging.contains(&canonical_id) {
            return None;
        }
        self.ready_since
            .get(&canonical_id)
            .copied()
            .or(self.encounter_start)
    }
}
