/// Declarative cooldown effects loaded alongside ability data.
///
/// Each effect watches the event stream for a trigger and turns it into one of
/// the tracker's mutations. They cover the common shapes (mod-rate buffs,
/// "casting X shortens Y", "casting X resets Y") so a spec profile can
/// describe them in TOML instead of code.
use crate::events::CombatEvent;
use crate::state::RateTarget;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CooldownEffect {
    /// While `buff_id` is up, the listed abilities (all abilities when the list
    /// is empty) recover `multiplier` times as fast.
    ModRateBuff {
        buff_id:    u32,
        multiplier: f64,
        #[serde(default)]
        spell_ids:  Vec<u32>,
    },
    /// Using `trigger_id` takes `reduction_ms` off `spell_id`'s cooldown.
    CastReduces {
        trigger_id:   u32,
        spell_id:     u32,
        reduction_ms: f64,
    },
    /// Using `trigger_id` restores a charge of `spell_id` (or all of them).
    CastRestoresCharge {
        trigger_id: u32,
        spell_id:   u32,
        #[serde(default)]
        reset:      bool,
        #[serde(default)]
        all:        bool,
    },
}

impl CooldownEffect {
    fn rate_target(spell_ids: &[u32]) -> RateTarget {
        if spell_ids.is_empty() {
            RateTarget::All
        } else {
            RateTarget::Abilities(spell_ids.to_vec())
        }
    }
}

/// Mutation requested by an effect, applied by the tracker at the event's timestamp.
#[derive(Debug, Clone, PartialEq)]
pub enum EffectAction {
    ApplyRate  { target: RateTarget, multiplier: f64 },
    RemoveRate { target: RateTarget, multiplier: f64 },
    Reduce     { spell_id: u32, reduction_ms: f64 },
    Restore    { spell_id: u32, reset: bool, all: bool },
}

/// The effect definitions plus which mod-rate buffs are currently applied.
#[derive(Debug, Clone, Default)]
pub struct EffectSet {
    effects:      Vec<CooldownEffect>,
    active_buffs: BTreeSet<u32>,
}

impl EffectSet {
    pub fn new(effects: Vec<CooldownEffect>) -> Self {
        Self { effects, active_buffs: BTreeSet::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn is_buff_active(&self, buff_id: u32) -> bool {
        self.active_buffs.contains(&buff_id)
    }

    /// Actions triggered by `event`. A buff removal is only honoured if the
    /// application was seen, so a log that starts mid-buff cannot push the
    /// ledger below its baseline.
    pub fn actions_for(&mut self, event: &CombatEvent) -> Vec<EffectAction> {
        match event {
            CombatEvent::BuffApplied { ability_id, .. } => {
                if !self.active_buffs.insert(*ability_id) {
                    return Vec::new();
                }
                self.rate_actions(*ability_id, true)
            }
            CombatEvent::BuffRemoved { ability_id, .. } => {
                if !self.active_buffs.remove(ability_id) {
                    return Vec::new();
                }
                self.rate_actions(*ability_id, false)
            }
            CombatEvent::AbilityUsed { ability_id, .. } => self.cast_actions(*ability_id),
            CombatEvent::EncounterEnded { .. } => {
                let active = std::mem::take(&mut self.active_buffs);
                active
                    .into_iter()
                    .flat_map(|buff| self.rate_actions(buff, false))
                    .collect()
            }
            _ => Vec::new(),
        }
    }

    fn rate_actions(&self, buff: u32, applied: bool) -> Vec<EffectAction> {
        self.effects
            .iter()
            .filter_map(|effect| match effect {
                CooldownEffect::ModRateBuff { buff_id, multiplier, spell_ids } if *buff_id == buff => {
                    let target = CooldownEffect::rate_target(spell_ids);
                    Some(if applied {
                        EffectAction::ApplyRate { target, multiplier: *multiplier }
                    } else {
                        EffectAction::RemoveRate { target, multiplier: *multiplier }
                    })
                }
                _ => None,
            })
            .collect()
    }

    fn cast_actions(&self, cast: u32) -> Vec<EffectAction> {
        self.effects
            .iter()
            .filter_map(|effect| match effect {
                CooldownEffect::CastReduces { trigger_id, spell_id, reduction_ms } if *trigger_id == cast => {
                    Some(EffectAction::Reduce { spell_id: *spell_id, reduction_ms: *reduction_ms })
                }
                CooldownEffect::CastRestoresCharge { trigger_id, spell_id, reset, all } if *trigger_id == cast => {
                    Some(EffectAction::Restore { spell_id: *spell_id, reset: *reset, all: *all })
                }
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn avatar() -> EffectSet {
        EffectSet::new(vec![CooldownEffect::ModRateBuff {
            buff_id:    107574,
            multiplier: 2.0,
            spell_ids:  vec![6343],
        }])
    }

    #[test]
    fn buff_apply_and_remove_pair_up() {
        let mut set = avatar();
        let on = set.actions_for(&CombatEvent::BuffApplied { timestamp_ms: 0, ability_id: 107574 });
        assert_eq!(on, vec![EffectAction::ApplyRate {
            target:     RateTarget::Abilities(vec![6343]),
            multiplier: 2.0,
        }]);
        assert!(set.is_buff_active(107574));

        // Refresh while already up does nothing.
        assert!(set.actions_for(&CombatEvent::BuffApplied { timestamp_ms: 5, ability_id: 107574 }).is_empty());

        let off = set.actions_for(&CombatEvent::BuffRemoved { timestamp_ms: 10, ability_id: 107574 });
        assert_eq!(off.len(), 1);
        assert!(matches!(off[0], EffectAction::RemoveRate { .. }));
    }

    #[test]
    fn removal_without_application_is_ignored() {
        let mut set = avatar();
        assert!(set.actions_for(&CombatEvent::BuffRemoved { timestamp_ms: 0, ability_id: 107574 }).is_empty());
    }

    #[test]
    fn empty_spell_list_targets_all() {
        let mut set = EffectSet::new(vec![CooldownEffect::ModRateBuff {
            buff_id: 1, multiplier: 1.5, spell_ids: vec![],
        }]);
        let on = set.actions_for(&CombatEvent::BuffApplied { timestamp_ms: 0, ability_id: 1 });
        assert_eq!(on, vec![EffectAction::ApplyRate { target: RateTarget::All, multiplier: 1.5 }]);
    }

    #[test]
    fn encounter_end_unwinds_active_buffs() {
        let mut set = avatar();
        set.actions_for(&CombatEvent::BuffApplied { timestamp_ms: 0, ability_id: 107574 });
        let actions = set.actions_for(&CombatEvent::EncounterEnded { timestamp_ms: 50 });
        assert_eq!(actions.len(), 1);
        assert!(!set.is_buff_active(107574));
    }

    #[test]
    fn casts_trigger_reductions_and_restores() {
        let mut set = EffectSet::new(vec![
            CooldownEffect::CastReduces { trigger_id: 2061, spell_id: 2050, reduction_ms: 6000.0 },
            CooldownEffect::CastRestoresCharge { trigger_id: 200183, spell_id: 2050, reset: false, all: true },
        ]);
        assert_eq!(
            set.actions_for(&CombatEvent::AbilityUsed { timestamp_ms: 0, ability_id: 2061 }),
            vec![EffectAction::Reduce { spell_id: 2050, reduction_ms: 6000.0 }],
        );
        assert_eq!(
            set.actions_for(&CombatEvent::AbilityUsed { timestamp_ms: 0, ability_id: 200183 }),
            vec![EffectAction::Restore { spell_id: 2050, reset: false, all: true }],
        );
        assert!(set.actions_for(&CombatEvent::AbilityUsed { timestamp_ms: 0, ability_id: 1 }).is_empty());
    }
}
