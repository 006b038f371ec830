/// Synthesized cooldown updates: the tracker's output stream.
///
/// One update is produced per state change. Consumers treat them as a
/// read-only projection of tracker state at the moment of the change.
use crate::state::CooldownEntry;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    /// A fully charged ability started recharging.
    BeginCooldown,
    /// A spare charge was spent while already recharging.
    UseCharge,
    /// The last missing charge came back; the ability is fully charged.
    EndCooldown,
    /// One charge came back but others are still recharging.
    RestoreCharge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpellUsableUpdate {
    pub kind:                        UpdateKind,
    pub timestamp:                   f64,
    pub ability_id:                  u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ability_name:                String,
    pub is_on_cooldown:              bool,
    pub is_available:                bool,
    pub charges_available:           u32,
    pub max_charges:                 u32,
    pub overall_start_timestamp:     f64,
    pub expected_recharge_timestamp: f64,
    pub expected_recharge_duration:  f64,
}

impl SpellUsableUpdate {
    /// Snapshot `entry` (after the change has been applied).
    pub fn from_entry(
        kind:         UpdateKind,
        ability_id:   u32,
        ability_name: &str,
        timestamp:    f64,
        entry:        &CooldownEntry,
    ) -> Self {
        Self {
            kind,
            timestamp,
            ability_id,
            ability_name:                ability_name.to_owned(),
            is_on_cooldown:              entry.max_charges > entry.charges_available,
            is_available:                entry.charges_available > 0,
            charges_available:           entry.charges_available,
            max_charges:                 entry.max_charges,
            overall_start_timestamp:     entry.overall_start,
            expected_recharge_timestamp: entry.expected_end,
            expected_recharge_duration:  entry.expected_duration,
        }
    }
}
