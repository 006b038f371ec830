/// Ability configuration: base cooldowns, charges, shared-cooldown groups,
/// and the declarative cooldown effects attached to a spec.
///
/// The tracker only sees this data through the `AbilityLookup` trait, so
/// callers with their own spell tables can plug them in directly. The
/// bundled implementation is `AbilityBook`, built from TOML. Spec profiles are
/// embedded at compile time from `data/specs/*.toml` and parsed once.
use crate::effects::CooldownEffect;
use crate::error::{LedgerError, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Lookup boundary
// ---------------------------------------------------------------------------

/// Read-only ability metadata consumed by the tracker.
pub trait AbilityLookup {
    /// Representative id for a group of abilities sharing one cooldown.
    /// Unknown ids resolve to themselves.
    fn canonical_id(&self, ability_id: u32) -> u32;

    /// Base recharge duration in milliseconds under the given haste
    /// (a fraction, 0.3 = +30%). `None` when the ability has no cooldown or is
    /// unknown.
    fn cooldown_ms(&self, canonical_id: u32, haste: f64) -> Option<f64>;

    fn max_charges(&self, canonical_id: u32) -> Option<u32>;

    fn ability_name(&self, _ability_id: u32) -> Option<&str> {
        None
    }
}

// ---------------------------------------------------------------------------
// Embedded TOML data
// ---------------------------------------------------------------------------

const PALADIN_RETRIBUTION: &str = include_str!("../data/specs/paladin_retribution.toml");
const PRIEST_HOLY:         &str = include_str!("../data/specs/priest_holy.toml");
const WARRIOR_PROTECTION:  &str = include_str!("../data/specs/warrior_protection.toml");

static ALL_SPEC_DATA: &[(&str, &str)] = &[
    ("paladin_retribution.toml", PALADIN_RETRIBUTION),
    ("priest_holy.toml",         PRIEST_HOLY),
    ("warrior_protection.toml",  WARRIOR_PROTECTION),
];

static PROFILES: Lazy<Vec<SpecProfile>> = Lazy::new(parse_all);

// ---------------------------------------------------------------------------
// TOML deserialization structs (private)
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct TomlFile {
    spec:      Option<TomlSpecMeta>,
    #[serde(default)]
    abilities: Vec<AbilityConfig>,
    #[serde(default)]
    effects:   Vec<CooldownEffect>,
}

#[derive(Deserialize)]
struct TomlSpecMeta {
    class:     String,
    spec:      String,
    role:      String,
    cooldowns: TomlCooldowns,
}

#[derive(Deserialize)]
struct TomlCooldowns {
    major_cd_spell_ids: Vec<u32>,
}

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Configuration of a single ability (or group of abilities sharing a cooldown).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbilityConfig {
    /// Canonical id; `shared_ids` resolve to this.
    pub spell_id:     u32,
    #[serde(default)]
    pub name:         String,
    /// 0 means the ability has no cooldown.
    #[serde(default)]
    pub cooldown_ms:  u64,
    #[serde(default = "default_charges")]
    pub charges:      u32,
    /// Whether haste shortens the cooldown.
    #[serde(default)]
    pub haste_scaled: bool,
    #[serde(default)]
    pub shared_ids:   Vec<u32>,
}

fn default_charges() -> u32 { 1 }

impl AbilityConfig {
    pub fn new(spell_id: u32, name: &str, cooldown_ms: u64) -> Self {
        Self {
            spell_id,
            name: name.to_owned(),
            cooldown_ms,
            charges: 1,
            haste_scaled: false,
            shared_ids: Vec::new(),
        }
    }

    pub fn with_charges(mut self, charges: u32) -> Self {
        self.charges = charges.max(1);
        self
    }

    pub fn haste_scaled(mut self) -> Self {
        self.haste_scaled = true;
        self
    }

    pub fn sharing(mut self, ids: &[u32]) -> Self {
        self.shared_ids.extend_from_slice(ids);
        self
    }
}

/// Ability table implementing `AbilityLookup`.
#[derive(Debug, Clone, Default)]
pub struct AbilityBook {
    abilities: HashMap<u32, AbilityConfig>,
    /// any known id -> canonical id
    canonical: HashMap<u32, u32>,
    effects:   Vec<CooldownEffect>,
}

impl AbilityBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML ability file. A `[spec]` section, if present, is ignored here.
    pub fn from_toml_str(origin: &str, raw: &str) -> Result<Self> {
        let file: TomlFile = toml::from_str(raw).map_err(|source| LedgerError::AbilityData {
            origin: origin.to_owned(),
            source,
        })?;
        let mut book = Self::new();
        for config in file.abilities {
            book.insert(config);
        }
        book.effects = file.effects;
        Ok(book)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| LedgerError::io(path, e))?;
        Self::from_toml_str(&path.display().to_string(), &raw)
    }

    /// Adds or replaces an ability. Replacing drops the old shared-id mappings.
    pub fn insert(&mut self, config: AbilityConfig) {
        if let Some(old) = self.abilities.remove(&config.spell_id) {
            for id in old.shared_ids {
                self.canonical.remove(&id);
            }
        }
        self.canonical.insert(config.spell_id, config.spell_id);
        for id in &config.shared_ids {
            self.canonical.insert(*id, config.spell_id);
        }
        self.abilities.insert(config.spell_id, config);
    }

    pub fn with(mut self, config: AbilityConfig) -> Self {
        self.insert(config);
        self
    }

    pub fn add_effect(&mut self, effect: CooldownEffect) {
        self.effects.push(effect);
    }

    /// Merge `other` into `self`; definitions in `other` win.
    pub fn merge(&mut self, other: AbilityBook) {
        for (_, config) in other.abilities {
            self.insert(config);
        }
        self.effects.extend(other.effects);
    }

    pub fn get(&self, ability_id: u32) -> Option<&AbilityConfig> {
        self.abilities.get(&self.canonical_id(ability_id))
    }

    pub fn effects(&self) -> &[CooldownEffect] {
        &self.effects
    }

    pub fn len(&self) -> usize {
        self.abilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.abilities.is_empty()
    }
}

impl AbilityLookup for AbilityBook {
    fn canonical_id(&self, ability_id: u32) -> u32 {
        self.canonical.get(&ability_id).copied().unwrap_or(ability_id)
    }

    fn cooldown_ms(&self, canonical_id: u32, haste: f64) -> Option<f64> {
        let config = self.abilities.get(&canonical_id)?;
        if config.cooldown_ms == 0 {
            return None;
        }
        let base = config.cooldown_ms as f64;
        if config.haste_scaled {
            Some(base / (1.0 + haste))
        } else {
            Some(base)
        }
    }

    fn max_charges(&self, canonical_id: u32) -> Option<u32> {
        self.abilities.get(&canonical_id).map(|c| c.charges)
    }

    fn ability_name(&self, ability_id: u32) -> Option<&str> {
        self.get(ability_id)
            .map(|c| c.name.as_str())
            .filter(|n| !n.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Spec profiles
// ---------------------------------------------------------------------------

/// A fully-parsed spec profile: the spec's ability book plus the ids of its
/// major cooldowns (used by the cooldown drift rule).
#[derive(Debug, Clone)]
pub struct SpecProfile {
    pub class:              String,
    pub spec_name:          String,
    pub role:               String,
    pub major_cd_spell_ids: Vec<u32>,
    pub book:               AbilityBook,
}

impl SpecProfile {
    /// Canonical "CLASS/Spec" key used for config storage and display.
    pub fn key(&self) -> String {
        format!("{}/{}", self.class, self.spec_name)
    }
}

/// Lightweight spec descriptor for listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecInfo {
    pub key:       String,
    pub class:     String,
    pub spec:      String,
    pub role:      String,
    pub abilities: usize,
}

fn parse_all() -> Vec<SpecProfile> {
    ALL_SPEC_DATA
        .iter()
        .filter_map(|(origin, toml_str)| {
            let file: TomlFile = toml::from_str(toml_str)
                .map_err(|e| tracing::warn!("Failed to parse spec TOML {}: {}", origin, e))
                .ok()?;
            let Some(meta) = file.spec else {
                tracing::warn!("Embedded spec file {} has no [spec] section", origin);
                return None;
            };
            let mut book = AbilityBook::new();
            for config in file.abilities {
                book.insert(config);
            }
            book.effects = file.effects;
            Some(SpecProfile {
                class:              meta.class,
                spec_name:          meta.spec,
                role:               meta.role,
                major_cd_spell_ids: meta.cooldowns.major_cd_spell_ids,
                book,
            })
        })
        .collect()
}

pub fn list_all() -> Vec<SpecInfo> {
    PROFILES
        .iter()
        .map(|p| SpecInfo {
            key:       p.key(),
            class:     p.class.clone(),
            spec:      p.spec_name.clone(),
            role:      p.role.clone(),
            abilities: p.book.len(),
        })
        .collect()
}

/// Load a spec profile by class and spec name (case-insensitive).
pub fn load_spec(class: &str, spec_name: &str) -> Option<SpecProfile> {
    PROFILES
        .iter()
        .find(|p| p.class.eq_ignore_ascii_case(class) && p.spec_name.eq_ignore_ascii_case(spec_name))
        .cloned()
}

/// Load a spec profile by its "CLASS/Spec" key.
pub fn load_by_key(key: &str) -> Option<SpecProfile> {
    let (class, spec) = key.split_once('/')?;
    load_spec(class, spec)
}

/// Build the book for one replay: the spec profile named by `spec_key` (empty
/// = start from nothing) with `extra_files` merged over it in order.
/// Returns the book and the profile's major cooldown ids.
pub fn assemble(spec_key: &str, extra_files: &[PathBuf]) -> Result<(AbilityBook, Vec<u32>)> {
    let (mut book, majors) = if spec_key.is_empty() {
        (AbilityBook::new(), Vec::new())
    } else {
        let profile = load_by_key(spec_key)
            .ok_or_else(|| LedgerError::UnknownSpec(spec_key.to_owned()))?;
        (profile.book, profile.major_cd_spell_ids)
    };

    for path in extra_files {
        let extra = AbilityBook::from_file(path)?;
        tracing::info!("Merged {} abilities from {:?}", extra.len(), path);
        book.merge(extra);
    }
    Ok((book, majors))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_three_specs() {
        let specs = list_all();
        assert_eq!(specs.len(), 3);
        let keys: Vec<&str> = specs.iter().map(|s| s.key.as_str()).collect();
        assert!(keys.contains(&"PALADIN/Retribution"));
        assert!(keys.contains(&"PRIEST/Holy"));
        assert!(keys.contains(&"WARRIOR/Protection"));
        assert!(specs.iter().all(|s| s.abilities > 0));
    }

    #[test]
    fn loads_paladin_ret() {
        let p = load_spec("PALADIN", "Retribution").expect("should load");
        assert!(p.major_cd_spell_ids.contains(&31884)); // Avenging Wrath
        assert_eq!(p.book.cooldown_ms(31884, 0.0), Some(120_000.0));
    }

    #[test]
    fn crusade_shares_avenging_wrath_cooldown() {
        let p = load_by_key("PALADIN/Retribution").unwrap();
        assert_eq!(p.book.canonical_id(231895), 31884);
    }

    #[test]
    fn case_insensitive_lookup() {
        assert!(load_spec("paladin", "retribution").is_some());
        assert!(load_by_key("warrior/protection").is_some());
        assert!(load_spec("MAGE", "Fire").is_none());
        assert!(load_by_key("no-slash").is_none());
    }

    #[test]
    fn holy_priest_carries_effects() {
        let p = load_by_key("PRIEST/Holy").unwrap();
        assert!(!p.book.effects().is_empty());
    }

    #[test]
    fn haste_shortens_only_scaled_cooldowns() {
        let book = AbilityBook::new()
            .with(AbilityConfig::new(1, "Scaled", 12_000).haste_scaled())
            .with(AbilityConfig::new(2, "Flat", 12_000));
        assert_eq!(book.cooldown_ms(1, 0.5), Some(8_000.0));
        assert_eq!(book.cooldown_ms(2, 0.5), Some(12_000.0));
    }

    #[test]
    fn unknown_and_cooldownless_abilities() {
        let book = AbilityBook::new().with(AbilityConfig::new(1, "Filler", 0));
        assert_eq!(book.cooldown_ms(1, 0.0), None);
        assert_eq!(book.cooldown_ms(99, 0.0), None);
        assert_eq!(book.max_charges(99), None);
        assert_eq!(book.canonical_id(99), 99);
    }

    #[test]
    fn parses_custom_file_and_merges() {
        let raw = r#"
            [[abilities]]
            spell_id = 100
            name = "Big Button"
            cooldown_ms = 60000
            charges = 2
            shared_ids = [101]

            [[effects]]
            kind = "cast_reduces"
            trigger_id = 5
            spell_id = 100
            reduction_ms = 1000
        "#;
        let custom = AbilityBook::from_toml_str("custom.toml", raw).unwrap();
        assert_eq!(custom.max_charges(100), Some(2));
        assert_eq!(custom.canonical_id(101), 100);
        assert_eq!(custom.ability_name(101), Some("Big Button"));

        let mut book = AbilityBook::new().with(AbilityConfig::new(100, "Old", 30_000));
        book.merge(custom);
        assert_eq!(book.cooldown_ms(100, 0.0), Some(60_000.0));
        assert_eq!(book.effects().len(), 1);
    }

    #[test]
    fn replacing_an_ability_drops_old_shared_ids() {
        let mut book = AbilityBook::new().with(AbilityConfig::new(1, "A", 1_000).sharing(&[2]));
        book.insert(AbilityConfig::new(1, "A", 1_000));
        assert_eq!(book.canonical_id(2), 2);
    }

    #[test]
    fn bad_toml_reports_origin() {
        let err = AbilityBook::from_toml_str("broken.toml", "[[abilities]]\nspell_id = \"x\"")
            .unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn assemble_merges_files_over_profile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wings.toml");
        std::fs::write(
            &path,
            "[[abilities]]\nspell_id = 31884\nname = \"Avenging Wrath\"\ncooldown_ms = 60000\n",
        )
        .unwrap();

        let (book, majors) = assemble("PALADIN/Retribution", &[path]).unwrap();
        assert_eq!(book.cooldown_ms(31884, 0.0), Some(60_000.0));
        assert!(majors.contains(&31884));
    }

    #[test]
    fn assemble_rejects_unknown_spec() {
        let err = assemble("MAGE/Fire", &[]).unwrap_err();
        assert!(matches!(err, LedgerError::UnknownSpec(ref key) if key == "MAGE/Fire"));
    }

    #[test]
    fn assemble_without_spec_is_empty() {
        let (book, majors) = assemble("", &[]).unwrap();
        assert!(book.is_empty());
        assert!(majors.is_empty());
    }
}
