//! Immunization protocol: the vaccine catalog and its per-dose rules.
//!
//! A [`ProtocolRuleSet`] is built once from a [`RuleRepository`] and is
//! immutable afterwards. Corrupt reference data is rejected at load time,
//! before any child is evaluated.

use crate::repository::RuleRepository;
use crate::types::*;
use crate::{Error, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Protocol as stored on disk (`[[vaccines]]` and `[[rules]]` TOML tables)
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct ProtocolDocument {
    #[serde(default)]
    pub vaccines: Vec<Vaccine>,
    #[serde(default)]
    pub rules: Vec<VaccineProtocolRule>,
}

impl ProtocolDocument {
    /// Parse a protocol document from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Load a protocol document from a TOML file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let document = Self::from_toml_str(&contents)?;
        tracing::info!(
            "Loaded protocol from {:?}: {} vaccines, {} rules",
            path,
            document.vaccines.len(),
            document.rules.len()
        );
        Ok(document)
    }
}

impl RuleRepository for ProtocolDocument {
    fn list_vaccines(&self) -> Result<Vec<Vaccine>> {
        Ok(self.vaccines.clone())
    }

    fn list_rules(&self) -> Result<Vec<VaccineProtocolRule>> {
        Ok(self.rules.clone())
    }
}

/// Cached built-in protocol
static DEFAULT_PROTOCOL: Lazy<ProtocolDocument> = Lazy::new(build_default_protocol);

/// Get a reference to the built-in early-childhood protocol
///
/// Used whenever no protocol file is configured.
pub fn default_protocol() -> &'static ProtocolDocument {
    &DEFAULT_PROTOCOL
}

/// Validated, immutable catalog of vaccines and their dose rules
#[derive(Clone, Debug)]
pub struct ProtocolRuleSet {
    vaccines: BTreeMap<String, Vaccine>,
    rules: BTreeMap<String, Vec<VaccineProtocolRule>>,
}

impl ProtocolRuleSet {
    /// Build a rule set from raw catalog rows
    ///
    /// Rules are grouped per vaccine and sorted by dose number. Any vaccine
    /// whose sequence fails [`validate_sequence`] rejects the whole set.
    pub fn new(vaccines: Vec<Vaccine>, rules: Vec<VaccineProtocolRule>) -> Result<Self> {
        let mut catalog = BTreeMap::new();
        for vaccine in vaccines {
            if catalog.contains_key(&vaccine.id) {
                return Err(Error::MalformedRuleSequence {
                    vaccine_id: vaccine.id,
                    reason: "vaccine listed twice in catalog".into(),
                });
            }
            catalog.insert(vaccine.id.clone(), vaccine);
        }

        let mut grouped: BTreeMap<String, Vec<VaccineProtocolRule>> = BTreeMap::new();
        for rule in rules {
            if !catalog.contains_key(&rule.vaccine_id) {
                let err = Error::UnknownVaccine(rule.vaccine_id.clone());
                tracing::warn!("Dropping rule for dose {}: {}", rule.dose_number, err);
                continue;
            }
            grouped.entry(rule.vaccine_id.clone()).or_default().push(rule);
        }

        for (vaccine_id, sequence) in grouped.iter_mut() {
            sequence.sort_by_key(|r| r.dose_number);

            let problems = validate_sequence(sequence);
            if !problems.is_empty() {
                return Err(Error::MalformedRuleSequence {
                    vaccine_id: vaccine_id.clone(),
                    reason: problems.join("; "),
                });
            }

            let highest = sequence.len() as u32;
            for rule in sequence.iter().filter(|r| r.dose_limit != highest) {
                tracing::warn!(
                    "Vaccine '{}' dose {} declares dose_limit {} but the series has {} doses",
                    vaccine_id,
                    rule.dose_number,
                    rule.dose_limit,
                    highest
                );
            }
        }

        catalog.retain(|id, _| {
            let has_rules = grouped.contains_key(id);
            if !has_rules {
                tracing::warn!("Vaccine '{}' has no protocol rules, ignoring", id);
            }
            has_rules
        });

        tracing::info!(
            "Protocol rule set ready: {} vaccines, {} rules",
            catalog.len(),
            grouped.values().map(Vec::len).sum::<usize>()
        );

        Ok(Self {
            vaccines: catalog,
            rules: grouped,
        })
    }

    /// Load and validate a rule set from a repository
    pub fn load(repo: &impl RuleRepository) -> Result<Self> {
        Self::new(repo.list_vaccines()?, repo.list_rules()?)
    }

    /// Rules for a vaccine, ordered by dose number
    pub fn rules_for(&self, vaccine_id: &str) -> Result<&[VaccineProtocolRule]> {
        self.rules
            .get(vaccine_id)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::UnknownVaccine(vaccine_id.to_string()))
    }

    pub fn vaccine(&self, vaccine_id: &str) -> Result<&Vaccine> {
        self.vaccines
            .get(vaccine_id)
            .ok_or_else(|| Error::UnknownVaccine(vaccine_id.to_string()))
    }

    /// All vaccines with rules, ordered by id
    pub fn vaccines(&self) -> impl Iterator<Item = &Vaccine> {
        self.vaccines.values()
    }

    pub fn contains(&self, vaccine_id: &str) -> bool {
        self.rules.contains_key(vaccine_id)
    }

    /// Highest dose number in a vaccine's series
    pub fn dose_limit(&self, vaccine_id: &str) -> Result<u32> {
        Ok(self.rules_for(vaccine_id)?.len() as u32)
    }

    pub fn len(&self) -> usize {
        self.vaccines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vaccines.is_empty()
    }
}

/// Check one vaccine's rules (already sorted by dose number)
///
/// Returns a list of problems, or an empty Vec if the sequence is valid.
pub fn validate_sequence(rules: &[VaccineProtocolRule]) -> Vec<String> {
    let mut errors = Vec::new();

    for (position, rule) in rules.iter().enumerate() {
        let expected = position as u32 + 1;
        if rule.dose_number != expected {
            errors.push(format!(
                "expected dose {} but found dose {}",
                expected, rule.dose_number
            ));
        }

        if let Some(max) = rule.max_age_months {
            if max < rule.min_age_months {
                errors.push(format!(
                    "dose {}: max age {} months < min age {} months",
                    rule.dose_number, max, rule.min_age_months
                ));
            }
        }

        if rule.dose_number > 1 && rule.min_interval_days.is_none() {
            errors.push(format!(
                "dose {}: missing minimum interval",
                rule.dose_number
            ));
        }

        if let Some(previous) = position.checked_sub(1).map(|i| &rules[i]) {
            if rule.min_age_months < previous.min_age_months {
                errors.push(format!(
                    "dose {}: min age {} months decreases from {} months",
                    rule.dose_number, rule.min_age_months, previous.min_age_months
                ));
            }
        }
    }

    errors
}

fn vaccine(id: &str, name: &str) -> Vaccine {
    Vaccine {
        id: id.into(),
        name: name.into(),
    }
}

fn dose(
    vaccine_id: &str,
    dose_number: u32,
    min_age_months: u32,
    max_age_months: Option<u32>,
    min_interval_days: Option<u32>,
    dose_limit: u32,
) -> VaccineProtocolRule {
    VaccineProtocolRule {
        vaccine_id: vaccine_id.into(),
        dose_number,
        min_age_months,
        max_age_months,
        min_interval_days,
        is_booster: false,
        target_sex: TargetSex::Any,
        dose_limit,
    }
}

fn build_default_protocol() -> ProtocolDocument {
    let vaccines = vec![
        vaccine("bcg", "BCG"),
        vaccine("hepb", "Hepatitis B"),
        vaccine("hexavalent", "Hexavalent (DTaP-IPV-Hib-HepB)"),
        vaccine("pcv", "Pneumococcal conjugate"),
        vaccine("rotavirus", "Rotavirus"),
        vaccine("mmr", "MMR"),
        vaccine("dpt", "DPT"),
        vaccine("hpv", "Human papillomavirus"),
    ];

    let mut rules = vec![
        // Birth
        dose("bcg", 1, 0, Some(59), None, 1),
        dose("hepb", 1, 0, None, None, 3),
        // 2 months
        dose("hepb", 2, 2, None, Some(28), 3),
        dose("hexavalent", 1, 2, Some(59), None, 4),
        dose("pcv", 1, 2, Some(59), None, 3),
        dose("rotavirus", 1, 2, Some(4), None, 2),
        // 4 months
        dose("hexavalent", 2, 4, Some(59), Some(56), 4),
        dose("pcv", 2, 4, Some(59), Some(56), 3),
        dose("rotavirus", 2, 4, Some(8), Some(28), 2),
        // 6 months
        dose("hepb", 3, 6, None, Some(56), 3),
        dose("hexavalent", 3, 6, Some(59), Some(56), 4),
        // 12 months
        dose("pcv", 3, 12, Some(59), Some(56), 3),
        dose("mmr", 1, 12, None, None, 2),
        // 18 months
        dose("hexavalent", 4, 18, Some(71), Some(180), 4),
        // 4 and 6 years
        dose("dpt", 1, 48, Some(83), None, 1),
        dose("mmr", 2, 72, None, Some(28), 2),
        // 9 years
        dose("hpv", 1, 108, Some(191), None, 2),
        dose("hpv", 2, 114, Some(191), Some(180), 2),
    ];

    for rule in rules.iter_mut() {
        rule.is_booster = matches!(
            (rule.vaccine_id.as_str(), rule.dose_number),
            ("hexavalent", 4) | ("pcv", 3) | ("dpt", 1)
        );
        if rule.vaccine_id == "hpv" {
            rule.target_sex = TargetSex::Female;
        }
    }

    ProtocolDocument { vaccines, rules }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(dose_number: u32, min_age: u32, interval: Option<u32>) -> VaccineProtocolRule {
        dose("x", dose_number, min_age, None, interval, 2)
    }

    #[test]
    fn test_default_protocol_loads() {
        let rules = ProtocolRuleSet::load(default_protocol()).unwrap();
        assert_eq!(rules.len(), 8);
        assert_eq!(rules.dose_limit("hexavalent").unwrap(), 4);
        assert_eq!(rules.vaccine("bcg").unwrap().name, "BCG");
    }

    #[test]
    fn test_rules_sorted_by_dose_number() {
        let rules = ProtocolRuleSet::load(default_protocol()).unwrap();
        for vaccine in rules.vaccines() {
            let sequence = rules.rules_for(&vaccine.id).unwrap();
            for (i, rule) in sequence.iter().enumerate() {
                assert_eq!(rule.dose_number, i as u32 + 1);
            }
        }
    }

    #[test]
    fn test_unknown_vaccine() {
        let rules = ProtocolRuleSet::load(default_protocol()).unwrap();
        assert!(matches!(
            rules.rules_for("smallpox"),
            Err(Error::UnknownVaccine(id)) if id == "smallpox"
        ));
    }

    #[test]
    fn test_gap_in_dose_numbers_rejected() {
        let result = ProtocolRuleSet::new(
            vec![vaccine("x", "X")],
            vec![rule(1, 0, None), rule(3, 4, Some(28))],
        );
        match result {
            Err(Error::MalformedRuleSequence { vaccine_id, reason }) => {
                assert_eq!(vaccine_id, "x");
                assert!(reason.contains("expected dose 2"), "{}", reason);
            }
            other => panic!("expected MalformedRuleSequence, got {:?}", other),
        }
    }

    #[test]
    fn test_decreasing_min_age_rejected() {
        let result = ProtocolRuleSet::new(
            vec![vaccine("x", "X")],
            vec![rule(1, 4, None), rule(2, 2, Some(28))],
        );
        assert!(matches!(
            result,
            Err(Error::MalformedRuleSequence { .. })
        ));
    }

    #[test]
    fn test_missing_interval_rejected() {
        let problems = validate_sequence(&[rule(1, 0, None), rule(2, 2, None)]);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("missing minimum interval"));
    }

    #[test]
    fn test_unsorted_input_is_sorted() {
        let rules = ProtocolRuleSet::new(
            vec![vaccine("x", "X")],
            vec![rule(2, 2, Some(28)), rule(1, 0, None)],
        )
        .unwrap();
        let sequence = rules.rules_for("x").unwrap();
        assert_eq!(sequence[0].dose_number, 1);
        assert_eq!(sequence[1].dose_number, 2);
    }

    #[test]
    fn test_rules_for_uncatalogued_vaccine_dropped() {
        let mut orphan = rule(1, 0, None);
        orphan.vaccine_id = "orphan".into();
        let rules = ProtocolRuleSet::new(vec![vaccine("x", "X")], vec![rule(1, 0, None), orphan])
            .unwrap();
        assert!(rules.contains("x"));
        assert!(!rules.contains("orphan"));
    }

    #[test]
    fn test_protocol_document_from_toml() {
        let toml_str = r#"
[[vaccines]]
id = "bcg"
name = "BCG"

[[rules]]
vaccine_id = "bcg"
dose_number = 1
min_age_months = 0
max_age_months = 59
dose_limit = 1
"#;
        let document = ProtocolDocument::from_toml_str(toml_str).unwrap();
        let rules = ProtocolRuleSet::load(&document).unwrap();
        let bcg = rules.rules_for("bcg").unwrap();
        assert_eq!(bcg[0].max_age_months, Some(59));
        assert_eq!(bcg[0].target_sex, TargetSex::Any);
        assert!(!bcg[0].is_booster);
    }
}
