//! Dose ledger reconciliation.
//!
//! Dose history arrives from two record types: live appointments and legacy
//! imported history rows. This module merges both into a single
//! deduplicated, chronologically ordered list per (child, vaccine), so the
//! eligibility logic only ever sees one shape.

use crate::types::{DoseEvent, SourceKind};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

/// A reconciled dose with its 1-based position in the series
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub dose_index: u32,
    pub event: DoseEvent,
}

impl LedgerEntry {
    pub fn effective_date(&self) -> NaiveDate {
        self.event.effective_date
    }
}

/// Deduplicated dose history keyed by child, then vaccine
#[derive(Clone, Debug, Default)]
pub struct DoseLedger {
    entries: HashMap<String, BTreeMap<String, Vec<LedgerEntry>>>,
}

impl DoseLedger {
    /// Merge appointment and legacy events into one ledger
    ///
    /// - Cancelled appointments are dropped.
    /// - An appointment id seen twice keeps its first occurrence.
    /// - A legacy row whose linking key names a surviving appointment is the
    ///   same administration and is dropped; the appointment wins.
    /// - Legacy rows repeating a record id or linking key are dropped.
    ///
    /// Events are then stably sorted by effective date. Appointments are
    /// inserted before legacy rows, so on equal dates appointments come first
    /// and otherwise insertion order is kept.
    pub fn reconcile(events: impl IntoIterator<Item = DoseEvent>) -> Self {
        let mut appointments = Vec::new();
        let mut legacy = Vec::new();

        for event in events {
            match event.source_kind() {
                SourceKind::Appointment if !event.is_committed() => {
                    tracing::debug!(
                        "Skipping cancelled appointment {} for {}/{}",
                        event.source_id(),
                        event.child_id,
                        event.vaccine_id
                    );
                }
                SourceKind::Appointment => appointments.push(event),
                SourceKind::LegacyImport => legacy.push(event),
            }
        }

        let mut seen_appointments = HashSet::new();
        let mut merged: Vec<DoseEvent> = Vec::with_capacity(appointments.len() + legacy.len());

        for event in appointments {
            if seen_appointments.insert(event.source_id()) {
                merged.push(event);
            } else {
                tracing::warn!("Duplicate appointment record {} ignored", event.source_id());
            }
        }

        let mut seen_legacy_ids = HashSet::new();
        let mut seen_links = HashSet::new();
        let mut collapsed = 0;

        for event in legacy {
            if let Some(link) = event.linking_key() {
                if seen_appointments.contains(&link) || !seen_links.insert(link) {
                    collapsed += 1;
                    tracing::debug!(
                        "Legacy record {} documents appointment {}, already counted",
                        event.source_id(),
                        link
                    );
                    continue;
                }
            }
            if !seen_legacy_ids.insert(event.source_id()) {
                collapsed += 1;
                continue;
            }
            merged.push(event);
        }

        if collapsed > 0 {
            tracing::debug!("Collapsed {} duplicate legacy records", collapsed);
        }

        let mut entries: HashMap<String, BTreeMap<String, Vec<LedgerEntry>>> = HashMap::new();
        for event in merged {
            entries
                .entry(event.child_id.clone())
                .or_default()
                .entry(event.vaccine_id.clone())
                .or_default()
                .push(LedgerEntry {
                    dose_index: 0,
                    event,
                });
        }

        for series in entries.values_mut().flat_map(|m| m.values_mut()) {
            // sort_by_key is stable
            series.sort_by_key(LedgerEntry::effective_date);
            for (position, entry) in series.iter_mut().enumerate() {
                entry.dose_index = position as u32 + 1;
            }
        }

        Self { entries }
    }

    /// Chronologically ordered doses of one vaccine for one child
    pub fn doses_for(&self, child_id: &str, vaccine_id: &str) -> &[LedgerEntry] {
        self.entries
            .get(child_id)
            .and_then(|m| m.get(vaccine_id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Doses dated on or before `candidate`
    pub fn doses_on_or_before(
        &self,
        child_id: &str,
        vaccine_id: &str,
        candidate: NaiveDate,
    ) -> &[LedgerEntry] {
        let series = self.doses_for(child_id, vaccine_id);
        let end = series.partition_point(|e| e.effective_date() <= candidate);
        &series[..end]
    }

    /// The dose that precedes `candidate` chronologically
    ///
    /// Entries dated after the candidate are never returned, even when they
    /// were recorded earlier.
    pub fn previous_dose(
        &self,
        child_id: &str,
        vaccine_id: &str,
        candidate: NaiveDate,
    ) -> Option<&LedgerEntry> {
        self.doses_on_or_before(child_id, vaccine_id, candidate)
            .last()
    }

    /// Vaccines with at least one ledger entry for a child
    pub fn vaccine_ids<'a>(&'a self, child_id: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .get(child_id)
            .into_iter()
            .flat_map(|m| m.keys().map(String::as_str))
    }
}
