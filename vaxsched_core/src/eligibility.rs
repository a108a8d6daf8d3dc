//! Per-vaccine eligibility evaluation.
//!
//! Given one vaccine's rules and that vaccine's reconciled ledger for a child,
//! decide which dose is next and whether it is applied, due, overdue or not yet
//! eligible. Evaluation is pure: same inputs, same result.

use crate::dates::{add_days, add_months};
use crate::ledger::LedgerEntry;
use crate::types::*;
use crate::{Error, Result};
use chrono::NaiveDate;

/// Dates bounding when the next dose may be given
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DoseWindow {
    /// Birth date plus the dose's minimum age
    pub age_floor: NaiveDate,
    /// Previous dose plus the minimum interval, when there is a previous dose
    pub interval_floor: Option<NaiveDate>,
    /// Birth date plus the maximum age; `None` means no upper bound
    pub hard_cutoff: Option<NaiveDate>,
}

impl DoseWindow {
    pub fn earliest_eligible(&self) -> NaiveDate {
        match self.interval_floor {
            Some(interval_floor) => self.age_floor.max(interval_floor),
            None => self.age_floor,
        }
    }

    pub fn is_exceeded(&self, as_of: NaiveDate) -> bool {
        self.hard_cutoff.is_some_and(|cutoff| as_of > cutoff)
    }

    /// Status and suggested date for this window on `as_of`
    pub fn classify(&self, as_of: NaiveDate) -> (ScheduleStatus, Option<NaiveDate>) {
        if self.is_exceeded(as_of) {
            return (ScheduleStatus::Overdue, None);
        }
        let earliest = self.earliest_eligible();
        if as_of >= earliest {
            (ScheduleStatus::Due, Some(as_of))
        } else {
            (ScheduleStatus::NotYetEligible, Some(earliest))
        }
    }
}

/// The age milestone of the most recent dose a vaccine has received
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Milestone {
    pub min_age_months: u32,
    pub applied_on: NaiveDate,
}

/// Raw per-vaccine result, before milestone synchronization
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Evaluation {
    pub entry: ScheduleEntry,
    /// Window of the next dose; `None` when the vaccine is resolved
    pub window: Option<DoseWindow>,
    pub latest_milestone: Option<Milestone>,
}

/// Evaluate the next dose of one vaccine for one child
///
/// `doses` must be the reconciled ledger for this child and vaccine, in
/// chronological order.
pub fn evaluate(
    child: &Child,
    vaccine: &Vaccine,
    rules: &[VaccineProtocolRule],
    doses: &[LedgerEntry],
    as_of: NaiveDate,
) -> Result<Evaluation> {
    if rules.is_empty() {
        return Err(Error::UnknownVaccine(vaccine.id.clone()));
    }

    let dose_limit = rules.len();
    let applied = doses.len();

    let latest_milestone = applied.checked_sub(1).map(|_| {
        let position = applied.min(dose_limit) - 1;
        Milestone {
            min_age_months: rules[position].min_age_months,
            applied_on: doses[position].effective_date(),
        }
    });

    // Series complete
    if applied >= dose_limit {
        if applied > dose_limit {
            tracing::warn!(
                "Child {} has {} doses of '{}' but the series has {}; extra doses ignored",
                child.child_id,
                applied,
                vaccine.id,
                dose_limit
            );
        }
        let last = &rules[dose_limit - 1];
        return Ok(Evaluation {
            entry: entry(vaccine, last, ScheduleStatus::Applied, None),
            window: None,
            latest_milestone,
        });
    }

    let next = &rules[applied];

    if !next.target_sex.admits(child.sex) {
        tracing::debug!(
            "'{}' dose {} restricted to {:?}, not applicable to child {}",
            vaccine.id,
            next.dose_number,
            next.target_sex,
            child.child_id
        );
        return Ok(Evaluation {
            entry: entry(vaccine, next, ScheduleStatus::Applied, None),
            window: None,
            latest_milestone,
        });
    }

    let window = DoseWindow {
        age_floor: add_months(child.birth_date, next.min_age_months),
        interval_floor: doses
            .last()
            .map(|prev| add_days(prev.effective_date(), next.min_interval_days.unwrap_or(0))),
        hard_cutoff: next
            .max_age_months
            .map(|months| add_months(child.birth_date, months)),
    };

    let (status, suggested_date) = window.classify(as_of);

    tracing::debug!(
        "'{}' dose {} for child {}: {} (earliest {}, cutoff {:?})",
        vaccine.id,
        next.dose_number,
        child.child_id,
        status,
        window.earliest_eligible(),
        window.hard_cutoff
    );

    Ok(Evaluation {
        entry: entry(vaccine, next, status, suggested_date),
        window: Some(window),
        latest_milestone,
    })
}

fn entry(
    vaccine: &Vaccine,
    rule: &VaccineProtocolRule,
    status: ScheduleStatus,
    suggested_date: Option<NaiveDate>,
) -> ScheduleEntry {
    ScheduleEntry {
        vaccine_id: vaccine.id.clone(),
        vaccine_name: vaccine.name.clone(),
        dose_number_to_apply: rule.dose_number,
        status,
        suggested_date,
        min_age_months: rule.min_age_months,
        max_age_months: rule.max_age_months,
    }
}
