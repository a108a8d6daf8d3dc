//! Milestone synchronization for catch-up plans.
//!
//! Evaluating each vaccine on its own anchors every pending dose to the birth
//! date. For a child catching up, that scatters one age milestone across
//! dates the family has already attended. This pass re-anchors pending doses
//! to the date a sibling vaccine of the same milestone was given, so the
//! milestone is presented as one visit.

use crate::config::SyncConfig;
use crate::eligibility::{DoseWindow, Evaluation};
use crate::types::Child;
use crate::Error;
use chrono::NaiveDate;

/// Re-anchor pending evaluations to their milestone siblings
///
/// A vaccine whose latest applied dose belongs to milestone `m` (the dose
/// rule's minimum age) on date `D` anchors every *other* vaccine whose next
/// dose is also at milestone `m` (within `policy.tolerance_months`). Their age
/// floor becomes `max(birth + m, D)`, using the latest matching `D`.
///
/// The hard cutoff and the interval floor are left untouched, and only Due
/// and NotYetEligible entries are adjusted. An anchor that would move the
/// earliest date past the cutoff is ignored.
///
/// Returns the number of entries whose status or suggested date changed.
pub fn synchronize(
    child: &Child,
    evaluations: &mut [Evaluation],
    as_of: NaiveDate,
    policy: &SyncConfig,
) -> usize {
    if !policy.enabled {
        return 0;
    }

    let anchors: Vec<_> = evaluations
        .iter()
        .enumerate()
        .filter_map(|(i, eval)| eval.latest_milestone.map(|m| (i, m)))
        .collect();

    if anchors.is_empty() {
        return 0;
    }

    let mut changed = 0;

    for (i, eval) in evaluations.iter_mut().enumerate() {
        if !eval.entry.status.is_pending() {
            continue;
        }
        let Some(window) = eval.window else {
            continue;
        };

        let milestone = eval.entry.min_age_months;
        let anchor = anchors
            .iter()
            .filter(|(j, m)| {
                *j != i && milestone.abs_diff(m.min_age_months) <= policy.tolerance_months
            })
            .map(|(_, m)| m.applied_on)
            .max();

        let Some(anchor) = anchor else {
            continue;
        };

        if anchor < child.birth_date {
            let err = Error::NegativeInterval {
                vaccine_id: eval.entry.vaccine_id.clone(),
                anchor,
                birth_date: child.birth_date,
            };
            tracing::warn!("{}; keeping the birth-relative floor", err);
            continue;
        }

        if anchor <= window.age_floor {
            continue;
        }

        let shifted = DoseWindow {
            age_floor: anchor,
            ..window
        };

        if shifted.is_exceeded(shifted.earliest_eligible()) {
            tracing::debug!(
                "Anchor {} for '{}' falls past its cutoff {:?}, ignoring",
                anchor,
                eval.entry.vaccine_id,
                window.hard_cutoff
            );
            continue;
        }

        let (status, suggested_date) = shifted.classify(as_of);
        if status != eval.entry.status || suggested_date != eval.entry.suggested_date {
            tracing::debug!(
                "'{}' re-anchored to milestone {}mo visit on {}: {} -> {}",
                eval.entry.vaccine_id,
                milestone,
                anchor,
                eval.entry.status,
                status
            );
            changed += 1;
        }

        eval.entry.status = status;
        eval.entry.suggested_date = suggested_date;
        eval.window = Some(shifted);
    }

    changed
}
