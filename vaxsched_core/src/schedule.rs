//! Schedule assembly: the engine's entry points.
//!
//! [`Scheduler::compute_schedule`] runs the per-vaccine evaluation for every
//! vaccine in the protocol, then the milestone synchronization pass, and
//! returns one ordered row per vaccine.

use crate::config::SyncConfig;
use crate::dates::{add_days, add_months};
use crate::eligibility::{evaluate, Evaluation};
use crate::ledger::DoseLedger;
use crate::protocol::ProtocolRuleSet;
use crate::repository::{ChildRepository, DoseEventRepository};
use crate::synchronizer::synchronize;
use crate::types::*;
use crate::{Error, Result};
use chrono::NaiveDate;
use serde::Serialize;

/// Outcome of checking a proposed appointment date
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BookingCheck {
    /// The date satisfies both the age window and the dose interval
    Allowed { dose_number: u32 },
    /// The dose would be given before `earliest`
    TooEarly {
        dose_number: u32,
        earliest: NaiveDate,
    },
    /// The dose would be given after the age cutoff
    AgeExceeded { dose_number: u32, cutoff: NaiveDate },
    /// Every dose of the series is already applied or booked by that date
    SeriesComplete,
    /// The dose is restricted to the other sex
    NotApplicable { dose_number: u32 },
}

/// Computes schedules over a rule set and a child/ledger snapshot
pub struct Scheduler<'a, S> {
    rules: &'a ProtocolRuleSet,
    store: &'a S,
    policy: SyncConfig,
}

impl<'a, S> Scheduler<'a, S>
where
    S: ChildRepository + DoseEventRepository,
{
    pub fn new(rules: &'a ProtocolRuleSet, store: &'a S) -> Self {
        Self {
            rules,
            store,
            policy: SyncConfig::default(),
        }
    }

    pub fn with_policy(mut self, policy: SyncConfig) -> Self {
        self.policy = policy;
        self
    }

    /// Resolve a child and reconcile its dose history
    pub fn snapshot(&self, child_id: &str) -> Result<(Child, DoseLedger)> {
        let child = self
            .store
            .get_child(child_id)?
            .ok_or_else(|| Error::ChildNotFound(child_id.to_string()))?;
        let ledger = DoseLedger::reconcile(self.store.list_dose_events(child_id)?);
        Ok((child, ledger))
    }

    /// Compute the schedule for a child as of a date
    ///
    /// One entry per vaccine in the protocol, sorted by minimum age, then by
    /// vaccine name. A vaccine that fails to evaluate is logged and omitted.
    pub fn compute_schedule(&self, child_id: &str, as_of: NaiveDate) -> Result<Vec<ScheduleEntry>> {
        let (child, ledger) = self.snapshot(child_id)?;

        for vaccine_id in ledger.vaccine_ids(child_id) {
            if !self.rules.contains(vaccine_id) {
                let err = Error::UnknownVaccine(vaccine_id.to_string());
                tracing::warn!(
                    "Child {} has doses outside the protocol: {}",
                    child_id,
                    err
                );
            }
        }

        let mut evaluations: Vec<Evaluation> = Vec::with_capacity(self.rules.len());
        for vaccine in self.rules.vaccines() {
            let result = self.rules.rules_for(&vaccine.id).and_then(|rules| {
                evaluate(
                    &child,
                    vaccine,
                    rules,
                    ledger.doses_for(child_id, &vaccine.id),
                    as_of,
                )
            });
            match result {
                Ok(evaluation) => evaluations.push(evaluation),
                Err(e) => {
                    tracing::warn!("Skipping '{}' for child {}: {}", vaccine.id, child_id, e);
                }
            }
        }

        let adjusted = synchronize(&child, &mut evaluations, as_of, &self.policy);
        if adjusted > 0 {
            tracing::debug!("Synchronized {} entries for child {}", adjusted, child_id);
        }

        let mut schedule: Vec<ScheduleEntry> =
            evaluations.into_iter().map(|eval| eval.entry).collect();
        schedule.sort_by(|a, b| {
            a.min_age_months
                .cmp(&b.min_age_months)
                .then_with(|| a.vaccine_name.cmp(&b.vaccine_name))
        });

        tracing::info!(
            "Computed schedule for child {} as of {}: {} vaccines",
            child_id,
            as_of,
            schedule.len()
        );

        Ok(schedule)
    }

    /// Check whether a vaccine could be given on `candidate`
    ///
    /// Only doses dated on or before the candidate count as previous doses;
    /// bookings further in the future are ignored.
    pub fn check_booking(
        &self,
        child_id: &str,
        vaccine_id: &str,
        candidate: NaiveDate,
    ) -> Result<BookingCheck> {
        let rules = self.rules.rules_for(vaccine_id)?;
        let (child, ledger) = self.snapshot(child_id)?;

        let prior = ledger.doses_on_or_before(child_id, vaccine_id, candidate);
        let Some(next) = rules.get(prior.len()) else {
            return Ok(BookingCheck::SeriesComplete);
        };
        let dose_number = next.dose_number;

        if !next.target_sex.admits(child.sex) {
            return Ok(BookingCheck::NotApplicable { dose_number });
        }

        if let Some(max) = next.max_age_months {
            let cutoff = add_months(child.birth_date, max);
            if candidate > cutoff {
                return Ok(BookingCheck::AgeExceeded {
                    dose_number,
                    cutoff,
                });
            }
        }

        let mut earliest = add_months(child.birth_date, next.min_age_months);
        if let Some(previous) = ledger.previous_dose(child_id, vaccine_id, candidate) {
            let interval_floor = add_days(
                previous.effective_date(),
                next.min_interval_days.unwrap_or(0),
            );
            earliest = earliest.max(interval_floor);
        }

        if candidate < earliest {
            Ok(BookingCheck::TooEarly {
                dose_number,
                earliest,
            })
        } else {
            Ok(BookingCheck::Allowed { dose_number })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::default_protocol;
    use crate::repository::MemoryStore;
    use uuid::Uuid;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn child(id: &str, born: NaiveDate, sex: Sex) -> Child {
        Child {
            child_id: id.into(),
            birth_date: born,
            registration_date: born,
            sex,
        }
    }

    fn attended(child_id: &str, vaccine_id: &str, on: NaiveDate) -> DoseEvent {
        DoseEvent {
            child_id: child_id.into(),
            vaccine_id: vaccine_id.into(),
            effective_date: on,
            source: DoseSource::Appointment {
                id: Uuid::new_v4(),
                status: AppointmentStatus::Attended,
            },
        }
    }

    fn entry<'e>(schedule: &'e [ScheduleEntry], vaccine_id: &str) -> &'e ScheduleEntry {
        schedule
            .iter()
            .find(|e| e.vaccine_id == vaccine_id)
            .unwrap_or_else(|| panic!("no entry for {}", vaccine_id))
    }

    fn two_vaccine_protocol() -> ProtocolRuleSet {
        let rule = |vaccine_id: &str| VaccineProtocolRule {
            vaccine_id: vaccine_id.into(),
            dose_number: 1,
            min_age_months: 2,
            max_age_months: None,
            min_interval_days: None,
            is_booster: false,
            target_sex: TargetSex::Any,
            dose_limit: 1,
        };
        ProtocolRuleSet::new(
            vec![
                Vaccine {
                    id: "a".into(),
                    name: "Alpha".into(),
                },
                Vaccine {
                    id: "b".into(),
                    name: "Beta".into(),
                },
            ],
            vec![rule("a"), rule("b")],
        )
        .unwrap()
    }

    #[test]
    fn test_child_not_found() {
        let rules = ProtocolRuleSet::load(default_protocol()).unwrap();
        let store = MemoryStore::new();
        let scheduler = Scheduler::new(&rules, &store);

        let result = scheduler.compute_schedule("ghost", date(2024, 1, 1));
        assert!(matches!(result, Err(Error::ChildNotFound(id)) if id == "ghost"));
    }

    #[test]
    fn test_one_entry_per_vaccine_sorted() {
        let rules = ProtocolRuleSet::load(default_protocol()).unwrap();
        let store = MemoryStore::new().with_child(child("c1", date(2024, 6, 1), Sex::Female));
        let scheduler = Scheduler::new(&rules, &store);

        let schedule = scheduler.compute_schedule("c1", date(2024, 6, 1)).unwrap();
        assert_eq!(schedule.len(), rules.len());

        for pair in schedule.windows(2) {
            let key = |e: &ScheduleEntry| (e.min_age_months, e.vaccine_name.clone());
            assert!(key(&pair[0]) <= key(&pair[1]), "{:?} before {:?}", pair[0], pair[1]);
        }

        assert_eq!(entry(&schedule, "bcg").status, ScheduleStatus::Due);
        assert_eq!(entry(&schedule, "hepb").status, ScheduleStatus::Due);
        let pcv = entry(&schedule, "pcv");
        assert_eq!(pcv.status, ScheduleStatus::NotYetEligible);
        assert_eq!(pcv.suggested_date, Some(date(2024, 8, 1)));
    }

    #[test]
    fn test_group_catch_up_same_day() {
        let rules = two_vaccine_protocol();
        let store = MemoryStore::new()
            .with_child(child("c1", date(2025, 10, 1), Sex::Male))
            .with_event(attended("c1", "a", date(2026, 1, 16)));
        let scheduler = Scheduler::new(&rules, &store);

        let schedule = scheduler.compute_schedule("c1", date(2026, 1, 16)).unwrap();

        assert_eq!(entry(&schedule, "a").status, ScheduleStatus::Applied);
        let b = entry(&schedule, "b");
        assert_eq!(b.status, ScheduleStatus::Due);
        assert_eq!(b.suggested_date, Some(date(2026, 1, 16)));
    }

    #[test]
    fn test_group_catch_up_follows_booked_sibling() {
        let rules = two_vaccine_protocol();
        let booked = DoseEvent {
            source: DoseSource::Appointment {
                id: Uuid::new_v4(),
                status: AppointmentStatus::Scheduled,
            },
            ..attended("c1", "a", date(2026, 2, 10))
        };
        let store = MemoryStore::new()
            .with_child(child("c1", date(2025, 10, 1), Sex::Male))
            .with_event(booked);
        let scheduler = Scheduler::new(&rules, &store);

        let synced = scheduler.compute_schedule("c1", date(2026, 1, 16)).unwrap();
        let b = entry(&synced, "b");
        assert_eq!(b.status, ScheduleStatus::NotYetEligible);
        assert_eq!(b.suggested_date, Some(date(2026, 2, 10)));

        let independent = Scheduler::new(&rules, &store)
            .with_policy(SyncConfig {
                enabled: false,
                tolerance_months: 0,
            })
            .compute_schedule("c1", date(2026, 1, 16))
            .unwrap();
        assert_eq!(entry(&independent, "b").status, ScheduleStatus::Due);
    }

    #[test]
    fn test_sex_restricted_never_due_or_overdue() {
        let rules = ProtocolRuleSet::load(default_protocol()).unwrap();
        let store = MemoryStore::new()
            .with_child(child("boy", date(2010, 1, 1), Sex::Male))
            .with_child(child("girl", date(2010, 1, 1), Sex::Female));
        let scheduler = Scheduler::new(&rules, &store);

        for as_of in [date(2019, 6, 1), date(2030, 1, 1)] {
            let schedule = scheduler.compute_schedule("boy", as_of).unwrap();
            assert_eq!(entry(&schedule, "hpv").status, ScheduleStatus::Applied);
        }

        let schedule = scheduler.compute_schedule("girl", date(2019, 6, 1)).unwrap();
        assert_eq!(entry(&schedule, "hpv").status, ScheduleStatus::Due);
    }

    #[test]
    fn test_idempotent_and_monotonic() {
        let rules = ProtocolRuleSet::load(default_protocol()).unwrap();
        let born = date(2024, 1, 15);
        let store = MemoryStore::new()
            .with_child(child("c1", born, Sex::Female))
            .with_event(attended("c1", "hepb", born))
            .with_event(attended("c1", "bcg", date(2024, 1, 20)))
            .with_event(attended("c1", "hexavalent", date(2024, 3, 20)));
        let scheduler = Scheduler::new(&rules, &store);

        let first = scheduler.compute_schedule("c1", date(2024, 4, 1)).unwrap();
        let second = scheduler.compute_schedule("c1", date(2024, 4, 1)).unwrap();
        assert_eq!(first, second);

        let mut previous: Option<Vec<ScheduleEntry>> = None;
        for months in 0..60 {
            let as_of = crate::dates::add_months(born, months);
            let schedule = scheduler.compute_schedule("c1", as_of).unwrap();
            if let Some(prev) = &previous {
                for entry_now in &schedule {
                    let before = entry(prev, &entry_now.vaccine_id);
                    assert!(entry_now.dose_number_to_apply >= before.dose_number_to_apply);
                }
            }
            previous = Some(schedule);
        }
    }

    #[test]
    fn test_events_for_unknown_vaccine_are_skipped() {
        let rules = two_vaccine_protocol();
        let store = MemoryStore::new()
            .with_child(child("c1", date(2025, 10, 1), Sex::Male))
            .with_event(attended("c1", "smallpox", date(2026, 1, 1)));
        let scheduler = Scheduler::new(&rules, &store);

        let schedule = scheduler.compute_schedule("c1", date(2026, 1, 16)).unwrap();
        assert_eq!(schedule.len(), 2);
        assert!(schedule.iter().all(|e| e.vaccine_id != "smallpox"));
    }

    #[test]
    fn test_dedup_across_sources() {
        let rules = ProtocolRuleSet::load(default_protocol()).unwrap();
        let appt_id = Uuid::new_v4();
        let born = date(2024, 1, 1);
        let store = MemoryStore::new()
            .with_child(child("c1", born, Sex::Male))
            .with_event(DoseEvent {
                child_id: "c1".into(),
                vaccine_id: "hepb".into(),
                effective_date: born,
                source: DoseSource::Appointment {
                    id: appt_id,
                    status: AppointmentStatus::Attended,
                },
            })
            .with_event(DoseEvent {
                child_id: "c1".into(),
                vaccine_id: "hepb".into(),
                effective_date: born,
                source: DoseSource::LegacyImport {
                    id: Uuid::new_v4(),
                    appointment_id: Some(appt_id),
                },
            });
        let scheduler = Scheduler::new(&rules, &store);

        let schedule = scheduler.compute_schedule("c1", date(2024, 3, 1)).unwrap();
        assert_eq!(entry(&schedule, "hepb").dose_number_to_apply, 2);
    }

    #[test]
    fn test_concurrent_computation() {
        let rules = ProtocolRuleSet::load(default_protocol()).unwrap();
        let store = MemoryStore::new()
            .with_child(child("c1", date(2024, 1, 1), Sex::Female))
            .with_event(attended("c1", "bcg", date(2024, 1, 2)));
        let scheduler = Scheduler::new(&rules, &store);
        let expected = scheduler.compute_schedule("c1", date(2024, 5, 1)).unwrap();

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| scheduler.compute_schedule("c1", date(2024, 5, 1))))
                .collect();
            for handle in handles {
                assert_eq!(handle.join().unwrap().unwrap(), expected);
            }
        });
    }

    #[test]
    fn test_check_booking_ignores_later_bookings() {
        let rules = ProtocolRuleSet::load(default_protocol()).unwrap();
        let born = date(2024, 1, 1);
        let later = DoseEvent {
            source: DoseSource::Appointment {
                id: Uuid::new_v4(),
                status: AppointmentStatus::Scheduled,
            },
            ..attended("c1", "hexavalent", date(2024, 9, 1))
        };
        let store = MemoryStore::new()
            .with_child(child("c1", born, Sex::Female))
            .with_event(later)
            .with_event(attended("c1", "hexavalent", date(2024, 3, 1)));
        let scheduler = Scheduler::new(&rules, &store);

        // dose 2 needs 4 months of age and 56 days after 2024-03-01
        assert_eq!(
            scheduler.check_booking("c1", "hexavalent", date(2024, 4, 15)).unwrap(),
            BookingCheck::TooEarly {
                dose_number: 2,
                earliest: date(2024, 5, 1),
            }
        );
        assert_eq!(
            scheduler.check_booking("c1", "hexavalent", date(2024, 5, 1)).unwrap(),
            BookingCheck::Allowed { dose_number: 2 }
        );
    }

    #[test]
    fn test_check_booking_outcomes() {
        let rules = ProtocolRuleSet::load(default_protocol()).unwrap();
        let born = date(2024, 1, 1);
        let store = MemoryStore::new()
            .with_child(child("c1", born, Sex::Male))
            .with_event(attended("c1", "bcg", born));
        let scheduler = Scheduler::new(&rules, &store);

        assert_eq!(
            scheduler.check_booking("c1", "bcg", date(2024, 2, 1)).unwrap(),
            BookingCheck::SeriesComplete
        );
        assert_eq!(
            scheduler.check_booking("c1", "rotavirus", date(2024, 6, 1)).unwrap(),
            BookingCheck::AgeExceeded {
                dose_number: 1,
                cutoff: date(2024, 5, 1),
            }
        );
        assert_eq!(
            scheduler.check_booking("c1", "hpv", date(2033, 6, 1)).unwrap(),
            BookingCheck::NotApplicable { dose_number: 1 }
        );
        assert!(matches!(
            scheduler.check_booking("c1", "smallpox", date(2024, 2, 1)),
            Err(Error::UnknownVaccine(_))
        ));
    }
}
