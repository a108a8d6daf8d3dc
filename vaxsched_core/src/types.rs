//! Core domain types for the vaccination scheduling engine.
//!
//! This module defines the fundamental types used throughout the system:
//! - Protocol rules and the vaccine catalog
//! - Dose events and their provenance
//! - Children
//! - Computed schedule entries

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Protocol Types
// ============================================================================

/// Sex restriction attached to a protocol dose
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum TargetSex {
    #[default]
    Any,
    Male,
    Female,
}

impl TargetSex {
    /// Whether a child of the given sex may receive a dose with this restriction
    pub fn admits(self, sex: Sex) -> bool {
        match self {
            TargetSex::Any => true,
            TargetSex::Male => sex == Sex::Male,
            TargetSex::Female => sex == Sex::Female,
        }
    }
}

/// A vaccine known to the protocol catalog
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Vaccine {
    pub id: String,
    pub name: String,
}

/// One row of the immunization protocol: the rule for a single dose
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VaccineProtocolRule {
    pub vaccine_id: String,
    pub dose_number: u32,
    pub min_age_months: u32,
    #[serde(default)]
    pub max_age_months: Option<u32>,
    #[serde(default)]
    pub min_interval_days: Option<u32>,
    #[serde(default)]
    pub is_booster: bool,
    #[serde(default)]
    pub target_sex: TargetSex,
    pub dose_limit: u32,
}

// ============================================================================
// Dose History Types
// ============================================================================

/// Lifecycle state of a live appointment
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Attended,
    Cancelled,
}

impl AppointmentStatus {
    /// Scheduled, confirmed and attended appointments commit a dose
    pub fn is_committed(self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled)
    }
}

/// Which record type a dose event was read from
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Appointment,
    LegacyImport,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Appointment => write!(f, "appointment"),
            SourceKind::LegacyImport => write!(f, "legacy"),
        }
    }
}

/// Provenance of a dose event
///
/// Kept for tracing and audits; eligibility logic only looks at dates.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DoseSource {
    /// A live appointment record
    Appointment { id: Uuid, status: AppointmentStatus },
    /// An imported history row, optionally linked to the appointment it documents
    LegacyImport {
        id: Uuid,
        appointment_id: Option<Uuid>,
    },
}

/// A single observed or committed administration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DoseEvent {
    pub child_id: String,
    pub vaccine_id: String,
    pub effective_date: NaiveDate,
    pub source: DoseSource,
}

impl DoseEvent {
    pub fn source_kind(&self) -> SourceKind {
        match self.source {
            DoseSource::Appointment { .. } => SourceKind::Appointment,
            DoseSource::LegacyImport { .. } => SourceKind::LegacyImport,
        }
    }

    pub fn source_id(&self) -> Uuid {
        match self.source {
            DoseSource::Appointment { id, .. } => id,
            DoseSource::LegacyImport { id, .. } => id,
        }
    }

    /// The appointment identifier this event documents, if any
    ///
    /// Two events sharing a linking key describe the same administration.
    pub fn linking_key(&self) -> Option<Uuid> {
        match self.source {
            DoseSource::Appointment { id, .. } => Some(id),
            DoseSource::LegacyImport { appointment_id, .. } => appointment_id,
        }
    }

    /// Whether this event counts toward applied-or-committed doses
    pub fn is_committed(&self) -> bool {
        match self.source {
            DoseSource::Appointment { status, .. } => status.is_committed(),
            DoseSource::LegacyImport { .. } => true,
        }
    }
}

// ============================================================================
// Child
// ============================================================================

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Sex {
    Male,
    Female,
}

/// A child enrolled in the immunization program
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Child {
    pub child_id: String,
    pub birth_date: NaiveDate,
    pub registration_date: NaiveDate,
    pub sex: Sex,
}

// ============================================================================
// Schedule Output
// ============================================================================

/// Status of the next unresolved dose of a vaccine
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    /// Series complete, or the vaccine does not apply to this child
    Applied,
    /// Eligible now
    Due,
    /// Past the age window; can no longer be scheduled under protocol
    Overdue,
    /// Eligible from `suggested_date` onwards
    NotYetEligible,
}

impl ScheduleStatus {
    /// Due and not-yet-eligible entries may still move
    pub fn is_pending(self) -> bool {
        matches!(self, ScheduleStatus::Due | ScheduleStatus::NotYetEligible)
    }
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ScheduleStatus::Applied => "Applied",
            ScheduleStatus::Due => "Due",
            ScheduleStatus::Overdue => "Overdue",
            ScheduleStatus::NotYetEligible => "Not yet eligible",
        };
        f.write_str(label)
    }
}

/// One row of a computed schedule: the next dose for a single vaccine
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub vaccine_id: String,
    pub vaccine_name: String,
    pub dose_number_to_apply: u32,
    pub status: ScheduleStatus,
    pub suggested_date: Option<NaiveDate>,
    pub min_age_months: u32,
    pub max_age_months: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn legacy(appointment_id: Option<Uuid>) -> DoseEvent {
        DoseEvent {
            child_id: "c1".into(),
            vaccine_id: "bcg".into(),
            effective_date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            source: DoseSource::LegacyImport {
                id: Uuid::new_v4(),
                appointment_id,
            },
        }
    }

    #[test]
    fn test_target_sex_admits() {
        assert!(TargetSex::Any.admits(Sex::Male));
        assert!(TargetSex::Female.admits(Sex::Female));
        assert!(!TargetSex::Female.admits(Sex::Male));
        assert!(!TargetSex::Male.admits(Sex::Female));
    }

    #[test]
    fn test_cancelled_appointment_not_committed() {
        let mut event = legacy(None);
        event.source = DoseSource::Appointment {
            id: Uuid::new_v4(),
            status: AppointmentStatus::Cancelled,
        };
        assert!(!event.is_committed());

        event.source = DoseSource::Appointment {
            id: Uuid::new_v4(),
            status: AppointmentStatus::Scheduled,
        };
        assert!(event.is_committed());
    }

    #[test]
    fn test_linking_key() {
        let link = Uuid::new_v4();
        assert_eq!(legacy(Some(link)).linking_key(), Some(link));
        assert_eq!(legacy(None).linking_key(), None);
        assert_eq!(legacy(None).source_kind(), SourceKind::LegacyImport);
    }

    #[test]
    fn test_schedule_status_serializes_snake_case() {
        let json = serde_json::to_string(&ScheduleStatus::NotYetEligible).unwrap();
        assert_eq!(json, "\"not_yet_eligible\"");
    }
}
