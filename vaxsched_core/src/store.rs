//! File-backed snapshot of children and dose history.
//!
//! A data directory holds:
//! - `children.json` — JSON array of children
//! - `appointments.jsonl` — one appointment record per line
//! - `legacy_history.csv` — imported history rows
//! - `protocol.toml` — optional protocol override
//!
//! The booking subsystem owns these files; this module only reads them.

use crate::config::Config;
use crate::protocol::{default_protocol, ProtocolDocument, ProtocolRuleSet};
use crate::repository::{ChildRepository, DoseEventRepository};
use crate::types::*;
use crate::{Error, Result};
use chrono::{NaiveDate, NaiveDateTime};
use csv::ReaderBuilder;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const CHILDREN_FILE: &str = "children.json";
pub const APPOINTMENTS_FILE: &str = "appointments.jsonl";
pub const LEGACY_HISTORY_FILE: &str = "legacy_history.csv";

/// One line of the appointment log
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppointmentRecord {
    pub id: Uuid,
    pub child_id: String,
    pub vaccine_id: String,
    pub scheduled_at: NaiveDateTime,
    pub status: AppointmentStatus,
}

impl From<AppointmentRecord> for DoseEvent {
    fn from(record: AppointmentRecord) -> Self {
        // Time of day is irrelevant to eligibility
        DoseEvent {
            child_id: record.child_id,
            vaccine_id: record.vaccine_id,
            effective_date: record.scheduled_at.date(),
            source: DoseSource::Appointment {
                id: record.id,
                status: record.status,
            },
        }
    }
}

/// CSV row format for imported history
#[derive(Debug, Deserialize)]
struct LegacyCsvRow {
    id: String,
    child_id: String,
    vaccine_id: String,
    applied_on: String,
    appointment_id: Option<String>,
}

impl TryFrom<LegacyCsvRow> for DoseEvent {
    type Error = Error;

    fn try_from(row: LegacyCsvRow) -> Result<Self> {
        let id = Uuid::parse_str(row.id.trim())
            .map_err(|e| Error::InvalidRecord(format!("Invalid UUID '{}': {}", row.id, e)))?;

        let effective_date = NaiveDate::parse_from_str(row.applied_on.trim(), "%Y-%m-%d")
            .map_err(|e| Error::InvalidRecord(format!("Invalid date '{}': {}", row.applied_on, e)))?;

        let appointment_id = match row.appointment_id.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(Uuid::parse_str(raw).map_err(|e| {
                Error::InvalidRecord(format!("Invalid appointment UUID '{}': {}", raw, e))
            })?),
        };

        Ok(DoseEvent {
            child_id: row.child_id,
            vaccine_id: row.vaccine_id,
            effective_date,
            source: DoseSource::LegacyImport { id, appointment_id },
        })
    }
}

/// Read-only view of a data directory
#[derive(Clone, Debug)]
pub struct FileStore {
    data_dir: PathBuf,
    protocol_path: Option<PathBuf>,
}

impl FileStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        let candidate = data_dir.join("protocol.toml");
        let protocol_path = candidate.exists().then_some(candidate);
        Self {
            data_dir,
            protocol_path,
        }
    }

    /// Open the data directory named by a configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            data_dir: config.data.data_dir.clone(),
            protocol_path: config.protocol_path(),
        }
    }

    pub fn with_protocol(mut self, path: impl Into<PathBuf>) -> Self {
        self.protocol_path = Some(path.into());
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Load the protocol file, or the built-in protocol when none is set
    pub fn load_rule_set(&self) -> Result<ProtocolRuleSet> {
        match &self.protocol_path {
            Some(path) => ProtocolRuleSet::load(&ProtocolDocument::load_from(path)?),
            None => {
                tracing::debug!("No protocol file configured, using built-in protocol");
                ProtocolRuleSet::load(default_protocol())
            }
        }
    }

    fn load_children(&self) -> Result<Vec<Child>> {
        let path = self.data_dir.join(CHILDREN_FILE);
        if !path.exists() {
            tracing::debug!("No children file at {:?}", path);
            return Ok(Vec::new());
        }
        let contents = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

impl ChildRepository for FileStore {
    fn get_child(&self, child_id: &str) -> Result<Option<Child>> {
        Ok(self
            .load_children()?
            .into_iter()
            .find(|c| c.child_id == child_id))
    }
}

impl DoseEventRepository for FileStore {
    fn list_dose_events(&self, child_id: &str) -> Result<Vec<DoseEvent>> {
        let mut events: Vec<DoseEvent> =
            read_appointments(&self.data_dir.join(APPOINTMENTS_FILE))?
                .into_iter()
                .filter(|r| r.child_id == child_id)
                .map(DoseEvent::from)
                .collect();
        let appointment_count = events.len();

        events.extend(
            read_legacy_history(&self.data_dir.join(LEGACY_HISTORY_FILE))?
                .into_iter()
                .filter(|e| e.child_id == child_id),
        );

        tracing::debug!(
            "Loaded {} appointment and {} legacy events for child {}",
            appointment_count,
            events.len() - appointment_count,
            child_id
        );

        Ok(events)
    }
}

/// Read all appointment records from the log
///
/// Takes a shared lock for the duration of the read so a concurrent writer
/// can't hand us a half-written record. Malformed lines are logged and skipped.
pub fn read_appointments(path: &Path) -> Result<Vec<AppointmentRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    file.lock_shared()?;

    let reader = BufReader::new(&file);
    let mut records = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<AppointmentRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(
                    "Failed to parse appointment at line {}: {}",
                    line_num + 1,
                    e
                );
            }
        }
    }

    file.unlock()?;
    tracing::debug!("Read {} appointment records", records.len());
    Ok(records)
}

/// Read all imported history rows
fn read_legacy_history(path: &Path) -> Result<Vec<DoseEvent>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let mut events = Vec::new();
    for result in reader.deserialize::<LegacyCsvRow>() {
        match result {
            Ok(row) => match DoseEvent::try_from(row) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!("Failed to parse legacy history row: {}", e);
                }
            },
            Err(e) => {
                tracing::warn!("Failed to deserialize legacy history row: {}", e);
            }
        }
    }

    Ok(events)
}
