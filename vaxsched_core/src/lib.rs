#![forbid(unsafe_code)]

//! Vaccination eligibility and scheduling engine.
//!
//! This crate provides:
//! - Domain types (protocol rules, dose events, children, schedule entries)
//! - Protocol rule set loading and validation
//! - Dose ledger reconciliation across appointment and legacy records
//! - Per-vaccine eligibility evaluation
//! - Milestone synchronization for catch-up plans
//! - Schedule assembly over read-only repositories

pub mod types;
pub mod error;
pub mod dates;
pub mod config;
pub mod logging;
pub mod repository;
pub mod protocol;
pub mod store;
pub mod ledger;
pub mod eligibility;
pub mod synchronizer;
pub mod schedule;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::{Config, SyncConfig};
pub use repository::{ChildRepository, DoseEventRepository, MemoryStore, RuleRepository};
pub use protocol::{default_protocol, ProtocolDocument, ProtocolRuleSet};
pub use store::FileStore;
pub use ledger::{DoseLedger, LedgerEntry};
pub use eligibility::{evaluate, DoseWindow, Evaluation};
pub use synchronizer::synchronize;
pub use schedule::{BookingCheck, Scheduler};
