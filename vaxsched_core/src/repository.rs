//! Read-only collaborators the engine pulls its snapshot from.
//!
//! The engine never writes through these traits. [`MemoryStore`] is the
//! in-process implementation; [`crate::store::FileStore`] reads a data
//! directory.

use crate::types::*;
use crate::Result;
use std::collections::HashMap;

/// Source of the protocol catalog
pub trait RuleRepository {
    fn list_vaccines(&self) -> Result<Vec<Vaccine>>;
    fn list_rules(&self) -> Result<Vec<VaccineProtocolRule>>;
}

/// Source of a child's dose events, from both appointment and legacy records
pub trait DoseEventRepository {
    fn list_dose_events(&self, child_id: &str) -> Result<Vec<DoseEvent>>;
}

/// Source of child demographics
pub trait ChildRepository {
    fn get_child(&self, child_id: &str) -> Result<Option<Child>>;
}

/// In-memory snapshot of children and dose events
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    children: HashMap<String, Child>,
    events: Vec<DoseEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_child(mut self, child: Child) -> Self {
        self.insert_child(child);
        self
    }

    pub fn with_event(mut self, event: DoseEvent) -> Self {
        self.events.push(event);
        self
    }

    pub fn insert_child(&mut self, child: Child) {
        self.children.insert(child.child_id.clone(), child);
    }

    pub fn push_event(&mut self, event: DoseEvent) {
        self.events.push(event);
    }
}

impl ChildRepository for MemoryStore {
    fn get_child(&self, child_id: &str) -> Result<Option<Child>> {
        Ok(self.children.get(child_id).cloned())
    }
}

impl DoseEventRepository for MemoryStore {
    fn list_dose_events(&self, child_id: &str) -> Result<Vec<DoseEvent>> {
        Ok(self
            .events
            .iter()
            .filter(|e| e.child_id == child_id)
            .cloned()
            .collect())
    }
}
