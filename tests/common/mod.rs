//! Shared helpers for authmap integration tests.
//!
//! Every harness runs on in-memory stores, so tests have no side effects and
//! can inject faults into either store.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use authmap::config::ControllerConfig;
use authmap::controller::{Context, Controller, Event, NamespaceFilter, Submission};
use authmap::snippets::{MemorySnippetStore, SnippetStore};
use authmap_core::merge::MergePolicy;
use authmap_core::model::{MappingEntry, SharedTable, Snippet, SnippetId};
use authmap_core::store::MemoryTableStore;

/// How long a test waits for the controller to go idle.
pub const SETTLE: Duration = Duration::from_secs(20);

pub const ROLE_X: &str = "arn:aws:iam::111122223333:role/X";
pub const USER_Y: &str = "arn:aws:iam::111122223333:user/Y";

pub fn id(s: &str) -> SnippetId {
    s.parse().expect("valid snippet id")
}

pub fn role(arn: &str, name: &str, groups: &[&str]) -> MappingEntry {
    MappingEntry::new(arn, name, groups)
}

pub fn upsert(snippet: &str, roles: Vec<MappingEntry>, users: Vec<MappingEntry>) -> Event {
    Event::Upserted {
        id: id(snippet),
        map_roles: roles,
        map_users: users,
    }
}

pub fn delete(snippet: &str) -> Event {
    Event::DeleteRequested { id: id(snippet) }
}

/// A running controller over in-memory stores.
pub struct Harness {
    pub table: Arc<MemoryTableStore>,
    pub snippets: Arc<MemorySnippetStore>,
    pub controller: Controller,
}

impl Harness {
    pub fn start() -> Self {
        Self::with(2, NamespaceFilter::default(), Arc::new(MemoryTableStore::default()))
    }

    pub fn with(workers: usize, filter: NamespaceFilter, table: Arc<MemoryTableStore>) -> Self {
        let snippets = Arc::new(MemorySnippetStore::new());
        let ctx = Context {
            table: table.clone(),
            snippets: snippets.clone(),
            policy: MergePolicy::default(),
            max_conflict_retries: 5,
        };
        let config = ControllerConfig {
            workers,
            requeue_base_ms: 1,
            requeue_max_ms: 20,
            ..ControllerConfig::default()
        };
        let controller = Controller::start(ctx, &config, filter).expect("controller starts");
        Self {
            table,
            snippets,
            controller,
        }
    }

    pub fn submit(&self, event: Event) {
        assert_eq!(
            self.controller.submit(event).expect("submit"),
            Submission::Queued
        );
    }

    pub fn settle(&self) {
        assert!(self.controller.wait_idle(SETTLE), "controller did not settle");
    }

    pub fn table(&self) -> SharedTable {
        self.table.table().expect("table readable")
    }

    pub fn snippet(&self, s: &str) -> Option<Snippet> {
        self.snippets.get(&id(s)).expect("snippet store readable")
    }
}
