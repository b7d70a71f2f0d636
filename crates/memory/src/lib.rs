//! In-memory store implementations for Conclave.
//!
//! Every store trait from `conclave_core::store` has an implementation here
//! backed by `tokio::sync::RwLock`. They back the CLI and every test.

pub mod catalog;
pub mod daemons;
pub mod sessions;
pub mod tasks;

use conclave_core::store::Stores;
use std::sync::Arc;

pub use catalog::{
    InMemoryEngramStore, InMemoryProjectStore, InMemorySaveStore, InMemorySkillCatalog,
    InMemoryTemplateStore,
};
pub use daemons::InMemoryDaemonStore;
pub use sessions::InMemorySessionStore;
pub use tasks::InMemoryTaskStore;

/// Concrete handles to one set of in-memory stores.
///
/// Keep this around when you need to seed projects, templates, saves or
/// skills; hand [`InMemoryStores::stores`] to the orchestrator.
#[derive(Clone, Default)]
pub struct InMemoryStores {
    pub tasks: InMemoryTaskStore,
    pub daemons: InMemoryDaemonStore,
    pub sessions: InMemorySessionStore,
    pub projects: InMemoryProjectStore,
    pub templates: InMemoryTemplateStore,
    pub engrams: InMemoryEngramStore,
    pub saves: InMemorySaveStore,
    pub skills: InMemorySkillCatalog,
}

impl InMemoryStores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trait-object view sharing the same underlying data.
    pub fn stores(&self) -> Stores {
        Stores {
            tasks: Arc::new(self.tasks.clone()),
            daemons: Arc::new(self.daemons.clone()),
            sessions: Arc::new(self.sessions.clone()),
            projects: Arc::new(self.projects.clone()),
            templates: Arc::new(self.templates.clone()),
            engrams: Arc::new(self.engrams.clone()),
            saves: Arc::new(self.saves.clone()),
            skills: Arc::new(self.skills.clone()),
        }
    }
}
