//! Shared fixtures for the orchestrator's unit tests.

use conclave_config::OrchestratorConfig;
use conclave_core::provider::Provider;
use conclave_core::template::DaemonTemplate;
use conclave_core::tool::ToolRegistry;
use conclave_memory::InMemoryStores;
use std::sync::Arc;
use uuid::Uuid;

use crate::service::Orchestrator;

pub(crate) struct Harness {
    pub orchestrator: Orchestrator,
    pub stores: InMemoryStores,
}

pub(crate) fn harness(provider: impl Provider + 'static) -> Harness {
    harness_with(Arc::new(provider))
}

pub(crate) fn harness_with<P: Provider + 'static>(provider: Arc<P>) -> Harness {
    let stores = InMemoryStores::new();
    let orchestrator = Orchestrator::new(
        OrchestratorConfig::default(),
        provider,
        Arc::new(ToolRegistry::new()),
        stores.stores(),
    );
    Harness { orchestrator, stores }
}

pub(crate) fn template(user_id: &str, slug: &str, role_label: &str) -> DaemonTemplate {
    DaemonTemplate {
        id: Uuid::new_v4(),
        user_id: user_id.into(),
        name: role_label.into(),
        slug: slug.into(),
        description: String::new(),
        role: slug.into(),
        role_label: role_label.into(),
        persona: "Careful and concise.".into(),
        instructions: String::new(),
        constraints: String::new(),
        output_format: String::new(),
        default_tools: Vec::new(),
        max_iterations: 7,
        max_retries: 0,
        is_default: false,
        is_active: true,
        learnings: Vec::new(),
        stats: Default::default(),
    }
}
