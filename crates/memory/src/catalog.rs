//! In-memory stores for user-owned context: projects, templates, engram
//! entries, saved documents and the skill catalog.

use async_trait::async_trait;
use chrono::Utc;
use conclave_core::engram::EngramEntry;
use conclave_core::error::StoreError;
use conclave_core::session::{Project, SavedDocument, Skill};
use conclave_core::store::{
    EngramStore, ProjectStore, SaveStore, SkillCatalog, StoreResult, TemplateStore,
};
use conclave_core::template::{DaemonTemplate, TemplateLearning};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct InMemoryProjectStore {
    projects: Arc<RwLock<Vec<Project>>>,
}

impl InMemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, project: Project) {
        self.projects.write().await.push(project);
    }
}

#[async_trait]
impl ProjectStore for InMemoryProjectStore {
    async fn get(&self, id: Uuid) -> StoreResult<Option<Project>> {
        Ok(self.projects.read().await.iter().find(|p| p.id == id).cloned())
    }

    async fn list_for_user(&self, user_id: &str) -> StoreResult<Vec<Project>> {
        Ok(self
            .projects
            .read()
            .await
            .iter()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }
}

/// Templates in insertion order. System templates have an empty `user_id`.
#[derive(Clone, Default)]
pub struct InMemoryTemplateStore {
    templates: Arc<RwLock<Vec<DaemonTemplate>>>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, template: DaemonTemplate) {
        self.templates.write().await.push(template);
    }

    /// Index of the template `user_id` sees under `slug`.
    fn resolve(templates: &[DaemonTemplate], user_id: &str, slug: &str) -> Option<usize> {
        let matches = |t: &DaemonTemplate| t.slug == slug && t.is_active;
        templates
            .iter()
            .position(|t| matches(t) && t.user_id == user_id)
            .or_else(|| templates.iter().position(|t| matches(t) && t.user_id.is_empty()))
    }
}

#[async_trait]
impl TemplateStore for InMemoryTemplateStore {
    async fn list_for_user(&self, user_id: &str) -> StoreResult<Vec<DaemonTemplate>> {
        Ok(self
            .templates
            .read()
            .await
            .iter()
            .filter(|t| t.is_active && (t.user_id.is_empty() || t.user_id == user_id))
            .cloned()
            .collect())
    }

    async fn get_by_slug(&self, user_id: &str, slug: &str) -> StoreResult<Option<DaemonTemplate>> {
        let templates = self.templates.read().await;
        Ok(Self::resolve(&templates, user_id, slug).map(|i| templates[i].clone()))
    }

    async fn increment_stats(
        &self,
        user_id: &str,
        slug: &str,
        success: bool,
        iterations: usize,
    ) -> StoreResult<()> {
        let mut templates = self.templates.write().await;
        let idx = Self::resolve(&templates, user_id, slug)
            .ok_or_else(|| StoreError::not_found("template", slug))?;
        templates[idx].stats.record(success, iterations);
        Ok(())
    }

    async fn add_learning(
        &self,
        user_id: &str,
        slug: &str,
        learning: TemplateLearning,
    ) -> StoreResult<()> {
        let mut templates = self.templates.write().await;
        let idx = Self::resolve(&templates, user_id, slug)
            .ok_or_else(|| StoreError::not_found("template", slug))?;
        let learnings = &mut templates[idx].learnings;

        match learnings.iter_mut().find(|l| l.key == learning.key) {
            Some(existing) => {
                existing.reinforced_count += 1;
                existing.confidence = learning.confidence;
                existing.content = learning.content;
                existing.last_seen_at = Utc::now();
            }
            None => learnings.push(TemplateLearning {
                reinforced_count: 1,
                ..learning
            }),
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryEngramStore {
    entries: Arc<RwLock<Vec<EngramEntry>>>,
}

impl InMemoryEngramStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EngramStore for InMemoryEngramStore {
    async fn write(&self, entry: EngramEntry) -> StoreResult<()> {
        self.entries.write().await.push(entry);
        Ok(())
    }

    async fn recent(&self, session_id: Uuid, limit: usize) -> StoreResult<Vec<EngramEntry>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .rev()
            .filter(|e| e.session_id == session_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[derive(Clone, Default)]
pub struct InMemorySaveStore {
    docs: Arc<RwLock<HashMap<Uuid, SavedDocument>>>,
}

impl InMemorySaveStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, doc: SavedDocument) {
        self.docs.write().await.insert(doc.id, doc);
    }
}

#[async_trait]
impl SaveStore for InMemorySaveStore {
    async fn get_many(&self, user_id: &str, ids: &[Uuid]) -> StoreResult<Vec<SavedDocument>> {
        let docs = self.docs.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| docs.get(id))
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect())
    }
}

/// Skills routed by keyword match on the lowercased message.
#[derive(Clone, Default)]
pub struct InMemorySkillCatalog {
    skills: Arc<RwLock<Vec<Skill>>>,
}

impl InMemorySkillCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, skill: Skill) {
        self.skills.write().await.push(skill);
    }
}

#[async_trait]
impl SkillCatalog for InMemorySkillCatalog {
    async fn get_many(&self, ids: &[String]) -> StoreResult<Vec<Skill>> {
        let skills = self.skills.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| skills.iter().find(|s| &s.id == id))
            .cloned()
            .collect())
    }

    async fn route(&self, message: &str) -> StoreResult<Vec<String>> {
        let lower = message.to_lowercase();
        Ok(self
            .skills
            .read()
            .await
            .iter()
            .filter(|s| s.keywords.iter().any(|k| lower.contains(k.as_str())))
            .map(|s| s.id.clone())
            .collect())
    }
}
