//! In-memory storage backend
//!
//! Backs tests and embedded use. One mutex serializes all writes, and
//! the same uniqueness and version checks the PostgreSQL backend gets
//! from its constraints are applied under that lock, so concurrency
//! semantics hold here too.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use planroom_workflow_types::{
    EntityType, HistoryEntry, InstanceId, ProjectId, Template, TemplateId, UserId,
    WorkflowError, WorkflowInstance, WorkflowResult,
};

use crate::traits::WorkflowStore;

/// In-memory workflow store
#[derive(Default)]
pub struct InMemoryWorkflowStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    templates: HashMap<TemplateId, Template>,
    instances: HashMap<InstanceId, WorkflowInstance>,
    history: Vec<HistoryEntry>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> WorkflowResult<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| WorkflowError::Storage("workflow store lock poisoned".into()))
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn save_template(&self, template: &Template) -> WorkflowResult<()> {
        let mut inner = self.lock()?;
        inner.templates.insert(template.id.clone(), template.clone());
        Ok(())
    }

    async fn load_templates(&self) -> WorkflowResult<Vec<Template>> {
        let inner = self.lock()?;
        Ok(inner.templates.values().cloned().collect())
    }

    async fn insert_instance(
        &self,
        instance: &WorkflowInstance,
        history: &[HistoryEntry],
    ) -> WorkflowResult<()> {
        let mut inner = self.lock()?;
        let duplicate = instance.is_active()
            && inner.instances.values().any(|existing| {
                existing.is_active()
                    && existing.entity_type == instance.entity_type
                    && existing.entity_id == instance.entity_id
            });
        if duplicate {
            return Err(WorkflowError::ActiveInstanceExists {
                entity_type: instance.entity_type.clone(),
                entity_id: instance.entity_id.clone(),
            });
        }
        inner.instances.insert(instance.id.clone(), instance.clone());
        inner.history.extend(history.iter().cloned());
        Ok(())
    }

    async fn update_instance(
        &self,
        instance: &WorkflowInstance,
        expected_version: i64,
        history: &[HistoryEntry],
    ) -> WorkflowResult<()> {
        let mut inner = self.lock()?;
        let stored = inner
            .instances
            .get_mut(&instance.id)
            .ok_or_else(|| WorkflowError::InstanceNotFound(instance.id.clone()))?;
        if stored.version != expected_version {
            return Err(WorkflowError::VersionConflict {
                instance: instance.id.clone(),
                expected: expected_version,
            });
        }
        *stored = instance.clone();
        inner.history.extend(history.iter().cloned());
        Ok(())
    }

    async fn instance(&self, id: &InstanceId) -> WorkflowResult<Option<WorkflowInstance>> {
        let inner = self.lock()?;
        Ok(inner.instances.get(id).cloned())
    }

    async fn instance_for_entity(
        &self,
        entity_type: &EntityType,
        entity_id: &str,
    ) -> WorkflowResult<Option<WorkflowInstance>> {
        let inner = self.lock()?;
        let mut matches: Vec<&WorkflowInstance> = inner
            .instances
            .values()
            .filter(|i| &i.entity_type == entity_type && i.entity_id == entity_id)
            .collect();

        if let Some(active) = matches.iter().find(|i| i.is_active()) {
            return Ok(Some((*active).clone()));
        }
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matches.first().map(|i| (*i).clone()))
    }

    async fn history(&self, instance_id: &InstanceId) -> WorkflowResult<Vec<HistoryEntry>> {
        let inner = self.lock()?;
        // insertion order doubles as chronological order
        Ok(inner
            .history
            .iter()
            .filter(|e| &e.instance_id == instance_id)
            .cloned()
            .collect())
    }

    async fn assigned_to(&self, user: &UserId) -> WorkflowResult<Vec<WorkflowInstance>> {
        let inner = self.lock()?;
        let mut tasks: Vec<WorkflowInstance> = inner
            .instances
            .values()
            .filter(|i| i.is_active() && i.assignee_id.as_ref() == Some(user))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }

    async fn for_project(&self, project: &ProjectId) -> WorkflowResult<Vec<WorkflowInstance>> {
        let inner = self.lock()?;
        let mut instances: Vec<WorkflowInstance> = inner
            .instances
            .values()
            .filter(|i| &i.project_id == project)
            .cloned()
            .collect();
        instances.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(instances)
    }
}
