//! Storage trait definition
//!
//! The engine never opens its own transactions: each mutating call below
//! takes the full post-operation state plus the history batch, and the
//! backend commits them as one atomic unit. A rejected call leaves
//! durable state untouched.

use async_trait::async_trait;
use planroom_workflow_types::{
    EntityType, HistoryEntry, InstanceId, ProjectId, Template, UserId, WorkflowInstance,
    WorkflowResult,
};

/// Persistence boundary for templates, instances, and history
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Persist a template (stages and transitions included). Replaces
    /// any previously stored version under the same id; configuration
    /// time only, never called while instances are mid-flight.
    async fn save_template(&self, template: &Template) -> WorkflowResult<()>;

    /// Load every stored template
    async fn load_templates(&self) -> WorkflowResult<Vec<Template>>;

    /// Atomically create an instance and its opening history entries.
    ///
    /// Fails `ActiveInstanceExists` when an active instance is already
    /// bound to the same `(entity_type, entity_id)`, enforced by the
    /// backend's own uniqueness constraint so two racing starts cannot
    /// both land.
    async fn insert_instance(
        &self,
        instance: &WorkflowInstance,
        history: &[HistoryEntry],
    ) -> WorkflowResult<()>;

    /// Atomically replace an instance's row and append history entries,
    /// conditional on `expected_version` still being the stored version.
    ///
    /// Fails `VersionConflict` when a concurrent writer advanced the
    /// instance first (no history is appended), and `InstanceNotFound`
    /// when the instance does not exist.
    async fn update_instance(
        &self,
        instance: &WorkflowInstance,
        expected_version: i64,
        history: &[HistoryEntry],
    ) -> WorkflowResult<()>;

    /// Fetch an instance by id
    async fn instance(&self, id: &InstanceId) -> WorkflowResult<Option<WorkflowInstance>>;

    /// Fetch the instance bound to an entity: the active one if any,
    /// otherwise the most recently created terminal one
    async fn instance_for_entity(
        &self,
        entity_type: &EntityType,
        entity_id: &str,
    ) -> WorkflowResult<Option<WorkflowInstance>>;

    /// All history entries for an instance, oldest first
    async fn history(&self, instance_id: &InstanceId) -> WorkflowResult<Vec<HistoryEntry>>;

    /// Active instances currently assigned to a user, across projects
    async fn assigned_to(&self, user: &UserId) -> WorkflowResult<Vec<WorkflowInstance>>;

    /// Every instance in a project, any status
    async fn for_project(&self, project: &ProjectId) -> WorkflowResult<Vec<WorkflowInstance>>;

    /// Check whether an entity currently has an active instance
    async fn has_active_instance(
        &self,
        entity_type: &EntityType,
        entity_id: &str,
    ) -> WorkflowResult<bool> {
        Ok(self
            .instance_for_entity(entity_type, entity_id)
            .await?
            .map(|i| i.is_active())
            .unwrap_or(false))
    }
}
