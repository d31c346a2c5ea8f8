//! Read-time view projection
//!
//! The state machine core works in ids; these queries join template,
//! stage, and user names on at read time and never mutate anything.
//! Keeping hydration out of the core means the lifecycle engine stays a
//! pure state machine and display concerns stay here.

use planroom_workflow_types::{
    EntityType, HistoryEntry, HistoryView, InstanceId, InstanceView, ProjectId, StageId,
    Template, UserId, WorkflowError, WorkflowInstance, WorkflowResult,
};

use crate::WorkflowEngine;

impl WorkflowEngine {
    // ── Queries ──────────────────────────────────────────────────────

    /// The workflow bound to an entity: the active instance if one
    /// exists, otherwise the most recently created finished one
    pub async fn workflow_for_entity(
        &self,
        entity_type: &EntityType,
        entity_id: &str,
    ) -> WorkflowResult<Option<InstanceView>> {
        match self
            .store
            .instance_for_entity(entity_type, entity_id)
            .await?
        {
            Some(instance) => Ok(Some(self.hydrate(&instance).await?)),
            None => Ok(None),
        }
    }

    /// The full audit trail of an instance, oldest entry first
    pub async fn workflow_history(
        &self,
        instance_id: &InstanceId,
    ) -> WorkflowResult<Vec<HistoryView>> {
        let instance = self
            .store
            .instance(instance_id)
            .await?
            .ok_or_else(|| WorkflowError::InstanceNotFound(instance_id.clone()))?;
        let template = self.registry.get(&instance.template_id)?;
        let entries = self.store.history(instance_id).await?;

        let mut views = Vec::with_capacity(entries.len());
        for entry in entries {
            views.push(self.hydrate_entry(&template, entry).await?);
        }
        Ok(views)
    }

    /// An actor's personal work queue: every active instance assigned to
    /// them, across all projects
    pub async fn user_tasks(&self, user: &UserId) -> WorkflowResult<Vec<InstanceView>> {
        let instances = self.store.assigned_to(user).await?;
        self.hydrate_all(instances).await
    }

    /// Every instance in a project, any status, for dashboards
    pub async fn project_workflows(
        &self,
        project: &ProjectId,
    ) -> WorkflowResult<Vec<InstanceView>> {
        let instances = self.store.for_project(project).await?;
        self.hydrate_all(instances).await
    }

    // ── Hydration ────────────────────────────────────────────────────

    pub(crate) async fn hydrate(
        &self,
        instance: &WorkflowInstance,
    ) -> WorkflowResult<InstanceView> {
        let template = self.registry.get(&instance.template_id)?;
        let assignee_name = match &instance.assignee_id {
            Some(user) => self.directory.display_name(user).await?,
            None => None,
        };

        Ok(InstanceView {
            id: instance.id.clone(),
            template_name: template.name.clone(),
            entity_type: instance.entity_type.clone(),
            entity_id: instance.entity_id.clone(),
            project_id: instance.project_id.clone(),
            current_stage_name: stage_name(&template, &instance.current_stage_id),
            status: instance.status,
            assignee_id: instance.assignee_id.clone(),
            assignee_name,
            created_at: instance.created_at,
            updated_at: instance.updated_at,
        })
    }

    async fn hydrate_all(
        &self,
        instances: Vec<WorkflowInstance>,
    ) -> WorkflowResult<Vec<InstanceView>> {
        let mut views = Vec::with_capacity(instances.len());
        for instance in &instances {
            views.push(self.hydrate(instance).await?);
        }
        Ok(views)
    }

    async fn hydrate_entry(
        &self,
        template: &Template,
        entry: HistoryEntry,
    ) -> WorkflowResult<HistoryView> {
        let actor_name = match &entry.actor_id {
            Some(user) => self.directory.display_name(user).await?,
            None => None,
        };

        Ok(HistoryView {
            action: entry.action.as_str().to_string(),
            actor_id: entry.actor_id,
            actor_name,
            from_stage_name: entry.from_stage_id.as_ref().map(|s| stage_name(template, s)),
            to_stage_name: stage_name(template, &entry.to_stage_id),
            comment: entry.comment,
            created_at: entry.created_at,
        })
    }
}

/// Falls back to the raw id when a stage has vanished from the template,
/// so old history stays renderable
fn stage_name(template: &Template, id: &StageId) -> String {
    template
        .stage(id)
        .map(|s| s.name.clone())
        .unwrap_or_else(|| id.0.clone())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use planroom_workflow_store::InMemoryWorkflowStore;
    use planroom_workflow_types::{InstanceStatus, RoleId, Stage, Template, Transition};

    use super::*;
    use crate::{InMemoryDirectory, ProjectMember, TemplateRegistry, WorkflowEngine};

    fn submittal_review() -> Template {
        let mut template = Template::new("Submittal Review", EntityType::new("submittal"));
        template
            .add_stage(Stage::initial("submitted", "Submitted"))
            .unwrap();
        template
            .add_stage(
                Stage::new("under_review", "Under Review")
                    .with_assignee_role(RoleId::new("architect")),
            )
            .unwrap();
        template
            .add_stage(Stage::terminal("approved", "Approved"))
            .unwrap();
        template
            .add_transition(
                Transition::new("submitted", "under_review", "submit_for_review").automatic(),
            )
            .unwrap();
        template
            .add_transition(Transition::new("under_review", "approved", "approve"))
            .unwrap();
        template
    }

    fn make_engine() -> WorkflowEngine {
        let store = Arc::new(InMemoryWorkflowStore::new());
        let directory = Arc::new(InMemoryDirectory::new());
        for project in ["proj-a", "proj-b"] {
            directory.add_member(
                ProjectId::new(project),
                ProjectMember::new(
                    UserId::new("arch-1"),
                    RoleId::new("architect"),
                    "Riley Okafor",
                    Utc.with_ymd_and_hms(2021, 3, 1, 8, 0, 0).unwrap(),
                ),
            );
        }
        let registry = Arc::new(TemplateRegistry::new(vec![submittal_review()]).unwrap());
        WorkflowEngine::new(registry, store, directory)
    }

    async fn start(engine: &WorkflowEngine, entity_id: &str, project: &str) -> InstanceView {
        engine
            .start(
                &EntityType::new("submittal"),
                entity_id,
                &ProjectId::new(project),
                &UserId::new("user-x"),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_workflow_for_entity_prefers_active() {
        let engine = make_engine();
        let first = start(&engine, "42", "proj-a").await;
        engine
            .transition(&first.id, "approve", &UserId::new("user-y"), None)
            .await
            .unwrap();
        let second = start(&engine, "42", "proj-a").await;

        let found = engine
            .workflow_for_entity(&EntityType::new("submittal"), "42")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, second.id);
        assert_eq!(found.status, InstanceStatus::Active);
    }

    #[tokio::test]
    async fn test_workflow_for_entity_falls_back_to_terminal() {
        let engine = make_engine();
        let first = start(&engine, "42", "proj-a").await;
        engine
            .transition(&first.id, "approve", &UserId::new("user-y"), None)
            .await
            .unwrap();

        let found = engine
            .workflow_for_entity(&EntityType::new("submittal"), "42")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, first.id);
        assert_eq!(found.status, InstanceStatus::Completed);

        let none = engine
            .workflow_for_entity(&EntityType::new("submittal"), "99")
            .await
            .unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_history_is_hydrated_and_chronological() {
        let engine = make_engine();
        let started = start(&engine, "42", "proj-a").await;
        engine
            .transition(&started.id, "approve", &UserId::new("arch-1"), Some("ok"))
            .await
            .unwrap();

        let history = engine.workflow_history(&started.id).await.unwrap();
        assert_eq!(history.len(), 3);

        assert_eq!(history[0].action, "start");
        assert_eq!(history[0].from_stage_name, None);
        assert_eq!(history[0].to_stage_name, "Submitted");

        // the automatic hop carries no actor
        assert_eq!(history[1].action, "submit_for_review");
        assert_eq!(history[1].actor_id, None);
        assert_eq!(history[1].actor_name, None);
        assert_eq!(history[1].from_stage_name.as_deref(), Some("Submitted"));
        assert_eq!(history[1].to_stage_name, "Under Review");

        assert_eq!(history[2].action, "approve");
        assert_eq!(history[2].actor_name.as_deref(), Some("Riley Okafor"));
        assert_eq!(history[2].comment.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_history_of_missing_instance() {
        let engine = make_engine();
        let result = engine.workflow_history(&InstanceId::new("ghost")).await;
        assert!(matches!(result, Err(WorkflowError::InstanceNotFound(_))));
    }

    #[tokio::test]
    async fn test_user_tasks_span_projects() {
        let engine = make_engine();
        start(&engine, "42", "proj-a").await;
        start(&engine, "43", "proj-b").await;

        // both parked at Under Review, assigned to arch-1
        let tasks = engine.user_tasks(&UserId::new("arch-1")).await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert!(tasks.iter().all(|t| t.current_stage_name == "Under Review"));
        assert!(tasks.iter().all(|t| t.template_name == "Submittal Review"));

        let none = engine.user_tasks(&UserId::new("user-x")).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_project_workflows_include_finished() {
        let engine = make_engine();
        let first = start(&engine, "42", "proj-a").await;
        engine
            .transition(&first.id, "approve", &UserId::new("user-y"), None)
            .await
            .unwrap();
        start(&engine, "43", "proj-a").await;

        let dashboard = engine
            .project_workflows(&ProjectId::new("proj-a"))
            .await
            .unwrap();
        assert_eq!(dashboard.len(), 2);
        assert!(dashboard
            .iter()
            .any(|v| v.status == InstanceStatus::Completed));
        assert!(dashboard.iter().any(|v| v.status == InstanceStatus::Active));

        let empty = engine
            .project_workflows(&ProjectId::new("proj-z"))
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_start_with_context_parameters_survive() {
        let engine = make_engine();
        let mut context = HashMap::new();
        context.insert("spec_section".to_string(), "03 30 00".to_string());

        let view = engine
            .start_with_context(
                &EntityType::new("submittal"),
                "44",
                &ProjectId::new("proj-a"),
                &UserId::new("user-x"),
                context,
            )
            .await
            .unwrap();

        // context rides along on the stored instance
        let stored = engine
            .store
            .instance(&view.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.context.get("spec_section").unwrap(), "03 30 00");
    }
}
