//! Workflow lifecycle engine: start, transition, cancel
//!
//! The engine coordinates, it never executes business actions itself.
//! Each operation resolves the template, computes the complete outcome
//! in memory (the manual step plus every automatic hop, with one
//! history entry per step), and commits through a single store call.
//! Either the whole chain lands or nothing does; a concurrent writer
//! surfaces as a conflict the caller may retry.

use std::collections::HashMap;
use std::sync::Arc;

use planroom_workflow_store::WorkflowStore;
use planroom_workflow_types::{
    EntityType, HistoryEntry, InstanceId, InstanceView, ProjectId, Template, UserId,
    WorkflowError, WorkflowInstance, WorkflowResult,
};

use crate::{AssignmentResolver, MembershipDirectory, TemplateRegistry};

/// The workflow lifecycle engine
#[derive(Clone)]
pub struct WorkflowEngine {
    pub(crate) registry: Arc<TemplateRegistry>,
    pub(crate) store: Arc<dyn WorkflowStore>,
    pub(crate) directory: Arc<dyn MembershipDirectory>,
    pub(crate) resolver: AssignmentResolver,
}

impl WorkflowEngine {
    pub fn new(
        registry: Arc<TemplateRegistry>,
        store: Arc<dyn WorkflowStore>,
        directory: Arc<dyn MembershipDirectory>,
    ) -> Self {
        let resolver = AssignmentResolver::new(directory.clone());
        Self {
            registry,
            store,
            directory,
            resolver,
        }
    }

    // ── Start ────────────────────────────────────────────────────────

    /// Start the process for an entity
    ///
    /// Creates an instance at the template's initial stage, applies any
    /// automatic transitions, and commits instance plus history
    /// atomically. Fails with `ActiveInstanceExists` when the entity
    /// already has an active instance; the store's uniqueness
    /// constraint closes the race between two concurrent starts.
    pub async fn start(
        &self,
        entity_type: &EntityType,
        entity_id: &str,
        project_id: &ProjectId,
        actor: &UserId,
    ) -> WorkflowResult<InstanceView> {
        self.start_with_context(entity_type, entity_id, project_id, actor, HashMap::new())
            .await
    }

    /// Start the process for an entity with caller-supplied context
    /// parameters; guards on automatic transitions evaluate against them
    pub async fn start_with_context(
        &self,
        entity_type: &EntityType,
        entity_id: &str,
        project_id: &ProjectId,
        actor: &UserId,
        context: HashMap<String, String>,
    ) -> WorkflowResult<InstanceView> {
        let template = self.registry.resolve(entity_type)?;
        let initial = template.initial_stage().ok_or_else(|| {
            WorkflowError::Validation(format!("template {} has no initial stage", template.id))
        })?;

        let mut instance = WorkflowInstance::new(
            template.id.clone(),
            entity_type.clone(),
            entity_id,
            project_id.clone(),
            initial.id.clone(),
        )
        .with_context(context);
        instance.assignee_id = self.resolver.resolve(initial, &instance).await?;

        let mut entries = vec![HistoryEntry::started(
            instance.id.clone(),
            initial.id.clone(),
            actor.clone(),
        )];
        self.run_cascade(&template, &mut instance, &mut entries)
            .await?;

        self.store.insert_instance(&instance, &entries).await?;

        tracing::info!(
            instance_id = %instance.id,
            template_id = %template.id,
            entity_type = %entity_type,
            entity_id,
            "workflow started"
        );
        self.hydrate(&instance).await
    }

    // ── Transition ───────────────────────────────────────────────────

    /// Apply a named action to an instance
    ///
    /// Looks the action up in the template's transition table for the
    /// instance's current stage, advances, re-resolves the assignee,
    /// applies any automatic follow-on transitions, and commits the
    /// whole chain conditionally on the version the instance was read
    /// at. A concurrent writer winning the race surfaces as
    /// `VersionConflict`.
    pub async fn transition(
        &self,
        instance_id: &InstanceId,
        action: &str,
        actor: &UserId,
        comment: Option<&str>,
    ) -> WorkflowResult<InstanceView> {
        let mut instance = self
            .store
            .instance(instance_id)
            .await?
            .ok_or_else(|| WorkflowError::InstanceNotFound(instance_id.clone()))?;
        if !instance.is_active() {
            return Err(WorkflowError::NotActive {
                instance: instance.id,
                status: instance.status,
            });
        }

        let template = self.registry.get(&instance.template_id)?;
        let expected_version = instance.version;

        let transition = template
            .transition_for(&instance.current_stage_id, action)
            .ok_or_else(|| WorkflowError::NoSuchTransition {
                stage: instance.current_stage_id.clone(),
                action: action.to_string(),
            })?;
        let from = instance.current_stage_id.clone();
        let target = template
            .stage(&transition.to)
            .ok_or_else(|| WorkflowError::StageNotFound(transition.to.clone()))?;

        instance.advance_to(target);
        if instance.is_active() {
            instance.assignee_id = self.resolver.resolve(target, &instance).await?;
        }

        let mut entries = vec![HistoryEntry::applied(
            instance.id.clone(),
            action,
            from,
            target.id.clone(),
            Some(actor.clone()),
            comment.map(str::to_string),
        )];
        self.run_cascade(&template, &mut instance, &mut entries)
            .await?;

        self.store
            .update_instance(&instance, expected_version, &entries)
            .await?;

        tracing::info!(
            instance_id = %instance.id,
            action,
            actor = %actor,
            stage = %instance.current_stage_id,
            status = %instance.status,
            "workflow transition applied"
        );
        self.hydrate(&instance).await
    }

    // ── Cancel ───────────────────────────────────────────────────────

    /// Administrative force-cancel, bypassing the transition table
    ///
    /// A privileged operation for processes that must be stopped outside
    /// their template's edges (a superseded submittal, a withdrawn
    /// change order). The instance keeps its current stage, loses its
    /// assignee, and the cancellation is audited like any transition.
    pub async fn cancel(
        &self,
        instance_id: &InstanceId,
        actor: &UserId,
        reason: &str,
    ) -> WorkflowResult<InstanceView> {
        let mut instance = self
            .store
            .instance(instance_id)
            .await?
            .ok_or_else(|| WorkflowError::InstanceNotFound(instance_id.clone()))?;
        if !instance.is_active() {
            return Err(WorkflowError::NotActive {
                instance: instance.id,
                status: instance.status,
            });
        }

        let expected_version = instance.version;
        instance.cancel();
        let entry = HistoryEntry::cancelled(
            instance.id.clone(),
            instance.current_stage_id.clone(),
            actor.clone(),
            reason,
        );

        self.store
            .update_instance(&instance, expected_version, &[entry])
            .await?;

        tracing::warn!(
            instance_id = %instance.id,
            actor = %actor,
            reason,
            "workflow force-cancelled"
        );
        self.hydrate(&instance).await
    }

    // ── Automatic-transition cascade ─────────────────────────────────

    /// Apply automatic transitions until the instance parks
    ///
    /// While the instance is active and exactly one automatic transition
    /// out of its stage has a passing guard, apply it as a system step
    /// (no actor) with its own history entry. Zero or several eligible
    /// edges stop the chain. The hop count is bounded by the template's
    /// stage count; exceeding it means the template loops and the whole
    /// enclosing operation is abandoned before anything is written.
    async fn run_cascade(
        &self,
        template: &Template,
        instance: &mut WorkflowInstance,
        entries: &mut Vec<HistoryEntry>,
    ) -> WorkflowResult<usize> {
        let limit = template.stage_count();
        let mut hops = 0;

        while instance.is_active() {
            let eligible: Vec<_> = template
                .automatic_transitions_from(&instance.current_stage_id)
                .into_iter()
                .filter(|t| t.guard_passes(&instance.context))
                .collect();
            let transition = match eligible.as_slice() {
                [only] => *only,
                _ => break,
            };

            hops += 1;
            if hops > limit {
                return Err(WorkflowError::AutomaticCycle {
                    template: template.id.clone(),
                    limit,
                });
            }

            let from = instance.current_stage_id.clone();
            let target = template
                .stage(&transition.to)
                .ok_or_else(|| WorkflowError::StageNotFound(transition.to.clone()))?;
            instance.advance_to(target);
            if instance.is_active() {
                instance.assignee_id = self.resolver.resolve(target, instance).await?;
            }

            entries.push(HistoryEntry::applied(
                instance.id.clone(),
                transition.action.clone(),
                from,
                target.id.clone(),
                None,
                None,
            ));
            tracing::debug!(
                instance_id = %instance.id,
                action = %transition.action,
                stage = %instance.current_stage_id,
                "automatic transition applied"
            );
        }

        Ok(hops)
    }
}
