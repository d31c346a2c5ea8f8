//! Workflow instances: running executions of a template
//!
//! An instance binds one template to one business entity and tracks
//! where that entity currently sits in the process. Instances are never
//! physically deleted; finished processes keep their final stage so
//! dashboards can still show where they ended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{EntityType, ProjectId, Stage, StageId, TemplateId, UserId};

// ── Instance Identifier ──────────────────────────────────────────────

/// Unique identifier for a workflow instance
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Instance Status ──────────────────────────────────────────────────

/// The lifecycle status of a workflow instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    /// The process is running and can be advanced
    #[default]
    Active,
    /// The process reached a terminal stage
    Completed,
    /// The process was cancelled by an administrative action
    Cancelled,
}

impl InstanceStatus {
    /// Check if this status permits no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for InstanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown instance status '{other}'")),
        }
    }
}

// ── Workflow Instance ────────────────────────────────────────────────

/// A running or finished execution of a template, bound to one entity
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// Unique instance identifier
    pub id: InstanceId,
    /// The template this instance runs
    pub template_id: TemplateId,
    /// The kind of entity this process governs
    pub entity_type: EntityType,
    /// The specific entity, scoped by `entity_type`
    pub entity_id: String,
    /// The project the entity belongs to
    pub project_id: ProjectId,
    /// The stage the process currently sits in. Completed and cancelled
    /// instances keep the stage they ended on.
    pub current_stage_id: StageId,
    /// Lifecycle status
    pub status: InstanceStatus,
    /// The user currently responsible for acting, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<UserId>,
    /// Monotonic counter for optimistic concurrency control
    pub version: i64,
    /// Caller-supplied parameters captured at start; guards evaluate
    /// against this map
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
    /// When the instance was created
    pub created_at: DateTime<Utc>,
    /// When the instance was last updated
    pub updated_at: DateTime<Utc>,
}

impl WorkflowInstance {
    /// Create a new active instance at the given initial stage
    pub fn new(
        template_id: TemplateId,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        project_id: ProjectId,
        initial_stage: StageId,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: InstanceId::generate(),
            template_id,
            entity_type,
            entity_id: entity_id.into(),
            project_id,
            current_stage_id: initial_stage,
            status: InstanceStatus::Active,
            assignee_id: None,
            version: 1,
            context: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_context(mut self, context: HashMap<String, String>) -> Self {
        self.context = context;
        self
    }

    /// Check if the instance can still be advanced
    pub fn is_active(&self) -> bool {
        self.status == InstanceStatus::Active
    }

    /// Move to a new stage, completing the process if the stage is
    /// terminal. Bumps the version; the assignee is left for the caller
    /// to resolve against the new stage.
    pub fn advance_to(&mut self, stage: &Stage) {
        self.current_stage_id = stage.id.clone();
        if stage.is_terminal {
            self.status = InstanceStatus::Completed;
            self.assignee_id = None;
        }
        self.version += 1;
        self.updated_at = Utc::now();
    }

    /// Cancel the process in place, keeping the current stage
    pub fn cancel(&mut self) {
        self.status = InstanceStatus::Cancelled;
        self.assignee_id = None;
        self.version += 1;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Stage;

    fn make_instance() -> WorkflowInstance {
        WorkflowInstance::new(
            TemplateId::new("tpl-1"),
            EntityType::new("submittal"),
            "sub-42",
            ProjectId::new("proj-1"),
            StageId::new("submitted"),
        )
    }

    #[test]
    fn test_new_instance() {
        let instance = make_instance();
        assert!(instance.is_active());
        assert_eq!(instance.version, 1);
        assert_eq!(instance.current_stage_id, StageId::new("submitted"));
        assert!(instance.assignee_id.is_none());
    }

    #[test]
    fn test_advance_to_plain_stage() {
        let mut instance = make_instance();
        instance.advance_to(&Stage::new("under_review", "Under Review"));

        assert!(instance.is_active());
        assert_eq!(instance.current_stage_id, StageId::new("under_review"));
        assert_eq!(instance.version, 2);
    }

    #[test]
    fn test_advance_to_terminal_stage_completes() {
        let mut instance = make_instance();
        instance.assignee_id = Some(UserId::new("u-1"));
        instance.advance_to(&Stage::terminal("approved", "Approved"));

        assert_eq!(instance.status, InstanceStatus::Completed);
        assert!(instance.status.is_terminal());
        assert!(instance.assignee_id.is_none());
        // terminal instances keep their final stage
        assert_eq!(instance.current_stage_id, StageId::new("approved"));
    }

    #[test]
    fn test_cancel_keeps_stage() {
        let mut instance = make_instance();
        instance.assignee_id = Some(UserId::new("u-1"));
        instance.cancel();

        assert_eq!(instance.status, InstanceStatus::Cancelled);
        assert_eq!(instance.current_stage_id, StageId::new("submitted"));
        assert!(instance.assignee_id.is_none());
        assert_eq!(instance.version, 2);
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in [
            InstanceStatus::Active,
            InstanceStatus::Completed,
            InstanceStatus::Cancelled,
        ] {
            let parsed: InstanceStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("void".parse::<InstanceStatus>().is_err());
    }

    #[test]
    fn test_context() {
        let mut context = HashMap::new();
        context.insert("discipline".to_string(), "structural".to_string());
        let instance = make_instance().with_context(context);
        assert_eq!(instance.context.get("discipline").unwrap(), "structural");
    }

    #[test]
    fn test_instance_id() {
        let id = InstanceId::generate();
        assert!(!id.0.is_empty());
        assert!(id.short().len() <= 8);
    }
}
