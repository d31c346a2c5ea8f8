//! Error types for the workflow layer

use crate::{EntityType, InstanceId, InstanceStatus, StageId, TemplateId};

/// Errors that can occur in workflow operations
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("no workflow template registered for entity type '{0}'")]
    TemplateNotFound(EntityType),

    #[error("workflow template not found: {0}")]
    UnknownTemplate(TemplateId),

    #[error("workflow instance not found: {0}")]
    InstanceNotFound(InstanceId),

    #[error("stage not found: {0}")]
    StageNotFound(StageId),

    #[error("no transition named '{action}' out of stage {stage}")]
    NoSuchTransition { stage: StageId, action: String },

    #[error("an active workflow already exists for {entity_type} '{entity_id}'")]
    ActiveInstanceExists {
        entity_type: EntityType,
        entity_id: String,
    },

    #[error("concurrent update on instance {instance}: version {expected} is stale")]
    VersionConflict { instance: InstanceId, expected: i64 },

    #[error("instance {instance} is {status}; only active instances can advance")]
    NotActive {
        instance: InstanceId,
        status: InstanceStatus,
    },

    #[error("automatic transitions exceeded {limit} hops in template {template}")]
    AutomaticCycle { template: TemplateId, limit: usize },

    #[error("invalid guard expression: {0}")]
    InvalidGuard(String),

    #[error("duplicate stage id: {0}")]
    DuplicateStage(StageId),

    #[error("duplicate transition '{action}' out of stage {from}")]
    DuplicateTransition { from: StageId, action: String },

    #[error("'{0}' is a reserved action name")]
    ReservedAction(String),

    #[error("template validation error: {0}")]
    Validation(String),

    #[error("unreachable stages in template {0}")]
    DisconnectedGraph(TemplateId),

    #[error("corrupt history: {0}")]
    CorruptHistory(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl WorkflowError {
    /// True for failures caused by a concurrent writer winning the race.
    /// Callers may retry these after re-reading.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::ActiveInstanceExists { .. } | Self::VersionConflict { .. }
        )
    }

    /// True when the referenced template, instance, or stage does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::TemplateNotFound(_)
                | Self::UnknownTemplate(_)
                | Self::InstanceNotFound(_)
                | Self::StageNotFound(_)
        )
    }
}

/// Result type alias for workflow operations
pub type WorkflowResult<T> = Result<T, WorkflowError>;
