//! Workflow history: the append-only record of every transition
//!
//! Every `start`, `transition`, and `cancel` appends exactly one entry.
//! Entries are never updated or deleted, so the full stage path of an
//! instance can always be reconstructed by replaying its history in
//! creation order. `replay` below does exactly that, verifying the
//! recorded path against the template's edges as it goes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{InstanceId, InstanceStatus, StageId, Template, UserId, WorkflowError, WorkflowResult};

// ── Action Kind ──────────────────────────────────────────────────────

/// What a history entry records: the engine's own `start`/`cancel`
/// markers, or a named action from the template's transition table
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionKind {
    /// Instance creation
    Start,
    /// Administrative force-cancel
    Cancel,
    /// A named transition action (manual or automatic)
    Action(String),
}

impl ActionKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Start => "start",
            Self::Cancel => "cancel",
            Self::Action(name) => name,
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<String> for ActionKind {
    fn from(name: String) -> Self {
        match name.as_str() {
            "start" => Self::Start,
            "cancel" => Self::Cancel,
            _ => Self::Action(name),
        }
    }
}

impl From<ActionKind> for String {
    fn from(kind: ActionKind) -> Self {
        kind.as_str().to_string()
    }
}

// ── History Entry ────────────────────────────────────────────────────

/// One append-only row in an instance's audit trail
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Unique entry identifier
    pub id: String,
    /// The instance this entry belongs to
    pub instance_id: InstanceId,
    /// What happened
    pub action: ActionKind,
    /// Who did it; None for engine-applied automatic hops
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<UserId>,
    /// The stage the instance left; None at start
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_stage_id: Option<StageId>,
    /// The stage the instance landed on
    pub to_stage_id: StageId,
    /// Free-form note from the actor
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// When the entry was recorded
    pub created_at: DateTime<Utc>,
}

impl HistoryEntry {
    /// Entry recorded when an instance is created
    pub fn started(instance_id: InstanceId, to: StageId, actor: UserId) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            instance_id,
            action: ActionKind::Start,
            actor_id: Some(actor),
            from_stage_id: None,
            to_stage_id: to,
            comment: None,
            created_at: Utc::now(),
        }
    }

    /// Entry recorded when a transition is applied. `actor` is None for
    /// automatic hops the engine applies itself.
    pub fn applied(
        instance_id: InstanceId,
        action: impl Into<String>,
        from: StageId,
        to: StageId,
        actor: Option<UserId>,
        comment: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            instance_id,
            action: ActionKind::Action(action.into()),
            actor_id: actor,
            from_stage_id: Some(from),
            to_stage_id: to,
            comment,
            created_at: Utc::now(),
        }
    }

    /// Entry recorded on administrative force-cancel. The stage does not
    /// change; `from` and `to` both record where the process stopped.
    pub fn cancelled(
        instance_id: InstanceId,
        stage: StageId,
        actor: UserId,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            instance_id,
            action: ActionKind::Cancel,
            actor_id: Some(actor),
            from_stage_id: Some(stage.clone()),
            to_stage_id: stage,
            comment: Some(reason.into()),
            created_at: Utc::now(),
        }
    }

    /// Whether the engine applied this entry itself
    pub fn is_automatic(&self) -> bool {
        matches!(self.action, ActionKind::Action(_)) && self.actor_id.is_none()
    }
}

// ── Replay ───────────────────────────────────────────────────────────

/// The state reconstructed by replaying an instance's history
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplayOutcome {
    pub current_stage_id: StageId,
    pub status: InstanceStatus,
}

/// Replay a history sequence against its template, reproducing the
/// instance's final stage and status.
///
/// Verifies the audit-trail invariants along the way: the sequence opens
/// with `start` at the template's initial stage, each entry leaves the
/// stage the previous one landed on, every named action matches a
/// template edge, and nothing follows a terminal state.
pub fn replay(template: &Template, entries: &[HistoryEntry]) -> WorkflowResult<ReplayOutcome> {
    let mut iter = entries.iter();
    let first = iter
        .next()
        .ok_or_else(|| WorkflowError::CorruptHistory("empty history".into()))?;

    if first.action != ActionKind::Start || first.from_stage_id.is_some() {
        return Err(WorkflowError::CorruptHistory(
            "history must open with a start entry".into(),
        ));
    }
    let initial = template
        .initial_stage()
        .ok_or_else(|| WorkflowError::Validation("template has no initial stage".into()))?;
    if first.to_stage_id != initial.id {
        return Err(WorkflowError::CorruptHistory(format!(
            "start entry landed on {} but the template starts at {}",
            first.to_stage_id, initial.id
        )));
    }

    let mut current = first.to_stage_id.clone();
    let mut status = InstanceStatus::Active;

    for entry in iter {
        if status.is_terminal() {
            return Err(WorkflowError::CorruptHistory(format!(
                "entry '{}' follows a terminal state",
                entry.action
            )));
        }
        if entry.from_stage_id.as_ref() != Some(&current) {
            return Err(WorkflowError::CorruptHistory(format!(
                "entry '{}' leaves {:?} but the instance was at {}",
                entry.action, entry.from_stage_id, current
            )));
        }

        match &entry.action {
            ActionKind::Start => {
                return Err(WorkflowError::CorruptHistory(
                    "start entry after the first".into(),
                ));
            }
            ActionKind::Cancel => {
                if entry.to_stage_id != current {
                    return Err(WorkflowError::CorruptHistory(
                        "cancel entry must not change stage".into(),
                    ));
                }
                status = InstanceStatus::Cancelled;
            }
            ActionKind::Action(name) => {
                let transition = template.transition_for(&current, name).ok_or_else(|| {
                    WorkflowError::CorruptHistory(format!(
                        "no transition '{name}' out of stage {current} in the template"
                    ))
                })?;
                if transition.to != entry.to_stage_id {
                    return Err(WorkflowError::CorruptHistory(format!(
                        "entry '{name}' landed on {} but the template edge targets {}",
                        entry.to_stage_id, transition.to
                    )));
                }
                current = entry.to_stage_id.clone();
                let stage = template
                    .stage(&current)
                    .ok_or_else(|| WorkflowError::StageNotFound(current.clone()))?;
                if stage.is_terminal {
                    status = InstanceStatus::Completed;
                }
            }
        }
    }

    Ok(ReplayOutcome {
        current_stage_id: current,
        status,
    })
}
