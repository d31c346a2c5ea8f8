//! Display-ready projections of instances and history
//!
//! The state machine core works in ids; these views carry the names a
//! task list or dashboard renders. Hydration (joining template, stage,
//! and user names onto the raw records) happens at read time in the
//! engine's projection layer, never inside the core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{EntityType, InstanceId, InstanceStatus, ProjectId, UserId};

/// A hydrated instance, ready for display
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstanceView {
    pub id: InstanceId,
    pub template_name: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub project_id: ProjectId,
    /// Name of the stage the process sits in (or ended on)
    pub current_stage_name: String,
    pub status: InstanceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A hydrated history entry, ready for display
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryView {
    /// The action name, or "start"/"cancel"
    pub action: String,
    /// None for engine-applied automatic hops
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_stage_name: Option<String>,
    pub to_stage_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}
