//! Workflow templates: the blueprint for a business process
//!
//! A Template is a directed graph over one entity type: stages are the
//! states a process can rest in, transitions are the named actions that
//! move it between stages. Templates are immutable once instances
//! reference them; to change a process, register a new template.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::{EntityType, Guard, RoleId, WorkflowError, WorkflowResult};

/// Action names the engine writes into history itself; templates may not
/// declare transitions under these names.
pub const RESERVED_ACTIONS: [&str; 2] = ["start", "cancel"];

// ── Identifiers ──────────────────────────────────────────────────────

/// Unique identifier for a workflow template
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateId(pub String);

impl TemplateId {
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

impl std::fmt::Display for TemplateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a stage within a template
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageId(pub String);

impl StageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Template ─────────────────────────────────────────────────────────

/// A named process definition bound to one entity type
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Template {
    /// Unique identifier
    pub id: TemplateId,
    /// Human-readable name (e.g. "Submittal Review")
    pub name: String,
    /// The entity type this process governs (e.g. "submittal")
    pub entity_type: EntityType,
    /// The stages of the process, in authoring order
    pub stages: Vec<Stage>,
    /// The named transitions between stages
    pub transitions: Vec<Transition>,
    /// When this template was created
    pub created_at: DateTime<Utc>,
}

impl Template {
    /// Create a new, empty template
    pub fn new(name: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            id: TemplateId::generate(),
            name: name.into(),
            entity_type,
            stages: Vec::new(),
            transitions: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: TemplateId) -> Self {
        self.id = id;
        self
    }

    /// Add a stage to the template
    pub fn add_stage(&mut self, stage: Stage) -> WorkflowResult<()> {
        if self.stages.iter().any(|s| s.id == stage.id) {
            return Err(WorkflowError::DuplicateStage(stage.id));
        }
        self.stages.push(stage);
        Ok(())
    }

    /// Add a transition to the template
    ///
    /// Both endpoints must already exist, and the action name must be
    /// unique among transitions leaving the same stage.
    pub fn add_transition(&mut self, transition: Transition) -> WorkflowResult<()> {
        if RESERVED_ACTIONS.contains(&transition.action.as_str()) {
            return Err(WorkflowError::ReservedAction(transition.action));
        }
        if self.stage(&transition.from).is_none() {
            return Err(WorkflowError::StageNotFound(transition.from));
        }
        if self.stage(&transition.to).is_none() {
            return Err(WorkflowError::StageNotFound(transition.to));
        }
        if self
            .transitions
            .iter()
            .any(|t| t.from == transition.from && t.action == transition.action)
        {
            return Err(WorkflowError::DuplicateTransition {
                from: transition.from,
                action: transition.action,
            });
        }
        self.transitions.push(transition);
        Ok(())
    }

    /// Get a stage by id
    pub fn stage(&self, id: &StageId) -> Option<&Stage> {
        self.stages.iter().find(|s| &s.id == id)
    }

    /// The unique initial stage, if one has been declared
    pub fn initial_stage(&self) -> Option<&Stage> {
        self.stages.iter().find(|s| s.is_initial)
    }

    /// All terminal stages
    pub fn terminal_stages(&self) -> Vec<&Stage> {
        self.stages.iter().filter(|s| s.is_terminal).collect()
    }

    /// All transitions leaving a stage
    pub fn transitions_from(&self, stage: &StageId) -> Vec<&Transition> {
        self.transitions.iter().filter(|t| &t.from == stage).collect()
    }

    /// Look up the transition for a named action out of a stage
    pub fn transition_for(&self, stage: &StageId, action: &str) -> Option<&Transition> {
        self.transitions
            .iter()
            .find(|t| &t.from == stage && t.action == action)
    }

    /// Automatic transitions leaving a stage
    pub fn automatic_transitions_from(&self, stage: &StageId) -> Vec<&Transition> {
        self.transitions
            .iter()
            .filter(|t| &t.from == stage && t.automatic)
            .collect()
    }

    /// Total number of stages
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Validate the template for structural correctness
    pub fn validate(&self) -> WorkflowResult<()> {
        if self.stages.is_empty() {
            return Err(WorkflowError::Validation(
                "template must have at least one stage".into(),
            ));
        }

        let initial_count = self.stages.iter().filter(|s| s.is_initial).count();
        if initial_count != 1 {
            return Err(WorkflowError::Validation(format!(
                "template must have exactly one initial stage, found {initial_count}"
            )));
        }

        if self.terminal_stages().is_empty() {
            return Err(WorkflowError::Validation(
                "template must have at least one terminal stage".into(),
            ));
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !seen.insert(&stage.id) {
                return Err(WorkflowError::DuplicateStage(stage.id.clone()));
            }
        }

        for transition in &self.transitions {
            if self.stage(&transition.from).is_none() {
                return Err(WorkflowError::StageNotFound(transition.from.clone()));
            }
            if self.stage(&transition.to).is_none() {
                return Err(WorkflowError::StageNotFound(transition.to.clone()));
            }
        }

        // Every stage must be reachable from the initial stage
        if let Some(initial) = self.initial_stage() {
            let reachable = self.reachable_from(&initial.id);
            if self.stages.iter().any(|s| !reachable.contains(&s.id)) {
                return Err(WorkflowError::DisconnectedGraph(self.id.clone()));
            }
        }

        Ok(())
    }

    /// All stages reachable from a given stage
    fn reachable_from(&self, start: &StageId) -> HashSet<StageId> {
        let mut visited = HashSet::new();
        let mut queue = vec![start.clone()];

        while let Some(current) = queue.pop() {
            if visited.insert(current.clone()) {
                for transition in self.transitions_from(&current) {
                    if !visited.contains(&transition.to) {
                        queue.push(transition.to.clone());
                    }
                }
            }
        }

        visited
    }
}

// ── Stage ────────────────────────────────────────────────────────────

/// A state within a template
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Stage {
    /// Unique identifier within the template
    pub id: StageId,
    /// Human-readable name (e.g. "Under Review")
    pub name: String,
    /// Whether instances start here (exactly one per template)
    pub is_initial: bool,
    /// Whether entering this stage completes the process
    pub is_terminal: bool,
    /// The project role responsible for work in this stage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_role: Option<RoleId>,
    /// Advisory turnaround for external reminder systems. The engine
    /// never expires or escalates a stalled instance itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_secs: Option<u64>,
}

impl Stage {
    /// Create a plain stage
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: StageId::new(id),
            name: name.into(),
            is_initial: false,
            is_terminal: false,
            assignee_role: None,
            due_secs: None,
        }
    }

    /// Create the initial stage
    pub fn initial(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            is_initial: true,
            ..Self::new(id, name)
        }
    }

    /// Create a terminal stage
    pub fn terminal(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            is_terminal: true,
            ..Self::new(id, name)
        }
    }

    pub fn with_assignee_role(mut self, role: RoleId) -> Self {
        self.assignee_role = Some(role);
        self
    }

    pub fn with_due_secs(mut self, secs: u64) -> Self {
        self.due_secs = Some(secs);
        self
    }
}

// ── Transition ───────────────────────────────────────────────────────

/// A named, directed edge between two stages
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transition {
    /// Source stage
    pub from: StageId,
    /// Target stage
    pub to: StageId,
    /// The action name callers use to take this edge
    pub action: String,
    /// Whether the engine applies this edge itself, without a human actor
    pub automatic: bool,
    /// Predicate over the instance context gating this edge
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guard: Option<Guard>,
}

impl Transition {
    /// Create a manual transition
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            from: StageId::new(from),
            to: StageId::new(to),
            action: action.into(),
            automatic: false,
            guard: None,
        }
    }

    /// Mark this transition as system-applied
    pub fn automatic(mut self) -> Self {
        self.automatic = true;
        self
    }

    pub fn with_guard(mut self, guard: Guard) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Whether this transition may fire for the given instance context
    pub fn guard_passes(&self, context: &std::collections::HashMap<String, String>) -> bool {
        self.guard.as_ref().map(|g| g.evaluate(context)).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_submittal_review() -> Template {
        let mut template = Template::new("Submittal Review", EntityType::new("submittal"));
        template
            .add_stage(Stage::initial("submitted", "Submitted"))
            .unwrap();
        template
            .add_stage(
                Stage::new("under_review", "Under Review")
                    .with_assignee_role(RoleId::new("architect"))
                    .with_due_secs(14 * 86_400),
            )
            .unwrap();
        template
            .add_stage(Stage::terminal("approved", "Approved"))
            .unwrap();
        template
            .add_stage(Stage::terminal("rejected", "Rejected"))
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
            .add_transition(Transition::new("under_review", "rejected", "reject"))
            .unwrap();

        template
    }

    #[test]
    fn test_build_and_validate() {
        let template = make_submittal_review();
        assert!(template.validate().is_ok());
        assert_eq!(template.stage_count(), 4);
        assert_eq!(template.initial_stage().unwrap().id, StageId::new("submitted"));
        assert_eq!(template.terminal_stages().len(), 2);
    }

    #[test]
    fn test_transition_lookup() {
        let template = make_submittal_review();
        let t = template
            .transition_for(&StageId::new("under_review"), "approve")
            .unwrap();
        assert_eq!(t.to, StageId::new("approved"));
        assert!(!t.automatic);

        assert!(template
            .transition_for(&StageId::new("under_review"), "void")
            .is_none());

        let auto = template.automatic_transitions_from(&StageId::new("submitted"));
        assert_eq!(auto.len(), 1);
        assert_eq!(auto[0].action, "submit_for_review");
    }

    #[test]
    fn test_duplicate_stage() {
        let mut template = make_submittal_review();
        let result = template.add_stage(Stage::new("approved", "Approved Again"));
        assert!(matches!(result, Err(WorkflowError::DuplicateStage(_))));
    }

    #[test]
    fn test_duplicate_transition() {
        let mut template = make_submittal_review();
        let result =
            template.add_transition(Transition::new("under_review", "rejected", "approve"));
        assert!(matches!(
            result,
            Err(WorkflowError::DuplicateTransition { .. })
        ));
    }

    #[test]
    fn test_transition_to_unknown_stage() {
        let mut template = make_submittal_review();
        let result = template.add_transition(Transition::new("under_review", "archived", "file"));
        assert!(matches!(result, Err(WorkflowError::StageNotFound(_))));
    }

    #[test]
    fn test_reserved_action_names() {
        let mut template = make_submittal_review();
        for reserved in RESERVED_ACTIONS {
            let result =
                template.add_transition(Transition::new("under_review", "approved", reserved));
            assert!(matches!(result, Err(WorkflowError::ReservedAction(_))));
        }
    }

    #[test]
    fn test_validate_requires_one_initial() {
        let mut template = Template::new("Bad", EntityType::new("rfi"));
        template.add_stage(Stage::new("open", "Open")).unwrap();
        template
            .add_stage(Stage::terminal("closed", "Closed"))
            .unwrap();
        assert!(matches!(
            template.validate(),
            Err(WorkflowError::Validation(_))
        ));

        let mut two_initials = Template::new("Bad", EntityType::new("rfi"));
        two_initials
            .add_stage(Stage::initial("a", "A"))
            .unwrap();
        two_initials
            .add_stage(Stage::initial("b", "B"))
            .unwrap();
        assert!(matches!(
            two_initials.validate(),
            Err(WorkflowError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_requires_terminal() {
        let mut template = Template::new("Bad", EntityType::new("rfi"));
        template.add_stage(Stage::initial("open", "Open")).unwrap();
        assert!(matches!(
            template.validate(),
            Err(WorkflowError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_disconnected() {
        let mut template = make_submittal_review();
        // island stage nothing points at
        template
            .add_stage(Stage::new("island", "Island"))
            .unwrap();
        assert!(matches!(
            template.validate(),
            Err(WorkflowError::DisconnectedGraph(_))
        ));
    }

    #[test]
    fn test_guard_passes_without_guard() {
        let transition = Transition::new("a", "b", "go");
        assert!(transition.guard_passes(&std::collections::HashMap::new()));
    }

    #[test]
    fn test_template_id() {
        let id = TemplateId::generate();
        assert!(!id.0.is_empty());
        assert!(id.short().len() <= 8);

        let named = TemplateId::new("submittal-review-v1");
        assert_eq!(format!("{named}"), "submittal-review-v1");
    }
}
