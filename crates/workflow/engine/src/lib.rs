//! Workflow Lifecycle Engine for Planroom
//!
//! Drives multi-stage construction business processes (submittal
//! review, drawing distribution, ASI incorporation, punch-list signoff)
//! for arbitrary entity types through a single template-driven state
//! machine.
//!
//! # Key Principle
//!
//! **The engine coordinates, it never executes business actions.**
//!
//! Entity-owning modules call [`WorkflowEngine::start`] and
//! [`WorkflowEngine::transition`] after their own authorization checks;
//! the engine advances state, resolves the next assignee, appends the
//! audit trail, and returns a display-ready view. Notification delivery
//! and rendering belong to the callers.
//!
//! # Architecture
//!
//! - [`TemplateRegistry`]: validated process definitions, loaded once
//!   and shared read-only
//! - [`AssignmentResolver`] / [`MembershipDirectory`]: maps a stage to
//!   the responsible user via project-role lookup
//! - [`WorkflowEngine`]: start / transition / cancel with the
//!   automatic-transition cascade, plus the read-time view projection
//!
//! Persistence is injected as a
//! [`WorkflowStore`](planroom_workflow_store::WorkflowStore) handle;
//! every operation commits as one atomic unit, and concurrent writers
//! are serialized by optimistic versioning. The loser gets a conflict
//! it may retry.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use planroom_workflow_engine::{InMemoryDirectory, TemplateRegistry, WorkflowEngine};
//! use planroom_workflow_store::InMemoryWorkflowStore;
//! use planroom_workflow_types::{EntityType, ProjectId, Stage, Template, Transition, UserId};
//!
//! # async fn example() -> planroom_workflow_types::WorkflowResult<()> {
//! let mut template = Template::new("Submittal Review", EntityType::new("submittal"));
//! template.add_stage(Stage::initial("submitted", "Submitted"))?;
//! template.add_stage(Stage::terminal("approved", "Approved"))?;
//! template.add_transition(Transition::new("submitted", "approved", "approve"))?;
//!
//! let engine = WorkflowEngine::new(
//!     Arc::new(TemplateRegistry::new(vec![template])?),
//!     Arc::new(InMemoryWorkflowStore::new()),
//!     Arc::new(InMemoryDirectory::new()),
//! );
//!
//! let view = engine
//!     .start(&EntityType::new("submittal"), "42", &ProjectId::new("proj-a"), &UserId::new("u-1"))
//!     .await?;
//! assert_eq!(view.current_stage_name, "Submitted");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

mod assignment;
mod engine;
mod projection;
mod registry;

pub use assignment::{AssignmentResolver, InMemoryDirectory, MembershipDirectory, ProjectMember};
pub use engine::WorkflowEngine;
pub use registry::TemplateRegistry;
