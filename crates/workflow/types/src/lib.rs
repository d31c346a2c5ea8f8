//! Workflow Domain Types for Planroom
//!
//! Planroom drives multi-stage construction business processes
//! (submittal review, drawing distribution, ASI incorporation,
//! punch-list signoff) through a single template-driven state machine
//! instead of hard-coding each process.
//!
//! # Key Concepts
//!
//! - **Template**: A named process definition for one entity type: a
//!   directed graph of stages and named transitions.
//! - **Stage**: A state a process can rest in. Exactly one stage per
//!   template is initial; terminal stages complete the process.
//! - **Transition**: A named edge between stages. Automatic transitions
//!   are applied by the engine itself, optionally gated by a [`Guard`]
//!   over the instance context.
//! - **WorkflowInstance**: A running or finished execution of a template
//!   bound to one business entity, versioned for optimistic concurrency.
//! - **HistoryEntry**: One append-only audit row per applied transition;
//!   [`replay`] reconstructs an instance's final state from its history.
//! - **InstanceView / HistoryView**: Display-ready projections hydrated
//!   at read time.
//!
//! # Design Principles
//!
//! 1. One data-driven model generalizes over heterogeneous entity types.
//! 2. Process logic lives in typed template graphs, not string branching.
//! 3. History is append-only and always replayable.
//! 4. The core stays free of presentation concerns.

#![deny(unsafe_code)]

mod errors;
mod guard;
mod history;
mod ids;
mod instance;
mod template;
mod view;

pub use errors::*;
pub use guard::*;
pub use history::*;
pub use ids::*;
pub use instance::*;
pub use template::*;
pub use view::*;
