//! Approval Workflow Domain Types
//!
//! An approval workflow is an ordered list of human steps selected for a
//! business event (a leave request, a customs declaration, a sales quote)
//! by a trigger condition. Each submitted entity gets one instance, and the
//! instance walks its steps one at a time until an outcome rule terminates it.
//!
//! # Key Concepts
//!
//! - **WorkflowDefinition**: tenant-scoped, versioned blueprint with a trigger
//!   condition, a priority, and ordered step definitions.
//! - **WorkflowInstance**: one execution per submitted entity.
//! - **WorkflowStepInstance**: one activation of a step definition. At most
//!   one is ACTIVE per instance.
//! - **WorkflowTask**: the unit of work shown to a human, with claim semantics
//!   for pool assignments.
//! - **HistoryEvent**: append-only audit record, totally ordered per instance
//!   by a monotonic sequence number.
//! - **WorkflowVariable**: instance- or step-scoped key/value data.

#![deny(unsafe_code)]

mod completion;
mod definition;
mod errors;
mod escalation;
mod history;
mod ids;
mod instance;
mod notification;
mod retry;
mod task;
mod variable;

pub use completion::*;
pub use definition::*;
pub use errors::*;
pub use escalation::*;
pub use history::*;
pub use ids::*;
pub use instance::*;
pub use notification::*;
pub use retry::*;
pub use task::*;
pub use variable::*;
