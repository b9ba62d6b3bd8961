//! Embedded approval workflow engine
//!
//! The engine selects a published [`WorkflowDefinition`](approval_types::WorkflowDefinition)
//! for a submitted business entity, walks its steps one at a time, and
//! tells the owning module how the approval ended.
//!
//! # Architecture
//!
//! ```text
//!   submit / act / claim / delegate / cancel / suspend / resume
//!                           │
//!                    ┌──────▼───────┐      ┌─────────────────────┐
//!                    │WorkflowEngine│─────►│ DefinitionRegistry  │
//!                    └──────┬───────┘      └─────────────────────┘
//!                           │ one unit of work per instance
//!                    ┌──────▼───────┐
//!                    │InstanceStore │  state + history commit together
//!                    └──────┬───────┘
//!              effects released after commit
//!          ┌────────────────┼─────────────────┐
//!   ┌──────▼───────┐ ┌──────▼───────┐ ┌───────▼────────┐
//!   │ Notification │ │  Completion  │ │ queued instance│
//!   │  dispatcher  │ │  callbacks   │ │     start      │
//!   └──────────────┘ └──────────────┘ └────────────────┘
//! ```
//!
//! Time-driven work (the escalation sweep, notification delivery and
//! callback retries) runs in [`Workers`], never inside a caller's
//! request.

#![deny(unsafe_code)]

pub mod assignment;
pub mod callbacks;
pub mod clock;
pub mod config;
pub mod directory;
pub mod engine;
pub mod escalation;
pub mod lifecycle;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod workers;

pub use assignment::Authority;
pub use callbacks::{
    CallbackError, CallbackInvoker, CallbackRecord, CallbackReport, CallbackStatus,
    CompletionHandler, DEFAULT_CALLBACK_RETENTION,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, ResubmissionPolicy};
pub use directory::{ActorDirectory, StaticDirectory, TenantDirectory};
pub use engine::{ActRequest, InstanceView, OpenTask, WorkflowEngine};
pub use escalation::SweepReport;
pub use registry::{DefinitionRegistry, PublishedDefinition};
pub use store::{EntityKey, InstanceRecord, InstanceStore};
pub use workers::{WorkerReport, Workers};
