//! Shared fixtures for engine integration tests

#![allow(dead_code)]

use approval_engine::{
    CallbackError, CompletionHandler, EngineConfig, ManualClock, StaticDirectory, WorkflowEngine,
};
use approval_types::{
    ActorId, CompletionEvent, EntityType, StepInstanceId, SubmitRequest, TenantId,
    WorkflowInstanceId,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

pub const TENANT: &str = "acme";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

pub fn actor(id: &str) -> ActorId {
    ActorId::new(id)
}

pub fn tenant() -> TenantId {
    TenantId::new(TENANT)
}

/// alice reports to mona; fay and finn hold `finance`; sam supervises;
/// root administers
pub fn make_directory() -> StaticDirectory {
    StaticDirectory::new()
        .with_role(TENANT, "finance", &["fay", "finn"])
        .with_role(TENANT, "supervisors", &["sam"])
        .with_manager(TENANT, "alice", "mona")
        .with_admin(TENANT, "root")
}

pub struct Fixture {
    pub engine: Arc<WorkflowEngine>,
    pub clock: Arc<ManualClock>,
    pub completions: Arc<RecordingHandler>,
}

pub fn fixture(config: EngineConfig) -> Fixture {
    let clock = Arc::new(ManualClock::new(t0()));
    let engine = WorkflowEngine::new(config)
        .with_clock(clock.clone())
        .with_directory(Arc::new(make_directory()));
    let engine = Arc::new(engine);

    let completions = Arc::new(RecordingHandler::default());
    for entity_type in ["invoice", "leave", "quote"] {
        engine.register_completion_handler(EntityType::new(entity_type), completions.clone());
    }

    Fixture {
        engine,
        clock,
        completions,
    }
}

pub fn request(entity_type: &str, entity_id: &str, amount: i64) -> SubmitRequest {
    SubmitRequest::new(tenant(), EntityType::new(entity_type), entity_id, actor("alice"))
        .with_reference(format!("{}-{}", entity_type.to_uppercase(), entity_id))
        .with_field("amount", amount)
}

/// The active step of an instance
pub fn current_step(engine: &WorkflowEngine, id: &WorkflowInstanceId) -> StepInstanceId {
    engine
        .query(id)
        .unwrap()
        .current_step()
        .map(|s| s.id.clone())
        .expect("instance has no active step")
}

/// Completion handler that remembers every event it saw
#[derive(Default)]
pub struct RecordingHandler {
    pub events: Mutex<Vec<CompletionEvent>>,
}

impl RecordingHandler {
    pub fn count_for(&self, id: &WorkflowInstanceId) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| &e.instance_id == id)
            .count()
    }
}

#[async_trait]
impl CompletionHandler for RecordingHandler {
    async fn on_complete(&self, event: &CompletionEvent) -> Result<(), CallbackError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}
