//! The workflow engine
//!
//! [`WorkflowEngine`] is the single entry point for collaborating modules:
//! definitions are registered, entities submitted, steps acted on, and
//! instances cancelled, suspended or queried through it. Each operation is
//! one short unit of work on one instance record; nothing here blocks or
//! awaits. Notification delivery, completion callbacks and the escalation
//! sweep run on their own cadence (see [`crate::Workers`]).

use crate::assignment::{self, Authority};
use crate::callbacks::{CallbackInvoker, CallbackReport, CompletionHandler};
use crate::clock::{Clock, SystemClock};
use crate::config::{EngineConfig, ResubmissionPolicy};
use crate::directory::{ActorDirectory, StaticDirectory};
use crate::lifecycle::{self, Effects};
use crate::registry::{DefinitionRegistry, PublishedDefinition};
use crate::scheduler::{self, StepContext};
use crate::store::{EntityKey, InstanceRecord, InstanceStore};
use approval_notify::{
    ChannelTransport, DispatchReport, NotificationDispatcher, TEMPLATE_TASK_DELEGATED,
};
use approval_types::{
    ActorId, EntityType, ErrorKind, FieldMap, HistoryEvent, HistoryEventKind, InstanceStatus,
    NotificationPriority, ReplayedState, StepId, StepInstanceId, StepStatus, SubmitRequest,
    TaskStatus, TenantId, VariableScope, WorkflowDefinition, WorkflowDefinitionId,
    WorkflowError, WorkflowInstance, WorkflowInstanceId, WorkflowResult,
    WorkflowStepInstance, WorkflowTask, WorkflowVariable,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ── Requests and views ───────────────────────────────────────────────

/// An action on an active step, with variables written in the same unit
/// of work
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActRequest {
    pub instance_id: WorkflowInstanceId,
    pub step_instance_id: StepInstanceId,
    pub actor: ActorId,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    /// Instance-scoped variables to set
    #[serde(default)]
    pub variables: FieldMap,
    /// Step-scoped variables to set; discarded when the step completes
    #[serde(default)]
    pub step_variables: FieldMap,
}

impl ActRequest {
    pub fn new(
        instance_id: WorkflowInstanceId,
        step_instance_id: StepInstanceId,
        actor: ActorId,
        action: impl Into<String>,
    ) -> Self {
        Self {
            instance_id,
            step_instance_id,
            actor,
            action: action.into(),
            comments: None,
            variables: FieldMap::new(),
            step_variables: FieldMap::new(),
        }
    }

    pub fn with_comments(mut self, comments: impl Into<String>) -> Self {
        self.comments = Some(comments.into());
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    pub fn with_step_variable(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.step_variables.insert(key.into(), value.into());
        self
    }
}

/// An instance with its steps, tasks, variables and history
#[derive(Clone, Debug, Serialize)]
pub struct InstanceView {
    pub instance: WorkflowInstance,
    pub steps: Vec<WorkflowStepInstance>,
    pub tasks: Vec<WorkflowTask>,
    pub variables: Vec<WorkflowVariable>,
    pub history: Vec<HistoryEvent>,
}

impl From<InstanceRecord> for InstanceView {
    fn from(record: InstanceRecord) -> Self {
        Self {
            variables: record.variables.all().into_iter().cloned().collect(),
            history: record.history().to_vec(),
            instance: record.instance,
            steps: record.steps,
            tasks: record.tasks,
        }
    }
}

impl InstanceView {
    pub fn status(&self) -> InstanceStatus {
        self.instance.status
    }

    /// The ACTIVE step named by the instance's pointer
    pub fn current_step(&self) -> Option<&WorkflowStepInstance> {
        let id = self.instance.current_step.as_ref()?;
        self.steps.iter().find(|s| &s.id == id && s.is_active())
    }

    pub fn step(&self, id: &StepInstanceId) -> Option<&WorkflowStepInstance> {
        self.steps.iter().find(|s| &s.id == id)
    }

    pub fn task(&self, step: &StepInstanceId) -> Option<&WorkflowTask> {
        self.tasks.iter().find(|t| &t.step_instance_id == step)
    }

    /// Events of one kind, in sequence order
    pub fn events(&self, kind: HistoryEventKind) -> Vec<&HistoryEvent> {
        self.history.iter().filter(|e| e.kind == kind).collect()
    }

    pub fn replay(&self) -> ReplayedState {
        ReplayedState::from_events(&self.history)
    }
}

/// A step an actor may act on right now
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OpenTask {
    pub instance_id: WorkflowInstanceId,
    pub step_instance_id: StepInstanceId,
    pub step_id: StepId,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub entity_reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    pub is_overdue: bool,
    /// True when the actor must win a claim race against other candidates
    pub pooled: bool,
}

fn is_live(status: InstanceStatus) -> bool {
    matches!(
        status,
        InstanceStatus::Draft | InstanceStatus::Running | InstanceStatus::Suspended
    )
}

// ── Engine ───────────────────────────────────────────────────────────

/// Embedded approval workflow engine
pub struct WorkflowEngine {
    pub(crate) config: EngineConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) directory: Arc<dyn ActorDirectory>,
    pub(crate) registry: DefinitionRegistry,
    pub(crate) store: InstanceStore,
    pub(crate) dispatcher: Arc<NotificationDispatcher>,
    pub(crate) callbacks: CallbackInvoker,
}

impl WorkflowEngine {
    /// Create an engine with the system clock and an empty directory
    pub fn new(config: EngineConfig) -> Self {
        let dispatcher = Arc::new(NotificationDispatcher::new(config.dispatcher_settings()));
        let callbacks =
            CallbackInvoker::new(config.retry.clone()).with_retention(config.finished_retention);
        Self {
            config,
            clock: Arc::new(SystemClock),
            directory: Arc::new(StaticDirectory::new()),
            registry: DefinitionRegistry::new(),
            store: InstanceStore::new(),
            dispatcher,
            callbacks,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_directory(mut self, directory: Arc<dyn ActorDirectory>) -> Self {
        self.directory = directory;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<NotificationDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn registry(&self) -> &DefinitionRegistry {
        &self.registry
    }

    /// Direct access to instance records, for operator tooling
    pub fn store(&self) -> &InstanceStore {
        &self.store
    }

    pub fn dispatcher(&self) -> &Arc<NotificationDispatcher> {
        &self.dispatcher
    }

    pub fn callbacks(&self) -> &CallbackInvoker {
        &self.callbacks
    }

    // ── Definitions ──────────────────────────────────────────────────

    /// Validate and publish a definition as the next version of its name
    pub fn register_definition(
        &self,
        definition: WorkflowDefinition,
    ) -> WorkflowResult<Arc<PublishedDefinition>> {
        self.registry.publish(definition, self.clock.now())
    }

    /// Stop selecting a definition; instances already pinned to it go on
    pub fn disable_definition(&self, id: &WorkflowDefinitionId) -> WorkflowResult<()> {
        self.registry.disable(id)
    }

    // ── Collaborators ────────────────────────────────────────────────

    pub fn register_completion_handler(
        &self,
        entity_type: EntityType,
        handler: Arc<dyn CompletionHandler>,
    ) {
        self.callbacks.register(entity_type, handler);
    }

    pub fn register_transport(&self, transport: Arc<dyn ChannelTransport>) {
        self.dispatcher.register_transport(transport);
    }

    /// Deliver due notifications
    pub async fn dispatch_notifications(&self) -> DispatchReport {
        self.dispatcher.dispatch_due(self.clock.now()).await
    }

    /// Invoke due completion callbacks
    pub async fn drain_callbacks(&self) -> CallbackReport {
        self.callbacks.drain(self.clock.now()).await
    }

    // ── Submit ───────────────────────────────────────────────────────

    /// Select a definition for the entity, create an instance and start it.
    ///
    /// Under the `Queue` re-submission policy the instance may stay in
    /// DRAFT until the entity's live instance terminates. An instance whose
    /// first step cannot be assigned is created in ERROR; its id is still
    /// returned so an operator can find it.
    pub fn submit(&self, request: SubmitRequest) -> WorkflowResult<WorkflowInstanceId> {
        let now = self.clock.now();
        let published = self
            .registry
            .select(&request.tenant_id, &request.entity_type, &request.form_data)
            .map_err(|e| {
                tracing::info!(
                    tenant_id = %request.tenant_id,
                    entity_type = %request.entity_type,
                    entity_id = %request.entity_id,
                    "No workflow definition matched; entity needs no approval"
                );
                e
            })?;

        let policy = self.config.resubmission_for(&request.entity_type);
        let instance = WorkflowInstance::new(
            request,
            published.id().clone(),
            published.definition.version,
            now,
        );
        let id = instance.id.clone();
        let entity_id = instance.entity_id.clone();

        let queued = self
            .store
            .admit(InstanceRecord::new(instance, now), |existing| {
                let live = existing.iter().filter(|i| is_live(i.status)).count();
                match (policy, live) {
                    (_, 0) | (ResubmissionPolicy::AllowConcurrent, _) => Ok(false),
                    (ResubmissionPolicy::Queue, _) => Ok(true),
                    (ResubmissionPolicy::Reject, _) => Err(WorkflowError::Conflict(format!(
                        "entity {} already has {} live instance(s)",
                        entity_id, live
                    ))),
                }
            })
            .map_err(|e| {
                tracing::warn!(entity_id = %entity_id, error = %e, "Submission refused");
                e
            })?;

        tracing::info!(
            instance_id = %id,
            definition_id = %published.id(),
            version = published.definition.version,
            queued,
            "Instance submitted"
        );

        if queued {
            return Ok(id);
        }
        match self.start_instance(&id) {
            Ok(()) => Ok(id),
            Err(e) if e.kind() == ErrorKind::Fatal => Ok(id),
            Err(e) => Err(e),
        }
    }

    fn start_instance(&self, id: &WorkflowInstanceId) -> WorkflowResult<()> {
        self.mutate(id, "start", |record, effects, now| {
            let published = self.registry.get(&record.instance.definition_id)?;
            let ctx = self.context(&published, now);
            scheduler::start(record, &ctx, effects).map(|_| ())
        })
    }

    /// Start the oldest queued instance of an entity once nothing else is live
    fn start_queued(&self, key: &EntityKey) {
        loop {
            let instances = self.store.for_entity(key);
            if instances
                .iter()
                .any(|i| matches!(i.status, InstanceStatus::Running | InstanceStatus::Suspended))
            {
                return;
            }
            let Some(next) = instances.iter().find(|i| i.status == InstanceStatus::Draft) else {
                return;
            };

            let id = next.id.clone();
            match self.start_instance(&id) {
                Ok(()) => {
                    tracing::info!(instance_id = %id, entity_id = %key.entity_id, "Queued instance started");
                    return;
                }
                // The queued instance is now in ERROR; try the next one
                Err(e) if e.kind() == ErrorKind::Fatal => continue,
                Err(e) => {
                    tracing::warn!(instance_id = %id, error = %e, "Queued instance did not start");
                    return;
                }
            }
        }
    }

    // ── Act ──────────────────────────────────────────────────────────

    /// Act on an active step
    pub fn act(
        &self,
        instance_id: &WorkflowInstanceId,
        step_instance_id: &StepInstanceId,
        actor: &ActorId,
        action: &str,
        comments: Option<&str>,
    ) -> WorkflowResult<InstanceView> {
        let mut request = ActRequest::new(
            instance_id.clone(),
            step_instance_id.clone(),
            actor.clone(),
            action,
        );
        if let Some(comments) = comments {
            request = request.with_comments(comments);
        }
        self.act_with(request)
    }

    /// Act on an active step, writing variables in the same unit of work.
    ///
    /// Legal only while the instance is RUNNING and the step ACTIVE; the
    /// step leaves ACTIVE by compare-and-set, so of several concurrent
    /// callers exactly one wins and the others get `Conflict` or
    /// `AlreadyClaimed`.
    pub fn act_with(&self, request: ActRequest) -> WorkflowResult<InstanceView> {
        let ActRequest {
            instance_id,
            step_instance_id,
            actor,
            action,
            comments,
            variables,
            step_variables,
        } = request;

        self.mutate(&instance_id, "act on", |record, effects, now| {
            let step = self.active_step(record, &step_instance_id, "act on")?;
            lifecycle::check_invariants(record)?;

            let step_id = step.step_id.clone();
            let is_admin = self.directory.is_admin(&record.instance.tenant_id, &actor);
            let authority = assignment::authorize(
                step,
                record.task(&step_instance_id),
                &actor,
                is_admin,
                "act on",
            )?;

            let published = self.registry.get(&record.instance.definition_id)?;
            if !published.knows_action(&step_id, &action) {
                let accepted: Vec<String> = published
                    .definition
                    .outcome_rules(&step_id)
                    .into_iter()
                    .map(|r| r.action)
                    .collect();
                return Err(WorkflowError::InvalidAction {
                    action: action.clone(),
                    reason: format!("step '{}' accepts {}", step_id, accepted.join(", ")),
                });
            }

            let mut fields = record.variables.fields_for_step(&step_instance_id);
            fields.extend(variables.clone());
            fields.extend(step_variables.clone());
            let rule = published
                .resolve_outcome(&step_id, &action, &fields)
                .ok_or_else(|| WorkflowError::InvalidAction {
                    action: action.clone(),
                    reason: format!("no outcome of step '{}' applies to the current data", step_id),
                })?;

            for (key, value) in &variables {
                write_variable(record, VariableScope::Instance, key, value.clone(), &actor, now);
            }
            for (key, value) in &step_variables {
                let scope = VariableScope::Step(step_instance_id.clone());
                write_variable(record, scope, key, value.clone(), &actor, now);
            }
            if authority == (Authority::Claimant { implicit_claim: true }) {
                claim_task(record, &step_instance_id, &actor, now);
            }

            scheduler::finish_step(
                record,
                &step_instance_id,
                rule.step_status,
                HistoryEventKind::StepActed,
                &action,
                &actor,
                comments.clone(),
                now,
            )?;
            tracing::info!(
                instance_id = %record.instance.id,
                step = %step_id,
                actor = %actor,
                action = %action,
                authority = ?authority,
                "Step acted on"
            );

            let ctx = self.context(&published, now);
            scheduler::follow_outcome(record, &ctx, &rule, &actor, comments.clone(), effects)
        })?;

        self.query(&instance_id)
    }

    /// Reserve a pool task for one candidate without acting
    pub fn claim(
        &self,
        instance_id: &WorkflowInstanceId,
        step_instance_id: &StepInstanceId,
        actor: &ActorId,
    ) -> WorkflowResult<()> {
        self.mutate(instance_id, "claim", |record, _effects, now| {
            let step = self.active_step(record, step_instance_id, "claim")?;
            let task = record.task(step_instance_id);
            if !task.map(|t| t.assignee.is_pool()).unwrap_or(false) || step.delegated_to.is_some() {
                return Err(WorkflowError::Conflict(format!(
                    "step {} has no claimable pool",
                    step_instance_id
                )));
            }

            match assignment::authorize(step, task, actor, false, "claim")? {
                Authority::Claimant {
                    implicit_claim: true,
                } => {
                    claim_task(record, step_instance_id, actor, now);
                    tracing::info!(step_instance_id = %step_instance_id, actor = %actor, "Task claimed");
                    Ok(())
                }
                Authority::Claimant {
                    implicit_claim: false,
                } => Ok(()),
                _ => Err(WorkflowError::Conflict(format!(
                    "{} is not a candidate of step {}",
                    actor, step_instance_id
                ))),
            }
        })
    }

    /// Hand an active step to another actor.
    ///
    /// Only the current holder (or a tenant administrator) may delegate.
    /// The original holder loses the right to act; the due date stays.
    pub fn delegate(
        &self,
        instance_id: &WorkflowInstanceId,
        step_instance_id: &StepInstanceId,
        from: &ActorId,
        to: ActorId,
        reason: Option<&str>,
    ) -> WorkflowResult<()> {
        self.mutate(instance_id, "delegate", |record, effects, now| {
            let step = self.active_step(record, step_instance_id, "delegate")?;
            let holder = assignment::effective_holder(step, record.task(step_instance_id));
            let step_id = step.step_id.clone();

            if holder.as_ref() != Some(from)
                && !self.directory.is_admin(&record.instance.tenant_id, from)
            {
                return Err(WorkflowError::forbidden_step(from, step_instance_id, "delegate"));
            }
            let original = holder.unwrap_or_else(|| from.clone());
            if original == to {
                return Err(WorkflowError::Conflict(format!(
                    "{} already holds step {}",
                    to, step_instance_id
                )));
            }

            if let Some(step) = record.step_mut(step_instance_id) {
                step.delegated_from = Some(original.clone());
                step.delegated_to = Some(to.clone());
            }
            record.record(
                HistoryEvent::new(HistoryEventKind::TaskDelegated, from.clone())
                    .for_step(step_instance_id.clone())
                    .with_comments(reason.map(str::to_owned))
                    .with_field("delegated_from", original.to_string())
                    .with_field("delegated_to", to.to_string()),
                now,
            );

            let published = self.registry.get(&record.instance.definition_id)?;
            let ctx = self.context(&published, now);
            let step_def = ctx.step_definition(record, &step_id)?;
            for request in scheduler::notices(
                record,
                step_def,
                step_instance_id,
                TEMPLATE_TASK_DELEGATED,
                NotificationPriority::Normal,
                std::slice::from_ref(&to),
                now,
            ) {
                effects.notify(request.with_variable("delegated_from", original.to_string()));
            }

            tracing::info!(
                instance_id = %record.instance.id,
                step_instance_id = %step_instance_id,
                from = %original,
                to = %to,
                "Step delegated"
            );
            Ok(())
        })
    }

    // ── Cancel / Suspend / Resume ────────────────────────────────────

    /// Cancel from DRAFT, RUNNING or SUSPENDED. Open steps are SKIPPED and
    /// undelivered notifications of the instance are suppressed.
    pub fn cancel(
        &self,
        instance_id: &WorkflowInstanceId,
        actor: &ActorId,
        reason: Option<&str>,
    ) -> WorkflowResult<()> {
        let reason = reason.map(str::to_owned);
        self.mutate(instance_id, "cancel", |record, effects, now| {
            let status = record.instance.status;
            if !status.is_cancellable() {
                return Err(WorkflowError::instance_state(&record.instance.id, status, "cancel"));
            }

            let open: Vec<(StepInstanceId, StepStatus)> = record
                .steps
                .iter()
                .filter(|s| !s.status.is_terminal())
                .map(|s| (s.id.clone(), s.status))
                .collect();
            for (step_id, from) in open {
                let event = HistoryEvent::new(HistoryEventKind::StepSkipped, actor.clone())
                    .with_comments(reason.clone());
                lifecycle::transition_step(record, &step_id, from, StepStatus::Skipped, event, now)?;
                lifecycle::close_task(record, &step_id, TaskStatus::Withdrawn);
            }

            effects.suppress_pending = true;
            lifecycle::terminate(
                record,
                InstanceStatus::Cancelled,
                "cancel",
                reason.clone(),
                actor,
                now,
                effects,
            )
        })
    }

    /// Pause an instance; the current step is preserved and SLA clocks stop
    pub fn suspend(
        &self,
        instance_id: &WorkflowInstanceId,
        actor: &ActorId,
        reason: Option<&str>,
    ) -> WorkflowResult<()> {
        self.mutate(instance_id, "suspend", |record, _effects, now| {
            self.require_admin(record, actor, "suspend")?;
            if record.instance.status != InstanceStatus::Running {
                return Err(WorkflowError::instance_state(
                    &record.instance.id,
                    record.instance.status,
                    "suspend",
                ));
            }
            lifecycle::transition_instance(
                record,
                InstanceStatus::Suspended,
                HistoryEventKind::InstanceSuspended,
                actor,
                reason.map(str::to_owned),
                now,
            )?;
            record.instance.suspended_at = Some(now);
            Ok(())
        })
    }

    /// Resume a suspended instance, shifting due dates forward by the time
    /// spent suspended
    pub fn resume(
        &self,
        instance_id: &WorkflowInstanceId,
        actor: &ActorId,
        reason: Option<&str>,
    ) -> WorkflowResult<()> {
        self.mutate(instance_id, "resume", |record, _effects, now| {
            self.require_admin(record, actor, "resume")?;
            if record.instance.status != InstanceStatus::Suspended {
                return Err(WorkflowError::instance_state(
                    &record.instance.id,
                    record.instance.status,
                    "resume",
                ));
            }

            let paused_at = record.instance.suspended_at.unwrap_or(now);
            let shift = (now - paused_at).max(chrono::Duration::zero());
            for step in record.steps.iter_mut().filter(|s| s.is_active()) {
                step.due_date = step.due_date.map(|due| due + shift);
            }
            record.instance.sla_deadline = record.instance.sla_deadline.map(|due| due + shift);
            record.instance.suspended_at = None;

            let event = HistoryEvent::new(HistoryEventKind::InstanceResumed, actor.clone())
                .with_comments(reason.map(str::to_owned))
                .with_field("suspended_seconds", shift.num_seconds());
            lifecycle::transition_instance_with(record, InstanceStatus::Running, event, now)
        })
    }

    // ── Variables ────────────────────────────────────────────────────

    /// Set an instance- or step-scoped variable
    pub fn set_variable(
        &self,
        instance_id: &WorkflowInstanceId,
        scope: VariableScope,
        key: &str,
        value: serde_json::Value,
        actor: &ActorId,
    ) -> WorkflowResult<()> {
        self.mutate(instance_id, "set variable on", |record, _effects, now| {
            if !is_live(record.instance.status) {
                return Err(WorkflowError::instance_state(
                    &record.instance.id,
                    record.instance.status,
                    "set variable on",
                ));
            }
            if let VariableScope::Step(step_id) = &scope {
                let step = record
                    .step(step_id)
                    .ok_or_else(|| WorkflowError::StepNotFound(step_id.clone()))?;
                if step.status.is_terminal() {
                    return Err(WorkflowError::step_state(step_id, step.status, "set variable on"));
                }
            }
            write_variable(record, scope, key, value, actor, now);
            Ok(())
        })
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// The instance with its steps, tasks, variables and history
    pub fn query(&self, instance_id: &WorkflowInstanceId) -> WorkflowResult<InstanceView> {
        self.store.get(instance_id).map(InstanceView::from)
    }

    /// Every instance ever created for an entity, oldest first
    pub fn instances_for_entity(
        &self,
        tenant_id: &TenantId,
        entity_type: &EntityType,
        entity_id: &str,
    ) -> Vec<WorkflowInstance> {
        self.store.for_entity(&EntityKey::new(
            tenant_id.clone(),
            entity_type.clone(),
            entity_id,
        ))
    }

    /// Steps `actor` may act on now, earliest due first
    pub fn open_tasks_for(&self, tenant_id: &TenantId, actor: &ActorId) -> Vec<OpenTask> {
        let mut tasks = self.store.scan(|record| {
            if &record.instance.tenant_id != tenant_id || !record.instance.is_running() {
                return None;
            }
            let step = record.current_step()?;
            let task = record.task(&step.id);
            let authority = assignment::authorize(step, task, actor, false, "act on").ok()?;
            Some(OpenTask {
                instance_id: record.instance.id.clone(),
                step_instance_id: step.id.clone(),
                step_id: step.step_id.clone(),
                entity_type: record.instance.entity_type.clone(),
                entity_id: record.instance.entity_id.clone(),
                entity_reference: record.instance.entity_reference.clone(),
                due_date: step.due_date,
                is_overdue: step.is_overdue,
                pooled: matches!(authority, Authority::Claimant { implicit_claim: true }),
            })
        });
        tasks.sort_by(|a, b| match (a.due_date, b.due_date) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.entity_reference.cmp(&b.entity_reference),
        });
        tasks
    }

    /// Reconstruct status and current step from history alone
    pub fn replay(&self, instance_id: &WorkflowInstanceId) -> WorkflowResult<ReplayedState> {
        self.store
            .get(instance_id)
            .map(|record| ReplayedState::from_events(record.history()))
    }

    /// The full history of an instance
    pub fn history(&self, instance_id: &WorkflowInstanceId) -> WorkflowResult<Vec<HistoryEvent>> {
        self.store
            .get(instance_id)
            .map(|record| record.history().to_vec())
    }

    // ── Internals ────────────────────────────────────────────────────

    pub(crate) fn context<'a>(
        &'a self,
        published: &'a PublishedDefinition,
        now: DateTime<Utc>,
    ) -> StepContext<'a> {
        StepContext {
            definition: published,
            directory: self.directory.as_ref(),
            now,
        }
    }

    /// Run one unit of work on an instance and release its effects once
    /// committed
    pub(crate) fn mutate<T>(
        &self,
        instance_id: &WorkflowInstanceId,
        operation: &str,
        f: impl FnOnce(&mut InstanceRecord, &mut Effects, DateTime<Utc>) -> WorkflowResult<T>,
    ) -> WorkflowResult<T> {
        let now = self.clock.now();
        let mut effects = Effects::default();

        let result = self.store.update(instance_id, |record| {
            lifecycle::guarded(record, now, |record| f(record, &mut effects, now))
        });

        match &result {
            Ok(_) => self.release(instance_id, effects, now),
            Err(e) if e.kind() == ErrorKind::Fatal => self.release(instance_id, effects, now),
            Err(e) => tracing::warn!(
                instance_id = %instance_id,
                operation,
                error = %e,
                "Operation rejected"
            ),
        }
        result
    }

    fn release(&self, instance_id: &WorkflowInstanceId, effects: Effects, now: DateTime<Utc>) {
        if effects.suppress_pending {
            self.dispatcher.suppress_instance(instance_id, now);
        }
        for request in effects.notifications {
            self.dispatcher.enqueue(request);
        }
        if let Some(event) = effects.completion {
            self.callbacks.schedule(event);
        }
        if let Some(key) = effects.released {
            self.start_queued(&key);
        }
    }

    /// The instance is RUNNING and the step exists and is ACTIVE
    fn active_step<'r>(
        &self,
        record: &'r InstanceRecord,
        step_instance_id: &StepInstanceId,
        operation: &str,
    ) -> WorkflowResult<&'r WorkflowStepInstance> {
        if !record.instance.is_running() {
            return Err(WorkflowError::instance_state(
                &record.instance.id,
                record.instance.status,
                operation,
            ));
        }
        let step = record
            .step(step_instance_id)
            .ok_or_else(|| WorkflowError::StepNotFound(step_instance_id.clone()))?;
        if !step.is_active() {
            return Err(WorkflowError::step_state(step_instance_id, step.status, operation));
        }
        Ok(step)
    }

    fn require_admin(
        &self,
        record: &InstanceRecord,
        actor: &ActorId,
        operation: &str,
    ) -> WorkflowResult<()> {
        if self.directory.is_admin(&record.instance.tenant_id, actor) {
            Ok(())
        } else {
            Err(WorkflowError::forbidden_instance(actor, &record.instance.id, operation))
        }
    }
}

fn write_variable(
    record: &mut InstanceRecord,
    scope: VariableScope,
    key: &str,
    value: serde_json::Value,
    actor: &ActorId,
    now: DateTime<Utc>,
) {
    let step = match &scope {
        VariableScope::Step(step) => Some(step.clone()),
        VariableScope::Instance => None,
    };
    record
        .variables
        .set(scope, key, value.clone(), actor, now);

    let mut event =
        HistoryEvent::new(HistoryEventKind::VariableSet, actor.clone()).with_field(key, value);
    if let Some(step) = step {
        event = event.for_step(step);
    }
    record.record(event, now);
}

fn claim_task(
    record: &mut InstanceRecord,
    step_instance_id: &StepInstanceId,
    actor: &ActorId,
    now: DateTime<Utc>,
) {
    if let Some(task) = record.task_mut(step_instance_id) {
        task.claimed_by = Some(actor.clone());
        task.claimed_at = Some(now);
        task.status = TaskStatus::Claimed;
    }
    record.record(
        HistoryEvent::new(HistoryEventKind::TaskClaimed, actor.clone())
            .for_step(step_instance_id.clone())
            .with_field("claimed_by", actor.to_string()),
        now,
    );
}
