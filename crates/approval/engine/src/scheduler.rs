//! Step scheduler: activates steps and follows outcome rules

use crate::assignment::{self, AssignmentContext, AssignmentResolver};
use crate::directory::ActorDirectory;
use crate::lifecycle::{self, Effects};
use crate::registry::PublishedDefinition;
use crate::store::InstanceRecord;
use approval_notify::{NotificationRequest, TEMPLATE_TASK_ASSIGNED};
use approval_types::{
    ActorId, Assignee, AssignmentRule, Channel, HistoryEvent, HistoryEventKind, InstanceStatus,
    NotificationPriority, Outcome, OutcomeRule, StepId, StepInstanceId, StepStatus, TaskStatus,
    WorkflowError, WorkflowResult, WorkflowStepDefinition, WorkflowStepInstance, WorkflowTask,
};
use chrono::{DateTime, Utc};

/// What step scheduling needs besides the record
pub struct StepContext<'a> {
    pub definition: &'a PublishedDefinition,
    pub directory: &'a dyn ActorDirectory,
    pub now: DateTime<Utc>,
}

impl StepContext<'_> {
    /// The step definition, or an invariant violation naming the dangling id
    pub fn step_definition(
        &self,
        record: &InstanceRecord,
        step: &StepId,
    ) -> WorkflowResult<&WorkflowStepDefinition> {
        self.definition
            .definition
            .step(step)
            .ok_or_else(|| WorkflowError::InvariantViolation {
                instance_id: record.instance.id.clone(),
                reason: format!(
                    "step '{}' does not exist in definition {} v{}",
                    step, self.definition.definition.name, self.definition.definition.version
                ),
            })
    }

    /// Resolve an assignment rule against the instance's variables
    pub fn resolve(
        &self,
        record: &InstanceRecord,
        step: &StepId,
        rule: &AssignmentRule,
    ) -> WorkflowResult<Assignee> {
        let variables = record.variables.instance_fields();
        AssignmentResolver::new(self.directory).resolve(
            step,
            rule,
            &AssignmentContext {
                tenant_id: &record.instance.tenant_id,
                initiator: &record.instance.initiator,
                variables: &variables,
            },
        )
    }
}

/// DRAFT → RUNNING, then activate the first step
pub fn start(
    record: &mut InstanceRecord,
    ctx: &StepContext<'_>,
    effects: &mut Effects,
) -> WorkflowResult<StepInstanceId> {
    lifecycle::transition_instance(
        record,
        InstanceStatus::Running,
        HistoryEventKind::InstanceStarted,
        &ActorId::system(),
        None,
        ctx.now,
    )?;

    let first = ctx
        .definition
        .definition
        .first_step()
        .map(|s| s.id.clone())
        .ok_or_else(|| WorkflowError::InvariantViolation {
            instance_id: record.instance.id.clone(),
            reason: "definition has no steps".into(),
        })?;
    activate(record, ctx, &first, 0, effects)
}

/// Materialize and activate a step instance.
///
/// `escalation_level` carries the level of a step instance this one
/// replaces, so reassignment never restarts the escalation chain.
pub fn activate(
    record: &mut InstanceRecord,
    ctx: &StepContext<'_>,
    step_id: &StepId,
    escalation_level: u32,
    effects: &mut Effects,
) -> WorkflowResult<StepInstanceId> {
    let rule = ctx.step_definition(record, step_id)?.assignment.clone();
    activate_assigned(record, ctx, step_id, escalation_level, &rule, effects)
}

/// Like [`activate`], assigning by `rule` instead of the step's own rule
pub fn activate_assigned(
    record: &mut InstanceRecord,
    ctx: &StepContext<'_>,
    step_id: &StepId,
    escalation_level: u32,
    rule: &AssignmentRule,
    effects: &mut Effects,
) -> WorkflowResult<StepInstanceId> {
    let step_def = ctx.step_definition(record, step_id)?.clone();

    let mut pending =
        WorkflowStepInstance::pending(record.instance.id.clone(), step_id.clone(), record.next_ordinal());
    pending.escalation_level = escalation_level;
    let step_instance_id = pending.id.clone();
    record.steps.push(pending);

    let assignee = ctx.resolve(record, step_id, rule)?;
    let due = step_def.due_date(ctx.now);

    if let Some(step) = record.step_mut(&step_instance_id) {
        step.activated_at = Some(ctx.now);
        step.due_date = due;
        step.assigned_to = match &assignee {
            Assignee::Actor(actor) => Some(actor.clone()),
            Assignee::Pool(_) => None,
        };
    }

    let mut event = HistoryEvent::new(HistoryEventKind::StepActivated, ActorId::system())
        .with_field("step_name", step_def.name.clone())
        .with_field("assignee", serde_json::to_value(&assignee).unwrap_or_default());
    if let Some(due) = due {
        event = event.with_field("due_date", due.to_rfc3339());
    }
    lifecycle::transition_step(
        record,
        &step_instance_id,
        StepStatus::Pending,
        StepStatus::Active,
        event,
        ctx.now,
    )?;

    record.instance.current_step = Some(step_instance_id.clone());
    record.instance.sla_deadline = due;
    record.tasks.push(WorkflowTask::new(
        record.instance.id.clone(),
        step_instance_id.clone(),
        assignee,
        ctx.now,
    ));

    let recipients = match record.step(&step_instance_id) {
        Some(step) => assignment::recipients(step, record.task(&step_instance_id)),
        None => Vec::new(),
    };
    for request in notices(
        record,
        &step_def,
        &step_instance_id,
        TEMPLATE_TASK_ASSIGNED,
        NotificationPriority::Normal,
        &recipients,
        ctx.now,
    ) {
        effects.notify(request);
    }

    tracing::info!(
        instance_id = %record.instance.id,
        step = %step_id,
        step_instance_id = %step_instance_id,
        recipients = recipients.len(),
        "Step activated"
    );
    Ok(step_instance_id)
}

/// Close an ACTIVE step with an action
#[allow(clippy::too_many_arguments)]
pub fn finish_step(
    record: &mut InstanceRecord,
    step_instance_id: &StepInstanceId,
    to: StepStatus,
    kind: HistoryEventKind,
    action: &str,
    actor: &ActorId,
    comments: Option<String>,
    now: DateTime<Utc>,
) -> WorkflowResult<()> {
    let event = HistoryEvent::new(kind, actor.clone())
        .with_comments(comments.clone())
        .with_field("action", action);
    lifecycle::transition_step(record, step_instance_id, StepStatus::Active, to, event, now)?;

    if let Some(step) = record.step_mut(step_instance_id) {
        step.action = Some(action.to_string());
        step.acted_by = Some(actor.clone());
        step.comments = comments;
    }
    lifecycle::close_task(record, step_instance_id, TaskStatus::Done);

    let discarded = record.variables.discard_step(step_instance_id);
    if discarded > 0 {
        tracing::debug!(
            step_instance_id = %step_instance_id,
            discarded,
            "Step variables discarded"
        );
    }
    Ok(())
}

/// Apply an outcome rule after its step finished
pub fn follow_outcome(
    record: &mut InstanceRecord,
    ctx: &StepContext<'_>,
    rule: &OutcomeRule,
    actor: &ActorId,
    comments: Option<String>,
    effects: &mut Effects,
) -> WorkflowResult<()> {
    match &rule.outcome {
        Outcome::Goto { step } => activate(record, ctx, step, 0, effects).map(|_| ()),
        Outcome::Complete => lifecycle::terminate(
            record,
            InstanceStatus::Completed,
            &rule.action,
            comments,
            actor,
            ctx.now,
            effects,
        ),
        Outcome::Reject => lifecycle::terminate(
            record,
            InstanceStatus::Rejected,
            &rule.action,
            comments,
            actor,
            ctx.now,
            effects,
        ),
    }
}

/// Notification requests about a step for each recipient on each of the
/// step's channels. External channels fall back to the inbox unless the
/// step already notifies in-app.
pub fn notices(
    record: &InstanceRecord,
    step_def: &WorkflowStepDefinition,
    step_instance_id: &StepInstanceId,
    template: &str,
    priority: NotificationPriority,
    recipients: &[ActorId],
    now: DateTime<Utc>,
) -> Vec<NotificationRequest> {
    let channels = if step_def.channels.is_empty() {
        vec![Channel::InApp]
    } else {
        step_def.channels.clone()
    };
    let notifies_in_app = channels.contains(&Channel::InApp);
    let due = record
        .step(step_instance_id)
        .and_then(|s| s.due_date)
        .map(|d| d.to_rfc3339())
        .unwrap_or_else(|| "none".into());

    let mut requests = Vec::with_capacity(recipients.len() * channels.len());
    for recipient in recipients {
        for channel in &channels {
            let mut request = NotificationRequest::new(recipient.clone(), *channel, template)
                .with_variable("entity_reference", record.instance.entity_reference.clone())
                .with_variable("entity_type", record.instance.entity_type.to_string())
                .with_variable("step_name", step_def.name.clone())
                .with_variable("due_date", due.clone())
                .with_priority(priority)
                .for_instance(record.instance.id.clone())
                .for_step(step_instance_id.clone())
                .created_at(now);
            if channel.is_external() && !notifies_in_app {
                request = request.with_inbox_fallback();
            }
            requests.push(request);
        }
    }
    requests
}
