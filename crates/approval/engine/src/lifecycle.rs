//! Instance lifecycle: guarded transitions, termination and the ERROR path
//!
//! Every helper here mutates an [`InstanceRecord`] and appends the
//! matching history event in the same call. Side effects that leave the
//! engine (notifications, completion callbacks) are collected in
//! [`Effects`] and released only after the record has been committed.

use crate::store::{EntityKey, InstanceRecord};
use approval_notify::{NotificationRequest, TEMPLATE_INSTANCE_FINISHED};
use approval_types::{
    ActorId, Channel, CompletionEvent, ErrorKind, HistoryEvent, HistoryEventKind,
    InstanceStatus, StatusChange, StepInstanceId, StepStatus, TaskStatus, WorkflowError,
    WorkflowResult,
};
use chrono::{DateTime, Utc};

/// Side effects of a committed mutation
#[derive(Debug, Default)]
pub struct Effects {
    pub notifications: Vec<NotificationRequest>,
    pub completion: Option<CompletionEvent>,
    /// Drop undelivered notifications of the instance before enqueueing
    pub suppress_pending: bool,
    /// Set when the instance terminated; queued instances may start
    pub released: Option<EntityKey>,
}

impl Effects {
    pub fn notify(&mut self, request: NotificationRequest) {
        self.notifications.push(request);
    }
}

/// Move the instance along a legal edge of the state machine
pub fn transition_instance(
    record: &mut InstanceRecord,
    to: InstanceStatus,
    kind: HistoryEventKind,
    actor: &ActorId,
    comments: Option<String>,
    now: DateTime<Utc>,
) -> WorkflowResult<()> {
    let event = HistoryEvent::new(kind, actor.clone()).with_comments(comments);
    transition_instance_with(record, to, event, now)
}

/// Like [`transition_instance`], recording a prepared event
pub fn transition_instance_with(
    record: &mut InstanceRecord,
    to: InstanceStatus,
    event: HistoryEvent,
    now: DateTime<Utc>,
) -> WorkflowResult<()> {
    let from = record.instance.status;
    if !from.can_transition_to(to) {
        return Err(WorkflowError::instance_state(
            &record.instance.id,
            from,
            &format!("move to {}", to),
        ));
    }

    let actor = event.actor.clone();
    record.instance.status = to;
    record.record(
        event.with_change(StatusChange::Instance {
            from: Some(from),
            to,
        }),
        now,
    );

    tracing::info!(
        instance_id = %record.instance.id,
        from = %from,
        to = %to,
        actor = %actor,
        "Instance transitioned"
    );
    Ok(())
}

/// Compare-and-set a step's status: fails with `Conflict` unless the step
/// is still in `expected`.
pub fn transition_step(
    record: &mut InstanceRecord,
    step_id: &StepInstanceId,
    expected: StepStatus,
    to: StepStatus,
    event: HistoryEvent,
    now: DateTime<Utc>,
) -> WorkflowResult<()> {
    let step = record
        .step_mut(step_id)
        .ok_or_else(|| WorkflowError::StepNotFound(step_id.clone()))?;
    if step.status != expected {
        return Err(WorkflowError::step_state(step_id, step.status, "update"));
    }

    step.status = to;
    if to.is_terminal() {
        step.completed_at = Some(now);
    }
    let change = StatusChange::Step {
        step_instance_id: step.id.clone(),
        step_id: step.step_id.clone(),
        from: expected,
        to,
    };
    let was_current = record.instance.current_step.as_ref() == Some(step_id);
    if to.is_terminal() && was_current {
        record.instance.current_step = None;
        record.instance.sla_deadline = None;
    }

    record.record(event.for_step(step_id.clone()).with_change(change), now);
    Ok(())
}

/// Close a step's task
pub fn close_task(record: &mut InstanceRecord, step_id: &StepInstanceId, status: TaskStatus) {
    if let Some(task) = record.task_mut(step_id) {
        if task.is_open() {
            task.status = status;
        }
    }
}

/// Check the sequential-execution invariant of a RUNNING instance: exactly
/// one ACTIVE step, and the cached pointer names it.
pub fn check_invariants(record: &InstanceRecord) -> WorkflowResult<()> {
    let active: Vec<&StepInstanceId> = record.active_steps().map(|s| &s.id).collect();
    let violation = |reason: String| WorkflowError::InvariantViolation {
        instance_id: record.instance.id.clone(),
        reason,
    };

    if active.len() > 1 {
        return Err(violation(format!("{} steps are ACTIVE at once", active.len())));
    }
    match (active.first(), record.instance.current_step.as_ref()) {
        (Some(a), Some(c)) if *a == c => Ok(()),
        (Some(a), Some(c)) => Err(violation(format!(
            "current step {} is not the active step {}",
            c, a
        ))),
        (Some(a), None) => Err(violation(format!("active step {} is not current", a))),
        (None, Some(c)) => Err(violation(format!("current step {} is not ACTIVE", c))),
        (None, None) => Err(violation("no step is ACTIVE".into())),
    }
}

/// Terminate the instance as COMPLETED, REJECTED or CANCELLED.
///
/// The completion event is scheduled only if the callback has not fired
/// yet, so repeating the terminating transition never fires it twice.
pub fn terminate(
    record: &mut InstanceRecord,
    to: InstanceStatus,
    action: &str,
    comments: Option<String>,
    actor: &ActorId,
    now: DateTime<Utc>,
    effects: &mut Effects,
) -> WorkflowResult<()> {
    let kind = match to {
        InstanceStatus::Completed => HistoryEventKind::InstanceCompleted,
        InstanceStatus::Rejected => HistoryEventKind::InstanceRejected,
        InstanceStatus::Cancelled => HistoryEventKind::InstanceCancelled,
        other => {
            return Err(WorkflowError::InvariantViolation {
                instance_id: record.instance.id.clone(),
                reason: format!("{} is not a terminal status", other),
            })
        }
    };

    transition_instance(record, to, kind, actor, comments.clone(), now)?;

    let instance = &mut record.instance;
    instance.final_action = Some(action.to_string());
    instance.final_comments = comments.clone();
    instance.completed_at = Some(now);
    instance.current_step = None;
    instance.sla_deadline = None;
    instance.suspended_at = None;

    for task in record.tasks.iter_mut().filter(|t| t.is_open()) {
        task.status = TaskStatus::Withdrawn;
    }

    if !record.instance.callback_fired {
        record.instance.callback_fired = true;
        effects.completion = CompletionEvent::from_instance(&record.instance);
    }

    effects.notify(
        NotificationRequest::new(
            record.instance.initiator.clone(),
            Channel::InApp,
            TEMPLATE_INSTANCE_FINISHED,
        )
        .with_variable("entity_reference", record.instance.entity_reference.clone())
        .with_variable("entity_type", record.instance.entity_type.to_string())
        .with_variable("status", to.to_string())
        .with_variable("comments", comments.unwrap_or_default())
        .for_instance(record.instance.id.clone())
        .created_at(now),
    );
    effects.released = Some(EntityKey::of(&record.instance));
    Ok(())
}

/// Move the instance to ERROR after an invariant violation.
///
/// Open steps freeze as ERROR and tasks are withdrawn. Returns the error
/// so callers can propagate it unchanged.
pub fn fail(record: &mut InstanceRecord, error: WorkflowError, now: DateTime<Utc>) -> WorkflowError {
    let system = ActorId::system();
    let reason = error.to_string();

    let open: Vec<(StepInstanceId, StepStatus)> = record
        .steps
        .iter()
        .filter(|s| !s.status.is_terminal())
        .map(|s| (s.id.clone(), s.status))
        .collect();
    for (step_id, status) in open {
        let event = HistoryEvent::new(HistoryEventKind::StepFailed, system.clone())
            .with_comments(Some(reason.clone()));
        if let Err(e) = transition_step(record, &step_id, status, StepStatus::Error, event, now) {
            tracing::warn!(step = %step_id, error = %e, "Could not freeze step");
        }
    }
    for task in record.tasks.iter_mut().filter(|t| t.is_open()) {
        task.status = TaskStatus::Withdrawn;
    }

    if record.instance.status.can_transition_to(InstanceStatus::Error) {
        let from = record.instance.status;
        record.instance.status = InstanceStatus::Error;
        record.instance.current_step = None;
        record.instance.sla_deadline = None;
        record.instance.error_reason = Some(reason.clone());
        record.record(
            HistoryEvent::new(HistoryEventKind::InstanceFailed, system)
                .with_change(StatusChange::Instance {
                    from: Some(from),
                    to: InstanceStatus::Error,
                })
                .with_comments(Some(reason.clone())),
            now,
        );
    }

    tracing::error!(
        instance_id = %record.instance.id,
        error = %reason,
        "Instance moved to ERROR; operator action required"
    );
    error
}

/// Run `f`; a fatal error moves the instance to ERROR before returning
pub fn guarded<T>(
    record: &mut InstanceRecord,
    now: DateTime<Utc>,
    f: impl FnOnce(&mut InstanceRecord) -> WorkflowResult<T>,
) -> WorkflowResult<T> {
    match f(record) {
        Err(e) if e.kind() == ErrorKind::Fatal => Err(fail(record, e, now)),
        other => other,
    }
}
