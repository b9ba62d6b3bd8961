//! SLA sweep: overdue marking and escalation chains
//!
//! The sweep visits every RUNNING instance whose current step has a due
//! date. Stages fire in order and at most once; a step's
//! `escalation_level` only grows, and a reassigned step instance carries
//! the level forward.

use crate::assignment;
use crate::engine::WorkflowEngine;
use crate::lifecycle::{self, Effects};
use crate::scheduler;
use crate::store::InstanceRecord;
use approval_notify::{TEMPLATE_TASK_ESCALATED, TEMPLATE_TASK_REMINDER};
use approval_types::{
    ActorId, ErrorKind, EscalationAction, HistoryEvent, HistoryEventKind, NotificationPriority,
    StepStatus, TaskStatus, WorkflowError, WorkflowInstanceId, WorkflowResult,
};
use chrono::{DateTime, Utc};

/// Outcome of one sweep
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub overdue: usize,
    pub reminded: usize,
    pub escalated: usize,
    pub reassigned: usize,
    pub auto_resolved: usize,
    /// Instances moved to ERROR during the sweep
    pub failed: usize,
}

impl SweepReport {
    fn absorb(&mut self, other: SweepReport) {
        self.overdue += other.overdue;
        self.reminded += other.reminded;
        self.escalated += other.escalated;
        self.reassigned += other.reassigned;
        self.auto_resolved += other.auto_resolved;
    }

    /// Whether the sweep changed anything
    pub fn is_quiet(&self) -> bool {
        self.overdue + self.reminded + self.escalated + self.reassigned + self.auto_resolved
            + self.failed
            == 0
    }
}

impl WorkflowEngine {
    /// Mark overdue steps and apply due escalation stages
    pub fn sweep_escalations(&self) -> SweepReport {
        let candidates: Vec<WorkflowInstanceId> = self.store.scan(|record| {
            let watched = record.instance.is_running()
                && record.active_steps().any(|s| s.due_date.is_some());
            watched.then(|| record.instance.id.clone())
        });

        let mut report = SweepReport {
            scanned: candidates.len(),
            ..SweepReport::default()
        };

        for id in candidates {
            match self.mutate(&id, "escalate", |record, effects, now| {
                self.escalate_instance(record, effects, now)
            }) {
                Ok(tally) => report.absorb(tally),
                Err(e) if e.kind() == ErrorKind::Fatal => report.failed += 1,
                Err(e) => tracing::debug!(instance_id = %id, error = %e, "Skipped by sweep"),
            }
        }

        if !report.is_quiet() {
            tracing::info!(
                scanned = report.scanned,
                overdue = report.overdue,
                reminded = report.reminded,
                escalated = report.escalated,
                reassigned = report.reassigned,
                auto_resolved = report.auto_resolved,
                failed = report.failed,
                "Escalation sweep finished"
            );
        }
        report
    }

    fn escalate_instance(
        &self,
        record: &mut InstanceRecord,
        effects: &mut Effects,
        now: DateTime<Utc>,
    ) -> WorkflowResult<SweepReport> {
        let mut tally = SweepReport::default();
        // Acted on or suspended since the scan
        if !record.instance.is_running() {
            return Ok(tally);
        }
        lifecycle::check_invariants(record)?;

        let Some(step) = record.current_step() else {
            return Ok(tally);
        };
        let Some(due) = step.due_date else {
            return Ok(tally);
        };
        let sid = step.id.clone();
        let step_id = step.step_id.clone();
        let level = step.escalation_level;
        let already_overdue = step.is_overdue;

        let published = self.registry.get(&record.instance.definition_id)?;
        let ctx = self.context(&published, now);
        let step_def = ctx.step_definition(record, &step_id)?.clone();
        let system = ActorId::system();

        if now > due && !already_overdue {
            if let Some(step) = record.step_mut(&sid) {
                step.is_overdue = true;
            }
            record.record(
                HistoryEvent::new(HistoryEventKind::StepOverdue, system.clone())
                    .for_step(sid.clone())
                    .with_field("due_date", due.to_rfc3339()),
                now,
            );
            tracing::warn!(
                instance_id = %record.instance.id,
                step = %step_id,
                due = %due,
                "Step overdue"
            );
            tally.overdue += 1;
        }

        for (index, stage) in step_def.escalation.due_stages(due, now, level) {
            let reached = index + 1;
            if let Some(step) = record.step_mut(&sid) {
                step.escalation_level = reached;
            }

            match &stage.action {
                EscalationAction::Remind => {
                    let recipients = match record.step(&sid) {
                        Some(step) => assignment::recipients(step, record.task(&sid)),
                        None => Vec::new(),
                    };
                    for request in scheduler::notices(
                        record,
                        &step_def,
                        &sid,
                        TEMPLATE_TASK_REMINDER,
                        NotificationPriority::Normal,
                        &recipients,
                        now,
                    ) {
                        effects.notify(request);
                    }
                    record.record(
                        HistoryEvent::new(HistoryEventKind::ReminderSent, system.clone())
                            .for_step(sid.clone())
                            .with_field("escalation_level", reached)
                            .with_field("recipients", recipients.len()),
                        now,
                    );
                    tally.reminded += 1;
                }

                EscalationAction::EscalateTo { assignment } => {
                    let backups: Vec<ActorId> = ctx
                        .resolve(record, &step_id, assignment)?
                        .candidates()
                        .into_iter()
                        .cloned()
                        .collect();
                    if let Some(step) = record.step_mut(&sid) {
                        for backup in &backups {
                            if !step.escalated_to.contains(backup) {
                                step.escalated_to.push(backup.clone());
                            }
                        }
                    }
                    record.record(
                        HistoryEvent::new(HistoryEventKind::StepEscalated, system.clone())
                            .for_step(sid.clone())
                            .with_field("escalation_level", reached)
                            .with_field(
                                "escalated_to",
                                backups.iter().map(|a| a.to_string()).collect::<Vec<_>>(),
                            ),
                        now,
                    );
                    for request in scheduler::notices(
                        record,
                        &step_def,
                        &sid,
                        TEMPLATE_TASK_ESCALATED,
                        NotificationPriority::High,
                        &backups,
                        now,
                    ) {
                        effects.notify(request);
                    }
                    tracing::warn!(
                        instance_id = %record.instance.id,
                        step = %step_id,
                        level = reached,
                        backups = backups.len(),
                        "Step escalated"
                    );
                    tally.escalated += 1;
                }

                EscalationAction::Reassign { assignment } => {
                    let event = HistoryEvent::new(HistoryEventKind::StepReassigned, system.clone())
                        .with_field("escalation_level", reached);
                    lifecycle::transition_step(
                        record,
                        &sid,
                        StepStatus::Active,
                        StepStatus::Escalated,
                        event,
                        now,
                    )?;
                    lifecycle::close_task(record, &sid, TaskStatus::Withdrawn);
                    let replacement = scheduler::activate_assigned(
                        record, &ctx, &step_id, reached, assignment, effects,
                    )?;
                    tracing::warn!(
                        instance_id = %record.instance.id,
                        step = %step_id,
                        replaced = %sid,
                        replacement = %replacement,
                        "Step reassigned"
                    );
                    tally.reassigned += 1;
                    break;
                }

                EscalationAction::AutoResolve { action } => {
                    let fields = record.variables.fields_for_step(&sid);
                    let rule = published
                        .resolve_outcome(&step_id, action, &fields)
                        .ok_or_else(|| WorkflowError::InvariantViolation {
                            instance_id: record.instance.id.clone(),
                            reason: format!(
                                "auto-resolve action '{}' has no applicable outcome on step '{}'",
                                action, step_id
                            ),
                        })?;
                    let comments = Some(format!("resolved by escalation stage {}", reached));
                    scheduler::finish_step(
                        record,
                        &sid,
                        StepStatus::Timeout,
                        HistoryEventKind::StepTimedOut,
                        action,
                        &system,
                        comments.clone(),
                        now,
                    )?;
                    tracing::warn!(
                        instance_id = %record.instance.id,
                        step = %step_id,
                        action = %action,
                        "Step auto-resolved"
                    );
                    scheduler::follow_outcome(record, &ctx, &rule, &system, comments, effects)?;
                    tally.auto_resolved += 1;
                    break;
                }
            }
        }
        Ok(tally)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::EngineConfig;
    use crate::directory::StaticDirectory;
    use approval_types::{
        AssignmentRule, EntityType, EscalationPolicy, EscalationStage, InstanceStatus, OutcomeRule,
        SubmitRequest, TenantId, WorkflowDefinition, WorkflowStepDefinition,
    };
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    fn make_engine(escalation: EscalationPolicy) -> (WorkflowEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()));
        let directory = StaticDirectory::new()
            .with_role("acme", "supervisors", &["sam", "sue"])
            .with_role("acme", "night-shift", &["nina"]);
        let engine = WorkflowEngine::new(EngineConfig::default())
            .with_clock(clock.clone())
            .with_directory(Arc::new(directory));

        let def = WorkflowDefinition::new(TenantId::new("acme"), EntityType::new("leave"), "Leave")
            .with_step(
                WorkflowStepDefinition::new("review", "Review", AssignmentRule::actor("bob"))
                    .with_sla_hours(24)
                    .with_escalation(escalation)
                    .with_outcome(OutcomeRule::complete("approve"))
                    .with_outcome(OutcomeRule::reject("reject")),
            );
        engine.register_definition(def).unwrap();
        (engine, clock)
    }

    fn submit(engine: &WorkflowEngine) -> WorkflowInstanceId {
        engine
            .submit(SubmitRequest::new(
                TenantId::new("acme"),
                EntityType::new("leave"),
                "LV-1",
                ActorId::new("alice"),
            ))
            .unwrap()
    }

    #[test]
    fn test_nothing_due_is_quiet() {
        let (engine, _clock) = make_engine(EscalationPolicy::new());
        submit(&engine);
        let report = engine.sweep_escalations();
        assert_eq!(report.scanned, 1);
        assert!(report.is_quiet());
    }

    #[test]
    fn test_overdue_marked_once() {
        let (engine, clock) = make_engine(EscalationPolicy::new());
        let id = submit(&engine);
        clock.advance(Duration::hours(25));

        assert_eq!(engine.sweep_escalations().overdue, 1);
        assert_eq!(engine.sweep_escalations().overdue, 0);

        let view = engine.query(&id).unwrap();
        assert!(view.current_step().unwrap().is_overdue);
        assert_eq!(view.events(HistoryEventKind::StepOverdue).len(), 1);
    }

    #[test]
    fn test_reminder_fires_before_due() {
        let policy = EscalationPolicy::new().with_stage(EscalationStage::remind_before(60));
        let (engine, clock) = make_engine(policy);
        let id = submit(&engine);

        clock.advance(Duration::hours(22));
        assert_eq!(engine.sweep_escalations().reminded, 0);
        clock.advance(Duration::hours(1) + Duration::minutes(30));
        let report = engine.sweep_escalations();
        assert_eq!(report.reminded, 1);
        assert_eq!(report.overdue, 0);

        let view = engine.query(&id).unwrap();
        assert_eq!(view.current_step().unwrap().escalation_level, 1);
        assert_eq!(engine.sweep_escalations().reminded, 0);
    }

    #[test]
    fn test_escalation_adds_backups() {
        let policy = EscalationPolicy::new().with_stage(EscalationStage::escalate_after(
            0,
            AssignmentRule::role("supervisors"),
        ));
        let (engine, clock) = make_engine(policy);
        let id = submit(&engine);
        clock.advance(Duration::hours(24) + Duration::minutes(1));

        let report = engine.sweep_escalations();
        assert_eq!(report.escalated, 1);

        let view = engine.query(&id).unwrap();
        let step = view.current_step().unwrap();
        assert_eq!(step.escalated_to, vec![ActorId::new("sam"), ActorId::new("sue")]);
        assert_eq!(step.assigned_to, Some(ActorId::new("bob")));

        let step_iid = step.id.clone();
        let done = engine
            .act(&id, &step_iid, &ActorId::new("sue"), "approve", None)
            .unwrap();
        assert_eq!(done.status(), InstanceStatus::Completed);
    }

    #[test]
    fn test_reassign_replaces_step_and_keeps_level() {
        let policy = EscalationPolicy::new().with_stage(EscalationStage::new(
            30,
            EscalationAction::Reassign {
                assignment: AssignmentRule::role("night-shift"),
            },
        ));
        let (engine, clock) = make_engine(policy);
        let id = submit(&engine);
        let original = engine.query(&id).unwrap().current_step().unwrap().id.clone();
        clock.advance(Duration::hours(25));

        assert_eq!(engine.sweep_escalations().reassigned, 1);
        let view = engine.query(&id).unwrap();
        assert_eq!(view.step(&original).unwrap().status, StepStatus::Escalated);

        let replacement = view.current_step().unwrap();
        assert_ne!(replacement.id, original);
        assert_eq!(replacement.escalation_level, 1);
        assert_eq!(replacement.assigned_to, Some(ActorId::new("nina")));

        // Level 1 means the chain is exhausted; no second reassignment
        clock.advance(Duration::hours(48));
        assert_eq!(engine.sweep_escalations().reassigned, 0);
    }

    #[test]
    fn test_auto_resolve_follows_outcome() {
        let policy =
            EscalationPolicy::new().with_stage(EscalationStage::auto_resolve_after(120, "reject"));
        let (engine, clock) = make_engine(policy);
        let id = submit(&engine);
        clock.advance(Duration::hours(27));

        let report = engine.sweep_escalations();
        assert_eq!(report.auto_resolved, 1);

        let view = engine.query(&id).unwrap();
        assert_eq!(view.status(), InstanceStatus::Rejected);
        assert_eq!(view.steps[0].status, StepStatus::Timeout);
        assert_eq!(view.steps[0].acted_by, Some(ActorId::system()));
        assert_eq!(view.instance.final_action.as_deref(), Some("reject"));
    }

    #[test]
    fn test_unresolvable_backup_moves_to_error() {
        let policy = EscalationPolicy::new()
            .with_stage(EscalationStage::escalate_after(0, AssignmentRule::role("nobody")));
        let (engine, clock) = make_engine(policy);
        let id = submit(&engine);
        clock.advance(Duration::hours(25));

        assert_eq!(engine.sweep_escalations().failed, 1);
        assert_eq!(engine.query(&id).unwrap().status(), InstanceStatus::Error);
    }

    #[test]
    fn test_suspended_instances_are_skipped() {
        let (engine, clock) = make_engine(EscalationPolicy::new());
        let id = submit(&engine);
        // No admin configured, so suspend through the store
        engine
            .store()
            .update(&id, |record| {
                record.instance.status = InstanceStatus::Suspended;
                Ok(())
            })
            .unwrap();
        clock.advance(Duration::hours(48));
        assert_eq!(engine.sweep_escalations().scanned, 0);
    }
}
