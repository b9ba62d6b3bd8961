//! Instance lifecycle: re-submission, delegation, cancel, suspend/resume,
//! variables, replay and the ERROR path

mod common;

use approval_engine::{ActRequest, EngineConfig, ResubmissionPolicy, WorkflowEngine};
use approval_types::{
    AssignmentRule, DerivedAssignee, EntityType, HistoryEventKind, InstanceStatus, OutcomeRule,
    StepId, StepStatus, TaskStatus, VariableScope, WorkflowDefinition, WorkflowError,
    WorkflowStepDefinition,
};
use chrono::Duration;
use common::*;
use serde_json::json;

fn register_leave(engine: &WorkflowEngine) {
    engine
        .register_definition(
            WorkflowDefinition::new(tenant(), EntityType::new("leave"), "Leave").with_step(
                WorkflowStepDefinition::new("manager", "Manager", AssignmentRule::actor("mona"))
                    .with_sla_hours(8),
            ),
        )
        .unwrap();
}

// ── Re-submission ────────────────────────────────────────────────────

#[test]
fn resubmission_rejected_while_live() {
    let fx = fixture(EngineConfig::default());
    register_leave(&fx.engine);

    let first = fx.engine.submit(request("leave", "LV-1", 1)).unwrap();
    let again = fx.engine.submit(request("leave", "LV-1", 1));
    assert!(matches!(again, Err(WorkflowError::Conflict(_))));

    let step = current_step(&fx.engine, &first);
    fx.engine.act(&first, &step, &actor("mona"), "reject", None).unwrap();

    // Terminal instances no longer block the entity
    let second = fx.engine.submit(request("leave", "LV-1", 1)).unwrap();
    let all = fx
        .engine
        .instances_for_entity(&tenant(), &EntityType::new("leave"), "LV-1");
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].id, first);
    assert_eq!(all[1].id, second);
}

#[test]
fn resubmission_allowed_concurrently() {
    let config = EngineConfig::default()
        .with_resubmission(EntityType::new("leave"), ResubmissionPolicy::AllowConcurrent);
    let fx = fixture(config);
    register_leave(&fx.engine);

    let a = fx.engine.submit(request("leave", "LV-1", 1)).unwrap();
    let b = fx.engine.submit(request("leave", "LV-1", 1)).unwrap();
    assert_eq!(fx.engine.query(&a).unwrap().status(), InstanceStatus::Running);
    assert_eq!(fx.engine.query(&b).unwrap().status(), InstanceStatus::Running);
}

#[test]
fn queued_resubmission_starts_after_termination() {
    let config =
        EngineConfig::default().with_resubmission(EntityType::new("leave"), ResubmissionPolicy::Queue);
    let fx = fixture(config);
    register_leave(&fx.engine);

    let first = fx.engine.submit(request("leave", "LV-1", 1)).unwrap();
    fx.clock.advance(Duration::minutes(1));
    let queued = fx.engine.submit(request("leave", "LV-1", 2)).unwrap();
    assert_eq!(fx.engine.query(&queued).unwrap().status(), InstanceStatus::Draft);

    fx.engine.cancel(&first, &actor("alice"), Some("wrong dates")).unwrap();

    let view = fx.engine.query(&queued).unwrap();
    assert_eq!(view.status(), InstanceStatus::Running);
    assert!(view.current_step().is_some());
}

// ── Delegation and claims ────────────────────────────────────────────

#[test]
fn delegation_transfers_the_right_to_act() {
    let fx = fixture(EngineConfig::default());
    register_leave(&fx.engine);
    let id = fx.engine.submit(request("leave", "LV-1", 1)).unwrap();
    let step = current_step(&fx.engine, &id);
    let due = fx.engine.query(&id).unwrap().step(&step).unwrap().due_date;

    // Only the holder may delegate
    assert!(matches!(
        fx.engine.delegate(&id, &step, &actor("eve"), actor("dan"), None),
        Err(WorkflowError::Forbidden { .. })
    ));
    fx.engine
        .delegate(&id, &step, &actor("mona"), actor("dan"), Some("on leave"))
        .unwrap();

    let view = fx.engine.query(&id).unwrap();
    let delegated = view.step(&step).unwrap();
    assert_eq!(delegated.delegated_from, Some(actor("mona")));
    assert_eq!(delegated.delegated_to, Some(actor("dan")));
    assert_eq!(delegated.due_date, due);

    let event = view.events(HistoryEventKind::TaskDelegated)[0].clone();
    assert_eq!(event.changed_fields["delegated_from"], json!("mona"));
    assert_eq!(event.changed_fields["delegated_to"], json!("dan"));

    assert!(matches!(
        fx.engine.act(&id, &step, &actor("mona"), "approve", None),
        Err(WorkflowError::Forbidden { .. })
    ));
    let done = fx.engine.act(&id, &step, &actor("dan"), "approve", None).unwrap();
    assert_eq!(done.status(), InstanceStatus::Completed);
}

#[test]
fn claim_reserves_pool_task() {
    let fx = fixture(EngineConfig::default());
    fx.engine
        .register_definition(
            WorkflowDefinition::new(tenant(), EntityType::new("quote"), "Quote").with_step(
                WorkflowStepDefinition::new("finance", "Finance", AssignmentRule::role("finance")),
            ),
        )
        .unwrap();
    let id = fx.engine.submit(request("quote", "Q-1", 10)).unwrap();
    let step = current_step(&fx.engine, &id);

    assert_eq!(fx.engine.open_tasks_for(&tenant(), &actor("fay")).len(), 1);
    assert_eq!(fx.engine.open_tasks_for(&tenant(), &actor("finn")).len(), 1);

    fx.engine.claim(&id, &step, &actor("fay")).unwrap();
    // Claiming again is a no-op for the claimant
    fx.engine.claim(&id, &step, &actor("fay")).unwrap();
    assert!(matches!(
        fx.engine.claim(&id, &step, &actor("finn")),
        Err(WorkflowError::AlreadyClaimed { .. })
    ));
    assert!(fx.engine.open_tasks_for(&tenant(), &actor("finn")).is_empty());

    let task = fx.engine.query(&id).unwrap().task(&step).cloned().unwrap();
    assert_eq!(task.status, TaskStatus::Claimed);
    assert_eq!(task.claimed_by, Some(actor("fay")));

    assert!(matches!(
        fx.engine.act(&id, &step, &actor("finn"), "approve", None),
        Err(WorkflowError::AlreadyClaimed { .. })
    ));
    fx.engine.act(&id, &step, &actor("fay"), "approve", None).unwrap();
}

#[test]
fn unknown_action_is_rejected_without_side_effects() {
    let fx = fixture(EngineConfig::default());
    register_leave(&fx.engine);
    let id = fx.engine.submit(request("leave", "LV-1", 1)).unwrap();
    let step = current_step(&fx.engine, &id);
    let before = fx.engine.query(&id).unwrap().history.len();

    let result = fx.engine.act(&id, &step, &actor("mona"), "shrug", None);
    assert!(matches!(result, Err(WorkflowError::InvalidAction { .. })));
    assert_eq!(fx.engine.query(&id).unwrap().history.len(), before);
}

// ── Cancel / Suspend / Resume ────────────────────────────────────────

#[tokio::test]
async fn cancel_skips_steps_and_suppresses_notices() {
    let fx = fixture(EngineConfig::default());
    register_leave(&fx.engine);
    let id = fx.engine.submit(request("leave", "LV-1", 1)).unwrap();
    let step = current_step(&fx.engine, &id);
    assert_eq!(fx.engine.dispatcher().pending_count(), 1);

    fx.engine.cancel(&id, &actor("alice"), Some("plans changed")).unwrap();

    let view = fx.engine.query(&id).unwrap();
    assert_eq!(view.status(), InstanceStatus::Cancelled);
    assert_eq!(view.step(&step).unwrap().status, StepStatus::Skipped);
    assert_eq!(view.task(&step).unwrap().status, TaskStatus::Withdrawn);

    // Only the initiator's finished notice is still pending
    let pending = fx.engine.dispatcher().pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].recipient, actor("alice"));

    assert!(matches!(
        fx.engine.cancel(&id, &actor("alice"), None),
        Err(WorkflowError::Conflict(_))
    ));

    fx.engine.drain_callbacks().await;
    assert_eq!(fx.completions.count_for(&id), 1);
    assert_eq!(
        fx.completions.events.lock()[0].final_status,
        InstanceStatus::Cancelled
    );
}

#[test]
fn suspend_requires_admin_and_blocks_actions() {
    let fx = fixture(EngineConfig::default());
    register_leave(&fx.engine);
    let id = fx.engine.submit(request("leave", "LV-1", 1)).unwrap();
    let step = current_step(&fx.engine, &id);

    assert!(matches!(
        fx.engine.suspend(&id, &actor("mona"), None),
        Err(WorkflowError::Forbidden { .. })
    ));
    fx.engine.suspend(&id, &actor("root"), Some("audit")).unwrap();
    assert!(matches!(
        fx.engine.act(&id, &step, &actor("mona"), "approve", None),
        Err(WorkflowError::Conflict(_))
    ));

    // The current step survives suspension
    let view = fx.engine.query(&id).unwrap();
    assert_eq!(view.status(), InstanceStatus::Suspended);
    assert_eq!(view.instance.current_step, Some(step));
}

#[test]
fn resume_shifts_due_dates_by_suspended_time() {
    let fx = fixture(EngineConfig::default());
    register_leave(&fx.engine);
    let id = fx.engine.submit(request("leave", "LV-1", 1)).unwrap();
    let step = current_step(&fx.engine, &id);
    let due = t0() + Duration::hours(8);

    fx.clock.advance(Duration::hours(2));
    fx.engine.suspend(&id, &actor("root"), None).unwrap();
    fx.clock.advance(Duration::hours(10));

    // Suspended instances are not swept
    assert_eq!(fx.engine.sweep_escalations().overdue, 0);

    fx.engine.resume(&id, &actor("root"), None).unwrap();
    let view = fx.engine.query(&id).unwrap();
    assert_eq!(view.status(), InstanceStatus::Running);
    assert_eq!(view.step(&step).unwrap().due_date, Some(due + Duration::hours(10)));
    assert_eq!(view.instance.sla_deadline, Some(due + Duration::hours(10)));
    assert!(view.instance.suspended_at.is_none());

    let resumed = view.events(HistoryEventKind::InstanceResumed)[0].clone();
    assert_eq!(resumed.changed_fields["suspended_seconds"], json!(36_000));

    fx.engine.act(&id, &step, &actor("mona"), "approve", None).unwrap();
}

// ── Variables and guarded outcomes ───────────────────────────────────

#[test]
fn variables_steer_guarded_outcomes() {
    let fx = fixture(EngineConfig::default());
    fx.engine
        .register_definition(
            WorkflowDefinition::new(tenant(), EntityType::new("invoice"), "Invoice")
                .with_step(
                    WorkflowStepDefinition::new("clerk", "Clerk", AssignmentRule::actor("bob"))
                        .with_outcome(
                            OutcomeRule::goto("approve", StepId::new("cfo")).when("amount > 10000"),
                        )
                        .with_outcome(OutcomeRule::complete("approve"))
                        .with_outcome(OutcomeRule::reject("reject")),
                )
                .with_step(WorkflowStepDefinition::new(
                    "cfo",
                    "CFO",
                    AssignmentRule::derived(DerivedAssignee::Variable {
                        name: "cfo".into(),
                    }),
                )),
        )
        .unwrap();

    let small = fx.engine.submit(request("invoice", "INV-1", 200)).unwrap();
    let step = current_step(&fx.engine, &small);
    let view = fx.engine.act(&small, &step, &actor("bob"), "approve", None).unwrap();
    assert_eq!(view.status(), InstanceStatus::Completed);

    let large = fx.engine.submit(request("invoice", "INV-2", 50_000)).unwrap();
    fx.engine
        .set_variable(&large, VariableScope::Instance, "cfo", json!("carla"), &actor("bob"))
        .unwrap();
    let step = current_step(&fx.engine, &large);
    let view = fx
        .engine
        .act_with(
            ActRequest::new(large.clone(), step.clone(), actor("bob"), "approve")
                .with_variable("checked", true)
                .with_step_variable("scratch", "temp"),
        )
        .unwrap();
    assert_eq!(view.status(), InstanceStatus::Running);

    let cfo_step = view.current_step().unwrap();
    assert_eq!(cfo_step.assigned_to, Some(actor("carla")));
    assert!(view.variables.iter().any(|v| v.key == "checked"));
    // Step variables are dropped with their step
    assert!(!view.variables.iter().any(|v| v.key == "scratch"));
}

// ── Replay and the ERROR path ────────────────────────────────────────

#[test]
fn replay_matches_stored_state() {
    let fx = fixture(EngineConfig::default());
    register_leave(&fx.engine);
    let id = fx.engine.submit(request("leave", "LV-1", 1)).unwrap();

    let replayed = fx.engine.replay(&id).unwrap();
    let view = fx.engine.query(&id).unwrap();
    assert_eq!(replayed.status, view.status());
    assert_eq!(replayed.current_step, view.instance.current_step);

    let step = current_step(&fx.engine, &id);
    fx.engine.act(&id, &step, &actor("mona"), "approve", None).unwrap();
    let view = fx.engine.query(&id).unwrap();
    let replayed = view.replay();
    assert_eq!(replayed.status, InstanceStatus::Completed);
    assert_eq!(replayed.current_step, None);
    assert_eq!(replayed.sequence, view.history.last().unwrap().sequence);

    let sequences: Vec<u64> = view.history.iter().map(|e| e.sequence).collect();
    let expected: Vec<u64> = (1..=sequences.len() as u64).collect();
    assert_eq!(sequences, expected);
}

#[test]
fn broken_invariant_moves_instance_to_error() {
    let fx = fixture(EngineConfig::default());
    register_leave(&fx.engine);
    let id = fx.engine.submit(request("leave", "LV-1", 1)).unwrap();
    let step = current_step(&fx.engine, &id);

    // Corrupt the record: a second ACTIVE step
    fx.engine
        .store()
        .update(&id, |record| {
            let mut rogue = record.steps[0].clone();
            rogue.id = approval_types::StepInstanceId::generate();
            record.steps.push(rogue);
            Ok(())
        })
        .unwrap();

    let result = fx.engine.act(&id, &step, &actor("mona"), "approve", None);
    assert!(matches!(result, Err(WorkflowError::InvariantViolation { .. })));

    let view = fx.engine.query(&id).unwrap();
    assert_eq!(view.status(), InstanceStatus::Error);
    assert!(view.instance.error_reason.is_some());
    assert!(view.steps.iter().all(|s| s.status == StepStatus::Error));
    assert_eq!(view.events(HistoryEventKind::InstanceFailed).len(), 1);

    // ERROR instances do not block re-submission
    fx.engine.submit(request("leave", "LV-1", 1)).unwrap();
}

#[test]
fn unresolvable_first_step_still_returns_instance() {
    let fx = fixture(EngineConfig::default());
    fx.engine
        .register_definition(
            WorkflowDefinition::new(tenant(), EntityType::new("quote"), "Quote").with_step(
                WorkflowStepDefinition::new("legal", "Legal", AssignmentRule::role("legal")),
            ),
        )
        .unwrap();

    let id = fx.engine.submit(request("quote", "Q-9", 1)).unwrap();
    let view = fx.engine.query(&id).unwrap();
    assert_eq!(view.status(), InstanceStatus::Error);
    assert!(view
        .instance
        .error_reason
        .as_deref()
        .unwrap()
        .contains("legal"));
}

#[test]
fn running_instances_keep_their_definition_version() {
    let fx = fixture(EngineConfig::default());
    register_leave(&fx.engine);
    let id = fx.engine.submit(request("leave", "LV-1", 1)).unwrap();
    let v1 = fx.engine.query(&id).unwrap().instance.definition_id.clone();

    fx.engine
        .register_definition(
            WorkflowDefinition::new(tenant(), EntityType::new("leave"), "Leave").with_step(
                WorkflowStepDefinition::new("hr", "HR", AssignmentRule::actor("hank")),
            ),
        )
        .unwrap();
    fx.engine.disable_definition(&v1).unwrap();

    let step = current_step(&fx.engine, &id);
    let view = fx.engine.act(&id, &step, &actor("mona"), "approve", None).unwrap();
    assert_eq!(view.status(), InstanceStatus::Completed);
    assert_eq!(view.instance.definition_version, 1);

    let next = fx.engine.submit(request("leave", "LV-2", 1)).unwrap();
    let next = fx.engine.query(&next).unwrap();
    assert_eq!(next.instance.definition_version, 2);
    assert_eq!(next.steps[0].assigned_to, Some(actor("hank")));
}
