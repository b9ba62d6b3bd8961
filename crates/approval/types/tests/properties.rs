//! Properties of escalation stage selection and history replay

use approval_types::{
    ActorId, EscalationPolicy, EscalationStage, HistoryEvent, HistoryEventKind, InstanceStatus,
    ReplayedState, StatusChange, StepId, StepInstanceId, StepStatus,
};
use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

fn policy(offsets: &[i64]) -> EscalationPolicy {
    let mut sorted = offsets.to_vec();
    sorted.sort_unstable();
    sorted
        .into_iter()
        .fold(EscalationPolicy::new(), |p, offset| {
            p.with_stage(EscalationStage::new(
                offset,
                approval_types::EscalationAction::Remind,
            ))
        })
}

fn history(len: usize) -> Vec<HistoryEvent> {
    let mut events = Vec::with_capacity(len + 2);
    let mut push = |kind, change| {
        let mut e = HistoryEvent::new(kind, ActorId::system()).with_change(change);
        e.sequence = events.len() as u64 + 1;
        events.push(e);
    };
    push(
        HistoryEventKind::InstanceCreated,
        StatusChange::Instance {
            from: None,
            to: InstanceStatus::Draft,
        },
    );
    push(
        HistoryEventKind::InstanceStarted,
        StatusChange::Instance {
            from: Some(InstanceStatus::Draft),
            to: InstanceStatus::Running,
        },
    );
    for i in 0..len {
        let id = StepInstanceId::new(format!("s{}", i));
        push(
            HistoryEventKind::StepActivated,
            StatusChange::Step {
                step_instance_id: id.clone(),
                step_id: StepId::new("review"),
                from: StepStatus::Pending,
                to: StepStatus::Active,
            },
        );
        push(
            HistoryEventKind::StepActed,
            StatusChange::Step {
                step_instance_id: id,
                step_id: StepId::new("review"),
                from: StepStatus::Active,
                to: StepStatus::Completed,
            },
        );
    }
    events
}

proptest! {
    #[test]
    fn due_stages_are_a_prefix_from_level(
        offsets in prop::collection::vec(-600i64..600, 0..6),
        elapsed in -720i64..720,
        level in 0u32..6,
    ) {
        let due = Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).unwrap();
        let now = due + Duration::minutes(elapsed);
        let policy = policy(&offsets);

        let fired = policy.due_stages(due, now, level);
        for (expected, (index, stage)) in (level..).zip(fired.iter()) {
            prop_assert_eq!(*index, expected);
            prop_assert!(stage.trigger_at(due) <= now);
        }

        // Stages past the fired prefix are still in the future
        let next = level as usize + fired.len();
        if let Some(stage) = policy.stages.get(next) {
            prop_assert!(stage.trigger_at(due) > now);
        }
    }

    #[test]
    fn replay_ignores_event_order(len in 0usize..6, seed in any::<u64>()) {
        let events = history(len);
        let expected = ReplayedState::from_events(&events);

        let mut shuffled = events.clone();
        let n = shuffled.len();
        let mut state = seed;
        for i in (1..n).rev() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            shuffled.swap(i, (state % (i as u64 + 1)) as usize);
        }

        prop_assert_eq!(ReplayedState::from_events(&shuffled), expected.clone());
        prop_assert_eq!(expected.status, InstanceStatus::Running);
        prop_assert_eq!(expected.current_step, None);
        prop_assert_eq!(expected.sequence, n as u64);
    }
}
