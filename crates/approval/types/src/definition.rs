//! Workflow definitions: the blueprint for an approval process
//!
//! A definition belongs to one tenant and one entity type. It carries a
//! trigger condition (evaluated against submitted fields), a priority used
//! to break ties between matching definitions, and an ordered list of steps.
//!
//! Definitions are immutable once published. To modify, register a new
//! version under the same name.

use crate::{
    ActorId, Channel, EntityType, EscalationAction, EscalationPolicy, RoleId, StepId, StepStatus,
    TenantId, WorkflowDefinitionId, WorkflowError, WorkflowResult,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Well-known action that approves a step
pub const ACTION_APPROVE: &str = "approve";
/// Well-known action that rejects a step
pub const ACTION_REJECT: &str = "reject";

// ── Workflow Definition ──────────────────────────────────────────────

/// A workflow definition: one version of an approval process
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Unique identifier of this version
    pub id: WorkflowDefinitionId,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Stable name shared by all versions
    pub name: String,
    /// Description of what this process approves
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// The entity type this definition applies to
    pub entity_type: EntityType,
    /// Version number, assigned at publish time
    #[serde(default)]
    pub version: u32,
    /// Boolean expression over entity fields; empty means always
    #[serde(default)]
    pub trigger_condition: String,
    /// Higher wins when several definitions match
    #[serde(default)]
    pub trigger_priority: i32,
    /// Ordered step definitions
    pub steps: Vec<WorkflowStepDefinition>,
    /// Disabled definitions are never selected
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Set when the definition is published
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    /// When this definition was created
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Metadata
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

fn default_true() -> bool {
    true
}

impl WorkflowDefinition {
    /// Create a new, unpublished workflow definition
    pub fn new(tenant_id: TenantId, entity_type: EntityType, name: impl Into<String>) -> Self {
        Self {
            id: WorkflowDefinitionId::generate(),
            tenant_id,
            name: name.into(),
            description: String::new(),
            entity_type,
            version: 0,
            trigger_condition: String::new(),
            trigger_priority: 0,
            steps: Vec::new(),
            enabled: true,
            published_at: None,
            created_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.trigger_condition = condition.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.trigger_priority = priority;
        self
    }

    pub fn with_step(mut self, step: WorkflowStepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Whether the definition has been published
    pub fn is_published(&self) -> bool {
        self.published_at.is_some()
    }

    /// Whether this definition takes part in selection
    pub fn is_selectable(&self) -> bool {
        self.enabled && self.is_published()
    }

    /// Get a step definition by ID
    pub fn step(&self, id: &StepId) -> Option<&WorkflowStepDefinition> {
        self.steps.iter().find(|s| &s.id == id)
    }

    /// The first step, activated on start
    pub fn first_step(&self) -> Option<&WorkflowStepDefinition> {
        self.steps.first()
    }

    /// The step following `id` in declaration order
    pub fn step_after(&self, id: &StepId) -> Option<&WorkflowStepDefinition> {
        let index = self.steps.iter().position(|s| &s.id == id)?;
        self.steps.get(index + 1)
    }

    /// Effective outcome rules for a step.
    ///
    /// Explicit rules are returned as declared. A step without rules gets
    /// the defaults: approve advances to the next step (or completes after
    /// the last one), reject terminates the instance as rejected.
    pub fn outcome_rules(&self, id: &StepId) -> Vec<OutcomeRule> {
        let Some(step) = self.step(id) else {
            return Vec::new();
        };
        if !step.outcomes.is_empty() {
            return step.outcomes.clone();
        }
        let approve = match self.step_after(id) {
            Some(next) => OutcomeRule::goto(ACTION_APPROVE, next.id.clone()),
            None => OutcomeRule::complete(ACTION_APPROVE),
        };
        vec![approve, OutcomeRule::reject(ACTION_REJECT)]
    }

    /// Validate the definition for structural correctness.
    ///
    /// Condition syntax is checked separately by the registry, which owns
    /// the parser.
    pub fn validate(&self) -> WorkflowResult<()> {
        if self.name.trim().is_empty() {
            return Err(WorkflowError::InvalidDefinition(
                "definition name must not be empty".into(),
            ));
        }

        if self.steps.is_empty() {
            return Err(WorkflowError::InvalidDefinition(
                "definition must have at least one step".into(),
            ));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(&step.id) {
                return Err(WorkflowError::InvalidDefinition(format!(
                    "duplicate step id '{}'",
                    step.id
                )));
            }
        }

        for step in &self.steps {
            for rule in &step.outcomes {
                if let Outcome::Goto { step: target } = &rule.outcome {
                    if self.step(target).is_none() {
                        return Err(WorkflowError::InvalidDefinition(format!(
                            "step '{}' outcome '{}' targets unknown step '{}'",
                            step.id, rule.action, target
                        )));
                    }
                }
                if !matches!(rule.step_status, StepStatus::Completed | StepStatus::Rejected) {
                    return Err(WorkflowError::InvalidDefinition(format!(
                        "step '{}' outcome '{}' must complete or reject the step",
                        step.id, rule.action
                    )));
                }
            }

            let actions: HashSet<String> = self
                .outcome_rules(&step.id)
                .into_iter()
                .map(|r| r.action)
                .collect();
            // The sweep walks stages in order and stops at the first future one
            if let Some(pair) = step
                .escalation
                .stages
                .windows(2)
                .find(|pair| pair[1].offset_minutes < pair[0].offset_minutes)
            {
                return Err(WorkflowError::InvalidDefinition(format!(
                    "step '{}' escalation stages must be ordered by offset ({} min comes after {} min)",
                    step.id, pair[1].offset_minutes, pair[0].offset_minutes
                )));
            }
            for stage in &step.escalation.stages {
                if let EscalationAction::AutoResolve { action } = &stage.action {
                    if !actions.contains(action) {
                        return Err(WorkflowError::InvalidDefinition(format!(
                            "step '{}' auto-resolves with unknown action '{}'",
                            step.id, action
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

// ── Step Definition ──────────────────────────────────────────────────

/// A single stage of approval within a definition
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowStepDefinition {
    /// Identifier, unique within the definition
    pub id: StepId,
    /// Human-readable name
    pub name: String,
    /// Who receives the task
    pub assignment: AssignmentRule,
    /// Hours from activation until the step is due
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sla_hours: Option<u32>,
    /// Ordered escalation chain applied by the sweep
    #[serde(default)]
    pub escalation: EscalationPolicy,
    /// Action → next step table; empty means defaults
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outcomes: Vec<OutcomeRule>,
    /// Channels used for assignment notices; empty means IN_APP only
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<Channel>,
}

impl WorkflowStepDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, assignment: AssignmentRule) -> Self {
        Self {
            id: StepId::new(id),
            name: name.into(),
            assignment,
            sla_hours: None,
            escalation: EscalationPolicy::default(),
            outcomes: Vec::new(),
            channels: Vec::new(),
        }
    }

    pub fn with_sla_hours(mut self, hours: u32) -> Self {
        self.sla_hours = Some(hours);
        self
    }

    pub fn with_escalation(mut self, escalation: EscalationPolicy) -> Self {
        self.escalation = escalation;
        self
    }

    pub fn with_outcome(mut self, rule: OutcomeRule) -> Self {
        self.outcomes.push(rule);
        self
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channels.push(channel);
        self
    }

    /// Due date for an activation at `activated_at`
    pub fn due_date(&self, activated_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.sla_hours
            .map(|hours| activated_at + Duration::hours(i64::from(hours)))
    }
}

// ── Assignment ───────────────────────────────────────────────────────

/// How a step's task is assigned
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum AssignmentRule {
    /// A fixed actor
    Static { actor: ActorId },
    /// Every actor holding a role in the tenant, as a claimable pool
    Role { role: RoleId },
    /// An actor derived from instance data at activation
    Rule { rule: DerivedAssignee },
}

impl AssignmentRule {
    pub fn actor(actor: impl Into<String>) -> Self {
        Self::Static {
            actor: ActorId::new(actor),
        }
    }

    pub fn role(role: impl Into<String>) -> Self {
        Self::Role {
            role: RoleId::new(role),
        }
    }

    pub fn derived(rule: DerivedAssignee) -> Self {
        Self::Rule { rule }
    }
}

/// Rules that compute an assignee from instance data
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DerivedAssignee {
    /// The actor who submitted the entity
    Initiator,
    /// The initiator's manager according to the directory
    InitiatorManager,
    /// The actor id stored in an instance variable
    Variable { name: String },
    /// The manager of the actor stored in an instance variable
    ManagerOf { variable: String },
}

// ── Outcome Rules ────────────────────────────────────────────────────

/// Maps an action on a step to the step's final status and what happens next
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRule {
    /// The action this rule answers (e.g. `approve`)
    pub action: String,
    /// Optional guard over instance variables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    /// Status the step takes when the rule fires
    pub step_status: StepStatus,
    /// Where the instance goes next
    pub outcome: Outcome,
}

impl OutcomeRule {
    pub fn goto(action: impl Into<String>, step: StepId) -> Self {
        Self {
            action: action.into(),
            when: None,
            step_status: StepStatus::Completed,
            outcome: Outcome::Goto { step },
        }
    }

    pub fn complete(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            when: None,
            step_status: StepStatus::Completed,
            outcome: Outcome::Complete,
        }
    }

    pub fn reject(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            when: None,
            step_status: StepStatus::Rejected,
            outcome: Outcome::Reject,
        }
    }

    pub fn when(mut self, condition: impl Into<String>) -> Self {
        self.when = Some(condition.into());
        self
    }

    pub fn with_step_status(mut self, status: StepStatus) -> Self {
        self.step_status = status;
        self
    }
}

/// What follows a step outcome
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outcome {
    /// Activate another step of the same definition
    Goto { step: StepId },
    /// Terminate the instance as COMPLETED
    Complete,
    /// Terminate the instance as REJECTED
    Reject,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EscalationStage;

    fn make_definition() -> WorkflowDefinition {
        WorkflowDefinition::new(
            TenantId::new("acme"),
            EntityType::new("leave_request"),
            "Leave approval",
        )
        .with_step(WorkflowStepDefinition::new(
            "manager",
            "Manager review",
            AssignmentRule::derived(DerivedAssignee::InitiatorManager),
        ))
        .with_step(WorkflowStepDefinition::new(
            "hr",
            "HR review",
            AssignmentRule::role("hr"),
        ))
    }

    #[test]
    fn test_default_outcome_rules() {
        let def = make_definition();

        let rules = def.outcome_rules(&StepId::new("manager"));
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].outcome, Outcome::Goto { step: StepId::new("hr") });
        assert_eq!(rules[1].outcome, Outcome::Reject);

        let rules = def.outcome_rules(&StepId::new("hr"));
        assert_eq!(rules[0].outcome, Outcome::Complete);
    }

    #[test]
    fn test_explicit_outcome_rules_replace_defaults() {
        let def = WorkflowDefinition::new(TenantId::new("t"), EntityType::new("quote"), "Quote")
            .with_step(
                WorkflowStepDefinition::new("sales", "Sales", AssignmentRule::actor("bob"))
                    .with_outcome(OutcomeRule::complete("accept"))
                    .with_outcome(OutcomeRule::reject("decline")),
            );

        let rules = def.outcome_rules(&StepId::new("sales"));
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].action, "accept");
        assert!(def.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty() {
        let def = WorkflowDefinition::new(TenantId::new("t"), EntityType::new("x"), "Empty");
        assert!(matches!(
            def.validate(),
            Err(WorkflowError::InvalidDefinition(_))
        ));
    }

    #[test]
    fn test_validate_rejects_dangling_goto() {
        let def = WorkflowDefinition::new(TenantId::new("t"), EntityType::new("x"), "Dangling")
            .with_step(
                WorkflowStepDefinition::new("a", "A", AssignmentRule::actor("bob"))
                    .with_outcome(OutcomeRule::goto("approve", StepId::new("missing"))),
            );
        let err = def.validate().unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_validate_rejects_duplicate_steps() {
        let def = WorkflowDefinition::new(TenantId::new("t"), EntityType::new("x"), "Dup")
            .with_step(WorkflowStepDefinition::new("a", "A", AssignmentRule::actor("bob")))
            .with_step(WorkflowStepDefinition::new("a", "A2", AssignmentRule::actor("eve")));
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_auto_resolve_action() {
        let def = WorkflowDefinition::new(TenantId::new("t"), EntityType::new("x"), "Auto")
            .with_step(
                WorkflowStepDefinition::new("a", "A", AssignmentRule::actor("bob"))
                    .with_sla_hours(4)
                    .with_escalation(EscalationPolicy::new().with_stage(EscalationStage::new(
                        60,
                        EscalationAction::AutoResolve {
                            action: "shrug".into(),
                        },
                    ))),
            );
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unordered_escalation_stages() {
        let def = WorkflowDefinition::new(TenantId::new("t"), EntityType::new("x"), "Chain")
            .with_step(
                WorkflowStepDefinition::new("a", "A", AssignmentRule::actor("bob"))
                    .with_sla_hours(4)
                    .with_escalation(
                        EscalationPolicy::new()
                            .with_stage(EscalationStage::escalate_after(60, AssignmentRule::role("leads")))
                            .with_stage(EscalationStage::remind_before(30)),
                    ),
            );
        let err = def.validate().unwrap_err();
        assert!(err.to_string().contains("ordered by offset"));
    }

    #[test]
    fn test_validate_accepts_equal_stage_offsets() {
        let def = WorkflowDefinition::new(TenantId::new("t"), EntityType::new("x"), "Chain")
            .with_step(
                WorkflowStepDefinition::new("a", "A", AssignmentRule::actor("bob"))
                    .with_sla_hours(4)
                    .with_escalation(
                        EscalationPolicy::new()
                            .with_stage(EscalationStage::remind_before(30))
                            .with_stage(EscalationStage::new(0, EscalationAction::Remind))
                            .with_stage(EscalationStage::escalate_after(0, AssignmentRule::role("leads"))),
                    ),
            );
        assert!(def.validate().is_ok());
    }

    #[test]
    fn test_due_date() {
        let step = WorkflowStepDefinition::new("a", "A", AssignmentRule::actor("bob"))
            .with_sla_hours(2);
        let now = Utc::now();
        assert_eq!(step.due_date(now), Some(now + Duration::hours(2)));

        let open = WorkflowStepDefinition::new("b", "B", AssignmentRule::actor("bob"));
        assert_eq!(open.due_date(now), None);
    }

    #[test]
    fn test_assignment_serde_tagging() {
        let rule = AssignmentRule::role("finance");
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["strategy"], "role");
        assert_eq!(json["role"], "finance");

        let derived: AssignmentRule =
            serde_json::from_str(r#"{"strategy":"rule","rule":{"kind":"initiator_manager"}}"#)
                .unwrap();
        assert_eq!(
            derived,
            AssignmentRule::derived(DerivedAssignee::InitiatorManager)
        );
    }
}
