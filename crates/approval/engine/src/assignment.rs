//! Task assignment: resolving assignment rules and authorizing actors
//!
//! Assignment is resolved once, at step activation. The result is stored
//! on the task, so later lookups (delegation, escalation, acting) never
//! re-derive a different actor from changed instance data.

use crate::directory::ActorDirectory;
use approval_types::{
    ActorId, Assignee, AssignmentRule, DerivedAssignee, FieldMap, StepId, TenantId,
    WorkflowError, WorkflowResult, WorkflowStepInstance, WorkflowTask,
};

/// Instance data an assignment rule may read
pub struct AssignmentContext<'a> {
    pub tenant_id: &'a TenantId,
    pub initiator: &'a ActorId,
    pub variables: &'a FieldMap,
}

/// Resolves [`AssignmentRule`]s against the directory
pub struct AssignmentResolver<'a> {
    directory: &'a dyn ActorDirectory,
}

impl<'a> AssignmentResolver<'a> {
    pub fn new(directory: &'a dyn ActorDirectory) -> Self {
        Self { directory }
    }

    /// Resolve a rule into a concrete actor or a claimable pool
    pub fn resolve(
        &self,
        step: &StepId,
        rule: &AssignmentRule,
        ctx: &AssignmentContext<'_>,
    ) -> WorkflowResult<Assignee> {
        match rule {
            AssignmentRule::Static { actor } => Ok(Assignee::Actor(actor.clone())),
            AssignmentRule::Role { role } => {
                let members = self.directory.role_members(ctx.tenant_id, role);
                if members.is_empty() {
                    return Err(unresolved(step, format!("role '{}' has no members", role)));
                }
                Ok(Assignee::Pool(members))
            }
            AssignmentRule::Rule { rule } => self.derive(step, rule, ctx).map(Assignee::Actor),
        }
    }

    fn derive(
        &self,
        step: &StepId,
        rule: &DerivedAssignee,
        ctx: &AssignmentContext<'_>,
    ) -> WorkflowResult<ActorId> {
        match rule {
            DerivedAssignee::Initiator => Ok(ctx.initiator.clone()),
            DerivedAssignee::InitiatorManager => self
                .directory
                .manager_of(ctx.tenant_id, ctx.initiator)
                .ok_or_else(|| {
                    unresolved(step, format!("initiator {} has no manager", ctx.initiator))
                }),
            DerivedAssignee::Variable { name } => actor_variable(step, ctx.variables, name),
            DerivedAssignee::ManagerOf { variable } => {
                let subject = actor_variable(step, ctx.variables, variable)?;
                self.directory
                    .manager_of(ctx.tenant_id, &subject)
                    .ok_or_else(|| unresolved(step, format!("{} has no manager", subject)))
            }
        }
    }
}

fn actor_variable(step: &StepId, variables: &FieldMap, name: &str) -> WorkflowResult<ActorId> {
    variables
        .get(name)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(ActorId::new)
        .ok_or_else(|| unresolved(step, format!("variable '{}' does not name an actor", name)))
}

fn unresolved(step: &StepId, reason: String) -> WorkflowError {
    WorkflowError::AssignmentUnresolved {
        step: step.to_string(),
        reason,
    }
}

// ── Authorization ────────────────────────────────────────────────────

/// Why an actor may act on a step
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Authority {
    /// Tenant administrator override
    Admin,
    /// The actor the step was delegated to
    Delegate,
    /// Backup added by escalation
    Backup,
    /// The single assignee
    Assignee,
    /// Pool candidate; `implicit_claim` when the task is not yet claimed
    Claimant { implicit_claim: bool },
}

/// Decide whether `actor` may act on (or claim) an active step
pub fn authorize(
    step: &WorkflowStepInstance,
    task: Option<&WorkflowTask>,
    actor: &ActorId,
    is_admin: bool,
    operation: &str,
) -> WorkflowResult<Authority> {
    if is_admin {
        return Ok(Authority::Admin);
    }

    let forbidden = || WorkflowError::forbidden_step(actor, &step.id, operation);

    if step.escalated_to.contains(actor) {
        return Ok(Authority::Backup);
    }

    if let Some(delegate) = &step.delegated_to {
        return if delegate == actor {
            Ok(Authority::Delegate)
        } else {
            Err(forbidden())
        };
    }

    let Some(task) = task else {
        return match &step.assigned_to {
            Some(assignee) if assignee == actor => Ok(Authority::Assignee),
            _ => Err(forbidden()),
        };
    };

    match &task.assignee {
        Assignee::Actor(assignee) if assignee == actor => Ok(Authority::Assignee),
        Assignee::Actor(_) => Err(forbidden()),
        Assignee::Pool(candidates) => {
            if !candidates.contains(actor) {
                return Err(forbidden());
            }
            if let Some(holder) = task.claimed_by_other(actor) {
                return Err(WorkflowError::AlreadyClaimed {
                    step: step.id.clone(),
                    claimed_by: holder.clone(),
                });
            }
            Ok(Authority::Claimant {
                implicit_claim: task.claimed_by.is_none(),
            })
        }
    }
}

/// The actor currently holding a step, if it is held by exactly one
pub fn effective_holder(step: &WorkflowStepInstance, task: Option<&WorkflowTask>) -> Option<ActorId> {
    if let Some(delegate) = &step.delegated_to {
        return Some(delegate.clone());
    }
    if let Some(claimant) = task.and_then(|t| t.claimed_by.as_ref()) {
        return Some(claimant.clone());
    }
    step.assigned_to.clone()
}

/// Everyone who should hear about the step: holder or pool, plus backups
pub fn recipients(step: &WorkflowStepInstance, task: Option<&WorkflowTask>) -> Vec<ActorId> {
    let mut recipients = match effective_holder(step, task) {
        Some(holder) => vec![holder],
        None => task
            .map(|t| t.assignee.candidates().into_iter().cloned().collect())
            .unwrap_or_default(),
    };
    for backup in &step.escalated_to {
        if !recipients.contains(backup) {
            recipients.push(backup.clone());
        }
    }
    recipients
}
