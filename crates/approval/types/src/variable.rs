//! Workflow variables
//!
//! INSTANCE-scoped variables live as long as the instance and are visible
//! to condition evaluation and every later step. STEP-scoped variables are
//! private to one step instance and are dropped from the live set once the
//! step finishes; their writes remain in history.

use crate::{ActorId, StepInstanceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field name → JSON value, ordered for stable history output
pub type FieldMap = BTreeMap<String, serde_json::Value>;

/// Visibility of a variable
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "step", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VariableScope {
    Instance,
    Step(StepInstanceId),
}

impl std::fmt::Display for VariableScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Instance => write!(f, "INSTANCE"),
            Self::Step(step) => write!(f, "STEP({})", step),
        }
    }
}

/// A single scoped variable
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowVariable {
    pub key: String,
    pub value: serde_json::Value,
    pub scope: VariableScope,
    pub set_by: ActorId,
    pub updated_at: DateTime<Utc>,
}

/// Live variables of one instance
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct VariableSet {
    instance: BTreeMap<String, WorkflowVariable>,
    step: BTreeMap<StepInstanceId, BTreeMap<String, WorkflowVariable>>,
}

impl VariableSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed INSTANCE variables from submitted form fields
    pub fn seeded(fields: &FieldMap, actor: &ActorId, now: DateTime<Utc>) -> Self {
        let mut set = Self::new();
        for (key, value) in fields {
            set.set(VariableScope::Instance, key, value.clone(), actor, now);
        }
        set
    }

    /// Set a variable, returning the previous value
    pub fn set(
        &mut self,
        scope: VariableScope,
        key: impl Into<String>,
        value: serde_json::Value,
        actor: &ActorId,
        now: DateTime<Utc>,
    ) -> Option<serde_json::Value> {
        let key = key.into();
        let variable = WorkflowVariable {
            key: key.clone(),
            value,
            scope: scope.clone(),
            set_by: actor.clone(),
            updated_at: now,
        };
        let map = match scope {
            VariableScope::Instance => &mut self.instance,
            VariableScope::Step(step) => self.step.entry(step).or_default(),
        };
        map.insert(key, variable).map(|old| old.value)
    }

    pub fn get(&self, scope: &VariableScope, key: &str) -> Option<&WorkflowVariable> {
        match scope {
            VariableScope::Instance => self.instance.get(key),
            VariableScope::Step(step) => self.step.get(step).and_then(|m| m.get(key)),
        }
    }

    /// Drop a finished step's private variables
    pub fn discard_step(&mut self, step: &StepInstanceId) -> usize {
        self.step.remove(step).map(|m| m.len()).unwrap_or(0)
    }

    /// INSTANCE variables as a flat field map
    pub fn instance_fields(&self) -> FieldMap {
        self.instance
            .iter()
            .map(|(k, v)| (k.clone(), v.value.clone()))
            .collect()
    }

    /// INSTANCE variables overlaid with one step's private variables
    pub fn fields_for_step(&self, step: &StepInstanceId) -> FieldMap {
        let mut fields = self.instance_fields();
        if let Some(private) = self.step.get(step) {
            for (k, v) in private {
                fields.insert(k.clone(), v.value.clone());
            }
        }
        fields
    }

    /// All live variables
    pub fn all(&self) -> Vec<&WorkflowVariable> {
        self.instance
            .values()
            .chain(self.step.values().flat_map(|m| m.values()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_seeded_from_form_data() {
        let mut fields = FieldMap::new();
        fields.insert("amount".into(), json!(1200));
        let set = VariableSet::seeded(&fields, &ActorId::new("alice"), Utc::now());

        let var = set.get(&VariableScope::Instance, "amount").unwrap();
        assert_eq!(var.value, json!(1200));
        assert_eq!(var.set_by, ActorId::new("alice"));
    }

    #[test]
    fn test_step_scope_is_private_and_discardable() {
        let mut set = VariableSet::new();
        let actor = ActorId::new("bob");
        let s1 = StepInstanceId::new("s1");
        let s2 = StepInstanceId::new("s2");
        let now = Utc::now();

        set.set(VariableScope::Instance, "region", json!("EU"), &actor, now);
        set.set(VariableScope::Step(s1.clone()), "note", json!("checked"), &actor, now);

        assert!(set.fields_for_step(&s1).contains_key("note"));
        assert!(!set.fields_for_step(&s2).contains_key("note"));
        assert!(!set.instance_fields().contains_key("note"));

        assert_eq!(set.discard_step(&s1), 1);
        assert!(set.get(&VariableScope::Step(s1), "note").is_none());
        assert_eq!(set.all().len(), 1);
    }

    #[test]
    fn test_set_returns_previous() {
        let mut set = VariableSet::new();
        let actor = ActorId::new("bob");
        let now = Utc::now();
        assert!(set.set(VariableScope::Instance, "k", json!(1), &actor, now).is_none());
        assert_eq!(
            set.set(VariableScope::Instance, "k", json!(2), &actor, now),
            Some(json!(1))
        );
    }
}
