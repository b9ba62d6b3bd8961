//! Definition registry: publishes, versions and selects workflow definitions
//!
//! Definitions are immutable once published. Registering a definition
//! under an existing (tenant, entity type, name) publishes the next
//! version. Conditions are parsed here, once, and kept alongside the
//! definition so selection never re-parses.

use approval_condition::{Condition, FieldSource};
use approval_types::{
    EntityType, OutcomeRule, StepId, TenantId, WorkflowDefinition, WorkflowDefinitionId,
    WorkflowError, WorkflowResult,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// A published definition with its conditions compiled
#[derive(Clone, Debug)]
pub struct PublishedDefinition {
    pub definition: WorkflowDefinition,
    trigger: Condition,
    /// Guards aligned with each step's explicit outcome rules
    guards: HashMap<StepId, Vec<Option<Condition>>>,
}

impl PublishedDefinition {
    fn compile(definition: WorkflowDefinition) -> WorkflowResult<Self> {
        let trigger = parse_condition(&definition.trigger_condition)?;

        let mut guards = HashMap::new();
        for step in &definition.steps {
            let compiled = step
                .outcomes
                .iter()
                .map(|rule| rule.when.as_deref().map(parse_condition).transpose())
                .collect::<WorkflowResult<Vec<_>>>()?;
            guards.insert(step.id.clone(), compiled);
        }

        Ok(Self {
            definition,
            trigger,
            guards,
        })
    }

    pub fn id(&self) -> &WorkflowDefinitionId {
        &self.definition.id
    }

    pub fn trigger(&self) -> &Condition {
        &self.trigger
    }

    /// Whether the definition applies to submitted fields
    pub fn matches<S: FieldSource + ?Sized>(&self, fields: &S) -> bool {
        self.trigger.evaluate(fields)
    }

    /// Whether any outcome rule of the step answers `action`
    pub fn knows_action(&self, step: &StepId, action: &str) -> bool {
        self.definition
            .outcome_rules(step)
            .iter()
            .any(|rule| rule.action == action)
    }

    /// The first rule for `action` whose guard holds over `fields`
    pub fn resolve_outcome<S: FieldSource + ?Sized>(
        &self,
        step: &StepId,
        action: &str,
        fields: &S,
    ) -> Option<OutcomeRule> {
        let rules = self.definition.outcome_rules(step);
        let guards = self.guards.get(step);

        rules.into_iter().enumerate().find_map(|(index, rule)| {
            if rule.action != action {
                return None;
            }
            let guard = guards.and_then(|g| g.get(index)).and_then(Option::as_ref);
            match guard {
                Some(condition) if !condition.evaluate(fields) => None,
                _ => Some(rule),
            }
        })
    }
}

fn parse_condition(source: &str) -> WorkflowResult<Condition> {
    Condition::parse(source).map_err(|e| WorkflowError::InvalidCondition {
        condition: source.to_string(),
        reason: e.to_string(),
    })
}

type NameKey = (TenantId, EntityType, String);
type EntityKey = (TenantId, EntityType);

#[derive(Default)]
struct RegistryInner {
    definitions: HashMap<WorkflowDefinitionId, Arc<PublishedDefinition>>,
    /// (tenant, entity type, name) → versions in publish order
    by_name: HashMap<NameKey, Vec<WorkflowDefinitionId>>,
    /// (tenant, entity type) → every version
    by_entity: HashMap<EntityKey, Vec<WorkflowDefinitionId>>,
}

/// Registry of published workflow definitions
#[derive(Default)]
pub struct DefinitionRegistry {
    inner: RwLock<RegistryInner>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate, version and publish a definition
    pub fn publish(
        &self,
        mut definition: WorkflowDefinition,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Arc<PublishedDefinition>> {
        definition.validate()?;

        let mut inner = self.inner.write();
        if inner.definitions.contains_key(&definition.id) {
            return Err(WorkflowError::InvalidDefinition(format!(
                "definition {} is already published; register a new version instead",
                definition.id
            )));
        }

        let name_key = (
            definition.tenant_id.clone(),
            definition.entity_type.clone(),
            definition.name.clone(),
        );
        let latest = inner
            .by_name
            .get(&name_key)
            .and_then(|ids| ids.last())
            .and_then(|id| inner.definitions.get(id))
            .map(|p| p.definition.version)
            .unwrap_or(0);

        definition.version = latest + 1;
        definition.published_at = Some(now);
        definition.enabled = true;

        let published = Arc::new(PublishedDefinition::compile(definition)?);
        let id = published.id().clone();
        let entity_key = (
            published.definition.tenant_id.clone(),
            published.definition.entity_type.clone(),
        );

        inner.definitions.insert(id.clone(), published.clone());
        inner.by_name.entry(name_key).or_default().push(id.clone());
        inner.by_entity.entry(entity_key).or_default().push(id.clone());

        tracing::info!(
            definition_id = %id,
            name = %published.definition.name,
            version = published.definition.version,
            entity_type = %published.definition.entity_type,
            priority = published.definition.trigger_priority,
            "Workflow definition published"
        );
        Ok(published)
    }

    /// Remove a definition from selection; running instances keep using it
    pub fn disable(&self, id: &WorkflowDefinitionId) -> WorkflowResult<()> {
        let mut inner = self.inner.write();
        let current = inner
            .definitions
            .get(id)
            .ok_or_else(|| WorkflowError::DefinitionNotFound(id.clone()))?;

        let mut updated = (**current).clone();
        updated.definition.enabled = false;
        inner.definitions.insert(id.clone(), Arc::new(updated));

        tracing::info!(definition_id = %id, "Workflow definition disabled");
        Ok(())
    }

    pub fn get(&self, id: &WorkflowDefinitionId) -> WorkflowResult<Arc<PublishedDefinition>> {
        self.inner
            .read()
            .definitions
            .get(id)
            .cloned()
            .ok_or_else(|| WorkflowError::DefinitionNotFound(id.clone()))
    }

    /// Every version published under a name, oldest first
    pub fn versions(
        &self,
        tenant: &TenantId,
        entity_type: &EntityType,
        name: &str,
    ) -> Vec<Arc<PublishedDefinition>> {
        let inner = self.inner.read();
        let key = (tenant.clone(), entity_type.clone(), name.to_string());
        inner
            .by_name
            .get(&key)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.definitions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn list(&self) -> Vec<Arc<PublishedDefinition>> {
        self.inner.read().definitions.values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.inner.read().definitions.len()
    }

    /// Pick the applicable definition. Only the newest enabled version of
    /// each name takes part; among those whose trigger holds, the highest
    /// priority wins and the most recently published breaks ties.
    pub fn select<S: FieldSource + ?Sized>(
        &self,
        tenant: &TenantId,
        entity_type: &EntityType,
        fields: &S,
    ) -> WorkflowResult<Arc<PublishedDefinition>> {
        let inner = self.inner.read();
        let key = (tenant.clone(), entity_type.clone());

        // Superseded versions stay reachable through `get` for pinned
        // instances but never start new ones
        let mut current: HashMap<&str, &Arc<PublishedDefinition>> = HashMap::new();
        for published in inner
            .by_entity
            .get(&key)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.definitions.get(id))
            .filter(|p| p.definition.is_selectable())
        {
            let entry = current
                .entry(published.definition.name.as_str())
                .or_insert(published);
            if published.definition.version > entry.definition.version {
                *entry = published;
            }
        }

        let selected = current
            .into_values()
            .filter(|p| p.matches(fields))
            .max_by(|a, b| {
                a.definition
                    .trigger_priority
                    .cmp(&b.definition.trigger_priority)
                    .then_with(|| a.definition.published_at.cmp(&b.definition.published_at))
                    .then_with(|| a.definition.version.cmp(&b.definition.version))
            })
            .cloned();

        match selected {
            Some(published) => {
                tracing::debug!(
                    definition_id = %published.id(),
                    entity_type = %entity_type,
                    "Definition selected"
                );
                Ok(published)
            }
            None => Err(WorkflowError::NoDefinitionMatched {
                tenant_id: tenant.clone(),
                entity_type: entity_type.clone(),
            }),
        }
    }
}
