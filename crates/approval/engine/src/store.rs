//! Instance store: the unit of work for every state mutation
//!
//! Each instance lives in one [`InstanceRecord`] holding the instance,
//! its step instances, tasks, variables and history. A mutation runs
//! against a copy of the record while the entry is exclusively locked and
//! is committed only when it succeeds (or when it fails fatally and has
//! moved the instance to ERROR). State and history therefore always
//! commit together, and two writers on one instance never interleave.

use approval_types::{
    ErrorKind, EntityType, HistoryEvent, HistoryEventKind, InstanceStatus, StatusChange,
    StepInstanceId, TenantId, VariableSet, WorkflowError, WorkflowInstance, WorkflowInstanceId,
    WorkflowResult, WorkflowStepInstance, WorkflowTask,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Everything the engine owns about one instance
#[derive(Clone, Debug)]
pub struct InstanceRecord {
    pub instance: WorkflowInstance,
    pub steps: Vec<WorkflowStepInstance>,
    pub tasks: Vec<WorkflowTask>,
    pub variables: VariableSet,
    history: Vec<HistoryEvent>,
    next_sequence: u64,
}

impl InstanceRecord {
    /// Wrap a fresh DRAFT instance, seeding variables from its form data
    pub fn new(instance: WorkflowInstance, now: DateTime<Utc>) -> Self {
        let variables = VariableSet::seeded(&instance.form_data, &instance.initiator, now);
        let initiator = instance.initiator.clone();
        let fields = instance.form_data.clone();

        let mut record = Self {
            instance,
            steps: Vec::new(),
            tasks: Vec::new(),
            variables,
            history: Vec::new(),
            next_sequence: 1,
        };

        let mut created = HistoryEvent::new(HistoryEventKind::InstanceCreated, initiator)
            .with_change(StatusChange::Instance {
                from: None,
                to: InstanceStatus::Draft,
            });
        created.changed_fields = fields;
        record.record(created, now);
        record
    }

    /// Append a history event, assigning the next sequence number
    pub fn record(&mut self, mut event: HistoryEvent, now: DateTime<Utc>) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        event.sequence = sequence;
        event.instance_id = self.instance.id.clone();
        event.recorded_at = now;
        self.history.push(event);
        self.instance.updated_at = now;
        sequence
    }

    /// Events in sequence order
    pub fn history(&self) -> &[HistoryEvent] {
        &self.history
    }

    pub fn last_sequence(&self) -> u64 {
        self.next_sequence - 1
    }

    pub fn step(&self, id: &StepInstanceId) -> Option<&WorkflowStepInstance> {
        self.steps.iter().find(|s| &s.id == id)
    }

    pub fn step_mut(&mut self, id: &StepInstanceId) -> Option<&mut WorkflowStepInstance> {
        self.steps.iter_mut().find(|s| &s.id == id)
    }

    /// The task of a step instance
    pub fn task(&self, step: &StepInstanceId) -> Option<&WorkflowTask> {
        self.tasks.iter().find(|t| &t.step_instance_id == step)
    }

    pub fn task_mut(&mut self, step: &StepInstanceId) -> Option<&mut WorkflowTask> {
        self.tasks.iter_mut().find(|t| &t.step_instance_id == step)
    }

    pub fn active_steps(&self) -> impl Iterator<Item = &WorkflowStepInstance> {
        self.steps.iter().filter(|s| s.is_active())
    }

    /// The step validated against the cached pointer
    pub fn current_step(&self) -> Option<&WorkflowStepInstance> {
        let id = self.instance.current_step.as_ref()?;
        self.step(id).filter(|s| s.is_active())
    }

    pub fn next_ordinal(&self) -> u32 {
        self.steps.iter().map(|s| s.ordinal).max().unwrap_or(0) + 1
    }
}

/// (tenant, entity type, entity id)
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EntityKey {
    pub tenant_id: TenantId,
    pub entity_type: EntityType,
    pub entity_id: String,
}

impl EntityKey {
    pub fn new(tenant_id: TenantId, entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        Self {
            tenant_id,
            entity_type,
            entity_id: entity_id.into(),
        }
    }

    pub fn of(instance: &WorkflowInstance) -> Self {
        Self::new(
            instance.tenant_id.clone(),
            instance.entity_type.clone(),
            instance.entity_id.clone(),
        )
    }
}

/// Concurrent store of instance records.
///
/// Lock order is entity index first, then records. Closures passed to
/// [`InstanceStore::update`] and [`InstanceStore::scan`] must not call
/// back into the store.
#[derive(Default)]
pub struct InstanceStore {
    records: DashMap<WorkflowInstanceId, InstanceRecord>,
    by_entity: DashMap<EntityKey, Vec<WorkflowInstanceId>>,
}

impl InstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new record after `decide` has seen the entity's existing
    /// instances. The entity entry stays locked in between, so two
    /// submissions for one entity are decided one after the other.
    pub fn admit<T>(
        &self,
        record: InstanceRecord,
        decide: impl FnOnce(&[WorkflowInstance]) -> WorkflowResult<T>,
    ) -> WorkflowResult<T> {
        let key = EntityKey::of(&record.instance);
        let mut entry = self.by_entity.entry(key).or_default();

        let existing: Vec<WorkflowInstance> = entry
            .iter()
            .filter_map(|id| self.records.get(id).map(|r| r.instance.clone()))
            .collect();
        let decision = decide(&existing)?;

        let id = record.instance.id.clone();
        self.records.insert(id.clone(), record);
        entry.push(id);
        Ok(decision)
    }

    /// Run a mutation as one unit of work.
    ///
    /// The closure edits a copy of the record. The copy replaces the
    /// stored record when the closure returns `Ok` or a fatal error;
    /// any other error leaves the stored record untouched.
    pub fn update<T>(
        &self,
        id: &WorkflowInstanceId,
        f: impl FnOnce(&mut InstanceRecord) -> WorkflowResult<T>,
    ) -> WorkflowResult<T> {
        let mut entry = self
            .records
            .get_mut(id)
            .ok_or_else(|| WorkflowError::InstanceNotFound(id.clone()))?;

        let mut draft = entry.clone();
        let result = f(&mut draft);

        let commit = match &result {
            Ok(_) => true,
            Err(e) => e.kind() == ErrorKind::Fatal,
        };
        if commit {
            *entry = draft;
        }
        result
    }

    /// A snapshot of one record
    pub fn get(&self, id: &WorkflowInstanceId) -> WorkflowResult<InstanceRecord> {
        self.records
            .get(id)
            .map(|r| r.clone())
            .ok_or_else(|| WorkflowError::InstanceNotFound(id.clone()))
    }

    pub fn contains(&self, id: &WorkflowInstanceId) -> bool {
        self.records.contains_key(id)
    }

    /// Instances of one entity, oldest first
    pub fn for_entity(&self, key: &EntityKey) -> Vec<WorkflowInstance> {
        let ids = self
            .by_entity
            .get(key)
            .map(|ids| ids.clone())
            .unwrap_or_default();

        let mut instances: Vec<WorkflowInstance> = ids
            .iter()
            .filter_map(|id| self.records.get(id).map(|r| r.instance.clone()))
            .collect();
        instances.sort_by_key(|i| i.created_at);
        instances
    }

    /// Ids of instances in a status
    pub fn ids_with_status(&self, status: InstanceStatus) -> Vec<WorkflowInstanceId> {
        self.records
            .iter()
            .filter(|r| r.instance.status == status)
            .map(|r| r.key().clone())
            .collect()
    }

    /// Collect from every record
    pub fn scan<T>(&self, mut f: impl FnMut(&InstanceRecord) -> Option<T>) -> Vec<T> {
        self.records.iter().filter_map(|r| f(r.value())).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
