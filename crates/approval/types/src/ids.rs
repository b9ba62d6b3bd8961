//! Identifiers used throughout the approval engine
//!
//! All identifiers are opaque strings. Engine-owned identifiers
//! (instances, step instances, tasks, definitions) are generated as
//! UUIDv4; identifiers owned by collaborating modules (tenants, actors,
//! roles, entity types) are passed through unchanged.

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

macro_rules! generated_id {
    ($(#[$meta:meta])* $name:ident) => {
        string_id!($(#[$meta])* $name);

        impl $name {
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn short(&self) -> &str {
                &self.0[..8.min(self.0.len())]
            }
        }
    };
}

string_id!(
    /// Tenant that owns definitions and instances
    TenantId
);

string_id!(
    /// A human or system actor that can act on tasks
    ActorId
);

string_id!(
    /// A role held by actors within a tenant
    RoleId
);

string_id!(
    /// Business entity type a definition applies to (e.g. `leave_request`)
    EntityType
);

string_id!(
    /// Step identifier, unique within one workflow definition
    StepId
);

generated_id!(
    /// Unique identifier for a workflow definition version
    WorkflowDefinitionId
);

generated_id!(
    /// Unique identifier for a workflow instance
    WorkflowInstanceId
);

generated_id!(
    /// Unique identifier for a step instance
    StepInstanceId
);

generated_id!(
    /// Unique identifier for a task
    TaskId
);

generated_id!(
    /// Unique identifier for a queued notification
    NotificationId
);

impl ActorId {
    /// The actor recorded for engine-initiated transitions (auto-resolve, sweeps)
    pub fn system() -> Self {
        Self("system".into())
    }

    pub fn is_system(&self) -> bool {
        self.0 == "system"
    }
}
