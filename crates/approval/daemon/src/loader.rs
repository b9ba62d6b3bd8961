//! Startup data: workflow definitions and the actor directory

use crate::error::{DaemonError, DaemonResult};
use approval_engine::TenantDirectory;
use approval_types::{TenantId, WorkflowDefinition};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::Path;

fn read_json<T: DeserializeOwned>(path: &Path) -> DaemonResult<T> {
    let display = path.display().to_string();
    let text = std::fs::read_to_string(path).map_err(|source| DaemonError::Io {
        path: display.clone(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| DaemonError::Json {
        path: display,
        source,
    })
}

/// Read a JSON array of workflow definitions
pub fn load_definitions(path: impl AsRef<Path>) -> DaemonResult<Vec<WorkflowDefinition>> {
    let definitions: Vec<WorkflowDefinition> = read_json(path.as_ref())?;
    tracing::debug!(
        path = %path.as_ref().display(),
        count = definitions.len(),
        "Definitions file read"
    );
    Ok(definitions)
}

/// Read a JSON object mapping tenant ids to their directory data
pub fn load_directory(path: impl AsRef<Path>) -> DaemonResult<HashMap<TenantId, TenantDirectory>> {
    let tenants: HashMap<TenantId, TenantDirectory> = read_json(path.as_ref())?;
    tracing::debug!(
        path = %path.as_ref().display(),
        tenants = tenants.len(),
        "Directory file read"
    );
    Ok(tenants)
}
