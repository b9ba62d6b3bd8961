//! Notification templates
//!
//! Templates use `{{name}}` placeholders filled from the request's
//! variables. Unknown placeholders render as empty text.

use crate::error::{NotifyError, NotifyResult};
use approval_types::FieldMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const TEMPLATE_TASK_ASSIGNED: &str = "task_assigned";
pub const TEMPLATE_TASK_REMINDER: &str = "task_reminder";
pub const TEMPLATE_TASK_ESCALATED: &str = "task_escalated";
pub const TEMPLATE_TASK_DELEGATED: &str = "task_delegated";
pub const TEMPLATE_INSTANCE_FINISHED: &str = "instance_finished";

/// A subject/body template pair
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub subject: String,
    pub body: String,
}

impl Template {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
        }
    }

    pub fn render(&self, variables: &FieldMap) -> RenderedContent {
        RenderedContent {
            subject: substitute(&self.subject, variables),
            body: substitute(&self.body, variables),
        }
    }
}

/// Content handed to a transport
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedContent {
    pub subject: String,
    pub body: String,
}

impl RenderedContent {
    /// Plain content used when the named template cannot be rendered
    pub fn plain(template: &str, variables: &FieldMap) -> Self {
        let details = variables
            .iter()
            .map(|(k, v)| format!("{}: {}", k, display_value(v)))
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            subject: template.replace('_', " "),
            body: details,
        }
    }
}

/// Named templates, seeded with the engine's built-in notices
pub struct TemplateRegistry {
    templates: RwLock<HashMap<String, Template>>,
}

impl TemplateRegistry {
    /// An empty registry
    pub fn empty() -> Self {
        Self {
            templates: RwLock::new(HashMap::new()),
        }
    }

    /// A registry holding the built-in templates
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register(
            TEMPLATE_TASK_ASSIGNED,
            Template::new(
                "Approval needed: {{entity_reference}}",
                "{{step_name}} for {{entity_type}} {{entity_reference}} is waiting for you. Due: {{due_date}}",
            ),
        );
        registry.register(
            TEMPLATE_TASK_REMINDER,
            Template::new(
                "Reminder: {{entity_reference}}",
                "{{step_name}} for {{entity_reference}} is still waiting for your decision. Due: {{due_date}}",
            ),
        );
        registry.register(
            TEMPLATE_TASK_ESCALATED,
            Template::new(
                "Escalated: {{entity_reference}}",
                "{{step_name}} for {{entity_reference}} is overdue and has been escalated to you.",
            ),
        );
        registry.register(
            TEMPLATE_TASK_DELEGATED,
            Template::new(
                "Delegated to you: {{entity_reference}}",
                "{{delegated_from}} delegated {{step_name}} for {{entity_reference}} to you.",
            ),
        );
        registry.register(
            TEMPLATE_INSTANCE_FINISHED,
            Template::new(
                "{{entity_reference}} {{status}}",
                "Your {{entity_type}} {{entity_reference}} finished with status {{status}}. {{comments}}",
            ),
        );
        registry
    }

    /// Register or replace a template
    pub fn register(&self, name: impl Into<String>, template: Template) {
        self.templates.write().insert(name.into(), template);
    }

    pub fn get(&self, name: &str) -> Option<Template> {
        self.templates.read().get(name).cloned()
    }

    pub fn render(&self, name: &str, variables: &FieldMap) -> NotifyResult<RenderedContent> {
        let templates = self.templates.read();
        let template = templates
            .get(name)
            .ok_or_else(|| NotifyError::TemplateNotFound(name.to_string()))?;
        Ok(template.render(variables))
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn substitute(text: &str, variables: &FieldMap) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                if let Some(value) = variables.get(key) {
                    out.push_str(&display_value(value));
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}

fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
