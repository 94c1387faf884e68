use autogen_core::{
    config::{ResourceRule, Resources},
    model::{FieldClass, SchedulerType},
    reconcile::{Configurable, Fields},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use wildmatch::WildMatch;

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDirectives {
    pub queue: Option<String>,
    pub walltime: Option<String>,
    pub nodes: Option<u32>,
    pub ppn: Option<u32>,
    pub account: Option<String>,
    pub prefix: Vec<String>,
    pub postfix: Vec<String>,
}

impl ResourceDirectives {
    pub fn nodes(&self) -> u32 {
        self.nodes.unwrap_or(1).max(1)
    }

    pub fn ppn(&self) -> u32 {
        self.ppn.unwrap_or(1).max(1)
    }

    /// Total process count handed to the parallel launcher.
    pub fn np(&self) -> u32 {
        self.nodes().saturating_mul(self.ppn())
    }
}

/// Per-task resource requests carried by a plan. Every field is operational,
/// so an edited plan may change them on an existing record.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceHints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub walltime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ppn: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub prefix: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub postfix: Vec<String>,
}

impl ResourceHints {
    pub fn from_fields(fields: &Fields) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(fields.clone()))
    }
}

impl Configurable for ResourceHints {
    fn fields(&self) -> Fields {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Fields::new(),
        }
    }

    fn classify(&self, _field: &str) -> FieldClass {
        FieldClass::Safe
    }
}

fn merge_hints(current: &mut ResourceDirectives, hints: &ResourceHints) {
    if let Some(val) = &hints.queue {
        current.queue = Some(val.clone());
    }
    if let Some(val) = &hints.walltime {
        current.walltime = Some(val.clone());
    }
    if let Some(val) = hints.nodes {
        current.nodes = Some(val);
    }
    if let Some(val) = hints.ppn {
        current.ppn = Some(val);
    }
    if let Some(val) = &hints.account {
        current.account = Some(val.clone());
    }
    if !hints.prefix.is_empty() {
        current.prefix = hints.prefix.clone();
    }
    if !hints.postfix.is_empty() {
        current.postfix = hints.postfix.clone();
    }
}

fn merge_rule(current: &mut ResourceDirectives, rule: &ResourceRule) {
    if let Some(val) = &rule.queue {
        current.queue = Some(val.clone());
    }
    if let Some(val) = &rule.walltime {
        current.walltime = Some(val.clone());
    }
    if let Some(val) = rule.nodes {
        current.nodes = Some(val);
    }
    if let Some(val) = rule.ppn {
        current.ppn = Some(val);
    }
    if let Some(val) = &rule.account {
        current.account = Some(val.clone());
    }
    if !rule.prefix.is_empty() {
        current.prefix = rule.prefix.clone();
    }
    if !rule.postfix.is_empty() {
        current.postfix = rule.postfix.clone();
    }
}

/// Defaults, then the task's own hints, then every matching rule in order.
pub fn resolve_for_task(
    task_name: &str,
    scheduler: SchedulerType,
    resources: &Resources,
    hints: Option<&ResourceHints>,
) -> ResourceDirectives {
    let defaults = &resources.defaults;
    let mut current = ResourceDirectives {
        queue: defaults.queue.clone(),
        walltime: defaults.walltime.clone(),
        nodes: defaults.nodes,
        ppn: defaults.ppn,
        account: defaults.account.clone(),
        prefix: defaults.prefix.clone(),
        postfix: defaults.postfix.clone(),
    };

    if let Some(h) = hints {
        merge_hints(&mut current, h);
    }

    for rule in &resources.rules {
        let scheduler_matches = rule.scheduler.is_none_or(|s| s == scheduler);
        let glob_matches = rule
            .task_glob
            .as_ref()
            .is_none_or(|glob| WildMatch::new(glob).matches(task_name));
        if scheduler_matches && glob_matches {
            merge_rule(&mut current, rule);
        }
    }

    tracing::debug!(
        "Resolved directives for task '{}' on {}: {:?}",
        task_name,
        scheduler,
        current
    );
    current
}
