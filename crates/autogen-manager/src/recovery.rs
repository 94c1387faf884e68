use autogen_core::reconcile::Fields;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_RESTARTS: u32 = 5;

/// Copy the last partial state over the file the next attempt starts from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reseed {
    pub from: String,
    pub to: String,
}

/// One rung of the escalation ladder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryStep {
    pub label: Option<String>,
    pub set: Fields,
    pub reseed: Option<Reseed>,
    /// Overrides from this step are dropped again once the task succeeds,
    /// and the task reruns once without them.
    pub temporary: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryPolicy {
    pub max_restarts: u32,
    pub steps: Vec<RecoveryStep>,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            max_restarts: DEFAULT_MAX_RESTARTS,
            steps: Vec::new(),
        }
    }
}

/// Recovery state carried by a record between attempts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosisState {
    /// Layered over the recorded configuration when inputs are written.
    pub overrides: Fields,
    /// Override keys to drop after a successful run.
    pub temporary: Vec<String>,
    pub reseed: Option<Reseed>,
    pub note: Option<String>,
}

impl DiagnosisState {
    pub fn needs_verification(&self) -> bool {
        !self.temporary.is_empty()
    }

    pub fn apply_to(&self, base: &Fields) -> Fields {
        let mut effective = base.clone();
        for (key, value) in &self.overrides {
            effective.insert(key.clone(), value.clone());
        }
        effective
    }
}

impl RecoveryPolicy {
    pub fn can_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_restarts
    }

    /// The step for the given retry; the last step repeats once the ladder
    /// runs out.
    pub fn step_for(&self, retry_count: u32) -> Option<&RecoveryStep> {
        if self.steps.is_empty() {
            return None;
        }
        let index = (retry_count as usize).min(self.steps.len() - 1);
        self.steps.get(index)
    }

    pub fn escalate(&self, retry_count: u32, state: &DiagnosisState) -> DiagnosisState {
        let mut next = state.clone();
        let Some(step) = self.step_for(retry_count) else {
            next.note = Some("plain restart".to_string());
            return next;
        };
        for (key, value) in &step.set {
            next.overrides.insert(key.clone(), value.clone());
            if step.temporary && !next.temporary.contains(key) {
                next.temporary.push(key.clone());
            }
        }
        if step.reseed.is_some() {
            next.reseed = step.reseed.clone();
        }
        next.note = Some(
            step.label
                .clone()
                .unwrap_or_else(|| format!("recovery step {}", retry_count.min(self.steps.len() as u32 - 1) + 1)),
        );
        next
    }

    /// Drops temporary overrides for the verification rerun.
    pub fn relax(&self, state: &DiagnosisState) -> DiagnosisState {
        let mut next = state.clone();
        for key in &state.temporary {
            next.overrides.remove(key);
        }
        next.temporary.clear();
        next.note = Some(format!(
            "verifying without {}",
            state.temporary.join(", ")
        ));
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ladder() -> RecoveryPolicy {
        serde_json::from_value(json!({
            "max_restarts": 3,
            "steps": [
                {"set": {"restart": true}, "reseed": {"from": "fort.79", "to": "fort.20"}},
                {"label": "level shift", "set": {"levshift": [10, 1], "broyden": []}, "temporary": true}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_can_retry_counts_restarts() {
        let policy = ladder();
        assert!(policy.can_retry(0));
        assert!(policy.can_retry(2));
        assert!(!policy.can_retry(3));
    }

    #[test]
    fn test_escalation_is_cumulative_and_repeats_last_step() {
        let policy = ladder();
        let first = policy.escalate(0, &DiagnosisState::default());
        assert_eq!(first.overrides["restart"], json!(true));
        assert_eq!(first.reseed.as_ref().unwrap().to, "fort.20");
        assert!(!first.needs_verification());
        assert_eq!(first.note.as_deref(), Some("recovery step 1"));

        let second = policy.escalate(1, &first);
        assert_eq!(second.overrides["restart"], json!(true));
        assert_eq!(second.overrides["levshift"], json!([10, 1]));
        assert_eq!(second.temporary, vec!["broyden", "levshift"]);
        assert_eq!(second.note.as_deref(), Some("level shift"));

        let third = policy.escalate(2, &second);
        assert_eq!(third.temporary, second.temporary);
        assert_eq!(third.overrides, second.overrides);
    }

    #[test]
    fn test_relax_keeps_permanent_overrides() {
        let policy = ladder();
        let damped = policy.escalate(1, &policy.escalate(0, &DiagnosisState::default()));
        let relaxed = policy.relax(&damped);
        assert!(!relaxed.needs_verification());
        assert_eq!(relaxed.overrides.len(), 1);
        assert_eq!(relaxed.overrides["restart"], json!(true));
        assert_eq!(relaxed.reseed, damped.reseed);
    }

    #[test]
    fn test_empty_ladder_is_plain_restart() {
        let policy = RecoveryPolicy::default();
        assert_eq!(policy.max_restarts, DEFAULT_MAX_RESTARTS);
        let next = policy.escalate(0, &DiagnosisState::default());
        assert!(next.overrides.is_empty());
        assert_eq!(next.note.as_deref(), Some("plain restart"));
    }

    #[test]
    fn test_apply_to_layers_overrides() {
        let mut base = Fields::new();
        base.insert("restart".into(), json!(false));
        base.insert("basis".into(), json!("cc-pvdz"));
        let state = ladder().escalate(0, &DiagnosisState::default());
        let effective = state.apply_to(&base);
        assert_eq!(effective["restart"], json!(true));
        assert_eq!(effective["basis"], json!("cc-pvdz"));
    }
}
