//! Decides which persisted configuration values may follow an edited plan.
//!
//! A record is the source of truth for anything that was already used to
//! produce results. Plans only get to change operational fields.

use crate::errors::{DriftError, RefusedField};
use crate::model::FieldClass;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeSet;

pub type Fields = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileMode {
    /// Refused changes are logged and the recorded value is kept.
    Lenient,
    /// A refused change is a hard error and nothing is applied.
    #[default]
    Strict,
}

/// Structural equality that treats `1` and `1.0` as the same value.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| deep_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| deep_equal(v, w)))
        }
        _ => a == b,
    }
}

fn numbers_equal(x: &Number, y: &Number) -> bool {
    if let (Some(l), Some(r)) = (x.as_i64(), y.as_i64()) {
        return l == r;
    }
    if let (Some(l), Some(r)) = (x.as_u64(), y.as_u64()) {
        return l == r;
    }
    match (x.as_f64(), y.as_f64()) {
        (Some(l), Some(r)) => l == r,
        _ => false,
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct KeyDiff {
    pub only_in_old: Vec<String>,
    pub only_in_new: Vec<String>,
    pub changed: Vec<String>,
}

impl KeyDiff {
    pub fn is_empty(&self) -> bool {
        self.only_in_old.is_empty() && self.only_in_new.is_empty() && self.changed.is_empty()
    }
}

pub fn diff_keys(old: &Fields, new: &Fields) -> KeyDiff {
    let mut diff = KeyDiff::default();
    for (key, value) in old {
        match new.get(key) {
            None => diff.only_in_old.push(key.clone()),
            Some(other) if !deep_equal(value, other) => diff.changed.push(key.clone()),
            Some(_) => {}
        }
    }
    diff.only_in_new = new
        .keys()
        .filter(|k| !old.contains_key(*k))
        .cloned()
        .collect();
    diff
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub field: String,
    pub from: Value,
    pub to: Value,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ChangeSet {
    pub applied: Vec<FieldChange>,
    pub added: Vec<String>,
    pub refused: Vec<FieldChange>,
    pub missing_from_plan: Vec<String>,
}

impl ChangeSet {
    /// True when the target was modified.
    pub fn is_changed(&self) -> bool {
        !self.applied.is_empty() || !self.added.is_empty()
    }

    pub fn extend(&mut self, other: ChangeSet) {
        self.applied.extend(other.applied);
        self.added.extend(other.added);
        self.refused.extend(other.refused);
        self.missing_from_plan.extend(other.missing_from_plan);
    }
}

/// Brings `copyto` in line with `copyfrom`.
///
/// Keys in `skip_keys` are left alone. Keys only in `copyfrom` are adopted.
/// Keys only in `copyto` are kept. A differing key is applied when listed in
/// `take_keys` and refused otherwise. In strict mode any refusal fails the
/// whole call before `copyto` is touched.
pub fn update_attributes(
    copyto: &mut Fields,
    copyfrom: &Fields,
    skip_keys: &BTreeSet<String>,
    take_keys: &BTreeSet<String>,
    mode: ReconcileMode,
    owner: &str,
) -> Result<ChangeSet, DriftError> {
    let diff = diff_keys(copyto, copyfrom);
    let mut changes = ChangeSet::default();

    for key in diff.only_in_old.iter().filter(|k| !skip_keys.contains(*k)) {
        tracing::warn!(
            "{}: recorded field '{}' is not in the plan, keeping the recorded value.",
            owner,
            key
        );
        changes.missing_from_plan.push(key.clone());
    }

    for key in diff.only_in_new.iter().filter(|k| !skip_keys.contains(*k)) {
        tracing::warn!(
            "{}: field '{}' is new in the plan, adopting {}.",
            owner,
            key,
            copyfrom[key]
        );
        changes.added.push(key.clone());
    }

    for key in diff.changed.iter().filter(|k| !skip_keys.contains(*k)) {
        let change = FieldChange {
            field: key.clone(),
            from: copyto[key].clone(),
            to: copyfrom[key].clone(),
        };
        if take_keys.contains(key) {
            changes.applied.push(change);
        } else {
            changes.refused.push(change);
        }
    }

    if !changes.refused.is_empty() {
        match mode {
            ReconcileMode::Strict => {
                return Err(DriftError::Fields {
                    owner: owner.to_string(),
                    fields: changes
                        .refused
                        .into_iter()
                        .map(|c| RefusedField {
                            field: c.field,
                            recorded: c.from,
                            planned: c.to,
                        })
                        .collect(),
                });
            }
            ReconcileMode::Lenient => {
                for change in &changes.refused {
                    tracing::warn!(
                        "{}: refusing to change '{}' from {} to {}, keeping the recorded value.",
                        owner,
                        change.field,
                        change.from,
                        change.to
                    );
                }
            }
        }
    }

    for key in &changes.added {
        copyto.insert(key.clone(), copyfrom[key].clone());
    }
    for change in &changes.applied {
        tracing::info!(
            "{}: updating '{}' from {} to {}.",
            owner,
            change.field,
            change.from,
            change.to
        );
        copyto.insert(change.field.clone(), change.to.clone());
    }

    Ok(changes)
}

/// A plan-side object whose fields can be reconciled against a record.
pub trait Configurable {
    fn fields(&self) -> Fields;

    fn classify(&self, field: &str) -> FieldClass;
}

/// Returns the record brought up to date with `plan` without modifying the
/// original, together with what changed.
pub fn merge(
    record: &Fields,
    plan: &dyn Configurable,
    mode: ReconcileMode,
    owner: &str,
) -> Result<(Fields, ChangeSet), DriftError> {
    let planned = plan.fields();
    let mut skip_keys = BTreeSet::new();
    let mut take_keys = BTreeSet::new();
    for key in planned.keys() {
        match plan.classify(key) {
            FieldClass::TakeIfNewer if record.contains_key(key) => {
                skip_keys.insert(key.clone());
            }
            FieldClass::Safe => {
                take_keys.insert(key.clone());
            }
            _ => {}
        }
    }

    let mut snapshot = record.clone();
    let changes = update_attributes(
        &mut snapshot,
        &planned,
        &skip_keys,
        &take_keys,
        mode,
        owner,
    )?;
    Ok((snapshot, changes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    struct Plan {
        values: Fields,
        classes: BTreeMap<&'static str, FieldClass>,
    }

    impl Configurable for Plan {
        fn fields(&self) -> Fields {
            self.values.clone()
        }

        fn classify(&self, field: &str) -> FieldClass {
            self.classes.get(field).copied().unwrap_or_default()
        }
    }

    fn keys(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_deep_equal_is_numeric_tolerant() {
        assert!(deep_equal(&json!([1, 2]), &json!([1.0, 2.0])));
        assert!(deep_equal(
            &json!({"a": {"b": [1, 2.5]}}),
            &json!({"a": {"b": [1.0, 2.5]}})
        ));
        assert!(!deep_equal(&json!([1, 2]), &json!([1, 2, 3])));
        assert!(!deep_equal(&json!({"a": 1}), &json!({"a": 1, "b": 2})));
        assert!(!deep_equal(&json!("1"), &json!(1)));
        assert!(!deep_equal(
            &json!(9007199254740993_i64),
            &json!(9007199254740992_i64)
        ));
    }

    #[test]
    fn test_diff_keys() {
        let old = fields(json!({"a": 1, "b": 2, "c": 3}));
        let new = fields(json!({"b": 2.0, "c": 4, "d": 5}));
        let diff = diff_keys(&old, &new);
        assert_eq!(diff.only_in_old, vec!["a"]);
        assert_eq!(diff.only_in_new, vec!["d"]);
        assert_eq!(diff.changed, vec!["c"]);
        assert!(diff_keys(&old, &old).is_empty());
    }

    #[test]
    fn test_identical_reconcile_is_noop() {
        let source = fields(json!({"basis": "cc-pvdz", "cutoff": 1e-8, "grid": [1, 2, 3]}));
        let mut target = fields(json!({"basis": "cc-pvdz", "cutoff": 1e-8, "grid": [1.0, 2.0, 3.0]}));
        let before = target.clone();

        let changes = update_attributes(
            &mut target,
            &source,
            &BTreeSet::new(),
            &BTreeSet::new(),
            ReconcileMode::Strict,
            "test",
        )
        .unwrap();

        assert!(!changes.is_changed());
        assert_eq!(changes, ChangeSet::default());
        assert_eq!(target, before);
    }

    #[test]
    fn test_lenient_applies_safe_and_keeps_unsafe() {
        let mut target = fields(json!({"basis": "sto-3g", "walltime": "01:00:00"}));
        let source = fields(json!({"basis": "cc-pvdz", "walltime": "04:00:00"}));

        let changes = update_attributes(
            &mut target,
            &source,
            &BTreeSet::new(),
            &keys(&["walltime"]),
            ReconcileMode::Lenient,
            "test",
        )
        .unwrap();

        assert!(changes.is_changed());
        assert_eq!(target["walltime"], json!("04:00:00"));
        assert_eq!(target["basis"], json!("sto-3g"));
        assert_eq!(changes.refused.len(), 1);
        assert_eq!(changes.refused[0].field, "basis");
    }

    #[test]
    fn test_strict_refusal_is_atomic() {
        let mut target = fields(json!({"basis": "sto-3g", "walltime": "01:00:00"}));
        let before = target.clone();
        let source = fields(json!({"basis": "cc-pvdz", "walltime": "04:00:00", "new": 1}));

        let err = update_attributes(
            &mut target,
            &source,
            &BTreeSet::new(),
            &keys(&["walltime"]),
            ReconcileMode::Strict,
            "TaskManager@h2/scf",
        )
        .unwrap_err();

        match err {
            DriftError::Fields { owner, fields } => {
                assert_eq!(owner, "TaskManager@h2/scf");
                assert_eq!(fields.len(), 1);
                assert_eq!(fields[0].field, "basis");
                assert_eq!(fields[0].recorded, json!("sto-3g"));
                assert_eq!(fields[0].planned, json!("cc-pvdz"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(target, before);
    }

    #[test]
    fn test_skip_keys_are_untouched() {
        let mut target = fields(json!({"guess": "fort.79"}));
        let source = fields(json!({"guess": "atomic"}));
        let changes = update_attributes(
            &mut target,
            &source,
            &keys(&["guess"]),
            &BTreeSet::new(),
            ReconcileMode::Strict,
            "test",
        )
        .unwrap();
        assert!(!changes.is_changed());
        assert_eq!(target["guess"], json!("fort.79"));
    }

    #[test]
    fn test_new_and_missing_keys() {
        let mut target = fields(json!({"legacy": true}));
        let source = fields(json!({"max_cycle": 100}));
        let changes = update_attributes(
            &mut target,
            &source,
            &BTreeSet::new(),
            &BTreeSet::new(),
            ReconcileMode::Strict,
            "test",
        )
        .unwrap();
        assert_eq!(changes.added, vec!["max_cycle"]);
        assert_eq!(changes.missing_from_plan, vec!["legacy"]);
        assert_eq!(target["max_cycle"], json!(100));
        assert_eq!(target["legacy"], json!(true));
    }

    #[test]
    fn test_merge_classifies_fields() {
        let plan = Plan {
            values: fields(json!({
                "basis": "cc-pvdz",
                "walltime": "04:00:00",
                "guess": "atomic",
                "seed": 7
            })),
            classes: BTreeMap::from([
                ("walltime", FieldClass::Safe),
                ("guess", FieldClass::TakeIfNewer),
                ("seed", FieldClass::TakeIfNewer),
            ]),
        };
        let record = fields(json!({
            "basis": "cc-pvdz",
            "walltime": "01:00:00",
            "guess": "fort.79"
        }));

        let (snapshot, changes) = merge(&record, &plan, ReconcileMode::Strict, "test").unwrap();

        assert_eq!(snapshot["walltime"], json!("04:00:00"));
        assert_eq!(snapshot["guess"], json!("fort.79"));
        assert_eq!(snapshot["seed"], json!(7));
        assert_eq!(changes.added, vec!["seed"]);
        assert_eq!(record["walltime"], json!("01:00:00"));
    }

    #[test]
    fn test_merge_refuses_immutable_change() {
        let plan = Plan {
            values: fields(json!({"basis": "cc-pvtz"})),
            classes: BTreeMap::new(),
        };
        let record = fields(json!({"basis": "cc-pvdz"}));
        assert!(merge(&record, &plan, ReconcileMode::Strict, "test").is_err());

        let (snapshot, changes) = merge(&record, &plan, ReconcileMode::Lenient, "test").unwrap();
        assert_eq!(snapshot["basis"], json!("cc-pvdz"));
        assert!(!changes.is_changed());
    }
}
