//! Structural diffs between two states of the same resource

use crate::resource::{Resource, ResourceKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

/// What applying a resource will do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Before and planned states are equal
    NoOp,
    /// Resource is absent and will be created
    Create,
    /// Resource exists and will be changed
    Update,
    /// Resource exists and will be removed
    Remove,
}

impl Verdict {
    /// Classify the change from `before` to `planned`
    pub fn classify(before: Option<&Value>, planned: Option<&Value>) -> Self {
        match (before, planned) {
            (before, planned) if before == planned => Self::NoOp,
            (None, Some(_)) => Self::Create,
            (Some(_), None) => Self::Remove,
            _ => Self::Update,
        }
    }

    /// Single-character marker used in plan output
    pub fn symbol(&self) -> char {
        match self {
            Self::NoOp => '=',
            Self::Create => '+',
            Self::Update => '~',
            Self::Remove => '-',
        }
    }

    pub fn is_change(&self) -> bool {
        !matches!(self, Self::NoOp)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NoOp => "no-op",
            Self::Create => "create",
            Self::Update => "update",
            Self::Remove => "remove",
        })
    }
}

/// One changed field; `path` is dot-separated, empty for the whole state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub path: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

/// Field-level difference between two optional states
///
/// Objects are compared key by key; anything else is compared whole. The
/// result is empty exactly when both sides are equal.
pub fn diff_states(before: Option<&Value>, after: Option<&Value>) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    walk("", before, after, &mut changes);
    changes
}

fn walk(path: &str, before: Option<&Value>, after: Option<&Value>, out: &mut Vec<FieldChange>) {
    if before == after {
        return;
    }
    let before_fields = before.and_then(Value::as_object);
    let after_fields = after.and_then(Value::as_object);
    let recurse = (before_fields.is_some() || before.is_none())
        && (after_fields.is_some() || after.is_none());

    if recurse {
        let start = out.len();
        let keys: BTreeSet<&String> = before_fields
            .into_iter()
            .chain(after_fields)
            .flat_map(|fields| fields.keys())
            .collect();
        for key in keys {
            let child = if path.is_empty() {
                key.clone()
            } else {
                format!("{path}.{key}")
            };
            walk(
                &child,
                before_fields.and_then(|f| f.get(key)),
                after_fields.and_then(|f| f.get(key)),
                out,
            );
        }
        // absent vs empty table differ without any field changing
        if out.len() > start {
            return;
        }
    }

    out.push(FieldChange {
        path: path.to_string(),
        before: before.cloned(),
        after: after.cloned(),
    });
}

/// Planned change of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDiff {
    pub key: ResourceKey,
    pub verdict: Verdict,
    pub before: Option<Value>,
    pub planned: Option<Value>,
    pub changes: Vec<FieldChange>,
}

impl ResourceDiff {
    /// Diff two states of the same resource
    pub fn new(before: &Resource, planned: &Resource) -> Self {
        debug_assert_eq!(before.key(), planned.key());
        Self {
            key: planned.key(),
            verdict: Verdict::classify(before.state.as_ref(), planned.state.as_ref()),
            before: before.state.clone(),
            planned: planned.state.clone(),
            changes: diff_states(before.state.as_ref(), planned.state.as_ref()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Changed field paths, comma separated
    pub fn changed_paths(&self) -> String {
        self.changes
            .iter()
            .map(|c| {
                if c.path.is_empty() {
                    "<state>".to_string()
                } else {
                    c.path.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Verdict counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub create: usize,
    pub update: usize,
    pub remove: usize,
    pub no_op: usize,
}

impl DiffSummary {
    pub fn add(&mut self, verdict: Verdict) {
        match verdict {
            Verdict::NoOp => self.no_op += 1,
            Verdict::Create => self.create += 1,
            Verdict::Update => self.update += 1,
            Verdict::Remove => self.remove += 1,
        }
    }

    /// Total number of changes
    pub fn changes(&self) -> usize {
        self.create + self.update + self.remove
    }

    pub fn has_changes(&self) -> bool {
        self.changes() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify() {
        let a = json!({ "v": 1 });
        let b = json!({ "v": 2 });
        assert_eq!(Verdict::classify(None, None), Verdict::NoOp);
        assert_eq!(Verdict::classify(Some(&a), Some(&a)), Verdict::NoOp);
        assert_eq!(Verdict::classify(None, Some(&a)), Verdict::Create);
        assert_eq!(Verdict::classify(Some(&a), None), Verdict::Remove);
        assert_eq!(Verdict::classify(Some(&a), Some(&b)), Verdict::Update);
    }

    #[test]
    fn test_diff_nested_fields() {
        let before = json!({ "content": "x", "owner": { "uid": 0, "gid": 0 } });
        let after = json!({ "content": "x", "owner": { "uid": 1000, "gid": 0 }, "mode": 420 });
        let changes = diff_states(Some(&before), Some(&after));
        let paths: Vec<&str> = changes.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, ["mode", "owner.uid"]);
        assert_eq!(changes[0].before, None);
        assert_eq!(changes[1].after, Some(json!(1000)));
    }

    #[test]
    fn test_diff_create_lists_every_field() {
        let after = json!({ "content": "x", "mode": 420 });
        let changes = diff_states(None, Some(&after));
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.before.is_none()));
    }

    #[test]
    fn test_diff_absent_vs_empty_table_is_not_empty() {
        let empty = json!({});
        let changes = diff_states(None, Some(&empty));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, "");
    }

    #[test]
    fn test_diff_type_change_is_whole_value() {
        let before = json!({ "v": [1, 2] });
        let after = json!({ "v": "1,2" });
        let changes = diff_states(Some(&before), Some(&after));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, "v");
    }

    #[test]
    fn test_equal_states_have_no_changes() {
        let v = json!({ "a": { "b": [1] } });
        assert!(diff_states(Some(&v), Some(&v)).is_empty());
        assert!(diff_states(None, None).is_empty());
    }

    #[test]
    fn test_summary() {
        let mut summary = DiffSummary::default();
        for verdict in [Verdict::Create, Verdict::NoOp, Verdict::Remove, Verdict::Create] {
            summary.add(verdict);
        }
        assert_eq!(summary.create, 2);
        assert_eq!(summary.changes(), 3);
        assert!(summary.has_changes());
    }
}
