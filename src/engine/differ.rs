//! Plan and drift display

use colored::{ColoredString, Colorize};
use converge::{Action, DiffSummary, FieldChange, Plan, ResourceDiff, Verdict};
use serde_json::Value;
use similar::{ChangeTag, TextDiff};

use crate::ui;

/// Longest single-line value shown before truncating
const MAX_VALUE_WIDTH: usize = 60;

/// Print a plan grouped by step
pub fn display_plan(plan: &Plan, verbose: bool) {
    for line in render_plan(plan, verbose) {
        println!("{line}");
    }
}

/// Print resources whose host state differs from the last applied one
pub fn display_drift(diffs: &[ResourceDiff]) {
    for line in render_drift(diffs) {
        println!("{line}");
    }
}

pub fn render_plan(plan: &Plan, verbose: bool) -> Vec<String> {
    let mut lines = vec![String::new()];
    if plan.is_noop() {
        lines.push(format!("  {} No changes needed", "✓".green()));
        return lines;
    }

    lines.push(format!(
        "┌─ {} ─────────────────────────────────────────┐",
        "Plan".bold()
    ));
    lines.push("│".to_string());
    let total = plan.actions().len();
    for (index, action) in plan.actions().iter().enumerate() {
        if action.is_noop() && !verbose {
            continue;
        }
        render_action(&mut lines, index + 1, total, action, verbose);
        lines.push("│".to_string());
    }
    lines.push("├─────────────────────────────────────────────────────┤".to_string());
    lines.push(format!("│ Summary: {}", summary_line(&plan.summary())));
    lines.push("└─────────────────────────────────────────────────────┘".to_string());
    lines
}

fn render_action(
    lines: &mut Vec<String>,
    num: usize,
    total: usize,
    action: &Action,
    verbose: bool,
) {
    let label = if action.group {
        format!("{} {}", action.kind.bold(), "(applied together)".dimmed())
    } else {
        action.kind.bold().to_string()
    };
    lines.push(format!("│ {} {label}", ui::step_counter(num, total)));

    for diff in &action.diffs {
        if diff.verdict == Verdict::NoOp {
            if verbose {
                lines.push(format!("│   {} {}", symbol(diff.verdict), diff.key.id.dimmed()));
            }
            continue;
        }
        lines.push(format!(
            "│   {} {:<40} {}",
            symbol(diff.verdict),
            diff.key.id,
            format!("({})", diff.verdict).dimmed()
        ));
        // a removal replaces every field, listing them adds nothing
        if diff.verdict != Verdict::Remove {
            for change in &diff.changes {
                render_change(lines, change);
            }
        }
    }
}

fn symbol(verdict: Verdict) -> ColoredString {
    let symbol = verdict.symbol().to_string();
    match verdict {
        Verdict::Create => symbol.green(),
        Verdict::Update => symbol.yellow(),
        Verdict::Remove => symbol.red(),
        Verdict::NoOp => symbol.dimmed(),
    }
}

fn render_change(lines: &mut Vec<String>, change: &FieldChange) {
    let path = if change.path.is_empty() {
        "state"
    } else {
        change.path.as_str()
    };

    if let Some((before, after)) = text_pair(change) {
        lines.push(format!("│       {}:", path.dimmed()));
        for line in text_diff(before, after) {
            lines.push(format!("│         {line}"));
        }
        return;
    }

    lines.push(format!(
        "│       {}: {} → {}",
        path.dimmed(),
        format_value(change.before.as_ref()).red(),
        format_value(change.after.as_ref()).green()
    ));
}

/// Both sides as text when at least one of them spans several lines
fn text_pair(change: &FieldChange) -> Option<(&str, &str)> {
    fn as_text(value: Option<&Value>) -> Option<&str> {
        match value {
            None => Some(""),
            Some(Value::String(s)) => Some(s.as_str()),
            Some(_) => None,
        }
    }
    let before = as_text(change.before.as_ref())?;
    let after = as_text(change.after.as_ref())?;
    (before.contains('\n') || after.contains('\n')).then_some((before, after))
}

/// Unified line diff, colored by change
fn text_diff(before: &str, after: &str) -> Vec<String> {
    let diff = TextDiff::from_lines(before, after);
    let mut lines = Vec::new();
    for (index, group) in diff.grouped_ops(3).iter().enumerate() {
        if index > 0 {
            lines.push("...".dimmed().to_string());
        }
        for op in group {
            for change in diff.iter_changes(op) {
                let text = change.value().trim_end_matches('\n');
                lines.push(match change.tag() {
                    ChangeTag::Delete => format!("-{text}").red().to_string(),
                    ChangeTag::Insert => format!("+{text}").green().to_string(),
                    ChangeTag::Equal => format!(" {text}").dimmed().to_string(),
                });
            }
        }
    }
    lines
}

fn format_value(value: Option<&Value>) -> String {
    match value {
        None => "(none)".to_string(),
        Some(Value::String(s)) => ui::truncate(&format!("{s:?}"), MAX_VALUE_WIDTH),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => ui::truncate(&other.to_string(), MAX_VALUE_WIDTH),
    }
}

fn summary_line(summary: &DiffSummary) -> String {
    format!(
        "{} to create, {} to update, {} to remove",
        summary.create.to_string().green(),
        summary.update.to_string().yellow(),
        summary.remove.to_string().red()
    )
}

pub fn render_drift(diffs: &[ResourceDiff]) -> Vec<String> {
    let mut lines = vec![String::new()];
    if diffs.is_empty() {
        lines.push(format!(
            "  {} Host matches the last applied state",
            "✓".green()
        ));
        return lines;
    }

    lines.push(format!(
        "┌─ {} ─────────────────────────────────────────┐",
        "Drift".yellow().bold()
    ));
    lines.push("│".to_string());
    for diff in diffs {
        let note = match (&diff.before, &diff.planned) {
            (Some(_), None) => "(removed outside hostward)",
            (None, Some(_)) => "(created outside hostward)",
            _ => "(changed outside hostward)",
        };
        lines.push(format!(
            "│ {} {:<40} {}",
            "~".yellow(),
            diff.key.to_string(),
            note.dimmed()
        ));
        if diff.before.is_some() && diff.planned.is_some() {
            for change in &diff.changes {
                render_change(&mut lines, change);
            }
        }
    }
    lines.push("│".to_string());
    lines.push(format!(
        "│ {} resource(s) drifted; run `hostward restore` to re-apply the last state",
        diffs.len()
    ));
    lines.push("└─────────────────────────────────────────────────────┘".to_string());
    lines
}

/// Print what an applied plan changed
pub fn print_summary(summary: &DiffSummary) {
    println!();
    if !summary.has_changes() {
        println!("  {} Nothing to change", "✓".green().bold());
        return;
    }
    println!("  {} Host converged", "✓".green().bold());
    if summary.create > 0 {
        println!("    • {} resources created", summary.create);
    }
    if summary.update > 0 {
        println!("    • {} resources updated", summary.update);
    }
    if summary.remove > 0 {
        println!("    • {} resources removed", summary.remove);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge::{Blueprint, GroupKind, Registry, Resource, SingleKind};
    use serde_json::json;

    struct Stub;

    impl SingleKind for Stub {
        fn name(&self) -> &'static str {
            "file"
        }

        fn validate(&self, _resource: &Resource) -> anyhow::Result<()> {
            Ok(())
        }

        fn load(
            &self,
            _ctx: &converge::Context,
            _host: &dyn converge::Host,
            id: &str,
        ) -> anyhow::Result<Resource> {
            Ok(Resource::absent("file", id))
        }

        fn apply(
            &self,
            _ctx: &converge::Context,
            _host: &dyn converge::Host,
            _resource: &Resource,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct StubGroup;

    impl GroupKind for StubGroup {
        fn name(&self) -> &'static str {
            "apt"
        }

        fn validate(&self, _resource: &Resource) -> anyhow::Result<()> {
            Ok(())
        }

        fn load(
            &self,
            _ctx: &converge::Context,
            _host: &dyn converge::Host,
            ids: &[String],
        ) -> anyhow::Result<Vec<Resource>> {
            Ok(ids.iter().map(|id| Resource::absent("apt", id)).collect())
        }

        fn apply(
            &self,
            _ctx: &converge::Context,
            _host: &dyn converge::Host,
            _resources: &[Resource],
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn plan(target: &[Resource], current: &[Resource]) -> Plan {
        let mut registry = Registry::new();
        registry.register_single(Stub).register_group(StubGroup);
        let target = Blueprint::new(&registry, target).unwrap();
        let current = Blueprint::new(&registry, current).unwrap();
        Plan::against(&target, &current).unwrap()
    }

    fn text(lines: &[String]) -> String {
        lines.join("\n")
    }

    #[test]
    fn test_noop_plan() {
        let r = Resource::new("apt", "jq", json!({ "version": "1" }));
        let out = text(&render_plan(&plan(&[r.clone()], &[r]), false));
        assert!(out.contains("No changes needed"));
    }

    #[test]
    fn test_plan_lists_changes_and_hides_noops() {
        let target = [
            Resource::new("file", "/etc/motd", json!({ "content": "a\nb\n", "mode": 420 })),
            Resource::new("apt", "jq", json!({ "version": "2" })),
            Resource::new("apt", "curl", json!({ "version": "1" })),
        ];
        let current = [
            Resource::new("file", "/etc/motd", json!({ "content": "a\nc\n", "mode": 420 })),
            Resource::absent("apt", "jq"),
            Resource::new("apt", "curl", json!({ "version": "1" })),
        ];
        let p = plan(&target, &current);

        let out = text(&render_plan(&p, false));
        assert!(out.contains("/etc/motd"));
        assert!(out.contains("-c"), "unified diff removes the old line");
        assert!(out.contains("+b"), "unified diff adds the new line");
        assert!(out.contains("jq"));
        assert!(!out.contains("curl"), "no-op resources are hidden");
        assert!(out.contains("to create"));

        let verbose = text(&render_plan(&p, true));
        assert!(verbose.contains("curl"));
    }

    #[test]
    fn test_single_line_fields() {
        let change = FieldChange {
            path: "version".to_string(),
            before: Some(json!("1.0")),
            after: Some(json!("2.0")),
        };
        let mut lines = Vec::new();
        render_change(&mut lines, &change);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("version"));
        assert!(lines[0].contains("\"2.0\""));
    }

    #[test]
    fn test_text_pair_needs_multiline_strings() {
        let change = |before: Value, after: Option<Value>| FieldChange {
            path: "content".to_string(),
            before: Some(before),
            after,
        };
        assert!(text_pair(&change(json!("a"), Some(json!("b")))).is_none());
        assert!(text_pair(&change(json!("a\n"), Some(json!(1)))).is_none());
        assert_eq!(
            text_pair(&change(json!("a\nb"), None)),
            Some(("a\nb", ""))
        );
    }

    #[test]
    fn test_drift_display() {
        let diff = ResourceDiff::new(
            &Resource::new("apt", "jq", json!({ "version": "1" })),
            &Resource::new("apt", "jq", json!({ "version": "2" })),
        );
        let out = text(&render_drift(&[diff]));
        assert!(out.contains("apt[jq]"));
        assert!(out.contains("changed outside hostward"));
        assert!(out.contains("restore"));

        assert!(text(&render_drift(&[])).contains("matches"));
    }
}
