//! Plain-text rendering of diagrams and diffs.

use crate::sequence::diagram::{Diagram, DiffMode};

fn marker(mode: Option<DiffMode>) -> char {
    match mode {
        Some(DiffMode::Insert) => '+',
        Some(DiffMode::Delete) => '-',
        Some(DiffMode::Move) => '>',
        None => ' ',
    }
}

/// One line per action, indented by depth:
///
/// ```text
///   HTTP server requests: GET /users/{id} (200)
/// +   HTTP server requests -> Database: SELECT * FROM users WHERE id = ?
/// ```
///
/// The first column marks inserted (`+`), deleted (`-`) and moved (`>`)
/// actions; descendants of an inserted or deleted action carry its marker.
pub fn format_text(diagram: &Diagram) -> String {
    let actor_name = |id: Option<&str>| -> Option<String> {
        let id = id?;
        Some(
            diagram
                .actor(id)
                .map(|a| a.name.clone())
                .unwrap_or_else(|| id.to_string()),
        )
    };

    let mut out = String::new();
    let mut stack: Vec<(usize, Option<DiffMode>, usize)> =
        diagram.roots().iter().rev().map(|&r| (0, None, r)).collect();
    while let Some((depth, inherited, position)) = stack.pop() {
        let action = diagram.action(position);
        let mode = inherited.or(action.diff_mode);
        let callee = actor_name(action.callee.as_deref()).unwrap_or_default();
        let target = match actor_name(action.caller.as_deref()) {
            Some(caller) => format!("{caller} -> {callee}"),
            None => callee,
        };
        out.push(marker(mode));
        out.push(' ');
        out.push_str(&"  ".repeat(depth));
        out.push_str(&target);
        out.push_str(": ");
        out.push_str(&action.name.replace(['\r', '\n'], " "));
        if let Some(status) = action.status {
            out.push_str(&format!(" ({status})"));
        }
        out.push('\n');

        let carried = match mode {
            Some(DiffMode::Insert) | Some(DiffMode::Delete) => mode,
            _ => None,
        };
        stack.extend(
            diagram
                .children(position)
                .iter()
                .rev()
                .map(|&c| (depth + 1, carried, c)),
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::diagram::build_diagram;
    use crate::sequence::diff::{build_diff_diagram, diff, DiffOptions};
    use crate::test_support::{
        fixture_appmap, http_sql_trace, nested_function_trace, synthetic_trace,
    };

    #[test]
    fn renders_nested_calls() {
        let diagram = build_diagram(&fixture_appmap(&http_sql_trace(3)));
        let text = format_text(&diagram);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "  HTTP server requests: GET /users/{id} (200)",
                "    HTTP server requests -> Database: SELECT * FROM users WHERE id = ?",
            ]
        );
    }

    #[test]
    fn marks_changes_and_their_subtrees() {
        let base = build_diagram(&fixture_appmap(&http_sql_trace(3)));
        let head = build_diagram(&fixture_appmap(&nested_function_trace()));
        let merged = build_diff_diagram(&diff(&base, &head, &DiffOptions::default()));
        let text = format_text(&merged);
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines.iter().any(|l| l.starts_with("-   HTTP server requests -> Database")));
        assert!(lines.iter().any(|l| l.starts_with("+     RecoveredAssignments -> RecoveredAssignments: getTasks")));
    }

    #[test]
    fn query_without_status_renders_one_line() {
        let trace = serde_json::json!({
            "metadata": {"name": "multiline"},
            "classMap": [],
            "events": [
                {"id": 1, "event": "call", "thread_id": 1,
                 "sql_query": {"sql": "SELECT *\nFROM users"}},
                {"id": 2, "event": "return", "thread_id": 1, "parent_id": 1}
            ]
        });
        let diagram = build_diagram(&fixture_appmap(&trace.to_string()));
        assert_eq!(format_text(&diagram), "  Database: SELECT * FROM users\n");
    }

    #[test]
    fn deep_diagrams_render_every_action() {
        let diagram = build_diagram(&fixture_appmap(&synthetic_trace(1, 5000)));
        let text = format_text(&diagram);
        assert_eq!(text.lines().count(), diagram.len());
        let last_function = text
            .lines()
            .rfind(|l| l.contains(": step"))
            .unwrap();
        assert!(last_function.starts_with(&format!("  {}", "  ".repeat(4999))));
    }
}
