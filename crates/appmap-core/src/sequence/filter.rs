//! Include/exclude filtering of diagram actions, and the filtered diff entry
//! point.

use regex::Regex;
use tracing::debug;

use crate::errors::AppMapResult;
use crate::sequence::diagram::{Action, ActionKind, Diagram};
use crate::sequence::diff::{build_diff_diagram, diff, DiffOptions};

/// `<callee actor id><separator><name>`, with `.` separating static
/// functions and `#` everything else. Newlines in the name become spaces.
pub fn action_name(action: &Action) -> Option<String> {
    let callee = action.callee.as_deref()?;
    let separator = if action.kind == ActionKind::Function && action.is_static {
        '.'
    } else {
        '#'
    };
    Some(format!(
        "{callee}{separator}{}",
        action.name.replace(['\r', '\n'], " ")
    ))
}

/// Patterns matched against [`action_name`]. An action is kept when it or
/// one of its ancestors matches an include pattern (or there are none), and
/// it does not itself match an exclude pattern. Dropping an action drops its
/// subtree.
#[derive(Debug, Clone, Default)]
pub struct ActionFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl ActionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include(mut self, pattern: &str) -> AppMapResult<Self> {
        self.include.push(Regex::new(pattern)?);
        Ok(self)
    }

    pub fn exclude(mut self, pattern: &str) -> AppMapResult<Self> {
        self.exclude.push(Regex::new(pattern)?);
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    fn included(&self, name: &str) -> bool {
        self.include.iter().any(|r| r.is_match(name))
    }

    fn excluded(&self, name: &str) -> bool {
        self.exclude.iter().any(|r| r.is_match(name))
    }

    pub fn apply(&self, diagram: &Diagram) -> Diagram {
        if self.is_empty() {
            return diagram.clone();
        }

        // (parent slot, action position, included via self or an ancestor)
        let mut nodes: Vec<(Option<usize>, usize, bool)> = Vec::new();
        let mut stack: Vec<(Option<usize>, bool, usize)> = diagram
            .roots()
            .iter()
            .rev()
            .map(|&r| (None, self.include.is_empty(), r))
            .collect();
        let mut dropped = 0;
        while let Some((parent, inherited, position)) = stack.pop() {
            let name = action_name(diagram.action(position)).unwrap_or_default();
            if self.excluded(&name) {
                dropped += 1;
                continue;
            }
            let included = inherited || self.included(&name);
            let slot = nodes.len();
            nodes.push((parent, position, included));
            stack.extend(
                diagram
                    .children(position)
                    .iter()
                    .rev()
                    .map(|&c| (Some(slot), included, c)),
            );
        }

        // An action not included itself survives when a descendant is.
        let mut keep: Vec<bool> = nodes.iter().map(|n| n.2).collect();
        for slot in (0..nodes.len()).rev() {
            if keep[slot] {
                if let Some(parent) = nodes[slot].0 {
                    keep[parent] = true;
                }
            }
        }

        let mut filtered = Diagram::new(diagram.actors().to_vec());
        let mut positions: Vec<Option<usize>> = Vec::with_capacity(nodes.len());
        for ((parent, position, _), keep) in nodes.into_iter().zip(keep) {
            if keep {
                let parent = parent.and_then(|p| positions[p]);
                positions.push(Some(filtered.push(parent, diagram.action(position).clone())));
            } else {
                positions.push(None);
                dropped += 1;
            }
        }
        debug!("Filter dropped {dropped} action subtree(s)");
        filtered
    }
}

/// Filter both diagrams, diff them, and build the annotated diagram.
#[derive(Debug, Clone, Default)]
pub struct DiagramDiffer {
    pub filter: ActionFilter,
    pub options: DiffOptions,
}

impl DiagramDiffer {
    pub fn new(filter: ActionFilter, options: DiffOptions) -> Self {
        Self { filter, options }
    }

    /// `None` when the filtered diagrams do not differ.
    pub fn diff(&self, base: &Diagram, head: &Diagram) -> Option<Diagram> {
        let base = self.filter.apply(base);
        let head = self.filter.apply(head);
        let result = diff(&base, &head, &self.options);
        if result.is_unchanged() {
            return None;
        }
        Some(build_diff_diagram(&result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::diagram::{read_diagram, DiffMode};
    use crate::sequence::diff::MoveType;
    use crate::test_support::{call, diagram_of, Call};

    fn diagram(calls: Vec<Call>) -> Diagram {
        diagram_of(&["Api", "Repo", "Log"], calls)
    }

    fn names(diagram: &Diagram) -> Vec<String> {
        diagram
            .flatten()
            .into_iter()
            .map(|(depth, a)| format!("{depth}:{}", a.name))
            .collect()
    }

    #[test]
    fn names_use_callee_and_separator() {
        let mut action = Action::new(
            ActionKind::Function,
            None,
            "class:Repo".to_string(),
            "find\nall".to_string(),
        );
        assert_eq!(action_name(&action).unwrap(), "class:Repo#find all");
        action.is_static = true;
        assert_eq!(action_name(&action).unwrap(), "class:Repo.find all");
    }

    #[test]
    fn exclude_drops_subtree() {
        let d = diagram(vec![call(
            "Api",
            "show",
            vec![
                call("Log", "write", vec![call("Repo", "save", vec![])]),
                call("Repo", "find", vec![]),
            ],
        )]);
        let filtered = ActionFilter::new().exclude("^class:Log").unwrap().apply(&d);
        assert_eq!(names(&filtered), vec!["0:show", "1:find"]);
        assert_eq!(filtered.action(1).parent(), Some(0));
    }

    #[test]
    fn include_keeps_matches_with_their_path() {
        let d = diagram(vec![
            call("Api", "show", vec![call("Repo", "find", vec![call("Log", "write", vec![])])]),
            call("Api", "health", vec![]),
        ]);
        let filtered = ActionFilter::new().include("Repo#find").unwrap().apply(&d);
        assert_eq!(names(&filtered), vec!["0:show", "1:find", "2:write"]);
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        assert!(ActionFilter::new().include("(").is_err());
    }

    fn foo_trace(callees: &[&str]) -> String {
        let mut events = vec![serde_json::json!({
            "id": 1, "event": "call", "thread_id": 1, "defined_class": "app.Foo",
            "method_id": "foo", "static": false
        })];
        let mut id = 1;
        for callee in callees {
            events.push(serde_json::json!({
                "id": id + 1, "event": "call", "thread_id": 1, "defined_class": "app.Foo",
                "method_id": callee, "static": false
            }));
            events.push(serde_json::json!({
                "id": id + 2, "event": "return", "thread_id": 1, "parent_id": id + 1
            }));
            id += 2;
        }
        events.push(serde_json::json!({"id": id + 1, "event": "return", "thread_id": 1, "parent_id": 1}));
        serde_json::json!({"metadata": {"name": "foo"}, "classMap": [], "events": events}).to_string()
    }

    #[test]
    fn added_call_between_traces() {
        let base = read_diagram(foo_trace(&["bar"]).as_bytes()).unwrap();
        let head = read_diagram(foo_trace(&["bar", "baz"]).as_bytes()).unwrap();

        let result = diff(&base, &head, &DiffOptions::default());
        let kinds: Vec<(MoveType, String)> = result
            .moves
            .iter()
            .map(|m| (m.move_type, result.head.action(m.head.unwrap()).name.clone()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (MoveType::AdvanceBoth, "foo".to_string()),
                (MoveType::AdvanceBoth, "bar".to_string()),
                (MoveType::InsertRight, "baz".to_string()),
            ]
        );

        let merged = DiagramDiffer::default().diff(&base, &head).unwrap();
        let baz = merged.children(merged.roots()[0])[1];
        assert_eq!(merged.action(baz).diff_mode, Some(DiffMode::Insert));
    }

    #[test]
    fn differ_returns_none_when_equal_after_filtering() {
        let base = diagram(vec![call("Api", "show", vec![call("Log", "write", vec![])])]);
        let head = diagram(vec![call("Api", "show", vec![])]);
        let differ = DiagramDiffer::new(
            ActionFilter::new().exclude("class:Log").unwrap(),
            DiffOptions::default(),
        );
        assert!(differ.diff(&base, &head).is_none());

        let unfiltered = DiagramDiffer::default().diff(&base, &head).unwrap();
        let write = unfiltered.action(unfiltered.children(0)[0]);
        assert_eq!(write.diff_mode, Some(DiffMode::Delete));
    }
}
