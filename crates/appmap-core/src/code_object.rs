//! Code object tree: packages, classes, functions and the synthetic nodes
//! (HTTP routes, SQL queries, external services) inferred from events.
//!
//! Nodes live in an arena owned by [`ClassMap`] and refer to each other by
//! index, so the upward `parent` link never owns anything and never shows up
//! when the tree is serialized.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::warn;

use crate::models::{ClassMapEntry, EventData, Extra};
use crate::sql::sql_label;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Closed set of known code object types, plus a catch-all that preserves
/// types written by newer agents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CodeObjectType {
    Package,
    Class,
    Function,
    Database,
    Query,
    Http,
    Route,
    ExternalService,
    ExternalRoute,
    AnalysisFinding,
    Other(String),
}

impl CodeObjectType {
    pub fn parse(value: &str) -> Self {
        match value {
            "package" => Self::Package,
            "class" => Self::Class,
            "function" => Self::Function,
            "database" => Self::Database,
            "query" => Self::Query,
            "http" => Self::Http,
            "route" => Self::Route,
            "external-service" => Self::ExternalService,
            "external-route" => Self::ExternalRoute,
            "analysis-finding" => Self::AnalysisFinding,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Package => "package",
            Self::Class => "class",
            Self::Function => "function",
            Self::Database => "database",
            Self::Query => "query",
            Self::Http => "http",
            Self::Route => "route",
            Self::ExternalService => "external-service",
            Self::ExternalRoute => "external-route",
            Self::AnalysisFinding => "analysis-finding",
            Self::Other(name) => name,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl fmt::Display for CodeObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for CodeObjectType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CodeObjectType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::parse(&value))
    }
}

/// Everything needed to create one node; used both for class map entries
/// and for chains synthesized from events.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub kind: CodeObjectType,
    pub name: String,
    pub labels: BTreeSet<String>,
    pub is_static: Option<bool>,
    pub location: Option<String>,
    pub database_type: Option<String>,
    pub extra: Extra,
}

impl NodeSpec {
    pub fn new(kind: CodeObjectType, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            labels: BTreeSet::new(),
            is_static: None,
            location: None,
            database_type: None,
            extra: Extra::new(),
        }
    }

    fn from_entry(entry: &ClassMapEntry) -> Self {
        Self {
            kind: CodeObjectType::parse(&entry.kind),
            name: entry.name.clone(),
            labels: entry.labels.iter().cloned().collect(),
            is_static: entry.is_static,
            location: entry.location.clone(),
            database_type: entry.database_type.clone(),
            extra: entry.extra.clone(),
        }
    }
}

/// A single node of the code object tree.
#[derive(Debug, Clone)]
pub struct CodeObject {
    kind: CodeObjectType,
    name: String,
    labels: BTreeSet<String>,
    is_static: Option<bool>,
    location: Option<String>,
    database_type: Option<String>,
    dynamic: bool,
    extra: Extra,
    id: String,
    parent: Option<usize>,
    children: Vec<usize>,
    events: Vec<usize>,
}

impl CodeObject {
    pub fn kind(&self) -> &CodeObjectType {
        &self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path-like identity built from the ancestor chain, e.g.
    /// `app/models/User#find`.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Type-qualified identity, e.g. `function:app/models/User#find`.
    pub fn fqid(&self) -> String {
        format!("{}:{}", self.kind, self.id)
    }

    pub fn labels(&self) -> &BTreeSet<String> {
        &self.labels
    }

    pub fn is_static(&self) -> bool {
        self.is_static.unwrap_or(false)
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn database_type(&self) -> Option<&str> {
        self.database_type.as_deref()
    }

    /// True when the node was inferred from an event rather than read from
    /// the class map.
    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    pub fn children(&self) -> &[usize] {
        &self.children
    }

    /// Indices of the call events bound to this node.
    pub fn events(&self) -> &[usize] {
        &self.events
    }
}

fn id_segment(kind: &CodeObjectType, name: &str) -> String {
    match kind {
        CodeObjectType::Package => name.replace('.', "/"),
        _ => name.to_string(),
    }
}

fn compute_id(parent: Option<&CodeObject>, kind: &CodeObjectType, name: &str, is_static: bool) -> String {
    let segment = id_segment(kind, name);
    let Some(parent) = parent else {
        return segment;
    };
    match (kind, &parent.kind) {
        (CodeObjectType::Package, CodeObjectType::Package) => format!("{}/{segment}", parent.id),
        (CodeObjectType::Class, CodeObjectType::Package) => format!("{}/{segment}", parent.id),
        (CodeObjectType::Class, CodeObjectType::Class) => format!("{}::{segment}", parent.id),
        (CodeObjectType::Function, _) => {
            let separator = if is_static { '.' } else { '#' };
            format!("{}{separator}{segment}", parent.id)
        }
        (CodeObjectType::Other(_), _) => format!("{}/{segment}", parent.id),
        _ => segment,
    }
}

// ---------------------------------------------------------------------------
// Tree
// ---------------------------------------------------------------------------

/// Arena-backed code object forest.
#[derive(Debug, Clone, Default)]
pub struct ClassMap {
    nodes: Vec<CodeObject>,
    roots: Vec<usize>,
    by_fqid: HashMap<String, usize>,
}

impl ClassMap {
    /// Build the tree from a `classMap` forest, preserving entry order.
    ///
    /// Unknown types are kept as [`CodeObjectType::Other`] and reported once
    /// per distinct type name.
    pub fn build(entries: &[ClassMapEntry]) -> Self {
        let mut map = Self::default();
        let mut unknown_types: HashSet<String> = HashSet::new();
        let mut stack: Vec<(Option<usize>, &ClassMapEntry)> =
            entries.iter().rev().map(|e| (None, e)).collect();

        while let Some((parent, entry)) = stack.pop() {
            let spec = NodeSpec::from_entry(entry);
            if let CodeObjectType::Other(kind) = &spec.kind {
                if unknown_types.insert(kind.clone()) {
                    warn!("Unknown code object type {kind:?} (name {:?}); preserving it", entry.name);
                }
            }
            let index = map.insert(parent, spec, false);
            for child in entry.children.iter().rev() {
                stack.push((Some(index), child));
            }
        }
        map
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    pub fn get(&self, index: usize) -> &CodeObject {
        &self.nodes[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &CodeObject)> {
        self.nodes.iter().enumerate()
    }

    /// Look up a node by its fully-qualified id.
    pub fn find(&self, fqid: &str) -> Option<usize> {
        self.by_fqid.get(fqid).copied()
    }

    /// Insert a node under `parent`, merging with an existing node of the
    /// same type and name under that parent, or with any node that already
    /// carries the same fully-qualified id.
    pub fn insert(&mut self, parent: Option<usize>, spec: NodeSpec, dynamic: bool) -> usize {
        let siblings = match parent {
            Some(p) => &self.nodes[p].children,
            None => &self.roots,
        };
        let existing = siblings
            .iter()
            .copied()
            .find(|&i| self.nodes[i].kind == spec.kind && self.nodes[i].name == spec.name);

        let id = compute_id(
            parent.map(|p| &self.nodes[p]),
            &spec.kind,
            &spec.name,
            spec.is_static.unwrap_or(false),
        );
        let fqid = format!("{}:{id}", spec.kind);
        let existing = existing.or_else(|| self.by_fqid.get(&fqid).copied());

        if let Some(index) = existing {
            let node = &mut self.nodes[index];
            node.labels.extend(spec.labels);
            if !dynamic {
                node.dynamic = false;
            }
            return index;
        }

        let index = self.nodes.len();
        self.nodes.push(CodeObject {
            kind: spec.kind,
            name: spec.name,
            labels: spec.labels,
            is_static: spec.is_static,
            location: spec.location,
            database_type: spec.database_type,
            dynamic,
            extra: spec.extra,
            id,
            parent,
            children: Vec::new(),
            events: Vec::new(),
        });
        match parent {
            Some(p) => self.nodes[p].children.push(index),
            None => self.roots.push(index),
        }
        self.by_fqid.entry(fqid).or_insert(index);
        index
    }

    /// Splice a synthesized chain (outermost first) into the tree and return
    /// the innermost node. Every node created here is flagged dynamic.
    pub fn insert_chain(&mut self, chain: Vec<NodeSpec>) -> Option<usize> {
        let mut parent = None;
        for spec in chain {
            parent = Some(self.insert(parent, spec, true));
        }
        parent
    }

    pub(crate) fn bind_event(&mut self, index: usize, event: usize) {
        self.nodes[index].events.push(event);
    }

    /// Pre-order walk of `index` and its descendants. The callback receives
    /// the node and the stack of indices from `index` down to it.
    pub fn visit(&self, index: usize, mut f: impl FnMut(&CodeObject, &[usize])) {
        let mut path: Vec<usize> = Vec::new();
        let mut stack: Vec<(usize, usize)> = vec![(index, 0)];
        while let Some((node, depth)) = stack.pop() {
            path.truncate(depth);
            path.push(node);
            f(&self.nodes[node], &path);
            for &child in self.nodes[node].children.iter().rev() {
                stack.push((child, depth + 1));
            }
        }
    }

    /// Pre-order walk of the whole forest.
    pub fn visit_all(&self, mut f: impl FnMut(&CodeObject, &[usize])) {
        for &root in &self.roots {
            self.visit(root, &mut f);
        }
    }

    /// Calls `f` on `index` and then on each ancestor up to the root.
    pub fn visit_ancestors(&self, index: usize, mut f: impl FnMut(usize, &CodeObject)) {
        let mut current = Some(index);
        while let Some(i) = current {
            f(i, &self.nodes[i]);
            current = self.nodes[i].parent;
        }
    }

    /// Ancestors from the direct parent up to the root.
    pub fn ancestors(&self, index: usize) -> Vec<usize> {
        let mut result = Vec::new();
        let mut current = self.nodes[index].parent;
        while let Some(i) = current {
            result.push(i);
            current = self.nodes[i].parent;
        }
        result
    }

    /// All descendants in pre-order.
    pub fn descendants(&self, index: usize) -> Vec<usize> {
        let mut result = Vec::new();
        let mut stack: Vec<usize> = self.nodes[index].children.iter().rev().copied().collect();
        while let Some(i) = stack.pop() {
            result.push(i);
            stack.extend(self.nodes[i].children.iter().rev());
        }
        result
    }

    /// The most specific descendants that share this node's type. A node of
    /// that type is a leaf when it has no children, or when it also has
    /// children of another type.
    pub fn leafs(&self, index: usize) -> Vec<usize> {
        let kind = &self.nodes[index].kind;
        let mut result = Vec::new();
        let mut stack = vec![index];
        while let Some(i) = stack.pop() {
            let node = &self.nodes[i];
            let same_type: Vec<usize> = node
                .children
                .iter()
                .copied()
                .filter(|&c| &self.nodes[c].kind == kind)
                .collect();
            if (node.children.is_empty() && &node.kind == kind)
                || same_type.len() != node.children.len()
            {
                result.push(i);
            }
            stack.extend(same_type.into_iter().rev());
        }
        result
    }

    /// Leafs of every child, whatever its type.
    pub fn child_leafs(&self, index: usize) -> Vec<usize> {
        self.nodes[index]
            .children
            .iter()
            .flat_map(|&c| self.leafs(c))
            .collect()
    }

    /// Functions of a class (not of its nested classes), or every function
    /// below any other node.
    pub fn functions(&self, index: usize) -> Vec<usize> {
        let node = &self.nodes[index];
        if node.kind == CodeObjectType::Class {
            return node
                .children
                .iter()
                .copied()
                .filter(|&c| self.nodes[c].kind == CodeObjectType::Function)
                .collect();
        }
        self.descendants(index)
            .into_iter()
            .filter(|&c| self.nodes[c].kind == CodeObjectType::Function)
            .collect()
    }

    /// Classes at or below `index` that own at least one function.
    pub fn classes(&self, index: usize) -> Vec<usize> {
        std::iter::once(index)
            .chain(self.descendants(index))
            .filter(|&c| {
                self.nodes[c].kind == CodeObjectType::Class && !self.functions(c).is_empty()
            })
            .collect()
    }

    fn names_of_type(&self, index: usize, kind: &CodeObjectType, separator: &str) -> String {
        let mut names = Vec::new();
        self.visit_ancestors(index, |_, node| {
            if &node.kind == kind {
                names.push(node.name.clone());
            }
        });
        names.reverse();
        names.join(separator)
    }

    /// Slash-joined names of the enclosing packages.
    pub fn package_of(&self, index: usize) -> String {
        self.names_of_type(index, &CodeObjectType::Package, "/")
    }

    /// `::`-joined names of the enclosing classes.
    pub fn class_of(&self, index: usize) -> String {
        self.names_of_type(index, &CodeObjectType::Class, "::")
    }

    /// Nearest enclosing (or self) node of the given type.
    pub fn enclosing(&self, index: usize, kind: &CodeObjectType) -> Option<usize> {
        let mut found = None;
        self.visit_ancestors(index, |i, node| {
            if found.is_none() && &node.kind == kind {
                found = Some(i);
            }
        });
        found
    }

    pub fn pretty_name(&self, index: usize) -> String {
        let node = &self.nodes[index];
        match node.kind {
            CodeObjectType::Function => {
                let separator = if node.is_static() { '.' } else { '#' };
                format!("{}{separator}{}", self.class_of(index), node.name)
            }
            CodeObjectType::Class => self.class_of(index),
            CodeObjectType::Package => self.package_of(index),
            CodeObjectType::Query => sql_label(&node.name),
            _ => node.name.clone(),
        }
    }

    /// Source files of a class (sorted, distinct), or the location of a
    /// function. Other node types report nothing.
    pub fn locations(&self, index: usize) -> Vec<String> {
        let node = &self.nodes[index];
        match node.kind {
            CodeObjectType::Class => {
                let mut paths = BTreeSet::new();
                for i in self.descendants(index) {
                    let child = &self.nodes[i];
                    if child.kind != CodeObjectType::Function {
                        continue;
                    }
                    if let Some(location) = child.location.as_deref().filter(|l| !l.is_empty()) {
                        let path = location.split(':').next().unwrap_or(location);
                        paths.insert(path.to_string());
                    }
                }
                paths.into_iter().collect()
            }
            CodeObjectType::Function => node.location.iter().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Serialize back to `classMap` entries, walking only child links.
    pub fn to_entries(&self) -> Vec<ClassMapEntry> {
        self.roots.iter().map(|&r| self.to_entry(r)).collect()
    }

    fn to_entry(&self, index: usize) -> ClassMapEntry {
        let node = &self.nodes[index];
        let is_function = node.kind == CodeObjectType::Function;
        ClassMapEntry {
            kind: node.kind.as_str().to_string(),
            name: node.name.clone(),
            labels: node.labels.iter().cloned().collect(),
            is_static: if is_function { node.is_static } else { None },
            location: if is_function { node.location.clone() } else { None },
            database_type: if node.kind == CodeObjectType::Query {
                node.database_type.clone()
            } else {
                None
            },
            children: node.children.iter().map(|&c| self.to_entry(c)).collect(),
            extra: node.extra.clone(),
        }
    }
}

/// Minimal chain of nodes describing the target of a call event that has
/// no static class map entry, outermost first.
pub fn chain_for_event(event: &EventData) -> Vec<NodeSpec> {
    if let Some(request) = &event.http_server_request {
        let route = format!(
            "{} {}",
            request.request_method,
            request
                .normalized_path_info
                .as_deref()
                .unwrap_or(&request.path_info)
        );
        return vec![
            NodeSpec::new(CodeObjectType::Http, "HTTP server requests"),
            NodeSpec::new(CodeObjectType::Route, route),
        ];
    }
    if let Some(request) = &event.http_client_request {
        let service = service_name(&request.url);
        let route = format!("{} {}", request.request_method, request.url);
        return vec![
            NodeSpec::new(CodeObjectType::ExternalService, service),
            NodeSpec::new(CodeObjectType::ExternalRoute, route),
        ];
    }
    if let Some(sql) = &event.sql_query {
        let mut query = NodeSpec::new(
            CodeObjectType::Query,
            sql.normalized_sql.clone().unwrap_or_else(|| sql.sql.clone()),
        );
        query.database_type = sql.database_type.clone();
        return vec![NodeSpec::new(CodeObjectType::Database, "Database"), query];
    }

    let mut function = NodeSpec::new(
        CodeObjectType::Function,
        event.method_id.clone().unwrap_or_default(),
    );
    function.is_static = Some(event.is_static.unwrap_or(false));
    function.location = Some(String::new());
    vec![
        NodeSpec::new(
            CodeObjectType::Class,
            event.defined_class_path().unwrap_or_default(),
        ),
        function,
    ]
}

/// Host portion of an absolute URL, or a generic name when there is none.
pub fn service_name(url: &str) -> String {
    let Some((_, rest)) = url.split_once("://") else {
        return "External service".to_string();
    };
    let host = rest
        .split(|c| c == '/' || c == '?' || c == '#')
        .next()
        .unwrap_or("");
    let host = host.rsplit('@').next().unwrap_or(host);
    if host.is_empty() {
        "External service".to_string()
    } else {
        host.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(json: &str) -> Vec<ClassMapEntry> {
        serde_json::from_str(json).unwrap()
    }

    fn sample() -> ClassMap {
        ClassMap::build(&entries(
            r#"[{
                "type": "package", "name": "app",
                "children": [{
                    "type": "package", "name": "models",
                    "children": [{
                        "type": "class", "name": "User",
                        "children": [
                            {"type": "function", "name": "find", "static": true,
                             "location": "app/models/user.rb:10", "labels": ["dao", "dao"]},
                            {"type": "function", "name": "save", "static": false,
                             "location": "app/models/user.rb:20"},
                            {"type": "class", "name": "Token",
                             "children": [{"type": "function", "name": "issue",
                                           "location": "app/models/token.rb:3"}]}
                        ]
                    }]
                }]
            }]"#,
        ))
    }

    #[test]
    fn ids_follow_ancestor_chain() {
        let map = sample();
        let find = map.find("function:app/models/User.find").unwrap();
        let save = map.find("function:app/models/User#save").unwrap();
        let issue = map.find("function:app/models/User::Token#issue").unwrap();
        assert_eq!(map.get(find).id(), "app/models/User.find");
        assert_eq!(map.get(save).fqid(), "function:app/models/User#save");
        assert_eq!(map.get(issue).id(), "app/models/User::Token#issue");
        assert_eq!(map.pretty_name(find), "User.find");
        assert_eq!(map.pretty_name(issue), "User::Token#issue");
        assert_eq!(map.package_of(find), "app/models");
    }

    #[test]
    fn ids_are_stable_across_builds() {
        let a = sample();
        let b = sample();
        let ids_a: Vec<String> = a.iter().map(|(_, n)| n.fqid()).collect();
        let ids_b: Vec<String> = b.iter().map(|(_, n)| n.fqid()).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn labels_collapse_duplicates() {
        let map = sample();
        let find = map.find("function:app/models/User.find").unwrap();
        assert_eq!(map.get(find).labels().len(), 1);
    }

    #[test]
    fn parent_and_children_are_consistent() {
        let map = sample();
        for (index, node) in map.iter() {
            if let Some(parent) = node.parent() {
                assert!(map.get(parent).children().contains(&index));
            }
            for &child in node.children() {
                assert_eq!(map.get(child).parent(), Some(index));
            }
            assert!(!map.ancestors(index).contains(&index));
        }
    }

    #[test]
    fn leafs_collapse_nested_packages() {
        let map = ClassMap::build(&entries(
            r#"[{"type": "package", "name": "app",
                 "children": [{"type": "package", "name": "models"}]}]"#,
        ));
        let app = map.roots()[0];
        let leafs = map.leafs(app);
        assert_eq!(leafs.len(), 1);
        assert_eq!(map.get(leafs[0]).id(), "app/models");
    }

    #[test]
    fn leafs_include_mixed_parents() {
        let map = ClassMap::build(&entries(
            r#"[{"type": "package", "name": "app",
                 "children": [
                    {"type": "package", "name": "models"},
                    {"type": "class", "name": "Main"}
                 ]}]"#,
        ));
        let app = map.roots()[0];
        let ids: Vec<&str> = map.leafs(app).iter().map(|&i| map.get(i).id()).collect();
        assert_eq!(ids, vec!["app", "app/models"]);
    }

    #[test]
    fn visit_is_preorder() {
        let map = sample();
        let mut names = Vec::new();
        let mut depths = Vec::new();
        map.visit_all(|node, path| {
            names.push(node.name().to_string());
            depths.push(path.len());
        });
        assert_eq!(names, vec!["app", "models", "User", "find", "save", "Token", "issue"]);
        assert_eq!(depths, vec![1, 2, 3, 4, 4, 4, 5]);
    }

    #[test]
    fn visit_ancestors_walks_to_root() {
        let map = sample();
        let issue = map.find("function:app/models/User::Token#issue").unwrap();
        let mut names = Vec::new();
        map.visit_ancestors(issue, |_, node| names.push(node.name().to_string()));
        assert_eq!(names, vec!["issue", "Token", "User", "models", "app"]);
    }

    #[test]
    fn dynamic_chain_merges_with_static_class() {
        let mut map = sample();
        let before = map.len();
        let mut spec = NodeSpec::new(CodeObjectType::Function, "destroy");
        spec.is_static = Some(false);
        let leaf = map
            .insert_chain(vec![NodeSpec::new(CodeObjectType::Class, "app/models/User"), spec])
            .unwrap();
        assert_eq!(map.len(), before + 1);
        assert_eq!(map.get(leaf).id(), "app/models/User#destroy");
        assert!(map.get(leaf).is_dynamic());
        let user = map.find("class:app/models/User").unwrap();
        assert!(!map.get(user).is_dynamic());
        assert_eq!(map.get(leaf).parent(), Some(user));
    }

    #[test]
    fn dynamic_chain_is_reused() {
        let mut map = ClassMap::default();
        let chain = || {
            vec![
                NodeSpec::new(CodeObjectType::Http, "HTTP server requests"),
                NodeSpec::new(CodeObjectType::Route, "GET /users"),
            ]
        };
        let a = map.insert_chain(chain()).unwrap();
        let b = map.insert_chain(chain()).unwrap();
        assert_eq!(a, b);
        assert_eq!(map.len(), 2);
        assert!(map.get(map.roots()[0]).is_dynamic());
    }

    #[test]
    fn unknown_types_are_preserved() {
        let map = ClassMap::build(&entries(r#"[{"type": "lambda", "name": "handler"}]"#));
        let node = map.get(map.roots()[0]);
        assert_eq!(node.kind(), &CodeObjectType::Other("lambda".to_string()));
        assert_eq!(map.to_entries()[0].kind, "lambda");
    }

    #[test]
    fn locations_and_functions() {
        let map = sample();
        let user = map.find("class:app/models/User").unwrap();
        assert_eq!(
            map.locations(user),
            vec!["app/models/token.rb".to_string(), "app/models/user.rb".to_string()]
        );
        assert_eq!(map.functions(user).len(), 2);
        let app = map.roots()[0];
        assert_eq!(map.functions(app).len(), 3);
        assert_eq!(map.classes(app).len(), 2);
    }

    #[test]
    fn entries_round_trip() {
        let map = sample();
        let entries = map.to_entries();
        let rebuilt = ClassMap::build(&entries);
        assert_eq!(rebuilt.len(), map.len());
        assert_eq!(entries[0].children[0].children[0].children[0].is_static, Some(true));
        assert_eq!(entries[0].is_static, None);
    }

    #[test]
    fn service_names() {
        assert_eq!(service_name("https://api.example.com/v1/users?x=1"), "api.example.com");
        assert_eq!(service_name("/relative"), "External service");
    }
}
