//! Actor/action sequence diagrams derived from a built trace.
//!
//! Actions live in one flat list; each names the position of its enclosing
//! action. The JSON form keeps that shape, so reading, writing and dropping a
//! diagram never recurses however deep the call tree is.

use std::collections::HashMap;
use std::path::Path;

use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::appmap::AppMap;
use crate::builder::AppMapBuilder;
use crate::code_object::{service_name, CodeObjectType};
use crate::errors::{AppMapError, AppMapResult};
use crate::event::{EventRef, EventType};
use crate::models::sha256_hex;
use crate::sql::obfuscate;

pub const HTTP_ACTOR: &str = "http:HTTP server requests";
pub const DATABASE_ACTOR: &str = "database:Database";

/// A participant: a class, the HTTP server, the database or an external
/// service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub order: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    Function,
    ServerRpc,
    ClientRpc,
    Query,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::ServerRpc => "server-rpc",
            Self::ClientRpc => "client-rpc",
            Self::Query => "query",
        }
    }
}

/// Change annotation carried by actions of a diff diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffMode {
    Insert,
    Delete,
    Move,
}

/// One call in the diagram. `caller` and `callee` are actor ids; `parent` is
/// the position of the enclosing action and is set by [`Diagram::push`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(rename = "nodeType")]
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callee: Option<String>,
    pub name: String,
    #[serde(rename = "static", default)]
    pub is_static: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default)]
    pub digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_mode: Option<DiffMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent: Option<usize>,
}

impl Action {
    pub fn new(kind: ActionKind, caller: Option<String>, callee: String, name: String) -> Self {
        let mut action = Self {
            kind,
            caller,
            callee: Some(callee),
            name,
            is_static: false,
            status: None,
            digest: String::new(),
            diff_mode: None,
            parent: None,
        };
        action.digest = action.compute_digest();
        action
    }

    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    /// Digest of what is called, independent of children, caller and
    /// outcome.
    pub fn compute_digest(&self) -> String {
        sha256_hex(format!(
            "{}\u{0}{}\u{0}{}\u{0}{}",
            self.kind.as_str(),
            self.callee.as_deref().unwrap_or(""),
            self.name,
            self.is_static
        ))
    }
}

/// Actors and a forest of actions. An action's parent always precedes it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diagram {
    actors: Vec<Actor>,
    actions: Vec<Action>,
    children: Vec<Vec<usize>>,
    roots: Vec<usize>,
}

impl Diagram {
    pub fn new(actors: Vec<Actor>) -> Self {
        Self {
            actors,
            ..Self::default()
        }
    }

    /// Append `action` under `parent` and return its position. A parent that
    /// does not precede the new action makes it a root.
    pub fn push(&mut self, parent: Option<usize>, mut action: Action) -> usize {
        let position = self.actions.len();
        action.parent = parent.filter(|&p| p < position);
        match action.parent {
            Some(p) => self.children[p].push(position),
            None => self.roots.push(position),
        }
        self.actions.push(action);
        self.children.push(Vec::new());
        position
    }

    pub fn actors(&self) -> &[Actor] {
        &self.actors
    }

    pub fn actor(&self, id: &str) -> Option<&Actor> {
        self.actors.iter().find(|a| a.id == id)
    }

    /// Every action, in insertion order.
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn action(&self, position: usize) -> &Action {
        &self.actions[position]
    }

    pub fn children(&self, position: usize) -> &[usize] {
        &self.children[position]
    }

    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Positions of every action in pre-order, with their depth.
    pub fn preorder(&self) -> Vec<(usize, usize)> {
        let mut result = Vec::with_capacity(self.actions.len());
        let mut stack: Vec<(usize, usize)> = self.roots.iter().rev().map(|&r| (0, r)).collect();
        while let Some((depth, position)) = stack.pop() {
            result.push((depth, position));
            stack.extend(self.children[position].iter().rev().map(|&c| (depth + 1, c)));
        }
        result
    }

    /// Every action in pre-order, with its depth.
    pub fn flatten(&self) -> Vec<(usize, &Action)> {
        self.preorder()
            .into_iter()
            .map(|(depth, position)| (depth, &self.actions[position]))
            .collect()
    }

    /// Recompute every action digest.
    pub fn refresh_digests(&mut self) {
        for action in &mut self.actions {
            action.digest = action.compute_digest();
        }
    }

    /// Check that every caller and callee names a declared actor.
    pub fn validate(&self) -> AppMapResult<()> {
        for action in &self.actions {
            for id in action.caller.iter().chain(action.callee.iter()) {
                if self.actor(id).is_none() {
                    return Err(AppMapError::Diagram(format!(
                        "action {:?} refers to unknown actor {id:?}",
                        action.name
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Serialize for Diagram {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Diagram", 2)?;
        state.serialize_field("actors", &self.actors)?;
        state.serialize_field("actions", &self.actions)?;
        state.end()
    }
}

/// Nested action shape written by other sequence diagram tools.
#[derive(Deserialize)]
struct NestedAction {
    #[serde(flatten)]
    action: Action,
    #[serde(default)]
    children: Vec<NestedAction>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDiagram {
    actors: Vec<Actor>,
    #[serde(default)]
    actions: Option<Vec<Action>>,
    #[serde(default)]
    root_actions: Vec<NestedAction>,
}

impl RawDiagram {
    fn into_diagram(self) -> Result<Diagram, String> {
        let mut diagram = Diagram::new(self.actors);
        if let Some(actions) = self.actions {
            for (position, action) in actions.into_iter().enumerate() {
                if let Some(parent) = action.parent.filter(|&p| p >= position) {
                    return Err(format!(
                        "action {position} has parent {parent}, which does not precede it"
                    ));
                }
                let parent = action.parent;
                diagram.push(parent, action);
            }
            return Ok(diagram);
        }

        let mut stack: Vec<(Option<usize>, NestedAction)> =
            self.root_actions.into_iter().rev().map(|a| (None, a)).collect();
        while let Some((parent, nested)) = stack.pop() {
            let position = diagram.push(parent, nested.action);
            stack.extend(nested.children.into_iter().rev().map(|c| (Some(position), c)));
        }
        Ok(diagram)
    }
}

impl<'de> Deserialize<'de> for Diagram {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        RawDiagram::deserialize(deserializer)?
            .into_diagram()
            .map_err(serde::de::Error::custom)
    }
}

struct ActorTable {
    actors: Vec<Actor>,
    index: HashMap<String, usize>,
}

impl ActorTable {
    fn new() -> Self {
        Self {
            actors: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn intern(&mut self, id: String, name: String) -> String {
        if !self.index.contains_key(&id) {
            let order = self.actors.len();
            self.index.insert(id.clone(), order);
            self.actors.push(Actor {
                id: id.clone(),
                name,
                order,
            });
        }
        id
    }
}

fn class_actor(appmap: &AppMap, event: &EventRef<'_>) -> (String, String) {
    let map = appmap.class_map();
    let class = event
        .code_object_index()
        .and_then(|i| map.enclosing(i, &CodeObjectType::Class));
    match class {
        Some(class) => (
            format!("class:{}", map.get(class).id()),
            map.pretty_name(class),
        ),
        None => {
            let path = event.defined_class().unwrap_or_default();
            let name = path.rsplit('/').next().unwrap_or(&path).to_string();
            (format!("class:{path}"), name)
        }
    }
}

fn action_for(
    appmap: &AppMap,
    event: &EventRef<'_>,
    caller: Option<String>,
    actors: &mut ActorTable,
) -> Action {
    let mut action = match event.event_type() {
        EventType::HttpServerRequest => {
            let callee = actors.intern(HTTP_ACTOR.to_string(), "HTTP server requests".to_string());
            Action::new(ActionKind::ServerRpc, caller, callee, event.route().unwrap_or_default())
        }
        EventType::HttpClientRequest => {
            let url = event.request_path().unwrap_or_default();
            let host = service_name(url);
            let callee = actors.intern(format!("external-service:{host}"), host);
            Action::new(ActionKind::ClientRpc, caller, callee, event.route().unwrap_or_default())
        }
        EventType::Sql => {
            let callee = actors.intern(DATABASE_ACTOR.to_string(), "Database".to_string());
            let name = obfuscate(event.sql_query().unwrap_or_default(), event.database_type());
            Action::new(ActionKind::Query, caller, callee, name)
        }
        EventType::Function => {
            let (id, name) = class_actor(appmap, event);
            let callee = actors.intern(id, name);
            let mut action = Action::new(
                ActionKind::Function,
                caller,
                callee,
                event.method_id().unwrap_or_default().to_string(),
            );
            action.is_static = event.is_static();
            action.digest = action.compute_digest();
            action
        }
    };
    action.status = event.status_code();
    action
}

/// Sequence diagram of every call in the trace.
pub fn build_diagram(appmap: &AppMap) -> Diagram {
    let mut actors = ActorTable::new();
    let mut actions: Vec<(Option<usize>, Action)> = Vec::new();
    let mut stack: Vec<(Option<usize>, EventRef<'_>)> =
        appmap.root_events().into_iter().rev().map(|e| (None, e)).collect();

    while let Some((parent, event)) = stack.pop() {
        let caller = parent.and_then(|p| actions[p].1.callee.clone());
        let action = action_for(appmap, &event, caller, &mut actors);
        let position = actions.len();
        actions.push((parent, action));
        stack.extend(event.children().into_iter().rev().map(|c| (Some(position), c)));
    }

    let mut diagram = Diagram::new(actors.actors);
    for (parent, action) in actions {
        diagram.push(parent, action);
    }
    diagram
}

/// Parse either sequence diagram JSON or trace JSON (which is built and
/// converted on the fly).
pub fn read_diagram(bytes: &[u8]) -> AppMapResult<Diagram> {
    let value: Value = serde_json::from_slice(bytes)?;
    let has = |key: &str| value.get(key).is_some();

    if has("actors") && (has("actions") || has("rootActions")) {
        let mut diagram: Diagram = serde_json::from_value(value)?;
        diagram.validate()?;
        diagram.refresh_digests();
        return Ok(diagram);
    }
    if has("classMap") && has("events") && has("metadata") {
        let appmap = AppMapBuilder::source(bytes)?.normalize().build();
        return Ok(build_diagram(&appmap));
    }
    Err(AppMapError::Diagram(
        "input must be AppMap or sequence diagram JSON".to_string(),
    ))
}

pub fn read_diagram_file(path: &Path) -> AppMapResult<Diagram> {
    let bytes = std::fs::read(path)?;
    read_diagram(&bytes).map_err(|e| match e {
        AppMapError::Diagram(message) => {
            AppMapError::Diagram(format!("{}: {message}", path.display()))
        }
        other => other,
    })
}
