//! Builds an immutable [`AppMap`] from raw trace data.
//!
//! `AppMapBuilder::source(bytes)?.normalize().prune(max_bytes).build()`
//!
//! Every step but `source` and `build` is optional. `build` consumes the
//! builder; the returned map is never mutated afterwards.

pub mod normalize;
pub mod prune;

use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

use crate::appmap::AppMap;
use crate::code_object::{chain_for_event, ClassMap};
use crate::errors::{AppMapError, AppMapResult};
use crate::event::{link, Event, EventType};
use crate::models::AppMapData;

pub use prune::PruneReport;

pub struct AppMapBuilder {
    data: AppMapData,
    prune_report: Option<PruneReport>,
}

impl AppMapBuilder {
    pub fn new(data: AppMapData) -> Self {
        Self {
            data,
            prune_report: None,
        }
    }

    /// Parse trace JSON. Malformed input is a fatal [`AppMapError::Json`].
    pub fn source(bytes: &[u8]) -> AppMapResult<Self> {
        Ok(Self::new(AppMapData::from_slice(bytes)?))
    }

    /// Read and parse a trace file, refusing files over `max_size` bytes
    /// before reading them.
    pub fn from_file(path: &Path, max_size: u64) -> AppMapResult<Self> {
        let size = std::fs::metadata(path)?.len();
        if size > max_size {
            return Err(AppMapError::FileTooLarge {
                path: path.to_path_buf(),
                size,
                limit: max_size,
            });
        }
        let bytes = std::fs::read(path)?;
        Self::source(&bytes)
    }

    pub fn data(&self) -> &AppMapData {
        &self.data
    }

    pub fn prune_report(&self) -> Option<&PruneReport> {
        self.prune_report.as_ref()
    }

    pub fn normalize(mut self) -> Self {
        normalize::normalize(&mut self.data);
        self
    }

    pub fn prune(mut self, max_bytes: usize) -> Self {
        self.prune_report = Some(prune::prune(&mut self.data, max_bytes));
        self
    }

    pub fn build(self) -> AppMap {
        let AppMapData {
            version,
            metadata,
            class_map,
            events,
            extra,
        } = self.data;

        let mut class_map = ClassMap::build(&class_map);
        let mut events: Vec<Event> = events.into_iter().map(Event::new).collect();

        let mut by_id: HashMap<u64, usize> = HashMap::with_capacity(events.len());
        for (index, event) in events.iter().enumerate() {
            by_id.entry(event.data.id).or_insert(index);
        }

        let roots = link_events(&mut events, &by_id);
        bind_code_objects(&mut events, &mut class_map);
        assign_data_references(&mut events);

        AppMap {
            version,
            metadata,
            class_map,
            events,
            roots,
            by_id,
            extra,
        }
    }
}

/// Shorthand for [`AppMapBuilder::source`].
pub fn build_appmap(bytes: &[u8]) -> AppMapResult<AppMapBuilder> {
    AppMapBuilder::source(bytes)
}

/// Single pass over the emission-ordered events with one call stack per
/// thread: calls become children of the thread's open call, returns link to
/// their call and unwind the stack to it. Returns the root calls.
fn link_events(events: &mut [Event], by_id: &HashMap<u64, usize>) -> Vec<usize> {
    let mut stacks: HashMap<u64, Vec<usize>> = HashMap::new();
    let mut roots = Vec::new();

    for index in 0..events.len() {
        let thread = events[index].data.thread();

        if events[index].data.is_call() {
            let stack = stacks.entry(thread).or_default();
            match stack.last().copied() {
                Some(parent) => {
                    events[index].parent = Some(parent);
                    events[index].depth = events[parent].depth + 1;
                    events[parent].children.push(index);
                }
                None => roots.push(index),
            }
            stack.push(index);
            continue;
        }

        let call = match events[index].data.parent_id {
            Some(parent_id) => {
                let call = by_id
                    .get(&parent_id)
                    .copied()
                    .filter(|&c| events[c].data.is_call());
                // The return may be recorded on another thread than its
                // call; unwind the stack the call was pushed on.
                if let Some(call) = call {
                    if let Some(stack) = stacks.get_mut(&events[call].data.thread()) {
                        if let Some(position) = stack.iter().rposition(|&s| s == call) {
                            stack.truncate(position);
                        }
                    }
                }
                call
            }
            None => stacks.get_mut(&thread).and_then(|stack| stack.pop()),
        };

        let Some(call) = call else {
            debug!("Return event {} has no matching call", events[index].data.id);
            continue;
        };
        if !link(events, call, index) {
            debug!(
                "Return event {} not linked; call {} already has a return",
                events[index].data.id, events[call].data.id
            );
            continue;
        }
        events[index].parent = events[call].parent;
        events[index].depth = events[call].depth;
    }

    for (thread, stack) in stacks {
        if !stack.is_empty() {
            debug!("{} call(s) on thread {thread} never returned", stack.len());
        }
    }
    roots
}

/// Bind every call to its code object, synthesizing a dynamic chain when
/// the class map has no entry for it.
fn bind_code_objects(events: &mut [Event], class_map: &mut ClassMap) {
    for index in 0..events.len() {
        let data = &events[index].data;
        if !data.is_call() {
            continue;
        }
        let known = if EventType::of(data) == EventType::Function {
            data.function_id()
                .and_then(|id| class_map.find(&format!("function:{id}")))
        } else {
            None
        };
        let code_object = match known {
            Some(found) => Some(found),
            None => class_map.insert_chain(chain_for_event(data)),
        };
        if let Some(code_object) = code_object {
            class_map.bind_event(code_object, index);
            events[index].code_object = Some(code_object);
        }
    }
}

/// Link each call to the earlier returns whose return value it receives,
/// matched by `object_id`.
fn assign_data_references(events: &mut [Event]) {
    let mut producers: HashMap<i64, usize> = HashMap::new();
    for index in 0..events.len() {
        let data = &events[index].data;
        if data.is_return() {
            if let Some(object_id) = data.return_value.as_ref().and_then(|v| v.object_id) {
                producers.insert(object_id, index);
            }
            continue;
        }
        let mut references: Vec<usize> = data
            .receiver
            .iter()
            .chain(data.parameters.iter().flatten())
            .filter_map(|p| p.object_id)
            .filter_map(|id| producers.get(&id).copied())
            .collect();
        references.sort_unstable();
        references.dedup();
        events[index].data_references = references;
    }
}
