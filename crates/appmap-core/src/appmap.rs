//! The built, immutable trace aggregate.

use std::collections::HashMap;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use crate::code_object::ClassMap;
use crate::event::{Event, EventRef};
use crate::models::{AppMapData, EventData, Extra, Metadata};

/// A fully linked trace: metadata, the code object tree and the flat event
/// sequence. Produced by [`crate::builder::AppMapBuilder::build`] and never
/// mutated afterwards, so it can be shared freely between readers.
#[derive(Debug)]
pub struct AppMap {
    pub(crate) version: Option<String>,
    pub(crate) metadata: Metadata,
    pub(crate) class_map: ClassMap,
    pub(crate) events: Vec<Event>,
    pub(crate) roots: Vec<usize>,
    pub(crate) by_id: HashMap<u64, usize>,
    pub(crate) extra: Extra,
}

impl AppMap {
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Display name: `metadata.name`, or empty.
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("")
    }

    pub fn class_map(&self) -> &ClassMap {
        &self.class_map
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn event(&self, index: usize) -> EventRef<'_> {
        EventRef::new(self, index)
    }

    /// All events in emission order.
    pub fn events(&self) -> impl Iterator<Item = EventRef<'_>> + '_ {
        (0..self.events.len()).map(move |i| EventRef::new(self, i))
    }

    /// Top-level calls, in emission order.
    pub fn root_events(&self) -> Vec<EventRef<'_>> {
        self.roots.iter().map(|&i| EventRef::new(self, i)).collect()
    }

    pub fn event_by_id(&self, id: u64) -> Option<EventRef<'_>> {
        self.by_id.get(&id).map(|&i| EventRef::new(self, i))
    }

    /// Call events bound to a code object, in emission order.
    pub fn events_of(&self, code_object: usize) -> Vec<EventRef<'_>> {
        self.class_map
            .get(code_object)
            .events()
            .iter()
            .map(|&i| EventRef::new(self, i))
            .collect()
    }

    /// Raw document form, e.g. for re-serializing after normalization.
    pub fn to_data(&self) -> AppMapData {
        AppMapData {
            version: self.version.clone(),
            metadata: self.metadata.clone(),
            class_map: self.class_map.to_entries(),
            events: self.events.iter().map(|e| e.data.clone()).collect(),
            extra: self.extra.clone(),
        }
    }
}

struct EventSeq<'a>(&'a [Event]);

impl Serialize for EventSeq<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter().map(|e| -> &EventData { &e.data }))
    }
}

impl Serialize for AppMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        const KNOWN: [&str; 4] = ["version", "metadata", "classMap", "events"];
        let mut map = serializer.serialize_map(None)?;
        if let Some(version) = &self.version {
            map.serialize_entry("version", version)?;
        }
        map.serialize_entry("metadata", &self.metadata)?;
        map.serialize_entry("classMap", &self.class_map.to_entries())?;
        map.serialize_entry("events", &EventSeq(&self.events))?;
        for (key, value) in &self.extra {
            if !KNOWN.contains(&key.as_str()) {
                map.serialize_entry(key, value)?;
            }
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::{fixture_appmap, nested_function_trace};

    #[test]
    fn serialization_omits_back_references() {
        let appmap = fixture_appmap(&nested_function_trace());
        let json = serde_json::to_value(&appmap).unwrap();
        assert!(json["events"][0].get("parent").is_none());
        assert!(json["events"][0].get("linked").is_none());
        assert!(json["classMap"][0].get("parent").is_none());
        assert_eq!(json["events"].as_array().unwrap().len(), appmap.len());
    }

    #[test]
    fn serialization_round_trips() {
        let appmap = fixture_appmap(&nested_function_trace());
        let first = serde_json::to_string(&appmap).unwrap();
        let again = fixture_appmap(&first);
        assert_eq!(serde_json::to_string(&again).unwrap(), first);
    }

    #[test]
    fn root_events_and_lookup() {
        let appmap = fixture_appmap(&nested_function_trace());
        let roots = appmap.root_events();
        assert!(roots.iter().all(|e| e.is_call() && e.parent().is_none()));
        let event = appmap.event_by_id(3).unwrap();
        assert_eq!(event.method_id(), Some("getTasks"));
        assert!(appmap.event_by_id(999).is_none());
    }

    #[test]
    fn every_call_is_bound_to_its_code_object() {
        let appmap = fixture_appmap(&nested_function_trace());
        for event in appmap.events().filter(|e| e.is_call()) {
            let index = event.code_object_index().unwrap();
            assert!(appmap.events_of(index).contains(&event));
        }
    }
}
