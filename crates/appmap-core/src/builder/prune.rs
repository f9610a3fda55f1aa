//! Size limiting for oversized traces.
//!
//! Pruning runs in two stages and stops as soon as the serialized document
//! fits the budget:
//!
//! 1. captured values (parameters, message entries, receivers, return
//!    values) are dropped, largest first; names and classes stay;
//! 2. function call/return pairs are removed, most frequently called
//!    function first. HTTP and SQL events are never removed.
//!
//! A call and its return are always removed together.

use std::collections::{BTreeMap, HashSet};

use tracing::info;

use crate::builder::normalize::pair_returns;
use crate::event::EventType;
use crate::models::{AppMapData, EventData, ParameterObject};

/// What a pruning pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub original_size: usize,
    pub final_size: usize,
    pub values_dropped: usize,
    pub events_removed: usize,
}

impl PruneReport {
    pub fn within(&self, max_bytes: usize) -> bool {
        self.final_size <= max_bytes
    }
}

fn serialized_len<T: serde::Serialize + ?Sized>(value: &T) -> usize {
    serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0)
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Receiver,
    Parameter(usize),
    Message(usize),
    ReturnValue,
}

fn slot_mut(event: &mut EventData, slot: Slot) -> Option<&mut ParameterObject> {
    match slot {
        Slot::Receiver => event.receiver.as_mut(),
        Slot::Parameter(i) => event.parameters.as_mut().and_then(|p| p.get_mut(i)),
        Slot::Message(i) => event.message.as_mut().and_then(|m| m.get_mut(i)),
        Slot::ReturnValue => event.return_value.as_mut(),
    }
}

/// Shrink `data` towards `max_bytes`. Returns what was removed; the result
/// may still exceed the budget when only HTTP and SQL events remain.
pub fn prune(data: &mut AppMapData, max_bytes: usize) -> PruneReport {
    let original_size = serialized_len(&*data);
    let mut report = PruneReport {
        original_size,
        final_size: original_size,
        ..Default::default()
    };
    if original_size <= max_bytes {
        return report;
    }

    let mut size = original_size;
    size = drop_values(data, size, max_bytes, &mut report);
    if size > max_bytes {
        remove_frequent_calls(data, size, max_bytes, &mut report);
    }

    report.final_size = serialized_len(&*data);
    info!(
        "Pruned trace from {} to {} bytes ({} values dropped, {} events removed)",
        report.original_size, report.final_size, report.values_dropped, report.events_removed
    );
    report
}

fn drop_values(
    data: &mut AppMapData,
    mut size: usize,
    max_bytes: usize,
    report: &mut PruneReport,
) -> usize {
    let mut candidates: Vec<(usize, usize, Slot)> = Vec::new();
    for (index, event) in data.events.iter().enumerate() {
        let mut push = |slot: Slot, object: &ParameterObject| {
            if let Some(value) = &object.value {
                candidates.push((serialized_len(value), index, slot));
            }
        };
        if let Some(receiver) = &event.receiver {
            push(Slot::Receiver, receiver);
        }
        for (i, p) in event.parameters.iter().flatten().enumerate() {
            push(Slot::Parameter(i), p);
        }
        for (i, m) in event.message.iter().flatten().enumerate() {
            push(Slot::Message(i), m);
        }
        if let Some(value) = &event.return_value {
            push(Slot::ReturnValue, value);
        }
    }
    // Largest first; earlier events first among equals.
    candidates.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

    for (value_len, index, slot) in candidates {
        if size <= max_bytes {
            break;
        }
        if let Some(object) = slot_mut(&mut data.events[index], slot) {
            object.value = None;
            // `,"value":` plus the value itself
            size = size.saturating_sub(value_len + 9);
            report.values_dropped += 1;
        }
    }
    size
}

fn remove_frequent_calls(
    data: &mut AppMapData,
    mut size: usize,
    max_bytes: usize,
    report: &mut PruneReport,
) {
    let returns: BTreeMap<usize, usize> = pair_returns(&data.events).into_iter().collect();

    let mut by_function: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (index, event) in data.events.iter().enumerate() {
        if !event.is_call() || EventType::of(event) != EventType::Function {
            continue;
        }
        let key = event.function_id().unwrap_or_default();
        by_function.entry(key).or_default().push(index);
    }
    let mut groups: Vec<(String, Vec<usize>)> = by_function.into_iter().collect();
    groups.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then(a.0.cmp(&b.0)));

    let mut removed: HashSet<usize> = HashSet::new();
    for (_, calls) in groups {
        if size <= max_bytes {
            break;
        }
        for call in calls {
            size = size.saturating_sub(serialized_len(&data.events[call]) + 1);
            removed.insert(call);
            if let Some(&ret) = returns.get(&call) {
                size = size.saturating_sub(serialized_len(&data.events[ret]) + 1);
                removed.insert(ret);
            }
        }
    }

    report.events_removed = removed.len();
    let mut index = 0;
    data.events.retain(|_| {
        let keep = !removed.contains(&index);
        index += 1;
        keep
    });
}
