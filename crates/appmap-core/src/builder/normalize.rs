//! Forward-compatibility fixes applied to raw trace data before linking.

use std::collections::HashMap;

use tracing::debug;

use crate::models::{AppMapData, EventData, GitStatus, HttpResponse};

/// Fill in fields that older agents left out or spelled differently.
///
/// - events are stably sorted by `id`
/// - returns without `parent_id` get the id of the call they close
/// - `status_code` is copied from the legacy `status` on HTTP responses
/// - a string `git.status` becomes a list of non-empty lines
pub fn normalize(data: &mut AppMapData) {
    data.events.sort_by_key(|e| e.id);
    assign_parent_ids(&mut data.events);

    for event in &mut data.events {
        fill_status_code(event.http_server_response.as_mut());
        fill_status_code(event.http_client_response.as_mut());
    }

    if let Some(git) = data.metadata.git.as_mut() {
        if let Some(GitStatus::Text(text)) = &git.status {
            let lines = text
                .lines()
                .map(str::trim_end)
                .filter(|l| !l.trim().is_empty())
                .map(str::to_string)
                .collect();
            git.status = Some(GitStatus::Lines(lines));
        }
    }
}

fn fill_status_code(response: Option<&mut HttpResponse>) {
    if let Some(response) = response {
        if response.status_code.is_none() {
            response.status_code = response.status;
        }
    }
}

fn assign_parent_ids(events: &mut [EventData]) {
    let pairs = pair_returns(events);
    for (call, ret) in pairs {
        if events[ret].parent_id.is_none() {
            events[ret].parent_id = Some(events[call].id);
        }
    }
}

/// Match each return to the call it closes, as `(call index, return index)`
/// pairs in return order.
///
/// A return with `parent_id` closes that call; otherwise it closes the most
/// recent open call on its thread. Either way the thread's stack unwinds to
/// the matched call, so calls that never returned are skipped over.
pub fn pair_returns(events: &[EventData]) -> Vec<(usize, usize)> {
    let mut by_id: HashMap<u64, usize> = HashMap::with_capacity(events.len());
    for (index, event) in events.iter().enumerate() {
        if event.is_call() {
            by_id.entry(event.id).or_insert(index);
        }
    }

    let mut stacks: HashMap<u64, Vec<usize>> = HashMap::new();
    let mut pairs = Vec::new();
    for (index, event) in events.iter().enumerate() {
        let stack = stacks.entry(event.thread()).or_default();
        if event.is_call() {
            stack.push(index);
            continue;
        }
        let call = match event.parent_id {
            Some(parent_id) => {
                let call = by_id.get(&parent_id).copied();
                if let Some(position) = call.and_then(|c| stack.iter().rposition(|&s| s == c)) {
                    stack.truncate(position);
                }
                call
            }
            None => stack.pop(),
        };
        match call {
            Some(call) => pairs.push((call, index)),
            None => debug!("Return event {} has no matching call", event.id),
        }
    }
    pairs
}
