use std::collections::HashMap;
use std::sync::Arc;

use moka::sync::Cache;
use serde_json::Value;

use crate::api::types::FlagDecision;

/// Process-wide cache of per-subject flag decisions, so a burst of captures
/// for the same subject doesn't recompute (or re-fetch) the full decision set
/// every time. Bounded; moka evicts in LRU fashion. Never persisted.
pub struct DecisionCache {
    cache: Cache<String, Arc<HashMap<String, FlagDecision>>>,
}

impl DecisionCache {
    pub fn new(max_capacity: u64) -> Self {
        DecisionCache {
            cache: Cache::new(max_capacity),
        }
    }

    pub fn get(&self, fingerprint: &str) -> Option<Arc<HashMap<String, FlagDecision>>> {
        self.cache.get(fingerprint)
    }

    pub fn insert(&self, fingerprint: String, decisions: Arc<HashMap<String, FlagDecision>>) {
        self.cache.insert(fingerprint, decisions);
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

/// Stable fingerprint of a subject context.
///
/// Object keys are rendered sorted at every level, so property maps that only
/// differ in insertion order fingerprint identically, and empty maps
/// fingerprint the same as absent ones.
pub fn subject_fingerprint(
    distinct_id: &str,
    person_properties: Option<&HashMap<String, Value>>,
    groups: Option<&HashMap<String, Value>>,
    group_properties: Option<&HashMap<String, HashMap<String, Value>>>,
) -> String {
    let mut out = String::new();
    write_canonical(&Value::String(distinct_id.to_string()), &mut out);
    out.push('|');
    write_canonical_map(person_properties, &mut out);
    out.push('|');
    write_canonical_map(groups, &mut out);
    out.push('|');
    match group_properties {
        Some(group_properties) if !group_properties.is_empty() => {
            let mut keys: Vec<&String> = group_properties.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(&Value::String((*key).clone()), &mut out);
                out.push(':');
                write_canonical_map(group_properties.get(*key), &mut out);
            }
            out.push('}');
        }
        _ => out.push_str("{}"),
    }
    out
}

fn write_canonical_map(map: Option<&HashMap<String, Value>>, out: &mut String) {
    match map {
        Some(map) if !map.is_empty() => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(&Value::String((*key).clone()), out);
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        _ => out.push_str("{}"),
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(&Value::String((*key).clone()), out);
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(values) => {
            out.push('[');
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(value, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
