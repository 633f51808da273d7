//! Tag reconciliation.
//!
//! Decides, per tag, whether a freshly generated value replaces what the image
//! already carries. Everything here is pure: the orchestrator reads the
//! snapshot, calls [`reconcile`], and only then touches the file, so dry runs
//! and real runs share the exact same decisions.

use crate::config::TagBinding;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Tag name -> value to write. Ordered so reports and writes are deterministic.
pub type WriteSet = BTreeMap<String, String>;
/// Tag name -> current value as reported by the metadata tool.
pub type TagSnapshot = HashMap<String, Value>;
pub type PolicyMap = HashMap<String, OverwritePolicy>;

pub const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverwritePolicy {
    /// Always write.
    #[default]
    Allow,
    /// Write only when the existing value is empty or missing.
    Avoid,
}

/// Generated values for one image, merged across tasks in task order.
#[derive(Debug, Clone, Default)]
pub struct PendingWrites {
    values: WriteSet,
    policies: PolicyMap,
}

impl PendingWrites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `text` to every tag of a task. A later task targeting the same
    /// tag replaces both the value and the policy.
    pub fn add_task_output(&mut self, bindings: &[TagBinding], text: &str) {
        for binding in bindings {
            self.values.insert(binding.name.clone(), text.to_string());
            match binding.overwrite_policy {
                Some(policy) => {
                    self.policies.insert(binding.name.clone(), policy);
                }
                None => {
                    self.policies.remove(&binding.name);
                }
            }
        }
    }

    pub fn values(&self) -> &WriteSet {
        &self.values
    }

    pub fn policies(&self) -> &PolicyMap {
        &self.policies
    }

    pub fn tag_names(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }
}

/// A write withheld because an `Avoid` tag already holds a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedTag {
    pub tag: String,
    pub existing: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    pub writes: WriteSet,
    pub skipped: Vec<SkippedTag>,
}

impl Reconciliation {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Resolves pending values against the image's current tags.
///
/// Tags without an explicit policy fall back to `default_policy`.
pub fn reconcile(
    pending: &WriteSet,
    policies: &PolicyMap,
    existing: &TagSnapshot,
    default_policy: OverwritePolicy,
) -> Reconciliation {
    let mut out = Reconciliation::default();
    for (tag, value) in pending {
        let policy = policies.get(tag).copied().unwrap_or(default_policy);
        match policy {
            OverwritePolicy::Allow => {
                out.writes.insert(tag.clone(), value.clone());
            }
            OverwritePolicy::Avoid => match lookup_existing(existing, tag) {
                Some(current) if !is_empty_value(current) => {
                    out.skipped.push(SkippedTag {
                        tag: tag.clone(),
                        existing: preview(&display_value(current), PREVIEW_CHARS),
                    });
                }
                _ => {
                    out.writes.insert(tag.clone(), value.clone());
                }
            },
        }
    }
    out
}

/// Empty means null, blank text, or a container holding only empty items.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.iter().all(is_empty_value),
        Value::Object(map) => map.values().all(is_empty_value),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Finds the current value for a configured tag name.
///
/// Snapshot keys carry their groups (`XMP:XMP-dc:Title`). A configured
/// `Group:Tag` only matches keys listing that group; a bare configured name
/// matches the tag in any group, preferring a non-empty value. Case is ignored.
pub fn lookup_existing<'a>(existing: &'a TagSnapshot, tag: &str) -> Option<&'a Value> {
    if let Some(v) = existing.get(tag) {
        return Some(v);
    }
    let (wanted_groups, wanted) = split_tag_name(tag);
    let mut found: Option<&Value> = None;
    for (key, value) in existing {
        let (groups, name) = split_tag_name(key);
        if !name.eq_ignore_ascii_case(wanted) {
            continue;
        }
        let group_ok = wanted_groups
            .iter()
            .all(|w| groups.iter().any(|g| g.eq_ignore_ascii_case(w)));
        if !group_ok {
            continue;
        }
        if !is_empty_value(value) {
            return Some(value);
        }
        found.get_or_insert(value);
    }
    found
}

/// `XMP:XMP-dc:Title` -> (`["XMP", "XMP-dc"]`, `Title`).
pub fn split_tag_name(tag: &str) -> (Vec<&str>, &str) {
    let mut parts: Vec<&str> = tag.split(':').collect();
    let name = parts.pop().unwrap_or(tag);
    (parts, name)
}

pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(display_value)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

/// Cuts `text` to `max_chars` characters, marking the cut with `...`.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
