//! Merge request field codec.
//!
//! The issue tracker has no native merge-request type, so MR attributes live
//! in the issue description as `key: value` lines under a type marker:
//!
//! ```text
//! type: merge-request
//! branch: polecat/Nux/gt-xyz
//! target: main
//! source_issue: gt-xyz
//! worker: Nux
//! rig: gastown
//! ```
//!
//! Decoding is total: unknown keys are ignored, missing keys decode to empty
//! strings, and only a missing marker makes a description "not an MR".
//! Values are taken verbatim after the single space that follows `key:`.

use serde::{Deserialize, Serialize};

/// Marker line identifying a merge-request description.
pub const TYPE_MARKER: &str = "type: merge-request";

const KEY_BRANCH: &str = "branch";
const KEY_TARGET: &str = "target";
const KEY_SOURCE_ISSUE: &str = "source_issue";
const KEY_WORKER: &str = "worker";
const KEY_RIG: &str = "rig";

/// MR attributes carried in the description text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MrFields {
    pub branch: String,
    pub target: String,
    pub source_issue: String,
    pub worker: String,
    pub rig: String,
}

impl MrFields {
    fn entries(&self) -> [(&'static str, &str); 5] {
        [
            (KEY_BRANCH, &self.branch),
            (KEY_TARGET, &self.target),
            (KEY_SOURCE_ISSUE, &self.source_issue),
            (KEY_WORKER, &self.worker),
            (KEY_RIG, &self.rig),
        ]
    }

    fn slot(&mut self, key: &str) -> Option<&mut String> {
        match key {
            KEY_BRANCH => Some(&mut self.branch),
            KEY_TARGET => Some(&mut self.target),
            KEY_SOURCE_ISSUE => Some(&mut self.source_issue),
            KEY_WORKER => Some(&mut self.worker),
            KEY_RIG => Some(&mut self.rig),
            _ => None,
        }
    }
}

/// Encode fields as a description, marker first, empty fields omitted.
///
/// Values are written verbatim; callers must not pass multi-line values.
#[must_use]
pub fn encode(fields: &MrFields) -> String {
    std::iter::once(TYPE_MARKER.to_string())
        .chain(
            fields
                .entries()
                .into_iter()
                .filter(|(_, value)| !value.is_empty())
                .map(|(key, value)| format!("{key}: {value}")),
        )
        .collect::<Vec<_>>()
        .join("\n")
}

/// Returns true if the description carries the merge-request marker.
#[must_use]
pub fn is_merge_request(description: &str) -> bool {
    description.lines().any(|line| line.trim() == TYPE_MARKER)
}

/// Decode fields from a description; `None` when the marker is absent.
///
/// The first occurrence of a key wins.
#[must_use]
pub fn decode(description: &str) -> Option<MrFields> {
    if !is_merge_request(description) {
        return None;
    }

    let mut fields = MrFields::default();
    let mut seen: Vec<&'static str> = Vec::new();

    for (key, value) in description.lines().filter_map(|line| line.split_once(':')) {
        let key = key.trim().to_ascii_lowercase();
        let Some(canonical) = canonical_key(&key) else {
            continue;
        };
        if seen.contains(&canonical) {
            continue;
        }
        seen.push(canonical);
        if let Some(slot) = fields.slot(canonical) {
            *slot = value.strip_prefix(' ').unwrap_or(value).to_string();
        }
    }

    Some(fields)
}

fn canonical_key(key: &str) -> Option<&'static str> {
    [KEY_BRANCH, KEY_TARGET, KEY_SOURCE_ISSUE, KEY_WORKER, KEY_RIG]
        .into_iter()
        .find(|k| *k == key)
}
