use crate::schema::{AuthorType, DocumentRecord, ExtractedDataVersion, FieldChange};
use chrono::Utc;
use log::debug;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use uuid::Uuid;

const ROOT_PATH: &str = "__root__";

/// Key under which non-map payloads are stored once flattened.
pub const WRAPPED_VALUE_KEY: &str = "value";

/// Normalizes a payload into the map shape stored in snapshots: maps are kept,
/// null becomes `{}` and any other value is wrapped as `{"value": ...}`.
pub fn flatten_payload(payload: &Value) -> Map<String, Value> {
    match payload {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            let mut wrapped = Map::new();
            wrapped.insert(WRAPPED_VALUE_KEY.to_string(), other.clone());
            wrapped
        }
    }
}

/// Leaf-level differences between two payloads, keys visited in sorted order.
pub fn diff(previous: &Value, current: &Value) -> Vec<FieldChange> {
    match (previous, current) {
        (Value::Object(prev), Value::Object(curr)) => diff_maps(prev, curr, ""),
        _ if same_value(previous, current) => Vec::new(),
        _ => vec![FieldChange {
            field_path: ROOT_PATH.to_string(),
            previous_value: Some(previous.clone()),
            current_value: Some(current.clone()),
        }],
    }
}

pub fn diff_maps(
    previous: &Map<String, Value>,
    current: &Map<String, Value>,
    prefix: &str,
) -> Vec<FieldChange> {
    let keys: BTreeSet<&String> = previous.keys().chain(current.keys()).collect();
    let mut changes = Vec::new();

    for key in keys {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };

        match (previous.get(key), current.get(key)) {
            (Some(Value::Object(prev)), Some(Value::Object(curr))) => {
                changes.extend(diff_maps(prev, curr, &path));
            }
            (prev, curr) => {
                let unchanged = match (prev, curr) {
                    (Some(a), Some(b)) => same_value(a, b),
                    (None, None) => true,
                    _ => false,
                };
                if !unchanged {
                    changes.push(FieldChange {
                        field_path: path,
                        previous_value: prev.cloned(),
                        current_value: curr.cloned(),
                    });
                }
            }
        }
    }

    changes
}

/// Structural equality where numbers compare by value, so `150` and `150.0`
/// are the same amount.
pub fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| same_value(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(key, x)| ys.get(key).is_some_and(|y| same_value(x, y)))
        }
        _ => a == b,
    }
}

impl DocumentRecord {
    /// Replaces `extracted_data` with the flattened `new_data` and appends a
    /// version entry, unless nothing changed.
    ///
    /// Returns the new version number, or `None` when the snapshot was
    /// identical and the document was left untouched.
    pub fn record_version(
        &mut self,
        new_data: &Value,
        author_type: AuthorType,
        author_id: Option<Uuid>,
    ) -> Option<u32> {
        let current = flatten_payload(new_data);
        let previous = flatten_payload(self.extracted_data.as_ref().unwrap_or(&Value::Null));

        let changes = diff_maps(&previous, &current, "");
        if changes.is_empty()
            && same_value(&Value::Object(previous), &Value::Object(current.clone()))
        {
            debug!("Document {} unchanged, no version recorded", self.id);
            return None;
        }

        let version = self.extracted_data_history.len() as u32 + 1;
        let now = Utc::now();

        debug!(
            "Recording version {} of document {} ({} changes)",
            version,
            self.id,
            changes.len()
        );

        self.extracted_data_history.push(ExtractedDataVersion {
            version,
            author_type,
            author_id,
            created_at: now,
            data_snapshot: current.clone(),
            changes,
        });
        self.extracted_data = Some(Value::Object(current));
        self.updated_at = now;

        Some(version)
    }
}
