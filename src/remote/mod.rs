//! Claim-check offload of message sub-trees to a blob store.

use std::time::{Duration, SystemTime};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{MessageError, Result};
use crate::path;

pub mod fs;
pub mod memory;

pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;

pub trait BlobStore: Send + Sync {
    fn get(&self, bucket: &str, key: &str) -> anyhow::Result<Vec<u8>>;
    fn put(&self, bucket: &str, key: &str, body: &[u8], expires: SystemTime)
        -> anyhow::Result<()>;
}

/// The `replace` key left in a message whose content lives in the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReplacePointer {
    #[serde(rename = "Bucket")]
    pub bucket: String,
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "TargetPath")]
    pub target_path: String,
}

/// The `ReplaceConfig` directive asking for part of an outgoing message to be offloaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ReplaceConfig {
    #[serde(rename = "Path", default)]
    pub path: Option<String>,
    #[serde(rename = "FullMessage", default, deserialize_with = "truthy_flag")]
    pub full_message: bool,
    #[serde(rename = "MaxSize", default, deserialize_with = "lenient_size")]
    pub max_size: Option<u64>,
    #[serde(rename = "TargetPath", default)]
    pub target_path: Option<String>,
}

impl ReplaceConfig {
    pub fn source_path(&self) -> Result<String> {
        if self.full_message {
            return Ok("$".to_string());
        }
        self.path
            .clone()
            .ok_or_else(|| MessageError::MissingField("ReplaceConfig.Path".to_string()))
    }

    pub fn target_path(&self) -> Result<String> {
        match &self.target_path {
            Some(target) => Ok(target.clone()),
            None => self.source_path(),
        }
    }
}

fn truthy_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    Ok(match raw {
        Value::String(text) => text.eq_ignore_ascii_case("true"),
        other => is_truthy(&other),
    })
}

fn lenient_size<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::Number(n)) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        Some(Value::String(text)) => text.trim().parse().ok(),
        _ => None,
    })
}

/// Truthiness of a wire value: null, false, zero and empty strings or containers are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// A local exception that a stale remote value must not mask.
fn is_live_exception(value: Option<&Value>) -> bool {
    value.is_some_and(|v| is_truthy(v) && v.as_str() != Some("None"))
}

/// Merges `incoming` into `existing`: objects key by key, anything else overwritten.
pub fn merge(existing: &mut Value, incoming: Value) {
    match (existing, incoming) {
        (Value::Object(current), Value::Object(update)) => {
            for (key, value) in update {
                match current.get_mut(&key) {
                    Some(slot) => merge(slot, value),
                    None => {
                        current.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Resolves a `replace` pointer, merging the fetched content into its target
/// and consuming the pointer. Messages without one are returned as is.
pub fn load_remote_event(mut message: Value, store: &dyn BlobStore) -> Result<Value> {
    let Some(raw) = message.get("replace") else {
        return Ok(message);
    };
    let pointer: ReplacePointer = serde_json::from_value(raw.clone())
        .map_err(|err| MessageError::InvalidInput(format!("malformed replace pointer: {err}")))?;
    debug!(bucket = %pointer.bucket, key = %pointer.key, "loading remote event");

    let local_exception = message.get("exception").cloned();
    let body = store.get(&pointer.bucket, &pointer.key)?;
    let remote: Value = serde_json::from_slice(&body)?;

    let location = path::locate_one(&message, &pointer.target_path)?;
    let target = message
        .pointer_mut(&location)
        .ok_or_else(|| MessageError::PathCardinality {
            path: pointer.target_path.clone(),
            matches: 0,
        })?;
    merge(target, remote);

    if let Value::Object(map) = &mut message {
        map.remove("replace");
        if is_live_exception(local_exception.as_ref()) && !is_live_exception(map.get("exception"))
        {
            if let Some(exception) = local_exception {
                map.insert("exception".to_string(), exception);
            }
        }
    }
    debug!(target = %pointer.target_path, "remote event loaded");
    Ok(message)
}

/// Offloads the sub-tree named by the message's `ReplaceConfig` when its
/// serialized size reaches `threshold` bytes (a directive's `MaxSize` wins).
/// Size is the length of compact JSON (no spaces after `,` or `:`), so it runs
/// smaller than a pretty or Python-style `json.dumps` rendering of the same tree.
pub fn store_remote_response(
    mut message: Value,
    threshold: u64,
    stripped_keys: &[String],
    retention: Duration,
    store: &dyn BlobStore,
) -> Result<Value> {
    let Some(raw) = message.get("ReplaceConfig").filter(|v| is_truthy(v)) else {
        return Ok(message);
    };
    let config: ReplaceConfig = serde_json::from_value(raw.clone())
        .map_err(|err| MessageError::InvalidInput(format!("malformed ReplaceConfig: {err}")))?;
    let source_path = config.source_path()?;
    let target_path = config.target_path()?;
    let threshold = config.max_size.unwrap_or(threshold);

    if let Value::Object(map) = &mut message {
        for key in stripped_keys {
            if map.get(key).is_some_and(is_truthy) {
                map.remove(key);
            }
        }
    }
    let cumulus_meta = message.get("cumulus_meta").cloned();

    let location = path::locate_one(&message, &source_path)?;
    let body = match message.pointer(&location) {
        Some(node) => serde_json::to_vec(node)?,
        None => {
            return Err(MessageError::PathCardinality {
                path: source_path,
                matches: 0,
            })
        }
    };
    if (body.len() as u64) < threshold {
        debug!(size = body.len(), threshold, "response kept inline");
        return Ok(message);
    }

    let bucket = cumulus_meta
        .as_ref()
        .and_then(|meta| meta.get("system_bucket"))
        .and_then(Value::as_str)
        .ok_or_else(|| MessageError::MissingField("cumulus_meta.system_bucket".to_string()))?
        .to_string();
    let key = format!("events/{}", Uuid::new_v4());
    store.put(&bucket, &key, &body, SystemTime::now() + retention)?;
    info!(bucket = %bucket, key = %key, size = body.len(), "externalized {source_path}");

    if let Some(node) = message.pointer_mut(&location) {
        match node {
            Value::Object(map) => map.clear(),
            Value::Array(items) => items.clear(),
            scalar => *scalar = Value::String(String::new()),
        }
    }
    let pointer = ReplacePointer {
        bucket,
        key,
        target_path,
    };
    if let Value::Object(map) = &mut message {
        if let Some(meta) = cumulus_meta {
            map.entry("cumulus_meta").or_insert(meta);
        }
        map.insert("replace".to_string(), serde_json::to_value(pointer)?);
    }
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

    fn keys() -> Vec<String> {
        vec!["ReplaceConfig".to_string(), "task_config".to_string()]
    }

    #[test]
    fn messages_without_pointer_load_unchanged() {
        let store = MemoryBlobStore::new();
        let message = json!({ "payload": { "a": 1 }, "exception": "None" });
        assert_eq!(load_remote_event(message.clone(), &store).unwrap(), message);
    }

    #[test]
    fn load_merges_object_content_and_drops_pointer() {
        let store = MemoryBlobStore::new();
        store.insert("bucket", "events/1", br#"{"b": 2, "nested": {"y": 2}}"#.to_vec());
        let message = json!({
            "payload": { "a": 1, "nested": { "x": 1 } },
            "replace": { "Bucket": "bucket", "Key": "events/1", "TargetPath": "$.payload" }
        });
        let loaded = load_remote_event(message, &store).unwrap();
        assert_eq!(
            loaded,
            json!({ "payload": { "a": 1, "b": 2, "nested": { "x": 1, "y": 2 } } })
        );
    }

    #[test]
    fn load_overwrites_scalar_targets() {
        let store = MemoryBlobStore::new();
        store.insert("bucket", "k", br#"[1, 2, 3]"#.to_vec());
        let message = json!({
            "payload": "",
            "replace": { "Bucket": "bucket", "Key": "k", "TargetPath": "$.payload" }
        });
        let loaded = load_remote_event(message, &store).unwrap();
        assert_eq!(loaded, json!({ "payload": [1, 2, 3] }));
    }

    #[test]
    fn local_exception_wins_over_stale_remote_value() {
        let store = MemoryBlobStore::new();
        store.insert("bucket", "k", br#"{"exception": "None", "payload": {}}"#.to_vec());
        let message = json!({
            "exception": "TaskFailed",
            "replace": { "Bucket": "bucket", "Key": "k", "TargetPath": "$" }
        });
        let loaded = load_remote_event(message, &store).unwrap();
        assert_eq!(loaded["exception"], json!("TaskFailed"));
        assert!(loaded.get("replace").is_none());
    }

    #[test]
    fn missing_blob_propagates_store_error() {
        let store = MemoryBlobStore::new();
        let message = json!({
            "replace": { "Bucket": "bucket", "Key": "gone", "TargetPath": "$" }
        });
        let err = load_remote_event(message, &store).unwrap_err();
        assert!(matches!(err, MessageError::External(_)));
    }

    #[test]
    fn store_without_directive_keeps_everything() {
        let store = MemoryBlobStore::new();
        let message = json!({ "task_config": { "k": 1 }, "payload": {} });
        let stored = store_remote_response(message.clone(), 0, &keys(), WEEK, &store).unwrap();
        assert_eq!(stored, message);
        assert!(store.is_empty());
    }

    #[test]
    fn store_below_threshold_only_strips_keys() {
        let store = MemoryBlobStore::new();
        let message = json!({
            "cumulus_meta": { "system_bucket": "bucket" },
            "task_config": { "k": 1 },
            "payload": { "small": true },
            "ReplaceConfig": { "Path": "$.payload", "MaxSize": 1000 }
        });
        let stored = store_remote_response(message, 0, &keys(), WEEK, &store).unwrap();
        assert_eq!(
            stored,
            json!({ "cumulus_meta": { "system_bucket": "bucket" }, "payload": { "small": true } })
        );
        assert!(store.is_empty());
    }

    #[test]
    fn store_externalizes_path_and_leaves_pointer() {
        let store = MemoryBlobStore::new();
        let message = json!({
            "cumulus_meta": { "system_bucket": "bucket" },
            "payload": { "granules": [1, 2, 3] },
            "ReplaceConfig": { "Path": "$.payload", "TargetPath": "$.payload" }
        });
        let stored = store_remote_response(message, 1, &keys(), WEEK, &store).unwrap();
        assert_eq!(stored["payload"], json!({}));
        let pointer: ReplacePointer = serde_json::from_value(stored["replace"].clone()).unwrap();
        assert_eq!(pointer.bucket, "bucket");
        assert!(pointer.key.starts_with("events/"));
        assert_eq!(pointer.target_path, "$.payload");
        let blob = store.object("bucket", &pointer.key).unwrap();
        assert_eq!(blob.body, br#"{"granules":[1,2,3]}"#.to_vec());
        assert!(blob.expires.is_some());
    }

    #[test]
    fn full_message_restores_cumulus_meta() {
        let store = MemoryBlobStore::new();
        let message = json!({
            "cumulus_meta": { "system_bucket": "bucket" },
            "payload": { "big": "x" },
            "ReplaceConfig": { "FullMessage": "true" }
        });
        let stored = store_remote_response(message, 0, &keys(), WEEK, &store).unwrap();
        let map = stored.as_object().unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(stored["cumulus_meta"], json!({ "system_bucket": "bucket" }));
        assert_eq!(stored["replace"]["TargetPath"], json!("$"));
    }

    #[test]
    fn scalar_nodes_are_cleared_to_empty_string() {
        let store = MemoryBlobStore::new();
        let message = json!({
            "cumulus_meta": { "system_bucket": "bucket" },
            "payload": "a long string",
            "ReplaceConfig": { "Path": "$.payload" }
        });
        let stored = store_remote_response(message, 0, &keys(), WEEK, &store).unwrap();
        assert_eq!(stored["payload"], json!(""));
    }

    #[test]
    fn ambiguous_paths_are_rejected() {
        let store = MemoryBlobStore::new();
        let message = json!({
            "cumulus_meta": { "system_bucket": "bucket" },
            "payload": [{ "a": 1 }, { "a": 2 }],
            "ReplaceConfig": { "Path": "$.payload[*].a" }
        });
        let err = store_remote_response(message, 0, &keys(), WEEK, &store).unwrap_err();
        assert!(matches!(err, MessageError::PathCardinality { matches: 2, .. }));
    }
}
