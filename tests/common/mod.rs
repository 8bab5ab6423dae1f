use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tempfile::TempDir;

use misp_dispatcher::dispatcher::{Allowlist, DispatchSettings, Dispatcher};
use misp_dispatcher::misp::{CascadeCheck, ResolverError};
use misp_dispatcher::sinks::{RecordingSinks, SinkCall, Sinks};

/// Cascade check answering the same way for every event.
#[allow(dead_code)]
pub struct StaticCascade(pub bool);

#[async_trait]
impl CascadeCheck for StaticCascade {
    async fn has_cascade_tag(&self, _event_id: &str) -> Result<bool, ResolverError> {
        Ok(self.0)
    }
}

#[allow(dead_code)]
pub fn temp_file(name: &str, contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let path = temp_dir.path().join(name);
    fs::write(&path, contents).expect("failed to write file");
    (temp_dir, path)
}

/// Dispatcher wired to a recorder, with the allowlist read from a temp file.
#[allow(dead_code)]
pub fn recording_dispatcher(
    allowlist: &str,
    resolver: Arc<dyn CascadeCheck>,
) -> (Dispatcher, Arc<RecordingSinks>) {
    let (_dir, path) = temp_file("client_info.txt", allowlist);
    let allowlist = Allowlist::load(&path).expect("failed to load allowlist");
    let recorder = Arc::new(RecordingSinks::new());
    let dispatcher = Dispatcher::new(
        allowlist,
        Sinks::from_parts(recorder.clone(), recorder.clone()),
        resolver,
        DispatchSettings::default(),
    );
    (dispatcher, recorder)
}

/// Serializes a queue item the way the upstream subscriber does.
#[allow(dead_code)]
pub fn envelope(source: &str, topic: &str, payload: &JsonValue) -> String {
    json!({
        "zmq_name": source,
        "content": format!("{} {}", topic, payload),
    })
    .to_string()
}

#[allow(dead_code)]
pub fn attribute(id: u32, value: &str, category: &str, object_id: &str) -> JsonValue {
    json!({
        "id": id.to_string(),
        "type": "ip-dst",
        "category": category,
        "value": value,
        "event_id": "42",
        "object_id": object_id,
        "timestamp": "1700000000",
        "comment": ""
    })
}

/// Live-feed records in publication order.
#[allow(dead_code)]
pub fn published(recorder: &RecordingSinks) -> Vec<(String, JsonValue)> {
    recorder
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            SinkCall::Publish { kind, record, .. } => Some((kind.to_string(), record)),
            _ => None,
        })
        .collect()
}
