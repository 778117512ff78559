//! Heap snapshot capture and property-based object search.
//!
//! The browser streams a snapshot as string chunks. Progress events are not a
//! reliable completion signal (they race the final chunk), so completion is
//! inferred instead: whenever a chunk ends in `'}'` the whole concatenation
//! is tried as JSON, and a parse failure just means the document is not
//! complete yet. Progress events are repurposed as a liveness heartbeat that
//! re-arms a stall timer; if the stream goes quiet the capture fails rather
//! than hanging forever. First settlement wins.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::broadcast;

use pilot_runtime::CdpEvent;

use crate::error::{Error, Result};
use crate::session::Session;

/// Inactivity window after which a capture is considered stalled.
pub const SNAPSHOT_STALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Field layout tables from the snapshot header.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotMeta {
    pub node_fields: Vec<String>,
    pub node_types: Vec<Value>,
    pub edge_fields: Vec<String>,
    pub edge_types: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct SnapshotHeader {
    meta: SnapshotMeta,
    node_count: usize,
    edge_count: usize,
}

/// The raw document as streamed by the browser.
#[derive(Debug, Deserialize)]
struct SerializedSnapshot {
    snapshot: SnapshotHeader,
    nodes: Vec<u64>,
    edges: Vec<u64>,
    strings: Vec<String>,
}

/// A finalized snapshot with the flat tables materialized as fixed-width
/// numeric arrays.
#[derive(Debug)]
pub struct HeapSnapshot {
    pub meta: SnapshotMeta,
    pub node_count: usize,
    pub edge_count: usize,
    pub nodes: Vec<u32>,
    pub edges: Vec<u32>,
    pub strings: Vec<String>,
}

impl From<SerializedSnapshot> for HeapSnapshot {
    fn from(raw: SerializedSnapshot) -> Self {
        Self {
            meta: raw.snapshot.meta,
            node_count: raw.snapshot.node_count,
            edge_count: raw.snapshot.edge_count,
            nodes: raw.nodes.into_iter().map(|v| v as u32).collect(),
            edges: raw.edges.into_iter().map(|v| v as u32).collect(),
            strings: raw.strings,
        }
    }
}

/// Capture a heap snapshot of the active tab.
pub async fn capture_heap_snapshot(session: &Session) -> Result<HeapSnapshot> {
    // Subscribe before issuing the command so no chunk can slip past.
    let events = session.subscribe();
    let scope = session.active_session();
    let filter = (!scope.session_id.is_empty()).then(|| scope.session_id.clone());

    session.dispatch_detached(
        &scope,
        "HeapProfiler.takeHeapSnapshot",
        json!({ "reportProgress": true, "captureNumericValue": true }),
    );

    collect_snapshot(events, filter, SNAPSHOT_STALL_TIMEOUT).await
}

/// Reassemble the chunk stream into a snapshot, bounding quiet periods with
/// the stall timer.
async fn collect_snapshot(
    mut events: broadcast::Receiver<CdpEvent>,
    scope: Option<String>,
    stall: Duration,
) -> Result<HeapSnapshot> {
    let mut buffer = String::new();
    let stall_timer = tokio::time::sleep(stall);
    tokio::pin!(stall_timer);

    loop {
        tokio::select! {
            _ = &mut stall_timer => {
                return Err(Error::Timeout(format!(
                    "heap snapshot stalled: no progress for {}s",
                    stall.as_secs()
                )));
            }
            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        return Err(Error::Unexpected(format!(
                            "heap snapshot chunks lost ({skipped} events lagged)"
                        )));
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(Error::Unexpected(
                            "connection closed during heap snapshot capture".to_string(),
                        ));
                    }
                };

                if event.session_id != scope {
                    continue;
                }

                match event.method.as_str() {
                    "HeapProfiler.addHeapSnapshotChunk" => {
                        let chunk = event.params["chunk"].as_str().unwrap_or_default();
                        buffer.push_str(chunk);

                        if chunk.ends_with('}') {
                            // A parse failure only means the document is not
                            // complete yet.
                            if let Ok(raw) = serde_json::from_str::<SerializedSnapshot>(&buffer) {
                                return Ok(HeapSnapshot::from(raw));
                            }
                        }
                    }
                    "HeapProfiler.reportHeapSnapshotProgress" => {
                        stall_timer.as_mut().reset(tokio::time::Instant::now() + stall);
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Search the heap graph for object nodes exposing every property in
/// `include` and none in `exclude`. Returns one JSON object per match with
/// shallowly resolved property values.
pub fn find_objects_with_properties(
    snapshot: &HeapSnapshot,
    include: &[String],
    exclude: &[String],
) -> Vec<Value> {
    let Some(layout) = Layout::resolve(&snapshot.meta) else {
        return Vec::new();
    };

    let node_stride = snapshot.meta.node_fields.len();
    let edge_stride = snapshot.meta.edge_fields.len();
    if node_stride == 0 || edge_stride == 0 {
        return Vec::new();
    }

    let mut results = Vec::new();
    let mut edge_cursor = 0usize;

    for node_index in 0..snapshot.node_count {
        let node = &snapshot.nodes[node_index * node_stride..(node_index + 1) * node_stride];
        let edge_count = node[layout.node_edge_count] as usize;
        let first_edge = edge_cursor;
        edge_cursor += edge_count;

        if layout.node_type_name(snapshot, node) != Some("object") {
            continue;
        }

        let mut properties = BTreeMap::new();
        for edge_index in first_edge..first_edge + edge_count {
            let edge = &snapshot.edges[edge_index * edge_stride..(edge_index + 1) * edge_stride];
            if layout.edge_type_name(snapshot, edge) != Some("property") {
                continue;
            }
            let name_index = edge[layout.edge_name] as usize;
            let Some(name) = snapshot.strings.get(name_index) else {
                continue;
            };
            properties.insert(name.clone(), edge[layout.edge_to_node] as usize);
        }

        let matches = include.iter().all(|name| properties.contains_key(name))
            && !exclude.iter().any(|name| properties.contains_key(name));
        if !matches {
            continue;
        }

        let mut object = serde_json::Map::new();
        object.insert("nodeId".to_string(), json!(node[layout.node_id]));
        let mut resolved = serde_json::Map::new();
        for (name, target_offset) in properties {
            resolved.insert(name, layout.resolve_value(snapshot, target_offset));
        }
        object.insert("properties".to_string(), Value::Object(resolved));
        results.push(Value::Object(object));
    }

    results
}

/// Field offsets derived from the snapshot's meta tables.
struct Layout {
    node_type: usize,
    node_name: usize,
    node_id: usize,
    node_edge_count: usize,
    edge_type: usize,
    edge_name: usize,
    edge_to_node: usize,
}

impl Layout {
    fn resolve(meta: &SnapshotMeta) -> Option<Self> {
        let node_field = |name| meta.node_fields.iter().position(|f| f == name);
        let edge_field = |name| meta.edge_fields.iter().position(|f| f == name);
        Some(Self {
            node_type: node_field("type")?,
            node_name: node_field("name")?,
            node_id: node_field("id")?,
            node_edge_count: node_field("edge_count")?,
            edge_type: edge_field("type")?,
            edge_name: edge_field("name_or_index")?,
            edge_to_node: edge_field("to_node")?,
        })
    }

    fn node_type_name<'a>(&self, snapshot: &'a HeapSnapshot, node: &[u32]) -> Option<&'a str> {
        snapshot.meta.node_types.first()?.as_array()?
            .get(node[self.node_type] as usize)?
            .as_str()
    }

    fn edge_type_name<'a>(&self, snapshot: &'a HeapSnapshot, edge: &[u32]) -> Option<&'a str> {
        snapshot.meta.edge_types.first()?.as_array()?
            .get(edge[self.edge_type] as usize)?
            .as_str()
    }

    /// Shallow value resolution: strings and numbers become their literal
    /// values, everything else a `{type, name, id}` reference.
    fn resolve_value(&self, snapshot: &HeapSnapshot, node_offset: usize) -> Value {
        let stride = snapshot.meta.node_fields.len();
        let node_index = node_offset / stride;
        let Some(node) = snapshot
            .nodes
            .get(node_index * stride..(node_index + 1) * stride)
        else {
            return Value::Null;
        };

        let name = snapshot
            .strings
            .get(node[self.node_name] as usize)
            .cloned()
            .unwrap_or_default();

        match self.node_type_name(snapshot, node) {
            Some("string") | Some("concatenated string") | Some("sliced string") => {
                Value::String(name)
            }
            Some("number") => name
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            type_name => json!({
                "type": type_name,
                "name": name,
                "id": node[self.node_id],
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODE_FIELDS: &[&str] = &[
        "type",
        "name",
        "id",
        "self_size",
        "edge_count",
        "trace_node_id",
        "detachedness",
    ];
    const NODE_TYPES: &[&str] = &[
        "hidden", "array", "string", "object", "code", "closure", "regexp", "number", "native",
        "synthetic",
    ];
    const EDGE_FIELDS: &[&str] = &["type", "name_or_index", "to_node"];
    const EDGE_TYPES: &[&str] = &[
        "context", "element", "property", "internal", "hidden", "shortcut", "weak",
    ];

    fn meta_json() -> Value {
        json!({
            "node_fields": NODE_FIELDS,
            "node_types": [NODE_TYPES, "string", "number", "number", "number", "number", "number"],
            "edge_fields": EDGE_FIELDS,
            "edge_types": [EDGE_TYPES, "string_or_number", "node"],
        })
    }

    /// One object node (id 1) with properties `title` -> "hello" and
    /// `count` -> 42, plus the referenced string and number nodes.
    fn sample_snapshot_json() -> String {
        let doc = json!({
            "snapshot": { "meta": meta_json(), "node_count": 3, "edge_count": 2 },
            "nodes": [
                3, 0, 1, 0, 2, 0, 0,   // object "Widget", 2 edges
                2, 1, 2, 0, 0, 0, 0,   // string "hello"
                7, 4, 3, 0, 0, 0, 0,   // number "42"
            ],
            "edges": [
                2, 2, 7,               // property "title" -> node offset 7
                2, 3, 14,              // property "count" -> node offset 14
            ],
            "strings": ["Widget", "hello", "title", "count", "42"],
        });
        doc.to_string()
    }

    fn event(method: &str, params: Value) -> CdpEvent {
        CdpEvent {
            method: method.to_string(),
            session_id: None,
            params,
        }
    }

    fn chunk(text: &str) -> CdpEvent {
        event("HeapProfiler.addHeapSnapshotChunk", json!({ "chunk": text }))
    }

    #[tokio::test(start_paused = true)]
    async fn chunked_capture_resolves_once_the_document_parses() {
        let (tx, rx) = broadcast::channel(64);
        let collector = tokio::spawn(collect_snapshot(rx, None, SNAPSHOT_STALL_TIMEOUT));

        let doc = sample_snapshot_json();
        // Split so the first chunk ends in '}' while still being incomplete:
        // that parse attempt must fail quietly.
        let split = doc.find("},").map(|i| i + 1).unwrap();
        tx.send(chunk(&doc[..split])).unwrap();
        tx.send(chunk(&doc[split..])).unwrap();

        let snapshot = collector.await.unwrap().unwrap();
        assert_eq!(snapshot.node_count, 3);
        assert_eq!(snapshot.edge_count, 2);
        assert_eq!(snapshot.nodes.len(), 3 * NODE_FIELDS.len());
        assert_eq!(snapshot.edges.len(), 2 * EDGE_FIELDS.len());
        assert_eq!(snapshot.strings[1], "hello");
    }

    #[tokio::test(start_paused = true)]
    async fn capture_times_out_without_progress_heartbeats() {
        let (tx, rx) = broadcast::channel(64);
        let collector = tokio::spawn(collect_snapshot(rx, None, SNAPSHOT_STALL_TIMEOUT));

        // An incomplete chunk arrives, then the stream goes quiet.
        tx.send(chunk("{\"snapshot\":")).unwrap();
        tokio::time::sleep(SNAPSHOT_STALL_TIMEOUT + Duration::from_secs(1)).await;

        let err = collector.await.unwrap().unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn progress_heartbeats_rearm_the_stall_timer() {
        let (tx, rx) = broadcast::channel(64);
        let collector = tokio::spawn(collect_snapshot(rx, None, SNAPSHOT_STALL_TIMEOUT));

        // Heartbeats every 20s keep a slow capture alive well past the
        // 30s inactivity window.
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_secs(20)).await;
            tx.send(event(
                "HeapProfiler.reportHeapSnapshotProgress",
                json!({ "done": 1, "total": 10 }),
            ))
            .unwrap();
        }

        tx.send(chunk(&sample_snapshot_json())).unwrap();
        collector.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn events_from_other_sessions_are_ignored() {
        let (tx, rx) = broadcast::channel(64);
        let collector = tokio::spawn(collect_snapshot(
            rx,
            Some("session-a".to_string()),
            SNAPSHOT_STALL_TIMEOUT,
        ));

        let mut foreign = chunk(&sample_snapshot_json());
        foreign.session_id = Some("session-b".to_string());
        tx.send(foreign).unwrap();

        let mut scoped = chunk(&sample_snapshot_json());
        scoped.session_id = Some("session-a".to_string());
        tx.send(scoped).unwrap();

        collector.await.unwrap().unwrap();
    }

    fn parsed_sample() -> HeapSnapshot {
        let raw: SerializedSnapshot = serde_json::from_str(&sample_snapshot_json()).unwrap();
        HeapSnapshot::from(raw)
    }

    #[test]
    fn search_finds_objects_with_all_included_properties() {
        let snapshot = parsed_sample();
        let matches = find_objects_with_properties(
            &snapshot,
            &["title".to_string(), "count".to_string()],
            &[],
        );
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0]["properties"]["title"], "hello");
        assert_eq!(matches[0]["properties"]["count"], 42.0);
    }

    #[test]
    fn search_misses_when_an_included_property_is_absent() {
        let snapshot = parsed_sample();
        let matches =
            find_objects_with_properties(&snapshot, &["missing".to_string()], &[]);
        assert!(matches.is_empty());
    }

    #[test]
    fn search_excludes_objects_with_an_excluded_property() {
        let snapshot = parsed_sample();
        let matches = find_objects_with_properties(
            &snapshot,
            &["title".to_string()],
            &["count".to_string()],
        );
        assert!(matches.is_empty());
    }
}
