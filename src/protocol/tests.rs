use super::*;
use crate::clock::ManualClock;
use crate::config::Settings;
use crate::events::RecentEvents;
use crate::tail::MemoryFs;
use serde_json::{json, Value};
use std::time::Duration;

const GPU: &str = "g.csv";
const MEMORY: &str = "m.csv";

fn handler(clock: &ManualClock) -> (MemoryFs, Handler<MemoryFs, &ManualClock, RecentEvents>) {
    let fs = MemoryFs::new();
    fs.write(
        GPU,
        "Timestamp,GPU_Utilization,Memory_Used,Memory_Total\n2024-01-15 10:00:01,50,1,4\n",
    );
    fs.write(MEMORY, "Timestamp,RSS_KB,VSZ_KB\n2024-01-15 10:00:01,1024,2048\n");
    let monitor = Monitor::new(fs.clone(), clock, RecentEvents::new(16), Settings::default());
    (fs, Handler::new(monitor))
}

fn send(
    handler: &mut Handler<MemoryFs, &ManualClock, RecentEvents>,
    message: Value,
) -> Vec<Value> {
    handler
        .handle_line(&message.to_string())
        .iter()
        .map(|r| serde_json::to_value(r).unwrap())
        .collect()
}

#[test]
fn initial_data_detects_the_schema() {
    let clock = ManualClock::new();
    let (_, mut handler) = handler(&clock);

    let replies = send(&mut handler, json!({"command": "getInitialData", "path": MEMORY}));
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0]["command"], "initialData");
    assert_eq!(replies[0]["type"], "memory");
    assert_eq!(replies[0]["data"][0]["usage"], 1.0);
    assert_eq!(replies[0]["data"][0]["virtualUsage"], 2.0);
    assert_eq!(replies[0]["lastPosition"], 54);
}

#[test]
fn new_data_reads_from_the_given_position() {
    let clock = ManualClock::new();
    let (fs, mut handler) = handler(&clock);

    let first = send(
        &mut handler,
        json!({"command": "getInitialData", "path": GPU, "type": "gpu"}),
    );
    let position = first[0]["lastPosition"].as_u64().unwrap();

    fs.append(GPU, "2024-01-15 10:00:02,75,2,4\n2024-01-15 10:00:03,8");
    let replies = send(
        &mut handler,
        json!({"command": "getNewData", "path": GPU, "lastPosition": position}),
    );
    assert_eq!(replies[0]["command"], "update");
    assert_eq!(replies[0]["data"].as_array().unwrap().len(), 1);
    assert_eq!(replies[0]["data"][0]["utilization"], 75.0);
    assert_eq!(replies[0]["data"][0]["memory"], 50.0);

    // the half-written row is not consumed.
    let next = replies[0]["lastPosition"].as_u64().unwrap();
    assert_eq!(next, position + 27);

    let again = send(
        &mut handler,
        json!({"command": "getNewData", "path": GPU, "lastPosition": next}),
    );
    assert!(again[0]["data"].as_array().unwrap().is_empty());
    assert_eq!(again[0]["lastPosition"], next);
}

#[test]
fn monitoring_round_trip() {
    let clock = ManualClock::new();
    let (fs, mut handler) = handler(&clock);

    let replies = send(
        &mut handler,
        json!({"command": "startMonitoring", "gpuPath": GPU, "memoryPath": MEMORY}),
    );
    assert_eq!(replies.len(), 2);
    assert!(replies.iter().all(|r| r["command"] == "initialData"));

    fs.append(GPU, "2024-01-15 10:00:02,60,1,4\n");
    assert!(handler.tick().is_empty());
    clock.advance(Duration::from_secs(5));
    let updates = handler.tick();
    assert_eq!(updates.len(), 1);
    assert!(matches!(
        &updates[0],
        Response::Update { kind: SeriesKind::Gpu, data, .. } if data.len() == 1
    ));

    let replies = send(&mut handler, json!({"command": "stopMonitoring"}));
    assert_eq!(replies, vec![json!({"command": "clear"})]);
    assert!(!handler.monitor().is_monitoring());
}

#[test]
fn failures_become_error_messages() {
    let clock = ManualClock::new();
    let (_, mut handler) = handler(&clock);

    let replies = send(&mut handler, json!({"command": "getNewData", "path": "missing.csv"}));
    assert_eq!(replies[0]["command"], "error");
    assert!(replies[0]["text"].as_str().unwrap().contains("missing.csv"));

    let replies = send(
        &mut handler,
        json!({"command": "startMonitoring", "gpuPath": GPU, "memoryPath": "missing.csv"}),
    );
    assert_eq!(replies[0]["command"], "error");
    assert!(!handler.monitor().is_monitoring());
}

#[test]
fn malformed_messages_do_not_end_the_session() {
    let clock = ManualClock::new();
    let (_, mut handler) = handler(&clock);

    let replies = handler.handle_line("{not json");
    assert!(matches!(&replies[..], [Response::Error { text }] if text.starts_with("malformed")));

    let replies = handler.handle_line(r#"{"command": "reboot"}"#);
    assert!(matches!(&replies[..], [Response::Error { .. }]));

    assert!(handler.handle_line("   ").is_empty());
    let replies = send(&mut handler, json!({"command": "getInitialData", "path": GPU}));
    assert_eq!(replies[0]["command"], "initialData");
}

#[test]
fn panel_logs_produce_no_reply() {
    let clock = ManualClock::new();
    let (_, mut handler) = handler(&clock);
    assert!(send(&mut handler, json!({"command": "log", "text": "hello"})).is_empty());
    assert!(send(&mut handler, json!({"command": "error", "text": "boom"})).is_empty());
}

#[test]
fn unknown_schema_is_an_error() {
    let clock = ManualClock::new();
    let (fs, mut handler) = handler(&clock);
    fs.write("other.csv", "a,b,c\n1,2,3\n");

    let replies = send(&mut handler, json!({"command": "getInitialData", "path": "other.csv"}));
    assert_eq!(replies[0]["command"], "error");
}

#[test]
fn new_data_resumes_after_a_line_cut_by_the_backfill() {
    let clock = ManualClock::new();
    let fs = MemoryFs::new();
    fs.write(
        GPU,
        "Timestamp,GPU_Utilization,Memory_Used,Memory_Total\n\
         2024-01-15 10:00:01,50,1,4\n\
         2024-01-15 10:00:09,55",
    );
    let events = RecentEvents::new(16);
    let settings = Settings {
        backfill_bytes: 8,
        ..Settings::default()
    };
    let mut handler = Handler::new(Monitor::new(fs.clone(), &clock, events.clone(), settings));

    let first = send(
        &mut handler,
        json!({"command": "getInitialData", "path": GPU, "type": "gpu"}),
    );
    assert!(first[0]["data"].as_array().unwrap().is_empty());
    let position = first[0]["lastPosition"].as_u64().unwrap();

    fs.append(GPU, ",1,2\n2024-01-15 10:00:10,25,1,4\n");
    let replies = send(
        &mut handler,
        json!({"command": "getNewData", "path": GPU, "lastPosition": position}),
    );
    let data = replies[0]["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["utilization"], 25.0);
    assert!(events
        .snapshot()
        .iter()
        .all(|e| !matches!(e, MonitorEvent::RowSkipped { .. })));
}
