//! Integration tests for the node manager and refresh loop.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use equisync_core::{
    default_timestamp, object_node_id, property_node_id, AttributeKey, AttributeValue, BatchKind, ChangeListener,
    DataValue, EquipmentNodeManager, ExternalReferences, HostedNode, LookupError, NodeClass, NodeId,
    RefreshState, ServerConfig, OBJECTS_FOLDER,
};
use equisync_store::{MemoryStore, QueryKind, Row, StoreError, StoreValue};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn pump(id: i64, name: &str) -> Row {
    Row::new()
        .with("ID", id)
        .with("Name", name)
        .with("Address", "A1")
        .with("MinValue", 0.0)
        .with("MaxValue", 100.0)
        .with("UpperLimit", 90.0)
        .with("LowerLimit", 10.0)
        .with("State", 1i64)
}

fn record(id: i64, equipment: i64, value: f64, time: DateTime<Utc>) -> Row {
    Row::new()
        .with("ID", id)
        .with("EquipmentID", equipment)
        .with("clValue", value)
        .with("clTime", time)
}

fn abnormity(id: i64, equipment: i64, status: &str, value: f64) -> Row {
    Row::new()
        .with("ID", id)
        .with("EquipmentID", equipment)
        .with("Status", status)
        .with("MaxValue", value)
        .with("BeginTime", "2024-05-01 08:00:00")
        .with("EndTime", StoreValue::Null)
}

fn t1() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap()
}

/// A manager whose worker never wakes on its own during a test.
fn manager(store: &Arc<MemoryStore>) -> EquipmentNodeManager {
    let config = ServerConfig::new("memory").with_poll_interval(Duration::from_secs(3600));
    EquipmentNodeManager::new(config, store.clone()).unwrap()
}

/// Waits until the worker's first cycle has finished.
fn wait_for_first_cycle(manager: &EquipmentNodeManager) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while manager.stats().cycles_completed == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(manager.stats().cycles_completed >= 1);
}

fn value(manager: &EquipmentNodeManager, id: u32, key: AttributeKey) -> Option<AttributeValue> {
    manager.entity(id).and_then(|e| e.get(key).cloned())
}

#[test]
fn pump_scenario() {
    let store = Arc::new(MemoryStore::new());
    store.set_equipment(vec![pump(7, "Pump1")]);
    let manager = manager(&store);
    manager.create_address_space(&mut ExternalReferences::new()).unwrap();
    wait_for_first_cycle(&manager);

    let entity = manager.entity(7).unwrap();
    assert_eq!(entity.name, "Pump1");
    assert_eq!(entity.get(AttributeKey::Id), Some(&AttributeValue::UInt32(7)));
    assert_eq!(entity.get(AttributeKey::Address), Some(&AttributeValue::String("A1".into())));
    assert_eq!(entity.get(AttributeKey::UpperLimit), Some(&AttributeValue::Double(90.0)));
    assert_eq!(entity.get(AttributeKey::State), Some(&AttributeValue::Int32(1)));
    assert_eq!(entity.get(AttributeKey::Value), Some(&AttributeValue::Double(0.0)));
    assert_eq!(
        entity.get(AttributeKey::TimeStamp),
        Some(&AttributeValue::DateTime(default_timestamp()))
    );
    assert_eq!(
        entity.get(AttributeKey::AbnormityStatus),
        Some(&AttributeValue::String(String::new()))
    );

    store.set_records(vec![record(1, 7, 55.5, t1())]);
    let report = manager.refresh_now();
    assert!(report.is_success());

    assert_eq!(value(&manager, 7, AttributeKey::Value), Some(AttributeValue::Double(55.5)));
    assert_eq!(value(&manager, 7, AttributeKey::TimeStamp), Some(AttributeValue::DateTime(t1())));

    // The hosted property serves the same value
    let handle = manager
        .resolve_node_id(&property_node_id(2, 7, AttributeKey::Value))
        .unwrap();
    assert_eq!(manager.read_value(&handle).unwrap().value, AttributeValue::Double(55.5));

    let json = serde_json::to_value(manager.entities()).unwrap();
    assert_eq!(json[0]["name"], "Pump1");
    assert_eq!(json[0]["attributes"]["Value"]["value"], 55.5);
}

#[test]
fn rows_for_unknown_ids_are_ignored() {
    let store = Arc::new(MemoryStore::new());
    store.set_equipment(vec![pump(7, "Pump1")]);
    store.set_records(vec![record(1, 99, 12.0, t1())]);
    store.set_abnormities(vec![abnormity(1, 99, "HIGH", 120.0)]);
    let manager = manager(&store);
    manager.create_address_space(&mut ExternalReferences::new()).unwrap();
    wait_for_first_cycle(&manager);

    assert!(manager.entity(99).is_none());
    assert_eq!(manager.entities().len(), 1);
    assert_eq!(manager.stats().rows_ignored, 2);
    assert_eq!(
        manager.resolve_node_id(&object_node_id(2, 99)).unwrap_err(),
        LookupError::NotFound(object_node_id(2, 99))
    );
    assert!(manager.is_running());
}

#[test]
fn unknown_ids_are_picked_up_once_equipment_arrives() {
    let store = Arc::new(MemoryStore::new());
    store.set_records(vec![record(1, 8, 3.5, t1())]);
    let manager = manager(&store);
    manager.create_address_space(&mut ExternalReferences::new()).unwrap();
    wait_for_first_cycle(&manager);
    assert!(manager.entity(8).is_none());

    store.upsert_equipment(pump(8, "Fan"));
    manager.refresh_now();
    assert_eq!(value(&manager, 8, AttributeKey::Value), Some(AttributeValue::Double(3.5)));
}

#[test]
fn abnormity_failure_keeps_earlier_batches() {
    let store = Arc::new(MemoryStore::new());
    store.set_equipment(vec![pump(7, "Pump1"), pump(8, "Fan")]);
    store.set_abnormities(vec![abnormity(1, 8, "LOW", 2.0)]);
    let manager = manager(&store);
    manager.create_address_space(&mut ExternalReferences::new()).unwrap();
    wait_for_first_cycle(&manager);
    let fan_before = manager.entity(8).unwrap();

    store.set_records(vec![record(1, 7, 42.0, t1())]);
    store.fail_once(QueryKind::Abnormities, StoreError::connectivity("connection reset"));
    let report = manager.refresh_now();

    assert!(!report.is_success());
    assert!(report.outcome(BatchKind::Equipment).unwrap().is_completed());
    assert!(report.outcome(BatchKind::Record).unwrap().is_completed());
    assert!(!report.outcome(BatchKind::Abnormity).unwrap().is_completed());

    assert_eq!(value(&manager, 7, AttributeKey::Value), Some(AttributeValue::Double(42.0)));
    assert_eq!(manager.entity(8).unwrap(), fan_before);
    assert_eq!(manager.refresh_state(), RefreshState::Idle);

    // The next cycle retries
    store.set_abnormities(vec![abnormity(2, 7, "HIGH", 97.0)]);
    assert!(manager.refresh_now().is_success());
    assert_eq!(
        value(&manager, 7, AttributeKey::AbnormityStatus),
        Some(AttributeValue::String("HIGH".into()))
    );
    assert_eq!(manager.stats().batches_failed, 1);
}

#[test]
fn repeated_equipment_batches_create_nothing_new() {
    let store = Arc::new(MemoryStore::new());
    store.set_equipment(vec![pump(7, "Pump1"), pump(8, "Fan")]);
    let manager = manager(&store);
    manager.create_address_space(&mut ExternalReferences::new()).unwrap();
    wait_for_first_cycle(&manager);

    manager.refresh_now();
    manager.refresh_now();

    assert_eq!(manager.entities().len(), 2);
    assert_eq!(manager.stats().entities_created, 2);

    let root = manager.resolve_node_id(&NodeId::string(2, "tianyu")).unwrap();
    assert_eq!(root.node.class, NodeClass::Folder);
}

#[test]
fn root_folder_is_exposed_under_objects() {
    let store = Arc::new(MemoryStore::new());
    let manager = manager(&store);
    let mut external = ExternalReferences::new();
    manager.create_address_space(&mut external).unwrap();

    let links = &external[&OBJECTS_FOLDER];
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].target, NodeId::string(2, "tianyu"));
}

#[test]
fn initial_equipment_failure_is_fatal() {
    let store = Arc::new(MemoryStore::new());
    store.fail_always(QueryKind::Equipment, StoreError::connectivity("refused"));
    let manager = manager(&store);
    assert!(manager.create_address_space(&mut ExternalReferences::new()).is_err());
    assert!(!manager.is_running());
}

#[test]
fn concurrent_lookups_see_whole_merges() {
    let store = Arc::new(MemoryStore::new());
    store.set_equipment(vec![pump(7, "Pump1")]);
    let base = t1();
    store.set_records(vec![record(1, 7, 0.0, base)]);

    let manager = Arc::new(manager(&store));
    manager.create_address_space(&mut ExternalReferences::new()).unwrap();
    wait_for_first_cycle(&manager);

    let done = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let manager = Arc::clone(&manager);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                let mut reads = 0u32;
                while !done.load(Ordering::Relaxed) || reads == 0 {
                    let entity = manager.entity(7).unwrap();
                    let v = entity.get(AttributeKey::Value).and_then(AttributeValue::as_f64).unwrap();
                    let ts = entity
                        .get(AttributeKey::TimeStamp)
                        .and_then(AttributeValue::as_datetime)
                        .unwrap();
                    assert_eq!(ts, base + ChronoDuration::seconds(v as i64));
                    reads += 1;
                }
            })
        })
        .collect();

    for i in 1..200i64 {
        store.set_records(vec![record(i, 7, i as f64, base + ChronoDuration::seconds(i))]);
        manager.refresh_now();
    }
    done.store(true, Ordering::Relaxed);

    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(value(&manager, 7, AttributeKey::Value), Some(AttributeValue::Double(199.0)));
}

#[derive(Default)]
struct Recorder {
    changes: Mutex<Vec<(NodeId, AttributeValue)>>,
}

impl ChangeListener for Recorder {
    fn on_change(&self, node: &HostedNode, value: &DataValue) {
        self.changes.lock().push((node.node_id.clone(), value.value.clone()));
    }
}

#[test]
fn listeners_see_each_pushed_value() {
    let store = Arc::new(MemoryStore::new());
    store.set_equipment(vec![pump(7, "Pump1")]);
    let manager = manager(&store);
    manager.create_address_space(&mut ExternalReferences::new()).unwrap();
    wait_for_first_cycle(&manager);

    let recorder = Arc::new(Recorder::default());
    manager.subscribe(recorder.clone());

    store.set_equipment(vec![]);
    store.set_records(vec![record(1, 7, 12.5, t1())]);
    manager.refresh_now();

    let changes = recorder.changes.lock();
    assert_eq!(changes.len(), 2);
    assert!(changes.contains(&(
        property_node_id(2, 7, AttributeKey::Value),
        AttributeValue::Double(12.5)
    )));
    assert!(changes.contains(&(
        property_node_id(2, 7, AttributeKey::TimeStamp),
        AttributeValue::DateTime(t1())
    )));
}

#[test]
fn teardown_joins_promptly() {
    let store = Arc::new(MemoryStore::new());
    store.set_equipment(vec![pump(7, "Pump1")]);
    let manager = manager(&store);
    manager.create_address_space(&mut ExternalReferences::new()).unwrap();
    wait_for_first_cycle(&manager);
    assert!(manager.is_running());

    let start = Instant::now();
    manager.delete_address_space();
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(!manager.is_running());

    // No further queries once torn down
    let equipment_queries = store.query_count(QueryKind::Equipment);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(store.query_count(QueryKind::Equipment), equipment_queries);

    // Lookups still answer from the last merged state
    assert!(manager.resolve_node_id(&object_node_id(2, 7)).is_ok());
    manager.delete_address_space();
}

#[test]
fn slow_queries_do_not_block_lookups() {
    let store = Arc::new(MemoryStore::new());
    store.set_equipment(vec![pump(7, "Pump1")]);
    let manager = Arc::new(manager(&store));
    manager.create_address_space(&mut ExternalReferences::new()).unwrap();
    wait_for_first_cycle(&manager);

    store.set_latency(Duration::from_millis(300));
    let refresher = {
        let manager = Arc::clone(&manager);
        std::thread::spawn(move || manager.refresh_now())
    };
    std::thread::sleep(Duration::from_millis(50));

    let start = Instant::now();
    let handle = manager.resolve_node_id(&object_node_id(2, 7)).unwrap();
    assert!(manager.validate_handle(&handle).is_ok());
    assert!(start.elapsed() < Duration::from_millis(250));

    assert!(refresher.join().unwrap().is_success());
}
