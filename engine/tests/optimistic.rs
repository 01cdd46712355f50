//! Optimistic write protocol: local commit, remote call, compensation.

mod common;

use common::{fields, City, ScriptedRemote};
use serde_json::json;
use std::sync::Arc;
use tether_engine::{
    Collection, Config, DynamicDocument, Error, IdStrategy, MemoryStore, RemoteError, WriteKind,
};

fn cities(remote: &Arc<ScriptedRemote>) -> Collection<City> {
    Collection::new("cities", MemoryStore::new(), remote.clone()).unwrap()
}

fn marfa() -> serde_json::Map<String, serde_json::Value> {
    fields(json!({"id": "1", "city": "Marfa", "state": "TX", "population": 1800}))
}

// ============================================================================
// Insert
// ============================================================================

#[tokio::test]
async fn insert_is_visible_before_and_after_confirmation() {
    let remote = ScriptedRemote::new();
    let cities = cities(&remote);

    let doc = cities.insert(fields(json!({"id": "1", "city": "X"}))).unwrap();
    assert_eq!(doc.id, "1");

    // Optimistic
    let local = cities.find_one("1").unwrap().unwrap();
    assert_eq!(local.city, "X");
    assert_eq!(cities.in_flight(), 1);

    remote.succeed(0);
    cities.settle().await;

    let local = cities.find_one("1").unwrap().unwrap();
    assert_eq!(local.city, "X");
    assert_eq!(cities.stats().confirmed, 1);
    assert_eq!(cities.stats().compensations, 0);
}

#[tokio::test]
async fn insert_sends_serialized_document() {
    let remote = ScriptedRemote::new();
    let cities = cities(&remote);

    cities.insert(marfa()).unwrap();

    let calls = remote.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, WriteKind::Insert);
    assert_eq!(
        calls[0].1,
        json!([{"_id": "1", "city": "Marfa", "state": "TX", "population": 1800}])
    );

    remote.succeed_all();
    cities.settle().await;
}

#[tokio::test]
async fn rejected_insert_is_rolled_back() {
    let remote = ScriptedRemote::new();
    let cities = cities(&remote);

    cities.insert(marfa()).unwrap();
    assert_eq!(cities.count().unwrap(), 1);

    remote.fail(0);
    cities.settle().await;

    assert!(cities.find_one("1").unwrap().is_none());
    assert_eq!(cities.count().unwrap(), 0);
    assert_eq!(cities.stats().compensations, 1);
}

#[tokio::test]
async fn dropped_completion_counts_as_rejection() {
    let remote = ScriptedRemote::new();
    let cities = cities(&remote);

    cities.insert(marfa()).unwrap();
    remote.resolve(0, Err(RemoteError::abandoned()));
    cities.settle().await;

    assert_eq!(cities.count().unwrap(), 0);
    assert_eq!(
        cities.last_rejection(),
        Some(Error::Remote(RemoteError::abandoned()))
    );
}

#[tokio::test]
async fn last_rejection_reports_the_remote_error() {
    let remote = ScriptedRemote::new();
    let cities = cities(&remote);
    assert_eq!(cities.last_rejection(), None);

    cities.insert(marfa()).unwrap();
    remote.succeed(0);
    cities.settle().await;
    assert_eq!(cities.last_rejection(), None);

    cities.remove("1").unwrap();
    remote.fail(1);
    cities.settle().await;

    let rejection = cities.last_rejection().unwrap();
    assert_eq!(
        rejection,
        Error::Remote(RemoteError::new("403", Some("Access denied".into())))
    );
    assert_eq!(
        rejection.to_string(),
        "remote rejected write: 403: Access denied"
    );
}

#[tokio::test]
async fn insert_without_id_generates_one() {
    let remote = ScriptedRemote::new();
    let cities = cities(&remote);

    let a = cities.insert(fields(json!({"city": "Alpine"}))).unwrap();
    let b = cities.insert(fields(json!({"city": "Alpine"}))).unwrap();
    assert_eq!(a.id.len(), 32);
    assert_ne!(a.id, b.id);
    assert_eq!(cities.count().unwrap(), 2);

    remote.succeed_all();
    cities.settle().await;
}

#[tokio::test]
async fn insert_accepts_wire_id_key() {
    let remote = ScriptedRemote::new();
    let cities = cities(&remote);

    let doc = cities.insert(fields(json!({"_id": "w1", "city": "Waco"}))).unwrap();
    assert_eq!(doc.id, "w1");

    remote.succeed_all();
    cities.settle().await;
}

#[tokio::test]
async fn remote_id_strategy_uses_client_id() {
    let remote = ScriptedRemote::new();
    remote.set_remote_id("srv-42");
    let config = Config::default().with_id_strategy(IdStrategy::Remote);
    let cities: Collection<City> =
        Collection::with_config("cities", MemoryStore::new(), remote.clone(), config).unwrap();

    let doc = cities.insert(fields(json!({"city": "Lubbock"}))).unwrap();
    assert_eq!(doc.id, "srv-42");

    remote.succeed_all();
    cities.settle().await;
}

#[tokio::test]
async fn malformed_fields_fail_before_any_write() {
    let remote = ScriptedRemote::new();
    let cities = cities(&remote);

    let result = cities.insert(fields(json!({"id": "1", "population": "many"})));
    assert!(matches!(result, Err(Error::MalformedFields(_))));
    assert_eq!(cities.count().unwrap(), 0);
    assert_eq!(remote.call_count(), 0);
}

#[tokio::test]
async fn insert_of_existing_id_is_refused_locally() {
    let remote = ScriptedRemote::new();
    let cities = cities(&remote);

    cities.insert(marfa()).unwrap();
    let result = cities.insert(fields(json!({"id": "1", "city": "Other"})));
    assert_eq!(result, Err(Error::DuplicateId("1".into())));
    assert_eq!(remote.call_count(), 1);

    remote.succeed_all();
    cities.settle().await;
    assert_eq!(cities.find_one("1").unwrap().unwrap().city, "Marfa");
}

// ============================================================================
// Update
// ============================================================================

async fn persisted_marfa(remote: &Arc<ScriptedRemote>) -> Collection<City> {
    let cities = cities(remote);
    cities.insert(marfa()).unwrap();
    remote.succeed(0);
    cities.settle().await;
    cities
}

#[tokio::test]
async fn rejected_update_restores_exact_prior_value() {
    let remote = ScriptedRemote::new();
    let cities = persisted_marfa(&remote).await;

    let mut doc = cities.find_one("1").unwrap().unwrap();
    doc.city = "Cambridge".into();
    cities.update(&doc).unwrap();
    assert_eq!(cities.find_one("1").unwrap().unwrap().city, "Cambridge");

    remote.fail(1);
    cities.settle().await;

    let restored = cities.find_one("1").unwrap().unwrap();
    assert_eq!(restored.city, "Marfa");
    assert_eq!(restored.state, "TX");
    assert_eq!(restored.population, 1800);
}

#[tokio::test]
async fn confirmed_update_keeps_new_value() {
    let remote = ScriptedRemote::new();
    let cities = persisted_marfa(&remote).await;

    let mut doc = cities.find_one("1").unwrap().unwrap();
    doc.population = 2000;
    cities.update(&doc).unwrap();

    let calls = remote.calls();
    assert_eq!(calls[1].0, WriteKind::Update);
    assert_eq!(
        calls[1].1,
        json!([{"_id": "1"}, {"city": "Marfa", "state": "TX", "population": 2000}])
    );

    remote.succeed(1);
    cities.settle().await;
    assert_eq!(cities.find_one("1").unwrap().unwrap().population, 2000);
}

#[tokio::test]
async fn update_of_absent_document_fails_locally() {
    let remote = ScriptedRemote::new();
    let cities = cities(&remote);

    let ghost = City {
        id: "nope".into(),
        ..Default::default()
    };
    assert_eq!(
        cities.update(&ghost),
        Err(Error::DocumentNotFound("nope".into()))
    );
    assert_eq!(cities.count().unwrap(), 0);
    assert_eq!(remote.call_count(), 0);
}

#[tokio::test]
async fn restore_does_not_resurrect_remotely_removed_document() {
    let remote = ScriptedRemote::new();
    let cities = persisted_marfa(&remote).await;

    let mut doc = cities.find_one("1").unwrap().unwrap();
    doc.city = "Cambridge".into();
    cities.update(&doc).unwrap();

    cities
        .apply_event(&tether_engine::RemoteEvent::removed("cities", "1"))
        .unwrap();
    remote.fail(1);
    cities.settle().await;

    assert!(cities.find_one("1").unwrap().is_none());
}

// ============================================================================
// Partial update
// ============================================================================

#[tokio::test]
async fn partial_update_sets_only_named_fields() {
    let remote = ScriptedRemote::new();
    let cities = persisted_marfa(&remote).await;

    let updated = cities
        .update_fields("1", fields(json!({"population": 1900})))
        .unwrap();
    assert_eq!(updated.population, 1900);
    assert_eq!(updated.city, "Marfa");

    let calls = remote.calls();
    assert_eq!(
        calls[1].1,
        json!([{"_id": "1"}, {"$set": {"population": 1900}}])
    );

    remote.succeed(1);
    cities.settle().await;
    assert_eq!(cities.find_one("1").unwrap().unwrap().population, 1900);
}

#[tokio::test]
async fn rejected_partial_update_restores_snapshot() {
    let remote = ScriptedRemote::new();
    let cities = persisted_marfa(&remote).await;

    cities
        .update_fields("1", fields(json!({"city": "Cambridge"})))
        .unwrap();
    remote.fail(1);
    cities.settle().await;

    assert_eq!(cities.find_one("1").unwrap().unwrap().city, "Marfa");
}

#[tokio::test]
async fn partial_update_refuses_unsafe_fields() {
    let remote = ScriptedRemote::new();
    let cities = persisted_marfa(&remote).await;

    for bad in [
        json!({}),
        json!({"id": "2"}),
        json!({"_id": "2"}),
        json!({"$unset": {"city": 1}}),
        json!({"city.name": "x"}),
        json!({"mayor": "Someone"}),
    ] {
        let result = cities.update_fields("1", fields(bad.clone()));
        assert!(
            matches!(result, Err(Error::MalformedFields(_))),
            "accepted {bad}"
        );
    }
    assert_eq!(remote.call_count(), 1);
    assert_eq!(
        cities.find_one("1").unwrap().unwrap(),
        City {
            id: "1".into(),
            city: "Marfa".into(),
            state: "TX".into(),
            population: 1800,
        }
    );
}

#[tokio::test]
async fn lenient_partial_update_allows_undeclared_fields() {
    let remote = ScriptedRemote::new();
    let config = Config::default().with_strict_fields(false);
    let cities: Collection<City> =
        Collection::with_config("cities", MemoryStore::new(), remote.clone(), config).unwrap();
    cities.insert(marfa()).unwrap();

    // Undeclared names pass the check and City::apply ignores them
    cities
        .update_fields("1", fields(json!({"mayor": "Someone"})))
        .unwrap();
    assert_eq!(remote.call_count(), 2);

    remote.succeed_all();
    cities.settle().await;
}

#[tokio::test]
async fn partial_update_with_invalid_value_writes_nothing() {
    let remote = ScriptedRemote::new();
    let cities = persisted_marfa(&remote).await;

    let result = cities.update_fields("1", fields(json!({"state": 48})));
    assert!(matches!(result, Err(Error::MalformedFields(_))));
    assert_eq!(cities.find_one("1").unwrap().unwrap().state, "TX");
    assert_eq!(remote.call_count(), 1);
}

// ============================================================================
// Remove
// ============================================================================

#[tokio::test]
async fn remove_twice_is_a_noop_the_second_time() {
    let remote = ScriptedRemote::new();
    let cities = persisted_marfa(&remote).await;

    assert_eq!(cities.remove("1"), Ok(true));
    assert_eq!(cities.remove("1"), Ok(false));
    assert_eq!(remote.call_count(), 2);
    assert_eq!(remote.calls()[1], (WriteKind::Remove, json!({"_id": "1"})));

    remote.succeed(1);
    cities.settle().await;
    assert_eq!(cities.count().unwrap(), 0);
}

#[tokio::test]
async fn rejected_remove_reinserts_document() {
    let remote = ScriptedRemote::new();
    let cities = persisted_marfa(&remote).await;

    let doc = cities.find_one("1").unwrap().unwrap();
    assert_eq!(cities.remove_document(&doc), Ok(true));
    assert!(cities.find_one("1").unwrap().is_none());

    remote.fail(1);
    cities.settle().await;

    assert_eq!(cities.find_one("1").unwrap(), Some(doc));
    assert_eq!(cities.stats().compensations, 1);
}

// ============================================================================
// Reads and flush
// ============================================================================

#[tokio::test]
async fn find_variants() {
    let remote = ScriptedRemote::new();
    let cities = cities(&remote);
    cities.insert(fields(json!({"id": "a", "city": "Austin", "state": "TX"}))).unwrap();
    cities.insert(fields(json!({"id": "b", "city": "Boston", "state": "MA"}))).unwrap();
    cities.insert(fields(json!({"id": "c", "city": "Marfa", "state": "TX"}))).unwrap();

    assert_eq!(cities.find().unwrap().len(), 3);
    assert_eq!(cities.count().unwrap(), 3);

    let texas = cities.find_where(|c| c.state == "TX").unwrap();
    let ids: Vec<_> = texas.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "c"]);

    let first = cities.find_one_where(|c| c.state == "TX").unwrap().unwrap();
    assert_eq!(first.id, "a");
    assert!(cities.find_one_where(|c| c.state == "CA").unwrap().is_none());
    assert!(cities.find_one("zzz").unwrap().is_none());

    remote.succeed_all();
    cities.settle().await;
}

#[tokio::test]
async fn flush_empties_local_mirror_only() {
    let remote = ScriptedRemote::new();
    let cities = persisted_marfa(&remote).await;

    assert_eq!(cities.flush(), Ok(1));
    assert_eq!(cities.count().unwrap(), 0);
    // No remote call for a flush
    assert_eq!(remote.call_count(), 1);
}

// ============================================================================
// Adapter availability
// ============================================================================

#[tokio::test]
async fn disconnected_remote_fails_fast() {
    let remote = ScriptedRemote::new();
    let cities = cities(&remote);
    remote.set_connected(false);

    assert_eq!(
        cities.insert(marfa()).map(|_| ()),
        Err(Error::AdapterUnavailable("remote client"))
    );
    assert_eq!(cities.count().unwrap(), 0);
    assert!(cities.listen().is_err());
}

#[tokio::test]
async fn closed_store_fails_fast() {
    let remote = ScriptedRemote::new();
    let store = MemoryStore::new();
    let cities: Collection<City> =
        Collection::new("cities", store.clone(), remote.clone()).unwrap();
    store.close();

    assert_eq!(
        cities.insert(marfa()).map(|_| ()),
        Err(Error::AdapterUnavailable("local store"))
    );
    assert_eq!(cities.find(), Err(Error::AdapterUnavailable("local store")));
    assert_eq!(remote.call_count(), 0);
}

#[test]
fn collection_requires_a_runtime() {
    let remote = ScriptedRemote::new();
    let result: Result<Collection<DynamicDocument>, _> =
        Collection::new("cities", MemoryStore::new(), remote);
    assert!(matches!(result, Err(Error::AdapterUnavailable("async runtime"))));
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_share_one_collection() {
    let remote = ScriptedRemote::new();
    let cities = cities(&remote);

    let mut tasks = Vec::new();
    for t in 0..8 {
        let cities = cities.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..25 {
                cities
                    .insert(fields(json!({"id": format!("{t}-{i}"), "city": "X"})))
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(cities.count().unwrap(), 200);
    assert_eq!(cities.in_flight(), 200);

    remote.succeed_all();
    cities.settle().await;
    assert_eq!(cities.in_flight(), 0);
    assert_eq!(cities.stats().inserts, 200);
    assert_eq!(cities.stats().confirmed, 200);
}
