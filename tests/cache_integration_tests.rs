//! Integration Tests for the Cache Engine
//!
//! Exercise the public API end to end over an in-memory durable medium:
//! reloads, namespace sharing, deferred persistence and change events.

use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use serde_json::{json, Map, Value};
use tiered_cache::cache::{current_timestamp_ms, wrap, EXPIRE};
use tiered_cache::storage::{CACHE, LOCAL, SESSION};
use tiered_cache::{
    spawn_flush_task, CacheEngine, ChangeHub, Config, DurableMedium, ExternalChange, Meta,
    MemoryMedium, Storage, StorageError, StorageRegistry,
};
use tokio::sync::RwLock;

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn setup() -> (Arc<MemoryMedium>, CacheEngine) {
    init_tracing();
    let medium = Arc::new(MemoryMedium::new());
    let cache = CacheEngine::new(Storage::cache(medium.clone(), None));
    (medium, cache)
}

fn durable_block(medium: &MemoryMedium, key: &str) -> Option<Value> {
    medium.get(key).and_then(|raw| serde_json::from_str(&raw).ok())
}

fn recorder(cache: &CacheEngine) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    cache.subscribe(move |key| sink.lock().unwrap().push(key.to_string()));
    seen
}

const Y2K: i64 = 946_684_800_000;

// == Scenarios ==

#[test]
fn test_set_then_get_in_same_burst() {
    let (medium, mut cache) = setup();

    cache.set("foo", Some(json!("bar")), None);
    assert_eq!(cache.get("foo"), Some(json!("bar")));
    assert!(medium.get("cache:foo").is_none());

    cache.flush();
    assert_eq!(durable_block(&medium, "cache:foo").unwrap()["data"], json!("bar"));
}

#[test]
fn test_nested_write_reaches_durable_root() {
    let (medium, mut cache) = setup();

    cache.set("foo", Some(json!({ "bar": { "foz": "wow" } })), None);
    cache.set("foo.bar.foz", Some(json!("yo")), None);
    cache.flush();

    assert_eq!(cache.get("foo.bar.foz"), Some(json!("yo")));
    assert_eq!(cache.get("foo").unwrap()["bar"]["foz"], json!("yo"));
    assert_eq!(
        durable_block(&medium, "cache:foo").unwrap()["data"]["bar"]["foz"],
        json!("yo")
    );
}

#[test]
fn test_expired_durable_entry_removed_on_start() {
    init_tracing();
    let medium = Arc::new(MemoryMedium::new());
    let mut meta = Map::new();
    meta.insert(EXPIRE.to_string(), json!(Y2K));
    let block = Value::from(wrap(json!("bar"), meta));
    medium.set("cache:foo", &block.to_string()).unwrap();

    let cache = CacheEngine::new(Storage::cache(medium.clone(), None));

    assert!(medium.get("cache:foo").is_none());
    assert!(cache.get("foo").is_none());
}

#[test]
fn test_reload_restores_values() {
    let (medium, mut cache) = setup();
    let tree = json!({ "list": [1, "two", { "three": 3 }], "flag": true });

    cache.set("tree", Some(tree.clone()), None);
    cache.set("answer", Some(json!(42)), Some(Meta::field("source", "test")));
    cache.set("numeric_text", Some(json!("42")), None);
    drop(cache);

    let reloaded = CacheEngine::new(Storage::cache(medium, None));
    assert_eq!(reloaded.get("tree"), Some(tree));
    assert_eq!(reloaded.get("answer"), Some(json!(42)));
    assert_eq!(reloaded.get("numeric_text"), Some(json!("42")));
    assert_eq!(reloaded.get_block("answer").unwrap().meta["source"], json!("test"));
}

#[test]
fn test_memory_is_authoritative_over_medium() {
    let (medium, mut cache) = setup();

    cache.set("foo", Some(json!("bar")), None);
    cache.flush();
    let other = Value::from(wrap(json!("wow"), Map::new()));
    medium.set("cache:foo", &other.to_string()).unwrap();
    medium.set("cache:late", &other.to_string()).unwrap();

    assert_eq!(cache.get("foo"), Some(json!("bar")));
    assert!(cache.get("late").is_none());
}

#[test]
fn test_past_expiry_is_a_no_op() {
    let (medium, mut cache) = setup();
    let seen = recorder(&cache);

    assert!(!cache.set("foo", Some(json!("bar")), Some(Meta::Expire(Y2K))));
    cache.flush();

    assert!(cache.get("foo").is_none());
    assert!(medium.is_empty());
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn test_bare_timestamp_and_time_object_meta() {
    let (medium, mut cache) = setup();
    let time = current_timestamp_ms() + 86_400_000;
    let at = chrono::Utc::now() + chrono::Duration::hours(2);

    cache.set("foo", Some(json!("bar")), Some(Meta::from(time)));
    cache.set("foz", Some(json!("baz")), Some(Meta::from(at)));
    cache.flush();

    assert_eq!(durable_block(&medium, "cache:foo").unwrap()["meta"]["expire"], json!(time));
    assert_eq!(
        durable_block(&medium, "cache:foz").unwrap()["meta"]["expire"],
        json!(at.timestamp_millis())
    );
}

#[test]
fn test_deletion_notifies_and_removes_durable_entry() {
    let (medium, mut cache) = setup();
    cache.set("foo", Some(json!("bar")), None);
    cache.flush();
    let seen = recorder(&cache);

    cache.set("foo", None, None);
    cache.set("never", None, None);
    cache.flush();

    assert!(medium.get("cache:foo").is_none());
    assert_eq!(*seen.lock().unwrap(), vec!["foo"]);
}

#[test]
fn test_medium_failure_degrades_to_memory() {
    init_tracing();
    let medium = Arc::new(MemoryMedium::with_quota(64));
    let mut cache = CacheEngine::new(Storage::cache(medium.clone(), None));

    cache.set("big", Some(json!("x".repeat(256))), None);
    cache.flush();

    assert_eq!(cache.get("big"), Some(json!("x".repeat(256))));
    assert!(medium.get("cache:big").is_none());
}

// == Storages ==

#[test]
fn test_namespaces_share_one_medium() {
    init_tracing();
    let medium = Arc::new(MemoryMedium::new());
    let mut a = Storage::with_medium("a", medium.clone());
    let mut b = Storage::with_medium("b", medium.clone());

    a.set("foo", Some(json!(1)));
    b.set("foo", Some(json!(2)));
    a.flush();
    b.flush();

    assert_eq!(medium.get("a:foo").as_deref(), Some("1"));
    assert_eq!(medium.get("b:foo").as_deref(), Some("2"));
    assert_eq!(a.keys(), vec!["foo"]);
    assert_eq!(b.keys(), vec!["foo"]);
}

#[test]
fn test_cache_and_local_do_not_collide() {
    init_tracing();
    let registry = StorageRegistry::with_defaults(
        Arc::new(MemoryMedium::new()),
        Arc::new(MemoryMedium::new()),
        None,
    );
    let mut local = registry.storage_for(LOCAL).unwrap();
    let mut cache = CacheEngine::from_registry(&registry).unwrap();

    local.set("foo", Some(json!("local")));
    cache.set("foo", Some(json!("cached")), None);
    local.flush();
    cache.flush();

    assert_eq!(local.keys(), vec!["foo"]);
    assert_eq!(cache.keys(), vec!["foo"]);
    assert_eq!(local.get("foo"), Some(&json!("local")));
    assert_eq!(cache.get("foo"), Some(json!("cached")));
}

#[test]
fn test_unknown_storage_fails_fast() {
    let registry = StorageRegistry::new();

    assert!(matches!(
        registry.storage_for(SESSION),
        Err(StorageError::NotFound(name)) if name == SESSION
    ));
    assert!(matches!(
        CacheEngine::from_registry(&registry),
        Err(StorageError::NotFound(name)) if name == CACHE
    ));
}

// == External Changes ==

#[test]
fn test_external_change_is_republished_by_engine() {
    init_tracing();
    let hub = ChangeHub::new();
    let medium = Arc::new(MemoryMedium::new());
    let cache = CacheEngine::new(Storage::cache(medium.clone(), Some(&hub)));
    let seen = recorder(&cache);

    hub.dispatch(&ExternalChange::new("cache:foo", medium.id()));
    hub.dispatch(&ExternalChange::new("local:foo", medium.id()));
    hub.dispatch(&ExternalChange::new("cache:bar", MemoryMedium::new().id()));

    assert_eq!(*seen.lock().unwrap(), vec!["foo"]);
    assert_eq!(hub.listener_count(), 1);

    drop(cache);
    assert_eq!(hub.listener_count(), 0);
}

// == Configuration ==

#[test]
fn test_from_config() {
    init_tracing();
    let config = Config {
        namespace: "prefs".to_string(),
        flush_interval_ms: 10,
        default_ttl: Some(60),
    };
    let medium = Arc::new(MemoryMedium::new());
    let durable: Arc<dyn DurableMedium> = medium.clone();
    let mut cache = CacheEngine::from_config(&config, Some(durable), None);

    cache.set("theme", Some(json!("dark")), None);
    cache.flush();

    assert_eq!(cache.storage().namespace(), "prefs");
    let block = durable_block(&medium, "prefs:theme").unwrap();
    assert!(block["meta"]["expire"].as_i64().unwrap() > current_timestamp_ms());
}

// == Background Flush ==

#[test]
fn test_background_flush_coalesces_burst() {
    init_tracing();
    let medium = Arc::new(MemoryMedium::new());
    let cache = Arc::new(RwLock::new(CacheEngine::new(Storage::cache(
        medium.clone(),
        None,
    ))));

    tokio_test::block_on(async {
        {
            let mut guard = cache.write().await;
            guard.set("foo", Some(json!("bar")), None);
            guard.set("foo", None, None);
            guard.set("foo", Some(json!("foz")), None);
            assert_eq!(guard.pending(), 1);
        }
        assert!(medium.get("cache:foo").is_none());
    });

    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime.block_on(async {
        let handle = spawn_flush_task(cache.clone(), 10);
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();
    });

    assert_eq!(durable_block(&medium, "cache:foo").unwrap()["data"], json!("foz"));
}
