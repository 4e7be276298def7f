use chrono::{Duration, Utc};
use crumbforge_game::{
    Boost, BoostKind, EconomyConfig, LocalCache, MemoryCache, MemoryPlayerStore, MembershipTier,
    PlayerPatch, PlayerRecord, ReconciliationRecord, SyncStatus, UpgradeCatalog, default_catalog,
    start_session, store_record,
};
use std::collections::{BTreeMap, HashMap};

const KEY: &str = "crumbforge.reconcile.p1";

fn backend(cookies: f64) -> MemoryPlayerStore {
    let store = MemoryPlayerStore::new();
    let mut record = PlayerRecord::new("p1", "ada");
    record.cookies = cookies;
    record.upgrades = HashMap::from([("grandma".to_string(), 2)]);
    record.membership = MembershipTier::Silver;
    store.insert_player(record);
    store
}

fn cached(balance: f64) -> ReconciliationRecord {
    ReconciliationRecord {
        balance,
        upgrade_counts: BTreeMap::from([("cursor".to_string(), 7)]),
        rates: Default::default(),
    }
}

fn catalog() -> UpgradeCatalog {
    default_catalog().clone()
}

#[tokio::test]
async fn stale_server_is_raised_to_cached_balance() -> anyhow::Result<()> {
    let store = backend(100.0);
    let cache = MemoryCache::new();
    store_record(&cache, KEY, &cached(150.0))?;

    let session = start_session(EconomyConfig::default(), "p1", &store, &cache, catalog()).await;

    assert!((session.state().balance() - 150.0).abs() < f64::EPSILON);
    assert_eq!(session.state().count("grandma"), 2);
    assert_eq!(session.state().count("cursor"), 0);
    assert_eq!(session.profile().membership, MembershipTier::Silver);
    assert_eq!(session.status(), &SyncStatus::Healthy);
    assert!(!cache.contains(KEY));

    let updates = store.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].1, PlayerPatch::cookies(150.0));
    let server = store.player("p1").unwrap();
    assert!((server.cookies - 150.0).abs() < f64::EPSILON);
    Ok(())
}

#[tokio::test]
async fn lower_cache_is_discarded_without_a_write() -> anyhow::Result<()> {
    let store = backend(200.0);
    let cache = MemoryCache::new();
    store_record(&cache, KEY, &cached(150.0))?;

    let session = start_session(EconomyConfig::default(), "p1", &store, &cache, catalog()).await;

    assert!((session.state().balance() - 200.0).abs() < f64::EPSILON);
    assert!(store.updates().is_empty());
    assert!(!cache.contains(KEY));
    Ok(())
}

#[tokio::test]
async fn cached_record_is_never_replayed() -> anyhow::Result<()> {
    let store = backend(10.0);
    let cache = MemoryCache::new();
    store_record(&cache, KEY, &cached(90.0))?;

    let first = start_session(EconomyConfig::default(), "p1", &store, &cache, catalog()).await;
    assert!((first.state().balance() - 90.0).abs() < f64::EPSILON);

    store.insert_player(PlayerRecord::new("p1", "ada"));
    let second = start_session(EconomyConfig::default(), "p1", &store, &cache, catalog()).await;
    assert!(second.state().balance().abs() < f64::EPSILON);
    Ok(())
}

#[tokio::test]
async fn malformed_cache_falls_back_to_server() -> anyhow::Result<()> {
    let store = backend(42.0);
    let cache = MemoryCache::new();
    cache.set(KEY, br#"{"v":1,"checksum":"00","record":{"balance":1e9"#)?;

    let session = start_session(EconomyConfig::default(), "p1", &store, &cache, catalog()).await;

    assert!((session.state().balance() - 42.0).abs() < f64::EPSILON);
    assert!(!session.status().is_degraded());
    assert!(!cache.contains(KEY));
    assert!(store.updates().is_empty());
    Ok(())
}

#[tokio::test]
async fn unreachable_backend_runs_degraded_on_cached_state() -> anyhow::Result<()> {
    let store = backend(500.0);
    store.set_fail_reads(true);
    let cache = MemoryCache::new();
    store_record(&cache, KEY, &cached(75.0))?;

    let session = start_session(EconomyConfig::default(), "p1", &store, &cache, catalog()).await;

    assert!(session.status().is_degraded());
    assert!(!session.player_loaded());
    assert!((session.state().balance() - 75.0).abs() < f64::EPSILON);
    assert_eq!(session.state().count("cursor"), 7);
    assert!(!cache.contains(KEY));

    let empty = start_session(EconomyConfig::default(), "p1", &store, &cache, catalog()).await;
    assert!(empty.status().is_degraded());
    assert!(empty.state().balance().abs() < f64::EPSILON);
    Ok(())
}

#[tokio::test]
async fn missing_player_is_degraded_not_fatal() {
    let store = MemoryPlayerStore::new();
    let cache = MemoryCache::new();
    let mut session =
        start_session(EconomyConfig::default(), "ghost", &store, &cache, catalog()).await;
    assert!(session.status().is_degraded());
    assert!(session.autosave_due(Utc::now()).is_none());
    assert!(session.state().balance().abs() < f64::EPSILON);
}

#[tokio::test]
async fn terminal_write_carries_progress_into_the_next_session() -> anyhow::Result<()> {
    let store = backend(0.0);
    let cache = MemoryCache::new();
    let now = Utc::now();
    store.set_boosts(vec![
        Boost::new("double", BoostKind::ClickMultiplier, 2.0, now + Duration::hours(1)),
        Boost::new("gone", BoostKind::BonusCookies, 100.0, now - Duration::hours(1)),
    ]);

    let mut first = start_session(EconomyConfig::default(), "p1", &store, &cache, catalog()).await;
    assert_eq!(first.rates(now).cpc, 2);
    for _ in 0..5 {
        first.click(now);
    }
    // The unload path writes locally; the remote never hears about these clicks.
    first.record_terminal(&cache, now)?;
    assert!(store.updates().is_empty());

    let second = start_session(EconomyConfig::default(), "p1", &store, &cache, catalog()).await;
    assert!((second.state().balance() - 10.0).abs() < f64::EPSILON);
    assert_eq!(store.updates().len(), 1);
    assert!(!cache.contains(KEY));
    Ok(())
}

#[tokio::test]
async fn custom_prefix_namespaces_the_cache_key() -> anyhow::Result<()> {
    let config = EconomyConfig::from_json(r#"{"cache_key_prefix":"tab-2/"}"#)?;
    let store = backend(1.0);
    let cache = MemoryCache::new();
    store_record(&cache, "tab-2/p1", &cached(9.0))?;
    store_record(&cache, KEY, &cached(99.0))?;

    let session = start_session(config, "p1", &store, &cache, catalog()).await;
    assert!((session.state().balance() - 9.0).abs() < f64::EPSILON);
    assert!(cache.contains(KEY));
    Ok(())
}
