use anyhow::{Context, Result, ensure};
use crumbforge_game::{
    AutosaveScheduler, EconomyConfig, EffectiveRates, LocalCache, MemoryCache, PersistenceError,
    PlayerStore, ReconciliationRecord, SaveSnapshot, SaveTicket, default_catalog, encode_record,
    start_session, store_record,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::time::Duration;

use super::{IterationSummary, SCENARIO_PLAYER, approx_eq, backend_with};
use crate::common::scenario_epoch;

const INJECTED_FAILURE_RATE: f64 = 0.25;

pub(super) async fn reload_race(seed: u64) -> Result<IterationSummary> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let start_balance = f64::from(rng.gen_range(100u32..1_000));
    let grandmas: u32 = rng.gen_range(1..20);
    let config = EconomyConfig::default();
    let now = scenario_epoch()?;

    let store = backend_with(start_balance, &[("grandma", grandmas)]);
    let cache = MemoryCache::new();
    let catalog = default_catalog();

    let mut first =
        start_session(config.clone(), SCENARIO_PLAYER, &store, &cache, catalog.clone()).await;
    let (ticket, patch) = first
        .autosave_due(now)
        .context("first autosave was not issued")?;
    let saved = store.update_player(SCENARIO_PLAYER, patch).await;
    first.autosave_finished(ticket, saved);

    // Earn past the last autosave, then unload before the next one fires.
    let secs = rng.gen_range(1..config.autosave_interval().as_secs().max(2));
    first.advance(Duration::from_secs(secs), now);
    for _ in 0..rng.gen_range(1..30) {
        first.click(now);
    }
    let final_balance = first.state().balance();
    first.record_terminal(&cache, now)?;

    let server_balance = store
        .player(SCENARIO_PLAYER)
        .context("scenario player vanished")?
        .cookies;
    ensure!(
        server_balance < final_balance,
        "server {server_balance} should trail the unloaded session {final_balance}"
    );
    let writes_before = store.updates().len();

    let second =
        start_session(config.clone(), SCENARIO_PLAYER, &store, &cache, catalog.clone()).await;
    ensure!(
        approx_eq(second.state().balance(), final_balance),
        "reload balance {} lost progress (expected {final_balance})",
        second.state().balance()
    );
    let updates = store.updates();
    ensure!(
        updates.len() == writes_before + 1,
        "reload pushed {} patches, expected 1",
        updates.len() - writes_before
    );
    let pushed = updates.last().and_then(|(_, patch)| patch.cookies);
    ensure!(
        pushed.is_some_and(|cookies| approx_eq(cookies, final_balance)),
        "reload pushed {pushed:?}"
    );
    ensure!(
        !cache.contains(&config.cache_key(SCENARIO_PLAYER)),
        "handoff record left behind"
    );

    let third = start_session(config, SCENARIO_PLAYER, &store, &cache, catalog.clone()).await;
    ensure!(
        store.updates().len() == writes_before + 1,
        "second reload replayed the handoff"
    );
    ensure!(
        approx_eq(third.state().balance(), final_balance),
        "second reload balance {}",
        third.state().balance()
    );

    Ok(IterationSummary::new(
        final_balance,
        store.updates().len(),
        format!("unloaded {secs}s after autosave"),
    ))
}

pub(super) async fn malformed_cache(seed: u64) -> Result<IterationSummary> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let server_balance = f64::from(rng.gen_range(10u32..500));
    let config = EconomyConfig::default();
    let key = config.cache_key(SCENARIO_PLAYER);

    let store = backend_with(server_balance, &[]);
    let cache = MemoryCache::new();
    let inflated = ReconciliationRecord {
        balance: server_balance + 1_000_000.0,
        upgrade_counts: BTreeMap::new(),
        rates: EffectiveRates::default(),
    };
    let bytes = encode_record(&inflated)?;
    let cut = rng.gen_range(1..bytes.len());
    cache.set(&key, &bytes[..cut])?;

    let session = start_session(
        config,
        SCENARIO_PLAYER,
        &store,
        &cache,
        default_catalog().clone(),
    )
    .await;
    ensure!(
        approx_eq(session.state().balance(), server_balance),
        "record truncated at byte {cut}/{} was trusted (balance {})",
        bytes.len(),
        session.state().balance()
    );
    ensure!(store.updates().is_empty(), "malformed record was persisted");
    ensure!(!cache.contains(&key), "malformed record was not discarded");

    Ok(IterationSummary::new(
        server_balance,
        0,
        format!("truncated at {cut}/{} bytes", bytes.len()),
    ))
}

pub(super) async fn degraded_start(seed: u64) -> Result<IterationSummary> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let cached_balance = f64::from(rng.gen_range(500u32..5_000));
    let server_balance = f64::from(rng.gen_range(0u32..500));
    let grandmas: u32 = rng.gen_range(1..8);
    let config = EconomyConfig::default();
    let key = config.cache_key(SCENARIO_PLAYER);
    let now = scenario_epoch()?;

    let store = backend_with(server_balance, &[("cursor", 3)]);
    let cache = MemoryCache::new();
    store_record(
        &cache,
        &key,
        &ReconciliationRecord {
            balance: cached_balance,
            upgrade_counts: BTreeMap::from([("grandma".to_string(), grandmas)]),
            rates: EffectiveRates::default(),
        },
    )?;
    store.set_fail_reads(true);

    let mut offline = start_session(
        config.clone(),
        SCENARIO_PLAYER,
        &store,
        &cache,
        default_catalog().clone(),
    )
    .await;
    ensure!(
        offline.status().is_degraded(),
        "unreachable backend left the session {}",
        offline.status()
    );
    ensure!(
        approx_eq(offline.state().balance(), cached_balance),
        "offline session started at {} instead of the cached {cached_balance}",
        offline.state().balance()
    );

    let secs: u32 = rng.gen_range(1..60);
    offline.advance(Duration::from_secs(u64::from(secs)), now);
    let offline_balance = offline.state().balance();
    let expected = cached_balance + f64::from(grandmas * secs);
    ensure!(
        approx_eq(offline_balance, expected),
        "offline accrual reached {offline_balance}, expected {expected}"
    );
    offline.record_terminal(&cache, now)?;

    store.set_fail_reads(false);
    let online = start_session(
        config,
        SCENARIO_PLAYER,
        &store,
        &cache,
        default_catalog().clone(),
    )
    .await;
    ensure!(
        !online.status().is_degraded(),
        "recovered backend still {}",
        online.status()
    );
    ensure!(
        approx_eq(online.state().balance(), offline_balance),
        "offline progress lost: {} vs {offline_balance}",
        online.state().balance()
    );
    ensure!(
        online.state().count("cursor") == 3,
        "server upgrade counts were not kept"
    );
    ensure!(
        store.updates().len() == 1,
        "{} patches after recovery, expected 1",
        store.updates().len()
    );

    Ok(IterationSummary::new(
        online.state().balance(),
        store.updates().len(),
        format!("{secs}s offline at {grandmas} cps"),
    ))
}

/// Drives the scheduler against a simulated backend whose write latency can
/// exceed the autosave period.
pub(super) fn autosave_overlap(seed: u64) -> Result<IterationSummary> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let fires: u32 = rng.gen_range(20..60);
    let period_ms = EconomyConfig::default().autosave_interval_ms;

    let mut scheduler = AutosaveScheduler::new();
    let mut pending: Option<(SaveTicket, u64)> = None;
    let mut first_ticket = None;
    let mut expected_dropped = 0u64;
    let mut expected_failed = 0u64;

    for fire in 1..=fires {
        let now_ms = u64::from(fire) * period_ms;
        if let Some((ticket, done_at)) = pending
            && done_at <= now_ms
        {
            let result = if rng.gen_bool(INJECTED_FAILURE_RATE) {
                expected_failed += 1;
                Err(PersistenceError::Write("injected failure".to_string()))
            } else {
                Ok(())
            };
            scheduler.complete(ticket, result);
            pending = None;
        }

        let snapshot = SaveSnapshot {
            balance: f64::from(fire),
            rates: EffectiveRates::default(),
        };
        match scheduler.on_timer(snapshot) {
            Some((ticket, patch)) => {
                ensure!(
                    pending.is_none(),
                    "fire {fire} issued a write while one was in flight"
                );
                ensure!(
                    patch.cookies == Some(f64::from(fire)),
                    "fire {fire} sent {:?}",
                    patch.cookies
                );
                first_ticket.get_or_insert(ticket);
                let latency = rng.gen_range(0..period_ms * 4);
                pending = Some((ticket, now_ms + latency));
            }
            None => {
                ensure!(pending.is_some(), "fire {fire} dropped with nothing in flight");
                expected_dropped += 1;
            }
        }
    }

    if let Some((ticket, _)) = pending.take() {
        scheduler.complete(ticket, Ok(()));
    }
    let settled = scheduler.stats();
    if let Some(ticket) = first_ticket {
        scheduler.complete(ticket, Ok(()));
    }
    let stats = scheduler.stats();

    ensure!(stats == settled, "a stale completion changed the counters");
    ensure!(!scheduler.in_flight(), "write still in flight after draining");
    ensure!(
        stats.issued + stats.dropped == u64::from(fires),
        "{} issued + {} dropped != {fires} fires",
        stats.issued,
        stats.dropped
    );
    ensure!(
        stats.dropped == expected_dropped && stats.failed == expected_failed,
        "stats {stats:?}, expected {expected_dropped} dropped and {expected_failed} failed"
    );
    ensure!(
        stats.succeeded + stats.failed == stats.issued,
        "completions do not add up: {stats:?}"
    );

    Ok(IterationSummary::new(
        f64::from(fires),
        usize::try_from(stats.succeeded).unwrap_or(usize::MAX),
        format!(
            "{fires} fires: {} issued, {} dropped, {} failed",
            stats.issued, stats.dropped, stats.failed
        ),
    ))
}
