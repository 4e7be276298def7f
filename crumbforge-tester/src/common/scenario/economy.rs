use anyhow::{Result, ensure};
use chrono::Duration as WallDuration;
use crumbforge_game::{
    Boost, BoostKind, EconomyConfig, EconomySession, MemoryCache, PlayerEconomyState,
    default_catalog, start_session,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::time::Duration;

use super::{IterationSummary, SCENARIO_PLAYER, approx_eq, backend_with};
use crate::common::scenario_epoch;

const CURSOR_PRICE: u64 = 15;

pub(super) async fn smoke(seed: u64) -> Result<IterationSummary> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let clicks: u32 = rng.gen_range(20..60);
    let now = scenario_epoch()?;

    let store = backend_with(0.0, &[]);
    let cache = MemoryCache::new();
    let mut session = start_session(
        EconomyConfig::default(),
        SCENARIO_PLAYER,
        &store,
        &cache,
        default_catalog().clone(),
    )
    .await;
    ensure!(
        !session.status().is_degraded(),
        "fresh session should be healthy, got {}",
        session.status()
    );

    let credited: u64 = (0..clicks).map(|_| session.click(now)).sum();
    ensure!(
        credited == u64::from(clicks),
        "{clicks} base clicks credited {credited}"
    );

    let price = session.purchase_upgrade("cursor")?;
    ensure!(price == CURSOR_PRICE, "first cursor cost {price}");
    let expected = f64::from(clicks) - 15.0;
    ensure!(
        approx_eq(session.state().balance(), expected),
        "balance {} after purchase, expected {expected}",
        session.state().balance()
    );
    ensure!(session.state().count("cursor") == 1, "cursor not recorded");

    ensure!(
        session.purchase_upgrade("time-machine").is_err(),
        "unknown upgrade was accepted"
    );
    ensure!(
        approx_eq(session.state().balance(), expected),
        "rejected purchase changed the balance"
    );

    Ok(IterationSummary::new(
        session.state().balance(),
        store.updates().len(),
        format!("{clicks} clicks, 1 cursor"),
    ))
}

pub(super) async fn boost_expiry(seed: u64) -> Result<IterationSummary> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let pins: u32 = rng.gen_range(1..5);
    let grandmas: u32 = rng.gen_range(1..10);
    let factor: u32 = rng.gen_range(2..=4);
    let lifetime = WallDuration::seconds(rng.gen_range(5..600));

    let now = scenario_epoch()?;
    let expiry = now + lifetime;
    let just_before = expiry - WallDuration::milliseconds(1);

    let store = backend_with(0.0, &[("rolling_pin", pins), ("grandma", grandmas)]);
    store.set_boosts(vec![
        Boost::new("frenzy", BoostKind::ClickMultiplier, f64::from(factor), expiry),
        Boost::new("oven", BoostKind::CpsMultiplier, 2.0, expiry),
        Boost::new("stale", BoostKind::BonusCookies, 100.0, now - WallDuration::seconds(1)),
    ]);
    let cache = MemoryCache::new();
    let mut session = start_session(
        EconomyConfig::default(),
        SCENARIO_PLAYER,
        &store,
        &cache,
        default_catalog().clone(),
    )
    .await;

    let base_cpc = u64::from(1 + pins);
    let base_cps = u64::from(grandmas);

    let active = session.active_boosts(now);
    ensure!(active.len() == 2, "{} boosts active, expected 2", active.len());
    ensure!(
        active.next_expiry() == Some(expiry),
        "next expiry {:?}, expected {expiry}",
        active.next_expiry()
    );

    let boosted = session.rates(just_before);
    ensure!(
        boosted.cpc == base_cpc * u64::from(factor) && boosted.cps == base_cps * 2,
        "rates {boosted:?} just before expiry"
    );

    let expired = session.rates(expiry);
    ensure!(
        expired.cpc == base_cpc && expired.cps == base_cps,
        "rates {expired:?} at the expiry instant"
    );
    ensure!(
        session.active_boosts(expiry).is_empty(),
        "boosts still listed at expiry"
    );

    let before = session.click(just_before);
    let after = session.click(expiry);
    ensure!(
        before == boosted.cpc && after == base_cpc,
        "clicks credited {before} then {after}"
    );

    Ok(IterationSummary::new(
        session.state().balance(),
        store.updates().len(),
        format!("x{factor} click boost for {}s", lifetime.num_seconds()),
    ))
}

pub(super) async fn jitter_drift(seed: u64) -> Result<IterationSummary> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let grandmas: u32 = rng.gen_range(1..50);
    let steps: u32 = rng.gen_range(50..200);
    let now = scenario_epoch()?;

    let store = backend_with(0.0, &[("grandma", grandmas)]);
    let cache = MemoryCache::new();
    let mut jittered = start_session(
        EconomyConfig::default(),
        SCENARIO_PLAYER,
        &store,
        &cache,
        default_catalog().clone(),
    )
    .await;
    let mut steady = EconomySession::new(
        SCENARIO_PLAYER,
        jittered.state().clone(),
        default_catalog().clone(),
        EconomyConfig::default(),
    );
    let mut idle = EconomySession::new(
        SCENARIO_PLAYER,
        PlayerEconomyState::default(),
        default_catalog().clone(),
        EconomyConfig::default(),
    );

    let mut total = Duration::ZERO;
    for _ in 0..steps {
        let step = Duration::from_millis(rng.gen_range(1..2_000));
        total += step;
        jittered.advance(step, now);
        idle.advance(step, now);
    }
    steady.advance(total, now);

    let expected = f64::from(grandmas) * total.as_secs_f64();
    ensure!(
        approx_eq(jittered.state().balance(), expected),
        "jittered ticks earned {}, expected {expected}",
        jittered.state().balance()
    );
    ensure!(
        approx_eq(steady.state().balance(), jittered.state().balance()),
        "one long tick earned {} vs {}",
        steady.state().balance(),
        jittered.state().balance()
    );
    ensure!(
        idle.state().balance().abs() < f64::EPSILON,
        "zero-rate session accrued {}",
        idle.state().balance()
    );

    Ok(IterationSummary::new(
        jittered.state().balance(),
        store.updates().len(),
        format!("{steps} ticks over {total:?} at {grandmas} cps"),
    ))
}
