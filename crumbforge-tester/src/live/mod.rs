//! Live mode: a real tokio session against a flaky in-process backend,
//! followed by a reload that must recover every cookie the session earned.
use anyhow::{Context, Result, ensure};
use colored::Colorize;
use crumbforge_game::{
    EconomyConfig, EconomyError, MemoryPlayerStore, PlayerRecord, PlayerStore, SessionError,
    SessionHandle, default_catalog, start_session,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::common::FileCache;
use crate::logic::ScenarioResult;

mod flaky_store;

pub use flaky_store::{FlakyStats, FlakyStore};

const LIVE_SCENARIO_NAME: &str = "Live Session";

#[derive(Debug, Clone)]
pub struct LiveOptions {
    pub duration: Duration,
    pub failure_rate: f64,
    pub latency: Duration,
    pub cache_dir: PathBuf,
    pub config: EconomyConfig,
    pub verbose: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct LiveOutcome {
    final_balance: f64,
    reloaded_balance: f64,
    clicks: u64,
    purchases: u64,
    flaky: FlakyStats,
}

/// Run one live session per seed and report each as a scenario result.
pub async fn run_live_sessions(options: &LiveOptions, seeds: &[u64]) -> Vec<ScenarioResult> {
    let mut results = Vec::new();
    for &seed in seeds {
        if options.verbose {
            println!(
                "🔌 Live session (seed: {seed}, {:?}, failure rate {:.2})",
                options.duration, options.failure_rate
            );
        }
        let started = Instant::now();
        let (failures, performance_data) = match run_live_session(options, seed).await {
            Ok(outcome) => {
                if options.verbose {
                    println!(
                        "  ✅ balance {:.2} recovered as {:.2} after {} clicks, {} purchases, {}/{} injected failures",
                        outcome.final_balance,
                        outcome.reloaded_balance,
                        outcome.clicks,
                        outcome.purchases,
                        outcome.flaky.injected_failures,
                        outcome.flaky.calls
                    );
                }
                (Vec::new(), vec![started.elapsed()])
            }
            Err(err) => {
                let message = format!("seed {seed}: {err:#}");
                if options.verbose {
                    println!("  ❌ {}", message.clone().red());
                }
                (vec![message], Vec::new())
            }
        };
        results.push(ScenarioResult::from_iterations(
            LIVE_SCENARIO_NAME,
            seed,
            1,
            failures,
            performance_data,
        ));
    }
    results
}

async fn run_live_session(options: &LiveOptions, seed: u64) -> Result<LiveOutcome> {
    let player_id = format!("live-{seed}");
    let backend = MemoryPlayerStore::new();
    let mut record = PlayerRecord::new(&player_id, "live");
    record.upgrades = HashMap::from([("cursor".to_string(), 10), ("grandma".to_string(), 1)]);
    backend.insert_player(record);

    let flaky = FlakyStore::new(
        backend.clone(),
        seed,
        options.failure_rate,
        options.latency,
    );
    let cache = FileCache::open(&options.cache_dir)
        .with_context(|| format!("opening cache dir {}", options.cache_dir.display()))?;
    log::debug!(
        "live session {player_id} caches under {}",
        cache.root().display()
    );
    let catalog = default_catalog();

    let session = start_session(
        options.config.clone(),
        &player_id,
        &flaky,
        &cache,
        catalog.clone(),
    )
    .await;
    let handle = SessionHandle::spawn(
        session,
        Arc::new(flaky.clone()) as Arc<dyn PlayerStore>,
        cache.clone(),
    )?;

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let deadline = tokio::time::Instant::now() + options.duration;
    let mut clicks = 0u64;
    let mut purchases = 0u64;
    while tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(rng.gen_range(20..200))).await;
        handle.click().await?;
        clicks += 1;
        if rng.gen_bool(0.1) {
            match handle.purchase("cursor").await {
                Ok(_) => purchases += 1,
                Err(SessionError::Economy(EconomyError::InsufficientFunds { .. })) => {}
                Err(err) => return Err(err.into()),
            }
        }
    }

    let last = handle.shutdown().await?;
    ensure!(
        last.autosave.terminal_writes == 1,
        "shutdown recorded {} terminal writes",
        last.autosave.terminal_writes
    );
    // Autosave is withheld while a failed start has not re-read the player.
    let autosave_fires = last.autosave.issued + last.autosave.dropped;
    ensure!(
        autosave_fires > 0
            || !last.player_loaded
            || options.duration < options.config.autosave_interval(),
        "autosave never fired in {:?}",
        options.duration
    );

    // The reload talks to the backend directly so its outcome is not subject
    // to injected failures.
    let reloaded = start_session(
        options.config.clone(),
        &player_id,
        &backend,
        &cache,
        catalog.clone(),
    )
    .await;
    let reloaded_balance = reloaded.state().balance();
    // A late autosave may still land after the terminal write, so the server
    // can only be ahead of the handoff, never behind it.
    ensure!(
        reloaded_balance + 1e-6 >= last.balance,
        "reload recovered {reloaded_balance}, session ended at {}",
        last.balance
    );
    ensure!(
        !reloaded.status().is_degraded(),
        "reload against a healthy backend is {}",
        reloaded.status()
    );

    Ok(LiveOutcome {
        final_balance: last.balance,
        reloaded_balance,
        clicks,
        purchases,
        flaky: flaky.stats(),
    })
}
