use anyhow::Result;
use crumbforge_game::{MemoryPlayerStore, PlayerRecord};
use std::collections::HashMap;

mod economy;
mod persistence;

pub const SCENARIO_PLAYER: &str = "qa-player";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScenarioKind {
    Smoke,
    BoostExpiry,
    JitterDrift,
    ReloadRace,
    MalformedCache,
    DegradedStart,
    AutosaveOverlap,
}

/// One deterministic logic scenario. Every iteration derives its inputs from
/// the seed it is given.
#[derive(Debug, Clone, Copy)]
pub struct TestScenario {
    pub key: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    kind: ScenarioKind,
}

/// What one passing iteration observed.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationSummary {
    pub final_balance: f64,
    pub remote_writes: usize,
    pub detail: String,
}

impl IterationSummary {
    pub fn new(final_balance: f64, remote_writes: usize, detail: impl Into<String>) -> Self {
        Self {
            final_balance,
            remote_writes,
            detail: detail.into(),
        }
    }
}

const SCENARIOS: &[TestScenario] = &[
    TestScenario {
        key: "smoke",
        name: "Smoke",
        description: "Start a session, click, buy a cursor",
        kind: ScenarioKind::Smoke,
    },
    TestScenario {
        key: "boost-expiry",
        name: "Boost Expiry",
        description: "Boosts stop applying exactly at their expiry instant",
        kind: ScenarioKind::BoostExpiry,
    },
    TestScenario {
        key: "jitter-drift",
        name: "Jitter Drift",
        description: "Jittered tick spacing earns the same as one long tick",
        kind: ScenarioKind::JitterDrift,
    },
    TestScenario {
        key: "reload-race",
        name: "Reload Race",
        description: "Unload between autosaves, then reload; nothing is lost or replayed",
        kind: ScenarioKind::ReloadRace,
    },
    TestScenario {
        key: "malformed-cache",
        name: "Malformed Cache",
        description: "A truncated handoff record is discarded in favour of the server",
        kind: ScenarioKind::MalformedCache,
    },
    TestScenario {
        key: "degraded-start",
        name: "Degraded Start",
        description: "Unreachable backend: run on the cached record, converge later",
        kind: ScenarioKind::DegradedStart,
    },
    TestScenario {
        key: "autosave-overlap",
        name: "Autosave Overlap",
        description: "Slow and failing saves never overlap; late fires are dropped",
        kind: ScenarioKind::AutosaveOverlap,
    },
];

impl TestScenario {
    pub async fn run(&self, seed: u64) -> Result<IterationSummary> {
        match self.kind {
            ScenarioKind::Smoke => economy::smoke(seed).await,
            ScenarioKind::BoostExpiry => economy::boost_expiry(seed).await,
            ScenarioKind::JitterDrift => economy::jitter_drift(seed).await,
            ScenarioKind::ReloadRace => persistence::reload_race(seed).await,
            ScenarioKind::MalformedCache => persistence::malformed_cache(seed).await,
            ScenarioKind::DegradedStart => persistence::degraded_start(seed).await,
            ScenarioKind::AutosaveOverlap => persistence::autosave_overlap(seed),
        }
    }
}

pub fn get_scenario(key: &str) -> Option<&'static TestScenario> {
    SCENARIOS.iter().find(|scenario| scenario.key == key)
}

pub fn list_scenarios() -> impl Iterator<Item = (&'static str, &'static str)> {
    SCENARIOS
        .iter()
        .map(|scenario| (scenario.key, scenario.description))
}

pub fn all_scenario_keys() -> impl Iterator<Item = &'static str> {
    SCENARIOS.iter().map(|scenario| scenario.key)
}

/// Backend holding a single scenario player.
fn backend_with(cookies: f64, upgrades: &[(&str, u32)]) -> MemoryPlayerStore {
    let store = MemoryPlayerStore::new();
    let mut record = PlayerRecord::new(SCENARIO_PLAYER, "qa");
    record.cookies = cookies;
    record.upgrades = upgrades
        .iter()
        .map(|(id, count)| ((*id).to_string(), *count))
        .collect::<HashMap<_, _>>();
    store.insert_player(record);
    store
}

fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
}
