//! Click value, passive generation and balance advancement.
//!
//! Rates stay fractional until [`effective_rates`]; that is the only place
//! flooring happens.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::boost::ActiveBoostSet;
use crate::catalog::UpgradeCatalog;
use crate::constants::BASE_CLICK_VALUE;
use crate::numbers::{floor_f64_to_u64, u64_to_f64};
use crate::state::{EconomyError, PlayerEconomyState};

/// Unfloored rates derived from upgrade holdings.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BaseRates {
    pub cpc: f64,
    pub cps: f64,
}

/// Rates after boosts, floored to whole cookies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EffectiveRates {
    pub cpc: u64,
    pub cps: u64,
}

/// `cpc = 1 + Σ count·cpc_bonus`, `cps = Σ count·cps_bonus`.
#[must_use]
pub fn base_rates(counts: &HashMap<String, u32>, catalog: &UpgradeCatalog) -> BaseRates {
    let (cpc_bonus, cps_bonus) = catalog.bonuses(counts);
    BaseRates {
        cpc: (BASE_CLICK_VALUE + cpc_bonus).max(BASE_CLICK_VALUE),
        cps: cps_bonus.max(0.0),
    }
}

/// Fold active boosts into the base rates and floor once.
#[must_use]
pub fn effective_rates(base: BaseRates, boosts: &ActiveBoostSet) -> EffectiveRates {
    EffectiveRates {
        cpc: floor_f64_to_u64(base.cpc * boosts.click_multiplier + boosts.bonus_flat),
        cps: floor_f64_to_u64(base.cps * boosts.cps_multiplier),
    }
}

/// Credit one click.
#[must_use]
pub fn apply_click(mut state: PlayerEconomyState, effective_cpc: u64) -> PlayerEconomyState {
    credit_rate(&mut state, u64_to_f64(effective_cpc));
    state
}

/// Credit passive generation for the measured elapsed time.
#[must_use]
pub fn apply_tick(
    mut state: PlayerEconomyState,
    effective_cps: u64,
    elapsed: Duration,
) -> PlayerEconomyState {
    if effective_cps == 0 || elapsed.is_zero() {
        return state;
    }
    credit_rate(&mut state, u64_to_f64(effective_cps) * elapsed.as_secs_f64());
    state
}

/// Buy one unit of `upgrade_id` for `cost`. Balance and count change together
/// or not at all.
///
/// # Errors
///
/// Returns [`EconomyError::InsufficientFunds`] when `balance < cost`.
pub fn purchase_upgrade(
    state: &PlayerEconomyState,
    upgrade_id: &str,
    cost: f64,
) -> Result<PlayerEconomyState, EconomyError> {
    let mut next = state.clone();
    next.spend(cost)?;
    *next.upgrade_counts.entry(upgrade_id.to_string()).or_insert(0) += 1;
    Ok(next)
}

/// Measures real elapsed time between accrual ticks so scheduler jitter never
/// accumulates into drift.
#[derive(Debug, Clone, Default)]
pub struct AccrualClock {
    last: Option<Instant>,
}

impl AccrualClock {
    #[must_use]
    pub const fn new() -> Self {
        Self { last: None }
    }

    /// Start (or restart) measuring from `now`.
    pub fn resume(&mut self, now: Instant) {
        self.last = Some(now);
    }

    /// Stop measuring; the next [`AccrualClock::elapsed`] after a resume starts from zero.
    pub fn suspend(&mut self) {
        self.last = None;
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.last.is_some()
    }

    /// Time since the previous call (or the last resume). Returns zero while suspended.
    pub fn elapsed(&mut self, now: Instant) -> Duration {
        let Some(last) = self.last else {
            return Duration::ZERO;
        };
        self.last = Some(now);
        now.saturating_duration_since(last)
    }
}

fn credit_rate(state: &mut PlayerEconomyState, amount: f64) {
    // Rates are floored u64 values, so this only trips on overflow to infinity.
    if let Err(err) = state.credit(amount) {
        log::debug!("accrual skipped: {err}");
    }
}
