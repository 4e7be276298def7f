//! Centralized timing and persistence constants for the Crumbforge economy.
//!
//! Cadences here are defaults; `EconomyConfig` carries the values a session
//! actually runs with.

// Cadences -----------------------------------------------------------------
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_AUTOSAVE_INTERVAL_MS: u64 = 3_000;
pub const DEFAULT_BOOST_POLL_INTERVAL_MS: u64 = 10_000;

// Persistence --------------------------------------------------------------
pub const DEFAULT_CACHE_KEY_PREFIX: &str = "crumbforge.reconcile.";
pub(crate) const RECORD_ENVELOPE_VERSION: u32 = 1;
pub(crate) const RECORD_CHECKSUM_SEED: u64 = 0x00C0_0C1E;

// Economy ------------------------------------------------------------------
pub(crate) const BASE_CLICK_VALUE: f64 = 1.0;
pub(crate) const DEFAULT_COST_GROWTH: f64 = 1.15;

// Log targets --------------------------------------------------------------
pub(crate) const LOG_TARGET_SESSION: &str = "crumbforge::session";
pub(crate) const LOG_TARGET_AUTOSAVE: &str = "crumbforge::autosave";
pub(crate) const LOG_TARGET_RECONCILE: &str = "crumbforge::reconcile";
