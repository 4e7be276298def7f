//! Crumbforge Economy Engine
//!
//! Platform-agnostic core of the Crumbforge idle clicker: boost evaluation,
//! click and passive accrual, session-start reconciliation and autosave.
//! Storage and the hosted backend are reached through the [`LocalCache`] and
//! [`PlayerStore`] traits; the optional `async` feature adds a tokio runtime
//! that drives a session on its own task.

pub mod accrual;
pub mod autosave;
pub mod boost;
pub mod catalog;
pub mod config;
pub mod constants;
pub mod numbers;
pub mod reconcile;
pub mod remote;
#[cfg(feature = "async")]
pub mod runtime;
pub mod session;
pub mod shop;
pub mod state;
pub mod storage;

// Re-export commonly used types
pub use accrual::{
    AccrualClock, BaseRates, EffectiveRates, apply_click, apply_tick, base_rates, effective_rates,
    purchase_upgrade,
};
pub use autosave::{AutosaveScheduler, AutosaveStats, SaveSnapshot, SaveTicket};
pub use boost::{ActiveBoostSet, Boost, BoostDecodeError, BoostKind, active};
pub use catalog::{UpgradeCatalog, UpgradeCatalogEntry, default_catalog};
pub use config::{ConfigError, EconomyConfig};
pub use numbers::format_compact;
pub use reconcile::{
    ReconcileError, Reconciled, ReconciliationRecord, decode_record, encode_record, reconcile,
    store_record, take_cached_record,
};
pub use remote::{MemoryPlayerStore, PersistenceError, PlayerPatch, PlayerRecord, PlayerStore};
#[cfg(feature = "async")]
pub use runtime::{SessionError, SessionHandle};
pub use session::{EconomySession, SessionSnapshot, SyncStatus, start_session};
pub use shop::{
    Currency, MembershipTier, PurchaseEffect, Shop, ShopError, ShopItem, ShopProfile, default_shop,
};
pub use state::{EconomyError, PlayerEconomyState};
pub use storage::{CacheError, LocalCache, MemoryCache};
