//! Per-player session context.
//!
//! [`EconomySession`] owns everything one player's session mutates. It is
//! passed explicitly to whoever drives it (the tokio runtime, the browser
//! shell, a test) and is never shared between threads.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use crate::accrual::{
    AccrualClock, EffectiveRates, apply_click, apply_tick, base_rates, effective_rates,
    purchase_upgrade,
};
use crate::autosave::{AutosaveScheduler, AutosaveStats, SaveSnapshot, SaveTicket};
use crate::boost::{ActiveBoostSet, Boost, BoostKind, active};
use crate::catalog::UpgradeCatalog;
use crate::config::EconomyConfig;
use crate::constants::LOG_TARGET_SESSION;
use crate::numbers::u64_to_f64;
use crate::reconcile::{ReconcileError, ReconciliationRecord, reconcile, take_cached_record};
use crate::remote::{PersistenceError, PlayerPatch, PlayerRecord, PlayerStore};
use crate::shop::{Currency, PurchaseEffect, ShopError, ShopItem, ShopProfile};
use crate::state::{EconomyError, PlayerEconomyState};
use crate::storage::LocalCache;

/// Whether the session is in step with the backend.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Healthy,
    /// The last read failed; the session runs on last-known state.
    Degraded(String),
}

impl SyncStatus {
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded(_))
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => f.write_str("healthy"),
            Self::Degraded(reason) => write!(f, "degraded ({reason})"),
        }
    }
}

/// Read-only view for presentation and reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub player_id: String,
    pub balance: f64,
    pub upgrade_counts: HashMap<String, u32>,
    pub rates: EffectiveRates,
    pub active_boosts: usize,
    pub next_boost_expiry: Option<DateTime<Utc>>,
    pub profile: ShopProfile,
    pub status: SyncStatus,
    /// False until the backend's player record has been read once.
    pub player_loaded: bool,
    pub autosave: AutosaveStats,
}

/// Non-balance fields changed locally that no acknowledged write has carried yet.
#[derive(Debug, Default)]
struct UnsyncedFields {
    patch: PlayerPatch,
    revision: u64,
}

#[derive(Debug)]
pub struct EconomySession {
    player_id: String,
    config: EconomyConfig,
    state: PlayerEconomyState,
    catalog: UpgradeCatalog,
    boosts: Vec<Boost>,
    profile: ShopProfile,
    clock: AccrualClock,
    autosave: AutosaveScheduler,
    status: SyncStatus,
    player_loaded: bool,
    unsynced: UnsyncedFields,
    autosave_revision: Option<(SaveTicket, u64)>,
}

impl EconomySession {
    #[must_use]
    pub fn new(
        player_id: impl Into<String>,
        state: PlayerEconomyState,
        catalog: UpgradeCatalog,
        config: EconomyConfig,
    ) -> Self {
        Self {
            player_id: player_id.into(),
            config,
            state,
            catalog,
            boosts: Vec::new(),
            profile: ShopProfile::default(),
            clock: AccrualClock::new(),
            autosave: AutosaveScheduler::new(),
            status: SyncStatus::Healthy,
            player_loaded: true,
            unsynced: UnsyncedFields::default(),
            autosave_revision: None,
        }
    }

    #[must_use]
    pub fn with_profile(mut self, profile: ShopProfile) -> Self {
        self.profile = profile;
        self
    }

    #[must_use]
    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    #[must_use]
    pub const fn config(&self) -> &EconomyConfig {
        &self.config
    }

    #[must_use]
    pub const fn state(&self) -> &PlayerEconomyState {
        &self.state
    }

    #[must_use]
    pub const fn profile(&self) -> ShopProfile {
        self.profile
    }

    #[must_use]
    pub const fn status(&self) -> &SyncStatus {
        &self.status
    }

    /// Whether the backend's player record has been read. Until it has, no
    /// remote write is issued: the session's balance may be far behind the
    /// server's.
    #[must_use]
    pub const fn player_loaded(&self) -> bool {
        self.player_loaded
    }

    #[must_use]
    pub const fn autosave_stats(&self) -> AutosaveStats {
        self.autosave.stats()
    }

    #[must_use]
    pub fn cache_key(&self) -> String {
        self.config.cache_key(&self.player_id)
    }

    /// Boosts in force at `now`.
    #[must_use]
    pub fn active_boosts(&self, now: DateTime<Utc>) -> ActiveBoostSet {
        active(&self.boosts, now)
    }

    /// Current effective rates. Boosts are re-evaluated on every call.
    #[must_use]
    pub fn rates(&self, now: DateTime<Utc>) -> EffectiveRates {
        let base = base_rates(&self.state.upgrade_counts, &self.catalog);
        effective_rates(base, &self.active_boosts(now))
    }

    #[must_use]
    pub fn snapshot(&self, now: DateTime<Utc>) -> SessionSnapshot {
        let boosts = self.active_boosts(now);
        SessionSnapshot {
            player_id: self.player_id.clone(),
            balance: self.state.balance(),
            upgrade_counts: self.state.upgrade_counts.clone(),
            rates: self.rates(now),
            active_boosts: boosts.len(),
            next_boost_expiry: boosts.next_expiry(),
            profile: self.profile,
            status: self.status.clone(),
            player_loaded: self.player_loaded,
            autosave: self.autosave.stats(),
        }
    }

    /// Credit one click at the current click value. Returns the amount credited.
    pub fn click(&mut self, now: DateTime<Utc>) -> u64 {
        let cpc = self.rates(now).cpc;
        self.state = apply_click(std::mem::take(&mut self.state), cpc);
        cpc
    }

    /// Start or stop the accrual clock to match the current passive rate.
    /// Returns whether passive accrual is running afterwards.
    pub fn sync_accrual(&mut self, now_instant: Instant, now: DateTime<Utc>) -> bool {
        let generating = self.rates(now).cps > 0;
        match (generating, self.clock.is_running()) {
            (true, false) => {
                log::debug!(target: LOG_TARGET_SESSION, "passive accrual resumed");
                self.clock.resume(now_instant);
            }
            (false, true) => {
                log::debug!(target: LOG_TARGET_SESSION, "passive accrual suspended");
                self.clock.suspend();
            }
            _ => {}
        }
        generating
    }

    /// Advance passive generation by the real time since the previous tick.
    /// Returns the amount credited; zero while accrual is suspended.
    pub fn tick(&mut self, now_instant: Instant, now: DateTime<Utc>) -> f64 {
        if !self.clock.is_running() {
            return 0.0;
        }
        let elapsed = self.clock.elapsed(now_instant);
        self.advance(elapsed, now)
    }

    /// Credit passive generation for an externally measured `elapsed`, for
    /// hosts without a monotonic [`Instant`] (browsers measure with
    /// `performance.now()`).
    pub fn advance(&mut self, elapsed: Duration, now: DateTime<Utc>) -> f64 {
        let cps = self.rates(now).cps;
        let before = self.state.balance();
        self.state = apply_tick(std::mem::take(&mut self.state), cps, elapsed);
        self.state.balance() - before
    }

    /// Buy the next unit of `upgrade_id` at its catalog price. Returns the price paid.
    ///
    /// # Errors
    ///
    /// Returns [`EconomyError::UnknownUpgrade`] for ids missing from the catalog
    /// and [`EconomyError::InsufficientFunds`] when the balance is short.
    pub fn purchase_upgrade(&mut self, upgrade_id: &str) -> Result<u64, EconomyError> {
        let cost = self
            .catalog
            .quote(upgrade_id, &self.state.upgrade_counts)
            .ok_or_else(|| EconomyError::UnknownUpgrade(upgrade_id.to_string()))?;
        self.state = purchase_upgrade(&self.state, upgrade_id, u64_to_f64(cost))?;
        self.mark_unsynced(PlayerPatch::upgrades(&self.state.upgrade_counts));
        log::info!(
            target: LOG_TARGET_SESSION,
            "{} bought {upgrade_id} for {cost}",
            self.player_id
        );
        Ok(cost)
    }

    /// Apply a shop item. Cookie-priced items debit the balance; real-money
    /// items assume payment already settled. Returns the patch to persist.
    ///
    /// # Errors
    ///
    /// Returns an error if the effect is already owned, would downgrade the
    /// membership, or the balance cannot cover a cookie price.
    pub fn buy_shop_item(&mut self, item: &ShopItem) -> Result<PlayerPatch, ShopError> {
        let profile = self.profile.apply(item.effect)?;
        let mut patch = PlayerPatch::effect(item.effect);
        if item.currency == Currency::Cookies {
            let mut next = self.state.clone();
            next.spend(item.price)?;
            patch.cookies = Some(next.balance());
            self.state = next;
        }
        self.profile = profile;
        self.mark_unsynced(PlayerPatch::effect(item.effect));
        log::info!(target: LOG_TARGET_SESSION, "{} bought {}", self.player_id, item.id);
        Ok(patch)
    }

    /// Claim the free-grant boost `boost_id` at price zero.
    ///
    /// # Errors
    ///
    /// Returns [`ShopError::UnknownBoost`] if no free grant has that id,
    /// [`ShopError::GrantExpired`] once it has expired, and the profile errors
    /// when the effect is already satisfied.
    pub fn claim_free_grant(
        &mut self,
        boost_id: &str,
        now: DateTime<Utc>,
    ) -> Result<PlayerPatch, ShopError> {
        let boost = self
            .boosts
            .iter()
            .find(|boost| boost.id == boost_id)
            .ok_or_else(|| ShopError::UnknownBoost(boost_id.to_string()))?;
        let BoostKind::FreeGrant(effect) = boost.kind else {
            return Err(ShopError::UnknownBoost(boost_id.to_string()));
        };
        if !boost.is_active(now) {
            return Err(ShopError::GrantExpired(boost_id.to_string()));
        }
        self.profile = self.profile.apply(effect)?;
        self.mark_unsynced(PlayerPatch::effect(effect));
        log::info!(
            target: LOG_TARGET_SESSION,
            "{} claimed free grant {boost_id}",
            self.player_id
        );
        Ok(PlayerPatch::effect(effect))
    }

    /// Swap in a freshly polled boost list.
    pub fn replace_boosts(&mut self, boosts: Vec<Boost>) {
        log::debug!(target: LOG_TARGET_SESSION, "boost list refreshed ({} entries)", boosts.len());
        self.boosts = boosts;
    }

    /// Autosave timer fired: the write to issue, unless one is still in flight
    /// or the player record has not been read yet. Unacknowledged upgrade and
    /// shop changes ride along until a write carrying them succeeds.
    pub fn autosave_due(&mut self, now: DateTime<Utc>) -> Option<(SaveTicket, PlayerPatch)> {
        if !self.player_loaded {
            log::debug!(
                target: LOG_TARGET_SESSION,
                "{} autosave withheld until the player record loads",
                self.player_id
            );
            return None;
        }
        let snapshot = SaveSnapshot {
            balance: self.state.balance(),
            rates: self.rates(now),
        };
        let (ticket, mut patch) = self.autosave.on_timer(snapshot)?;
        self.autosave_revision = if self.unsynced.patch.is_empty() {
            None
        } else {
            patch.merge(self.unsynced.patch.clone());
            Some((ticket, self.unsynced.revision))
        };
        Some((ticket, patch))
    }

    pub fn autosave_finished(&mut self, ticket: SaveTicket, result: Result<(), PersistenceError>) {
        if let Some((sent, revision)) = self.autosave_revision
            && sent == ticket
        {
            self.autosave_revision = None;
            if result.is_ok() {
                self.sync_acknowledged(revision);
            }
        }
        self.autosave.complete(ticket, result);
    }

    /// Upgrade and shop changes still owed to the backend, with the current
    /// balance, tagged with the revision to acknowledge. `None` when nothing
    /// is owed or the player record has not been read yet.
    #[must_use]
    pub fn pending_sync(&self) -> Option<(u64, PlayerPatch)> {
        if !self.player_loaded || self.unsynced.patch.is_empty() {
            return None;
        }
        let mut patch = self.unsynced.patch.clone();
        patch.cookies = Some(self.state.balance());
        Some((self.unsynced.revision, patch))
    }

    /// A write carrying `revision` of the unsynced fields succeeded. Older
    /// revisions are ignored: a later change is still owed.
    pub fn sync_acknowledged(&mut self, revision: u64) {
        if revision != self.unsynced.revision || self.unsynced.patch.is_empty() {
            return;
        }
        self.unsynced.patch = PlayerPatch::default();
        log::debug!(
            target: LOG_TARGET_SESSION,
            "{} upgrade and shop changes acknowledged",
            self.player_id
        );
    }

    fn mark_unsynced(&mut self, patch: PlayerPatch) {
        self.unsynced.patch.merge(patch);
        self.unsynced.revision += 1;
    }

    /// Adopt the player record read after a degraded start. The balance
    /// follows the reconcile rule (higher wins). Upgrade counts and the shop
    /// profile keep whatever either side owns; whatever the session holds
    /// beyond the server is queued for the next write.
    pub fn adopt_server_record(&mut self, record: &PlayerRecord) {
        let local = ReconciliationRecord::capture(&self.state, EffectiveRates::default());
        let mut state = reconcile(record.economy_state(), Some(&local)).state;

        let mut counts_ahead = false;
        for (id, &count) in &self.state.upgrade_counts {
            let server = state.upgrade_counts.entry(id.clone()).or_insert(0);
            if count > *server {
                *server = count;
                counts_ahead = true;
            }
        }
        if counts_ahead {
            self.mark_unsynced(PlayerPatch::upgrades(&state.upgrade_counts));
        }

        let mut profile = record.shop_profile();
        if self.profile.is_vip && !profile.is_vip {
            profile.is_vip = true;
            self.mark_unsynced(PlayerPatch::effect(PurchaseEffect::Vip));
        }
        if self.profile.membership > profile.membership {
            profile.membership = self.profile.membership;
            self.mark_unsynced(PlayerPatch::effect(PurchaseEffect::Membership(
                profile.membership,
            )));
        }

        self.state = state;
        self.profile = profile;
        self.player_loaded = true;
        log::info!(
            target: LOG_TARGET_SESSION,
            "{} player record loaded late (balance {:.2})",
            self.player_id,
            self.state.balance()
        );
        self.mark_healthy();
    }

    /// Pre-termination hook: synchronously write the handoff record the next
    /// session start will reconcile against.
    ///
    /// # Errors
    ///
    /// Returns an error if the local cache rejects the write.
    pub fn record_terminal(
        &mut self,
        cache: &impl LocalCache,
        now: DateTime<Utc>,
    ) -> Result<(), ReconcileError> {
        let record = ReconciliationRecord::capture(&self.state, self.rates(now));
        let key = self.cache_key();
        self.autosave.write_terminal(cache, &key, &record)?;
        log::info!(
            target: LOG_TARGET_SESSION,
            "{} wrote terminal record (balance {:.2})",
            self.player_id,
            record.balance
        );
        Ok(())
    }

    /// Flag a failed read. The session keeps running on last-known state.
    pub fn mark_degraded(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        log::warn!(target: LOG_TARGET_SESSION, "{} degraded: {reason}", self.player_id);
        self.status = SyncStatus::Degraded(reason);
    }

    /// A read succeeded. Does nothing while the player record is still
    /// missing: only reading it can clear that.
    pub fn mark_healthy(&mut self) {
        if !self.player_loaded {
            return;
        }
        if self.status.is_degraded() {
            log::info!(target: LOG_TARGET_SESSION, "{} back in sync", self.player_id);
        }
        self.status = SyncStatus::Healthy;
    }

    /// The player record could not be read at start.
    fn detach_from_server(&mut self, reason: String) {
        self.player_loaded = false;
        self.mark_degraded(reason);
    }
}

/// Session-start sequence: consume the cached handoff record, fetch the
/// player, reconcile, push the merged balance when the server was stale, then
/// load boosts.
///
/// Never fails: an unreachable backend yields a session seeded from the
/// cached record (or empty) and flagged [`SyncStatus::Degraded`].
pub async fn start_session<S, C>(
    config: EconomyConfig,
    player_id: &str,
    store: &S,
    cache: &C,
    catalog: UpgradeCatalog,
) -> EconomySession
where
    S: PlayerStore + ?Sized,
    C: LocalCache,
{
    let cached = take_cached_record(cache, &config.cache_key(player_id));

    let mut session = match store.fetch_player(player_id).await {
        Ok(Some(record)) => {
            let merged = reconcile(record.economy_state(), cached.as_ref());
            if merged.must_persist {
                let patch = PlayerPatch::cookies(merged.state.balance());
                if let Err(err) = store.update_player(player_id, patch).await {
                    log::warn!(
                        target: LOG_TARGET_SESSION,
                        "could not push reconciled balance for {player_id}: {err}"
                    );
                }
            }
            EconomySession::new(player_id, merged.state, catalog, config)
                .with_profile(record.shop_profile())
        }
        Ok(None) => {
            let mut session = seed_from_cache(player_id, cached.as_ref(), catalog, config);
            session.detach_from_server(PersistenceError::NotFound(player_id.to_string()).to_string());
            session
        }
        Err(err) => {
            let mut session = seed_from_cache(player_id, cached.as_ref(), catalog, config);
            session.detach_from_server(err.to_string());
            session
        }
    };

    match store.list_active_boosts().await {
        Ok(boosts) => session.replace_boosts(boosts),
        Err(err) => {
            if !session.status().is_degraded() {
                session.mark_degraded(err.to_string());
            }
        }
    }

    log::info!(
        target: LOG_TARGET_SESSION,
        "session started for {player_id} (balance {:.2}, {})",
        session.state().balance(),
        session.status()
    );
    session
}

fn seed_from_cache(
    player_id: &str,
    cached: Option<&ReconciliationRecord>,
    catalog: UpgradeCatalog,
    config: EconomyConfig,
) -> EconomySession {
    let state = cached
        .map(ReconciliationRecord::to_state)
        .unwrap_or_default();
    EconomySession::new(player_id, state, catalog, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::UpgradeCatalogEntry;
    use crate::shop::{MembershipTier, PurchaseEffect};
    use crate::storage::MemoryCache;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::time::Duration;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn catalog() -> UpgradeCatalog {
        UpgradeCatalog::from_entries(vec![
            UpgradeCatalogEntry {
                id: "cursor".into(),
                name: "Cursor".into(),
                cpc_bonus: 1.0,
                cps_bonus: 0.0,
                base_cost: 10.0,
                cost_growth: 1.0,
            },
            UpgradeCatalogEntry {
                id: "grandma".into(),
                name: "Grandma".into(),
                cpc_bonus: 0.0,
                cps_bonus: 2.0,
                base_cost: 20.0,
                cost_growth: 1.0,
            },
        ])
    }

    fn session(balance: f64) -> EconomySession {
        EconomySession::new(
            "p1",
            PlayerEconomyState::new(balance, HashMap::new()),
            catalog(),
            EconomyConfig::default(),
        )
    }

    #[test]
    fn clicks_and_purchases_flow_through_state() {
        let mut session = session(0.0);
        for _ in 0..10 {
            assert_eq!(session.click(now()), 1);
        }
        assert_eq!(session.purchase_upgrade("cursor"), Ok(10));
        assert_eq!(session.click(now()), 2);
        assert_eq!(
            session.purchase_upgrade("cursor"),
            Err(EconomyError::InsufficientFunds {
                cost: 10.0,
                balance: 2.0
            })
        );
        assert_eq!(
            session.purchase_upgrade("portal"),
            Err(EconomyError::UnknownUpgrade("portal".into()))
        );
    }

    #[test]
    fn accrual_suspends_without_generation() {
        let start = Instant::now();
        let mut session = session(20.0);
        assert!(!session.sync_accrual(start, now()));
        assert!(session.tick(start + Duration::from_secs(5), now()).abs() < f64::EPSILON);

        session.purchase_upgrade("grandma").unwrap();
        assert!(session.sync_accrual(start, now()));
        let credited = session.tick(start + Duration::from_millis(1_500), now());
        assert!((credited - 3.0).abs() < 1e-9);
    }

    #[test]
    fn cookie_priced_items_debit_balance_and_real_money_does_not() {
        let mut session = session(50.0);
        let item = ShopItem {
            id: "vip".into(),
            name: "VIP".into(),
            description: String::new(),
            price: 30.0,
            currency: Currency::Cookies,
            effect: PurchaseEffect::Vip,
        };
        let patch = session.buy_shop_item(&item).unwrap();
        assert_eq!(patch.is_vip, Some(true));
        assert_eq!(patch.cookies, Some(20.0));
        assert!(matches!(
            session.buy_shop_item(&item),
            Err(ShopError::AlreadyOwned(PurchaseEffect::Vip))
        ));

        let gold = ShopItem {
            id: "gold_membership".into(),
            name: "Gold".into(),
            description: String::new(),
            price: 999.0,
            currency: Currency::RealMoney,
            effect: PurchaseEffect::Membership(MembershipTier::Gold),
        };
        let patch = session.buy_shop_item(&gold).unwrap();
        assert_eq!(patch.membership, Some(MembershipTier::Gold));
        assert!((session.state().balance() - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unaffordable_cookie_item_changes_nothing() {
        let mut session = session(5.0);
        let item = ShopItem {
            id: "vip".into(),
            name: "VIP".into(),
            description: String::new(),
            price: 30.0,
            currency: Currency::Cookies,
            effect: PurchaseEffect::Vip,
        };
        assert!(matches!(
            session.buy_shop_item(&item),
            Err(ShopError::Economy(EconomyError::InsufficientFunds { .. }))
        ));
        assert!(!session.profile().is_vip);
        assert!((session.state().balance() - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn free_grants_are_claimed_by_id_while_active() {
        let mut session = session(0.0);
        let expires = now() + ChronoDuration::minutes(5);
        session.replace_boosts(vec![
            Boost::new(
                "silver-week",
                BoostKind::FreeGrant(PurchaseEffect::Membership(MembershipTier::Silver)),
                1.0,
                expires,
            ),
            Boost::new("x2", BoostKind::ClickMultiplier, 2.0, expires),
        ]);

        assert_eq!(
            session.claim_free_grant("x2", now()),
            Err(ShopError::UnknownBoost("x2".into()))
        );
        assert_eq!(
            session.claim_free_grant("silver-week", expires),
            Err(ShopError::GrantExpired("silver-week".into()))
        );
        let patch = session.claim_free_grant("silver-week", now()).unwrap();
        assert_eq!(patch.membership, Some(MembershipTier::Silver));
        assert!(matches!(
            session.claim_free_grant("silver-week", now()),
            Err(ShopError::AlreadyOwned(_))
        ));
    }

    #[test]
    fn upgrade_counts_ride_autosaves_until_one_succeeds() {
        let mut session = session(30.0);
        session.purchase_upgrade("cursor").unwrap();
        let (revision, patch) = session.pending_sync().unwrap();
        assert_eq!(patch.cookies, Some(20.0));
        assert_eq!(patch.upgrades.as_ref().and_then(|c| c.get("cursor")), Some(&1));

        let (ticket, patch) = session.autosave_due(now()).unwrap();
        assert!(patch.upgrades.is_some());
        session.autosave_finished(ticket, Err(PersistenceError::Write("down".into())));
        assert!(session.pending_sync().is_some());

        let (ticket, patch) = session.autosave_due(now()).unwrap();
        assert!(patch.upgrades.is_some());
        session.autosave_finished(ticket, Ok(()));
        assert!(session.pending_sync().is_none());
        let (_, patch) = session.autosave_due(now()).unwrap();
        assert!(patch.upgrades.is_none());

        // A stale acknowledgement never clears a newer change.
        session.purchase_upgrade("cursor").unwrap();
        session.sync_acknowledged(revision);
        assert!(session.pending_sync().is_some());
    }

    #[test]
    fn shop_effects_stay_owed_until_acknowledged() {
        let mut session = session(0.0);
        let gold = ShopItem {
            id: "gold_membership".into(),
            name: "Gold".into(),
            description: String::new(),
            price: 999.0,
            currency: Currency::RealMoney,
            effect: PurchaseEffect::Membership(MembershipTier::Gold),
        };
        session.buy_shop_item(&gold).unwrap();
        let (revision, patch) = session.pending_sync().unwrap();
        assert_eq!(patch.membership, Some(MembershipTier::Gold));
        session.sync_acknowledged(revision);
        assert!(session.pending_sync().is_none());
    }

    #[test]
    fn detached_session_writes_nothing_until_the_record_loads() {
        let mut session = session(12.0);
        session.purchase_upgrade("cursor").unwrap();
        session.detach_from_server("read failed".into());
        assert!(session.autosave_due(now()).is_none());
        assert!(session.pending_sync().is_none());
        assert_eq!(session.autosave_stats().issued, 0);

        session.mark_healthy();
        assert!(session.status().is_degraded());

        let mut record = PlayerRecord::new("p1", "ada");
        record.cookies = 1_000_000.0;
        record.upgrades = HashMap::from([("grandma".to_string(), 4)]);
        session.adopt_server_record(&record);

        assert!(session.player_loaded());
        assert_eq!(*session.status(), SyncStatus::Healthy);
        assert!((session.state().balance() - 1_000_000.0).abs() < f64::EPSILON);
        assert_eq!(session.state().count("grandma"), 4);
        assert_eq!(session.state().count("cursor"), 1);
        let (_, patch) = session.autosave_due(now()).unwrap();
        assert_eq!(patch.cookies, Some(1_000_000.0));
        assert_eq!(
            patch.upgrades,
            Some(HashMap::from([
                ("grandma".to_string(), 4),
                ("cursor".to_string(), 1)
            ]))
        );
    }

    #[test]
    fn late_record_below_the_session_keeps_the_session_balance() {
        let mut session = session(500.0);
        session.detach_from_server("read failed".into());
        let mut record = PlayerRecord::new("p1", "ada");
        record.cookies = 80.0;
        record.is_vip = true;
        session.adopt_server_record(&record);
        assert!((session.state().balance() - 500.0).abs() < f64::EPSILON);
        assert!(session.profile().is_vip);
        assert!(session.pending_sync().is_none());
    }

    #[test]
    fn terminal_record_is_keyed_by_player() {
        let cache = MemoryCache::new();
        let mut session = session(42.0);
        session.record_terminal(&cache, now()).unwrap();
        assert!(cache.contains("crumbforge.reconcile.p1"));
        assert_eq!(session.autosave_stats().terminal_writes, 1);
    }

    #[test]
    fn snapshot_reports_boost_banner_data() {
        let mut session = session(0.0);
        let soon = now() + ChronoDuration::seconds(30);
        session.replace_boosts(vec![
            Boost::new("x2", BoostKind::ClickMultiplier, 2.0, soon),
            Boost::new("old", BoostKind::CpsMultiplier, 3.0, now()),
        ]);
        let snapshot = session.snapshot(now());
        assert_eq!(snapshot.active_boosts, 1);
        assert_eq!(snapshot.next_boost_expiry, Some(soon));
        assert_eq!(snapshot.rates.cpc, 2);
        assert_eq!(snapshot.status, SyncStatus::Healthy);
    }
}
