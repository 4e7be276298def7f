//! Hosted-backend collaborator contract and an in-process implementation.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use crate::accrual::EffectiveRates;
use crate::boost::Boost;
use crate::shop::{MembershipTier, PurchaseEffect, ShopProfile};
use crate::state::PlayerEconomyState;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("read failed: {0}")]
    Read(String),
    #[error("write failed: {0}")]
    Write(String),
    #[error("player {0} not found")]
    NotFound(String),
}

/// Player document as the backend stores it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub cookies: f64,
    #[serde(default)]
    pub upgrades: HashMap<String, u32>,
    #[serde(default)]
    pub cookies_per_click: u64,
    #[serde(default)]
    pub cookies_per_second: u64,
    #[serde(default)]
    pub is_vip: bool,
    #[serde(default)]
    pub membership: MembershipTier,
}

impl PlayerRecord {
    #[must_use]
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn economy_state(&self) -> PlayerEconomyState {
        PlayerEconomyState::new(self.cookies, self.upgrades.clone())
    }

    #[must_use]
    pub const fn shop_profile(&self) -> ShopProfile {
        ShopProfile {
            is_vip: self.is_vip,
            membership: self.membership,
        }
    }

    /// Overwrite the fields present in `patch`.
    pub fn apply_patch(&mut self, patch: &PlayerPatch) {
        if let Some(cookies) = patch.cookies {
            self.cookies = cookies;
        }
        if let Some(cpc) = patch.cookies_per_click {
            self.cookies_per_click = cpc;
        }
        if let Some(cps) = patch.cookies_per_second {
            self.cookies_per_second = cps;
        }
        if let Some(upgrades) = &patch.upgrades {
            self.upgrades.clone_from(upgrades);
        }
        if let Some(is_vip) = patch.is_vip {
            self.is_vip = is_vip;
        }
        if let Some(membership) = patch.membership {
            self.membership = membership;
        }
    }
}

/// Partial update; only `Some` fields are sent.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlayerPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookies: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookies_per_click: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookies_per_second: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrades: Option<HashMap<String, u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_vip: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub membership: Option<MembershipTier>,
}

impl PlayerPatch {
    /// The periodic autosave payload.
    #[must_use]
    pub const fn balance(balance: f64, rates: EffectiveRates) -> Self {
        Self {
            cookies: Some(balance),
            cookies_per_click: Some(rates.cpc),
            cookies_per_second: Some(rates.cps),
            upgrades: None,
            is_vip: None,
            membership: None,
        }
    }

    /// Balance-only update sent after reconciliation raised the balance.
    #[must_use]
    pub fn cookies(balance: f64) -> Self {
        Self {
            cookies: Some(balance),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn upgrades(counts: &HashMap<String, u32>) -> Self {
        Self {
            upgrades: Some(counts.clone()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn effect(effect: PurchaseEffect) -> Self {
        match effect {
            PurchaseEffect::Vip => Self {
                is_vip: Some(true),
                ..Self::default()
            },
            PurchaseEffect::Membership(tier) => Self {
                membership: Some(tier),
                ..Self::default()
            },
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Overlay the fields present in `newer`.
    pub fn merge(&mut self, newer: Self) {
        self.cookies = newer.cookies.or(self.cookies);
        self.cookies_per_click = newer.cookies_per_click.or(self.cookies_per_click);
        self.cookies_per_second = newer.cookies_per_second.or(self.cookies_per_second);
        self.upgrades = newer.upgrades.or_else(|| self.upgrades.take());
        self.is_vip = newer.is_vip.or(self.is_vip);
        self.membership = newer.membership.or(self.membership);
    }
}

/// Remote persistence collaborator. Implementations talk to the hosted backend.
#[async_trait]
pub trait PlayerStore: Send + Sync {
    /// Fetch the player document, `None` if it does not exist.
    async fn fetch_player(&self, player_id: &str) -> Result<Option<PlayerRecord>, PersistenceError>;

    /// Apply a partial update to the player document.
    async fn update_player(&self, player_id: &str, patch: PlayerPatch)
    -> Result<(), PersistenceError>;

    /// List boosts the backend currently considers active. Callers still filter by expiry.
    async fn list_active_boosts(&self) -> Result<Vec<Boost>, PersistenceError>;
}

#[async_trait]
impl<S: PlayerStore + ?Sized> PlayerStore for Arc<S> {
    async fn fetch_player(&self, player_id: &str) -> Result<Option<PlayerRecord>, PersistenceError> {
        (**self).fetch_player(player_id).await
    }

    async fn update_player(
        &self,
        player_id: &str,
        patch: PlayerPatch,
    ) -> Result<(), PersistenceError> {
        (**self).update_player(player_id, patch).await
    }

    async fn list_active_boosts(&self) -> Result<Vec<Boost>, PersistenceError> {
        (**self).list_active_boosts().await
    }
}

/// In-process backend; clones share state. Reads and writes can be switched
/// to fail for exercising degraded paths.
#[derive(Debug, Clone, Default)]
pub struct MemoryPlayerStore {
    players: Arc<Mutex<HashMap<String, PlayerRecord>>>,
    boosts: Arc<Mutex<Vec<Boost>>>,
    updates: Arc<Mutex<Vec<(String, PlayerPatch)>>>,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryPlayerStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_player(&self, record: PlayerRecord) {
        lock(&self.players).insert(record.id.clone(), record);
    }

    #[must_use]
    pub fn player(&self, player_id: &str) -> Option<PlayerRecord> {
        lock(&self.players).get(player_id).cloned()
    }

    pub fn set_boosts(&self, boosts: Vec<Boost>) {
        *lock(&self.boosts) = boosts;
    }

    /// Every update accepted so far, in arrival order.
    #[must_use]
    pub fn updates(&self) -> Vec<(String, PlayerPatch)> {
        lock(&self.updates).clone()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PlayerStore for MemoryPlayerStore {
    async fn fetch_player(&self, player_id: &str) -> Result<Option<PlayerRecord>, PersistenceError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(PersistenceError::Read("backend unreachable".to_string()));
        }
        Ok(self.player(player_id))
    }

    async fn update_player(
        &self,
        player_id: &str,
        patch: PlayerPatch,
    ) -> Result<(), PersistenceError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PersistenceError::Write("backend unreachable".to_string()));
        }
        {
            let mut players = lock(&self.players);
            let record = players
                .get_mut(player_id)
                .ok_or_else(|| PersistenceError::NotFound(player_id.to_string()))?;
            record.apply_patch(&patch);
        }
        lock(&self.updates).push((player_id.to_string(), patch));
        Ok(())
    }

    async fn list_active_boosts(&self) -> Result<Vec<Boost>, PersistenceError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(PersistenceError::Read("backend unreachable".to_string()));
        }
        Ok(lock(&self.boosts).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_defaults_missing_fields() {
        let record: PlayerRecord = serde_json::from_str(r#"{"id":"p1"}"#).unwrap();
        assert_eq!(record.membership, MembershipTier::Free);
        assert!(record.cookies.abs() < f64::EPSILON);
        assert!(record.upgrades.is_empty());
    }

    #[test]
    fn patch_serializes_only_present_fields() {
        let patch = PlayerPatch::balance(12.5, EffectiveRates { cpc: 3, cps: 7 });
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"cookies": 12.5, "cookies_per_click": 3, "cookies_per_second": 7})
        );
        assert!(PlayerPatch::default().is_empty());
    }

    #[test]
    fn apply_patch_overwrites_selected_fields() {
        let mut record = PlayerRecord::new("p1", "ada");
        record.cookies = 5.0;
        record.apply_patch(&PlayerPatch::effect(PurchaseEffect::Membership(
            MembershipTier::Gold,
        )));
        assert_eq!(record.membership, MembershipTier::Gold);
        assert!((record.cookies - 5.0).abs() < f64::EPSILON);
        record.apply_patch(&PlayerPatch::cookies(9.0));
        assert!((record.cookies - 9.0).abs() < f64::EPSILON);
    }

    #[test]
    fn merge_keeps_older_fields_the_newer_patch_lacks() {
        let counts = HashMap::from([("cursor".to_string(), 2)]);
        let mut patch = PlayerPatch::upgrades(&counts);
        patch.merge(PlayerPatch::effect(PurchaseEffect::Vip));
        patch.merge(PlayerPatch::cookies(40.0));
        assert_eq!(patch.upgrades, Some(counts));
        assert_eq!(patch.is_vip, Some(true));
        assert_eq!(patch.cookies, Some(40.0));
        assert_eq!(patch.membership, None);
    }

    #[tokio::test]
    async fn memory_store_records_updates_and_failures() {
        let store = MemoryPlayerStore::new();
        store.insert_player(PlayerRecord::new("p1", "ada"));
        store
            .update_player("p1", PlayerPatch::cookies(4.0))
            .await
            .unwrap();
        assert_eq!(store.updates().len(), 1);
        assert!(matches!(
            store.update_player("ghost", PlayerPatch::cookies(1.0)).await,
            Err(PersistenceError::NotFound(_))
        ));

        store.set_fail_reads(true);
        assert!(store.fetch_player("p1").await.is_err());
        store.set_fail_writes(true);
        assert!(matches!(
            store.update_player("p1", PlayerPatch::cookies(2.0)).await,
            Err(PersistenceError::Write(_))
        ));
        assert_eq!(store.updates().len(), 1);
    }
}
