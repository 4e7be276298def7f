//! Time-bounded boosts and the active-set evaluator.
//!
//! Boosts expire on their own: there is no expiry event, so callers re-run
//! [`active`] on every tick and every rate read.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;

use crate::shop::PurchaseEffect;

/// What a boost does while it is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoostKind {
    /// Multiplies base click value by the boost factor.
    ClickMultiplier,
    /// Multiplies base passive generation by the boost factor.
    CpsMultiplier,
    /// Adds the boost factor to every click after multipliers.
    BonusCookies,
    /// A limited-time offer to claim a shop effect for free. Never touches rates.
    FreeGrant(PurchaseEffect),
}

/// A boost record as the backend stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BoostRecord", into = "BoostRecord")]
pub struct Boost {
    pub id: String,
    pub name: String,
    pub kind: BoostKind,
    pub factor: f64,
    pub expires_at: DateTime<Utc>,
}

impl Boost {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        kind: BoostKind,
        factor: f64,
        expires_at: DateTime<Utc>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind,
            factor,
            expires_at,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// A boost is active strictly before its expiry instant. No grace period.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum BoostType {
    ClickMultiplier,
    CpsMultiplier,
    BonusCookies,
    FreeGrant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BoostRecord {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    kind: BoostType,
    #[serde(default = "default_multiplier")]
    multiplier: f64,
    expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    grant: Option<PurchaseEffect>,
}

const fn default_multiplier() -> f64 {
    1.0
}

/// Errors raised while decoding a boost record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BoostDecodeError {
    #[error("free_grant boost {0} is missing its grant")]
    MissingGrant(String),
    #[error("boost {0} has a non-finite multiplier")]
    NonFiniteFactor(String),
}

impl TryFrom<BoostRecord> for Boost {
    type Error = BoostDecodeError;

    fn try_from(record: BoostRecord) -> Result<Self, Self::Error> {
        if !record.multiplier.is_finite() {
            return Err(BoostDecodeError::NonFiniteFactor(record.id));
        }
        let kind = match record.kind {
            BoostType::ClickMultiplier => BoostKind::ClickMultiplier,
            BoostType::CpsMultiplier => BoostKind::CpsMultiplier,
            BoostType::BonusCookies => BoostKind::BonusCookies,
            BoostType::FreeGrant => match record.grant {
                Some(effect) => BoostKind::FreeGrant(effect),
                None => return Err(BoostDecodeError::MissingGrant(record.id)),
            },
        };
        Ok(Self {
            id: record.id,
            name: record.name,
            kind,
            factor: record.multiplier,
            expires_at: record.expires_at,
        })
    }
}

impl From<Boost> for BoostRecord {
    fn from(boost: Boost) -> Self {
        let (kind, grant) = match boost.kind {
            BoostKind::ClickMultiplier => (BoostType::ClickMultiplier, None),
            BoostKind::CpsMultiplier => (BoostType::CpsMultiplier, None),
            BoostKind::BonusCookies => (BoostType::BonusCookies, None),
            BoostKind::FreeGrant(effect) => (BoostType::FreeGrant, Some(effect)),
        };
        Self {
            id: boost.id,
            name: boost.name,
            kind,
            multiplier: boost.factor,
            expires_at: boost.expires_at,
            grant,
        }
    }
}

/// The boosts in force at one instant, folded into rate factors.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveBoostSet {
    pub click_multiplier: f64,
    pub cps_multiplier: f64,
    pub bonus_flat: f64,
    pub boosts: SmallVec<[Boost; 4]>,
}

impl Default for ActiveBoostSet {
    fn default() -> Self {
        Self {
            click_multiplier: 1.0,
            cps_multiplier: 1.0,
            bonus_flat: 0.0,
            boosts: SmallVec::new(),
        }
    }
}

impl ActiveBoostSet {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.boosts.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.boosts.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Boost> {
        self.boosts.iter()
    }

    #[must_use]
    pub fn find(&self, boost_id: &str) -> Option<&Boost> {
        self.boosts.iter().find(|boost| boost.id == boost_id)
    }

    /// Active free-grant offers with the effect each one grants.
    pub fn free_grants(&self) -> impl Iterator<Item = (&Boost, PurchaseEffect)> {
        self.boosts.iter().filter_map(|boost| match boost.kind {
            BoostKind::FreeGrant(effect) => Some((boost, effect)),
            _ => None,
        })
    }

    /// Earliest expiry among the active boosts.
    #[must_use]
    pub fn next_expiry(&self) -> Option<DateTime<Utc>> {
        self.boosts.iter().map(|boost| boost.expires_at).min()
    }
}

/// Select the boosts still in force at `now` and fold them into factors.
///
/// Click and CPS multipliers multiply (empty product is 1); bonus cookies sum
/// (empty sum is 0).
#[must_use]
pub fn active(boosts: &[Boost], now: DateTime<Utc>) -> ActiveBoostSet {
    let mut set = ActiveBoostSet::default();
    for boost in boosts.iter().filter(|boost| boost.is_active(now)) {
        match boost.kind {
            BoostKind::ClickMultiplier => set.click_multiplier *= boost.factor,
            BoostKind::CpsMultiplier => set.cps_multiplier *= boost.factor,
            BoostKind::BonusCookies => set.bonus_flat += boost.factor,
            BoostKind::FreeGrant(_) => {}
        }
        set.boosts.push(boost.clone());
    }
    set
}
