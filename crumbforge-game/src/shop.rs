//! Premium shop: membership tiers, VIP status and the effects purchases apply.
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use thiserror::Error;

use crate::state::EconomyError;

const DEFAULT_SHOP_DATA: &str = include_str!("../assets/data/shop.json");

/// Membership tiers in upgrade order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MembershipTier {
    #[default]
    Free,
    Bronze,
    Silver,
    Gold,
    Diamond,
}

/// What a shop purchase (or a claimed free grant) changes on the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PurchaseEffect {
    Vip,
    Membership(MembershipTier),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Currency {
    /// Settled by an external payment flow; never debits the balance.
    RealMoney,
    Cookies,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShopItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: f64,
    pub currency: Currency,
    pub effect: PurchaseEffect,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Shop {
    pub items: Vec<ShopItem>,
}

impl Shop {
    #[must_use]
    pub fn load_from_static() -> Self {
        serde_json::from_str(DEFAULT_SHOP_DATA).unwrap_or_default()
    }

    #[must_use]
    pub fn find_item(&self, item_id: &str) -> Option<&ShopItem> {
        self.items.iter().find(|item| item.id == item_id)
    }
}

/// The bundled shop listing.
#[must_use]
pub fn default_shop() -> &'static Shop {
    static SHOP: OnceLock<Shop> = OnceLock::new();
    SHOP.get_or_init(Shop::load_from_static)
}

#[derive(Debug, Error, PartialEq)]
pub enum ShopError {
    #[error("{0:?} is already owned")]
    AlreadyOwned(PurchaseEffect),
    #[error("membership {requested:?} is not an upgrade over {current:?}")]
    TierNotUpgrade {
        current: MembershipTier,
        requested: MembershipTier,
    },
    #[error("free grant {0} has expired")]
    GrantExpired(String),
    #[error("no free grant with id {0}")]
    UnknownBoost(String),
    #[error(transparent)]
    Economy(#[from] EconomyError),
}

/// Premium status carried on the player record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShopProfile {
    #[serde(default)]
    pub is_vip: bool,
    #[serde(default)]
    pub membership: MembershipTier,
}

impl ShopProfile {
    #[must_use]
    pub fn owns(&self, effect: PurchaseEffect) -> bool {
        match effect {
            PurchaseEffect::Vip => self.is_vip,
            PurchaseEffect::Membership(tier) => self.membership == tier,
        }
    }

    /// Memberships only move upward; VIP is bought once.
    #[must_use]
    pub fn can_buy(&self, effect: PurchaseEffect) -> bool {
        match effect {
            PurchaseEffect::Vip => !self.is_vip,
            PurchaseEffect::Membership(tier) => tier > self.membership,
        }
    }

    /// Return the profile with `effect` applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the effect is already owned or would downgrade the membership.
    pub fn apply(self, effect: PurchaseEffect) -> Result<Self, ShopError> {
        match effect {
            PurchaseEffect::Vip if self.is_vip => Err(ShopError::AlreadyOwned(effect)),
            PurchaseEffect::Vip => Ok(Self {
                is_vip: true,
                ..self
            }),
            PurchaseEffect::Membership(tier) if tier == self.membership => {
                Err(ShopError::AlreadyOwned(effect))
            }
            PurchaseEffect::Membership(tier) if tier < self.membership => {
                Err(ShopError::TierNotUpgrade {
                    current: self.membership,
                    requested: tier,
                })
            }
            PurchaseEffect::Membership(tier) => Ok(Self {
                membership: tier,
                ..self
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_are_ordered() {
        assert!(MembershipTier::Free < MembershipTier::Bronze);
        assert!(MembershipTier::Gold < MembershipTier::Diamond);
    }

    #[test]
    fn memberships_only_upgrade() {
        let profile = ShopProfile {
            is_vip: false,
            membership: MembershipTier::Silver,
        };
        assert!(!profile.can_buy(PurchaseEffect::Membership(MembershipTier::Bronze)));
        assert!(!profile.can_buy(PurchaseEffect::Membership(MembershipTier::Silver)));
        assert!(profile.can_buy(PurchaseEffect::Membership(MembershipTier::Gold)));

        let err = profile
            .apply(PurchaseEffect::Membership(MembershipTier::Bronze))
            .unwrap_err();
        assert_eq!(
            err,
            ShopError::TierNotUpgrade {
                current: MembershipTier::Silver,
                requested: MembershipTier::Bronze,
            }
        );
        let upgraded = profile
            .apply(PurchaseEffect::Membership(MembershipTier::Diamond))
            .unwrap();
        assert_eq!(upgraded.membership, MembershipTier::Diamond);
        assert!(upgraded.owns(PurchaseEffect::Membership(MembershipTier::Diamond)));
    }

    #[test]
    fn vip_is_bought_once() {
        let profile = ShopProfile::default().apply(PurchaseEffect::Vip).unwrap();
        assert!(profile.owns(PurchaseEffect::Vip));
        assert_eq!(
            profile.apply(PurchaseEffect::Vip),
            Err(ShopError::AlreadyOwned(PurchaseEffect::Vip))
        );
    }

    #[test]
    fn bundled_shop_lists_every_tier() {
        let shop = default_shop();
        assert!(shop.find_item("vip").is_some());
        for tier in ["bronze", "silver", "gold", "diamond"] {
            let item = shop
                .find_item(&format!("{tier}_membership"))
                .expect("membership listed");
            assert!(matches!(item.effect, PurchaseEffect::Membership(_)));
        }
    }

    #[test]
    fn effect_wire_shape_matches_item_type() {
        let json = serde_json::to_string(&PurchaseEffect::Membership(MembershipTier::Gold)).unwrap();
        assert_eq!(json, r#"{"type":"membership","value":"gold"}"#);
        let vip: PurchaseEffect = serde_json::from_str(r#"{"type":"vip"}"#).unwrap();
        assert_eq!(vip, PurchaseEffect::Vip);
    }
}
