//! Upgrade catalog: per-unit click/passive bonuses and the price curve.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::constants::DEFAULT_COST_GROWTH;
use crate::numbers::{ceil_f64_to_u64, u32_to_f64};

const DEFAULT_UPGRADE_DATA: &str = include_str!("../assets/data/upgrades.json");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeCatalogEntry {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub cpc_bonus: f64,
    #[serde(default)]
    pub cps_bonus: f64,
    #[serde(default)]
    pub base_cost: f64,
    #[serde(default = "default_cost_growth")]
    pub cost_growth: f64,
}

const fn default_cost_growth() -> f64 {
    DEFAULT_COST_GROWTH
}

impl UpgradeCatalogEntry {
    /// Price of the next unit when `owned` units are already held.
    #[must_use]
    pub fn price_for(&self, owned: u32) -> u64 {
        let exponent = i32::try_from(owned).unwrap_or(i32::MAX);
        ceil_f64_to_u64(self.base_cost * self.cost_growth.powi(exponent))
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UpgradeCatalog {
    #[serde(default)]
    pub upgrades: Vec<UpgradeCatalogEntry>,
}

impl UpgradeCatalog {
    #[must_use]
    pub fn load_from_static() -> Self {
        serde_json::from_str(DEFAULT_UPGRADE_DATA).unwrap_or_default()
    }

    /// Parse a catalog from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON cannot be parsed into a catalog.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    #[must_use]
    pub fn from_entries(upgrades: Vec<UpgradeCatalogEntry>) -> Self {
        Self { upgrades }
    }

    #[must_use]
    pub fn get(&self, upgrade_id: &str) -> Option<&UpgradeCatalogEntry> {
        self.upgrades.iter().find(|entry| entry.id == upgrade_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &UpgradeCatalogEntry> {
        self.upgrades.iter()
    }

    /// Price of the next unit of `upgrade_id` given current holdings.
    #[must_use]
    pub fn quote(&self, upgrade_id: &str, counts: &HashMap<String, u32>) -> Option<u64> {
        let entry = self.get(upgrade_id)?;
        let owned = counts.get(upgrade_id).copied().unwrap_or(0);
        Some(entry.price_for(owned))
    }

    /// Summed click and passive bonuses for the given holdings. Counts for ids
    /// missing from the catalog contribute nothing.
    #[must_use]
    pub fn bonuses(&self, counts: &HashMap<String, u32>) -> (f64, f64) {
        self.upgrades.iter().fold((0.0, 0.0), |(cpc, cps), entry| {
            let count = u32_to_f64(counts.get(&entry.id).copied().unwrap_or(0));
            (cpc + count * entry.cpc_bonus, cps + count * entry.cps_bonus)
        })
    }
}

/// The bundled upgrade catalog.
#[must_use]
pub fn default_catalog() -> &'static UpgradeCatalog {
    static CATALOG: OnceLock<UpgradeCatalog> = OnceLock::new();
    CATALOG.get_or_init(UpgradeCatalog::load_from_static)
}
