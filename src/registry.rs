//! C2: Asset Registry (spec §4.2).

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{
    config_doc::{AssetConfig, ConfigInvalid},
    db::Database,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Wrapped,
    LiquidStaking,
    Stablecoin,
    Other,
}

impl AssetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wrapped => "wrapped",
            Self::LiquidStaking => "liquid_staking",
            Self::Stablecoin => "stablecoin",
            Self::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "wrapped" => Self::Wrapped,
            "liquid_staking" => Self::LiquidStaking,
            "stablecoin" => Self::Stablecoin,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Asset {
    pub symbol: String,
    pub name: String,
    pub asset_type: AssetType,
    pub config: AssetConfig,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Serializes concurrent `upsert` calls per symbol (spec §4.2) via a striped
/// map of per-symbol mutexes, grounded in the teacher's keyed rate-limiter
/// entry pattern (`security::RateLimiter`, `newsletter::IpRateLimiter`).
#[derive(Clone)]
pub struct Registry {
    db: Database,
    symbol_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl Registry {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            symbol_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn lock_for(&self, symbol: &str) -> Arc<Mutex<()>> {
        let mut locks = self.symbol_locks.lock().await;
        locks
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Validates the config against the schema in spec §3 before accepting;
    /// on validation failure, fails with `ConfigInvalid` naming the
    /// offending path — never persists a partially-valid document.
    pub async fn upsert(
        &self,
        symbol: &str,
        name: &str,
        asset_type: AssetType,
        raw_config: &serde_json::Value,
        enabled: bool,
    ) -> anyhow::Result<Asset> {
        let symbol_lock = self.lock_for(symbol).await;
        let _guard = symbol_lock.lock().await;

        let config = AssetConfig::from_raw(raw_config)?;
        config.validate()?;

        let normalized = serde_json::to_value(&config).map_err(|e| ConfigInvalid {
            path: "$".to_string(),
            reason: e.to_string(),
        })?;

        let row = self
            .db
            .registry_upsert(symbol, name, asset_type.as_str(), &normalized, enabled)
            .await?;

        Ok(Asset {
            symbol: row.symbol,
            name: row.name,
            asset_type: AssetType::from_str(&row.asset_type),
            config,
            enabled: row.enabled,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    pub async fn get(&self, symbol: &str) -> anyhow::Result<Option<Asset>> {
        let Some(row) = self.db.registry_get(symbol).await? else {
            return Ok(None);
        };
        Self::row_to_asset(row)
    }

    pub async fn list_enabled(&self) -> anyhow::Result<Vec<Asset>> {
        let rows = self.db.registry_list_enabled().await?;
        rows.into_iter().map(Self::row_to_asset).collect()
    }

    pub async fn disable(&self, symbol: &str) -> anyhow::Result<bool> {
        self.db.registry_disable(symbol).await
    }

    fn row_to_asset(row: crate::db::AssetRow) -> anyhow::Result<Asset> {
        let config = AssetConfig::from_raw(&row.config)?;
        Ok(Asset {
            symbol: row.symbol,
            name: row.name,
            asset_type: AssetType::from_str(&row.asset_type),
            config,
            enabled: row.enabled,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_type_round_trips() {
        for t in [
            AssetType::Wrapped,
            AssetType::LiquidStaking,
            AssetType::Stablecoin,
            AssetType::Other,
        ] {
            assert_eq!(AssetType::from_str(t.as_str()).as_str(), t.as_str());
        }
    }
}
