//! The asset configuration document schema (spec §3) and its validation.
//!
//! Sections are all optional; absence of a section simply means the
//! corresponding fetchers/scoring sub-components do not activate for that
//! asset (spec §3 "Scoring ignores sections that are absent").

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Chain {
    Ethereum,
    Base,
    Arbitrum,
    Optimism,
    Polygon,
    Solana,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LendingProtocol {
    AaveV3,
    CompoundV3,
    Fluid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DexProtocol {
    UniswapV3,
    Curve,
    PancakeswapV3,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorityKind {
    Eoa,
    Multisig,
    DaoVoting,
    ContractUnknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustodyModel {
    Decentralized,
    RegulatedInsured,
    Regulated,
    Unregulated,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlacklistControl {
    None,
    Governance,
    Multisig,
    SingleEntity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenAddress {
    pub chain: Chain,
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LendingConfig {
    pub protocol: LendingProtocol,
    pub chain: Chain,
    pub token_address: String,
    #[serde(default)]
    pub pool: Option<String>,
    #[serde(default)]
    pub data_provider: Option<String>,
    #[serde(default)]
    pub comet: Option<String>,
    #[serde(default)]
    pub market_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DexPool {
    pub protocol: DexProtocol,
    pub chain: Chain,
    pub pool_address: String,
    pub pool_name: String,
    #[serde(default)]
    pub auxiliary: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceFeed {
    pub chain: Chain,
    pub address: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProofOfReserve {
    ChainlinkPor {
        aggregators: Vec<PriceFeed>,
        token_addresses: Vec<TokenAddress>,
    },
    LiquidStaking {
        staked_token_address: String,
    },
    Fractional {
        backing_source: String,
    },
    NavBased {
        oracle: String,
    },
    Scraper {
        url: String,
        parser_hint: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceRisk {
    pub token_price_id: String,
    pub underlying_price_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaoSafeguards {
    #[serde(default)]
    pub has_veto_power: bool,
    #[serde(default)]
    pub has_dual_governance: bool,
    #[serde(default)]
    pub quorum_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceRole {
    pub role_name: String,
    pub authority_kind: AuthorityKind,
    #[serde(default = "default_role_weight")]
    pub role_weight: u32,
    pub address: String,
    #[serde(default)]
    pub threshold: Option<u32>,
    #[serde(default)]
    pub signer_count: Option<u32>,
    #[serde(default)]
    pub dao_safeguards: Option<DaoSafeguards>,
}

fn default_role_weight() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Governance {
    #[serde(default)]
    pub roles: Vec<GovernanceRole>,
    #[serde(default)]
    pub has_timelock: bool,
    #[serde(default)]
    pub timelock_hours: u32,
    pub custody_model: CustodyModel,
    #[serde(default)]
    pub has_blacklist: bool,
    #[serde(default = "default_blacklist_control")]
    pub blacklist_control: BlacklistControl,
}

fn default_blacklist_control() -> BlacklistControl {
    BlacklistControl::None
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Audit {
    pub auditor: String,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub critical_issues_unresolved: u32,
    #[serde(default)]
    pub high_issues_unresolved: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub date: DateTime<Utc>,
    pub funds_lost_usd: f64,
    #[serde(default)]
    pub funds_lost_pct_of_tvl: f64,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditData {
    #[serde(default)]
    pub audits: Vec<Audit>,
    #[serde(default)]
    pub deployment_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub incidents: Vec<Incident>,
}

/// Top-tier auditor allowlist used by `audit_score` (spec §4.9).
pub const TOP_TIER_AUDITORS: &[&str] = &[
    "OpenZeppelin",
    "Trail of Bits",
    "Consensys Diligence",
    "Spearbit",
    "ChainSecurity",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetConfig {
    #[serde(default)]
    pub token_addresses: Vec<TokenAddress>,
    #[serde(default)]
    pub lending_configs: Vec<LendingConfig>,
    #[serde(default)]
    pub dex_pools: Vec<DexPool>,
    #[serde(default)]
    pub price_feeds: Vec<PriceFeed>,
    #[serde(default)]
    pub cross_chain_feeds: Vec<PriceFeed>,
    #[serde(default)]
    pub proof_of_reserve: Option<ProofOfReserve>,
    #[serde(default)]
    pub price_risk: Option<PriceRisk>,
    #[serde(default)]
    pub governance: Option<Governance>,
    #[serde(default)]
    pub audit_data: Option<AuditData>,
}

/// A structural config rejection, naming the offending JSON-pointer-like path.
/// Never retried by callers (spec §7).
#[derive(Debug, Clone)]
pub struct ConfigInvalid {
    pub path: String,
    pub reason: String,
}

impl std::fmt::Display for ConfigInvalid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "config invalid at {}: {}", self.path, self.reason)
    }
}

impl std::error::Error for ConfigInvalid {}

impl AssetConfig {
    /// Normalizes legacy dict-keyed `lending_configs`/`dex_pools` shapes into
    /// the canonical list form before validation, per spec §9's design note.
    /// Accepts either the list form already matching this struct, or a JSON
    /// object keyed by an arbitrary identifier whose values are the same
    /// descriptor shape.
    pub fn from_raw(raw: &Value) -> Result<Self, ConfigInvalid> {
        let mut normalized = raw.clone();
        if let Some(obj) = normalized.as_object_mut() {
            for field in ["lending_configs", "dex_pools"] {
                if let Some(value) = obj.get(field).cloned() {
                    if let Some(dict) = value.as_object() {
                        let list: Vec<Value> = dict.values().cloned().collect();
                        obj.insert(field.to_string(), Value::Array(list));
                    }
                }
            }
        }

        serde_json::from_value(normalized).map_err(|e| ConfigInvalid {
            path: "$".to_string(),
            reason: e.to_string(),
        })
    }

    /// Validates the invariant in spec §3: every `lending_configs[*].chain`
    /// and `dex_pools[*].chain` must correspond to a chain present in
    /// `token_addresses`.
    pub fn validate(&self) -> Result<(), ConfigInvalid> {
        let known_chains: HashSet<Chain> =
            self.token_addresses.iter().map(|t| t.chain).collect();

        for (idx, lc) in self.lending_configs.iter().enumerate() {
            if !known_chains.contains(&lc.chain) {
                return Err(ConfigInvalid {
                    path: format!("$.lending_configs[{idx}].chain"),
                    reason: format!(
                        "chain {:?} has no matching entry in token_addresses",
                        lc.chain
                    ),
                });
            }
        }

        for (idx, pool) in self.dex_pools.iter().enumerate() {
            if !known_chains.contains(&pool.chain) {
                return Err(ConfigInvalid {
                    path: format!("$.dex_pools[{idx}].chain"),
                    reason: format!(
                        "chain {:?} has no matching entry in token_addresses",
                        pool.chain
                    ),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_lending_chain_without_token_address() {
        let raw = json!({
            "token_addresses": [{"chain": "ethereum", "address": "0xabc"}],
            "lending_configs": [{"protocol": "aave_v3", "chain": "base", "token_address": "0xdef"}]
        });
        let cfg = AssetConfig::from_raw(&raw).unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(err.path.contains("lending_configs"));
    }

    #[test]
    fn normalizes_dict_form_lending_configs() {
        let raw = json!({
            "token_addresses": [{"chain": "ethereum", "address": "0xabc"}],
            "lending_configs": {
                "aave": {"protocol": "aave_v3", "chain": "ethereum", "token_address": "0xdef"}
            }
        });
        let cfg = AssetConfig::from_raw(&raw).unwrap();
        assert_eq!(cfg.lending_configs.len(), 1);
        cfg.validate().unwrap();
    }
}
