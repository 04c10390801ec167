//! C10: Circuit-Breaker & Grade Aggregator (spec §4.10).
//!
//! Breakers are evaluated in the fixed order spec §4.10 lists them in, each
//! contributing either a cap or a multiplier. Caps and multipliers combine
//! by taking `min(lowest_cap, multiplier_applied_score)` — multipliers
//! compound (a score below both the 25 and 40 category thresholds takes
//! both the ×0.5 and ×0.7 hits) rather than the strongest one winning,
//! per the literal "apply breakers in order" reading.
//!
//! Two of the six breaker rows key off primary-check failures ("Active
//! security incident" off check #3, "No audit ever" off check #1). Spec
//! §4.8/§7 also says any primary check failure fully disqualifies an asset
//! from category scoring before this stage ever runs, so in the normal
//! pipeline those two rows can never actually fire — `aggregate` still
//! implements them against whatever `PrimaryCheckResult` it's given so the
//! rule is exercised and testable on its own, see DESIGN.md.

use serde::{Deserialize, Serialize};

use crate::{
    config_doc::AssetConfig,
    scoring::{categories::CategoryResult, primary::PrimaryCheckResult},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Grade {
    F,
    D,
    C,
    B,
    A,
}

impl Grade {
    pub fn for_score(score: f64) -> Self {
        if score >= 85.0 {
            Grade::A
        } else if score >= 70.0 {
            Grade::B
        } else if score >= 55.0 {
            Grade::C
        } else if score >= 40.0 {
            Grade::D
        } else {
            Grade::F
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggeredBreaker {
    pub name: &'static str,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeResult {
    pub raw_score: f64,
    pub final_score: f64,
    pub grade: Grade,
    pub triggered: Vec<TriggeredBreaker>,
}

fn category_weighted_sum(categories: &[CategoryResult]) -> f64 {
    let total: f64 = categories.iter().map(|c| c.weight * c.score).sum();
    (total / 100.0).clamp(0.0, 100.0)
}

pub fn aggregate(
    categories: &[CategoryResult],
    config: &AssetConfig,
    primary: &PrimaryCheckResult,
) -> GradeResult {
    let raw_score = category_weighted_sum(categories);

    let mut caps: Vec<f64> = Vec::new();
    let mut multiplier = 1.0;
    let mut triggered = Vec::new();

    if let Some(governance) = config.governance.as_ref() {
        if let Some(role) = governance
            .roles
            .iter()
            .find(|r| r.role_weight >= 4 && r.authority_kind == crate::config_doc::AuthorityKind::Eoa)
        {
            caps.push(54.0);
            triggered.push(TriggeredBreaker {
                name: "critical_admin_eoa",
                detail: format!("role '{}' is an EOA with role_weight {}", role.role_name, role.role_weight),
            });
        }
    }

    if primary
        .checks
        .iter()
        .any(|c| c.id == "no_active_security_incident" && c.status == crate::scoring::primary::CheckStatus::Fail)
    {
        caps.push(39.0);
        triggered.push(TriggeredBreaker {
            name: "active_security_incident",
            detail: "primary check 'no_active_security_incident' failed".to_string(),
        });
    }

    if primary
        .checks
        .iter()
        .any(|c| c.id == "has_security_audit" && c.status == crate::scoring::primary::CheckStatus::Fail)
    {
        caps.push(54.0);
        triggered.push(TriggeredBreaker {
            name: "no_audit_ever",
            detail: "primary check 'has_security_audit' failed".to_string(),
        });
    }

    if let Some(category) = categories.iter().find(|c| c.score < 25.0) {
        multiplier *= 0.5;
        triggered.push(TriggeredBreaker {
            name: "category_below_25",
            detail: format!("category '{}' scored {:.1}", category.name, category.score),
        });
    }

    if let Some(category) = categories.iter().find(|c| c.score < 40.0) {
        multiplier *= 0.7;
        triggered.push(TriggeredBreaker {
            name: "category_below_40",
            detail: format!("category '{}' scored {:.1}", category.name, category.score),
        });
    }

    let multiplier_applied = raw_score * multiplier;
    let cap = caps.into_iter().fold(f64::INFINITY, f64::min);
    let final_score = multiplier_applied.min(cap).clamp(0.0, 100.0);

    GradeResult {
        raw_score,
        final_score,
        grade: Grade::for_score(final_score),
        triggered,
    }
}

/// `por_ratio < 1.0` reads the raw metric value, which is only available
/// where the metric snapshot is in scope — called from `scoring::mod`
/// alongside `aggregate` and folded into the same `GradeResult`.
pub fn reserve_undercollateralized(por_ratio: Option<f64>) -> Option<TriggeredBreaker> {
    match por_ratio {
        Some(ratio) if ratio < 1.0 => Some(TriggeredBreaker {
            name: "reserve_undercollateralized",
            detail: format!("por_ratio {ratio:.4} is below 1.0"),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cat(name: &'static str, weight: f64, score: f64) -> CategoryResult {
        CategoryResult {
            name,
            weight,
            score,
            sub_scores: vec![],
        }
    }

    fn passing_primary() -> PrimaryCheckResult {
        use crate::scoring::primary::{CheckStatus, PrimaryCheck};
        PrimaryCheckResult {
            qualified: true,
            checks: vec![
                PrimaryCheck {
                    id: "has_security_audit",
                    status: CheckStatus::Pass,
                    reason: String::new(),
                },
                PrimaryCheck {
                    id: "no_critical_audit_issues",
                    status: CheckStatus::Pass,
                    reason: String::new(),
                },
                PrimaryCheck {
                    id: "no_active_security_incident",
                    status: CheckStatus::Pass,
                    reason: String::new(),
                },
            ],
        }
    }

    #[test]
    fn grade_bands_partition_without_gap_or_overlap() {
        assert_eq!(Grade::for_score(0.0), Grade::F);
        assert_eq!(Grade::for_score(39.99), Grade::F);
        assert_eq!(Grade::for_score(40.0), Grade::D);
        assert_eq!(Grade::for_score(54.99), Grade::D);
        assert_eq!(Grade::for_score(55.0), Grade::C);
        assert_eq!(Grade::for_score(69.99), Grade::C);
        assert_eq!(Grade::for_score(70.0), Grade::B);
        assert_eq!(Grade::for_score(84.99), Grade::B);
        assert_eq!(Grade::for_score(85.0), Grade::A);
        assert_eq!(Grade::for_score(100.0), Grade::A);
    }

    #[test]
    fn no_breakers_preserves_raw_score() {
        let categories = vec![
            cat("smart_contract", 10.0, 90.0),
            cat("counterparty", 25.0, 90.0),
            cat("market", 15.0, 90.0),
            cat("liquidity", 15.0, 90.0),
            cat("collateral", 10.0, 90.0),
            cat("reserve_and_oracle", 25.0, 90.0),
        ];
        let config = AssetConfig::default();
        let result = aggregate(&categories, &config, &passing_primary());
        assert!((result.raw_score - 90.0).abs() < 1e-9);
        assert!((result.final_score - 90.0).abs() < 1e-9);
        assert!(result.triggered.is_empty());
        assert_eq!(result.grade, Grade::A);
    }

    #[test]
    fn low_category_multiplies_score_down() {
        let categories = vec![
            cat("smart_contract", 10.0, 90.0),
            cat("counterparty", 25.0, 90.0),
            cat("market", 15.0, 90.0),
            cat("liquidity", 15.0, 20.0),
            cat("collateral", 10.0, 90.0),
            cat("reserve_and_oracle", 25.0, 90.0),
        ];
        let config = AssetConfig::default();
        let result = aggregate(&categories, &config, &passing_primary());
        assert_eq!(result.triggered.len(), 2, "expected both the <25 and <40 breakers to fire");
        assert!(result.final_score < result.raw_score * 0.36);
    }

    #[test]
    fn critical_admin_eoa_caps_at_54() {
        use crate::config_doc::{AuthorityKind, CustodyModel, Governance, GovernanceRole};
        let categories = vec![
            cat("smart_contract", 10.0, 100.0),
            cat("counterparty", 25.0, 100.0),
            cat("market", 15.0, 100.0),
            cat("liquidity", 15.0, 100.0),
            cat("collateral", 10.0, 100.0),
            cat("reserve_and_oracle", 25.0, 100.0),
        ];
        let mut config = AssetConfig::default();
        config.governance = Some(Governance {
            roles: vec![GovernanceRole {
                role_name: "owner".to_string(),
                authority_kind: AuthorityKind::Eoa,
                role_weight: 5,
                address: "0xabc".to_string(),
                threshold: None,
                signer_count: None,
                dao_safeguards: None,
            }],
            has_timelock: false,
            timelock_hours: 0,
            custody_model: CustodyModel::Unknown,
            has_blacklist: false,
            blacklist_control: crate::config_doc::BlacklistControl::None,
        });
        let result = aggregate(&categories, &config, &passing_primary());
        assert!((result.final_score - 54.0).abs() < 1e-9);
        assert_eq!(result.grade, Grade::D);
    }
}
