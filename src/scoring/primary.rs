//! C8: Primary-Check Evaluator (spec §4.8).
//!
//! Three binary gates evaluated in a fixed order; any failure disqualifies
//! the asset from category scoring (spec §9: "primary checks run before
//! category scoring, no back-edge").

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config_doc::AuditData;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimaryCheck {
    pub id: &'static str,
    pub status: CheckStatus,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimaryCheckResult {
    pub qualified: bool,
    pub checks: Vec<PrimaryCheck>,
}

const ACTIVE_INCIDENT_WINDOW_DAYS: i64 = 30;

pub fn evaluate(audit_data: Option<&AuditData>, now: DateTime<Utc>) -> PrimaryCheckResult {
    let mut checks = Vec::with_capacity(3);

    let has_audit = audit_data.is_some_and(|a| !a.audits.is_empty());
    checks.push(PrimaryCheck {
        id: "has_security_audit",
        status: if has_audit { CheckStatus::Pass } else { CheckStatus::Fail },
        reason: if has_audit {
            "at least one audit on file".to_string()
        } else {
            "no audits on file".to_string()
        },
    });

    let unresolved_critical = audit_data
        .map(|a| a.audits.iter().filter(|audit| audit.critical_issues_unresolved > 0).count())
        .unwrap_or(0);
    checks.push(PrimaryCheck {
        id: "no_critical_audit_issues",
        status: if unresolved_critical == 0 {
            CheckStatus::Pass
        } else {
            CheckStatus::Fail
        },
        reason: if unresolved_critical == 0 {
            "no unresolved critical audit issues".to_string()
        } else {
            format!("{unresolved_critical} audit(s) with unresolved critical issues")
        },
    });

    let window = Duration::days(ACTIVE_INCIDENT_WINDOW_DAYS);
    let active_incident = audit_data.is_some_and(|a| {
        a.incidents.iter().any(|incident| {
            if incident.funds_lost_usd <= 0.0 {
                return false;
            }
            let reported_recently = now - incident.date <= window;
            if !reported_recently {
                return false;
            }
            match incident.resolved_at {
                None => true,
                Some(resolved_at) => now - resolved_at <= window,
            }
        })
    });
    checks.push(PrimaryCheck {
        id: "no_active_security_incident",
        status: if active_incident { CheckStatus::Fail } else { CheckStatus::Pass },
        reason: if active_incident {
            "an incident with funds lost is active within the last 30 days".to_string()
        } else {
            "no active security incident".to_string()
        },
    });

    let qualified = checks.iter().all(|c| c.status == CheckStatus::Pass);
    PrimaryCheckResult { qualified, checks }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_doc::{Audit, Incident};

    #[test]
    fn empty_audit_data_disqualifies() {
        let result = evaluate(None, Utc::now());
        assert!(!result.qualified);
        assert_eq!(result.checks[0].status, CheckStatus::Fail);
    }

    #[test]
    fn unresolved_critical_issue_disqualifies() {
        let audit_data = AuditData {
            audits: vec![Audit {
                auditor: "OpenZeppelin".to_string(),
                date: Utc::now(),
                critical_issues_unresolved: 1,
                high_issues_unresolved: 0,
            }],
            deployment_date: None,
            incidents: vec![],
        };
        let result = evaluate(Some(&audit_data), Utc::now());
        assert!(!result.qualified);
        assert_eq!(result.checks[1].status, CheckStatus::Fail);
    }

    #[test]
    fn old_resolved_incident_does_not_disqualify() {
        let now = Utc::now();
        let audit_data = AuditData {
            audits: vec![Audit {
                auditor: "Trail of Bits".to_string(),
                date: now - Duration::days(900),
                critical_issues_unresolved: 0,
                high_issues_unresolved: 0,
            }],
            deployment_date: None,
            incidents: vec![Incident {
                date: now - Duration::days(400),
                funds_lost_usd: 10_000.0,
                funds_lost_pct_of_tvl: 1.0,
                resolved_at: Some(now - Duration::days(390)),
            }],
        };
        let result = evaluate(Some(&audit_data), now);
        assert!(result.qualified);
    }

    #[test]
    fn unresolved_recent_incident_disqualifies() {
        let now = Utc::now();
        let audit_data = AuditData {
            audits: vec![Audit {
                auditor: "Trail of Bits".to_string(),
                date: now - Duration::days(900),
                critical_issues_unresolved: 0,
                high_issues_unresolved: 0,
            }],
            deployment_date: None,
            incidents: vec![Incident {
                date: now - Duration::days(10),
                funds_lost_usd: 10_000.0,
                funds_lost_pct_of_tvl: 1.0,
                resolved_at: None,
            }],
        };
        let result = evaluate(Some(&audit_data), now);
        assert!(!result.qualified);
    }
}
