//! Piecewise-linear anchor tables for the sub-score mappings named in spec
//! §4.9. The spec fully specifies `audit_score`, `code_maturity`,
//! `incident_history`, `admin_key_control`, and the stepwise `peg_deviation`
//! table; it defers the rest to "the tables in the seed document" without
//! reproducing them. The anchors below fill that gap, chosen to stay
//! consistent with the seed alert thresholds in §6 (e.g. the `hhi` sub-score
//! bottoms out near the same 6000 critical-alert value) — see DESIGN.md for
//! the open-question resolution.

/// Interpolates `value` against an ascending-x anchor table `[(x, score)]`.
/// Values outside the end anchors clamp to the nearest end's score.
pub fn interpolate(value: f64, anchors: &[(f64, f64)]) -> f64 {
    assert!(anchors.len() >= 2, "an anchor table needs at least two points");

    if value <= anchors[0].0 {
        return anchors[0].1;
    }
    if value >= anchors[anchors.len() - 1].0 {
        return anchors[anchors.len() - 1].1;
    }

    for window in anchors.windows(2) {
        let (x0, y0) = window[0];
        let (x1, y1) = window[1];
        if value >= x0 && value <= x1 {
            if (x1 - x0).abs() < f64::EPSILON {
                return y1;
            }
            let t = (value - x0) / (x1 - x0);
            return y0 + t * (y1 - y0);
        }
    }

    anchors[anchors.len() - 1].1
}

pub const CODE_MATURITY_DAYS: &[(f64, f64)] = &[
    (0.0, 10.0),
    (30.0, 30.0),
    (90.0, 50.0),
    (180.0, 70.0),
    (365.0, 85.0),
    (730.0, 100.0),
];

/// por_ratio (higher is better) -> proof_of_reserves sub-score.
pub const PROOF_OF_RESERVES: &[(f64, f64)] = &[
    (0.90, 0.0),
    (0.97, 30.0),
    (0.99, 60.0),
    (1.0, 85.0),
    (1.01, 100.0),
];

/// oracle_freshness_minutes (lower is better).
pub const ORACLE_FRESHNESS: &[(f64, f64)] = &[
    (0.0, 100.0),
    (5.0, 95.0),
    (15.0, 80.0),
    (30.0, 60.0),
    (60.0, 20.0),
    (120.0, 0.0),
];

/// cross_chain_oracle_lag_minutes (lower is better).
pub const CROSS_CHAIN_LAG: &[(f64, f64)] = &[
    (0.0, 100.0),
    (5.0, 95.0),
    (15.0, 80.0),
    (30.0, 50.0),
    (60.0, 20.0),
    (120.0, 0.0),
];

/// slippage_100k_pct (lower is better).
pub const SLIPPAGE_100K: &[(f64, f64)] = &[
    (0.0, 100.0),
    (0.2, 95.0),
    (0.5, 85.0),
    (1.0, 70.0),
    (2.0, 50.0),
    (5.0, 20.0),
    (10.0, 0.0),
];

/// slippage_500k_pct (lower is better).
pub const SLIPPAGE_500K: &[(f64, f64)] = &[
    (0.0, 100.0),
    (0.5, 95.0),
    (1.0, 85.0),
    (2.0, 70.0),
    (4.0, 50.0),
    (8.0, 20.0),
    (15.0, 0.0),
];

/// hhi (lower is better, 0-10000 scale) as the liquidity category's sub-score.
pub const LIQUIDITY_HHI: &[(f64, f64)] = &[
    (0.0, 100.0),
    (1000.0, 90.0),
    (2000.0, 75.0),
    (4000.0, 50.0),
    (6000.0, 25.0),
    (8000.0, 10.0),
    (10000.0, 0.0),
];

/// clr_pct (lower is better) as the collateral category's cascade_liquidation sub-score.
pub const CASCADE_LIQUIDATION: &[(f64, f64)] = &[
    (0.0, 100.0),
    (2.0, 90.0),
    (5.0, 75.0),
    (10.0, 50.0),
    (20.0, 20.0),
    (35.0, 0.0),
];

/// rlr_pct (lower is better).
pub const RECURSIVE_LENDING: &[(f64, f64)] = &[
    (0.0, 100.0),
    (5.0, 90.0),
    (10.0, 75.0),
    (20.0, 50.0),
    (35.0, 20.0),
    (50.0, 0.0),
];

/// utilization_rate: non-monotonic — too idle is inefficient but not risky,
/// scored flat near the top of its usable range, falling off sharply past
/// the seed alert thresholds (90/95).
pub const UTILIZATION: &[(f64, f64)] = &[
    (0.0, 90.0),
    (50.0, 100.0),
    (70.0, 90.0),
    (80.0, 75.0),
    (90.0, 50.0),
    (95.0, 20.0),
    (100.0, 0.0),
];

/// volatility_annualized_pct (lower is better).
pub const VOLATILITY: &[(f64, f64)] = &[
    (0.0, 100.0),
    (20.0, 90.0),
    (40.0, 75.0),
    (60.0, 55.0),
    (100.0, 30.0),
    (150.0, 10.0),
    (250.0, 0.0),
];

/// var95_pct (lower is better, daily-return basis).
pub const VAR95: &[(f64, f64)] = &[
    (0.0, 100.0),
    (2.0, 90.0),
    (4.0, 75.0),
    (6.0, 55.0),
    (10.0, 30.0),
    (15.0, 10.0),
    (25.0, 0.0),
];

/// timelock_hours -> timelock_presence sub-score, applied only when
/// `has_timelock` is true (0 otherwise).
pub const TIMELOCK_HOURS: &[(f64, f64)] = &[
    (0.0, 40.0),
    (24.0, 70.0),
    (48.0, 85.0),
    (72.0, 95.0),
    (168.0, 100.0),
];

/// `|peg_deviation_pct|` stepwise mapping from spec §4.9, verbatim: a
/// discrete step function, not a ramp, so it is evaluated directly rather
/// than through `interpolate`.
pub fn peg_deviation_score(abs_deviation_pct: f64) -> f64 {
    if abs_deviation_pct < 0.1 {
        100.0
    } else if abs_deviation_pct < 0.5 {
        90.0
    } else if abs_deviation_pct < 1.0 {
        75.0
    } else if abs_deviation_pct < 2.0 {
        55.0
    } else if abs_deviation_pct < 5.0 {
        30.0
    } else {
        10.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_below_and_above_range() {
        assert_eq!(interpolate(-5.0, CODE_MATURITY_DAYS), 10.0);
        assert_eq!(interpolate(10_000.0, CODE_MATURITY_DAYS), 100.0);
    }

    #[test]
    fn interpolates_midpoint() {
        let score = interpolate(60.0, CODE_MATURITY_DAYS);
        assert!(score > 30.0 && score < 50.0);
    }
}
