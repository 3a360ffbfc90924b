// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Performance evaluation: pacing and profitability signals per entity.
//!
//! Platform counters are day-cumulative, so window totals are reconstructed
//! from the trailing snapshot history by detecting midnight resets (a
//! cumulative spend lower than its predecessor's), and interval deltas are
//! the difference between consecutive snapshots with the same reset rule.

use crate::domain::config::GuardianConfig;
use crate::domain::entity::ManagedEntity;
use crate::domain::metrics::MetricsSnapshot;
use crate::domain::signal::{
    Confidence, PacingState, PerformanceRating, ProfitabilitySignal, SignalBasis,
};

/// Evaluator output for one entity at one tick.
#[derive(Debug, Clone)]
pub struct EntityEvaluation {
    pub pacing: PacingState,
    pub signal: ProfitabilitySignal,
    /// Net loss (spend minus attributed value) since the previous snapshot,
    /// for the capital protector's ledger. Negative when the interval was
    /// profitable.
    pub interval_net_loss_micros: i64,
}

/// Aggregated activity over the trailing window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct WindowTotals {
    spend_micros: i64,
    conversion_value_micros: i64,
    conversions: f64,
    clicks: u64,
}

pub struct PerformanceEvaluator {
    breakeven_cost_micros: i64,
    max_cost_micros: i64,
    min_clicks: u64,
    repace_ratio: f64,
}

impl PerformanceEvaluator {
    pub fn new(config: &GuardianConfig) -> Self {
        Self {
            breakeven_cost_micros: config.breakeven_cost_micros,
            max_cost_micros: config.max_cost_micros,
            min_clicks: config.min_clicks_for_decision,
            repace_ratio: config.repace_ratio,
        }
    }

    pub fn repace_ratio(&self) -> f64 {
        self.repace_ratio
    }

    /// Evaluate one entity from its current snapshot and bounded trailing
    /// history (oldest first, current snapshot not included in `history`).
    pub fn evaluate(
        &self,
        entity: &ManagedEntity,
        current: &MetricsSnapshot,
        history: &[MetricsSnapshot],
    ) -> EntityEvaluation {
        let pacing = self.pacing(entity, current);
        let totals = window_totals(history, current);
        let signal = self.profitability(&totals);
        let interval_net_loss_micros = interval_net_loss(history.last(), current);

        EntityEvaluation {
            pacing,
            signal,
            interval_net_loss_micros,
        }
    }

    fn pacing(&self, entity: &ManagedEntity, current: &MetricsSnapshot) -> PacingState {
        let target =
            (entity.daily_budget_micros as f64 * current.elapsed_day_fraction).round() as i64;
        PacingState::new(target, current.spend_micros)
    }

    fn profitability(&self, totals: &WindowTotals) -> ProfitabilitySignal {
        let (profit, basis) = if totals.conversion_value_micros > 0 {
            (
                totals.conversion_value_micros - totals.spend_micros,
                SignalBasis::ValueBased,
            )
        } else {
            // No value data: measure spend against the breakeven cost of the
            // conversions actually observed (at least one conversion's worth
            // of grace, so unconverted spend below breakeven stays neutral).
            let allowance = (self.breakeven_cost_micros as f64
                * totals.conversions.max(1.0))
            .round() as i64;
            (allowance - totals.spend_micros, SignalBasis::CostProxy)
        };

        let confidence = if totals.clicks >= self.min_clicks {
            Confidence::Sufficient
        } else {
            Confidence::Low
        };

        let rating = PerformanceRating::classify(
            totals.spend_micros,
            totals.conversions,
            totals.clicks,
            self.breakeven_cost_micros,
            self.max_cost_micros,
            self.min_clicks,
        );

        ProfitabilitySignal {
            window_profit_micros: profit,
            window_spend_micros: totals.spend_micros,
            basis,
            confidence,
            clicks: totals.clicks,
            rating,
        }
    }
}

/// Reconstruct window totals from day-cumulative snapshots: the current
/// day's running totals plus the final totals of any earlier days whose
/// reset falls inside the window.
fn window_totals(history: &[MetricsSnapshot], current: &MetricsSnapshot) -> WindowTotals {
    let mut carry = WindowTotals::default();
    let mut prev: Option<&MetricsSnapshot> = None;

    for snap in history.iter().chain(std::iter::once(current)) {
        if let Some(p) = prev {
            if snap.spend_micros < p.spend_micros {
                // Midnight reset: the predecessor was its day's final word.
                carry.spend_micros += p.spend_micros;
                carry.conversion_value_micros += p.conversion_value_micros;
                carry.conversions += p.conversions;
                carry.clicks += p.clicks;
            }
        }
        prev = Some(snap);
    }

    WindowTotals {
        spend_micros: carry.spend_micros + current.spend_micros,
        conversion_value_micros: carry.conversion_value_micros + current.conversion_value_micros,
        conversions: carry.conversions + current.conversions,
        clicks: carry.clicks + current.clicks,
    }
}

/// Net loss accrued between the previous snapshot and the current one.
fn interval_net_loss(previous: Option<&MetricsSnapshot>, current: &MetricsSnapshot) -> i64 {
    let (delta_spend, delta_value) = match previous {
        Some(prev) if current.spend_micros >= prev.spend_micros => (
            current.spend_micros - prev.spend_micros,
            (current.conversion_value_micros - prev.conversion_value_micros).max(0),
        ),
        // First observation, or the counters reset at midnight.
        _ => (current.spend_micros, current.conversion_value_micros),
    };
    delta_spend - delta_value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::GuardianManifest;
    use crate::domain::entity::{CampaignId, EntityId, EntityKind};
    use crate::domain::signal::SignalVerdict;
    use chrono::{TimeZone, Utc};

    fn config() -> GuardianConfig {
        GuardianManifest::from_yaml_str(
            r#"
apiVersion: 100monkeys.ai/v1
kind: ProfitGuardian
metadata:
  name: test
spec:
  platform:
    endpoint: http://localhost:9000
    customer_id: "1"
"#,
        )
        .unwrap()
        .spec
    }

    fn entity(budget_micros: i64) -> ManagedEntity {
        ManagedEntity::new(
            EntityId::new("kw-1"),
            EntityKind::Keyword,
            CampaignId::new("c-1"),
            budget_micros,
        )
    }

    fn snapshot(
        spend_micros: i64,
        value_micros: i64,
        conversions: f64,
        clicks: u64,
        elapsed: f64,
    ) -> MetricsSnapshot {
        MetricsSnapshot {
            entity_id: EntityId::new("kw-1"),
            captured_at: Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap(),
            spend_micros,
            conversions,
            conversion_value_micros: value_micros,
            clicks,
            impressions: clicks * 20,
            elapsed_day_fraction: elapsed,
        }
    }

    #[test]
    fn over_pace_flagged_at_budget_100_half_day_80_spent() {
        let evaluator = PerformanceEvaluator::new(&config());
        let eval = evaluator.evaluate(
            &entity(100_000_000),
            &snapshot(80_000_000, 0, 0.0, 5, 0.5),
            &[],
        );
        let ratio = eval.pacing.ratio.unwrap();
        assert!((ratio - 1.6).abs() < 1e-9);
        assert!(eval.pacing.is_over_pace(evaluator.repace_ratio()));
    }

    #[test]
    fn zero_elapsed_day_produces_no_pacing_signal() {
        let evaluator = PerformanceEvaluator::new(&config());
        let eval = evaluator.evaluate(
            &entity(100_000_000),
            &snapshot(5_000_000, 0, 0.0, 2, 0.0),
            &[],
        );
        assert_eq!(eval.pacing.ratio, None);
        assert!(!eval.pacing.is_over_pace(evaluator.repace_ratio()));
    }

    #[test]
    fn value_based_profit_when_value_attributed() {
        let evaluator = PerformanceEvaluator::new(&config());
        let eval = evaluator.evaluate(
            &entity(100_000_000),
            &snapshot(30_000_000, 90_000_000, 2.0, 40, 0.5),
            &[],
        );
        assert_eq!(eval.signal.basis, SignalBasis::ValueBased);
        assert_eq!(eval.signal.window_profit_micros, 60_000_000);
        assert_eq!(eval.signal.verdict(), SignalVerdict::NonNegative);
    }

    #[test]
    fn proxy_negative_when_spend_exceeds_breakeven_without_conversions() {
        let evaluator = PerformanceEvaluator::new(&config());
        // Breakeven default 45; spend 50 with zero conversions and enough clicks.
        let eval = evaluator.evaluate(
            &entity(100_000_000),
            &snapshot(50_000_000, 0, 0.0, 25, 0.5),
            &[],
        );
        assert_eq!(eval.signal.basis, SignalBasis::CostProxy);
        assert_eq!(eval.signal.verdict(), SignalVerdict::Negative);
        assert_eq!(eval.signal.confidence, Confidence::Sufficient);
    }

    #[test]
    fn proxy_non_negative_below_breakeven() {
        let evaluator = PerformanceEvaluator::new(&config());
        let eval = evaluator.evaluate(
            &entity(100_000_000),
            &snapshot(20_000_000, 0, 0.0, 25, 0.5),
            &[],
        );
        assert_eq!(eval.signal.verdict(), SignalVerdict::NonNegative);
    }

    #[test]
    fn no_activity_is_neutral_not_negative() {
        let evaluator = PerformanceEvaluator::new(&config());
        let eval = evaluator.evaluate(&entity(100_000_000), &snapshot(0, 0, 0.0, 0, 0.5), &[]);
        assert_eq!(eval.signal.verdict(), SignalVerdict::Neutral);
    }

    #[test]
    fn low_click_volume_caps_confidence() {
        let evaluator = PerformanceEvaluator::new(&config());
        let eval = evaluator.evaluate(
            &entity(100_000_000),
            &snapshot(50_000_000, 0, 0.0, 4, 0.5),
            &[],
        );
        assert_eq!(eval.signal.confidence, Confidence::Low);
    }

    #[test]
    fn window_totals_span_midnight_reset() {
        // Yesterday finished at 80 spend / 100 value; today is at 10 / 0.
        let history = vec![
            snapshot(60_000_000, 70_000_000, 1.0, 30, 0.9),
            snapshot(80_000_000, 100_000_000, 2.0, 40, 0.99),
        ];
        let current = snapshot(10_000_000, 0, 0.0, 5, 0.1);
        let totals = window_totals(&history, &current);
        assert_eq!(totals.spend_micros, 90_000_000);
        assert_eq!(totals.conversion_value_micros, 100_000_000);
        assert_eq!(totals.clicks, 45);
    }

    #[test]
    fn cumulative_history_without_reset_uses_latest() {
        let history = vec![snapshot(50_000_000, 0, 0.0, 20, 0.4)];
        let current = snapshot(55_000_000, 0, 0.0, 23, 0.5);
        let totals = window_totals(&history, &current);
        assert_eq!(totals.spend_micros, 55_000_000);
        assert_eq!(totals.clicks, 23);
    }

    #[test]
    fn interval_loss_is_delta_between_snapshots() {
        let prev = snapshot(50_000_000, 10_000_000, 1.0, 20, 0.4);
        let current = snapshot(62_000_000, 10_000_000, 1.0, 24, 0.5);
        assert_eq!(interval_net_loss(Some(&prev), &current), 12_000_000);
    }

    #[test]
    fn interval_loss_handles_midnight_reset() {
        let prev = snapshot(80_000_000, 0, 0.0, 40, 0.99);
        let current = snapshot(5_000_000, 0, 0.0, 2, 0.05);
        assert_eq!(interval_net_loss(Some(&prev), &current), 5_000_000);
    }

    #[test]
    fn profitable_interval_yields_negative_loss() {
        let prev = snapshot(50_000_000, 10_000_000, 1.0, 20, 0.4);
        let current = snapshot(55_000_000, 60_000_000, 2.0, 24, 0.5);
        assert_eq!(interval_net_loss(Some(&prev), &current), -45_000_000);
    }
}
