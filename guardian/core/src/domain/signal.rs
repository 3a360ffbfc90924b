// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};

/// Budget pacing derived for one entity at one tick.
///
/// The ratio is undefined (`None`) while `target_spend_by_now_micros` is
/// zero — early in the day, or for a zero-budget entity — and downstream
/// policy must treat that as "no signal yet", never as on-pace or zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PacingState {
    pub target_spend_by_now_micros: i64,
    pub actual_spend_micros: i64,
    pub ratio: Option<f64>,
}

impl PacingState {
    pub fn new(target_spend_by_now_micros: i64, actual_spend_micros: i64) -> Self {
        let ratio = if target_spend_by_now_micros > 0 {
            Some(actual_spend_micros as f64 / target_spend_by_now_micros as f64)
        } else {
            None
        };
        Self {
            target_spend_by_now_micros,
            actual_spend_micros,
            ratio,
        }
    }

    /// Whether spend is running ahead of the budget curve by more than
    /// `threshold` (e.g. 1.5 = fifty percent over).
    pub fn is_over_pace(&self, threshold: f64) -> bool {
        self.ratio.map(|r| r > threshold).unwrap_or(false)
    }
}

/// How the profit estimate was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalBasis {
    /// Attributed conversion value minus spend.
    ValueBased,
    /// No value data in the window; cost per conversion measured against the
    /// configured breakeven cost instead.
    CostProxy,
}

/// Sample-size confidence of a profitability signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Below the click threshold. May justify soft actions (re-pace) only.
    Low,
    Sufficient,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Sufficient => "sufficient",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Confidence::Low),
            "sufficient" => Some(Confidence::Sufficient),
            _ => None,
        }
    }
}

/// Sign of a profitability signal as seen by the decision engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalVerdict {
    Negative,
    /// No spend and no clicks in the window: no evidence either way.
    Neutral,
    NonNegative,
}

impl SignalVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalVerdict::Negative => "negative",
            SignalVerdict::Neutral => "neutral",
            SignalVerdict::NonNegative => "non_negative",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "negative" => Some(SignalVerdict::Negative),
            "neutral" => Some(SignalVerdict::Neutral),
            "non_negative" => Some(SignalVerdict::NonNegative),
            _ => None,
        }
    }
}

/// Coarse performance tier relative to the configured target and maximum
/// cost per conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PerformanceRating {
    Excellent,
    Good,
    Acceptable,
    Poor,
    Terrible,
}

impl PerformanceRating {
    /// Classify windowed performance against target/max cost per conversion.
    ///
    /// With zero conversions the tier depends on how much has been spent and
    /// whether enough clicks accumulated to call the spend wasteful.
    pub fn classify(
        spend_micros: i64,
        conversions: f64,
        clicks: u64,
        target_cost_micros: i64,
        max_cost_micros: i64,
        min_clicks: u64,
    ) -> Self {
        if conversions <= 0.0 {
            if spend_micros > max_cost_micros {
                return PerformanceRating::Terrible;
            }
            if clicks >= min_clicks {
                return PerformanceRating::Poor;
            }
            return PerformanceRating::Acceptable;
        }

        let cost_per_conversion = spend_micros as f64 / conversions;
        let target = target_cost_micros as f64;
        let max = max_cost_micros as f64;

        if cost_per_conversion < target * 0.7 {
            PerformanceRating::Excellent
        } else if cost_per_conversion < target {
            PerformanceRating::Good
        } else if cost_per_conversion < max {
            PerformanceRating::Acceptable
        } else if cost_per_conversion < max * 1.5 {
            PerformanceRating::Poor
        } else {
            PerformanceRating::Terrible
        }
    }
}

/// Profitability estimate for one entity over the trailing window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfitabilitySignal {
    /// Estimated profit over the window: attributed value minus spend, or the
    /// breakeven-relative proxy when no value data exists. Negative means the
    /// entity is losing money.
    pub window_profit_micros: i64,
    pub window_spend_micros: i64,
    pub basis: SignalBasis,
    pub confidence: Confidence,
    pub clicks: u64,
    pub rating: PerformanceRating,
}

impl ProfitabilitySignal {
    pub fn verdict(&self) -> SignalVerdict {
        if self.window_spend_micros == 0 && self.clicks == 0 {
            SignalVerdict::Neutral
        } else if self.window_profit_micros < 0 {
            SignalVerdict::Negative
        } else {
            SignalVerdict::NonNegative
        }
    }
}
