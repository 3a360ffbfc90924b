// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::entity::{CampaignId, EntityId, EntityLifecycleState};
use crate::domain::signal::{Confidence, SignalVerdict};

/// Identifier of one scheduler tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TickId(pub Uuid);

impl TickId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TickId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TickId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Action the guardian intends for an entity this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionIntent {
    None,
    Pause,
    Resume,
    /// Advisory: spend is running ahead of the budget curve. Recorded and
    /// alerted, no platform mutation.
    Repace,
}

impl ActionIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionIntent::None => "NONE",
            ActionIntent::Pause => "PAUSE",
            ActionIntent::Resume => "RESUME",
            ActionIntent::Repace => "REPACE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NONE" => Some(ActionIntent::None),
            "PAUSE" => Some(ActionIntent::Pause),
            "RESUME" => Some(ActionIntent::Resume),
            "REPACE" => Some(ActionIntent::Repace),
            _ => None,
        }
    }

    /// Whether this intent requires a platform status mutation.
    pub fn mutates_platform(&self) -> bool {
        matches!(self, ActionIntent::Pause | ActionIntent::Resume)
    }
}

/// Why a decision was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// Negative profitability for the hysteresis streak.
    ConsecutiveNegative,
    /// Profitability back to non-negative for the hysteresis streak.
    ProfitRecovered,
    /// Campaign-wide capital-loss halt asserted.
    CircuitHalt,
    /// Campaign-wide halt cleared.
    CircuitCleared,
    /// Spend running ahead of the budget curve.
    OverPace,
    /// Metrics could not be fetched this tick.
    StaleMetrics,
    /// Operator holds the entity; automation skipped.
    ManualHold,
    /// Negative signal but not enough clicks to act on it.
    LowConfidence,
    /// Paused, waiting for the recovery streak to build.
    AwaitingRecovery,
    /// Nothing to do.
    WithinLimits,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::ConsecutiveNegative => "consecutive_negative",
            ReasonCode::ProfitRecovered => "profit_recovered",
            ReasonCode::CircuitHalt => "circuit_halt",
            ReasonCode::CircuitCleared => "circuit_cleared",
            ReasonCode::OverPace => "over_pace",
            ReasonCode::StaleMetrics => "stale_metrics",
            ReasonCode::ManualHold => "manual_hold",
            ReasonCode::LowConfidence => "low_confidence",
            ReasonCode::AwaitingRecovery => "awaiting_recovery",
            ReasonCode::WithinLimits => "within_limits",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "consecutive_negative" => Some(ReasonCode::ConsecutiveNegative),
            "profit_recovered" => Some(ReasonCode::ProfitRecovered),
            "circuit_halt" => Some(ReasonCode::CircuitHalt),
            "circuit_cleared" => Some(ReasonCode::CircuitCleared),
            "over_pace" => Some(ReasonCode::OverPace),
            "stale_metrics" => Some(ReasonCode::StaleMetrics),
            "manual_hold" => Some(ReasonCode::ManualHold),
            "low_confidence" => Some(ReasonCode::LowConfidence),
            "awaiting_recovery" => Some(ReasonCode::AwaitingRecovery),
            "within_limits" => Some(ReasonCode::WithinLimits),
            _ => None,
        }
    }
}

/// Outcome of applying a decision against the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyStatus {
    /// The intent needed no platform mutation.
    NotRequired,
    Applied,
    /// Retries exhausted; stored lifecycle state was left unchanged so the
    /// next tick retries the transition from scratch.
    Failed,
}

impl ApplyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplyStatus::NotRequired => "not_required",
            ApplyStatus::Applied => "applied",
            ApplyStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_required" => Some(ApplyStatus::NotRequired),
            "applied" => Some(ApplyStatus::Applied),
            "failed" => Some(ApplyStatus::Failed),
            _ => None,
        }
    }
}

/// One decision record per entity per tick, including NONE decisions, so the
/// audit trail is complete and hysteresis streaks can be recomputed from
/// history alone. Append-only; the latest record per entity is authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardianDecision {
    pub entity_id: EntityId,
    pub campaign_id: CampaignId,
    pub tick_id: TickId,
    pub tick_at: DateTime<Utc>,
    pub intent: ActionIntent,
    pub reason: ReasonCode,
    /// Signal sign this tick; `None` when metrics were stale.
    pub verdict: Option<SignalVerdict>,
    pub pacing_ratio: Option<f64>,
    pub window_profit_micros: Option<i64>,
    pub confidence: Option<Confidence>,
    /// Lifecycle state after this decision (unchanged when apply failed).
    pub resulting_state: EntityLifecycleState,
    pub apply_status: ApplyStatus,
}

/// Terminal status of one tick attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickStatus {
    Completed,
    /// Previous tick still in flight, or guardian disabled.
    Skipped,
    /// Catastrophic failure; nothing was committed for this tick.
    Aborted,
}

impl TickStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TickStatus::Completed => "completed",
            TickStatus::Skipped => "skipped",
            TickStatus::Aborted => "aborted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(TickStatus::Completed),
            "skipped" => Some(TickStatus::Skipped),
            "aborted" => Some(TickStatus::Aborted),
            _ => None,
        }
    }
}

/// Why a tick ended the way it did, persisted for every tick attempt so an
/// operator can reconstruct why an entity was or was not acted upon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickOutcome {
    pub tick_id: TickId,
    pub at: DateTime<Utc>,
    pub status: TickStatus,
    pub detail: String,
    pub decisions: u32,
}

impl TickOutcome {
    pub fn completed(tick_id: TickId, at: DateTime<Utc>, decisions: u32) -> Self {
        Self {
            tick_id,
            at,
            status: TickStatus::Completed,
            detail: String::new(),
            decisions,
        }
    }

    pub fn skipped(at: DateTime<Utc>, detail: impl Into<String>) -> Self {
        Self {
            tick_id: TickId::new(),
            at,
            status: TickStatus::Skipped,
            detail: detail.into(),
            decisions: 0,
        }
    }

    pub fn aborted(tick_id: TickId, at: DateTime<Utc>, detail: impl Into<String>) -> Self {
        Self {
            tick_id,
            at,
            status: TickStatus::Aborted,
            detail: detail.into(),
            decisions: 0,
        }
    }
}
