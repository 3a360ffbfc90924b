// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Per-entity decision state machine.
//!
//! States: ACTIVE, GUARDIAN_PAUSED, MANUALLY_PAUSED, CIRCUIT_HALTED.
//! A campaign-wide circuit halt dominates every per-entity condition,
//! including a resume that would otherwise fire the same tick. Pause and
//! resume transitions commit only after the condition has held for the
//! configured number of consecutive ticks, so a single noisy tick never
//! flips an entity. Every entity gets exactly one decision record per tick,
//! NONE included, which keeps the audit trail complete and lets the streak
//! counters be rebuilt from history alone.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::debug;

use crate::application::evaluator::EntityEvaluation;
use crate::domain::decision::{ActionIntent, ApplyStatus, GuardianDecision, ReasonCode, TickId};
use crate::domain::entity::{EntityId, EntityLifecycleState, ManagedEntity};
use crate::domain::signal::{Confidence, SignalVerdict};

/// Protector verdict for one campaign this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HaltDirective {
    /// Halt asserted (or still holding).
    Halt,
    /// Halt no longer asserted.
    #[default]
    Clear,
}

/// Consecutive-tick signal streaks per entity. Rebuildable from decision
/// history: a decision's recorded verdict extends or resets the streaks.
#[derive(Debug, Clone, Default)]
pub struct Streaks {
    negative: HashMap<EntityId, u32>,
    non_negative: HashMap<EntityId, u32>,
}

impl Streaks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild one entity's streaks from its decision history (most recent
    /// first, as the store returns it).
    pub fn seed_from_history(&mut self, id: &EntityId, history: &[GuardianDecision]) {
        let mut negative = 0u32;
        let mut non_negative = 0u32;
        for decision in history {
            match decision.verdict {
                Some(SignalVerdict::Negative) if non_negative == 0 => negative += 1,
                Some(SignalVerdict::NonNegative) | Some(SignalVerdict::Neutral)
                    if negative == 0 =>
                {
                    non_negative += 1
                }
                // Stale ticks carry no verdict and freeze both streaks.
                None => continue,
                _ => break,
            }
        }
        self.negative.insert(id.clone(), negative);
        self.non_negative.insert(id.clone(), non_negative);
    }

    /// Fold this tick's verdict in and return the updated
    /// (negative, non_negative) streak lengths.
    fn observe(&mut self, id: &EntityId, verdict: SignalVerdict) -> (u32, u32) {
        match verdict {
            SignalVerdict::Negative => {
                let n = self.negative.entry(id.clone()).or_insert(0);
                *n += 1;
                self.non_negative.insert(id.clone(), 0);
                (*n, 0)
            }
            SignalVerdict::NonNegative | SignalVerdict::Neutral => {
                let n = self.non_negative.entry(id.clone()).or_insert(0);
                *n += 1;
                self.negative.insert(id.clone(), 0);
                (0, *n)
            }
        }
    }

    pub fn negative_streak(&self, id: &EntityId) -> u32 {
        self.negative.get(id).copied().unwrap_or(0)
    }

    pub fn non_negative_streak(&self, id: &EntityId) -> u32 {
        self.non_negative.get(id).copied().unwrap_or(0)
    }
}

/// Everything the engine needs to decide one entity this tick.
pub struct EngineInput<'a> {
    pub entity: &'a ManagedEntity,
    pub state: EntityLifecycleState,
    /// `None` when metrics were stale this tick.
    pub evaluation: Option<&'a EntityEvaluation>,
    pub halt: HaltDirective,
}

pub struct DecisionEngine {
    hysteresis_ticks: u32,
    repace_ratio: f64,
}

impl DecisionEngine {
    pub fn new(hysteresis_ticks: u32, repace_ratio: f64) -> Self {
        Self {
            hysteresis_ticks,
            repace_ratio,
        }
    }

    /// Decide one entity. Returns the decision record (with `resulting_state`
    /// already set to the post-transition state and `apply_status` pending).
    pub fn decide(
        &self,
        input: EngineInput<'_>,
        streaks: &mut Streaks,
        tick_id: TickId,
        tick_at: DateTime<Utc>,
    ) -> GuardianDecision {
        let id = &input.entity.id;

        // Operator hold: observe, never transition.
        if input.state == EntityLifecycleState::ManuallyPaused {
            if let Some(eval) = input.evaluation {
                streaks.observe(id, eval.signal.verdict());
            }
            return self.record(
                &input,
                ActionIntent::None,
                ReasonCode::ManualHold,
                input.state,
                tick_id,
                tick_at,
            );
        }

        // Stale metrics: hold position, freeze streaks. The campaign halt
        // still dominates; a stale entity is not exempt from it.
        let Some(eval) = input.evaluation else {
            if input.halt == HaltDirective::Halt {
                let intent = if input.state == EntityLifecycleState::Active {
                    ActionIntent::Pause
                } else {
                    ActionIntent::None
                };
                return self.record(
                    &input,
                    intent,
                    ReasonCode::CircuitHalt,
                    EntityLifecycleState::CircuitHalted,
                    tick_id,
                    tick_at,
                );
            }
            return self.record(
                &input,
                ActionIntent::None,
                ReasonCode::StaleMetrics,
                input.state,
                tick_id,
                tick_at,
            );
        };

        let verdict = eval.signal.verdict();
        let (neg_streak, nonneg_streak) = streaks.observe(id, verdict);

        // The circuit halt dominates everything, including a resume whose
        // streak completed this same tick.
        if input.halt == HaltDirective::Halt {
            let intent = if input.state == EntityLifecycleState::Active {
                ActionIntent::Pause
            } else {
                // Already paused on the platform (guardian or circuit).
                ActionIntent::None
            };
            return self.record(
                &input,
                intent,
                ReasonCode::CircuitHalt,
                EntityLifecycleState::CircuitHalted,
                tick_id,
                tick_at,
            );
        }

        match input.state {
            EntityLifecycleState::CircuitHalted => {
                // Halt cleared: back to ACTIVE through one clean
                // re-evaluation; pause/resume logic resumes next tick.
                self.record(
                    &input,
                    ActionIntent::Resume,
                    ReasonCode::CircuitCleared,
                    EntityLifecycleState::Active,
                    tick_id,
                    tick_at,
                )
            }
            EntityLifecycleState::Active => {
                if verdict == SignalVerdict::Negative
                    && eval.signal.confidence == Confidence::Sufficient
                    && neg_streak >= self.hysteresis_ticks
                {
                    debug!(entity = %id, streak = neg_streak, "pausing unprofitable entity");
                    return self.record(
                        &input,
                        ActionIntent::Pause,
                        ReasonCode::ConsecutiveNegative,
                        EntityLifecycleState::GuardianPaused,
                        tick_id,
                        tick_at,
                    );
                }
                if eval.pacing.is_over_pace(self.repace_ratio) {
                    return self.record(
                        &input,
                        ActionIntent::Repace,
                        ReasonCode::OverPace,
                        EntityLifecycleState::Active,
                        tick_id,
                        tick_at,
                    );
                }
                let reason = if verdict == SignalVerdict::Negative
                    && eval.signal.confidence == Confidence::Low
                {
                    ReasonCode::LowConfidence
                } else {
                    ReasonCode::WithinLimits
                };
                self.record(
                    &input,
                    ActionIntent::None,
                    reason,
                    EntityLifecycleState::Active,
                    tick_id,
                    tick_at,
                )
            }
            EntityLifecycleState::GuardianPaused => {
                if verdict != SignalVerdict::Negative && nonneg_streak >= self.hysteresis_ticks {
                    debug!(entity = %id, streak = nonneg_streak, "resuming recovered entity");
                    return self.record(
                        &input,
                        ActionIntent::Resume,
                        ReasonCode::ProfitRecovered,
                        EntityLifecycleState::Active,
                        tick_id,
                        tick_at,
                    );
                }
                self.record(
                    &input,
                    ActionIntent::None,
                    ReasonCode::AwaitingRecovery,
                    EntityLifecycleState::GuardianPaused,
                    tick_id,
                    tick_at,
                )
            }
            EntityLifecycleState::ManuallyPaused => unreachable!("handled above"),
        }
    }

    fn record(
        &self,
        input: &EngineInput<'_>,
        intent: ActionIntent,
        reason: ReasonCode,
        resulting_state: EntityLifecycleState,
        tick_id: TickId,
        tick_at: DateTime<Utc>,
    ) -> GuardianDecision {
        let (verdict, pacing_ratio, profit, confidence) = match input.evaluation {
            Some(eval) => (
                Some(eval.signal.verdict()),
                eval.pacing.ratio,
                Some(eval.signal.window_profit_micros),
                Some(eval.signal.confidence),
            ),
            None => (None, None, None, None),
        };

        GuardianDecision {
            entity_id: input.entity.id.clone(),
            campaign_id: input.entity.campaign_id.clone(),
            tick_id,
            tick_at,
            intent,
            reason,
            verdict,
            pacing_ratio,
            window_profit_micros: profit,
            confidence,
            resulting_state,
            apply_status: ApplyStatus::NotRequired,
        }
    }
}

/// Replay an entity's lifecycle from its decision history alone (oldest
/// first). Failed applications leave the state where it was, which the
/// records already encode in `resulting_state`.
pub fn replay_lifecycle(history: &[GuardianDecision]) -> EntityLifecycleState {
    history
        .last()
        .map(|d| d.resulting_state)
        .unwrap_or(EntityLifecycleState::Active)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::{CampaignId, EntityKind};
    use crate::domain::signal::{
        PacingState, PerformanceRating, ProfitabilitySignal, SignalBasis,
    };

    fn entity() -> ManagedEntity {
        ManagedEntity::new(
            EntityId::new("kw-1"),
            EntityKind::Keyword,
            CampaignId::new("c-1"),
            100_000_000,
        )
    }

    fn evaluation(profit_micros: i64, confidence: Confidence, ratio: f64) -> EntityEvaluation {
        EntityEvaluation {
            pacing: PacingState::new(50_000_000, (50_000_000.0 * ratio) as i64),
            signal: ProfitabilitySignal {
                window_profit_micros: profit_micros,
                window_spend_micros: 50_000_000,
                basis: SignalBasis::CostProxy,
                confidence,
                clicks: 25,
                rating: PerformanceRating::Poor,
            },
            interval_net_loss_micros: profit_micros.min(0).abs(),
        }
    }

    fn engine() -> DecisionEngine {
        DecisionEngine::new(2, 1.5)
    }

    fn decide(
        engine: &DecisionEngine,
        streaks: &mut Streaks,
        state: EntityLifecycleState,
        eval: Option<&EntityEvaluation>,
        halt: HaltDirective,
    ) -> GuardianDecision {
        let e = entity();
        engine.decide(
            EngineInput {
                entity: &e,
                state,
                evaluation: eval,
                halt,
            },
            streaks,
            TickId::new(),
            Utc::now(),
        )
    }

    #[test]
    fn single_negative_tick_does_not_pause() {
        let engine = engine();
        let mut streaks = Streaks::new();
        let eval = evaluation(-10_000_000, Confidence::Sufficient, 1.0);

        let d = decide(
            &engine,
            &mut streaks,
            EntityLifecycleState::Active,
            Some(&eval),
            HaltDirective::Clear,
        );
        assert_eq!(d.resulting_state, EntityLifecycleState::Active);
        assert_eq!(d.intent, ActionIntent::None);
    }

    #[test]
    fn second_consecutive_negative_tick_pauses() {
        let engine = engine();
        let mut streaks = Streaks::new();
        let eval = evaluation(-10_000_000, Confidence::Sufficient, 1.0);

        decide(
            &engine,
            &mut streaks,
            EntityLifecycleState::Active,
            Some(&eval),
            HaltDirective::Clear,
        );
        let d = decide(
            &engine,
            &mut streaks,
            EntityLifecycleState::Active,
            Some(&eval),
            HaltDirective::Clear,
        );
        assert_eq!(d.resulting_state, EntityLifecycleState::GuardianPaused);
        assert_eq!(d.intent, ActionIntent::Pause);
        assert_eq!(d.reason, ReasonCode::ConsecutiveNegative);
    }

    #[test]
    fn non_negative_tick_resets_the_negative_streak() {
        let engine = engine();
        let mut streaks = Streaks::new();
        let bad = evaluation(-10_000_000, Confidence::Sufficient, 1.0);
        let good = evaluation(5_000_000, Confidence::Sufficient, 1.0);

        decide(
            &engine,
            &mut streaks,
            EntityLifecycleState::Active,
            Some(&bad),
            HaltDirective::Clear,
        );
        decide(
            &engine,
            &mut streaks,
            EntityLifecycleState::Active,
            Some(&good),
            HaltDirective::Clear,
        );
        let d = decide(
            &engine,
            &mut streaks,
            EntityLifecycleState::Active,
            Some(&bad),
            HaltDirective::Clear,
        );
        // Streak restarted at 1: still active.
        assert_eq!(d.resulting_state, EntityLifecycleState::Active);
    }

    #[test]
    fn low_confidence_never_pauses() {
        let engine = engine();
        let mut streaks = Streaks::new();
        let eval = evaluation(-10_000_000, Confidence::Low, 1.0);

        for _ in 0..5 {
            let d = decide(
                &engine,
                &mut streaks,
                EntityLifecycleState::Active,
                Some(&eval),
                HaltDirective::Clear,
            );
            assert_eq!(d.resulting_state, EntityLifecycleState::Active);
            assert_ne!(d.intent, ActionIntent::Pause);
        }
    }

    #[test]
    fn low_confidence_still_allows_repace() {
        let engine = engine();
        let mut streaks = Streaks::new();
        let eval = evaluation(-10_000_000, Confidence::Low, 1.6);

        let d = decide(
            &engine,
            &mut streaks,
            EntityLifecycleState::Active,
            Some(&eval),
            HaltDirective::Clear,
        );
        assert_eq!(d.intent, ActionIntent::Repace);
        assert_eq!(d.reason, ReasonCode::OverPace);
        assert_eq!(d.resulting_state, EntityLifecycleState::Active);
    }

    #[test]
    fn paused_entity_resumes_after_recovery_streak() {
        let engine = engine();
        let mut streaks = Streaks::new();
        let good = evaluation(5_000_000, Confidence::Sufficient, 1.0);

        let d1 = decide(
            &engine,
            &mut streaks,
            EntityLifecycleState::GuardianPaused,
            Some(&good),
            HaltDirective::Clear,
        );
        assert_eq!(d1.resulting_state, EntityLifecycleState::GuardianPaused);
        assert_eq!(d1.reason, ReasonCode::AwaitingRecovery);

        let d2 = decide(
            &engine,
            &mut streaks,
            EntityLifecycleState::GuardianPaused,
            Some(&good),
            HaltDirective::Clear,
        );
        assert_eq!(d2.resulting_state, EntityLifecycleState::Active);
        assert_eq!(d2.intent, ActionIntent::Resume);
        assert_eq!(d2.reason, ReasonCode::ProfitRecovered);
    }

    #[test]
    fn halt_wins_over_completed_resume_streak() {
        let engine = engine();
        let mut streaks = Streaks::new();
        let good = evaluation(5_000_000, Confidence::Sufficient, 1.0);

        decide(
            &engine,
            &mut streaks,
            EntityLifecycleState::GuardianPaused,
            Some(&good),
            HaltDirective::Clear,
        );
        // Resume streak is complete, but the campaign halts this tick.
        let d = decide(
            &engine,
            &mut streaks,
            EntityLifecycleState::GuardianPaused,
            Some(&good),
            HaltDirective::Halt,
        );
        assert_eq!(d.resulting_state, EntityLifecycleState::CircuitHalted);
        assert_eq!(d.reason, ReasonCode::CircuitHalt);
        assert_eq!(d.intent, ActionIntent::None);
    }

    #[test]
    fn halt_pauses_active_entity_regardless_of_signal() {
        let engine = engine();
        let mut streaks = Streaks::new();
        let good = evaluation(50_000_000, Confidence::Sufficient, 1.0);

        let d = decide(
            &engine,
            &mut streaks,
            EntityLifecycleState::Active,
            Some(&good),
            HaltDirective::Halt,
        );
        assert_eq!(d.resulting_state, EntityLifecycleState::CircuitHalted);
        assert_eq!(d.intent, ActionIntent::Pause);
    }

    #[test]
    fn cleared_halt_resumes_through_one_clean_tick() {
        let engine = engine();
        let mut streaks = Streaks::new();
        let eval = evaluation(5_000_000, Confidence::Sufficient, 1.0);

        let d = decide(
            &engine,
            &mut streaks,
            EntityLifecycleState::CircuitHalted,
            Some(&eval),
            HaltDirective::Clear,
        );
        assert_eq!(d.resulting_state, EntityLifecycleState::Active);
        assert_eq!(d.intent, ActionIntent::Resume);
        assert_eq!(d.reason, ReasonCode::CircuitCleared);
    }

    #[test]
    fn manually_paused_entity_is_never_auto_resumed() {
        let engine = engine();
        let mut streaks = Streaks::new();
        let good = evaluation(80_000_000, Confidence::Sufficient, 1.0);

        for _ in 0..6 {
            let d = decide(
                &engine,
                &mut streaks,
                EntityLifecycleState::ManuallyPaused,
                Some(&good),
                HaltDirective::Clear,
            );
            assert_eq!(d.resulting_state, EntityLifecycleState::ManuallyPaused);
            assert_eq!(d.intent, ActionIntent::None);
            assert_eq!(d.reason, ReasonCode::ManualHold);
        }
    }

    #[test]
    fn stale_metrics_freeze_state_and_streaks() {
        let engine = engine();
        let mut streaks = Streaks::new();
        let bad = evaluation(-10_000_000, Confidence::Sufficient, 1.0);

        decide(
            &engine,
            &mut streaks,
            EntityLifecycleState::Active,
            Some(&bad),
            HaltDirective::Clear,
        );
        let stale = decide(
            &engine,
            &mut streaks,
            EntityLifecycleState::Active,
            None,
            HaltDirective::Clear,
        );
        assert_eq!(stale.reason, ReasonCode::StaleMetrics);
        assert_eq!(stale.verdict, None);
        assert_eq!(streaks.negative_streak(&EntityId::new("kw-1")), 1);

        // The streak picks up where it left off.
        let d = decide(
            &engine,
            &mut streaks,
            EntityLifecycleState::Active,
            Some(&bad),
            HaltDirective::Clear,
        );
        assert_eq!(d.resulting_state, EntityLifecycleState::GuardianPaused);
    }

    #[test]
    fn stale_entity_is_not_exempt_from_campaign_halt() {
        let engine = engine();
        let mut streaks = Streaks::new();

        let d = decide(
            &engine,
            &mut streaks,
            EntityLifecycleState::Active,
            None,
            HaltDirective::Halt,
        );
        assert_eq!(d.resulting_state, EntityLifecycleState::CircuitHalted);
        assert_eq!(d.intent, ActionIntent::Pause);
        assert_eq!(d.reason, ReasonCode::CircuitHalt);
    }

    #[test]
    fn streaks_rebuild_from_history() {
        let engine = engine();
        let mut live = Streaks::new();
        let bad = evaluation(-10_000_000, Confidence::Sufficient, 1.0);
        let mut history = Vec::new();

        let e = entity();
        for _ in 0..2 {
            let d = engine.decide(
                EngineInput {
                    entity: &e,
                    state: EntityLifecycleState::Active,
                    evaluation: Some(&bad),
                    halt: HaltDirective::Clear,
                },
                &mut live,
                TickId::new(),
                Utc::now(),
            );
            history.push(d);
        }

        // Store returns most-recent-first.
        let mut newest_first = history.clone();
        newest_first.reverse();
        let mut rebuilt = Streaks::new();
        rebuilt.seed_from_history(&e.id, &newest_first);
        assert_eq!(
            rebuilt.negative_streak(&e.id),
            live.negative_streak(&e.id)
        );
    }

    #[test]
    fn replay_of_empty_history_is_active() {
        assert_eq!(replay_lifecycle(&[]), EntityLifecycleState::Active);
    }
}
