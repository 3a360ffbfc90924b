// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! One guardian tick, end to end.
//!
//! Fetch → evaluate → protect → decide → apply → commit. All six stages work
//! on in-memory state and the tick lands in the store as a single batch, so
//! an aborted tick leaves no partial writes and the hysteresis streaks stay
//! consistent with the recorded history. Platform mutations happen before
//! the commit: a failed mutation is recorded as FAILED with the entity's
//! lifecycle left unchanged, and the next tick retries the transition from
//! scratch.

use anyhow::{Context, Result};
use chrono::Utc;
use metrics::{counter, gauge};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::application::applier::{ActionApplier, ActionRequest};
use crate::application::engine::{DecisionEngine, EngineInput, HaltDirective, Streaks};
use crate::application::evaluator::{EntityEvaluation, PerformanceEvaluator};
use crate::application::fetcher::SnapshotFetcher;
use crate::application::protector::CapitalProtector;
use crate::domain::config::GuardianConfig;
use crate::domain::decision::{ActionIntent, ApplyStatus, GuardianDecision, TickId, TickOutcome};
use crate::domain::entity::{CampaignId, EntityId, EntityLifecycleState, ManagedEntity};
use crate::domain::ledger::LossLedger;
use crate::domain::metrics::{MetricsSnapshot, ReportingWindow};
use crate::domain::platform::{AdsPlatform, IdempotencyKey, TargetStatus};
use crate::domain::store::{EntityRegistry, StateStore, TickCommit};
use crate::infrastructure::event_bus::{EventBus, GuardianEvent};

pub struct GuardianService {
    config: GuardianConfig,
    registry: Arc<dyn EntityRegistry>,
    store: Arc<dyn StateStore>,
    fetcher: SnapshotFetcher,
    evaluator: PerformanceEvaluator,
    protector: CapitalProtector,
    engine: DecisionEngine,
    applier: ActionApplier,
    events: EventBus,
    streaks: Mutex<Streaks>,
}

impl GuardianService {
    pub fn new(
        config: GuardianConfig,
        registry: Arc<dyn EntityRegistry>,
        store: Arc<dyn StateStore>,
        platform: Arc<dyn AdsPlatform>,
        events: EventBus,
    ) -> Self {
        let fetcher = SnapshotFetcher::new(Arc::clone(&platform), config.fetcher.clone());
        let evaluator = PerformanceEvaluator::new(&config);
        let protector = CapitalProtector::new(&config);
        let engine = DecisionEngine::new(config.hysteresis_ticks, config.repace_ratio);
        let applier = ActionApplier::new(platform, config.applier.clone(), config.fetcher.concurrency);

        Self {
            config,
            registry,
            store,
            fetcher,
            evaluator,
            protector,
            engine,
            applier,
            events,
            streaks: Mutex::new(Streaks::new()),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Seed hysteresis streaks from persisted decision history. Called once
    /// at startup, before the first tick.
    pub async fn init(&self) -> Result<()> {
        let entities = self
            .registry
            .list_all()
            .await
            .context("failed to list managed entities")?;

        let mut streaks = self.streaks.lock().await;
        for entity in &entities {
            let history = self
                .store
                .decision_history(&entity.id, self.config.history_ticks)
                .await
                .context("failed to load decision history")?;
            streaks.seed_from_history(&entity.id, &history);
        }
        info!(entities = entities.len(), "guardian state loaded");
        Ok(())
    }

    /// Record a skipped tick (guardian disabled, or the previous tick was
    /// still in flight).
    pub async fn record_skip(&self, reason: &str) -> Result<()> {
        let outcome = TickOutcome::skipped(Utc::now(), reason);
        self.store
            .commit_tick(TickCommit::outcome_only(outcome))
            .await
            .context("failed to record skipped tick")?;
        self.events.publish(GuardianEvent::TickSkipped {
            at: Utc::now(),
            reason: reason.to_string(),
        });
        counter!("guardian_ticks_total", "status" => "skipped").increment(1);
        Ok(())
    }

    /// Run one tick. Per-entity failures never abort the tick; tick-wide
    /// failures abort it wholesale with nothing committed.
    pub async fn run_tick(&self) -> Result<TickOutcome> {
        let tick_id = TickId::new();
        let now = Utc::now();
        let window = ReportingWindow::trailing(now, self.config.history_window_chrono());

        let entities = self
            .registry
            .list_all()
            .await
            .context("failed to list managed entities")?;
        gauge!("guardian_entities_managed").set(entities.len() as f64);

        if entities.is_empty() {
            let outcome = TickOutcome::completed(tick_id, now, 0);
            self.store
                .commit_tick(TickCommit::outcome_only(outcome.clone()))
                .await
                .context("failed to commit empty tick")?;
            counter!("guardian_ticks_total", "status" => "completed").increment(1);
            return Ok(outcome);
        }

        let lifecycle = self
            .store
            .load_lifecycle()
            .await
            .context("failed to load lifecycle states")?;

        let ids: Vec<EntityId> = entities.iter().map(|e| e.id.clone()).collect();
        let fetched = self.fetcher.fetch(&ids, &window).await;

        let failed_fetches: Vec<(EntityId, String)> = fetched
            .iter()
            .filter_map(|(id, r)| r.as_ref().err().map(|e| (id.clone(), e.to_string())))
            .collect();

        if failed_fetches.len() == entities.len() {
            // Nothing to evaluate: abort the whole tick, commit only the
            // outcome so the skip is auditable.
            let outcome = TickOutcome::aborted(tick_id, now, "all metrics fetches failed");
            self.store
                .commit_tick(TickCommit::outcome_only(outcome.clone()))
                .await
                .context("failed to record aborted tick")?;
            self.events.publish(GuardianEvent::TickAborted {
                tick_id,
                at: now,
                reason: outcome.detail.clone(),
            });
            counter!("guardian_ticks_total", "status" => "aborted").increment(1);
            warn!(tick = %tick_id, "tick aborted: all metrics fetches failed");
            return Ok(outcome);
        }

        // Evaluate entities with fresh snapshots; the rest are stale this
        // tick and keep their state.
        let mut evaluations: HashMap<EntityId, EntityEvaluation> = HashMap::new();
        let mut new_snapshots: Vec<MetricsSnapshot> = Vec::new();
        for entity in &entities {
            let Some(Ok(snapshot)) = fetched.get(&entity.id) else {
                continue;
            };
            let history = self
                .store
                .snapshot_history(&entity.id, self.config.history_ticks)
                .await
                .context("failed to load snapshot history")?;
            let in_window: Vec<MetricsSnapshot> = history
                .into_iter()
                .filter(|s| s.captured_at >= window.start)
                .collect();
            let evaluation = self.evaluator.evaluate(entity, snapshot, &in_window);
            evaluations.insert(entity.id.clone(), evaluation);
            new_snapshots.push(snapshot.clone());
        }

        // Campaign rollup of this interval's net losses.
        let mut interval_losses: HashMap<CampaignId, i64> = HashMap::new();
        for entity in &entities {
            if let Some(eval) = evaluations.get(&entity.id) {
                *interval_losses
                    .entry(entity.campaign_id.clone())
                    .or_insert(0) += eval.interval_net_loss_micros;
            }
        }

        let ledgers: HashMap<CampaignId, LossLedger> = self
            .store
            .all_ledgers()
            .await
            .context("failed to load loss ledgers")?
            .into_iter()
            .map(|l| (l.campaign_id.clone(), l))
            .collect();

        let halted_campaigns: HashSet<CampaignId> = entities
            .iter()
            .filter(|e| {
                lifecycle.get(&e.id).copied() == Some(EntityLifecycleState::CircuitHalted)
            })
            .map(|e| e.campaign_id.clone())
            .collect();

        let report = self.protector.assess(
            ledgers,
            &interval_losses,
            |campaign| halted_campaigns.contains(campaign),
            now,
        );

        // Decide every entity against a scratch copy of the streaks; the
        // live copy only advances if the tick commits.
        let mut streaks_guard = self.streaks.lock().await;
        let mut scratch = streaks_guard.clone();
        let mut decisions: Vec<GuardianDecision> = Vec::new();
        let mut previous_states: HashMap<EntityId, EntityLifecycleState> = HashMap::new();

        for entity in &entities {
            let state = lifecycle
                .get(&entity.id)
                .copied()
                .unwrap_or(EntityLifecycleState::Active);
            previous_states.insert(entity.id.clone(), state);
            let halt = report
                .directives
                .get(&entity.campaign_id)
                .copied()
                .unwrap_or(HaltDirective::Clear);
            let decision = self.engine.decide(
                EngineInput {
                    entity,
                    state,
                    evaluation: evaluations.get(&entity.id),
                    halt,
                },
                &mut scratch,
                tick_id,
                now,
            );
            decisions.push(decision);
        }

        // Apply the platform mutations for entities that changed state.
        let requests: Vec<ActionRequest> = decisions
            .iter()
            .filter(|d| d.intent.mutates_platform())
            .map(|d| {
                let target = match d.intent {
                    ActionIntent::Pause => TargetStatus::Paused,
                    _ => TargetStatus::Enabled,
                };
                ActionRequest {
                    entity_id: d.entity_id.clone(),
                    target,
                    key: IdempotencyKey::new(d.entity_id.clone(), target, now),
                }
            })
            .collect();
        let apply_results = self.applier.apply_batch(requests).await;

        let mut lifecycle_updates: Vec<(EntityId, EntityLifecycleState)> = Vec::new();
        for decision in &mut decisions {
            if decision.intent.mutates_platform() {
                match apply_results.get(&decision.entity_id) {
                    Some(ApplyStatus::Applied) => {
                        decision.apply_status = ApplyStatus::Applied;
                    }
                    _ => {
                        // Leave the stored state alone so the next tick
                        // retries the transition from scratch.
                        decision.apply_status = ApplyStatus::Failed;
                        if let Some(prev) = previous_states.get(&decision.entity_id) {
                            decision.resulting_state = *prev;
                        }
                    }
                }
            }
            lifecycle_updates.push((decision.entity_id.clone(), decision.resulting_state));
        }

        let outcome = TickOutcome::completed(tick_id, now, decisions.len() as u32);
        let commit = TickCommit {
            outcome: Some(outcome.clone()),
            lifecycle: lifecycle_updates,
            decisions: decisions.clone(),
            ledgers: report.ledgers,
            snapshots: new_snapshots,
        };
        self.store
            .commit_tick(commit)
            .await
            .context("failed to commit tick")?;

        // The tick is durable; advance the live streaks and fan out events.
        *streaks_guard = scratch;
        drop(streaks_guard);

        self.publish_tick_events(&decisions, &failed_fetches, &report.tripped, &halted_campaigns, &report.directives, tick_id, now);

        counter!("guardian_ticks_total", "status" => "completed").increment(1);
        counter!("guardian_decisions_total").increment(decisions.len() as u64);
        info!(
            tick = %tick_id,
            entities = entities.len(),
            decisions = decisions.len(),
            stale = failed_fetches.len(),
            "tick completed"
        );
        Ok(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    fn publish_tick_events(
        &self,
        decisions: &[GuardianDecision],
        failed_fetches: &[(EntityId, String)],
        tripped: &[(CampaignId, i64)],
        previously_halted: &HashSet<CampaignId>,
        directives: &HashMap<CampaignId, HaltDirective>,
        tick_id: TickId,
        now: chrono::DateTime<Utc>,
    ) {
        for (entity_id, error) in failed_fetches {
            self.events.publish(GuardianEvent::EntityStale {
                entity_id: entity_id.clone(),
                at: now,
                error: error.clone(),
            });
        }

        for (campaign_id, loss) in tripped {
            self.events.publish(GuardianEvent::CircuitTripped {
                campaign_id: campaign_id.clone(),
                cumulative_loss_micros: *loss,
                at: now,
            });
            counter!("guardian_circuit_trips_total").increment(1);
        }

        for campaign_id in previously_halted {
            if directives.get(campaign_id) == Some(&HaltDirective::Clear) {
                self.events.publish(GuardianEvent::CircuitCleared {
                    campaign_id: campaign_id.clone(),
                    at: now,
                });
            }
        }

        for decision in decisions {
            match (decision.intent, decision.apply_status) {
                (ActionIntent::Pause, ApplyStatus::Applied) => {
                    self.events.publish(GuardianEvent::EntityPaused {
                        entity_id: decision.entity_id.clone(),
                        reason: decision.reason.as_str().to_string(),
                        at: now,
                    });
                    counter!("guardian_actions_total", "intent" => "pause").increment(1);
                }
                (ActionIntent::Resume, ApplyStatus::Applied) => {
                    self.events.publish(GuardianEvent::EntityResumed {
                        entity_id: decision.entity_id.clone(),
                        at: now,
                    });
                    counter!("guardian_actions_total", "intent" => "resume").increment(1);
                }
                (ActionIntent::Repace, _) => {
                    self.events.publish(GuardianEvent::EntityOverPacing {
                        entity_id: decision.entity_id.clone(),
                        pacing_ratio: decision.pacing_ratio.unwrap_or(0.0),
                        at: now,
                    });
                    counter!("guardian_actions_total", "intent" => "repace").increment(1);
                }
                (intent, ApplyStatus::Failed) => {
                    self.events.publish(GuardianEvent::ActionFailed {
                        entity_id: decision.entity_id.clone(),
                        intent,
                        at: now,
                    });
                    counter!("guardian_actions_failed_total").increment(1);
                }
                _ => {}
            }
        }

        self.events.publish(GuardianEvent::TickCompleted {
            tick_id,
            at: now,
            decisions: decisions.len() as u32,
        });
    }

    /// Latest lifecycle state for one entity, falling back to ACTIVE for
    /// entities that have never been decided.
    pub async fn current_state(&self, id: &EntityId) -> Result<EntityLifecycleState> {
        Ok(self
            .store
            .lifecycle_of(id)
            .await
            .context("failed to load lifecycle state")?
            .unwrap_or(EntityLifecycleState::Active))
    }

    /// Managed-entity roster, for the status surface.
    pub async fn roster(&self) -> Result<Vec<ManagedEntity>> {
        self.registry
            .list_all()
            .await
            .context("failed to list managed entities")
    }
}
