// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository implementations for the contracts in `domain::store`.
//!
//! # Available Implementations
//!
//! - **InMemoryEntityRegistry / InMemoryStateStore** — thread-safe map-backed
//!   storage for development and testing. The state store holds everything
//!   under one lock, so a tick commit is atomic by construction.
//! - **PostgresEntityRegistry / PostgresStateStore** — production persistence
//!   via `sqlx`; the tick commit runs in a single transaction.

pub mod postgres;

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::decision::{GuardianDecision, TickOutcome};
use crate::domain::entity::{CampaignId, EntityId, EntityLifecycleState, ManagedEntity};
use crate::domain::ledger::LossLedger;
use crate::domain::metrics::MetricsSnapshot;
use crate::domain::store::{EntityRegistry, StateStore, StoreError, TickCommit};

pub use postgres::{PostgresEntityRegistry, PostgresStateStore};

#[derive(Clone, Default)]
pub struct InMemoryEntityRegistry {
    entities: Arc<RwLock<HashMap<EntityId, ManagedEntity>>>,
}

impl InMemoryEntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntityRegistry for InMemoryEntityRegistry {
    async fn register(&self, entity: ManagedEntity) -> Result<(), StoreError> {
        self.entities.write().insert(entity.id.clone(), entity);
        Ok(())
    }

    async fn get(&self, id: &EntityId) -> Result<Option<ManagedEntity>, StoreError> {
        Ok(self.entities.read().get(id).cloned())
    }

    async fn list_all(&self) -> Result<Vec<ManagedEntity>, StoreError> {
        let mut entities: Vec<ManagedEntity> = self.entities.read().values().cloned().collect();
        entities.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        Ok(entities)
    }

    async fn set_daily_budget(&self, id: &EntityId, budget_micros: i64) -> Result<(), StoreError> {
        let mut entities = self.entities.write();
        let entity = entities
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("entity {id}")))?;
        entity.daily_budget_micros = budget_micros;
        Ok(())
    }

    async fn remove(&self, id: &EntityId) -> Result<(), StoreError> {
        self.entities.write().remove(id);
        Ok(())
    }
}

#[derive(Default)]
struct StoreInner {
    lifecycle: HashMap<EntityId, EntityLifecycleState>,
    decisions: HashMap<EntityId, Vec<GuardianDecision>>,
    ledgers: HashMap<CampaignId, LossLedger>,
    snapshots: HashMap<EntityId, Vec<MetricsSnapshot>>,
    outcomes: Vec<TickOutcome>,
}

#[derive(Clone, Default)]
pub struct InMemoryStateStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn load_lifecycle(
        &self,
    ) -> Result<HashMap<EntityId, EntityLifecycleState>, StoreError> {
        Ok(self.inner.read().lifecycle.clone())
    }

    async fn commit_tick(&self, commit: TickCommit) -> Result<(), StoreError> {
        // One write lock for the whole batch keeps the commit atomic with
        // respect to concurrent readers.
        let mut inner = self.inner.write();
        for (id, state) in commit.lifecycle {
            inner.lifecycle.insert(id, state);
        }
        for decision in commit.decisions {
            inner
                .decisions
                .entry(decision.entity_id.clone())
                .or_default()
                .push(decision);
        }
        for ledger in commit.ledgers {
            inner.ledgers.insert(ledger.campaign_id.clone(), ledger);
        }
        for snapshot in commit.snapshots {
            inner
                .snapshots
                .entry(snapshot.entity_id.clone())
                .or_default()
                .push(snapshot);
        }
        if let Some(outcome) = commit.outcome {
            inner.outcomes.push(outcome);
        }
        Ok(())
    }

    async fn set_lifecycle(
        &self,
        id: &EntityId,
        state: EntityLifecycleState,
    ) -> Result<(), StoreError> {
        self.inner.write().lifecycle.insert(id.clone(), state);
        Ok(())
    }

    async fn lifecycle_of(
        &self,
        id: &EntityId,
    ) -> Result<Option<EntityLifecycleState>, StoreError> {
        Ok(self.inner.read().lifecycle.get(id).copied())
    }

    async fn latest_decision(
        &self,
        id: &EntityId,
    ) -> Result<Option<GuardianDecision>, StoreError> {
        Ok(self
            .inner
            .read()
            .decisions
            .get(id)
            .and_then(|d| d.last().cloned()))
    }

    async fn decision_history(
        &self,
        id: &EntityId,
        limit: usize,
    ) -> Result<Vec<GuardianDecision>, StoreError> {
        let inner = self.inner.read();
        let Some(decisions) = inner.decisions.get(id) else {
            return Ok(Vec::new());
        };
        Ok(decisions.iter().rev().take(limit).cloned().collect())
    }

    async fn loss_ledger(
        &self,
        campaign_id: &CampaignId,
    ) -> Result<Option<LossLedger>, StoreError> {
        Ok(self.inner.read().ledgers.get(campaign_id).cloned())
    }

    async fn all_ledgers(&self) -> Result<Vec<LossLedger>, StoreError> {
        Ok(self.inner.read().ledgers.values().cloned().collect())
    }

    async fn snapshot_history(
        &self,
        id: &EntityId,
        limit: usize,
    ) -> Result<Vec<MetricsSnapshot>, StoreError> {
        let inner = self.inner.read();
        let Some(snapshots) = inner.snapshots.get(id) else {
            return Ok(Vec::new());
        };
        let skip = snapshots.len().saturating_sub(limit);
        Ok(snapshots.iter().skip(skip).cloned().collect())
    }

    async fn recent_outcomes(&self, limit: usize) -> Result<Vec<TickOutcome>, StoreError> {
        let inner = self.inner.read();
        Ok(inner.outcomes.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::decision::{ActionIntent, ApplyStatus, ReasonCode, TickId};
    use crate::domain::entity::EntityKind;
    use crate::domain::signal::SignalVerdict;
    use chrono::{Duration, Utc};

    fn entity(id: &str) -> ManagedEntity {
        ManagedEntity::new(
            EntityId::new(id),
            EntityKind::Keyword,
            CampaignId::new("c-1"),
            100_000_000,
        )
    }

    fn decision(id: &str, intent: ActionIntent, state: EntityLifecycleState) -> GuardianDecision {
        GuardianDecision {
            entity_id: EntityId::new(id),
            campaign_id: CampaignId::new("c-1"),
            tick_id: TickId::new(),
            tick_at: Utc::now(),
            intent,
            reason: ReasonCode::WithinLimits,
            verdict: Some(SignalVerdict::NonNegative),
            pacing_ratio: Some(1.0),
            window_profit_micros: Some(0),
            confidence: None,
            resulting_state: state,
            apply_status: ApplyStatus::NotRequired,
        }
    }

    #[tokio::test]
    async fn registry_budget_update() {
        let registry = InMemoryEntityRegistry::new();
        registry.register(entity("kw-1")).await.unwrap();
        registry
            .set_daily_budget(&EntityId::new("kw-1"), 42_000_000)
            .await
            .unwrap();
        let stored = registry.get(&EntityId::new("kw-1")).await.unwrap().unwrap();
        assert_eq!(stored.daily_budget_micros, 42_000_000);
    }

    #[tokio::test]
    async fn budget_update_for_unknown_entity_fails() {
        let registry = InMemoryEntityRegistry::new();
        let err = registry
            .set_daily_budget(&EntityId::new("nope"), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn tick_commit_is_visible_as_one_batch() {
        let store = InMemoryStateStore::new();
        let id = EntityId::new("kw-1");

        let commit = TickCommit {
            outcome: Some(TickOutcome::completed(TickId::new(), Utc::now(), 1)),
            lifecycle: vec![(id.clone(), EntityLifecycleState::GuardianPaused)],
            decisions: vec![decision(
                "kw-1",
                ActionIntent::Pause,
                EntityLifecycleState::GuardianPaused,
            )],
            ledgers: vec![LossLedger::new(CampaignId::new("c-1"), Duration::hours(24))],
            snapshots: vec![],
        };
        store.commit_tick(commit).await.unwrap();

        assert_eq!(
            store.lifecycle_of(&id).await.unwrap(),
            Some(EntityLifecycleState::GuardianPaused)
        );
        assert_eq!(
            store.latest_decision(&id).await.unwrap().unwrap().intent,
            ActionIntent::Pause
        );
        assert!(store
            .loss_ledger(&CampaignId::new("c-1"))
            .await
            .unwrap()
            .is_some());
        assert_eq!(store.recent_outcomes(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn decision_history_is_most_recent_first() {
        let store = InMemoryStateStore::new();
        for intent in [ActionIntent::None, ActionIntent::Pause, ActionIntent::Resume] {
            store
                .commit_tick(TickCommit {
                    decisions: vec![decision("kw-1", intent, EntityLifecycleState::Active)],
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        let history = store
            .decision_history(&EntityId::new("kw-1"), 2)
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].intent, ActionIntent::Resume);
        assert_eq!(history[1].intent, ActionIntent::Pause);
    }

    #[tokio::test]
    async fn snapshot_history_is_bounded_oldest_first() {
        let store = InMemoryStateStore::new();
        for spend in [1_i64, 2, 3, 4] {
            store
                .commit_tick(TickCommit {
                    snapshots: vec![MetricsSnapshot {
                        entity_id: EntityId::new("kw-1"),
                        captured_at: Utc::now(),
                        spend_micros: spend,
                        conversions: 0.0,
                        conversion_value_micros: 0,
                        clicks: 0,
                        impressions: 0,
                        elapsed_day_fraction: 0.5,
                    }],
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        let history = store
            .snapshot_history(&EntityId::new("kw-1"), 2)
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].spend_micros, 3);
        assert_eq!(history[1].spend_micros, 4);
    }

    #[tokio::test]
    async fn manual_pause_survives_reads() {
        let store = InMemoryStateStore::new();
        let id = EntityId::new("kw-1");
        store
            .set_lifecycle(&id, EntityLifecycleState::ManuallyPaused)
            .await
            .unwrap();
        let lifecycle = store.load_lifecycle().await.unwrap();
        assert_eq!(
            lifecycle.get(&id),
            Some(&EntityLifecycleState::ManuallyPaused)
        );
    }
}
