// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Persistence contracts, one trait per aggregate root: the entity roster
//! ([`EntityRegistry`]) and the guardian state store ([`StateStore`]).
//! Interfaces live in the domain layer and are implemented in
//! `crate::infrastructure::repositories` (in-memory for development and
//! testing, PostgreSQL for production).

use async_trait::async_trait;
use std::collections::HashMap;

use crate::domain::decision::{GuardianDecision, TickOutcome};
use crate::domain::entity::{CampaignId, EntityId, EntityLifecycleState, ManagedEntity};
use crate::domain::ledger::LossLedger;
use crate::domain::metrics::MetricsSnapshot;

/// Store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
            _ => StoreError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Everything one tick wants to persist. Committed atomically: either the
/// whole batch lands or none of it, so hysteresis streaks recomputed from
/// history are never torn.
#[derive(Debug, Clone, Default)]
pub struct TickCommit {
    pub outcome: Option<TickOutcome>,
    pub lifecycle: Vec<(EntityId, EntityLifecycleState)>,
    pub decisions: Vec<GuardianDecision>,
    pub ledgers: Vec<LossLedger>,
    pub snapshots: Vec<MetricsSnapshot>,
}

impl TickCommit {
    pub fn outcome_only(outcome: TickOutcome) -> Self {
        Self {
            outcome: Some(outcome),
            ..Default::default()
        }
    }
}

/// Roster of entities under guardianship.
#[async_trait]
pub trait EntityRegistry: Send + Sync {
    async fn register(&self, entity: ManagedEntity) -> Result<(), StoreError>;

    async fn get(&self, id: &EntityId) -> Result<Option<ManagedEntity>, StoreError>;

    async fn list_all(&self) -> Result<Vec<ManagedEntity>, StoreError>;

    /// Budget targets may be adjusted externally between ticks.
    async fn set_daily_budget(&self, id: &EntityId, budget_micros: i64) -> Result<(), StoreError>;

    async fn remove(&self, id: &EntityId) -> Result<(), StoreError>;
}

/// Durable record of lifecycle states, decision history, loss ledgers,
/// snapshot history and tick outcomes. The store is the only shared mutable
/// resource; all writes arrive through [`StateStore::commit_tick`] from the
/// single-tick-at-a-time scheduler, except for the operator's manual
/// pause/resume path.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load all persisted lifecycle states (guardian startup).
    async fn load_lifecycle(&self) -> Result<HashMap<EntityId, EntityLifecycleState>, StoreError>;

    /// Persist one tick's batch atomically.
    async fn commit_tick(&self, commit: TickCommit) -> Result<(), StoreError>;

    /// Operator path: force a lifecycle state outside the tick pipeline
    /// (manual pause / manual resume).
    async fn set_lifecycle(
        &self,
        id: &EntityId,
        state: EntityLifecycleState,
    ) -> Result<(), StoreError>;

    async fn lifecycle_of(&self, id: &EntityId)
        -> Result<Option<EntityLifecycleState>, StoreError>;

    async fn latest_decision(&self, id: &EntityId)
        -> Result<Option<GuardianDecision>, StoreError>;

    /// Decision history for an entity, most recent first.
    async fn decision_history(
        &self,
        id: &EntityId,
        limit: usize,
    ) -> Result<Vec<GuardianDecision>, StoreError>;

    async fn loss_ledger(&self, campaign_id: &CampaignId) -> Result<Option<LossLedger>, StoreError>;

    async fn all_ledgers(&self) -> Result<Vec<LossLedger>, StoreError>;

    /// Most recent snapshots for an entity, oldest first, bounded by `limit`.
    async fn snapshot_history(
        &self,
        id: &EntityId,
        limit: usize,
    ) -> Result<Vec<MetricsSnapshot>, StoreError>;

    /// Recent tick outcomes, most recent first.
    async fn recent_outcomes(&self, limit: usize) -> Result<Vec<TickOutcome>, StoreError>;
}
