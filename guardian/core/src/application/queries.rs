//! Read-side service backing the status API. Reads always see the last
//! committed tick, never a partially written one.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use std::sync::Arc;

use crate::domain::decision::{GuardianDecision, TickOutcome};
use crate::domain::entity::{CampaignId, EntityId, EntityLifecycleState};
use crate::domain::store::{EntityRegistry, StateStore};

/// Current view of one entity.
pub struct EntityStateView {
    pub state: EntityLifecycleState,
    pub last_decision: Option<GuardianDecision>,
}

/// Current view of one campaign's loss ledger.
pub struct LedgerView {
    pub cumulative_loss_micros: i64,
    pub window_start: Option<DateTime<Utc>>,
}

pub struct GuardianQueryService {
    registry: Arc<dyn EntityRegistry>,
    store: Arc<dyn StateStore>,
}

impl GuardianQueryService {
    pub fn new(registry: Arc<dyn EntityRegistry>, store: Arc<dyn StateStore>) -> Self {
        Self { registry, store }
    }

    pub async fn current_state(&self, id: &EntityId) -> Result<Option<EntityStateView>> {
        if self.registry.get(id).await.context("registry lookup failed")?.is_none() {
            return Ok(None);
        }
        let state = self
            .store
            .lifecycle_of(id)
            .await
            .context("failed to load lifecycle state")?
            .unwrap_or(EntityLifecycleState::Active);
        let last_decision = self
            .store
            .latest_decision(id)
            .await
            .context("failed to load latest decision")?;
        Ok(Some(EntityStateView {
            state,
            last_decision,
        }))
    }

    pub async fn decision_history(
        &self,
        id: &EntityId,
        limit: usize,
    ) -> Result<Vec<GuardianDecision>> {
        self.store
            .decision_history(id, limit)
            .await
            .context("failed to load decision history")
    }

    pub async fn loss_ledger(&self, campaign_id: &CampaignId) -> Result<Option<LedgerView>> {
        let ledger = self
            .store
            .loss_ledger(campaign_id)
            .await
            .context("failed to load loss ledger")?;
        Ok(ledger.map(|l| LedgerView {
            cumulative_loss_micros: l.cumulative_loss_micros(),
            window_start: l.window_start(),
        }))
    }

    pub async fn recent_outcomes(&self, limit: usize) -> Result<Vec<TickOutcome>> {
        self.store
            .recent_outcomes(limit)
            .await
            .context("failed to load tick outcomes")
    }

    pub async fn entity_count(&self) -> Result<usize> {
        Ok(self
            .registry
            .list_all()
            .await
            .context("failed to list entities")?
            .len())
    }
}
