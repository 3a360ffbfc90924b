// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL persistence for the entity roster and the guardian state
//! store. Translates between domain records and the relational schema; the
//! tick commit runs inside a single transaction so a failed tick leaves no
//! partial writes.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;
use std::collections::HashMap;

use crate::domain::decision::{
    ActionIntent, ApplyStatus, GuardianDecision, ReasonCode, TickId, TickOutcome, TickStatus,
};
use crate::domain::entity::{CampaignId, EntityId, EntityKind, EntityLifecycleState, ManagedEntity};
use crate::domain::ledger::{LedgerEntry, LossLedger};
use crate::domain::metrics::MetricsSnapshot;
use crate::domain::signal::{Confidence, SignalVerdict};
use crate::domain::store::{EntityRegistry, StateStore, StoreError, TickCommit};

/// Create the guardian tables when they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), StoreError> {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS guardian_entities (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            campaign_id TEXT NOT NULL,
            daily_budget_micros BIGINT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS entity_lifecycle (
            entity_id TEXT PRIMARY KEY,
            state TEXT NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS guardian_decisions (
            id BIGSERIAL PRIMARY KEY,
            entity_id TEXT NOT NULL,
            campaign_id TEXT NOT NULL,
            tick_id UUID NOT NULL,
            tick_at TIMESTAMPTZ NOT NULL,
            intent TEXT NOT NULL,
            reason TEXT NOT NULL,
            verdict TEXT,
            pacing_ratio DOUBLE PRECISION,
            window_profit_micros BIGINT,
            confidence TEXT,
            resulting_state TEXT NOT NULL,
            apply_status TEXT NOT NULL
        )
        "#,
        r#"
        CREATE INDEX IF NOT EXISTS idx_guardian_decisions_entity
            ON guardian_decisions (entity_id, id DESC)
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS loss_ledgers (
            campaign_id TEXT PRIMARY KEY,
            window_secs BIGINT NOT NULL,
            entries JSONB NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS metrics_snapshots (
            id BIGSERIAL PRIMARY KEY,
            entity_id TEXT NOT NULL,
            captured_at TIMESTAMPTZ NOT NULL,
            spend_micros BIGINT NOT NULL,
            conversions DOUBLE PRECISION NOT NULL,
            conversion_value_micros BIGINT NOT NULL,
            clicks BIGINT NOT NULL,
            impressions BIGINT NOT NULL,
            elapsed_day_fraction DOUBLE PRECISION NOT NULL
        )
        "#,
        r#"
        CREATE INDEX IF NOT EXISTS idx_metrics_snapshots_entity
            ON metrics_snapshots (entity_id, id DESC)
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS tick_outcomes (
            id BIGSERIAL PRIMARY KEY,
            tick_id UUID NOT NULL,
            at TIMESTAMPTZ NOT NULL,
            status TEXT NOT NULL,
            detail TEXT NOT NULL DEFAULT '',
            decisions INTEGER NOT NULL DEFAULT 0
        )
        "#,
    ];

    for statement in statements {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| StoreError::Database(format!("failed to ensure schema: {e}")))?;
    }
    Ok(())
}

pub struct PostgresEntityRegistry {
    pool: PgPool,
}

impl PostgresEntityRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn entity_from_row(row: &sqlx::postgres::PgRow) -> Result<ManagedEntity, StoreError> {
    let kind_str: String = row.get("kind");
    let kind = EntityKind::parse(&kind_str)
        .ok_or_else(|| StoreError::Serialization(format!("unknown entity kind: {kind_str}")))?;
    Ok(ManagedEntity {
        id: EntityId::new(row.get::<String, _>("id")),
        kind,
        campaign_id: CampaignId::new(row.get::<String, _>("campaign_id")),
        daily_budget_micros: row.get("daily_budget_micros"),
        created_at: row.get("created_at"),
    })
}

#[async_trait]
impl EntityRegistry for PostgresEntityRegistry {
    async fn register(&self, entity: ManagedEntity) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO guardian_entities (id, kind, campaign_id, daily_budget_micros, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                kind = EXCLUDED.kind,
                campaign_id = EXCLUDED.campaign_id,
                daily_budget_micros = EXCLUDED.daily_budget_micros
            "#,
        )
        .bind(entity.id.as_str())
        .bind(entity.kind.as_str())
        .bind(entity.campaign_id.as_str())
        .bind(entity.daily_budget_micros)
        .bind(entity.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(format!("failed to register entity: {e}")))?;
        Ok(())
    }

    async fn get(&self, id: &EntityId) -> Result<Option<ManagedEntity>, StoreError> {
        let row = sqlx::query("SELECT * FROM guardian_entities WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(entity_from_row).transpose()
    }

    async fn list_all(&self) -> Result<Vec<ManagedEntity>, StoreError> {
        let rows = sqlx::query("SELECT * FROM guardian_entities ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(entity_from_row).collect()
    }

    async fn set_daily_budget(&self, id: &EntityId, budget_micros: i64) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE guardian_entities SET daily_budget_micros = $2 WHERE id = $1",
        )
        .bind(id.as_str())
        .bind(budget_micros)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("entity {id}")));
        }
        Ok(())
    }

    async fn remove(&self, id: &EntityId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM guardian_entities WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

pub struct PostgresStateStore {
    pool: PgPool,
}

impl PostgresStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn decision_from_row(row: &sqlx::postgres::PgRow) -> Result<GuardianDecision, StoreError> {
    let parse_failure =
        |field: &str, value: &str| StoreError::Serialization(format!("bad {field}: {value}"));

    let intent_str: String = row.get("intent");
    let reason_str: String = row.get("reason");
    let state_str: String = row.get("resulting_state");
    let apply_str: String = row.get("apply_status");
    let verdict_str: Option<String> = row.get("verdict");
    let confidence_str: Option<String> = row.get("confidence");

    Ok(GuardianDecision {
        entity_id: EntityId::new(row.get::<String, _>("entity_id")),
        campaign_id: CampaignId::new(row.get::<String, _>("campaign_id")),
        tick_id: TickId(row.get("tick_id")),
        tick_at: row.get("tick_at"),
        intent: ActionIntent::parse(&intent_str)
            .ok_or_else(|| parse_failure("intent", &intent_str))?,
        reason: ReasonCode::parse(&reason_str)
            .ok_or_else(|| parse_failure("reason", &reason_str))?,
        verdict: verdict_str
            .map(|v| SignalVerdict::parse(&v).ok_or_else(|| parse_failure("verdict", &v)))
            .transpose()?,
        pacing_ratio: row.get("pacing_ratio"),
        window_profit_micros: row.get("window_profit_micros"),
        confidence: confidence_str
            .map(|c| Confidence::parse(&c).ok_or_else(|| parse_failure("confidence", &c)))
            .transpose()?,
        resulting_state: EntityLifecycleState::parse(&state_str)
            .ok_or_else(|| parse_failure("resulting_state", &state_str))?,
        apply_status: ApplyStatus::parse(&apply_str)
            .ok_or_else(|| parse_failure("apply_status", &apply_str))?,
    })
}

fn snapshot_from_row(row: &sqlx::postgres::PgRow) -> MetricsSnapshot {
    MetricsSnapshot {
        entity_id: EntityId::new(row.get::<String, _>("entity_id")),
        captured_at: row.get("captured_at"),
        spend_micros: row.get("spend_micros"),
        conversions: row.get("conversions"),
        conversion_value_micros: row.get("conversion_value_micros"),
        clicks: row.get::<i64, _>("clicks").max(0) as u64,
        impressions: row.get::<i64, _>("impressions").max(0) as u64,
        elapsed_day_fraction: row.get("elapsed_day_fraction"),
    }
}

#[async_trait]
impl StateStore for PostgresStateStore {
    async fn load_lifecycle(
        &self,
    ) -> Result<HashMap<EntityId, EntityLifecycleState>, StoreError> {
        let rows = sqlx::query("SELECT entity_id, state FROM entity_lifecycle")
            .fetch_all(&self.pool)
            .await?;

        let mut lifecycle = HashMap::new();
        for row in rows {
            let id: String = row.get("entity_id");
            let state_str: String = row.get("state");
            let state = EntityLifecycleState::parse(&state_str).ok_or_else(|| {
                StoreError::Serialization(format!("bad lifecycle state: {state_str}"))
            })?;
            lifecycle.insert(EntityId::new(id), state);
        }
        Ok(lifecycle)
    }

    async fn commit_tick(&self, commit: TickCommit) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        for (id, state) in &commit.lifecycle {
            sqlx::query(
                r#"
                INSERT INTO entity_lifecycle (entity_id, state, updated_at)
                VALUES ($1, $2, now())
                ON CONFLICT (entity_id) DO UPDATE SET
                    state = EXCLUDED.state,
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(id.as_str())
            .bind(state.as_str())
            .execute(&mut *tx)
            .await?;
        }

        for decision in &commit.decisions {
            sqlx::query(
                r#"
                INSERT INTO guardian_decisions (
                    entity_id, campaign_id, tick_id, tick_at, intent, reason,
                    verdict, pacing_ratio, window_profit_micros, confidence,
                    resulting_state, apply_status
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(decision.entity_id.as_str())
            .bind(decision.campaign_id.as_str())
            .bind(decision.tick_id.0)
            .bind(decision.tick_at)
            .bind(decision.intent.as_str())
            .bind(decision.reason.as_str())
            .bind(decision.verdict.map(|v| v.as_str()))
            .bind(decision.pacing_ratio)
            .bind(decision.window_profit_micros)
            .bind(decision.confidence.map(|c| c.as_str()))
            .bind(decision.resulting_state.as_str())
            .bind(decision.apply_status.as_str())
            .execute(&mut *tx)
            .await?;
        }

        for ledger in &commit.ledgers {
            let entries = serde_json::to_value(&ledger.entries)?;
            sqlx::query(
                r#"
                INSERT INTO loss_ledgers (campaign_id, window_secs, entries, updated_at)
                VALUES ($1, $2, $3, now())
                ON CONFLICT (campaign_id) DO UPDATE SET
                    window_secs = EXCLUDED.window_secs,
                    entries = EXCLUDED.entries,
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(ledger.campaign_id.as_str())
            .bind(ledger.window_secs)
            .bind(entries)
            .execute(&mut *tx)
            .await?;
        }

        for snapshot in &commit.snapshots {
            sqlx::query(
                r#"
                INSERT INTO metrics_snapshots (
                    entity_id, captured_at, spend_micros, conversions,
                    conversion_value_micros, clicks, impressions, elapsed_day_fraction
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(snapshot.entity_id.as_str())
            .bind(snapshot.captured_at)
            .bind(snapshot.spend_micros)
            .bind(snapshot.conversions)
            .bind(snapshot.conversion_value_micros)
            .bind(snapshot.clicks as i64)
            .bind(snapshot.impressions as i64)
            .bind(snapshot.elapsed_day_fraction)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(outcome) = &commit.outcome {
            sqlx::query(
                r#"
                INSERT INTO tick_outcomes (tick_id, at, status, detail, decisions)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(outcome.tick_id.0)
            .bind(outcome.at)
            .bind(outcome.status.as_str())
            .bind(&outcome.detail)
            .bind(outcome.decisions as i32)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn set_lifecycle(
        &self,
        id: &EntityId,
        state: EntityLifecycleState,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO entity_lifecycle (entity_id, state, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (entity_id) DO UPDATE SET
                state = EXCLUDED.state,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(id.as_str())
        .bind(state.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn lifecycle_of(
        &self,
        id: &EntityId,
    ) -> Result<Option<EntityLifecycleState>, StoreError> {
        let row = sqlx::query("SELECT state FROM entity_lifecycle WHERE entity_id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            let state_str: String = r.get("state");
            EntityLifecycleState::parse(&state_str).ok_or_else(|| {
                StoreError::Serialization(format!("bad lifecycle state: {state_str}"))
            })
        })
        .transpose()
    }

    async fn latest_decision(
        &self,
        id: &EntityId,
    ) -> Result<Option<GuardianDecision>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM guardian_decisions WHERE entity_id = $1 ORDER BY id DESC LIMIT 1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(decision_from_row).transpose()
    }

    async fn decision_history(
        &self,
        id: &EntityId,
        limit: usize,
    ) -> Result<Vec<GuardianDecision>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM guardian_decisions WHERE entity_id = $1 ORDER BY id DESC LIMIT $2",
        )
        .bind(id.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decision_from_row).collect()
    }

    async fn loss_ledger(
        &self,
        campaign_id: &CampaignId,
    ) -> Result<Option<LossLedger>, StoreError> {
        let row = sqlx::query("SELECT * FROM loss_ledgers WHERE campaign_id = $1")
            .bind(campaign_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| ledger_from_row(&r)).transpose()
    }

    async fn all_ledgers(&self) -> Result<Vec<LossLedger>, StoreError> {
        let rows = sqlx::query("SELECT * FROM loss_ledgers")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(ledger_from_row).collect()
    }

    async fn snapshot_history(
        &self,
        id: &EntityId,
        limit: usize,
    ) -> Result<Vec<MetricsSnapshot>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM metrics_snapshots WHERE entity_id = $1 ORDER BY id DESC LIMIT $2",
        )
        .bind(id.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        // Newest-first from the index; the evaluator wants oldest-first.
        Ok(rows.iter().rev().map(snapshot_from_row).collect())
    }

    async fn recent_outcomes(&self, limit: usize) -> Result<Vec<TickOutcome>, StoreError> {
        let rows = sqlx::query("SELECT * FROM tick_outcomes ORDER BY id DESC LIMIT $1")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let status_str: String = row.get("status");
                let status = TickStatus::parse(&status_str).ok_or_else(|| {
                    StoreError::Serialization(format!("bad tick status: {status_str}"))
                })?;
                Ok(TickOutcome {
                    tick_id: TickId(row.get("tick_id")),
                    at: row.get("at"),
                    status,
                    detail: row.get("detail"),
                    decisions: row.get::<i32, _>("decisions").max(0) as u32,
                })
            })
            .collect()
    }
}

fn ledger_from_row(row: &sqlx::postgres::PgRow) -> Result<LossLedger, StoreError> {
    let entries_value: serde_json::Value = row.get("entries");
    let entries: Vec<LedgerEntry> = serde_json::from_value(entries_value)?;
    Ok(LossLedger {
        campaign_id: CampaignId::new(row.get::<String, _>("campaign_id")),
        window_secs: row.get("window_secs"),
        entries,
    })
}
