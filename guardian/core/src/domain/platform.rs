// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Contract with the external advertising platform.
//!
//! The concrete backend is out of scope for the guardian; everything it needs
//! is expressed by [`AdsPlatform`], implemented by the REST gateway in
//! `infrastructure::ads` and by scripted mocks in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::domain::entity::EntityId;
use crate::domain::metrics::{MetricsSnapshot, ReportingWindow};

/// Failure to fetch metrics for one entity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Rate limit, timeout or network condition. Retryable within the tick.
    #[error("transient fetch error: {0}")]
    Transient(String),

    /// Authorization or entity-not-found condition. Not retryable within the
    /// tick; the entity is skipped and flagged stale.
    #[error("permanent fetch error: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

/// Failure to mutate entity status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    #[error("transient platform error: {0}")]
    Transient(String),

    #[error("platform rejected request: {0}")]
    Rejected(String),
}

impl PlatformError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PlatformError::Transient(_))
    }
}

/// Serving status the guardian can set on the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetStatus {
    Enabled,
    Paused,
}

impl TargetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetStatus::Enabled => "ENABLED",
            TargetStatus::Paused => "PAUSED",
        }
    }
}

/// Discriminator ensuring a repeated status request has effect at most once.
/// Keyed by entity, target state and tick timestamp: a retry after a timeout
/// carries the same key and cannot double-apply or clobber a newer intent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub entity_id: EntityId,
    pub target: TargetStatus,
    pub tick_at: DateTime<Utc>,
}

impl IdempotencyKey {
    pub fn new(entity_id: EntityId, target: TargetStatus, tick_at: DateTime<Utc>) -> Self {
        Self {
            entity_id,
            target,
            tick_at,
        }
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.entity_id,
            self.target.as_str(),
            self.tick_at.timestamp_millis()
        )
    }
}

/// Acknowledgement of a status mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusAck {
    pub entity_id: EntityId,
    pub target: TargetStatus,
    /// False when the platform had already seen this idempotency key (or the
    /// entity was already in the target state).
    pub changed: bool,
}

/// The advertising platform as the guardian sees it.
#[async_trait]
pub trait AdsPlatform: Send + Sync {
    /// Fetch current metrics for the given entities. Partial failure is
    /// expressed per entity; a failed entity never blocks the others.
    async fn fetch_metrics(
        &self,
        entity_ids: &[EntityId],
        window: &ReportingWindow,
    ) -> HashMap<EntityId, Result<MetricsSnapshot, FetchError>>;

    /// Set an entity's serving status, idempotent under `key`.
    async fn set_entity_status(
        &self,
        entity_id: &EntityId,
        target: TargetStatus,
        key: &IdempotencyKey,
    ) -> Result<StatusAck, PlatformError>;
}
