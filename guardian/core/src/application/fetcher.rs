// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Metrics snapshot fetching with bounded fan-out and per-entity retry.

use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::application::applier::backoff_delay;
use crate::domain::config::FetchPolicy;
use crate::domain::entity::EntityId;
use crate::domain::metrics::{MetricsSnapshot, ReportingWindow};
use crate::domain::platform::{AdsPlatform, FetchError};

pub struct SnapshotFetcher {
    platform: Arc<dyn AdsPlatform>,
    policy: FetchPolicy,
}

impl SnapshotFetcher {
    pub fn new(platform: Arc<dyn AdsPlatform>, policy: FetchPolicy) -> Self {
        Self { platform, policy }
    }

    /// Fetch one snapshot per entity. Per-entity calls run under the bounded
    /// worker pool; transient failures are retried within the tick, permanent
    /// failures are returned as-is. A failure for entity X never blocks
    /// snapshot delivery for the others.
    pub async fn fetch(
        &self,
        entity_ids: &[EntityId],
        window: &ReportingWindow,
    ) -> HashMap<EntityId, Result<MetricsSnapshot, FetchError>> {
        let results = stream::iter(entity_ids.iter().cloned())
            .map(|id| {
                let platform = Arc::clone(&self.platform);
                let window = *window;
                let policy = self.policy.clone();
                async move { (id.clone(), fetch_one(platform, id, window, policy).await) }
            })
            .buffer_unordered(self.policy.concurrency)
            .collect::<Vec<_>>()
            .await;

        results.into_iter().collect()
    }
}

async fn fetch_one(
    platform: Arc<dyn AdsPlatform>,
    id: EntityId,
    window: ReportingWindow,
    policy: FetchPolicy,
) -> Result<MetricsSnapshot, FetchError> {
    let ids = [id.clone()];
    let mut attempt = 0u32;

    loop {
        let mut batch = platform.fetch_metrics(&ids, &window).await;
        let result = batch
            .remove(&id)
            .unwrap_or_else(|| Err(FetchError::Permanent("no result for entity".to_string())));

        match result {
            Ok(snapshot) => return Ok(snapshot),
            Err(err) if err.is_transient() && attempt < policy.max_retries => {
                let delay = backoff_delay(policy.backoff_base, policy.backoff_cap, attempt);
                debug!(entity = %id, attempt, ?delay, "transient fetch error, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                warn!(entity = %id, error = %err, "metrics fetch failed, entity stale this tick");
                return Err(err);
            }
        }
    }
}
