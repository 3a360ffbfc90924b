// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Applies action intents against the platform with bounded retry and
//! idempotency guarantees.

use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::domain::config::RetryPolicy;
use crate::domain::decision::ApplyStatus;
use crate::domain::entity::EntityId;
use crate::domain::platform::{AdsPlatform, IdempotencyKey, PlatformError, TargetStatus};

/// Pure exponential backoff: `base * 2^attempt`, capped. Independent of any
/// particular runtime; callers decide how to sleep.
pub fn backoff_delay(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.min(16));
    base.saturating_mul(factor).min(cap)
}

/// One platform mutation this tick.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub entity_id: EntityId,
    pub target: TargetStatus,
    pub key: IdempotencyKey,
}

pub struct ActionApplier {
    platform: Arc<dyn AdsPlatform>,
    policy: RetryPolicy,
    concurrency: usize,
}

impl ActionApplier {
    pub fn new(platform: Arc<dyn AdsPlatform>, policy: RetryPolicy, concurrency: usize) -> Self {
        Self {
            platform,
            policy,
            concurrency,
        }
    }

    /// Apply a batch of intents concurrently. Each request carries its
    /// idempotency key, so a retry after a timeout cannot double-apply or
    /// clobber a newer intent. Exhausted or rejected requests come back as
    /// [`ApplyStatus::Failed`]; the caller leaves the stored lifecycle state
    /// unchanged for those entities.
    pub async fn apply_batch(
        &self,
        requests: Vec<ActionRequest>,
    ) -> HashMap<EntityId, ApplyStatus> {
        let results = stream::iter(requests)
            .map(|request| async move {
                let status = self.apply_one(&request).await;
                (request.entity_id, status)
            })
            .buffer_unordered(self.concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        results.into_iter().collect()
    }

    async fn apply_one(&self, request: &ActionRequest) -> ApplyStatus {
        let mut attempt = 0u32;

        loop {
            match self
                .platform
                .set_entity_status(&request.entity_id, request.target, &request.key)
                .await
            {
                Ok(ack) => {
                    info!(
                        entity = %request.entity_id,
                        target = request.target.as_str(),
                        changed = ack.changed,
                        "status applied"
                    );
                    return ApplyStatus::Applied;
                }
                Err(PlatformError::Transient(message)) if attempt < self.policy.max_retries => {
                    let delay =
                        backoff_delay(self.policy.backoff_base, self.policy.backoff_cap, attempt);
                    debug!(
                        entity = %request.entity_id,
                        attempt,
                        ?delay,
                        message,
                        "transient platform error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    error!(
                        entity = %request.entity_id,
                        target = request.target.as_str(),
                        error = %err,
                        "status update failed, lifecycle left unchanged"
                    );
                    return ApplyStatus::Failed;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    use crate::domain::metrics::{MetricsSnapshot, ReportingWindow};
    use crate::domain::platform::{FetchError, StatusAck};

    /// Platform that fails a configurable number of times per entity and
    /// tracks effective status changes by idempotency key.
    struct FlakyPlatform {
        failures_remaining: Mutex<HashMap<EntityId, u32>>,
        reject: Mutex<HashSet<EntityId>>,
        seen_keys: Mutex<HashSet<String>>,
        effective_changes: Mutex<Vec<(EntityId, TargetStatus)>>,
    }

    impl FlakyPlatform {
        fn new() -> Self {
            Self {
                failures_remaining: Mutex::new(HashMap::new()),
                reject: Mutex::new(HashSet::new()),
                seen_keys: Mutex::new(HashSet::new()),
                effective_changes: Mutex::new(Vec::new()),
            }
        }

        fn fail_times(&self, id: &EntityId, times: u32) {
            self.failures_remaining.lock().insert(id.clone(), times);
        }

        fn reject_entity(&self, id: &EntityId) {
            self.reject.lock().insert(id.clone());
        }
    }

    #[async_trait]
    impl AdsPlatform for FlakyPlatform {
        async fn fetch_metrics(
            &self,
            _entity_ids: &[EntityId],
            _window: &ReportingWindow,
        ) -> HashMap<EntityId, Result<MetricsSnapshot, FetchError>> {
            unimplemented!("not used in applier tests")
        }

        async fn set_entity_status(
            &self,
            entity_id: &EntityId,
            target: TargetStatus,
            key: &IdempotencyKey,
        ) -> Result<StatusAck, PlatformError> {
            if self.reject.lock().contains(entity_id) {
                return Err(PlatformError::Rejected("entity not mutable".to_string()));
            }

            let mut failures = self.failures_remaining.lock();
            if let Some(remaining) = failures.get_mut(entity_id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(PlatformError::Transient("deadline exceeded".to_string()));
                }
            }
            drop(failures);

            // At-most-one effective application per idempotency key.
            let first_time = self.seen_keys.lock().insert(key.to_string());
            if first_time {
                self.effective_changes
                    .lock()
                    .push((entity_id.clone(), target));
            }
            Ok(StatusAck {
                entity_id: entity_id.clone(),
                target,
                changed: first_time,
            })
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            backoff_base: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(8),
        }
    }

    fn request(id: &str, target: TargetStatus) -> ActionRequest {
        let entity_id = EntityId::new(id);
        ActionRequest {
            entity_id: entity_id.clone(),
            target,
            key: IdempotencyKey::new(entity_id, target, Utc::now()),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_millis(500);
        let cap = Duration::from_secs(30);
        assert_eq!(backoff_delay(base, cap, 0), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, cap, 1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, cap, 2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(base, cap, 10), Duration::from_secs(30));
        // Huge attempt numbers stay capped instead of overflowing.
        assert_eq!(backoff_delay(base, cap, 1000), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn retried_transient_failure_eventually_applies() {
        let platform = Arc::new(FlakyPlatform::new());
        let req = request("kw-1", TargetStatus::Paused);
        platform.fail_times(&req.entity_id, 2);

        let applier = ActionApplier::new(Arc::clone(&platform) as Arc<dyn AdsPlatform>, policy(), 4);
        let results = applier.apply_batch(vec![req.clone()]).await;

        assert_eq!(results[&req.entity_id], ApplyStatus::Applied);
        assert_eq!(platform.effective_changes.lock().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_mark_failed() {
        let platform = Arc::new(FlakyPlatform::new());
        let req = request("kw-1", TargetStatus::Paused);
        platform.fail_times(&req.entity_id, 10);

        let applier = ActionApplier::new(Arc::clone(&platform) as Arc<dyn AdsPlatform>, policy(), 4);
        let results = applier.apply_batch(vec![req.clone()]).await;

        assert_eq!(results[&req.entity_id], ApplyStatus::Failed);
        assert!(platform.effective_changes.lock().is_empty());
    }

    #[tokio::test]
    async fn rejected_requests_fail_without_retry() {
        let platform = Arc::new(FlakyPlatform::new());
        let req = request("kw-1", TargetStatus::Enabled);
        platform.reject_entity(&req.entity_id);

        let applier = ActionApplier::new(Arc::clone(&platform) as Arc<dyn AdsPlatform>, policy(), 4);
        let results = applier.apply_batch(vec![req.clone()]).await;

        assert_eq!(results[&req.entity_id], ApplyStatus::Failed);
    }

    #[tokio::test]
    async fn same_key_applies_at_most_once() {
        let platform = Arc::new(FlakyPlatform::new());
        let req = request("kw-1", TargetStatus::Paused);

        let applier = ActionApplier::new(Arc::clone(&platform) as Arc<dyn AdsPlatform>, policy(), 4);
        // Apply the same request twice, as a timed-out-then-retried tick
        // would.
        applier.apply_batch(vec![req.clone()]).await;
        let results = applier.apply_batch(vec![req.clone()]).await;

        assert_eq!(results[&req.entity_id], ApplyStatus::Applied);
        assert_eq!(platform.effective_changes.lock().len(), 1);
    }

    #[tokio::test]
    async fn batch_applies_all_entities() {
        let platform = Arc::new(FlakyPlatform::new());
        let reqs = vec![
            request("kw-1", TargetStatus::Paused),
            request("kw-2", TargetStatus::Paused),
            request("kw-3", TargetStatus::Enabled),
        ];

        let applier = ActionApplier::new(Arc::clone(&platform) as Arc<dyn AdsPlatform>, policy(), 2);
        let results = applier.apply_batch(reqs).await;

        assert_eq!(results.len(), 3);
        assert!(results.values().all(|s| *s == ApplyStatus::Applied));
        assert_eq!(platform.effective_changes.lock().len(), 3);
    }
}
