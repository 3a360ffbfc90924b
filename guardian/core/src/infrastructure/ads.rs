// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! REST gateway to the advertising platform.
//!
//! Speaks the reporting/mutation API of the ads backend and maps its failure
//! modes onto the guardian's error taxonomy: rate limits, timeouts and 5xx
//! are transient; authorization and not-found are permanent. Outbound calls
//! are throttled to the configured request budget.

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::warn;

use crate::domain::config::PlatformConfig;
use crate::domain::entity::EntityId;
use crate::domain::metrics::{MetricsSnapshot, ReportingWindow};
use crate::domain::platform::{
    AdsPlatform, FetchError, IdempotencyKey, PlatformError, StatusAck, TargetStatus,
};

#[derive(Serialize)]
struct MetricsSearchRequest<'a> {
    entity_ids: Vec<&'a str>,
    window: WindowBody,
}

#[derive(Serialize)]
struct WindowBody {
    start: chrono::DateTime<chrono::Utc>,
    end: chrono::DateTime<chrono::Utc>,
}

#[derive(Deserialize)]
struct MetricsSearchResponse {
    #[serde(default)]
    rows: Vec<MetricsRow>,
}

#[derive(Deserialize)]
struct MetricsRow {
    entity_id: String,
    #[serde(default)]
    spend_micros: i64,
    #[serde(default)]
    conversions: f64,
    #[serde(default)]
    conversion_value_micros: i64,
    #[serde(default)]
    clicks: u64,
    #[serde(default)]
    impressions: u64,
}

#[derive(Serialize)]
struct SetStatusRequest<'a> {
    status: &'a str,
    idempotency_key: String,
}

#[derive(Deserialize)]
struct SetStatusResponse {
    #[serde(default = "default_changed")]
    changed: bool,
}

fn default_changed() -> bool {
    true
}

pub struct RestAdsGateway {
    client: reqwest::Client,
    endpoint: String,
    customer_id: String,
    api_token: Option<String>,
    limiter: DefaultDirectRateLimiter,
}

impl RestAdsGateway {
    pub fn new(config: &PlatformConfig) -> Self {
        let api_token = std::env::var(&config.api_token_env).ok();
        if api_token.is_none() {
            warn!(
                var = %config.api_token_env,
                "platform API token not set, requests will be unauthenticated"
            );
        }

        let quota = Quota::per_minute(
            NonZeroU32::new(config.requests_per_minute.max(1)).unwrap_or(NonZeroU32::MIN),
        );

        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            customer_id: config.customer_id.replace('-', ""),
            api_token,
            limiter: RateLimiter::direct(quota),
        }
    }

    fn request(&self, url: String, body: impl Serialize) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(url).json(&body);
        if let Some(token) = &self.api_token {
            builder = builder.bearer_auth(token);
        }
        builder
    }
}

fn fetch_error_for_status(status: StatusCode) -> FetchError {
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        FetchError::Transient(format!("http {status}"))
    } else {
        FetchError::Permanent(format!("http {status}"))
    }
}

fn platform_error_for_status(status: StatusCode) -> PlatformError {
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        PlatformError::Transient(format!("http {status}"))
    } else {
        PlatformError::Rejected(format!("http {status}"))
    }
}

#[async_trait]
impl AdsPlatform for RestAdsGateway {
    async fn fetch_metrics(
        &self,
        entity_ids: &[EntityId],
        window: &ReportingWindow,
    ) -> HashMap<EntityId, Result<MetricsSnapshot, FetchError>> {
        self.limiter.until_ready().await;

        let url = format!(
            "{}/v1/customers/{}/metrics:search",
            self.endpoint, self.customer_id
        );
        let body = MetricsSearchRequest {
            entity_ids: entity_ids.iter().map(|id| id.as_str()).collect(),
            window: WindowBody {
                start: window.start,
                end: window.end,
            },
        };

        let response = match self.request(url, body).send().await {
            Ok(response) => response,
            Err(err) => {
                let error = FetchError::Transient(format!("request failed: {err}"));
                return entity_ids
                    .iter()
                    .map(|id| (id.clone(), Err(error.clone())))
                    .collect();
            }
        };

        let status = response.status();
        if !status.is_success() {
            let error = fetch_error_for_status(status);
            return entity_ids
                .iter()
                .map(|id| (id.clone(), Err(error.clone())))
                .collect();
        }

        let parsed: MetricsSearchResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(err) => {
                let error = FetchError::Permanent(format!("malformed response: {err}"));
                return entity_ids
                    .iter()
                    .map(|id| (id.clone(), Err(error.clone())))
                    .collect();
            }
        };

        let mut by_id: HashMap<String, MetricsRow> = parsed
            .rows
            .into_iter()
            .map(|row| (row.entity_id.clone(), row))
            .collect();

        entity_ids
            .iter()
            .map(|id| {
                let result = match by_id.remove(id.as_str()) {
                    Some(row) => Ok(MetricsSnapshot {
                        entity_id: id.clone(),
                        captured_at: window.end,
                        spend_micros: row.spend_micros,
                        conversions: row.conversions,
                        conversion_value_micros: row.conversion_value_micros,
                        clicks: row.clicks,
                        impressions: row.impressions,
                        elapsed_day_fraction: window.elapsed_day_fraction(),
                    }),
                    None => Err(FetchError::Permanent("no metrics for entity".to_string())),
                };
                (id.clone(), result)
            })
            .collect()
    }

    async fn set_entity_status(
        &self,
        entity_id: &EntityId,
        target: TargetStatus,
        key: &IdempotencyKey,
    ) -> Result<StatusAck, PlatformError> {
        self.limiter.until_ready().await;

        let url = format!(
            "{}/v1/customers/{}/entities/{}:setStatus",
            self.endpoint,
            self.customer_id,
            entity_id.as_str()
        );
        let body = SetStatusRequest {
            status: target.as_str(),
            idempotency_key: key.to_string(),
        };

        let response = self
            .request(url, body)
            .send()
            .await
            .map_err(|err| PlatformError::Transient(format!("request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(platform_error_for_status(status));
        }

        let parsed: SetStatusResponse = response
            .json()
            .await
            .map_err(|err| PlatformError::Rejected(format!("malformed response: {err}")))?;

        Ok(StatusAck {
            entity_id: entity_id.clone(),
            target,
            changed: parsed.changed,
        })
    }
}
