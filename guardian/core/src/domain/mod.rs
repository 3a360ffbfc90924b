// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod config;
pub mod decision;
pub mod entity;
pub mod ledger;
pub mod metrics;
pub mod platform;
pub mod signal;
pub mod store;

pub use config::{GuardianConfig, GuardianManifest, ConfigError};
pub use decision::{ActionIntent, ApplyStatus, GuardianDecision, ReasonCode, TickId, TickOutcome, TickStatus};
pub use entity::{CampaignId, EntityId, EntityKind, EntityLifecycleState, ManagedEntity};
pub use ledger::{LedgerEntry, LossBreach, LossLedger};
pub use metrics::{MetricsSnapshot, ReportingWindow};
pub use platform::{AdsPlatform, FetchError, IdempotencyKey, PlatformError, StatusAck, TargetStatus};
pub use signal::{Confidence, PacingState, PerformanceRating, ProfitabilitySignal, SignalBasis, SignalVerdict};
pub use store::{EntityRegistry, StateStore, StoreError, TickCommit};
