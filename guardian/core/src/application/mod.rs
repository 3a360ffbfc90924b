// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod applier;
pub mod engine;
pub mod evaluator;
pub mod fetcher;
pub mod guardian;
pub mod protector;
pub mod queries;
pub mod scheduler;

pub use applier::{ActionApplier, ActionRequest, backoff_delay};
pub use engine::{DecisionEngine, EngineInput, HaltDirective, Streaks};
pub use evaluator::{EntityEvaluation, PerformanceEvaluator};
pub use fetcher::SnapshotFetcher;
pub use guardian::GuardianService;
pub use protector::{CapitalProtector, ProtectionReport};
pub use queries::GuardianQueryService;
pub use scheduler::GuardianRuntime;
