// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Profit Guardian core
//!
//! Autonomous budget-pacing and profitability-guard control loop for managed
//! advertising entities. The guardian observes spend and performance signals
//! on a fixed tick, pauses entities that burn capital without converting,
//! resumes them once they recover, and trips a campaign-wide circuit halt
//! when rolling losses breach the configured limits.
//!
//! # Architecture
//!
//! - **domain** — entities, signals, decisions, ledgers, persistence and
//!   platform contracts
//! - **application** — the tick pipeline (fetch, evaluate, protect, decide,
//!   apply) and the scheduler runtime
//! - **infrastructure** — repositories (in-memory, PostgreSQL), the ads
//!   platform gateway, the event bus and the webhook notifier
//! - **presentation** — the HTTP status/control API

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
