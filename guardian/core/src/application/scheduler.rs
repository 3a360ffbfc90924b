// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! The guardian runtime: a single background scheduler driving ticks.
//!
//! Ticks never run concurrently. If one is still in flight when the next is
//! due, the new tick is skipped and logged — never queued — so at most one
//! mutation stream is in flight against the platform per guardian instance.
//! The runtime is an explicit process-wide context object: `init` loads
//! persisted state, `shutdown` cancels the loop and waits out any in-flight
//! tick.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::application::guardian::GuardianService;
use crate::domain::config::GuardianConfig;
use crate::domain::decision::TickOutcome;

pub struct GuardianRuntime {
    service: Arc<GuardianService>,
    enabled: AtomicBool,
    tick_gate: Mutex<()>,
    cancel: CancellationToken,
    handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
    tick_interval: std::time::Duration,
}

impl GuardianRuntime {
    pub fn new(config: &GuardianConfig, service: Arc<GuardianService>) -> Arc<Self> {
        Arc::new(Self {
            service,
            enabled: AtomicBool::new(config.start_enabled),
            tick_gate: Mutex::new(()),
            cancel: CancellationToken::new(),
            handle: parking_lot::Mutex::new(None),
            tick_interval: config.tick_interval,
        })
    }

    pub fn service(&self) -> &Arc<GuardianService> {
        &self.service
    }

    /// Load persisted state and start the scheduler loop.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.service
            .init()
            .await
            .context("failed to initialize guardian state")?;

        let runtime = Arc::clone(self);
        let handle = tokio::spawn(async move {
            runtime.run_loop().await;
        });
        *self.handle.lock() = Some(handle);

        info!(
            interval = ?self.tick_interval,
            enabled = self.is_enabled(),
            "guardian scheduler started"
        );
        Ok(())
    }

    async fn run_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first interval tick fires immediately; skip it so startup does
        // not double-fire with an operator run-now.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("guardian scheduler stopping");
                    break;
                }
                _ = interval.tick() => {
                    self.fire().await;
                }
            }
        }
    }

    async fn fire(&self) {
        if !self.is_enabled() {
            info!("guardian disabled, skipping tick");
            if let Err(err) = self.service.record_skip("guardian disabled").await {
                error!(error = %err, "failed to record disabled skip");
            }
            return;
        }

        // Never queue behind an in-flight tick.
        let Ok(_guard) = self.tick_gate.try_lock() else {
            warn!("previous tick still running, skipping this one");
            if let Err(err) = self.service.record_skip("previous tick still in flight").await {
                error!(error = %err, "failed to record overlap skip");
            }
            return;
        };

        if let Err(err) = self.service.run_tick().await {
            error!(error = %err, "tick failed");
        }
    }

    /// Run one tick immediately (operator run-now), regardless of the
    /// enabled flag. Waits for any in-flight tick to finish first.
    pub async fn run_now(&self) -> Result<TickOutcome> {
        let _guard = self.tick_gate.lock().await;
        self.service.run_tick().await
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
        info!("guardian enabled");
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        info!("guardian disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Stop the scheduler and wait for any in-flight tick to flush.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!(error = %err, "scheduler task panicked");
            }
        }
        // Block until an in-flight tick (run-now included) has finished.
        let _guard = self.tick_gate.lock().await;
        info!("guardian runtime stopped");
    }
}
