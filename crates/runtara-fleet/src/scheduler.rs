// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scheduler loop driving the supervisor.
//!
//! A single long-lived task runs [`Supervisor::tick`] at a fixed interval.
//! Ticks are strictly serial: the next interval only starts counting once
//! the previous tick has completed. On shutdown the in-flight tick is
//! allowed to finish.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{error, info};

use crate::supervisor::Supervisor;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between reconciliation ticks.
    pub tick_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
        }
    }
}

impl SchedulerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `RUNTARA_FLEET_TICK_INTERVAL_MS`: milliseconds between ticks (default: 1000)
    pub fn from_env() -> Self {
        let tick_interval_ms = std::env::var("RUNTARA_FLEET_TICK_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1000);

        Self {
            tick_interval: Duration::from_millis(tick_interval_ms),
        }
    }
}

/// Background task that periodically reconciles the fleet.
pub struct Scheduler {
    supervisor: Arc<Supervisor>,
    config: SchedulerConfig,
    shutdown: Arc<Notify>,
}

impl Scheduler {
    /// Create a new scheduler.
    pub fn new(supervisor: Arc<Supervisor>, config: SchedulerConfig) -> Self {
        Self {
            supervisor,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the scheduler loop.
    ///
    /// The loop exits when the shutdown signal is received; an in-flight
    /// tick completes before the loop returns.
    pub async fn run(&self) {
        info!(
            tick_interval_ms = self.config.tick_interval.as_millis() as u64,
            "Fleet scheduler started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Fleet scheduler received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.tick_interval) => {
                    if let Err(e) = self.supervisor.tick().await {
                        error!(error = %e, "Reconciliation tick failed");
                    }
                }
            }
        }

        info!("Fleet scheduler stopped");
    }
}
