// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for runtara-fleet.
//!
//! This module provides [`FleetRuntime`] which allows embedding the fleet
//! supervisor into an existing tokio application, typically to supply a
//! custom [`Provisioner`] backend instead of running the standalone daemon.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use runtara_fleet::runtime::FleetRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool = sqlx::PgPool::connect("postgres://...").await?;
//!     let provisioner = Arc::new(MyKubernetesProvisioner::from_env());
//!
//!     let runtime = FleetRuntime::builder()
//!         .pool(pool)
//!         .provisioner(provisioner)
//!         .build()?
//!         .start();
//!
//!     // ... run your application ...
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use anyhow::Result;
use sqlx::PgPool;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::provisioner::Provisioner;
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::supervisor::{StateTimeouts, Supervisor};

/// Builder for creating a [`FleetRuntime`].
#[derive(Default)]
pub struct FleetRuntimeBuilder {
    pool: Option<PgPool>,
    provisioner: Option<Arc<dyn Provisioner>>,
    scheduler_config: Option<SchedulerConfig>,
    timeouts: Option<StateTimeouts>,
}

impl FleetRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the PostgreSQL connection pool (required).
    pub fn pool(mut self, pool: PgPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Set the node provisioner backend (required).
    pub fn provisioner(mut self, provisioner: Arc<dyn Provisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    /// Set the scheduler configuration.
    ///
    /// Default: 1 second tick interval.
    pub fn scheduler_config(mut self, config: SchedulerConfig) -> Self {
        self.scheduler_config = Some(config);
        self
    }

    /// Set the per-state timeouts.
    ///
    /// Default: [`StateTimeouts::default`].
    pub fn timeouts(mut self, timeouts: StateTimeouts) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<FleetRuntimeConfig> {
        let pool = self
            .pool
            .ok_or_else(|| anyhow::anyhow!("pool is required"))?;
        let provisioner = self
            .provisioner
            .ok_or_else(|| anyhow::anyhow!("provisioner is required"))?;

        Ok(FleetRuntimeConfig {
            pool,
            provisioner,
            scheduler_config: self.scheduler_config.unwrap_or_default(),
            timeouts: self.timeouts.unwrap_or_default(),
        })
    }
}

/// Configuration for a [`FleetRuntime`].
pub struct FleetRuntimeConfig {
    pool: PgPool,
    provisioner: Arc<dyn Provisioner>,
    scheduler_config: SchedulerConfig,
    timeouts: StateTimeouts,
}

impl FleetRuntimeConfig {
    /// Start the runtime, spawning the scheduler task.
    pub fn start(self) -> FleetRuntime {
        let supervisor = Arc::new(Supervisor::new(
            self.pool,
            self.provisioner.clone(),
            self.timeouts,
        ));
        let scheduler = Scheduler::new(supervisor.clone(), self.scheduler_config);
        let shutdown = scheduler.shutdown_handle();

        let scheduler_handle = tokio::spawn(async move {
            scheduler.run().await;
        });

        info!(
            provisioner_type = self.provisioner.provisioner_type(),
            "FleetRuntime started"
        );

        FleetRuntime {
            supervisor,
            scheduler_handle,
            shutdown,
        }
    }
}

/// A running fleet supervisor that can be embedded in an application.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination; the in-flight
/// reconciliation tick completes before the task exits.
pub struct FleetRuntime {
    supervisor: Arc<Supervisor>,
    scheduler_handle: JoinHandle<()>,
    shutdown: Arc<Notify>,
}

impl FleetRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> FleetRuntimeBuilder {
        FleetRuntimeBuilder::new()
    }

    /// Get a reference to the supervisor, e.g. to trigger an out-of-band
    /// reconciliation tick.
    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    /// Gracefully shut down the runtime.
    pub async fn shutdown(self) -> Result<()> {
        info!("FleetRuntime shutting down...");

        self.shutdown.notify_one();

        if let Err(e) = self.scheduler_handle.await {
            error!("Scheduler task panicked: {}", e);
            return Err(anyhow::anyhow!("scheduler task panicked: {}", e));
        }

        info!("FleetRuntime shutdown complete");
        Ok(())
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        !self.scheduler_handle.is_finished()
    }
}
