// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtara Fleet - Worker Node Supervision Daemon
//!
//! A long-running process responsible for:
//! - Reconciling worker nodes against the active deployment
//! - Starting pending nodes and replacing superseded ones
//! - Recovering stuck nodes through per-state timeouts
//! - Garbage-collecting expired terminal rows

use std::sync::Arc;

use tracing::{info, warn};

use runtara_fleet::config::{Config, ConfigError};
use runtara_fleet::provisioner::{MockProvisioner, Provisioner};
use runtara_fleet::runtime::FleetRuntime;
use runtara_fleet::scheduler::SchedulerConfig;
use runtara_fleet::supervisor::StateTimeouts;
use runtara_fleet::{db, migrations};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "runtara_fleet=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    // Load configuration
    let config = Config::from_env()?;
    let scheduler_config = SchedulerConfig::from_env();
    let timeouts = StateTimeouts::from_env();

    info!(
        provisioner = %config.provisioner,
        tick_interval_ms = scheduler_config.tick_interval.as_millis() as u64,
        "Starting Runtara Fleet"
    );

    // Connect to database
    let pool = db::connect(&config).await?;
    db::health_check(&pool).await?;
    info!("Connected to database");

    // Apply schema migrations
    migrations::run(&pool).await?;
    info!("Database schema verified");

    // Resolve the provisioner backend. Real backends are supplied by
    // embedding the crate; the standalone daemon only knows the mock.
    let provisioner: Arc<dyn Provisioner> = match config.provisioner.as_str() {
        "mock" => Arc::new(MockProvisioner::new()),
        other => {
            return Err(ConfigError::UnsupportedProvisioner(other.to_string()).into());
        }
    };
    info!(
        provisioner_type = provisioner.provisioner_type(),
        "Provisioner initialized"
    );

    // Start the runtime
    let runtime = FleetRuntime::builder()
        .pool(pool)
        .provisioner(provisioner)
        .scheduler_config(scheduler_config)
        .timeouts(timeouts)
        .build()?
        .start();

    info!("Fleet supervisor ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // Graceful shutdown; the in-flight tick completes first
    runtime.shutdown().await?;

    info!("Runtara Fleet shut down");

    Ok(())
}
