// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtara Fleet - Worker Node Lifecycle Supervision
//!
//! This crate provides the control plane for the fleet of worker nodes that
//! execute tenant integration scripts. It reconciles the observed state of
//! every node against the intent expressed by the active deployment: nodes
//! running a superseded deployment are drained and replaced, stuck nodes are
//! recovered through per-state timeouts, and terminal rows are eventually
//! garbage-collected.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        Deployment API / Router                       │
//! │                     (external, not in this crate)                    │
//! └─────────────────────────────────────────────────────────────────────┘
//!            │ create deployment                  │ register / idle
//!            ▼                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      runtara-fleet (This Crate)                      │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────┐  ┌───────────┐  │
//! │  │  Deployment  │  │     Node     │  │ Supervisor │  │ Scheduler │  │
//! │  │   Registry   │  │   Registry   │  │   tick()   │  │   Loop    │  │
//! │  └──────────────┘  └──────────────┘  └────────────┘  └───────────┘  │
//! └─────────────────────────────────────────────────────────────────────┘
//!            │                                    │ start / terminate
//!            ▼                                    ▼
//! ┌───────────────────────────┐       ┌──────────────────────────────────┐
//! │        PostgreSQL         │       │           Provisioner            │
//! │  (deployments, nodes)     │       │  (Kubernetes, Fargate, mock, …)  │
//! └───────────────────────────┘       └──────────────────────────────────┘
//! ```
//!
//! # Node State Machine
//!
//! ```text
//!                  ┌─────────┐
//!                  │ PENDING │─────────────┐
//!                  └────┬────┘             │ start rejected
//!                 start │                  ▼
//!                       ▼             ┌────────┐
//!                  ┌──────────┐──────▶│ ERROR  │◀─────────┐
//!                  │ STARTING │timeout└────────┘          │
//!                  └────┬─────┘            ▲              │
//!              register │                  │ fault        │ terminate
//!                       ▼                  │              │ retries
//!                  ┌─────────┐─────────────┘              │ exhausted
//!        ┌─────────│ RUNNING │──────────┐                 │
//!        │         └─────────┘          │ drained         │
//!        │ deployment                   │                 │
//!        │ superseded                   ▼                 │
//!        ▼                         ┌─────────┐            │
//!  ┌──────────┐    drained         │  IDLE   │────────────┘
//!  │ OUTDATED │───────────────────▶└────┬────┘
//!  └──────────┘                         │ terminate
//!                                       ▼
//!                                ┌────────────┐
//!                                │ TERMINATED │
//!                                └────────────┘
//! ```
//!
//! `TERMINATED` and `ERROR` are terminal; their rows are removed once the
//! retention timeout elapses. Every transition is a conditional update keyed
//! on the observed state, so concurrent supervisors cannot double-apply an
//! edge.
//!
//! # Rollover
//!
//! Creating a deployment supersedes all others in one transaction. On the
//! next tick the supervisor marks nodes of superseded deployments outdated
//! (their runtimes drain in-flight work) and creates pending replacements on
//! the active deployment under the same routing id, so external routing
//! tables stay stable across the rollover.
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `RUNTARA_FLEET_DATABASE_URL` | Yes | - | PostgreSQL connection string |
//! | `RUNTARA_FLEET_DB_POOL_SIZE` | No | `10` | Connection pool size |
//! | `RUNTARA_FLEET_PROVISIONER` | No | `mock` | Provisioner backend for the daemon |
//! | `RUNTARA_FLEET_TICK_INTERVAL_MS` | No | `1000` | Interval between reconciliation ticks |
//! | `RUNTARA_FLEET_PENDING_TIMEOUT_MS` | No | 5 min | Stuck-start warning threshold |
//! | `RUNTARA_FLEET_STARTING_TIMEOUT_MS` | No | 10 min | Startup failure threshold |
//! | `RUNTARA_FLEET_OUTDATED_TIMEOUT_MS` | No | 24 h | Drain grace period |
//! | `RUNTARA_FLEET_IDLE_TIMEOUT_MS` | No | 5 min | Terminate retry budget |
//! | `RUNTARA_FLEET_TERMINAL_TIMEOUT_MS` | No | 7 days | Terminal row retention |
//!
//! # Modules
//!
//! - [`config`]: Daemon configuration from environment variables
//! - [`db`]: Connection helpers and health check
//! - [`deployments`]: Deployment registry (append-only, one active)
//! - [`error`]: Error types for fleet operations
//! - [`nodes`]: Node registry and the conditional transition primitive
//! - [`provisioner`]: Abstract compute backend contract and the mock backend
//! - [`runtime`]: Embeddable runtime for applications with custom backends
//! - [`scheduler`]: Periodic loop driving the supervisor
//! - [`supervisor`]: The reconciliation engine

#![deny(missing_docs)]

/// Daemon configuration loaded from environment variables.
pub mod config;

/// Database connection helpers.
pub mod db;

/// Deployment registry.
pub mod deployments;

/// Error types for fleet operations.
pub mod error;

/// Database migrations for runtara-fleet.
pub mod migrations;

/// Node registry.
pub mod nodes;

/// Node provisioner backends.
pub mod provisioner;

/// Embeddable runtime for runtara-fleet.
pub mod runtime;

/// Scheduler loop driving the supervisor.
pub mod scheduler;

/// Fleet supervisor - the reconciliation engine.
pub mod supervisor;

pub use config::Config;
pub use deployments::{Deployment, DeploymentStore};
pub use error::{Error, Result};
pub use nodes::{Node, NodeFilter, NodeSearchResult, NodeState, NodeStore, TransitionOptions};
pub use provisioner::{MockProvisioner, Provisioner, ProvisionerError};
pub use runtime::FleetRuntime;
pub use scheduler::{Scheduler, SchedulerConfig};
pub use supervisor::{StateTimeouts, Supervisor};
