// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fleet supervisor — the reconciliation engine.
//!
//! Each [`tick`](Supervisor::tick) scans the node registry by state and
//! drives nodes through their lifecycle: pending nodes are started, stalled
//! startups are failed, nodes on superseded deployments are marked outdated
//! and replaced, drained nodes are terminated, and expired terminal rows are
//! garbage-collected.
//!
//! Every mutation is a conditional transition at the store, so a tick is
//! crash-safe at any point and multiple supervisors can run concurrently:
//! whoever loses a race observes a benign transition error and moves on. An
//! error on one node never aborts the rest of the tick; the failing node is
//! simply reconsidered on the next tick. Recovery from stuck states uses a
//! single signal, the age of the node's last state transition.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, error, info, warn};

use crate::deployments::{Deployment, DeploymentStore};
use crate::error::{Error, Result};
use crate::nodes::{NodeFilter, NodeState, NodeStore, TransitionOptions};
use crate::provisioner::Provisioner;

/// Per-state timeouts, measured against `last_state_transition_at`.
#[derive(Debug, Clone)]
pub struct StateTimeouts {
    /// How long a node may sit in `Pending` before its start attempts are
    /// flagged as stuck.
    pub pending: Duration,
    /// How long a node may sit in `Starting` before it is failed.
    pub starting: Duration,
    /// Grace period for draining; an `Outdated` node older than this is
    /// forced to `Idle`.
    pub outdated: Duration,
    /// Terminate retry budget; an `Idle` node older than this whose
    /// terminate keeps failing is failed.
    pub idle: Duration,
    /// Retention for `Terminated` and `Error` rows before removal.
    pub terminal: Duration,
}

impl Default for StateTimeouts {
    fn default() -> Self {
        Self {
            pending: Duration::from_secs(5 * 60),
            starting: Duration::from_secs(10 * 60),
            outdated: Duration::from_secs(24 * 3600),
            idle: Duration::from_secs(5 * 60),
            terminal: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

impl StateTimeouts {
    /// Load timeouts from environment variables, falling back to defaults.
    ///
    /// Environment variables (all in milliseconds):
    /// - `RUNTARA_FLEET_PENDING_TIMEOUT_MS`
    /// - `RUNTARA_FLEET_STARTING_TIMEOUT_MS`
    /// - `RUNTARA_FLEET_OUTDATED_TIMEOUT_MS`
    /// - `RUNTARA_FLEET_IDLE_TIMEOUT_MS`
    /// - `RUNTARA_FLEET_TERMINAL_TIMEOUT_MS`
    pub fn from_env() -> Self {
        fn env_ms(key: &str, default: Duration) -> Duration {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        }

        let defaults = Self::default();
        Self {
            pending: env_ms("RUNTARA_FLEET_PENDING_TIMEOUT_MS", defaults.pending),
            starting: env_ms("RUNTARA_FLEET_STARTING_TIMEOUT_MS", defaults.starting),
            outdated: env_ms("RUNTARA_FLEET_OUTDATED_TIMEOUT_MS", defaults.outdated),
            idle: env_ms("RUNTARA_FLEET_IDLE_TIMEOUT_MS", defaults.idle),
            terminal: env_ms("RUNTARA_FLEET_TERMINAL_TIMEOUT_MS", defaults.terminal),
        }
    }
}

/// The reconciliation engine driving the node fleet towards the active
/// deployment.
pub struct Supervisor {
    deployments: DeploymentStore,
    nodes: NodeStore,
    provisioner: Arc<dyn Provisioner>,
    timeouts: StateTimeouts,
}

impl Supervisor {
    /// Create a new supervisor.
    pub fn new(pool: PgPool, provisioner: Arc<dyn Provisioner>, timeouts: StateTimeouts) -> Self {
        Self {
            deployments: DeploymentStore::new(pool.clone()),
            nodes: NodeStore::new(pool),
            provisioner,
            timeouts,
        }
    }

    /// Run one reconciliation pass over the whole fleet.
    ///
    /// Fails only when the active deployment cannot be loaded; every other
    /// error is contained to its step, logged, and retried on the next tick.
    pub async fn tick(&self) -> Result<()> {
        let active = self.deployments.get_active().await?;

        if let Err(e) = self.start_pending().await {
            error!(error = %e, "Failed to process pending nodes");
        }
        if let Err(e) = self.fail_stalled_starting().await {
            error!(error = %e, "Failed to process stalled starting nodes");
        }

        match &active {
            Some(active) => {
                if let Err(e) = self.mark_outdated(active).await {
                    error!(error = %e, "Failed to mark outdated nodes");
                }
                if let Err(e) = self.replace_superseded(active).await {
                    error!(error = %e, "Failed to create replacement nodes");
                }
            }
            None => {
                warn!("No active deployment; skipping rollover steps");
            }
        }

        if let Err(e) = self.escalate_stuck_outdated().await {
            error!(error = %e, "Failed to escalate stuck outdated nodes");
        }
        if let Err(e) = self.terminate_idle().await {
            error!(error = %e, "Failed to process idle nodes");
        }
        if let Err(e) = self.collect_terminal().await {
            error!(error = %e, "Failed to garbage-collect terminal nodes");
        }

        Ok(())
    }

    /// Ask the provisioner to start every pending node.
    ///
    /// Transient start failures leave the node pending for the next tick;
    /// a terminal rejection fails the node immediately.
    async fn start_pending(&self) -> Result<()> {
        let pending = self
            .nodes
            .search(&NodeFilter::in_states(&[NodeState::Pending]))
            .await?
            .flatten();

        for node in pending {
            match self.provisioner.start(&node).await {
                Ok(()) => {
                    self.apply(
                        node.id,
                        NodeState::Pending,
                        NodeState::Starting,
                        TransitionOptions::default(),
                    )
                    .await;
                }
                Err(e) if e.is_terminal() => {
                    warn!(
                        node_id = node.id,
                        routing_id = %node.routing_id,
                        error = %e,
                        "Provisioner rejected node start, failing node"
                    );
                    self.apply(
                        node.id,
                        NodeState::Pending,
                        NodeState::Error,
                        TransitionOptions {
                            error: Some(e.to_string()),
                            ..TransitionOptions::default()
                        },
                    )
                    .await;
                }
                Err(e) => {
                    let stuck = node.last_state_transition_at < self.cutoff(self.timeouts.pending)?;
                    warn!(
                        node_id = node.id,
                        routing_id = %node.routing_id,
                        stuck = stuck,
                        error = %e,
                        "Failed to start node, will retry next tick"
                    );
                }
            }
        }

        Ok(())
    }

    /// Fail nodes that have been starting for longer than the startup
    /// timeout. Their compute never registered; the provisioner presumably
    /// hung or lost the request.
    async fn fail_stalled_starting(&self) -> Result<()> {
        let stalled = self
            .nodes
            .search(
                &NodeFilter::in_states(&[NodeState::Starting])
                    .older_than(self.cutoff(self.timeouts.starting)?),
            )
            .await?
            .flatten();

        for node in stalled {
            warn!(
                node_id = node.id,
                routing_id = %node.routing_id,
                since = %node.last_state_transition_at,
                "Node startup timed out, failing node"
            );
            self.apply(
                node.id,
                NodeState::Starting,
                NodeState::Error,
                TransitionOptions {
                    error: Some(format!(
                        "startup timed out after {}s",
                        self.timeouts.starting.as_secs()
                    )),
                    ..TransitionOptions::default()
                },
            )
            .await;
        }

        Ok(())
    }

    /// Mark running nodes whose deployment is no longer active as outdated
    /// so their runtimes begin draining.
    async fn mark_outdated(&self, active: &Deployment) -> Result<()> {
        let running = self
            .nodes
            .search(&NodeFilter::in_states(&[NodeState::Running]))
            .await?
            .flatten();

        for node in running {
            if node.deployment_id == active.id {
                continue;
            }
            info!(
                node_id = node.id,
                routing_id = %node.routing_id,
                deployment_id = node.deployment_id,
                active_deployment_id = active.id,
                "Node deployment superseded, marking outdated"
            );
            self.apply(
                node.id,
                NodeState::Running,
                NodeState::Outdated,
                TransitionOptions::default(),
            )
            .await;
        }

        Ok(())
    }

    /// Create replacement nodes on the active deployment for every routing id
    /// that has no live node there, preserving capacity across rollovers.
    ///
    /// A routing id is covered while any of its nodes on the active
    /// deployment is pending, starting, running, or still draining towards
    /// termination; only when all of them are gone or terminal does a fresh
    /// pending node get created.
    async fn replace_superseded(&self, active: &Deployment) -> Result<()> {
        const COVERING: [NodeState; 4] = [
            NodeState::Pending,
            NodeState::Starting,
            NodeState::Running,
            NodeState::Idle,
        ];

        let all = self.nodes.search(&NodeFilter::default()).await?;

        for (routing_id, by_state) in all.by_routing_id() {
            let covered = COVERING.iter().any(|state| {
                by_state
                    .get(state)
                    .is_some_and(|nodes| nodes.iter().any(|n| n.deployment_id == active.id))
            });
            if covered {
                continue;
            }

            info!(
                routing_id = %routing_id,
                deployment_id = active.id,
                "Creating replacement node on active deployment"
            );
            if let Err(e) = self.nodes.create(routing_id, active.id).await {
                error!(
                    routing_id = %routing_id,
                    error = %e,
                    "Failed to create replacement node"
                );
            }
        }

        Ok(())
    }

    /// Force outdated nodes that exceeded the drain grace period to idle so
    /// they get terminated. In-flight work on such a node is abandoned.
    async fn escalate_stuck_outdated(&self) -> Result<()> {
        let stuck = self
            .nodes
            .search(
                &NodeFilter::in_states(&[NodeState::Outdated])
                    .older_than(self.cutoff(self.timeouts.outdated)?),
            )
            .await?
            .flatten();

        for node in stuck {
            warn!(
                node_id = node.id,
                routing_id = %node.routing_id,
                since = %node.last_state_transition_at,
                "Outdated node exceeded drain grace period, forcing idle"
            );
            self.apply(
                node.id,
                NodeState::Outdated,
                NodeState::Idle,
                TransitionOptions::default(),
            )
            .await;
        }

        Ok(())
    }

    /// Ask the provisioner to terminate every idle node. A node whose
    /// terminate keeps failing past the idle timeout is failed instead of
    /// retried forever.
    async fn terminate_idle(&self) -> Result<()> {
        let idle = self
            .nodes
            .search(&NodeFilter::in_states(&[NodeState::Idle]))
            .await?
            .flatten();

        for node in idle {
            match self.provisioner.terminate(&node).await {
                Ok(()) => {
                    self.apply(
                        node.id,
                        NodeState::Idle,
                        NodeState::Terminated,
                        TransitionOptions::default(),
                    )
                    .await;
                }
                Err(e) => {
                    if node.last_state_transition_at < self.cutoff(self.timeouts.idle)? {
                        warn!(
                            node_id = node.id,
                            routing_id = %node.routing_id,
                            error = %e,
                            "Terminate retry budget exhausted, failing node"
                        );
                        self.apply(
                            node.id,
                            NodeState::Idle,
                            NodeState::Error,
                            TransitionOptions {
                                error: Some(e.to_string()),
                                ..TransitionOptions::default()
                            },
                        )
                        .await;
                    } else {
                        warn!(
                            node_id = node.id,
                            routing_id = %node.routing_id,
                            error = %e,
                            "Failed to terminate node, will retry next tick"
                        );
                    }
                }
            }
        }

        Ok(())
    }

    /// Remove terminal rows older than the retention period.
    async fn collect_terminal(&self) -> Result<()> {
        let expired = self
            .nodes
            .search(
                &NodeFilter::in_states(&[NodeState::Terminated, NodeState::Error])
                    .older_than(self.cutoff(self.timeouts.terminal)?),
            )
            .await?
            .flatten();

        let count = expired.len();
        for node in expired {
            match self.nodes.remove(node.id).await {
                Ok(()) => {}
                Err(e) if e.is_benign_race() => {
                    debug!(node_id = node.id, "Node already removed");
                }
                Err(e) => {
                    error!(node_id = node.id, error = %e, "Failed to remove node");
                }
            }
        }

        if count > 0 {
            info!(count = count, "Garbage-collected terminal nodes");
        }

        Ok(())
    }

    /// Apply a conditional transition, logging lost races at debug level and
    /// real failures at error level. Either way the tick moves on; the node
    /// is reconsidered next time.
    async fn apply(&self, node_id: i64, from: NodeState, to: NodeState, opts: TransitionOptions) {
        match self.nodes.transition(node_id, from, to, opts).await {
            Ok(_) => {}
            Err(e) if e.is_benign_race() => {
                debug!(
                    node_id = node_id,
                    from = %from,
                    to = %to,
                    "Skipping transition, node changed concurrently"
                );
            }
            Err(e) => {
                error!(
                    node_id = node_id,
                    from = %from,
                    to = %to,
                    error = %e,
                    "Node transition failed"
                );
            }
        }
    }

    fn cutoff(&self, timeout: Duration) -> Result<DateTime<Utc>> {
        let timeout = chrono::Duration::from_std(timeout)
            .map_err(|e| Error::Other(format!("Invalid timeout duration: {}", e)))?;
        Ok(Utc::now() - timeout)
    }
}
