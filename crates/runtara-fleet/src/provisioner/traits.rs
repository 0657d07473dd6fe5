// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provisioner trait definition.

use async_trait::async_trait;
use thiserror::Error;

use crate::nodes::Node;

/// Errors from provisioner operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProvisionerError {
    /// Start failed but may succeed on a later attempt (backend unavailable,
    /// transient API error). The node stays pending and is retried.
    #[error("Failed to start node: {0}")]
    StartFailed(String),

    /// The backend definitively refused to start the node (quota exhausted,
    /// rejected deployment artifact). Retrying is pointless; the node is
    /// failed immediately.
    #[error("Node start rejected: {0}")]
    StartRejected(String),

    /// Terminate failed; the node stays idle and is retried.
    #[error("Failed to terminate node: {0}")]
    TerminateFailed(String),
}

impl ProvisionerError {
    /// Whether this failure is terminal for the node, as opposed to a
    /// transient condition the next tick should retry.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProvisionerError::StartRejected(_))
    }
}

/// Result type for provisioner operations.
pub type Result<T> = std::result::Result<T, ProvisionerError>;

/// External capability that creates and destroys node compute.
///
/// Both operations must be idempotent with respect to the node `id`: the
/// supervisor retries across ticks and restarts, so a backend may see the
/// same call twice. Neither call is required to complete its effect
/// synchronously; a started node announces readiness by registering its url,
/// and the supervisor's state timeouts catch backends that hang.
///
/// Provisioners are pure compute plumbing. They never touch the node
/// registry; all bookkeeping is handled by the supervisor.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Backend identifier (e.g. "kubernetes", "mock").
    fn provisioner_type(&self) -> &'static str;

    /// Begin creating the compute for a node. The node will call back with
    /// its url once its runtime is ready.
    async fn start(&self, node: &Node) -> Result<()>;

    /// Begin shutting down the compute for a node. Must tolerate repeated
    /// calls and nodes whose compute no longer exists.
    async fn terminate(&self, node: &Node) -> Result<()>;
}
