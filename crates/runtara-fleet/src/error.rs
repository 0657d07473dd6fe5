// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for runtara-fleet.

use thiserror::Error;

use crate::nodes::NodeState;

/// Fleet errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Deployment creation transaction failed.
    #[error("Failed to create deployment: {0}")]
    DeploymentCreation(#[source] sqlx::Error),

    /// Active-deployment lookup failed.
    #[error("Failed to load active deployment: {0}")]
    DeploymentGetActive(#[source] sqlx::Error),

    /// Deployment was not found.
    #[error("Deployment not found: {0}")]
    DeploymentNotFound(i64),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Node was not found.
    #[error("Node not found: {0}")]
    NodeNotFound(i64),

    /// A conditional state transition was rejected, either because the edge
    /// is not part of the state machine or because a concurrent mutator won
    /// the race and the node is no longer in the expected state.
    #[error("Invalid node transition: node {id} cannot go {from} -> {to}")]
    NodeTransitionInvalid {
        /// Node ID.
        id: i64,
        /// State the caller expected the node to be in.
        from: NodeState,
        /// Requested target state.
        to: NodeState,
    },

    /// Attempted to remove a node that is not in a terminal state.
    #[error("Node {id} is not in a terminal state (currently {state})")]
    NodeNotTerminal {
        /// Node ID.
        id: i64,
        /// State the node is actually in.
        state: NodeState,
    },

    /// Provisioner (compute backend) operation failed.
    #[error("Provisioner error: {0}")]
    Provisioner(#[from] crate::provisioner::ProvisionerError),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error is an expected outcome of racing another mutator
    /// rather than a fault: a lost conditional transition, or a node that was
    /// removed between the scan and the mutation.
    pub fn is_benign_race(&self) -> bool {
        matches!(
            self,
            Error::NodeTransitionInvalid { .. } | Error::NodeNotFound(_)
        )
    }
}

/// Result type using the fleet [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
