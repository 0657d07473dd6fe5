// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Node registry.
//!
//! PostgreSQL-backed registry of worker nodes. Every node carries a state, a
//! routing id (the logical slot it fills), a reference to the deployment it
//! runs, and the timestamp of its last state transition.
//!
//! All mutation flows through [`NodeStore::transition`], a single conditional
//! update that only succeeds when the node is still in the state the caller
//! observed. Concurrent supervisors therefore serialize per (node, edge): one
//! wins, the others see [`Error::NodeTransitionInvalid`] and move on.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::error::{Error, Result};

/// Lifecycle state of a worker node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    /// Created, waiting for the provisioner to start the underlying compute.
    Pending,
    /// Compute is starting; the node has not registered its url yet.
    Starting,
    /// Registered and accepting work.
    Running,
    /// The node's deployment is no longer active; draining in-flight work.
    Outdated,
    /// Drained; waiting to be terminated.
    Idle,
    /// Terminated by the provisioner. Terminal.
    Terminated,
    /// Failed. Terminal.
    Error,
}

impl NodeState {
    /// Returns the string representation stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Outdated => "outdated",
            Self::Idle => "idle",
            Self::Terminated => "terminated",
            Self::Error => "error",
        }
    }

    /// Parse a state from its database representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "starting" => Some(Self::Starting),
            "running" => Some(Self::Running),
            "outdated" => Some(Self::Outdated),
            "idle" => Some(Self::Idle),
            "terminated" => Some(Self::Terminated),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Whether the edge `self -> to` is part of the node state machine.
    pub fn can_transition_to(self, to: NodeState) -> bool {
        use NodeState::*;
        matches!(
            (self, to),
            (Pending, Starting)
                | (Pending, Error)
                | (Starting, Running)
                | (Starting, Error)
                | (Running, Outdated)
                | (Running, Idle)
                | (Running, Error)
                | (Outdated, Idle)
                | (Idle, Terminated)
                | (Idle, Error)
        )
    }

    /// Whether this state is terminal (node only awaits garbage collection).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated | Self::Error)
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A worker node record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique node ID.
    pub id: i64,
    /// Logical slot this node fills. Preserved across rollovers so external
    /// routing tables stay stable; multiple physical nodes may share a
    /// routing id while a rollover is in flight.
    pub routing_id: String,
    /// Deployment this node runs.
    pub deployment_id: i64,
    /// Current lifecycle state.
    pub state: NodeState,
    /// Address at which a running node accepts work. Null until registered.
    pub url: Option<String>,
    /// Diagnostic message, populated when the node enters [`NodeState::Error`].
    pub error: Option<String>,
    /// When the node record was created.
    pub created_at: DateTime<Utc>,
    /// When the node last changed state. Drives every timeout decision.
    pub last_state_transition_at: DateTime<Utc>,
}

/// Raw node row; `state` is decoded separately so unknown values surface as
/// errors instead of panics.
#[derive(Debug, sqlx::FromRow)]
struct NodeRow {
    id: i64,
    routing_id: String,
    deployment_id: i64,
    state: String,
    url: Option<String>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    last_state_transition_at: DateTime<Utc>,
}

impl NodeRow {
    fn into_node(self) -> Result<Node> {
        let state = NodeState::parse(&self.state).ok_or_else(|| {
            Error::Other(format!(
                "node {} has unknown state '{}' in the database",
                self.id, self.state
            ))
        })?;
        Ok(Node {
            id: self.id,
            routing_id: self.routing_id,
            deployment_id: self.deployment_id,
            state,
            url: self.url,
            error: self.error,
            created_at: self.created_at,
            last_state_transition_at: self.last_state_transition_at,
        })
    }
}

/// Search predicate for [`NodeStore::search`]. All fields are conjunctive;
/// a `None` field matches everything.
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    /// Match nodes in any of these states.
    pub states: Option<Vec<NodeState>>,
    /// Match nodes on this deployment.
    pub deployment_id: Option<i64>,
    /// Match nodes filling this routing id.
    pub routing_id: Option<String>,
    /// Match nodes whose last state transition happened before this instant.
    pub older_than: Option<DateTime<Utc>>,
}

impl NodeFilter {
    /// Filter for all nodes in the given states.
    pub fn in_states(states: &[NodeState]) -> Self {
        Self {
            states: Some(states.to_vec()),
            ..Self::default()
        }
    }

    /// Restrict to nodes whose last transition precedes `cutoff`.
    pub fn older_than(mut self, cutoff: DateTime<Utc>) -> Self {
        self.older_than = Some(cutoff);
        self
    }
}

/// Result of a node search, grouped by routing id and then by state.
#[derive(Debug, Default)]
pub struct NodeSearchResult {
    groups: HashMap<String, HashMap<NodeState, Vec<Node>>>,
}

impl NodeSearchResult {
    fn insert(&mut self, node: Node) {
        self.groups
            .entry(node.routing_id.clone())
            .or_default()
            .entry(node.state)
            .or_default()
            .push(node);
    }

    /// Whether the search matched no nodes.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Total number of matched nodes.
    pub fn len(&self) -> usize {
        self.groups
            .values()
            .flat_map(|by_state| by_state.values())
            .map(Vec::len)
            .sum()
    }

    /// The per-routing-id groups.
    pub fn by_routing_id(&self) -> &HashMap<String, HashMap<NodeState, Vec<Node>>> {
        &self.groups
    }

    /// Nodes for one routing id, if any matched.
    pub fn get(&self, routing_id: &str) -> Option<&HashMap<NodeState, Vec<Node>>> {
        self.groups.get(routing_id)
    }

    /// All matched nodes, ungrouped.
    pub fn flatten(self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self
            .groups
            .into_values()
            .flat_map(HashMap::into_values)
            .flatten()
            .collect();
        nodes.sort_by_key(|n| n.id);
        nodes
    }
}

/// Optional column updates applied together with a state transition.
#[derive(Debug, Clone, Default)]
pub struct TransitionOptions {
    /// Set the node's url (registration).
    pub url: Option<String>,
    /// Set the node's diagnostic message (entering `Error`).
    pub error: Option<String>,
}

const NODE_COLUMNS: &str =
    "id, routing_id, deployment_id, state, url, error, created_at, last_state_transition_at";

/// Node registry backed by PostgreSQL.
pub struct NodeStore {
    pool: PgPool,
}

impl NodeStore {
    /// Create a new node store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a node in [`NodeState::Pending`] on the given deployment.
    pub async fn create(&self, routing_id: &str, deployment_id: i64) -> Result<Node> {
        let row = sqlx::query_as::<_, NodeRow>(&format!(
            r#"
            INSERT INTO nodes (routing_id, deployment_id, state, created_at, last_state_transition_at)
            VALUES ($1, $2, 'pending', NOW(), NOW())
            RETURNING {NODE_COLUMNS}
            "#,
        ))
        .bind(routing_id)
        .bind(deployment_id)
        .fetch_one(&self.pool)
        .await?;

        let node = row.into_node()?;

        tracing::info!(
            node_id = node.id,
            routing_id = %node.routing_id,
            deployment_id = node.deployment_id,
            "Created pending node"
        );

        Ok(node)
    }

    /// Get a node by ID.
    pub async fn get(&self, id: i64) -> Result<Node> {
        let row = sqlx::query_as::<_, NodeRow>(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE id = $1",
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::NodeNotFound(id))?;

        row.into_node()
    }

    /// Search nodes matching the filter, grouped by routing id and state.
    pub async fn search(&self, filter: &NodeFilter) -> Result<NodeSearchResult> {
        let states: Option<Vec<String>> = filter
            .states
            .as_ref()
            .map(|s| s.iter().map(|state| state.as_str().to_string()).collect());

        let rows = sqlx::query_as::<_, NodeRow>(&format!(
            r#"
            SELECT {NODE_COLUMNS}
            FROM nodes
            WHERE ($1::TEXT[] IS NULL OR state = ANY($1))
              AND ($2::BIGINT IS NULL OR deployment_id = $2)
              AND ($3::TEXT IS NULL OR routing_id = $3)
              AND ($4::TIMESTAMPTZ IS NULL OR last_state_transition_at < $4)
            ORDER BY id
            "#,
        ))
        .bind(states)
        .bind(filter.deployment_id)
        .bind(filter.routing_id.as_deref())
        .bind(filter.older_than)
        .fetch_all(&self.pool)
        .await?;

        let mut result = NodeSearchResult::default();
        for row in rows {
            result.insert(row.into_node()?);
        }
        Ok(result)
    }

    /// Conditionally transition a node from `from` to `to`.
    ///
    /// The edge is validated against the state machine first; the update then
    /// only succeeds if the node is still in `from`. Either failure surfaces
    /// as [`Error::NodeTransitionInvalid`] (or [`Error::NodeNotFound`] when
    /// the row is gone). `last_state_transition_at` is always bumped.
    ///
    /// This is the sole mutation path for node rows; [`register`](Self::register),
    /// [`idle`](Self::idle) and the supervisor all compose it.
    pub async fn transition(
        &self,
        id: i64,
        from: NodeState,
        to: NodeState,
        opts: TransitionOptions,
    ) -> Result<Node> {
        if !from.can_transition_to(to) {
            return Err(Error::NodeTransitionInvalid { id, from, to });
        }
        // A running node must be reachable; the only edge into Running is the
        // registration call, which always carries the url.
        if to == NodeState::Running && opts.url.is_none() {
            return Err(Error::NodeTransitionInvalid { id, from, to });
        }

        let row = sqlx::query_as::<_, NodeRow>(&format!(
            r#"
            UPDATE nodes
            SET state = $3,
                url = COALESCE($4, url),
                error = COALESCE($5, error),
                last_state_transition_at = NOW()
            WHERE id = $1 AND state = $2
            RETURNING {NODE_COLUMNS}
            "#,
        ))
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(opts.url.as_deref())
        .bind(opts.error.as_deref())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let node = row.into_node()?;
                tracing::debug!(
                    node_id = id,
                    from = %from,
                    to = %to,
                    "Node transitioned"
                );
                Ok(node)
            }
            // Zero rows: either the node is gone, or another mutator got
            // there first. Re-read to report which.
            None => match self.get(id).await {
                Ok(_) => Err(Error::NodeTransitionInvalid { id, from, to }),
                Err(e) => Err(e),
            },
        }
    }

    /// Register a started node: `Starting -> Running`, setting its url.
    ///
    /// Called by the node itself once its runtime is ready to accept work.
    pub async fn register(&self, id: i64, url: &str) -> Result<Node> {
        let node = self
            .transition(
                id,
                NodeState::Starting,
                NodeState::Running,
                TransitionOptions {
                    url: Some(url.to_string()),
                    ..TransitionOptions::default()
                },
            )
            .await?;

        tracing::info!(node_id = id, url = %url, "Node registered");
        Ok(node)
    }

    /// Mark a node as drained: `Running -> Idle`, or `Outdated -> Idle` when
    /// the node was already superseded while draining.
    ///
    /// Called by the script runtime when the last in-flight job completes.
    pub async fn idle(&self, id: i64) -> Result<Node> {
        match self
            .transition(
                id,
                NodeState::Running,
                NodeState::Idle,
                TransitionOptions::default(),
            )
            .await
        {
            Err(Error::NodeTransitionInvalid { .. }) => {
                self.transition(
                    id,
                    NodeState::Outdated,
                    NodeState::Idle,
                    TransitionOptions::default(),
                )
                .await
            }
            other => other,
        }
    }

    /// Delete a node row. Only terminal nodes may be removed; attempting to
    /// remove a live node is a programming error and fails with
    /// [`Error::NodeNotTerminal`].
    pub async fn remove(&self, id: i64) -> Result<()> {
        let deleted = sqlx::query(
            "DELETE FROM nodes WHERE id = $1 AND state IN ('terminated', 'error')",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if deleted.rows_affected() == 0 {
            let node = self.get(id).await?;
            return Err(Error::NodeNotTerminal {
                id,
                state: node.state,
            });
        }

        tracing::debug!(node_id = id, "Removed node");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [NodeState; 7] = [
        NodeState::Pending,
        NodeState::Starting,
        NodeState::Running,
        NodeState::Outdated,
        NodeState::Idle,
        NodeState::Terminated,
        NodeState::Error,
    ];

    #[test]
    fn test_state_str_roundtrip() {
        for state in ALL_STATES {
            assert_eq!(NodeState::parse(state.as_str()), Some(state));
        }
        assert_eq!(NodeState::parse("finishing"), None);
        assert_eq!(NodeState::parse(""), None);
    }

    #[test]
    fn test_allowed_edges() {
        use NodeState::*;
        let allowed = [
            (Pending, Starting),
            (Pending, Error),
            (Starting, Running),
            (Starting, Error),
            (Running, Outdated),
            (Running, Idle),
            (Running, Error),
            (Outdated, Idle),
            (Idle, Terminated),
            (Idle, Error),
        ];

        for from in ALL_STATES {
            for to in ALL_STATES {
                let expected = allowed.contains(&(from, to));
                assert_eq!(
                    from.can_transition_to(to),
                    expected,
                    "edge {from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(NodeState::Terminated.is_terminal());
        assert!(NodeState::Error.is_terminal());
        for state in [
            NodeState::Pending,
            NodeState::Starting,
            NodeState::Running,
            NodeState::Outdated,
            NodeState::Idle,
        ] {
            assert!(!state.is_terminal(), "{state} must not be terminal");
        }
    }

    #[test]
    fn test_terminal_states_have_no_outgoing_edges() {
        for from in [NodeState::Terminated, NodeState::Error] {
            for to in ALL_STATES {
                assert!(!from.can_transition_to(to), "edge {from} -> {to}");
            }
        }
    }

    #[test]
    fn test_search_result_grouping() {
        fn node(id: i64, routing_id: &str, state: NodeState) -> Node {
            Node {
                id,
                routing_id: routing_id.to_string(),
                deployment_id: 1,
                state,
                url: None,
                error: None,
                created_at: Utc::now(),
                last_state_transition_at: Utc::now(),
            }
        }

        let mut result = NodeSearchResult::default();
        result.insert(node(1, "slot-a", NodeState::Pending));
        result.insert(node(2, "slot-a", NodeState::Pending));
        result.insert(node(3, "slot-a", NodeState::Outdated));
        result.insert(node(4, "slot-b", NodeState::Running));

        assert_eq!(result.len(), 4);
        assert_eq!(result.by_routing_id().len(), 2);
        assert_eq!(
            result.get("slot-a").unwrap()[&NodeState::Pending].len(),
            2
        );
        assert!(result.get("slot-c").is_none());

        let flat = result.flatten();
        assert_eq!(
            flat.iter().map(|n| n.id).collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );
    }
}
