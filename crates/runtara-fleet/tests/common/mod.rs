// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for runtara-fleet integration tests.
//!
//! Provides TestContext for connecting to the test database, applying
//! migrations, and building node fixtures in arbitrary lifecycle states.

#![allow(dead_code)]

use std::time::Duration;

use sqlx::PgPool;
use uuid::Uuid;

use runtara_fleet::deployments::DeploymentStore;
use runtara_fleet::nodes::{Node, NodeState, NodeStore, TransitionOptions};

/// Serializes tests against the shared database. The deployment table has a
/// single global active row, so concurrent tests would supersede each other.
pub static DB_MUTEX: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

/// Test context that manages database access for integration tests.
pub struct TestContext {
    pub pool: PgPool,
    pub deployments: DeploymentStore,
    pub nodes: NodeStore,
}

impl TestContext {
    /// Connect to the test database, run migrations, and wipe the fleet
    /// tables. Callers must hold [`DB_MUTEX`] for the duration of the test.
    pub async fn new() -> Self {
        let database_url = std::env::var("TEST_RUNTARA_FLEET_DATABASE_URL")
            .expect("TEST_RUNTARA_FLEET_DATABASE_URL not set");

        let pool = PgPool::connect(&database_url)
            .await
            .expect("Failed to connect to test database");

        runtara_fleet::migrations::run(&pool)
            .await
            .expect("Failed to run migrations");

        sqlx::query("TRUNCATE nodes, deployments RESTART IDENTITY CASCADE")
            .execute(&pool)
            .await
            .expect("Failed to reset fleet tables");

        Self {
            deployments: DeploymentStore::new(pool.clone()),
            nodes: NodeStore::new(pool.clone()),
            pool,
        }
    }

    /// Age a node's last state transition so timeout paths fire.
    pub async fn backdate_node(&self, node_id: i64, age: Duration) {
        let ts = chrono::Utc::now() - chrono::Duration::from_std(age).expect("age out of range");
        sqlx::query("UPDATE nodes SET last_state_transition_at = $1 WHERE id = $2")
            .bind(ts)
            .bind(node_id)
            .execute(&self.pool)
            .await
            .expect("Failed to backdate node");
    }

    /// Number of deployments with `superseded_at IS NULL`.
    pub async fn count_active_deployments(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM deployments WHERE superseded_at IS NULL")
            .fetch_one(&self.pool)
            .await
            .expect("Failed to count active deployments")
    }

    /// Total number of node rows.
    pub async fn count_nodes(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM nodes")
            .fetch_one(&self.pool)
            .await
            .expect("Failed to count nodes")
    }

    /// Force a world with no active deployment. Unreachable through the
    /// store API, which always leaves exactly one active row.
    pub async fn supersede_all_deployments(&self) {
        sqlx::query("UPDATE deployments SET superseded_at = NOW() WHERE superseded_at IS NULL")
            .execute(&self.pool)
            .await
            .expect("Failed to supersede deployments");
    }
}

/// A fresh 40-hex commit id.
pub fn commit_id(seed: u8) -> String {
    format!("{:040x}", seed)
}

/// A unique routing id.
pub fn routing_id() -> String {
    format!("slot-{}", Uuid::new_v4())
}

/// Create a node and walk it through legal transitions into `state`.
pub async fn node_in_state(
    ctx: &TestContext,
    routing_id: &str,
    deployment_id: i64,
    state: NodeState,
) -> Node {
    let node = ctx
        .nodes
        .create(routing_id, deployment_id)
        .await
        .expect("Failed to create node");
    let id = node.id;

    if state == NodeState::Pending {
        return node;
    }
    if state == NodeState::Error {
        return ctx
            .nodes
            .transition(
                id,
                NodeState::Pending,
                NodeState::Error,
                TransitionOptions {
                    error: Some("provisioner start failed".to_string()),
                    ..TransitionOptions::default()
                },
            )
            .await
            .expect("Failed to fail node");
    }

    let node = ctx
        .nodes
        .transition(
            id,
            NodeState::Pending,
            NodeState::Starting,
            TransitionOptions::default(),
        )
        .await
        .expect("Failed to start node");
    if state == NodeState::Starting {
        return node;
    }

    let node = ctx
        .nodes
        .register(id, &format!("http://node-{id}.internal:8080"))
        .await
        .expect("Failed to register node");
    if state == NodeState::Running {
        return node;
    }

    match state {
        NodeState::Outdated => ctx
            .nodes
            .transition(
                id,
                NodeState::Running,
                NodeState::Outdated,
                TransitionOptions::default(),
            )
            .await
            .expect("Failed to outdate node"),
        NodeState::Idle => ctx.nodes.idle(id).await.expect("Failed to idle node"),
        NodeState::Terminated => {
            ctx.nodes.idle(id).await.expect("Failed to idle node");
            ctx.nodes
                .transition(
                    id,
                    NodeState::Idle,
                    NodeState::Terminated,
                    TransitionOptions::default(),
                )
                .await
                .expect("Failed to terminate node")
        }
        _ => unreachable!("handled above"),
    }
}
