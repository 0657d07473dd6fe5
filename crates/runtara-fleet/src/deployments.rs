// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployment registry.
//!
//! Append-only log of deployments. Exactly one deployment is active at any
//! moment: creating a new one supersedes every active row in the same
//! transaction, and a partial unique index on `superseded_at IS NULL` backs
//! the invariant at the storage layer. Deployments are never deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::error::{Error, Result};

/// A deployment record.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Deployment {
    /// Monotonically assigned deployment ID.
    pub id: i64,
    /// Content hash of the code artifact this deployment represents.
    pub commit_id: String,
    /// When the deployment was created.
    pub created_at: DateTime<Utc>,
    /// When a newer deployment superseded this one. Null while active; once
    /// set it is never cleared.
    pub superseded_at: Option<DateTime<Utc>>,
}

impl Deployment {
    /// Whether this deployment is the active one.
    pub fn is_active(&self) -> bool {
        self.superseded_at.is_none()
    }
}

/// Deployment registry backed by PostgreSQL.
pub struct DeploymentStore {
    pool: PgPool,
}

impl DeploymentStore {
    /// Create a new deployment store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a new deployment for the given commit and make it the active
    /// one.
    ///
    /// Supersede-then-insert runs in a single transaction so no observer ever
    /// sees zero or two active deployments.
    pub async fn create(&self, commit_id: &str) -> Result<Deployment> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(Error::DeploymentCreation)?;

        sqlx::query("UPDATE deployments SET superseded_at = NOW() WHERE superseded_at IS NULL")
            .execute(&mut *tx)
            .await
            .map_err(Error::DeploymentCreation)?;

        let deployment = sqlx::query_as::<_, Deployment>(
            r#"
            INSERT INTO deployments (commit_id, created_at, superseded_at)
            VALUES ($1, NOW(), NULL)
            RETURNING id, commit_id, created_at, superseded_at
            "#,
        )
        .bind(commit_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::DeploymentCreation)?;

        tx.commit().await.map_err(Error::DeploymentCreation)?;

        tracing::info!(
            deployment_id = deployment.id,
            commit_id = %deployment.commit_id,
            "Created deployment"
        );

        Ok(deployment)
    }

    /// Get the active deployment, if one exists.
    pub async fn get_active(&self) -> Result<Option<Deployment>> {
        sqlx::query_as::<_, Deployment>(
            r#"
            SELECT id, commit_id, created_at, superseded_at
            FROM deployments
            WHERE superseded_at IS NULL
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::DeploymentGetActive)
    }

    /// Get a deployment by ID.
    pub async fn get(&self, id: i64) -> Result<Deployment> {
        sqlx::query_as::<_, Deployment>(
            r#"
            SELECT id, commit_id, created_at, superseded_at
            FROM deployments
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::DeploymentNotFound(id))
    }
}
