// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Database migrations for runtara-fleet.
//!
//! The fleet schema is self-contained: two tables (deployments, nodes) plus
//! the partial unique index enforcing the single active deployment.
//!
//! # Example
//!
//! ```ignore
//! use sqlx::PgPool;
//! use runtara_fleet::migrations;
//!
//! let pool = PgPool::connect(&database_url).await?;
//! migrations::run(&pool).await?;
//! ```

use sqlx::migrate::MigrateError;

/// Fleet migrator with the schema migrations embedded.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Run all fleet migrations.
///
/// Safe to call multiple times; already-applied migrations are skipped.
pub async fn run(pool: &sqlx::PgPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}
