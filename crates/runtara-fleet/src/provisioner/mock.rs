// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock provisioner for testing.
//!
//! Records every start/terminate call and can be configured to fail
//! transiently or reject terminally, without touching real compute.

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::traits::{Provisioner, ProvisionerError, Result};
use crate::nodes::Node;

/// Mock provisioner that records calls instead of managing compute.
#[derive(Default)]
pub struct MockProvisioner {
    started: Mutex<Vec<i64>>,
    terminated: Mutex<Vec<i64>>,
    /// If true, `start` fails with a transient error.
    pub fail_start: bool,
    /// If true, `start` fails with a terminal rejection.
    pub reject_start: bool,
    /// If true, `terminate` fails with a transient error.
    pub fail_terminate: bool,
}

impl MockProvisioner {
    /// Create a mock provisioner where every call succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock provisioner whose `start` fails transiently.
    pub fn failing_start() -> Self {
        Self {
            fail_start: true,
            ..Self::default()
        }
    }

    /// Create a mock provisioner whose `start` is rejected terminally.
    pub fn rejecting_start() -> Self {
        Self {
            reject_start: true,
            ..Self::default()
        }
    }

    /// Create a mock provisioner whose `terminate` fails transiently.
    pub fn failing_terminate() -> Self {
        Self {
            fail_terminate: true,
            ..Self::default()
        }
    }

    /// IDs of nodes `start` was called for, in call order.
    pub async fn started(&self) -> Vec<i64> {
        self.started.lock().await.clone()
    }

    /// IDs of nodes `terminate` was called for, in call order.
    pub async fn terminated(&self) -> Vec<i64> {
        self.terminated.lock().await.clone()
    }
}

#[async_trait]
impl Provisioner for MockProvisioner {
    fn provisioner_type(&self) -> &'static str {
        "mock"
    }

    async fn start(&self, node: &Node) -> Result<()> {
        self.started.lock().await.push(node.id);

        if self.reject_start {
            return Err(ProvisionerError::StartRejected(
                "mock rejection".to_string(),
            ));
        }
        if self.fail_start {
            return Err(ProvisionerError::StartFailed("mock failure".to_string()));
        }
        Ok(())
    }

    async fn terminate(&self, node: &Node) -> Result<()> {
        self.terminated.lock().await.push(node.id);

        if self.fail_terminate {
            return Err(ProvisionerError::TerminateFailed(
                "mock failure".to_string(),
            ));
        }
        Ok(())
    }
}
