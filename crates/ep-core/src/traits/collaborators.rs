//! Subsystems that consume poll response contents

use async_trait::async_trait;
use std::collections::HashMap;

use crate::protocol::Schedule;

/// Job scheduling engine
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Replace the active schedules with `schedules`, in order
    async fn apply(&self, schedules: &[Schedule]) -> anyhow::Result<()>;
}

/// Log collection engine
#[async_trait]
pub trait LogCollector: Send + Sync {
    /// Collect logs for the given job identifiers
    async fn request_collection(&self, job_ids: Vec<i64>);
}

/// Stack state reconciliation engine
#[async_trait]
pub trait StackReconciler: Send + Sync {
    /// Bring local stacks to the given `{stack id -> version}` targets
    async fn reconcile(&self, stacks: HashMap<i64, i64>) -> anyhow::Result<()>;
}
