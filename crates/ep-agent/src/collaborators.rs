//! Log-only collaborators
//!
//! Used by the standalone binary when no scheduling, log collection or stack
//! engine is embedded: each one records what the controller asked for in the
//! log and reports success.

use std::collections::HashMap;

use async_trait::async_trait;

use ep_core::traits::{LogCollector, Scheduler, StackReconciler};
use ep_core::Schedule;

/// Scheduler that only logs the schedules it receives
pub struct LoggingScheduler;

#[async_trait]
impl Scheduler for LoggingScheduler {
    async fn apply(&self, schedules: &[Schedule]) -> anyhow::Result<()> {
        let ids: Vec<i64> = schedules.iter().map(|schedule| schedule.id).collect();
        tracing::debug!(schedule_count = schedules.len(), ?ids, "Schedules received");
        Ok(())
    }
}

/// Log collector that only logs the requested job ids
pub struct LoggingLogCollector;

#[async_trait]
impl LogCollector for LoggingLogCollector {
    async fn request_collection(&self, job_ids: Vec<i64>) {
        if !job_ids.is_empty() {
            tracing::info!(?job_ids, "Log collection requested");
        }
    }
}

/// Stack reconciler that only logs the target versions
pub struct LoggingStackReconciler;

#[async_trait]
impl StackReconciler for LoggingStackReconciler {
    async fn reconcile(&self, stacks: HashMap<i64, i64>) -> anyhow::Result<()> {
        let mut targets: Vec<(i64, i64)> = stacks.into_iter().collect();
        targets.sort_unstable();
        tracing::debug!(stack_count = targets.len(), ?targets, "Stack targets received");
        Ok(())
    }
}
