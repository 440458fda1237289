//! Poll response dispatch
//!
//! Applies every side effect of a decoded response other than tunnel
//! transitions, in this order:
//!
//! 1. schedules go to the scheduler (failure logged),
//! 2. flagged job ids go to the log collector,
//! 3. a changed check-in interval is adopted for the next tick,
//! 4. present stack targets go to the reconciler (failure aborts the cycle).

use std::sync::Arc;
use std::time::Duration;

use ep_core::config::MAX_POLL_FREQUENCY;
use ep_core::traits::{LogCollector, Scheduler, StackReconciler};
use ep_core::{CycleStep, DispatchError, PollError, PollResponse};

/// Owner of the poll cadence, as seen by the dispatcher
pub trait CadenceControl {
    /// Active interval in seconds
    fn interval_secs(&self) -> f64;

    /// Switch to a new interval, effective from the next tick
    fn adopt(&mut self, interval_secs: f64) -> Result<(), PollError>;
}

/// Routes response contents to the collaborating subsystems
#[derive(Clone)]
pub struct ResponseDispatcher {
    scheduler: Arc<dyn Scheduler>,
    log_collector: Arc<dyn LogCollector>,
    stack_reconciler: Arc<dyn StackReconciler>,
}

impl ResponseDispatcher {
    /// Create a dispatcher over the given collaborators
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        log_collector: Arc<dyn LogCollector>,
        stack_reconciler: Arc<dyn StackReconciler>,
    ) -> Self {
        Self {
            scheduler,
            log_collector,
            stack_reconciler,
        }
    }

    /// Apply the response's side effects
    pub async fn dispatch<C>(
        &self,
        response: &PollResponse,
        cadence: &mut C,
    ) -> Result<(), DispatchError>
    where
        C: CadenceControl + Send,
    {
        let scheduled = self
            .scheduler
            .apply(&response.schedules)
            .await
            .map_err(DispatchError::Schedule);
        CycleStep::Schedule.handle(scheduled)?;

        self.log_collector
            .request_collection(response.log_requests())
            .await;

        self.update_cadence(response.checkin_interval, cadence)?;

        if let Some(stacks) = response.stack_versions() {
            let reconciled = self
                .stack_reconciler
                .reconcile(stacks)
                .await
                .map_err(DispatchError::StackReconcile);
            CycleStep::StackReconcile.handle(reconciled)?;
        }

        Ok(())
    }

    fn update_cadence<C: CadenceControl>(
        &self,
        checkin_interval: f64,
        cadence: &mut C,
    ) -> Result<(), DispatchError> {
        let current = cadence.interval_secs();
        if checkin_interval == current {
            return Ok(());
        }

        if !valid_interval(checkin_interval) {
            tracing::warn!(
                checkin_interval_seconds = checkin_interval,
                "Ignoring invalid poll interval from controller"
            );
            return Ok(());
        }

        tracing::debug!(
            old_interval = current,
            new_interval = checkin_interval,
            "Updating poll interval"
        );
        let adopted = cadence
            .adopt(checkin_interval)
            .map_err(|source| DispatchError::Cadence {
                interval_secs: checkin_interval,
                source,
            });
        CycleStep::Cadence.handle(adopted)?;
        Ok(())
    }
}

/// A usable tick period: a non-zero `Duration` no longer than [`MAX_POLL_FREQUENCY`]
fn valid_interval(interval_secs: f64) -> bool {
    matches!(
        Duration::try_from_secs_f64(interval_secs),
        Ok(period) if !period.is_zero() && period <= MAX_POLL_FREQUENCY
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingLogCollector, RecordingScheduler, RecordingStackReconciler};
    use std::collections::HashMap;

    struct FixedCadence {
        interval_secs: f64,
        adopted: Vec<f64>,
        fail: bool,
    }

    impl FixedCadence {
        fn new(interval_secs: f64) -> Self {
            Self {
                interval_secs,
                adopted: Vec::new(),
                fail: false,
            }
        }
    }

    impl CadenceControl for FixedCadence {
        fn interval_secs(&self) -> f64 {
            self.interval_secs
        }

        fn adopt(&mut self, interval_secs: f64) -> Result<(), PollError> {
            if self.fail {
                return Err(PollError::Status(500));
            }
            self.interval_secs = interval_secs;
            self.adopted.push(interval_secs);
            Ok(())
        }
    }

    struct Fixture {
        scheduler: Arc<RecordingScheduler>,
        logs: Arc<RecordingLogCollector>,
        stacks: Arc<RecordingStackReconciler>,
        dispatcher: ResponseDispatcher,
    }

    fn fixture() -> Fixture {
        let scheduler = Arc::new(RecordingScheduler::default());
        let logs = Arc::new(RecordingLogCollector::default());
        let stacks = Arc::new(RecordingStackReconciler::default());
        let dispatcher = ResponseDispatcher::new(scheduler.clone(), logs.clone(), stacks.clone());
        Fixture {
            scheduler,
            logs,
            stacks,
            dispatcher,
        }
    }

    fn response(json: &str) -> PollResponse {
        serde_json::from_str(json).unwrap()
    }

    #[tokio::test]
    async fn test_schedules_and_log_requests() {
        let f = fixture();
        let mut cadence = FixedCadence::new(5.0);
        let response = response(
            r#"{"checkin": 5, "schedules": [{"Id": 1, "CollectLogs": true}, {"Id": 2, "CollectLogs": false}]}"#,
        );

        f.dispatcher.dispatch(&response, &mut cadence).await.unwrap();

        let applied = f.scheduler.calls();
        assert_eq!(applied.len(), 1);
        assert_eq!(
            applied[0].iter().map(|s| s.id).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(f.logs.calls(), vec![vec![1]]);
    }

    #[tokio::test]
    async fn test_scheduler_failure_does_not_abort() {
        let f = fixture();
        f.scheduler.fail(true);
        let mut cadence = FixedCadence::new(5.0);
        let response = response(r#"{"checkin": 10, "stacks": []}"#);

        f.dispatcher.dispatch(&response, &mut cadence).await.unwrap();

        assert_eq!(f.logs.calls().len(), 1);
        assert_eq!(cadence.adopted, vec![10.0]);
        assert_eq!(f.stacks.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_cadence_adopted_only_on_change() {
        let f = fixture();
        let mut cadence = FixedCadence::new(5.0);

        f.dispatcher
            .dispatch(&response(r#"{"checkin": 5}"#), &mut cadence)
            .await
            .unwrap();
        assert!(cadence.adopted.is_empty());

        f.dispatcher
            .dispatch(&response(r#"{"checkin": 2.5}"#), &mut cadence)
            .await
            .unwrap();
        assert_eq!(cadence.adopted, vec![2.5]);
    }

    #[tokio::test]
    async fn test_invalid_cadence_ignored() {
        let f = fixture();
        let mut cadence = FixedCadence::new(5.0);

        f.dispatcher
            .dispatch(&response(r#"{"status": "IDLE"}"#), &mut cadence)
            .await
            .unwrap();
        f.dispatcher
            .dispatch(&response(r#"{"checkin": -3}"#), &mut cadence)
            .await
            .unwrap();

        assert!(cadence.adopted.is_empty());
        assert_eq!(cadence.interval_secs, 5.0);
    }

    #[test]
    fn test_valid_interval() {
        assert!(valid_interval(0.5));
        assert!(valid_interval(30.0));
        assert!(!valid_interval(0.0));
        assert!(!valid_interval(-1.0));
        assert!(!valid_interval(f64::NAN));
        assert!(!valid_interval(f64::INFINITY));
        assert!(!valid_interval(1e-12));
        assert!(!valid_interval(1e30));
        assert!(!valid_interval(1e19));
        assert!(valid_interval(MAX_POLL_FREQUENCY.as_secs_f64()));
        assert!(!valid_interval(MAX_POLL_FREQUENCY.as_secs_f64() + 1.0));
    }

    #[tokio::test]
    async fn test_cadence_failure_is_logged_only() {
        let f = fixture();
        let mut cadence = FixedCadence::new(5.0);
        cadence.fail = true;

        f.dispatcher
            .dispatch(&response(r#"{"checkin": 30, "stacks": []}"#), &mut cadence)
            .await
            .unwrap();

        assert_eq!(cadence.interval_secs, 5.0);
        assert_eq!(f.stacks.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_stacks_reconcile_with_empty_map() {
        let f = fixture();
        let mut cadence = FixedCadence::new(5.0);

        f.dispatcher
            .dispatch(&response(r#"{"checkin": 5, "stacks": []}"#), &mut cadence)
            .await
            .unwrap();

        assert_eq!(f.stacks.calls(), vec![HashMap::new()]);
    }

    #[tokio::test]
    async fn test_absent_stacks_skip_reconcile() {
        let f = fixture();
        let mut cadence = FixedCadence::new(5.0);

        f.dispatcher
            .dispatch(&response(r#"{"checkin": 5}"#), &mut cadence)
            .await
            .unwrap();

        assert!(f.stacks.calls().is_empty());
    }

    #[tokio::test]
    async fn test_stack_failure_propagates_after_cadence() {
        let f = fixture();
        f.stacks.fail(true);
        let mut cadence = FixedCadence::new(5.0);

        let err = f
            .dispatcher
            .dispatch(
                &response(r#"{"checkin": 8, "stacks": [{"ID": 1, "Version": 3}]}"#),
                &mut cadence,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::StackReconcile(_)));
        assert_eq!(cadence.adopted, vec![8.0]);
        assert_eq!(f.stacks.calls(), vec![HashMap::from([(1, 3)])]);
    }
}
