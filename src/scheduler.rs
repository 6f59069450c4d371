//! Abstract deferred-task scheduling, the capability the engines use for resend timers and
//! pending-request expiries.
//!
//! Kept as a trait object (`Arc<dyn Scheduler>`) rather than a generic parameter so engines
//! can be constructed without monomorphizing over a scheduler type, mirroring how the
//! teacher crate threads a shared `tokio::sync::Mutex`-guarded handle through its
//! connection state rather than parameterizing every struct over it.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::task::AbortHandle;

pub type SchedFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A handle to a scheduled task. Dropping it does not cancel the task — call
/// [`TimerHandle::cancel`] explicitly, matching the explicit-cancel discipline the engines
/// require for resets (a new outgoing request must cancel the prior one's timer before firing).
pub struct TimerHandle(AbortHandle);

impl TimerHandle {
    pub fn cancel(&self) {
        self.0.abort();
    }
}

pub trait Scheduler: Send + Sync {
    fn schedule(&self, after: Duration, task: SchedFuture) -> TimerHandle;
}

/// Default scheduler backed by the tokio runtime: spawns a sleep-then-run task and returns
/// its abort handle for cancellation.
#[derive(Clone, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, after: Duration, task: SchedFuture) -> TimerHandle {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            task.await;
        });
        TimerHandle(handle.abort_handle())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn schedule_runs_after_delay() {
        let scheduler = TokioScheduler;
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        let _handle = scheduler.schedule(
            Duration::from_millis(5),
            Box::pin(async move {
                ran2.store(true, Ordering::SeqCst);
            }),
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancel_prevents_execution() {
        let scheduler = TokioScheduler;
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        let handle = scheduler.schedule(
            Duration::from_millis(20),
            Box::pin(async move {
                ran2.store(true, Ordering::SeqCst);
            }),
        );
        handle.cancel();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!ran.load(Ordering::SeqCst));
    }
}
