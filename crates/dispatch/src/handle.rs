//! Subscription handles
//!
//! Every timer, interval and stream the core opens is owned by exactly one
//! [`SubscriptionHandle`]. Stopping or dropping the handle aborts the task,
//! so teardown is a matter of dropping the owning component's handles.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::trace;

/// Owner of one spawned background task
#[derive(Debug)]
pub struct SubscriptionHandle {
    name: &'static str,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    /// Spawn `fut` and take ownership of it.
    pub fn spawn<F>(name: &'static str, fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        trace!(handle = name, "subscription started");
        Self {
            name,
            task: Some(tokio::spawn(fut)),
        }
    }

    /// Run `on_fire` once after `delay`.
    pub fn timeout<F>(name: &'static str, delay: Duration, on_fire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::spawn(name, async move {
            tokio::time::sleep(delay).await;
            on_fire();
        })
    }

    /// Run `on_tick` every `period`, starting one period from now, until it returns `false`.
    pub fn interval<F>(name: &'static str, period: Duration, mut on_tick: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        Self::spawn(name, async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !on_tick() {
                    break;
                }
            }
        })
    }

    /// Name given at creation, for logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the task is still running.
    pub fn is_active(&self) -> bool {
        self.task.as_ref().map_or(false, |t| !t.is_finished())
    }

    /// Abort the task. Idempotent.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            trace!(handle = self.name, "subscription stopped");
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Replace the handle in `slot`, stopping the previous one first.
pub fn replace(slot: &mut Option<SubscriptionHandle>, next: SubscriptionHandle) {
    if let Some(mut prev) = slot.take() {
        prev.stop();
    }
    *slot = Some(next);
}

/// Stop and clear the handle in `slot`.
pub fn clear(slot: &mut Option<SubscriptionHandle>) {
    if let Some(mut prev) = slot.take() {
        prev.stop();
    }
}
