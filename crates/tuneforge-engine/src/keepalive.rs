//! Keep-alive scheduler: arranges a successor before the host run ceiling.
//!
//! The process runs on a host that evicts it after a fixed ceiling. At a
//! configured fraction of that ceiling the scheduler fires its restart hook
//! exactly once; the successor process reopens the same store and takes
//! over. The latch is irreversible even when the dispatch itself fails,
//! so a flaky hook can never double-fire.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::backend::RestartHook;

const CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Lifecycle phase reported by the stats endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerPhase {
    Running,
    HandingOff,
}

pub struct KeepAliveScheduler {
    started: Instant,
    ceiling: Duration,
    fraction: f64,
    hook: Option<Arc<dyn RestartHook>>,
    fired: AtomicBool,
}

impl KeepAliveScheduler {
    pub fn new(ceiling_hours: f64, fraction: f64, hook: Option<Arc<dyn RestartHook>>) -> Self {
        Self {
            started: Instant::now(),
            ceiling: Duration::from_secs_f64(ceiling_hours.max(0.0) * 3600.0),
            fraction,
            hook,
            fired: AtomicBool::new(false),
        }
    }

    /// Elapsed uptime at which hand-off begins.
    pub fn handoff_threshold(&self) -> Duration {
        self.ceiling.mul_f64(self.fraction)
    }

    pub fn should_hand_off(&self, elapsed: Duration) -> bool {
        elapsed >= self.handoff_threshold()
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn phase(&self) -> SchedulerPhase {
        if self.fired.load(Ordering::SeqCst) {
            SchedulerPhase::HandingOff
        } else {
            SchedulerPhase::Running
        }
    }

    pub async fn run(self: Arc<Self>) {
        info!(
            ceiling_secs = self.ceiling.as_secs(),
            threshold_secs = self.handoff_threshold().as_secs(),
            "keep-alive scheduler started"
        );
        let mut tick = tokio::time::interval(CHECK_INTERVAL);
        loop {
            tick.tick().await;
            self.check(self.started.elapsed()).await;
        }
    }

    /// One scheduler step at the given uptime. Public so the threshold
    /// behavior is testable without waiting hours.
    pub async fn check(&self, elapsed: Duration) {
        if self.arm(elapsed) {
            self.hand_off(elapsed).await;
        }
    }

    /// Latches exactly once: true only on the first call past the threshold.
    fn arm(&self, elapsed: Duration) -> bool {
        self.should_hand_off(elapsed) && !self.fired.swap(true, Ordering::SeqCst)
    }

    async fn hand_off(&self, elapsed: Duration) {
        info!(
            elapsed_mins = elapsed.as_secs() / 60,
            "run ceiling approaching; arranging successor"
        );
        match &self.hook {
            Some(hook) => match hook.dispatch_successor().await {
                Ok(()) => info!("successor dispatch confirmed"),
                Err(e) => error!("successor dispatch failed: {e}"),
            },
            None => warn!("no restart hook configured; successor must be started externally"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tuneforge_core::{Error, Result};

    struct CountingHook {
        dispatches: AtomicUsize,
        fail: bool,
    }

    impl CountingHook {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                dispatches: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl RestartHook for CountingHook {
        async fn dispatch_successor(&self) -> Result<()> {
            self.dispatches.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Backend("dispatch refused".to_string()));
            }
            Ok(())
        }
    }

    fn hours(h: u64) -> Duration {
        Duration::from_secs(h * 3600)
    }

    fn minutes(m: u64) -> Duration {
        Duration::from_secs(m * 60)
    }

    #[test]
    fn test_threshold_is_fraction_of_ceiling() {
        let scheduler = KeepAliveScheduler::new(6.0, 0.9, None);
        // 90% of six hours is five hours twenty-four minutes.
        assert_eq!(scheduler.handoff_threshold(), minutes(324));
        assert!(!scheduler.should_hand_off(minutes(323)));
        assert!(scheduler.should_hand_off(minutes(324)));
        assert!(scheduler.should_hand_off(hours(7)));
    }

    #[test]
    fn test_phase_starts_running() {
        let scheduler = KeepAliveScheduler::new(6.0, 0.9, None);
        assert_eq!(scheduler.phase(), SchedulerPhase::Running);
    }

    #[tokio::test]
    async fn test_fires_exactly_once() {
        let hook = CountingHook::new(false);
        let scheduler = KeepAliveScheduler::new(6.0, 0.9, Some(hook.clone()));

        scheduler.check(minutes(323)).await;
        assert_eq!(hook.dispatches.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.phase(), SchedulerPhase::Running);

        scheduler.check(minutes(324)).await;
        assert_eq!(hook.dispatches.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.phase(), SchedulerPhase::HandingOff);

        // Later checks never fire again.
        scheduler.check(minutes(325)).await;
        scheduler.check(hours(100)).await;
        assert_eq!(hook.dispatches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_dispatch_stays_latched() {
        let hook = CountingHook::new(true);
        let scheduler = KeepAliveScheduler::new(6.0, 0.9, Some(hook.clone()));

        scheduler.check(minutes(324)).await;
        assert_eq!(hook.dispatches.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.phase(), SchedulerPhase::HandingOff);

        // No retry storm after a failed dispatch.
        scheduler.check(minutes(334)).await;
        assert_eq!(hook.dispatches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_hook_still_latches() {
        let scheduler = KeepAliveScheduler::new(6.0, 0.9, None);
        scheduler.check(minutes(324)).await;
        assert_eq!(scheduler.phase(), SchedulerPhase::HandingOff);
    }
}
