use std::{
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};

use tokio::task::JoinHandle;

const ARMED: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineState {
    Armed,
    Fired,
    Cancelled,
}

/// One-shot timer that runs a callback unless cancelled first.
///
/// The armed → fired and armed → cancelled transitions race on a single atomic,
/// so exactly one of them wins and the callback runs at most once. Dropping an
/// armed guard cancels it. Must be armed from within a tokio runtime.
#[derive(Debug)]
pub struct DeadlineGuard {
    state: Arc<AtomicU8>,
    duration: Duration,
    timer: JoinHandle<()>,
}

impl DeadlineGuard {
    pub fn arm<F>(duration: Duration, on_fire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let state = Arc::new(AtomicU8::new(ARMED));
        let timer_state = Arc::clone(&state);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if timer_state
                .compare_exchange(ARMED, FIRED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                on_fire();
            }
        });

        Self {
            state,
            duration,
            timer,
        }
    }

    /// Cancel the pending callback. Returns `true` only for the call that
    /// actually prevented it; later calls, or calls after firing, return `false`.
    pub fn cancel(&self) -> bool {
        let cancelled = self
            .state
            .compare_exchange(ARMED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if cancelled {
            self.timer.abort();
        }
        cancelled
    }

    pub fn state(&self) -> DeadlineState {
        match self.state.load(Ordering::Acquire) {
            ARMED => DeadlineState::Armed,
            FIRED => DeadlineState::Fired,
            _ => DeadlineState::Cancelled,
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl Drop for DeadlineGuard {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn counting_guard(after: Duration) -> (DeadlineGuard, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let guard = DeadlineGuard::arm(after, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (guard, fired)
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_duration() {
        let (guard, fired) = counting_guard(Duration::from_millis(100));

        tokio::time::sleep(Duration::from_millis(99)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(guard.state(), DeadlineState::Armed);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(guard.state(), DeadlineState::Fired);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_expiry_prevents_callback() {
        let (guard, fired) = counting_guard(Duration::from_millis(100));

        assert!(guard.cancel());
        assert!(!guard.cancel());
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(guard.state(), DeadlineState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_firing_is_a_noop() {
        let (guard, fired) = counting_guard(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!guard.cancel());
        assert!(!guard.cancel());
        assert_eq!(guard.state(), DeadlineState::Fired);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_an_armed_guard_cancels_it() {
        let (guard, fired) = counting_guard(Duration::from_millis(10));
        drop(guard);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
