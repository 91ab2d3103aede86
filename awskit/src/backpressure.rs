//! Bounds in-flight work per container and computes poll permits.
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::config::{BackpressureMode, FifoGroupStrategy};

struct State {
    in_flight: usize,
    busy_groups: HashSet<String>,
}

/// Permit accounting for one container.
///
/// A single mutex protects the in-flight counter and the busy-group set;
/// waiters are woken through a [`Notify`] whenever permits are released.
/// Under [`BackpressureMode::FifoPreserving`] a message group with a message
/// in flight refuses further dispatches; the container returns such messages
/// to the queue with a zero visibility timeout instead of buffering them.
pub struct BackpressureManager {
    limit: usize,
    mode: BackpressureMode,
    state: Mutex<State>,
    notify: Notify,
}

impl BackpressureManager {
    /// Creates a manager for `max_concurrent_messages = limit`.
    ///
    /// `mode` must already be resolved (never [`BackpressureMode::Auto`]).
    /// [`FifoGroupStrategy::StrictSequential`] caps effective concurrency at
    /// one message regardless of `limit`.
    pub fn new(limit: usize, mode: BackpressureMode, strategy: FifoGroupStrategy) -> Self {
        let limit = match strategy {
            FifoGroupStrategy::StrictSequential if mode == BackpressureMode::FifoPreserving => 1,
            _ => limit,
        };
        BackpressureManager {
            limit,
            mode,
            state: Mutex::new(State {
                in_flight: 0,
                busy_groups: HashSet::new(),
            }),
            notify: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Grants between 0 and `want` permits without waiting.
    pub fn try_acquire(&self, want: usize) -> usize {
        let mut state = self.state();
        let available = self.limit.saturating_sub(state.in_flight);
        let granted = want.min(available);
        state.in_flight += granted;
        granted
    }

    /// Grants between 1 and `want` permits, waiting for capacity when none
    /// is available.
    pub async fn acquire(&self, want: usize) -> usize {
        loop {
            let notified = self.notify.notified();
            let granted = self.try_acquire(want);
            if granted > 0 {
                return granted;
            }
            notified.await;
        }
    }

    /// Returns `count` permits and wakes blocked acquirers.
    pub fn release(&self, count: usize) {
        {
            let mut state = self.state();
            state.in_flight = state.in_flight.saturating_sub(count);
        }
        self.notify.notify_waiters();
    }

    /// Marks a message group busy, refusing if it already is.
    ///
    /// Always succeeds outside [`BackpressureMode::FifoPreserving`].
    pub fn try_reserve_group(&self, group: &str) -> bool {
        if self.mode != BackpressureMode::FifoPreserving {
            return true;
        }
        self.state().busy_groups.insert(group.to_string())
    }

    /// Frees a message group reserved by [`Self::try_reserve_group`].
    pub fn release_group(&self, group: &str) {
        if self.mode != BackpressureMode::FifoPreserving {
            return;
        }
        let _ = self.state().busy_groups.remove(group);
        self.notify.notify_waiters();
    }

    /// Current number of in-flight messages.
    pub fn in_flight(&self) -> usize {
        self.state().in_flight
    }

    /// Waits until every permit has been returned.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.notify.notified();
            if self.state().in_flight == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use tokio::time::{timeout, Duration};

    #[test]
    fn grants_up_to_available_capacity() {
        let bp = BackpressureManager::new(
            3,
            BackpressureMode::HighThroughput,
            FifoGroupStrategy::GroupParallel,
        );
        assert_eq!(bp.try_acquire(10), 3);
        assert_eq!(bp.try_acquire(1), 0);
        bp.release(2);
        assert_eq!(bp.try_acquire(10), 2);
        assert_eq!(bp.in_flight(), 3);
    }

    #[test]
    fn group_reservation_only_applies_to_fifo_preserving() {
        let bp = BackpressureManager::new(
            10,
            BackpressureMode::HighThroughput,
            FifoGroupStrategy::GroupParallel,
        );
        assert!(bp.try_reserve_group("a"));
        assert!(bp.try_reserve_group("a"));

        let fifo = BackpressureManager::new(
            10,
            BackpressureMode::FifoPreserving,
            FifoGroupStrategy::GroupParallel,
        );
        assert!(fifo.try_reserve_group("a"));
        assert!(!fifo.try_reserve_group("a"));
        assert!(fifo.try_reserve_group("b"));
        fifo.release_group("a");
        assert!(fifo.try_reserve_group("a"));
    }

    #[test]
    fn strict_sequential_caps_concurrency_at_one() {
        let bp = BackpressureManager::new(
            10,
            BackpressureMode::FifoPreserving,
            FifoGroupStrategy::StrictSequential,
        );
        assert_eq!(bp.try_acquire(10), 1);
        assert_eq!(bp.try_acquire(1), 0);
    }

    #[tokio::test]
    async fn acquire_waits_for_release() {
        let bp = Arc::new(BackpressureManager::new(
            1,
            BackpressureMode::HighThroughput,
            FifoGroupStrategy::GroupParallel,
        ));
        assert_eq!(bp.acquire(1).await, 1);

        let waiter = {
            let bp = bp.clone();
            tokio::spawn(async move { bp.acquire(1).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        bp.release(1);
        let granted = timeout(Duration::from_secs(1), waiter)
            .await
            .expect("acquire should wake")
            .expect("task should not panic");
        assert_eq!(granted, 1);
    }

    #[tokio::test]
    async fn wait_idle_returns_once_drained() {
        let bp = Arc::new(BackpressureManager::new(
            2,
            BackpressureMode::HighThroughput,
            FifoGroupStrategy::GroupParallel,
        ));
        assert_eq!(bp.try_acquire(2), 2);
        let idle = {
            let bp = bp.clone();
            tokio::spawn(async move { bp.wait_idle().await })
        };
        bp.release(1);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!idle.is_finished());
        bp.release(1);
        timeout(Duration::from_secs(1), idle)
            .await
            .expect("wait_idle should finish")
            .expect("task should not panic");
    }
}
