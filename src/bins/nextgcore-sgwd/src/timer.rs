//! SGW Timer Management
//!
//! Per-bearer timers polled by the worker. Expired timers are turned into
//! queue events, so timer handling runs as an ordinary queued operation.

use std::collections::HashMap;
use std::time::{Duration, Instant};

// ============================================================================
// Timer IDs
// ============================================================================

/// SGW timer identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SgwTimerId {
    /// Paging did not complete in time; drop what the bearer buffered
    BufferExpiry,
}

impl SgwTimerId {
    /// Get timer name
    pub fn name(&self) -> &'static str {
        match self {
            Self::BufferExpiry => "SGW_TIMER_BUFFER_EXPIRY",
        }
    }
}

// ============================================================================
// Timer Manager
// ============================================================================

/// A started timer. A fired timer stays registered until its queued event is
/// consumed, so a stop or restart in between invalidates that event.
#[derive(Debug, Clone, Copy)]
struct TimerEntry {
    expiration: Instant,
    fired: bool,
}

/// Timer manager for SGW bearers
#[derive(Debug, Default)]
pub struct TimerManager {
    /// (timer id, bearer index) -> timer
    timers: HashMap<(SgwTimerId, u32), TimerEntry>,
}

impl TimerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) a bearer timer
    pub fn start(&mut self, timer_id: SgwTimerId, bearer_index: u32, duration: Duration) {
        let expiration = Instant::now() + duration;
        self.timers.insert(
            (timer_id, bearer_index),
            TimerEntry {
                expiration,
                fired: false,
            },
        );
        log::debug!(
            "Started timer {} for bearer {} ({:?})",
            timer_id.name(),
            bearer_index,
            duration
        );
    }

    /// Stop a bearer timer, fired or not. Returns false if it was not
    /// registered.
    pub fn stop(&mut self, timer_id: SgwTimerId, bearer_index: u32) -> bool {
        let stopped = self.timers.remove(&(timer_id, bearer_index)).is_some();
        if stopped {
            log::debug!("Stopped timer {} for bearer {}", timer_id.name(), bearer_index);
        }
        stopped
    }

    /// Stop every timer of a bearer
    pub fn stop_all_for_bearer(&mut self, bearer_index: u32) {
        self.timers.retain(|(_, index), _| *index != bearer_index);
    }

    /// Whether a timer is counting down (started and not yet fired)
    pub fn is_running(&self, timer_id: SgwTimerId, bearer_index: u32) -> bool {
        self.timers
            .get(&(timer_id, bearer_index))
            .is_some_and(|entry| !entry.fired)
    }

    /// Mark every timer expired at `now` as fired and return them
    pub fn check_expired(&mut self, now: Instant) -> Vec<(SgwTimerId, u32)> {
        let mut expired: Vec<(SgwTimerId, u32)> = self
            .timers
            .iter_mut()
            .filter(|(_, entry)| !entry.fired && now >= entry.expiration)
            .map(|(key, entry)| {
                entry.fired = true;
                *key
            })
            .collect();

        expired.sort_by_key(|(_, index)| *index);
        expired
    }

    /// Consume a fired timer. False when it was stopped or restarted after
    /// firing, in which case its event is stale.
    pub fn take_fired(&mut self, timer_id: SgwTimerId, bearer_index: u32) -> bool {
        match self.timers.get(&(timer_id, bearer_index)) {
            Some(entry) if entry.fired => {
                self.timers.remove(&(timer_id, bearer_index));
                true
            }
            _ => false,
        }
    }

    /// Put a fired timer back so the next `check_expired` reports it again
    pub fn refire(&mut self, timer_id: SgwTimerId, bearer_index: u32) {
        if let Some(entry) = self.timers.get_mut(&(timer_id, bearer_index)) {
            entry.fired = false;
        }
    }

    /// Number of timers still counting down
    pub fn active_timer_count(&self) -> usize {
        self.timers.values().filter(|entry| !entry.fired).count()
    }

    pub fn clear(&mut self) {
        self.timers.clear();
    }
}
