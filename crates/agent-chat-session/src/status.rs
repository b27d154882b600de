//! Live health and component-tree polling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use agent_chat_gateway::{ChatGateway, HealthResponse, TreeNode};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5_000);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSnapshot {
    pub polling: bool,
    pub health: Option<HealthResponse>,
    pub health_error: Option<String>,
    /// Swapped whole on every successful fetch, never edited in place.
    pub tree: Option<Arc<TreeNode>>,
    pub tree_error: Option<String>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub completed_ticks: u64,
}

impl StatusSnapshot {
    /// Depth-first lookup over the tree this snapshot holds.
    #[must_use]
    pub fn find_node(&self, id: &str) -> Option<&TreeNode> {
        self.tree.as_deref()?.find(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Completed,
    /// A previous fetch was still outstanding.
    Skipped,
}

/// Polls health and the component tree on a timer.
///
/// Each source keeps its own value and error: a failed tree fetch leaves the
/// last good health response (and vice versa) untouched.
pub struct StatusPoller {
    inner: Arc<PollerInner>,
}

struct PollerInner {
    gateway: Arc<dyn ChatGateway>,
    interval: Duration,
    state: watch::Sender<StatusSnapshot>,
    fetch_in_flight: AtomicBool,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl StatusPoller {
    #[must_use]
    pub fn new(gateway: Arc<dyn ChatGateway>, interval: Duration) -> Self {
        let (state, _) = watch::channel(StatusSnapshot::default());
        Self {
            inner: Arc::new(PollerInner {
                gateway,
                interval,
                state,
                fetch_in_flight: AtomicBool::new(false),
                timer: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        self.inner.state.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.inner.state.borrow().polling
    }

    #[must_use]
    pub fn find_node(&self, id: &str) -> Option<TreeNode> {
        self.inner.state.borrow().find_node(id).cloned()
    }

    /// Mount: enter `polling`, fetch once now, then on every interval.
    pub fn start(&self) {
        self.resume();
    }

    /// Unmount: stop the timer.
    pub fn stop(&self) {
        self.pause();
    }

    /// Flips between polling and stopped; returns the new polling state.
    /// Resuming also fetches once immediately.
    pub fn toggle(&self) -> bool {
        if self.is_polling() {
            self.pause();
            false
        } else {
            self.resume();
            true
        }
    }

    /// One fetch of both sources. Skips if a fetch is still outstanding.
    pub async fn tick(&self) -> TickOutcome {
        self.inner.tick().await
    }

    fn resume(&self) {
        let mut timer = self
            .inner
            .timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(handle) = timer.take() {
            handle.abort();
        }
        self.inner.state.send_modify(|state| state.polling = true);

        let inner = Arc::clone(&self.inner);
        *timer = Some(tokio::spawn(async move {
            inner.tick().await;
            let period = inner.interval.max(Duration::from_millis(1));
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                inner.tick().await;
            }
        }));
        debug!(interval_ms = self.inner.interval.as_millis() as u64, "status polling started");
    }

    fn pause(&self) {
        let mut timer = self
            .inner
            .timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(handle) = timer.take() {
            handle.abort();
        }
        self.inner.state.send_modify(|state| state.polling = false);
        debug!("status polling paused");
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        if let Some(handle) = self.inner.timer.lock().ok().and_then(|mut timer| timer.take()) {
            handle.abort();
        }
    }
}

impl PollerInner {
    async fn tick(&self) -> TickOutcome {
        if self
            .fetch_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("status tick skipped; previous fetch outstanding");
            return TickOutcome::Skipped;
        }
        let _guard = InFlightGuard(&self.fetch_in_flight);

        let (health, tree) = tokio::join!(self.gateway.health(), self.gateway.component_tree());

        self.state.send_modify(|state| {
            match health {
                Ok(health) => {
                    state.health = Some(health);
                    state.health_error = None;
                }
                Err(error) => {
                    warn!(error = %error, "health poll failed");
                    state.health_error = Some(error.to_string());
                }
            }
            match tree {
                Ok(tree) => {
                    state.tree = Some(Arc::new(tree));
                    state.tree_error = None;
                }
                Err(error) => {
                    warn!(error = %error, "tree poll failed");
                    state.tree_error = Some(error.to_string());
                }
            }
            state.last_refreshed_at = Some(Utc::now());
            state.completed_ticks = state.completed_ticks.saturating_add(1);
        });
        TickOutcome::Completed
    }
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
