//! Request coalescing and throttling for list refreshes.
//!
//! At most one refresh runs at a time. Callers arriving while it runs join
//! it and observe the same result; callers arriving shortly after a
//! successful refresh are turned away unless they force.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::time::Instant;
use tracing::debug;

use agent_chat_gateway::GatewayError;

pub const DEFAULT_REFRESH_WINDOW: Duration = Duration::from_millis(3_000);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshOptions {
    /// Bypass the throttle window. Still joins a refresh already in flight.
    pub force: bool,
}

impl RefreshOptions {
    #[must_use]
    pub fn forced() -> Self {
        Self { force: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed,
    /// Skipped: the last successful refresh is younger than the window.
    Throttled,
}

type SharedRefresh = Shared<BoxFuture<'static, Result<(), GatewayError>>>;

#[derive(Default)]
struct CoalescerSlot {
    in_flight: Option<SharedRefresh>,
    last_completed_at: Option<Instant>,
    started: u64,
}

#[derive(Clone)]
pub struct RefreshCoalescer {
    window: Duration,
    slot: Arc<Mutex<CoalescerSlot>>,
}

impl RefreshCoalescer {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            slot: Arc::new(Mutex::new(CoalescerSlot::default())),
        }
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.lock().in_flight.is_some()
    }

    /// Number of refreshes actually started (joins and throttled calls
    /// excluded).
    #[must_use]
    pub fn started_count(&self) -> u64 {
        self.lock().started
    }

    /// Runs `start` unless a refresh is already in flight (join it) or the
    /// throttle window applies.
    ///
    /// The work is spawned onto the runtime, so it finishes even if every
    /// caller stops waiting. Requires a Tokio runtime.
    pub async fn run<F, Fut>(
        &self,
        options: RefreshOptions,
        start: F,
    ) -> Result<RefreshOutcome, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), GatewayError>> + Send + 'static,
    {
        let shared = {
            let mut slot = self.lock();
            if let Some(in_flight) = slot.in_flight.as_ref() {
                debug!("joining in-flight refresh");
                in_flight.clone()
            } else {
                if !options.force
                    && slot
                        .last_completed_at
                        .is_some_and(|at| at.elapsed() < self.window)
                {
                    debug!("refresh throttled");
                    return Ok(RefreshOutcome::Throttled);
                }
                let shared = self.spawn_refresh(start());
                slot.in_flight = Some(shared.clone());
                slot.started = slot.started.saturating_add(1);
                shared
            }
        };

        shared.await.map(|()| RefreshOutcome::Refreshed)
    }

    fn spawn_refresh<Fut>(&self, work: Fut) -> SharedRefresh
    where
        Fut: Future<Output = Result<(), GatewayError>> + Send + 'static,
    {
        let slot = Arc::clone(&self.slot);
        let task = tokio::spawn(async move {
            let result = work.await;
            let mut guard = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.in_flight = None;
            if result.is_ok() {
                guard.last_completed_at = Some(Instant::now());
            }
            result
        });

        async move {
            task.await.unwrap_or_else(|join_error| {
                Err(GatewayError::Task {
                    message: join_error.to_string(),
                })
            })
        }
        .boxed()
        .shared()
    }

    fn lock(&self) -> MutexGuard<'_, CoalescerSlot> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for RefreshCoalescer {
    fn default() -> Self {
        Self::new(DEFAULT_REFRESH_WINDOW)
    }
}
