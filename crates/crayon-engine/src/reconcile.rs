use crate::engine::{ColorEngine, CursorState, PaintOrigin, PaintOutcome};
use chrono::{DateTime, Utc};
use crayon_core::{ColorTable, FeedQuery, Settings};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TickStatus {
    #[default]
    Completed,
    /// Another tick was still running; this one did nothing.
    Overlapped,
    /// The cursor could not be placed yet; retried next tick.
    CursorUnavailable,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub status: TickStatus,
    pub auto_mode: bool,
    pub pending_cleared: usize,
    pub pending_pruned: usize,
    pub pending_checked: usize,
    pub pending_resolved: usize,
    pub pending_dropped: usize,
    pub discovered: usize,
    pub newly_tracked: usize,
    pub painted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub source_errors: usize,
}

impl TickReport {
    fn with_status(status: TickStatus) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    fn record(&mut self, outcome: PaintOutcome) {
        match outcome {
            PaintOutcome::Painted => self.painted += 1,
            PaintOutcome::Skipped | PaintOutcome::Disabled => self.skipped += 1,
            PaintOutcome::Failed => self.failed += 1,
        }
    }
}

/// Holds the "tick in progress" flag; released on drop, including unwinds.
struct TickGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> TickGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl ColorEngine {
    pub async fn tick(&self) -> TickReport {
        self.tick_at(Utc::now()).await
    }

    /// One reconciliation pass: place the cursor, sweep pending ids, then
    /// page through exchanges created since the last pass.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickReport {
        let Some(_guard) = TickGuard::acquire(&self.tick_in_progress) else {
            debug!(event = "tick_skipped", reason = "in_progress");
            return TickReport::with_status(TickStatus::Overlapped);
        };

        if !self.ensure_cursor().await {
            return TickReport::with_status(TickStatus::CursorUnavailable);
        }

        let settings = self.settings.get().await;
        let mut report = TickReport {
            auto_mode: settings.auto_mode,
            ..TickReport::default()
        };

        if settings.auto_mode {
            self.sweep_pending(&settings.colors, now, &mut report).await;
        } else {
            let mut state = self.loop_state();
            report.pending_cleared = state.pending.len();
            state.pending.clear();
        }

        self.discover(&settings, now, &mut report).await;

        debug!(
            event = "tick_complete",
            auto_mode = report.auto_mode,
            discovered = report.discovered,
            painted = report.painted,
            failed = report.failed,
            pending = self.pending_len()
        );
        report
    }

    /// Spawns the poller. Each period fires a tick on its own task so a slow
    /// tick makes the next firing hit the in-progress guard rather than queue
    /// behind it. Returns `false` if the poller was already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut poller = self.poller.lock().unwrap_or_else(PoisonError::into_inner);
        if poller.is_some() {
            return false;
        }

        let engine = Arc::clone(self);
        let period = self.config.poll_interval();
        *poller = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    engine.tick().await;
                });
            }
        }));

        info!(
            event = "poller_started",
            interval_ms = self.config.poll_interval_ms
        );
        true
    }

    pub fn stop(&self) {
        let handle = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            info!(event = "poller_stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Parks the cursor at the end of the existing feed so only exchanges
    /// created after start-up count as new. Until the source answers once,
    /// every tick retries here.
    async fn ensure_cursor(&self) -> bool {
        let ready = self.loop_state().cursor.is_ready();
        if ready {
            return true;
        }

        match self.source.query(FeedQuery::tail(1)).await {
            Ok(page) => {
                let position = if page.is_empty() {
                    None
                } else {
                    page.end_cursor
                };
                info!(event = "cursor_initialized", cursor = ?position);
                self.loop_state().cursor = CursorState::Ready(position);
                true
            }
            Err(err) => {
                // Expected while the host is still starting.
                debug!(event = "cursor_bootstrap_deferred", error = %err);
                false
            }
        }
    }

    async fn sweep_pending(
        &self,
        colors: &ColorTable,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) {
        let batch = {
            let mut state = self.loop_state();
            report.pending_pruned = state.pending.prune(now);
            state
                .pending
                .drain_batch(self.config.pending_checks_per_tick)
        };

        for id in batch {
            report.pending_checked += 1;
            let exchange = match self.source.get(&id).await {
                Ok(Some(exchange)) => exchange,
                Ok(None) => {
                    debug!(event = "pending_dropped", id = %id, reason = "unknown_to_source");
                    self.loop_state().pending.resolve(&id);
                    report.pending_dropped += 1;
                    continue;
                }
                Err(err) => {
                    warn!(event = "pending_lookup_failed", id = %id, error = %err);
                    report.source_errors += 1;
                    break;
                }
            };

            let Some(response) = exchange.response else {
                continue;
            };

            // A push notification may have handled it while we awaited.
            if !self.loop_state().pending.resolve(&id) {
                continue;
            }
            report.pending_resolved += 1;
            let outcome = self
                .paint(&id, &response, colors, PaintOrigin::Pending)
                .await;
            report.record(outcome);
        }
    }

    async fn discover(&self, settings: &Settings, now: DateTime<Utc>, report: &mut TickReport) {
        let cursor = self.loop_state().cursor.position();
        let query = FeedQuery::after(cursor, self.config.discovery_batch_size);
        let page = match self.source.query(query).await {
            Ok(page) => page,
            Err(err) => {
                warn!(event = "discovery_failed", error = %err);
                report.source_errors += 1;
                return;
            }
        };

        if page.is_empty() {
            return;
        }

        if let Some(end_cursor) = page.end_cursor.clone() {
            self.loop_state().cursor = CursorState::Ready(Some(end_cursor));
        }

        for exchange in page.items {
            report.discovered += 1;
            if !settings.auto_mode {
                continue;
            }

            match exchange.response {
                None => {
                    if self.loop_state().pending.track(&exchange.id, now) {
                        report.newly_tracked += 1;
                    }
                }
                Some(response) => {
                    let outcome = self
                        .paint(&exchange.id, &response, &settings.colors, PaintOrigin::Discovery)
                        .await;
                    report.record(outcome);
                }
            }
        }
    }
}
