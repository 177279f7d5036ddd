use crate::config::EngineConfig;
use crate::pending::PendingTracker;
use crate::settings_cache::SettingsCache;
use crate::source::{ColorWriter, ExchangeSource};
use crayon_core::{classify_response, ColorTable, ResponseSummary};
use crayon_storage::SettingsPersistence;
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaintOrigin {
    Push,
    Pending,
    Discovery,
    Manual,
}

impl PaintOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaintOrigin::Push => "push",
            PaintOrigin::Pending => "pending",
            PaintOrigin::Discovery => "discovery",
            PaintOrigin::Manual => "manual",
        }
    }
}

impl fmt::Display for PaintOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaintOutcome {
    /// The color (possibly the empty "clear" color) was written.
    Painted,
    /// No color applies; nothing was written.
    Skipped,
    Failed,
    /// Auto mode is off; the notification was ignored.
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) enum CursorState {
    #[default]
    Uninitialized,
    /// `None` means the feed was empty when the cursor was placed.
    Ready(Option<String>),
}

impl CursorState {
    pub(crate) fn is_ready(&self) -> bool {
        matches!(self, CursorState::Ready(_))
    }

    pub(crate) fn position(&self) -> Option<String> {
        match self {
            CursorState::Ready(position) => position.clone(),
            CursorState::Uninitialized => None,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct LoopState {
    pub(crate) cursor: CursorState,
    pub(crate) pending: PendingTracker,
}

/// The long-lived colorizer: owns the cursor, the pending set and the
/// settings cache, and is shared by the poller, the push handler and the UI
/// operations.
pub struct ColorEngine {
    pub(crate) config: EngineConfig,
    pub(crate) source: Arc<dyn ExchangeSource>,
    pub(crate) writer: Arc<dyn ColorWriter>,
    pub(crate) settings: SettingsCache,
    pub(crate) state: Mutex<LoopState>,
    pub(crate) tick_in_progress: AtomicBool,
    pub(crate) poller: Mutex<Option<JoinHandle<()>>>,
}

impl ColorEngine {
    pub fn new(
        config: EngineConfig,
        source: Arc<dyn ExchangeSource>,
        writer: Arc<dyn ColorWriter>,
        store: Arc<dyn SettingsPersistence>,
    ) -> Self {
        let pending = PendingTracker::new(config.pending());
        Self {
            config,
            source,
            writer,
            settings: SettingsCache::new(store),
            state: Mutex::new(LoopState {
                cursor: CursorState::Uninitialized,
                pending,
            }),
            tick_in_progress: AtomicBool::new(false),
            poller: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Loads settings ahead of the first tick or notification.
    pub async fn warm_up(&self) {
        let settings = self.settings.get().await;
        info!(event = "settings_ready", auto_mode = settings.auto_mode);
    }

    /// Push path: a response just completed upstream.
    pub async fn handle_response_completed(
        &self,
        id: &str,
        response: &ResponseSummary,
    ) -> PaintOutcome {
        let settings = self.settings.get().await;
        if !settings.auto_mode {
            return PaintOutcome::Disabled;
        }
        self.loop_state().pending.resolve(id);
        self.paint(id, response, &settings.colors, PaintOrigin::Push)
            .await
    }

    pub fn pending_len(&self) -> usize {
        self.loop_state().pending.len()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.loop_state().pending.contains(id)
    }

    pub fn cursor_ready(&self) -> bool {
        self.loop_state().cursor.is_ready()
    }

    pub fn cursor_position(&self) -> Option<String> {
        self.loop_state().cursor.position()
    }

    pub(crate) fn loop_state(&self) -> MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Classifies and writes one response. Failures are logged here and
    /// reported as [`PaintOutcome::Failed`]; they never escape.
    pub(crate) async fn paint(
        &self,
        id: &str,
        response: &ResponseSummary,
        colors: &ColorTable,
        origin: PaintOrigin,
    ) -> PaintOutcome {
        let Some(color) = classify_response(response, colors) else {
            debug!(
                event = "color_skipped",
                origin = %origin,
                id = id,
                status = ?response.status_code
            );
            return PaintOutcome::Skipped;
        };

        if origin == PaintOrigin::Manual {
            info!(event = "manual_color", id = id, color = display_color(&color));
        }

        match self.writer.write_color(id, &color).await {
            Ok(()) => {
                debug!(
                    event = "color_written",
                    origin = %origin,
                    id = id,
                    color = display_color(&color)
                );
                PaintOutcome::Painted
            }
            Err(err) => {
                warn!(event = "color_write_failed", origin = %origin, id = id, error = %err);
                PaintOutcome::Failed
            }
        }
    }
}

fn display_color(color: &str) -> &str {
    if color.is_empty() {
        "clear"
    } else {
        color
    }
}
