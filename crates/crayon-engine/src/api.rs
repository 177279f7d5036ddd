use crate::engine::{ColorEngine, PaintOrigin, PaintOutcome};
use crayon_core::{Settings, SettingsPatch};
use std::collections::HashSet;
use tracing::{info, warn};

/// Counters for one manual colorize request.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApplyReport {
    pub requested: usize,
    pub unique: usize,
    pub painted: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ColorEngine {
    /// Colors the given exchanges right now, regardless of auto mode.
    /// Duplicate and empty ids are ignored; one bad id never stops the rest.
    pub async fn apply_classification(&self, ids: &[String]) -> ApplyReport {
        let unique = dedupe_ids(ids);
        let mut report = ApplyReport {
            requested: ids.len(),
            unique: unique.len(),
            ..ApplyReport::default()
        };
        if unique.is_empty() {
            return report;
        }

        let colors = self.settings.get().await.colors;
        for id in unique {
            let exchange = match self.source.get(id).await {
                Ok(exchange) => exchange,
                Err(err) => {
                    warn!(event = "manual_lookup_failed", id = id, error = %err);
                    report.failed += 1;
                    continue;
                }
            };

            let Some(response) = exchange.and_then(|exchange| exchange.response) else {
                report.skipped += 1;
                continue;
            };

            match self.paint(id, &response, &colors, PaintOrigin::Manual).await {
                PaintOutcome::Painted => report.painted += 1,
                PaintOutcome::Skipped | PaintOutcome::Disabled => report.skipped += 1,
                PaintOutcome::Failed => report.failed += 1,
            }
        }

        info!(
            event = "manual_apply_complete",
            unique = report.unique,
            painted = report.painted,
            skipped = report.skipped,
            failed = report.failed
        );
        report
    }

    pub async fn get_settings(&self) -> Settings {
        self.settings.get().await
    }

    /// Replaces the settings wholesale; omitted fields take their defaults.
    pub async fn set_settings(&self, patch: SettingsPatch) -> Settings {
        let settings = self.settings.set(patch).await;
        info!(event = "settings_updated", auto_mode = settings.auto_mode);
        settings
    }

    pub async fn reset_settings(&self) -> Settings {
        let settings = self.settings.set(Settings::default().into()).await;
        info!(event = "settings_reset");
        settings
    }
}

fn dedupe_ids(ids: &[String]) -> Vec<&str> {
    let mut seen = HashSet::new();
    ids.iter()
        .map(String::as_str)
        .filter(|id| !id.is_empty() && seen.insert(*id))
        .collect()
}
