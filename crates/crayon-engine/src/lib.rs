pub mod api;
pub mod config;
pub mod engine;
pub mod pending;
pub mod reconcile;
pub mod settings_cache;
pub mod source;

pub use api::ApplyReport;
pub use config::{ConfigError, EngineConfig};
pub use engine::{ColorEngine, PaintOrigin, PaintOutcome};
pub use pending::{PendingConfig, PendingTracker};
pub use reconcile::{TickReport, TickStatus};
pub use settings_cache::SettingsCache;
pub use source::{ColorWriter, ExchangeSource, SourceError, WriteError};
