pub mod color_contracts;
pub mod exchange_contracts;
pub mod host_ipc;

pub use color_contracts::{
    classify, classify_response, ColorSlot, ColorTable, ColorTablePatch, ContentCategory,
    Settings, SettingsPatch,
};
pub use exchange_contracts::{Exchange, ExchangePage, FeedQuery, ResponseSummary};
