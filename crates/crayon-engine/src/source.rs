use async_trait::async_trait;
use crayon_core::{Exchange, ExchangePage, FeedQuery};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// The backing store is not reachable yet (typical right after start-up).
    #[error("exchange source unavailable: {0}")]
    Unavailable(String),
    #[error("exchange source request failed: {0}")]
    Transport(String),
    #[error("exchange source returned an unexpected reply: {0}")]
    Protocol(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    #[error("color mutation rejected: {}", .0.join(", "))]
    Rejected(Vec<String>),
    #[error("color mutation failed: {0}")]
    Transport(String),
}

impl WriteError {
    /// Maps the error list returned by the mutation onto a result; any entry
    /// at all means the write failed.
    pub fn check(errors: Vec<String>) -> Result<(), WriteError> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(WriteError::Rejected(errors))
        }
    }
}

/// Ordered feed of exchanges, ascending by creation time.
#[async_trait]
pub trait ExchangeSource: Send + Sync {
    async fn query(&self, query: FeedQuery) -> Result<ExchangePage, SourceError>;

    /// `Ok(None)` when the id is unknown to the source.
    async fn get(&self, id: &str) -> Result<Option<Exchange>, SourceError>;
}

/// Remote write that sets the color tag of one exchange. An empty color
/// clears the tag.
#[async_trait]
pub trait ColorWriter: Send + Sync {
    async fn write_color(&self, id: &str, color: &str) -> Result<(), WriteError>;
}
