use serde::{Deserialize, Serialize};

/// An exchange as seen by the colorizer: a stable id plus the response, once
/// one has arrived.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Exchange {
    pub id: String,
    #[serde(default)]
    pub response: Option<ResponseSummary>,
}

impl Exchange {
    pub fn pending(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            response: None,
        }
    }

    pub fn answered(id: impl Into<String>, response: ResponseSummary) -> Self {
        Self {
            id: id.into(),
            response: Some(response),
        }
    }

    pub fn has_response(&self) -> bool {
        self.response.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ResponseSummary {
    /// Absent while the exchange is still in flight upstream.
    #[serde(default)]
    pub status_code: Option<u16>,
    /// Every raw `Content-Type` header line, in wire order.
    #[serde(default)]
    pub content_type: Vec<String>,
}

impl ResponseSummary {
    pub fn new(status_code: u16, content_type: impl Into<String>) -> Self {
        Self {
            status_code: Some(status_code),
            content_type: vec![content_type.into()],
        }
    }

    pub fn status_only(status_code: u16) -> Self {
        Self {
            status_code: Some(status_code),
            content_type: Vec::new(),
        }
    }
}

/// Selection over the feed, always ascending by creation time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FeedQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<usize>,
}

impl FeedQuery {
    /// The newest `count` exchanges; used to park a cursor at the end of the feed.
    pub fn tail(count: usize) -> Self {
        Self {
            after: None,
            first: None,
            last: Some(count),
        }
    }

    /// Up to `count` exchanges after `cursor`, or from the start of the feed.
    pub fn after(cursor: Option<String>, count: usize) -> Self {
        Self {
            after: cursor,
            first: Some(count),
            last: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ExchangePage {
    #[serde(default)]
    pub items: Vec<Exchange>,
    #[serde(default)]
    pub end_cursor: Option<String>,
}

impl ExchangePage {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
