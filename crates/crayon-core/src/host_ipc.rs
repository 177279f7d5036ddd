//! Wire protocol between the hub and the plugin host running inside the
//! traffic tool. The host owns the exchange store: it answers feed and lookup
//! requests, runs the color mutation, and pushes a notification whenever a
//! response completes.

use crate::exchange_contracts::{Exchange, ExchangePage, FeedQuery};
use chrono::Utc;
use serde::de::{self, DeserializeOwned, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 512 * 1024;
pub const CURRENT_PROTOCOL_VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolVersion(pub u16);

impl ProtocolVersion {
    pub const CURRENT: Self = Self(CURRENT_PROTOCOL_VERSION);
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl Serialize for ProtocolVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for ProtocolVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct VersionVisitor;

        impl<'de> Visitor<'de> for VersionVisitor {
            type Value = ProtocolVersion;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a protocol version as string or integer")
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                u16::try_from(value)
                    .map(ProtocolVersion)
                    .map_err(|_| E::custom(format!("protocol version out of range: {value}")))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                let value = u64::try_from(value)
                    .map_err(|_| E::custom(format!("negative protocol version: {value}")))?;
                self.visit_u64(value)
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                value
                    .trim()
                    .trim_start_matches('v')
                    .parse::<u16>()
                    .map(ProtocolVersion)
                    .map_err(|err| E::custom(format!("invalid protocol version '{value}': {err}")))
            }
        }

        deserializer.deserialize_any(VersionVisitor)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireEnvelope {
    #[serde(default)]
    pub version: ProtocolVersion,
    pub sender_id: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub msg: WireMsg,
}

impl WireEnvelope {
    pub fn new(sender_id: impl Into<String>, msg: WireMsg) -> Self {
        Self {
            version: ProtocolVersion::CURRENT,
            sender_id: sender_id.into(),
            timestamp: Utc::now().to_rfc3339(),
            request_id: None,
            msg,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum WireMsg {
    Hello(HelloPayload),
    ResponseCompleted(ResponseCompletedPayload),
    QueryFeed(FeedQuery),
    FeedPage(ExchangePage),
    GetExchange(GetExchangePayload),
    ExchangeRecord(ExchangeRecordPayload),
    UpdateColor(UpdateColorPayload),
    ColorResult(ColorResultPayload),
    Error(ErrorPayload),
}

impl WireMsg {
    pub fn kind(&self) -> &'static str {
        match self {
            WireMsg::Hello(_) => "hello",
            WireMsg::ResponseCompleted(_) => "response_completed",
            WireMsg::QueryFeed(_) => "query_feed",
            WireMsg::FeedPage(_) => "feed_page",
            WireMsg::GetExchange(_) => "get_exchange",
            WireMsg::ExchangeRecord(_) => "exchange_record",
            WireMsg::UpdateColor(_) => "update_color",
            WireMsg::ColorResult(_) => "color_result",
            WireMsg::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HelloPayload {
    pub client_id: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseCompletedPayload {
    pub exchange: Exchange,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetExchangePayload {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExchangeRecordPayload {
    #[serde(default)]
    pub exchange: Option<Exchange>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateColorPayload {
    pub id: String,
    pub color: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColorResultPayload {
    pub id: String,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ColorResultPayload {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
}

pub fn encode_frame<T: Serialize>(value: &T, max_frame_bytes: usize) -> Result<String, FrameError> {
    let encoded = serde_json::to_string(value).map_err(|err| FrameError::Encode(err.to_string()))?;
    if encoded.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: encoded.len(),
            max: max_frame_bytes,
        });
    }
    Ok(encoded)
}

pub fn decode_frame<T: DeserializeOwned>(
    text: &str,
    max_frame_bytes: usize,
) -> Result<T, FrameError> {
    let raw = text.trim_end_matches(['\r', '\n']);
    if raw.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: raw.len(),
            max: max_frame_bytes,
        });
    }
    serde_json::from_str(raw).map_err(|err| FrameError::Decode(err.to_string()))
}
