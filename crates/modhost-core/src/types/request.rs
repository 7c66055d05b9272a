//! Request descriptors for module operations.
//!
//! These are protocol-neutral: a module translates them into whatever its
//! underlying library expects.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

use super::encoding::base64_bytes;

/// Narrows a subscription to messages carrying one of the listed content topics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ContentFilter {
    pub content_topics: Vec<String>,
}

impl ContentFilter {
    pub fn new<I, S>(content_topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            content_topics: content_topics.into_iter().map(Into::into).collect(),
        }
    }

    /// An empty filter matches every content topic.
    pub fn matches(&self, content_topic: &str) -> bool {
        self.content_topics.is_empty() || self.content_topics.iter().any(|t| t == content_topic)
    }
}

/// A message to publish on a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRequest {
    /// Routing topic (pubsub topic).
    pub topic: String,
    /// Application-level content topic.
    pub content_topic: String,
    /// Raw payload. Base64 in the JSON form.
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    /// Library-side send timeout. `None` uses the library default.
    #[serde(default)]
    pub timeout_ms: Option<u32>,
}

impl PublishRequest {
    pub fn new(
        topic: impl Into<String>,
        content_topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            topic: topic.into(),
            content_topic: content_topic.into(),
            payload: payload.into(),
            timeout_ms: None,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// Parameters of a historical-message query.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueryParams {
    /// Restrict to one routing topic.
    #[serde(default)]
    pub topic: Option<String>,
    /// Restrict to these content topics. Empty means all.
    #[serde(default)]
    pub content_topics: Vec<String>,
    /// Inclusive lower bound, nanoseconds since the Unix epoch.
    #[serde(default)]
    pub start_time: Option<i64>,
    /// Inclusive upper bound, nanoseconds since the Unix epoch.
    #[serde(default)]
    pub end_time: Option<i64>,
    /// Maximum number of results in one page.
    #[serde(default)]
    pub page_size: Option<u32>,
    /// Opaque cursor returned by a previous page.
    #[serde(default)]
    pub cursor: Option<String>,
    /// Oldest first when `true`.
    #[serde(default = "default_ascending")]
    pub ascending: bool,
}

impl QueryParams {
    pub fn topic(topic: impl Into<String>) -> Self {
        Self {
            topic: Some(topic.into()),
            ascending: true,
            ..Self::default()
        }
    }

    pub fn with_content_topics<I, S>(mut self, content_topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.content_topics = content_topics.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_time_range(mut self, start: Option<i64>, end: Option<i64>) -> Self {
        self.start_time = start;
        self.end_time = end;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }
}

fn default_ascending() -> bool {
    true
}

/// Operations a module may expose through the client proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Initialize,
    Start,
    Stop,
    Subscribe,
    Unsubscribe,
    Publish,
    Query,
    Teardown,
    State,
}

impl Operation {
    pub const ALL: [Operation; 9] = [
        Self::Initialize,
        Self::Start,
        Self::Stop,
        Self::Subscribe,
        Self::Unsubscribe,
        Self::Publish,
        Self::Query,
        Self::Teardown,
        Self::State,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Publish => "publish",
            Self::Query => "query",
            Self::Teardown => "teardown",
            Self::State => "state",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| AppError::unknown_request(format!("Unknown operation '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_filter_matching() {
        let filter = ContentFilter::new(["/app/1/chat/proto"]);
        assert!(filter.matches("/app/1/chat/proto"));
        assert!(!filter.matches("/app/1/other/proto"));
        assert!(ContentFilter::default().matches("/anything"));
    }

    #[test]
    fn test_publish_request_json_uses_base64() {
        let request = PublishRequest::new("/waku/2/rs/0/0", "/app/1/chat/proto", b"hi".to_vec());
        let json = serde_json::to_value(&request).expect("serialize");
        assert_eq!(json["payload"], "aGk=");

        let back: PublishRequest = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back.payload, b"hi");
    }

    #[test]
    fn test_query_params_defaults_from_json() {
        let params: QueryParams =
            serde_json::from_value(serde_json::json!({ "topic": "t" })).expect("deserialize");
        assert!(params.ascending);
        assert!(params.content_topics.is_empty());
    }

    #[test]
    fn test_operation_parse() {
        assert_eq!("publish".parse::<Operation>().ok(), Some(Operation::Publish));
        assert!("explode".parse::<Operation>().is_err());
    }
}
