//! Inbound triggers.
//!
//! A `Trigger` is the normalized unit of work handed to a handler: either an
//! HTTP request or a topic event, plus the raw payload bytes. The context is a
//! closed sum type, so a trigger with neither variant cannot be constructed.

use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;

use crate::error::{DecodeError, FaasError, FaasResult};
use crate::transport::proto;

/// Header prefix the runtime uses for protocol metadata.
pub const NITRIC_HEADER_PREFIX: &str = "x-nitric-";

/// Which variant a trigger (or response) context holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    /// An HTTP request.
    Http,
    /// A topic event.
    Topic,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::Topic => write!(f, "topic"),
        }
    }
}

/// Context of an HTTP trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpTriggerContext {
    /// Request method, e.g. `GET`.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Request headers; a header may repeat.
    pub headers: HashMap<String, Vec<String>>,
    /// Query parameters; a parameter may repeat.
    pub query_params: HashMap<String, Vec<String>>,
}

impl HttpTriggerContext {
    /// First value of a header. Header names are matched case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .and_then(|(_, values)| values.first())
            .map(String::as_str)
    }

    /// First value of a query parameter.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query_params
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Protocol metadata carried in `x-nitric-*` headers.
    ///
    /// `x-nitric-source-type` becomes `source_type`.
    #[must_use]
    pub fn nitric_metadata(&self) -> HashMap<String, Vec<String>> {
        self.headers
            .iter()
            .filter_map(|(key, values)| {
                let lower = key.to_ascii_lowercase();
                lower
                    .strip_prefix(NITRIC_HEADER_PREFIX)
                    .map(|rest| (rest.replace('-', "_"), values.clone()))
            })
            .collect()
    }
}

/// Context of a topic trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicTriggerContext {
    /// Name of the topic the event was published to.
    pub topic: String,
}

/// The variant-specific part of a trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerContext {
    /// An HTTP request.
    Http(HttpTriggerContext),
    /// A topic event.
    Topic(TopicTriggerContext),
}

impl TriggerContext {
    /// Which variant this is.
    #[must_use]
    pub const fn kind(&self) -> TriggerKind {
        match self {
            Self::Http(_) => TriggerKind::Http,
            Self::Topic(_) => TriggerKind::Topic,
        }
    }

    /// The HTTP context, if any.
    #[must_use]
    pub const fn as_http(&self) -> Option<&HttpTriggerContext> {
        match self {
            Self::Http(ctx) => Some(ctx),
            Self::Topic(_) => None,
        }
    }

    /// The topic context, if any.
    #[must_use]
    pub const fn as_topic(&self) -> Option<&TopicTriggerContext> {
        match self {
            Self::Topic(ctx) => Some(ctx),
            Self::Http(_) => None,
        }
    }
}

impl From<proto::HttpTriggerContext> for HttpTriggerContext {
    fn from(ctx: proto::HttpTriggerContext) -> Self {
        Self {
            method: ctx.method,
            path: ctx.path,
            headers: ctx.headers.into_iter().map(|(k, v)| (k, v.value)).collect(),
            query_params: ctx.query_params.into_iter().map(|(k, v)| (k, v.value)).collect(),
        }
    }
}

/// An inbound unit of work.
///
/// Immutable once built; handlers receive it by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    context: TriggerContext,
    data: Vec<u8>,
}

impl Trigger {
    /// Builds a trigger directly. Mostly useful for testing handlers.
    #[must_use]
    pub fn new(context: TriggerContext, data: impl Into<Vec<u8>>) -> Self {
        Self {
            context,
            data: data.into(),
        }
    }

    /// Shorthand for an HTTP trigger with no headers or query parameters.
    #[must_use]
    pub fn http(method: impl Into<String>, path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self::new(
            TriggerContext::Http(HttpTriggerContext {
                method: method.into(),
                path: path.into(),
                ..HttpTriggerContext::default()
            }),
            data,
        )
    }

    /// Shorthand for a topic trigger.
    #[must_use]
    pub fn topic(topic: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self::new(
            TriggerContext::Topic(TopicTriggerContext { topic: topic.into() }),
            data,
        )
    }

    /// Decodes a wire trigger request.
    ///
    /// `id` is only used to label the error when no context is populated.
    pub fn from_wire(id: &str, request: proto::TriggerRequest) -> Result<Self, DecodeError> {
        let context = match request.context {
            Some(proto::trigger_request::Context::Http(http)) => TriggerContext::Http(http.into()),
            Some(proto::trigger_request::Context::Topic(topic)) => {
                TriggerContext::Topic(TopicTriggerContext { topic: topic.topic })
            }
            None => {
                return Err(DecodeError::MissingContext { id: id.to_string() });
            }
        };

        Ok(Self {
            context,
            data: request.data,
        })
    }

    /// Variant-specific context.
    #[must_use]
    pub const fn context(&self) -> &TriggerContext {
        &self.context
    }

    /// Which variant this trigger is.
    #[must_use]
    pub const fn kind(&self) -> TriggerKind {
        self.context.kind()
    }

    /// Raw payload.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Takes the raw payload.
    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Parses the payload as JSON.
    pub fn get_object(&self) -> FaasResult<serde_json::Value> {
        self.get_object_as()
    }

    /// Parses the payload as JSON into a typed value.
    pub fn get_object_as<T: DeserializeOwned>(&self) -> FaasResult<T> {
        serde_json::from_slice(&self.data).map_err(|source| FaasError::PayloadDecode { source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire_http() -> proto::TriggerRequest {
        let mut headers = HashMap::new();
        headers.insert(
            "Accept".to_string(),
            proto::HeaderValue {
                value: vec!["text/plain".to_string(), "application/json".to_string()],
            },
        );
        headers.insert(
            "x-nitric-source-type".to_string(),
            proto::HeaderValue {
                value: vec!["REQUEST".to_string()],
            },
        );
        let mut query_params = HashMap::new();
        query_params.insert(
            "page".to_string(),
            proto::QueryValue {
                value: vec!["2".to_string()],
            },
        );

        proto::TriggerRequest {
            data: vec![0, 159, 146, 150],
            context: Some(proto::trigger_request::Context::Http(proto::HttpTriggerContext {
                method: "POST".to_string(),
                path: "/orders".to_string(),
                headers,
                query_params,
            })),
        }
    }

    #[test]
    fn http_from_wire_preserves_fields() {
        let wire = wire_http();
        let trigger = Trigger::from_wire("1", wire.clone()).unwrap();

        let ctx = trigger.context().as_http().expect("http context");
        assert_eq!(ctx.method, "POST");
        assert_eq!(ctx.path, "/orders");
        assert_eq!(trigger.data(), &[0, 159, 146, 150]);

        let proto::trigger_request::Context::Http(wire_ctx) = wire.context.unwrap() else {
            panic!("expected http wire context");
        };
        for (key, values) in wire_ctx.headers {
            assert_eq!(ctx.headers.get(&key), Some(&values.value));
        }
        for (key, values) in wire_ctx.query_params {
            assert_eq!(ctx.query_params.get(&key), Some(&values.value));
        }
    }

    #[test]
    fn topic_from_wire() {
        let wire = proto::TriggerRequest {
            data: b"{\"n\":1}".to_vec(),
            context: Some(proto::trigger_request::Context::Topic(proto::TopicTriggerContext {
                topic: "orders".to_string(),
            })),
        };
        let trigger = Trigger::from_wire("2", wire).unwrap();
        assert_eq!(trigger.kind(), TriggerKind::Topic);
        assert_eq!(trigger.context().as_topic().unwrap().topic, "orders");
        assert!(trigger.context().as_http().is_none());
    }

    #[test]
    fn missing_context_fails_to_decode() {
        let wire = proto::TriggerRequest {
            data: Vec::new(),
            context: None,
        };
        let err = Trigger::from_wire("9", wire).unwrap_err();
        assert!(matches!(err, DecodeError::MissingContext { ref id } if id == "9"));
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let trigger = Trigger::from_wire("1", wire_http()).unwrap();
        let ctx = trigger.context().as_http().unwrap();
        assert_eq!(ctx.header("accept"), Some("text/plain"));
        assert_eq!(ctx.query_param("page"), Some("2"));
        assert_eq!(ctx.query_param("missing"), None);
    }

    #[test]
    fn nitric_metadata_strips_prefix() {
        let trigger = Trigger::from_wire("1", wire_http()).unwrap();
        let meta = trigger.context().as_http().unwrap().nitric_metadata();
        assert_eq!(meta.len(), 1);
        assert_eq!(meta.get("source_type"), Some(&vec!["REQUEST".to_string()]));
    }

    #[test]
    fn get_object_parses_json() {
        let trigger = Trigger::topic("t", br#"{"key":"value","num":123}"#.to_vec());
        let value = trigger.get_object().unwrap();
        assert_eq!(value["key"], "value");
        assert_eq!(value["num"], 123);
    }

    #[test]
    fn get_object_rejects_non_json() {
        let trigger = Trigger::http("GET", "/", b"not json".to_vec());
        let err = trigger.get_object().unwrap_err();
        assert!(matches!(err, FaasError::PayloadDecode { .. }));
    }
}
