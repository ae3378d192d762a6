//! Outbound responses.
//!
//! A `Response` answers exactly one `Trigger` and must carry the same context
//! variant. The usual way to get one is `Response::default_for(&trigger)`;
//! handlers that only care about the payload return a `Reply::Data` and let
//! the worker derive the context.

use std::collections::HashMap;
use std::fmt;
use std::io;

use serde::Serialize;
use serde_json::ser::Formatter;

use crate::error::{FaasError, FaasResult};
use crate::transport::proto;
use crate::trigger::{Trigger, TriggerContext, TriggerKind};

/// Default status of a successful HTTP response.
pub const DEFAULT_HTTP_STATUS: u16 = 200;

/// Status forced onto HTTP responses whose handler failed.
pub const FAILURE_HTTP_STATUS: u16 = 500;

const CONTENT_TYPE: &str = "Content-Type";
const APPLICATION_JSON: &str = "application/json";

/// Response metadata for an HTTP trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponseContext {
    /// Status code, 200 unless changed.
    pub status: u16,
    /// Response headers.
    pub headers: HashMap<String, String>,
}

impl Default for HttpResponseContext {
    fn default() -> Self {
        Self {
            status: DEFAULT_HTTP_STATUS,
            headers: HashMap::new(),
        }
    }
}

/// Acknowledgement for a topic trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicResponseContext {
    /// Whether the event was processed.
    pub success: bool,
}

impl Default for TopicResponseContext {
    fn default() -> Self {
        Self { success: true }
    }
}

/// The variant-specific part of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseContext {
    /// Answers an HTTP trigger.
    Http(HttpResponseContext),
    /// Answers a topic trigger.
    Topic(TopicResponseContext),
}

impl ResponseContext {
    /// Which trigger variant this context answers.
    #[must_use]
    pub const fn kind(&self) -> TriggerKind {
        match self {
            Self::Http(_) => TriggerKind::Http,
            Self::Topic(_) => TriggerKind::Topic,
        }
    }

    /// The default context answering a trigger context.
    #[must_use]
    pub fn default_for(context: &TriggerContext) -> Self {
        match context {
            TriggerContext::Http(_) => Self::Http(HttpResponseContext::default()),
            TriggerContext::Topic(_) => Self::Topic(TopicResponseContext::default()),
        }
    }
}

/// Response payload before serialization.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ResponseData {
    /// No body.
    #[default]
    Empty,
    /// Sent unchanged.
    Bytes(Vec<u8>),
    /// Sent as UTF-8.
    Text(String),
    /// Structured value, encoded by [`Response::data_to_bytes`].
    Json(serde_json::Value),
}

impl From<Vec<u8>> for ResponseData {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<&[u8]> for ResponseData {
    fn from(bytes: &[u8]) -> Self {
        Self::Bytes(bytes.to_vec())
    }
}

impl From<String> for ResponseData {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for ResponseData {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<serde_json::Value> for ResponseData {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<()> for ResponseData {
    fn from((): ()) -> Self {
        Self::Empty
    }
}

impl<T: Into<ResponseData>> From<Option<T>> for ResponseData {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Empty, Into::into)
    }
}

/// A handler's answer to a trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Variant-specific metadata; must match the trigger.
    pub context: ResponseContext,
    /// Body.
    pub data: ResponseData,
}

impl Response {
    /// The default response for a trigger: HTTP 200 with no headers, or a
    /// successful topic acknowledgement, and no data.
    #[must_use]
    pub fn default_for(trigger: &Trigger) -> Self {
        Self {
            context: ResponseContext::default_for(trigger.context()),
            data: ResponseData::Empty,
        }
    }

    /// The response sent when a handler fails: HTTP 500 or topic `success = false`.
    #[must_use]
    pub fn failure_for(trigger: &Trigger) -> Self {
        let mut response = Self::default_for(trigger);
        response.mark_failed();
        response
    }

    /// Forces the failure variant of the current context.
    pub fn mark_failed(&mut self) {
        match &mut self.context {
            ResponseContext::Http(http) => http.status = FAILURE_HTTP_STATUS,
            ResponseContext::Topic(topic) => topic.success = false,
        }
    }

    /// Which trigger variant this response answers.
    #[must_use]
    pub const fn kind(&self) -> TriggerKind {
        self.context.kind()
    }

    /// Mutable HTTP metadata, if this is an HTTP response.
    pub fn as_http_mut(&mut self) -> Option<&mut HttpResponseContext> {
        match &mut self.context {
            ResponseContext::Http(http) => Some(http),
            ResponseContext::Topic(_) => None,
        }
    }

    /// Mutable topic metadata, if this is a topic response.
    pub fn as_topic_mut(&mut self) -> Option<&mut TopicResponseContext> {
        match &mut self.context {
            ResponseContext::Topic(topic) => Some(topic),
            ResponseContext::Http(_) => None,
        }
    }

    /// Sets the HTTP status. Has no effect on topic responses.
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        if let Some(http) = self.as_http_mut() {
            http.status = status;
        }
        self
    }

    /// Sets an HTTP header. Has no effect on topic responses.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        if let Some(http) = self.as_http_mut() {
            http.headers.insert(name.into(), value.into());
        }
        self
    }

    /// Sets the topic success flag. Has no effect on HTTP responses.
    #[must_use]
    pub fn with_success(mut self, success: bool) -> Self {
        if let Some(topic) = self.as_topic_mut() {
            topic.success = success;
        }
        self
    }

    /// Replaces the body.
    #[must_use]
    pub fn with_data(mut self, data: impl Into<ResponseData>) -> Self {
        self.data = data.into();
        self
    }

    /// Serializes the payload.
    ///
    /// Priority: empty, raw bytes, text, then structured JSON. Encoding an
    /// object or array on an HTTP response also sets
    /// `Content-Type: application/json` on this response.
    pub fn data_to_bytes(&mut self) -> FaasResult<Vec<u8>> {
        let bytes = match &self.data {
            ResponseData::Empty | ResponseData::Json(serde_json::Value::Null) => Vec::new(),
            ResponseData::Bytes(bytes) => bytes.clone(),
            ResponseData::Text(text) => text.as_bytes().to_vec(),
            ResponseData::Json(serde_json::Value::String(text)) => text.as_bytes().to_vec(),
            ResponseData::Json(scalar @ (serde_json::Value::Bool(_) | serde_json::Value::Number(_))) => {
                scalar.to_string().into_bytes()
            }
            ResponseData::Json(structured) => {
                let encoded = encode_json(structured)?;
                if let ResponseContext::Http(http) = &mut self.context {
                    http.headers
                        .insert(CONTENT_TYPE.to_string(), APPLICATION_JSON.to_string());
                }
                encoded
            }
        };
        Ok(bytes)
    }

    /// Encodes this response for the trigger it answers.
    ///
    /// Fails with `InvariantViolation` when the context variant differs from
    /// the trigger's; the runtime reads the answer by the trigger's type.
    pub fn to_wire(mut self, expected: TriggerKind) -> FaasResult<proto::TriggerResponse> {
        let actual = self.kind();
        if actual != expected {
            return Err(FaasError::InvariantViolation { expected, actual });
        }

        let data = self.data_to_bytes()?;
        let context = match self.context {
            ResponseContext::Http(http) => proto::trigger_response::Context::Http(proto::HttpResponseContext {
                status: i32::from(http.status),
                headers: http.headers,
            }),
            ResponseContext::Topic(topic) => proto::trigger_response::Context::Topic(proto::TopicResponseContext {
                success: topic.success,
            }),
        };

        Ok(proto::TriggerResponse {
            data,
            context: Some(context),
        })
    }
}

/// What a handler returns on success.
///
/// `Data` is wrapped in the trigger's default response; `Response` is sent as is.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// A complete response.
    Response(Response),
    /// A body for the default response.
    Data(ResponseData),
}

impl Reply {
    /// An empty reply: the trigger's default response.
    #[must_use]
    pub const fn empty() -> Self {
        Self::Data(ResponseData::Empty)
    }

    /// Serializes any value into a structured JSON payload.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> FaasResult<Self> {
        serde_json::to_value(value)
            .map(|v| Self::Data(ResponseData::Json(v)))
            .map_err(|e| FaasError::Encode {
                message: e.to_string(),
            })
    }

    /// Uses the string form of a value as the payload.
    #[must_use]
    pub fn display(value: impl fmt::Display) -> Self {
        Self::Data(ResponseData::Text(value.to_string()))
    }

    /// Resolves the reply into a response for `trigger`.
    #[must_use]
    pub fn into_response(self, trigger: &Trigger) -> Response {
        self.resolve(Response::default_for(trigger))
    }

    /// Resolves the reply, using `default` as the context carrier for data.
    #[must_use]
    pub fn resolve(self, default: Response) -> Response {
        match self {
            Self::Response(response) => response,
            Self::Data(data) => default.with_data(data),
        }
    }
}

impl From<Response> for Reply {
    fn from(response: Response) -> Self {
        Self::Response(response)
    }
}

impl<T: Into<ResponseData>> From<T> for Reply {
    fn from(data: T) -> Self {
        Self::Data(data.into())
    }
}

/// JSON with `": "` and `", "` separators, e.g. `{"a": 1}` and `[1, 2]`.
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

fn encode_json(value: &serde_json::Value) -> FaasResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut out, SpacedFormatter);
    value.serialize(&mut ser).map_err(|e| FaasError::Encode {
        message: e.to_string(),
    })?;
    Ok(out)
}
