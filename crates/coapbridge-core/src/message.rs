//! Protocol-neutral message model
//!
//! These types sit between the bus side and the constrained-protocol side of
//! the bridge. Neither side's wire form leaks in here: the bus gateway moves
//! them with the envelope codec, the CoAP proxy maps them onto RFC 7252
//! options.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Request method carried by a bus method call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestCode {
    Get,
    Post,
    Put,
    Delete,
}

impl RequestCode {
    /// Wire value (the detail part of a 0.xx CoAP code)
    pub fn value(self) -> u8 {
        match self {
            Self::Get => 1,
            Self::Post => 2,
            Self::Put => 3,
            Self::Delete => 4,
        }
    }

    pub fn from_value(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Get),
            2 => Some(Self::Post),
            3 => Some(Self::Put),
            4 => Some(Self::Delete),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for RequestCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            other => Err(format!("unknown request method: {}", other)),
        }
    }
}

/// Response code as the raw `class.detail` byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResponseCode(pub u8);

impl ResponseCode {
    pub const CREATED: Self = Self::new(2, 1);
    pub const DELETED: Self = Self::new(2, 2);
    pub const VALID: Self = Self::new(2, 3);
    pub const CHANGED: Self = Self::new(2, 4);
    pub const CONTENT: Self = Self::new(2, 5);
    pub const BAD_REQUEST: Self = Self::new(4, 0);
    pub const UNAUTHORIZED: Self = Self::new(4, 1);
    pub const BAD_OPTION: Self = Self::new(4, 2);
    pub const FORBIDDEN: Self = Self::new(4, 3);
    pub const NOT_FOUND: Self = Self::new(4, 4);
    pub const METHOD_NOT_ALLOWED: Self = Self::new(4, 5);
    pub const NOT_ACCEPTABLE: Self = Self::new(4, 6);
    pub const PRECONDITION_FAILED: Self = Self::new(4, 12);
    pub const REQUEST_ENTITY_TOO_LARGE: Self = Self::new(4, 13);
    pub const UNSUPPORTED_CONTENT_FORMAT: Self = Self::new(4, 15);
    pub const INTERNAL_SERVER_ERROR: Self = Self::new(5, 0);
    pub const NOT_IMPLEMENTED: Self = Self::new(5, 1);
    pub const BAD_GATEWAY: Self = Self::new(5, 2);
    pub const SERVICE_UNAVAILABLE: Self = Self::new(5, 3);
    pub const GATEWAY_TIMEOUT: Self = Self::new(5, 4);
    pub const PROXYING_NOT_SUPPORTED: Self = Self::new(5, 5);

    pub const fn new(class: u8, detail: u8) -> Self {
        Self((class << 5) | (detail & 0x1f))
    }

    pub fn class(self) -> u8 {
        self.0 >> 5
    }

    pub fn detail(self) -> u8 {
        self.0 & 0x1f
    }

    pub fn is_success(self) -> bool {
        self.class() == 2
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class(), self.detail())
    }
}

/// Registered content formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum MediaType {
    TextPlain,
    LinkFormat,
    Xml,
    OctetStream,
    Exi,
    Json,
    Cbor,
    Other(u16),
}

impl MediaType {
    pub fn value(self) -> u16 {
        match self {
            Self::TextPlain => 0,
            Self::LinkFormat => 40,
            Self::Xml => 41,
            Self::OctetStream => 42,
            Self::Exi => 47,
            Self::Json => 50,
            Self::Cbor => 60,
            Self::Other(v) => v,
        }
    }
}

impl From<u16> for MediaType {
    fn from(value: u16) -> Self {
        match value {
            0 => Self::TextPlain,
            40 => Self::LinkFormat,
            41 => Self::Xml,
            42 => Self::OctetStream,
            47 => Self::Exi,
            50 => Self::Json,
            60 => Self::Cbor,
            v => Self::Other(v),
        }
    }
}

impl From<MediaType> for u16 {
    fn from(media: MediaType) -> Self {
        media.value()
    }
}

/// Option fields a bus caller can set on a request or read from a response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    #[serde(default)]
    pub content_format: Option<MediaType>,
    #[serde(default)]
    pub etag: Vec<Vec<u8>>,
    #[serde(default)]
    pub accept: Option<MediaType>,
    #[serde(default)]
    pub if_match: Vec<Vec<u8>>,
    #[serde(default)]
    pub if_none_match: bool,
    #[serde(default)]
    pub size1: Option<u32>,
}

/// Request as received from a bus caller
///
/// Query attributes are kept in key order, so the query string the bridge
/// builds from them is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMessage {
    #[serde(default)]
    pub options: Options,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub payload: Option<Vec<u8>>,
}

impl RequestMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Payload as text; a missing payload renders the same as an empty one
    pub fn payload_string(&self) -> String {
        payload_to_string(self.payload.as_deref())
    }

    pub fn set_payload_string(&mut self, payload: Option<&str>) {
        self.payload = payload.map(|p| p.as_bytes().to_vec());
    }
}

/// Reply handed back to a bus caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub code: ResponseCode,
    #[serde(default)]
    pub options: Options,
    #[serde(default)]
    pub payload: Option<Vec<u8>>,
}

impl ResponseMessage {
    pub fn new(code: ResponseCode) -> Self {
        Self {
            code,
            options: Options::default(),
            payload: None,
        }
    }

    pub fn with_text(code: ResponseCode, text: &str) -> Self {
        Self {
            code,
            options: Options {
                content_format: Some(MediaType::TextPlain),
                ..Options::default()
            },
            payload: Some(text.as_bytes().to_vec()),
        }
    }

    pub fn payload_string(&self) -> String {
        payload_to_string(self.payload.as_deref())
    }
}

fn payload_to_string(payload: Option<&[u8]>) -> String {
    match payload {
        Some(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        None => String::new(),
    }
}

/// Options of an outbound exchange, as handed to the proxy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionSet {
    pub content_format: Option<MediaType>,
    pub etags: Vec<Vec<u8>>,
    pub accept: Option<MediaType>,
    pub if_match: Vec<Vec<u8>>,
    pub if_none_match: bool,
    pub size1: Option<u32>,
    /// `key=value` pairs joined with `&`; empty when there are no attributes
    pub uri_query: String,
}

/// Protocol-neutral outbound request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRequest {
    pub code: RequestCode,
    pub confirmable: bool,
    /// Resource path the request targets
    pub path: String,
    pub options: OptionSet,
    pub payload: Option<Vec<u8>>,
}

impl ProxyRequest {
    pub fn new(code: RequestCode, path: impl Into<String>) -> Self {
        Self {
            code,
            confirmable: true,
            path: path.into(),
            options: OptionSet::default(),
            payload: None,
        }
    }
}

/// Protocol-neutral response to a [`ProxyRequest`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyResponse {
    pub code: ResponseCode,
    pub options: OptionSet,
    pub payload: Option<Vec<u8>>,
}

impl ProxyResponse {
    pub fn new(code: ResponseCode) -> Self {
        Self {
            code,
            options: OptionSet::default(),
            payload: None,
        }
    }
}
