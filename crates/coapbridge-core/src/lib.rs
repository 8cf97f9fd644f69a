//! CoAP Bridge Core - Message model and collaborator interfaces
//!
//! This crate provides the types shared by every part of the bridge:
//! - Protocol-neutral request/response messages and option sets
//! - A versioned binary envelope for moving messages across the bus
//! - Node and resource records kept by the resource directory
//! - The error taxonomy and the bus/proxy collaborator traits
//! - CoRE link-format parsing for registration payloads

pub mod bus;
pub mod envelope;
pub mod error;
pub mod link;
pub mod message;
pub mod node;
pub mod proxy;

pub use bus::BusTransport;
pub use envelope::EnvelopeError;
pub use error::{BridgeError, BusError, ProxyError};
pub use link::{parse_link_format, Link, LinkFormatError};
pub use message::{
    MediaType, OptionSet, Options, ProxyRequest, ProxyResponse, RequestCode, RequestMessage,
    ResponseCode, ResponseMessage,
};
pub use node::{Node, NodeId, ResourceEntry};
pub use proxy::Proxy;
