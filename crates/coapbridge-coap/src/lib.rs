//! Coapbridge CoAP - UDP plumbing between the bridge and CoAP nodes
//!
//! Holds the RFC 7252 message codec, the client used to forward bus method
//! calls to nodes, and the resource directory endpoint nodes register with.

pub mod codec;
pub mod proxy;
pub mod server;
pub mod transport;

pub use codec::{CoapMessage, CodecError, MessageType, COAP_PORT};
pub use proxy::{CoapProxy, NodeContext, DEFAULT_TIMEOUT_MS};
pub use server::RdServer;
pub use transport::{TransportError, UdpCoapClient};
