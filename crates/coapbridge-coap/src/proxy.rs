//! Proxy collaborator that forwards bus method calls to CoAP nodes

use async_trait::async_trait;
use coapbridge_core::{MediaType, OptionSet, Proxy, ProxyError, ProxyRequest, ProxyResponse, ResponseCode};
use coapbridge_registry::ResourceDirectory;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::lookup_host;
use tracing::{debug, warn};

use crate::codec::{option, CoapMessage, MessageType, COAP_PORT};
use crate::transport::{TransportError, UdpCoapClient};

/// Default exchange timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Parsed `coap://host[:port][/base]` node context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeContext {
    pub host: String,
    pub port: u16,
    /// Path prefix prepended to every resource path, without trailing slash
    pub base: String,
}

impl NodeContext {
    pub fn parse(context: &str) -> Result<Self, ProxyError> {
        let invalid = || ProxyError::InvalidContext(context.to_string());

        let rest = context.strip_prefix("coap://").ok_or_else(invalid)?;
        let (authority, base) = match rest.find('/') {
            Some(idx) => (&rest[..idx], rest[idx..].trim_end_matches('/')),
            None => (rest, ""),
        };

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let end = bracketed.find(']').ok_or_else(invalid)?;
            let host = &bracketed[..end];
            let port = match &bracketed[end + 1..] {
                "" => COAP_PORT,
                tail => tail
                    .strip_prefix(':')
                    .and_then(|p| p.parse().ok())
                    .ok_or_else(invalid)?,
            };
            (host, port)
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host, port.parse().map_err(|_| invalid())?),
                None => (authority, COAP_PORT),
            }
        };

        if host.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            host: host.to_string(),
            port,
            base: base.to_string(),
        })
    }

    /// Resolve to the first socket address of the host
    pub async fn resolve(&self) -> Result<SocketAddr, ProxyError> {
        lookup_host((self.host.as_str(), self.port))
            .await?
            .next()
            .ok_or_else(|| ProxyError::InvalidContext(self.host.clone()))
    }
}

/// Build the wire request for a neutral proxy request
pub fn to_coap_request(request: &ProxyRequest, base: &str) -> CoapMessage {
    let mtype = if request.confirmable {
        MessageType::Confirmable
    } else {
        MessageType::NonConfirmable
    };
    let mut message = CoapMessage::new(mtype, request.code.value(), 0);
    let opts = &request.options;

    for tag in &opts.if_match {
        message.add_option(option::IF_MATCH, tag.clone());
    }
    for tag in &opts.etags {
        message.add_option(option::ETAG, tag.clone());
    }
    if opts.if_none_match {
        message.add_option(option::IF_NONE_MATCH, Vec::new());
    }

    let path = format!("{}{}", base, request.path);
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        message.add_option(option::URI_PATH, segment.as_bytes());
    }

    if let Some(format) = opts.content_format {
        message.add_uint_option(option::CONTENT_FORMAT, u32::from(format.value()));
    }
    for pair in opts.uri_query.split('&').filter(|p| !p.is_empty()) {
        message.add_option(option::URI_QUERY, pair.as_bytes());
    }
    if let Some(accept) = opts.accept {
        message.add_uint_option(option::ACCEPT, u32::from(accept.value()));
    }
    if let Some(size) = opts.size1 {
        message.add_uint_option(option::SIZE1, size);
    }

    if let Some(payload) = &request.payload {
        message.payload = payload.clone();
    }
    message
}

/// Lift a wire response into the neutral response type
pub fn from_coap_response(message: &CoapMessage) -> ProxyResponse {
    let media = |number| {
        message
            .uint_option(number)
            .and_then(|v| u16::try_from(v).ok())
            .map(MediaType::from)
    };

    let options = OptionSet {
        content_format: media(option::CONTENT_FORMAT),
        etags: message.option_values(option::ETAG).map(<[u8]>::to_vec).collect(),
        accept: media(option::ACCEPT),
        if_match: message.option_values(option::IF_MATCH).map(<[u8]>::to_vec).collect(),
        if_none_match: message.has_option(option::IF_NONE_MATCH),
        size1: message.uint_option(option::SIZE1),
        uri_query: String::new(),
    };

    ProxyResponse {
        code: ResponseCode(message.code),
        options,
        payload: (!message.payload.is_empty()).then(|| message.payload.clone()),
    }
}

impl From<TransportError> for ProxyError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Io(e) => ProxyError::Transport(e),
            TransportError::Timeout { timeout_ms, .. } => ProxyError::Timeout(timeout_ms),
            TransportError::Reset(addr) => ProxyError::Reset(addr.to_string()),
            TransportError::Codec(e) => ProxyError::Malformed(e.to_string()),
        }
    }
}

/// Forwards requests to the node that owns the target path
pub struct CoapProxy {
    directory: Arc<ResourceDirectory>,
    timeout_ms: u64,
}

impl CoapProxy {
    pub fn new(directory: Arc<ResourceDirectory>, timeout_ms: u64) -> Self {
        Self {
            directory,
            timeout_ms,
        }
    }
}

#[async_trait]
impl Proxy for CoapProxy {
    async fn exchange(&self, request: ProxyRequest) -> Result<ProxyResponse, ProxyError> {
        let context = self
            .directory
            .context_for_path(&request.path)
            .ok_or_else(|| ProxyError::NoContext(request.path.clone()))?;
        let node = NodeContext::parse(&context)?;
        let target = node.resolve().await?;

        debug!(
            path = %request.path,
            target = %target,
            code = %request.code,
            "Forwarding request to node"
        );

        let message = to_coap_request(&request, &node.base);
        let mut client = UdpCoapClient::new(target, self.timeout_ms).await?;
        match client.transceive(message).await {
            Ok(response) => Ok(from_coap_response(&response)),
            Err(e) => {
                warn!(path = %request.path, target = %target, error = %e, "Exchange with node failed");
                Err(e.into())
            }
        }
    }
}
