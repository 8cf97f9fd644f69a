//! Resource directory endpoint for CoAP nodes
//!
//! Nodes announce themselves with `POST /rd?ep=<id>&con=<context>&lt=<secs>`
//! and a link-format payload listing their resources. The registration
//! location `rd/<id>` is used afterwards to refresh (`POST`) or drop
//! (`DELETE`) the registration.

use coapbridge_core::{parse_link_format, MediaType, NodeId, RequestCode, ResponseCode};
use coapbridge_registry::{is_valid_object_path, Bridge};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::codec::{option, CoapMessage, MessageType};
use crate::transport::{TransportError, MAX_DATAGRAM};

const RD_SEGMENT: &str = "rd";

/// UDP registration endpoint feeding the bridge
pub struct RdServer {
    bridge: Bridge,
    message_id: AtomicU16,
}

impl RdServer {
    pub fn new(bridge: Bridge) -> Self {
        Self {
            bridge,
            message_id: AtomicU16::new(rand::random()),
        }
    }

    /// Serve registrations on `socket` until a socket error occurs
    pub async fn run(self: Arc<Self>, socket: UdpSocket) -> Result<(), TransportError> {
        info!(address = %socket.local_addr()?, "Resource directory listening");
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            let (len, from) = socket.recv_from(&mut buf).await?;
            let request = match CoapMessage::decode(&buf[..len]) {
                Ok(msg) => msg,
                Err(e) => {
                    debug!(from = %from, error = %e, "Dropping malformed datagram");
                    continue;
                }
            };

            if let Some(response) = self.handle_request(&request, from) {
                match response.encode() {
                    Ok(packet) => {
                        socket.send_to(&packet, from).await?;
                    }
                    Err(e) => warn!(to = %from, error = %e, "Failed to encode response"),
                }
            }
        }
    }

    /// Produce the reply for one datagram, if it warrants one
    pub fn handle_request(&self, request: &CoapMessage, from: SocketAddr) -> Option<CoapMessage> {
        if request.is_empty() {
            // CoAP ping
            return (request.mtype == MessageType::Confirmable)
                .then(|| CoapMessage::new(MessageType::Reset, 0, request.message_id));
        }
        if !request.is_request() {
            return None;
        }

        let Some(code) = RequestCode::from_value(request.code) else {
            return Some(self.reply(request, ResponseCode::METHOD_NOT_ALLOWED));
        };

        let segments: Vec<String> = request
            .option_values(option::URI_PATH)
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .collect();
        let segments: Vec<&str> = segments.iter().map(String::as_str).collect();

        let mut response = match (code, segments.as_slice()) {
            (RequestCode::Post, [RD_SEGMENT]) => self.register(request, from),
            (RequestCode::Post, [RD_SEGMENT, id]) => self.refresh(request, id),
            (RequestCode::Delete, [RD_SEGMENT, id]) => self.deregister(request, id),
            (RequestCode::Get, [".well-known", "core"]) => {
                let mut response = self.reply(request, ResponseCode::CONTENT);
                response.add_uint_option(option::CONTENT_FORMAT, u32::from(MediaType::LinkFormat.value()));
                response.payload = br#"</rd>;rt="core.rd";ct=40"#.to_vec();
                response
            }
            (_, [RD_SEGMENT] | [RD_SEGMENT, _]) => self.reply(request, ResponseCode::METHOD_NOT_ALLOWED),
            _ => self.reply(request, ResponseCode::NOT_FOUND),
        };
        response.token = request.token.clone();
        Some(response)
    }

    fn register(&self, request: &CoapMessage, from: SocketAddr) -> CoapMessage {
        let mut endpoint = None;
        let mut context = None;
        let mut lifetime = None;
        for query in request.uri_query() {
            match query.split_once('=') {
                Some(("ep", v)) => endpoint = Some(v.to_string()),
                Some(("con", v)) => context = Some(v.to_string()),
                Some(("lt", v)) => match v.parse::<u64>() {
                    Ok(secs) => lifetime = Some(secs),
                    Err(_) => return self.reply(request, ResponseCode::BAD_REQUEST),
                },
                _ => {}
            }
        }

        let payload = match std::str::from_utf8(&request.payload) {
            Ok(text) => text,
            Err(_) => return self.reply(request, ResponseCode::BAD_REQUEST),
        };
        let links = match parse_link_format(payload) {
            Ok(links) => links,
            Err(e) => {
                debug!(from = %from, error = %e, "Rejecting registration with bad link-format");
                return self.reply(request, ResponseCode::BAD_REQUEST);
            }
        };
        let paths: Vec<String> = links.iter().map(|l| absolute_path(&l.target)).collect();
        if let Some(bad) = paths.iter().find(|p| !is_valid_object_path(p)) {
            debug!(from = %from, path = %bad, "Rejecting registration with unusable resource path");
            return self.reply(request, ResponseCode::BAD_REQUEST);
        }

        let node_id = endpoint.map(NodeId::new).unwrap_or_else(NodeId::temporary);
        let context = context.unwrap_or_else(|| format!("coap://{from}"));
        let lifetime = lifetime.unwrap_or_else(|| self.bridge.directory().default_lifetime_secs());

        self.bridge.on_node_registered(&node_id, &context, lifetime, &paths);
        info!(node = %node_id, from = %from, resources = paths.len(), "Registration accepted");

        let mut response = self.reply(request, ResponseCode::CREATED);
        response.add_option(option::LOCATION_PATH, RD_SEGMENT.as_bytes());
        response.add_option(option::LOCATION_PATH, node_id.as_str().as_bytes());
        response
    }

    fn refresh(&self, request: &CoapMessage, id: &str) -> CoapMessage {
        if self.bridge.directory().refresh_node(&NodeId::from(id)) {
            debug!(node = %id, "Registration refreshed");
            self.reply(request, ResponseCode::CHANGED)
        } else {
            self.reply(request, ResponseCode::NOT_FOUND)
        }
    }

    fn deregister(&self, request: &CoapMessage, id: &str) -> CoapMessage {
        let node_id = NodeId::from(id);
        if self.bridge.directory().get_node(&node_id).is_none() {
            return self.reply(request, ResponseCode::NOT_FOUND);
        }
        let removed = self.bridge.on_node_removed(&node_id);
        info!(node = %id, resources = removed.len(), "Registration removed");
        self.reply(request, ResponseCode::DELETED)
    }

    /// Piggybacked ACK for confirmable requests, NON otherwise
    fn reply(&self, request: &CoapMessage, code: ResponseCode) -> CoapMessage {
        match request.mtype {
            MessageType::Confirmable => {
                CoapMessage::new(MessageType::Acknowledgement, code.0, request.message_id)
            }
            _ => {
                let mid = self.message_id.fetch_add(1, Ordering::Relaxed);
                CoapMessage::new(MessageType::NonConfirmable, code.0, mid)
            }
        }
    }
}

fn absolute_path(target: &str) -> String {
    if target.starts_with('/') {
        target.to_string()
    } else {
        format!("/{target}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use coapbridge_core::{BusError, BusTransport, Proxy, ProxyError, ProxyRequest, ProxyResponse};
    use coapbridge_registry::{ObjectManager, ResourceDirectory};

    struct OpenBus;

    impl BusTransport for OpenBus {
        fn register_object(&self, _path: &str) -> Result<(), BusError> {
            Ok(())
        }

        fn unregister_object(&self, _path: &str) {}
    }

    struct NoProxy;

    #[async_trait]
    impl Proxy for NoProxy {
        async fn exchange(&self, request: ProxyRequest) -> Result<ProxyResponse, ProxyError> {
            Err(ProxyError::NoContext(request.path))
        }
    }

    fn server() -> RdServer {
        let (directory, _events) = ResourceDirectory::new(3600);
        let objects = ObjectManager::new(Arc::new(OpenBus), Arc::new(NoProxy), "com.bridge.coap");
        RdServer::new(Bridge::new(Arc::new(directory), Arc::new(objects)))
    }

    fn request(code: RequestCode, path: &str, query: &[&str]) -> CoapMessage {
        let mut msg = CoapMessage::new(MessageType::Confirmable, code.value(), 77);
        msg.token = vec![0xBE, 0xEF];
        msg.set_uri_path(path);
        for q in query {
            msg.add_option(option::URI_QUERY, q.as_bytes());
        }
        msg
    }

    fn from() -> SocketAddr {
        "10.0.0.5:5683".parse().unwrap()
    }

    #[test]
    fn test_registration() {
        let server = server();
        let mut msg = request(RequestCode::Post, "/rd", &["ep=node42", "lt=120"]);
        msg.payload = br#"</sensors/temp>;rt="temperature",<light>"#.to_vec();

        let response = server.handle_request(&msg, from()).unwrap();
        assert_eq!(response.mtype, MessageType::Acknowledgement);
        assert_eq!(response.message_id, 77);
        assert_eq!(response.token, vec![0xBE, 0xEF]);
        assert_eq!(response.code, ResponseCode::CREATED.0);
        let location: Vec<&[u8]> = response.option_values(option::LOCATION_PATH).collect();
        assert_eq!(location, vec![&b"rd"[..], &b"node42"[..]]);

        let directory = server.bridge.directory();
        let node = directory.get_node(&NodeId::from("node42")).unwrap();
        assert_eq!(node.context, "coap://10.0.0.5:5683");
        assert_eq!(node.lifetime_secs, 120);
        assert_eq!(directory.owner_of("/sensors/temp"), Some(NodeId::from("node42")));
        assert_eq!(directory.owner_of("/light"), Some(NodeId::from("node42")));
    }

    #[test]
    fn test_registration_defaults() {
        let server = server();
        let mut msg = request(RequestCode::Post, "/rd", &["con=coap://[fe80::1]"]);
        msg.payload = b"</a>".to_vec();

        let response = server.handle_request(&msg, from()).unwrap();
        assert_eq!(response.code, ResponseCode::CREATED.0);

        let owner = server.bridge.directory().owner_of("/a").unwrap();
        assert!(owner.as_str().starts_with("temp-"));
        let node = server.bridge.directory().get_node(&owner).unwrap();
        assert_eq!(node.context, "coap://[fe80::1]");
        assert_eq!(node.lifetime_secs, 3600);
    }

    #[test]
    fn test_bad_registration() {
        let server = server();
        let mut msg = request(RequestCode::Post, "/rd", &["ep=n", "lt=soon"]);
        let response = server.handle_request(&msg, from()).unwrap();
        assert_eq!(response.code, ResponseCode::BAD_REQUEST.0);

        msg = request(RequestCode::Post, "/rd", &["ep=n"]);
        msg.payload = b"</unterminated".to_vec();
        let response = server.handle_request(&msg, from()).unwrap();
        assert_eq!(response.code, ResponseCode::BAD_REQUEST.0);
        assert!(server.bridge.directory().get_node(&NodeId::from("n")).is_none());
    }

    #[test]
    fn test_registration_rejects_unusable_paths() {
        let server = server();
        for target in ["</a>,</dir/>", "<coap://10.0.0.9/x>", "</has space>"] {
            let mut msg = request(RequestCode::Post, "/rd", &["ep=n"]);
            msg.payload = target.as_bytes().to_vec();
            let response = server.handle_request(&msg, from()).unwrap();
            assert_eq!(response.code, ResponseCode::BAD_REQUEST.0, "accepted {target}");
        }
        assert!(server.bridge.directory().get_node(&NodeId::from("n")).is_none());
        assert_eq!(server.bridge.directory().owner_of("/a"), None);
    }

    #[test]
    fn test_refresh_and_delete() {
        let server = server();
        let mut msg = request(RequestCode::Post, "/rd", &["ep=node42"]);
        msg.payload = b"</a>,</b>".to_vec();
        server.handle_request(&msg, from()).unwrap();

        let refresh = request(RequestCode::Post, "/rd/node42", &[]);
        assert_eq!(
            server.handle_request(&refresh, from()).unwrap().code,
            ResponseCode::CHANGED.0
        );

        let delete = request(RequestCode::Delete, "/rd/node42", &[]);
        assert_eq!(
            server.handle_request(&delete, from()).unwrap().code,
            ResponseCode::DELETED.0
        );
        assert!(server.bridge.directory().list_resources().is_empty());

        assert_eq!(
            server.handle_request(&delete, from()).unwrap().code,
            ResponseCode::NOT_FOUND.0
        );
        assert_eq!(
            server.handle_request(&refresh, from()).unwrap().code,
            ResponseCode::NOT_FOUND.0
        );
    }

    #[test]
    fn test_unknown_routes() {
        let server = server();
        let get_rd = request(RequestCode::Get, "/rd", &[]);
        assert_eq!(
            server.handle_request(&get_rd, from()).unwrap().code,
            ResponseCode::METHOD_NOT_ALLOWED.0
        );

        let elsewhere = request(RequestCode::Get, "/sensors/temp", &[]);
        assert_eq!(
            server.handle_request(&elsewhere, from()).unwrap().code,
            ResponseCode::NOT_FOUND.0
        );

        let mut non = request(RequestCode::Get, "/nowhere", &[]);
        non.mtype = MessageType::NonConfirmable;
        let response = server.handle_request(&non, from()).unwrap();
        assert_eq!(response.mtype, MessageType::NonConfirmable);
    }

    #[test]
    fn test_ping_and_discovery() {
        let server = server();
        let ping = CoapMessage::new(MessageType::Confirmable, 0, 9);
        let pong = server.handle_request(&ping, from()).unwrap();
        assert_eq!(pong.mtype, MessageType::Reset);
        assert_eq!(pong.message_id, 9);

        let ack = CoapMessage::new(MessageType::Acknowledgement, 0, 9);
        assert!(server.handle_request(&ack, from()).is_none());

        let core = request(RequestCode::Get, "/.well-known/core", &[]);
        let response = server.handle_request(&core, from()).unwrap();
        assert_eq!(response.code, ResponseCode::CONTENT.0);
        assert_eq!(response.uint_option(option::CONTENT_FORMAT), Some(40));
    }

    #[tokio::test]
    async fn test_registration_over_udp() {
        let server = Arc::new(server());
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let handle = tokio::spawn(server.clone().run(socket));

        let mut client = crate::transport::UdpCoapClient::new(addr, 2000).await.unwrap();
        let mut msg = request(RequestCode::Post, "/rd", &["ep=udp-node"]);
        msg.token.clear();
        msg.payload = b"</x>".to_vec();
        let response = client.transceive(msg).await.unwrap();
        assert_eq!(response.code, ResponseCode::CREATED.0);
        assert_eq!(
            server.bridge.directory().owner_of("/x"),
            Some(NodeId::from("udp-node"))
        );
        handle.abort();
    }

    #[tokio::test]
    async fn test_large_registration_over_udp() {
        let server = Arc::new(server());
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let handle = tokio::spawn(server.clone().run(socket));

        let links: Vec<String> = (0..200)
            .map(|i| format!("</sensors/s{i:03}>;rt=\"temperature\""))
            .collect();
        let payload = links.join(",");
        assert!(payload.len() > 4000);

        let mut client = crate::transport::UdpCoapClient::new(addr, 2000).await.unwrap();
        let mut msg = request(RequestCode::Post, "/rd", &["ep=big-node"]);
        msg.token.clear();
        msg.payload = payload.into_bytes();
        let response = client.transceive(msg).await.unwrap();
        assert_eq!(response.code, ResponseCode::CREATED.0);

        let directory = server.bridge.directory();
        assert_eq!(directory.list_resources().len(), 200);
        assert_eq!(
            directory.owner_of("/sensors/s199"),
            Some(NodeId::from("big-node"))
        );
        handle.abort();
    }
}
