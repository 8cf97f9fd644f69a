//! Async UDP client for single CoAP exchanges

use rand::Rng;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};
use tracing::{debug, trace};

use crate::codec::{CodecError, CoapMessage, MessageType};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Encoding failed: {0}")]
    Codec(#[from] CodecError),
    #[error("No response from {target} within {timeout_ms} ms")]
    Timeout { target: SocketAddr, timeout_ms: u64 },
    #[error("Node {0} reset the exchange")]
    Reset(SocketAddr),
}

/// Receive buffer size; covers the largest possible UDP payload
pub(crate) const MAX_DATAGRAM: usize = 65_536;

/// Token length used for outbound requests
const TOKEN_LEN: usize = 8;

/// Client side of one request/response exchange with a node
pub struct UdpCoapClient {
    socket: UdpSocket,
    target: SocketAddr,
    timeout_ms: u64,
    message_id: u16,
}

impl UdpCoapClient {
    /// Bind an ephemeral socket matching the target's address family
    pub async fn new(target: SocketAddr, timeout_ms: u64) -> Result<Self, TransportError> {
        let bind = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind).await?;

        Ok(Self {
            socket,
            target,
            timeout_ms,
            message_id: rand::random(),
        })
    }

    fn next_message_id(&mut self) -> u16 {
        let id = self.message_id;
        self.message_id = self.message_id.wrapping_add(1);
        id
    }

    /// Send `request` and wait for the response carrying its token
    ///
    /// The message id and token are assigned here. An empty ACK means the
    /// node will answer separately; waiting continues until the deadline.
    pub async fn transceive(&mut self, mut request: CoapMessage) -> Result<CoapMessage, TransportError> {
        request.message_id = self.next_message_id();
        if request.token.is_empty() {
            request.token = random_token();
        }
        let packet = request.encode()?;

        trace!(
            target = %self.target,
            mid = request.message_id,
            code = request.code,
            len = packet.len(),
            "Sending CoAP request"
        );
        self.socket.send_to(&packet, self.target).await?;

        let deadline = Instant::now() + Duration::from_millis(self.timeout_ms);
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let (len, from) = timeout(remaining, self.socket.recv_from(&mut buf))
                .await
                .map_err(|_| TransportError::Timeout {
                    target: self.target,
                    timeout_ms: self.timeout_ms,
                })??;

            if from != self.target {
                trace!(from = %from, "Ignoring datagram from unexpected peer");
                continue;
            }

            let response = match CoapMessage::decode(&buf[..len]) {
                Ok(msg) => msg,
                Err(e) => {
                    debug!(from = %from, error = %e, "Ignoring malformed datagram");
                    continue;
                }
            };

            if response.mtype == MessageType::Reset && response.message_id == request.message_id {
                return Err(TransportError::Reset(self.target));
            }

            if response.is_empty() {
                if response.mtype == MessageType::Acknowledgement
                    && response.message_id == request.message_id
                {
                    debug!(mid = response.message_id, "Empty ACK, waiting for separate response");
                }
                continue;
            }

            if response.token != request.token {
                trace!(mid = response.message_id, "Ignoring response with foreign token");
                continue;
            }

            if response.mtype == MessageType::Confirmable {
                let ack = CoapMessage::new(MessageType::Acknowledgement, 0, response.message_id);
                self.socket.send_to(&ack.encode()?, self.target).await?;
            }

            debug!(
                target = %self.target,
                mid = response.message_id,
                code = response.code,
                "Received CoAP response"
            );
            return Ok(response);
        }
    }
}

fn random_token() -> Vec<u8> {
    rand::thread_rng().gen::<[u8; TOKEN_LEN]>().to_vec()
}
