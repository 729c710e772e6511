//! Identity-addressed request/response transport over UDP.
//!
//! A caller names its target by [`PublicId`]; a [`Resolver`] turns that into a socket
//! address. A request is a single datagram carrying a bincode-encoded [`Frame`]. A response
//! is split into as many parts as its payload needs ([`response_datagrams`]), each part
//! signed over `id ++ part ++ parts ++ chunk`. The caller accepts only parts that match
//! its request id and verify against the target's public key, and returns once every
//! part has arrived, so a reply from any other node is ignored.
//!
//! Frames are decoded with a size limit: a length prefix larger than a datagram is a
//! decode error, never an allocation.
//!
//! Delivery is best effort: a lost datagram surfaces as [`CacheError::Timeout`], and the
//! core never retries on its own.
use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use bincode::{Decode, Encode};
use log::{debug, warn};
use rand::Rng;

use crate::error::CacheError;
use crate::identity::{Identity, KEY_LEN, PublicId, SIGNATURE_LEN};
use crate::net::MAX_DATAGRAM;

/// Largest response chunk carried by one datagram.
pub const CHUNK_LEN: usize = 60_000;
/// Most parts a single response may be split into.
pub const MAX_PARTS: u32 = 1024;

/// One datagram on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum Frame {
    /// Caller -> server.
    Request {
        /// Correlates the response with this request.
        id: u64,
        /// Public key of the node that should answer.
        target: [u8; KEY_LEN],
        /// Procedure name.
        method: String,
        /// Opaque request body.
        payload: Vec<u8>,
    },
    /// Server -> caller, one part of a response.
    Response {
        /// Id of the request being answered.
        id: u64,
        /// Zero-based index of this part.
        part: u32,
        /// Number of parts in the whole response.
        parts: u32,
        /// This part's slice of the response body.
        payload: Vec<u8>,
        /// Server signature over [`Frame::signed_message`].
        signature: [u8; SIGNATURE_LEN],
    },
}

impl Frame {
    /// Encode the frame for a single datagram.
    pub fn encode(&self) -> Result<Vec<u8>, CacheError> {
        let bytes = bincode::encode_to_vec(self, bincode::config::standard())?;
        if bytes.len() > MAX_DATAGRAM {
            return Err(CacheError::Transport(format!(
                "frame of {} bytes exceeds datagram limit {}",
                bytes.len(),
                MAX_DATAGRAM
            )));
        }
        Ok(bytes)
    }

    /// Decode a frame from a datagram.
    pub fn decode(bytes: &[u8]) -> Result<Frame, CacheError> {
        let config = bincode::config::standard().with_limit::<MAX_DATAGRAM>();
        let (frame, _) = bincode::decode_from_slice(bytes, config)?;
        Ok(frame)
    }

    /// Bytes covered by a response part's signature.
    pub fn signed_message(id: u64, part: u32, parts: u32, payload: &[u8]) -> Vec<u8> {
        let mut message = Vec::with_capacity(16 + payload.len());
        message.extend_from_slice(&id.to_le_bytes());
        message.extend_from_slice(&part.to_le_bytes());
        message.extend_from_slice(&parts.to_le_bytes());
        message.extend_from_slice(payload);
        message
    }
}

/// Splits `payload` into signed, encoded response datagrams for request `id`.
///
/// An empty payload still produces one part. Fails if the payload needs more than
/// [`MAX_PARTS`] parts.
pub fn response_datagrams(
    identity: &Identity,
    id: u64,
    payload: &[u8],
) -> Result<Vec<Vec<u8>>, CacheError> {
    let chunks: Vec<&[u8]> = if payload.is_empty() {
        vec![payload]
    } else {
        payload.chunks(CHUNK_LEN).collect()
    };
    let parts = u32::try_from(chunks.len())
        .ok()
        .filter(|parts| *parts <= MAX_PARTS)
        .ok_or_else(|| {
            CacheError::Transport(format!("response of {} bytes is too large", payload.len()))
        })?;

    let mut datagrams = Vec::with_capacity(chunks.len());
    for (part, chunk) in (0u32..).zip(chunks) {
        let frame = Frame::Response {
            id,
            part,
            parts,
            payload: chunk.to_vec(),
            signature: identity.sign(&Frame::signed_message(id, part, parts, chunk)),
        };
        datagrams.push(frame.encode()?);
    }
    Ok(datagrams)
}

/// Parts of one response collected so far.
struct Reassembly {
    parts: Vec<Option<Vec<u8>>>,
    missing: usize,
}

impl Reassembly {
    fn new(parts: u32) -> Option<Self> {
        if parts == 0 || parts > MAX_PARTS {
            return None;
        }
        Some(Self {
            parts: vec![None; parts as usize],
            missing: parts as usize,
        })
    }

    /// Stores one part; returns the whole payload once the last part is in.
    fn insert(&mut self, part: u32, parts: u32, payload: Vec<u8>) -> Option<Vec<u8>> {
        if parts as usize != self.parts.len() {
            debug!("Ignoring part with inconsistent count {}", parts);
            return None;
        }
        let slot = self.parts.get_mut(part as usize)?;
        if slot.is_none() {
            *slot = Some(payload);
            self.missing -= 1;
        }
        if self.missing > 0 {
            return None;
        }
        Some(self.parts.iter_mut().filter_map(Option::take).flatten().collect())
    }
}

/// Resolves a public identity to a reachable socket address.
pub trait Resolver: Send + Sync {
    /// Address currently serving `id`.
    fn resolve(&self, id: &PublicId) -> Result<SocketAddr, CacheError>;
}

/// Fixed identity-to-address table.
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    peers: HashMap<PublicId, SocketAddr>,
}

impl StaticResolver {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the address for `id`.
    pub fn with_peer(mut self, id: PublicId, addr: SocketAddr) -> Self {
        self.peers.insert(id, addr);
        self
    }
}

impl Resolver for StaticResolver {
    fn resolve(&self, id: &PublicId) -> Result<SocketAddr, CacheError> {
        self.peers
            .get(id)
            .copied()
            .ok_or_else(|| CacheError::Transport(format!("no known address for {}", id)))
    }
}

/// Caller side of the transport: "send bytes to identity X, method M, get bytes back".
pub trait Transport: Send + Sync {
    /// Performs one request/response round trip.
    fn request(&self, target: &PublicId, method: &str, payload: &[u8]) -> Result<Vec<u8>, CacheError>;
}

/// UDP implementation of [`Transport`].
pub struct UdpTransport<R: Resolver> {
    socket: Mutex<UdpSocket>,
    resolver: R,
    timeout: Duration,
}

impl<R: Resolver> UdpTransport<R> {
    /// Binds a local socket at `bind_addr` (use port 0 for an ephemeral port).
    pub fn bind(bind_addr: &str, resolver: R, timeout: Duration) -> Result<Self, CacheError> {
        let socket = UdpSocket::bind(bind_addr)?;
        Ok(Self {
            socket: Mutex::new(socket),
            resolver,
            timeout,
        })
    }

    /// Local address of the underlying socket.
    pub fn local_addr(&self) -> Result<SocketAddr, CacheError> {
        Ok(self.socket.lock()?.local_addr()?)
    }
}

impl<R: Resolver> Transport for UdpTransport<R> {
    fn request(&self, target: &PublicId, method: &str, payload: &[u8]) -> Result<Vec<u8>, CacheError> {
        let server_addr = self.resolver.resolve(target)?;
        let request_id: u64 = rand::rng().random();
        let frame = Frame::Request {
            id: request_id,
            target: *target.as_bytes(),
            method: method.to_string(),
            payload: payload.to_vec(),
        }
        .encode()?;

        // One round trip at a time per socket, so responses cannot be stolen by a
        // concurrent caller.
        let socket = self.socket.lock()?;
        socket.send_to(&frame, server_addr)?;
        debug!("Sent {} request {} to {} at {}", method, request_id, target, server_addr);

        let deadline = Instant::now() + self.timeout;
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut reassembly: Option<Reassembly> = None;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(CacheError::Timeout(self.timeout.as_millis() as u64));
            }
            socket.set_read_timeout(Some(remaining))?;

            let (size, from) = match socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    continue;
                }
                Err(e) if e.kind() == ErrorKind::ConnectionReset => {
                    return Err(CacheError::Transport(format!(
                        "{} refused the request",
                        server_addr
                    )));
                }
                Err(e) => return Err(CacheError::Io(e)),
            };

            match Frame::decode(&buf[..size]) {
                Ok(Frame::Response {
                    id,
                    part,
                    parts,
                    payload,
                    signature,
                }) if id == request_id => {
                    let message = Frame::signed_message(id, part, parts, &payload);
                    if let Err(e) = target.verify(&message, &signature) {
                        warn!("Dropping response from {}: {}", from, e);
                        continue;
                    }
                    if reassembly.is_none() {
                        reassembly = Reassembly::new(parts);
                    }
                    let Some(collected) = reassembly.as_mut() else {
                        warn!("Dropping response from {} with {} parts", from, parts);
                        continue;
                    };
                    if let Some(payload) = collected.insert(part, parts, payload) {
                        return Ok(payload);
                    }
                }
                Ok(_) => debug!("Ignoring unrelated frame from {}", from),
                Err(e) => debug!("Ignoring undecodable datagram from {}: {}", from, e),
            }
        }
    }
}
