//! UDP front end of the RPC server.
//!
//! One receive thread decodes request frames and queues those addressed to this node's
//! identity on a bounded channel. A fixed pool of handler threads drains the queue, runs
//! the dispatch table and sends the signed response parts back to the caller. When the
//! queue is full the request is answered right away with a `server busy` error body.
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use log::{debug, error, info, warn};
use price_common::CacheError;
use price_common::identity::{Identity, PublicId};
use price_common::net::{MAX_DATAGRAM, POLL_INTERVAL};
use price_common::protocol::Response;
use price_common::transport::{Frame, response_datagrams};

use crate::dispatch::DispatchTable;

/// Handler threads started by [`RpcListener::start`].
pub const HANDLER_THREADS: usize = 8;
/// Accepted requests that may wait for a handler.
pub const QUEUE_DEPTH: usize = 256;

const BUSY_ERROR: &str = "server busy";
const TOO_LARGE_ERROR: &str = "response too large";

/// An accepted request waiting for a handler.
struct Job {
    from: SocketAddr,
    id: u64,
    method: String,
    payload: Vec<u8>,
}

/// State shared by the receive thread and the handlers.
struct Shared {
    socket: UdpSocket,
    identity: Identity,
    table: DispatchTable,
}

/// UDP listener answering request frames addressed to this node's identity.
///
/// Frames addressed to another identity, response frames and undecodable datagrams are
/// dropped.
pub struct RpcListener {
    shared: Arc<Shared>,
    handlers: usize,
    queue_depth: usize,
}

impl RpcListener {
    /// Bind the listening socket to `bind_addr` (e.g., `0.0.0.0:40001`).
    pub fn bind(bind_addr: &str, identity: Identity, table: DispatchTable) -> Result<Self, CacheError> {
        let socket = UdpSocket::bind(bind_addr)?;
        socket.set_read_timeout(Some(POLL_INTERVAL))?;
        Ok(Self {
            shared: Arc::new(Shared {
                socket,
                identity,
                table,
            }),
            handlers: HANDLER_THREADS,
            queue_depth: QUEUE_DEPTH,
        })
    }

    /// Overrides the handler pool size and queue depth (both at least 1).
    pub fn with_pool(mut self, handlers: usize, queue_depth: usize) -> Self {
        self.handlers = handlers.max(1);
        self.queue_depth = queue_depth.max(1);
        self
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, CacheError> {
        Ok(self.shared.socket.local_addr()?)
    }

    /// Identity callers must address.
    pub fn public_id(&self) -> PublicId {
        self.shared.identity.public_id()
    }

    /// Spawn the handler pool and the receive loop. Returns a handle that stops both.
    pub fn start(self) -> Result<ListenerHandle, CacheError> {
        let local_addr = self.local_addr()?;
        let (jobs_tx, jobs_rx) = bounded::<Job>(self.queue_depth);

        let mut workers = Vec::with_capacity(self.handlers);
        for n in 0..self.handlers {
            let shared = Arc::clone(&self.shared);
            let jobs = jobs_rx.clone();
            workers.push(
                thread::Builder::new()
                    .name(format!("rpc-handler-{}", n))
                    .spawn(move || handle_jobs(&shared, &jobs))?,
            );
        }
        drop(jobs_rx);

        let stop_flag = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop_flag);
        let shared = self.shared;
        let join = thread::Builder::new()
            .name(String::from("rpc-listener"))
            .spawn(move || {
                receive_loop(&shared, &flag, &jobs_tx);
                // Closing the queue lets the handlers finish what is queued and exit.
                drop(jobs_tx);
                for worker in workers {
                    if worker.join().is_err() {
                        error!("RPC handler thread panicked");
                    }
                }
                info!("RPC listener stopped");
            })?;
        Ok(ListenerHandle {
            stop_flag,
            join: Some(join),
            local_addr,
        })
    }
}

fn receive_loop(shared: &Shared, shutdown: &AtomicBool, jobs: &Sender<Job>) {
    info!(
        "RPC server listening on {} with public key {}",
        shared.socket.local_addr().map(|a| a.to_string()).unwrap_or_default(),
        shared.identity.public_id()
    );
    let own_key = *shared.identity.public_id().as_bytes();
    let mut buf = vec![0u8; MAX_DATAGRAM];

    while !shutdown.load(Ordering::Relaxed) {
        let (size, from) = match shared.socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::ConnectionReset
                ) =>
            {
                continue;
            }
            Err(e) => {
                error!("Receive error: {}", e);
                continue;
            }
        };

        match Frame::decode(&buf[..size]) {
            Ok(Frame::Request {
                id,
                target,
                method,
                payload,
            }) if target == own_key => {
                let job = Job {
                    from,
                    id,
                    method,
                    payload,
                };
                match jobs.try_send(job) {
                    Ok(()) => {}
                    Err(TrySendError::Full(job)) => {
                        warn!("Handler queue full, refusing {} from {}", job.method, job.from);
                        send_reply(shared, job.from, job.id, &error_body(BUSY_ERROR));
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        error!("All RPC handlers are gone");
                        break;
                    }
                }
            }
            Ok(Frame::Request { target, .. }) => {
                warn!(
                    "Dropping request from {} for foreign identity {}",
                    from,
                    PublicId::from_bytes(target)
                );
            }
            Ok(Frame::Response { .. }) => debug!("Ignoring response frame from {}", from),
            Err(e) => debug!("Ignoring undecodable datagram from {}: {}", from, e),
        }
    }
}

fn handle_jobs(shared: &Shared, jobs: &Receiver<Job>) {
    for job in jobs.iter() {
        debug!("Request {} {} from {}", job.id, job.method, job.from);
        let reply = shared.table.dispatch(&job.method, &job.payload);
        send_reply(shared, job.from, job.id, &reply);
    }
}

/// Signs and sends `reply` in as many parts as it needs. A reply too large to send is
/// replaced by an error body.
fn send_reply(shared: &Shared, to: SocketAddr, id: u64, reply: &[u8]) {
    let datagrams = match response_datagrams(&shared.identity, id, reply) {
        Ok(datagrams) => datagrams,
        Err(e) => {
            warn!("Reply to request {} not sendable: {}", id, e);
            match response_datagrams(&shared.identity, id, &error_body(TOO_LARGE_ERROR)) {
                Ok(datagrams) => datagrams,
                Err(e) => {
                    error!("Failed to encode error reply for {}: {}", to, e);
                    return;
                }
            }
        }
    };
    for datagram in datagrams {
        if let Err(e) = shared.socket.send_to(&datagram, to) {
            error!("Failed to send response to {}: {}", to, e);
            return;
        }
    }
}

fn error_body(message: &str) -> Vec<u8> {
    Response::error(message)
        .encode()
        .unwrap_or_else(|_| format!(r#"{{"error":"{}"}}"#, message).into_bytes())
}

/// Stops a running [`RpcListener`].
pub struct ListenerHandle {
    stop_flag: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl ListenerHandle {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops the receive loop and waits for it and the handler pool. Requests already
    /// queued are still answered.
    pub fn stop(mut self) -> Result<(), CacheError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), CacheError> {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| CacheError::ChannelRecv(String::from("rpc listener panicked")))?;
        }
        Ok(())
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Listener shutdown failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use price_common::protocol::ErrorBody;
    use price_common::transport::{StaticResolver, Transport, UdpTransport};
    use std::sync::Mutex;
    use std::time::Duration;

    #[test]
    fn full_queue_answers_busy() {
        // One handler, parked on a gate, with room for one queued request.
        let gate = Arc::new(Mutex::new(()));
        let held = gate.lock().unwrap();
        let mut table = DispatchTable::new();
        let inner = Arc::clone(&gate);
        table.register("slow", move |_| {
            let _open = inner.lock().unwrap();
            b"{}".to_vec()
        });
        let listener = RpcListener::bind("127.0.0.1:0", Identity::generate(), table)
            .unwrap()
            .with_pool(1, 1);
        let server = listener.public_id();
        let handle = listener.start().unwrap();

        let client = |timeout| {
            let resolver = StaticResolver::new().with_peer(server, handle.local_addr());
            UdpTransport::bind("127.0.0.1:0", resolver, timeout).unwrap()
        };
        // Occupies the handler, then the queue slot. Their replies are not awaited.
        let first = client(Duration::from_millis(100));
        assert!(first.request(&server, "slow", b"").is_err());
        let second = client(Duration::from_millis(100));
        assert!(second.request(&server, "slow", b"").is_err());

        let third = client(Duration::from_secs(2));
        let reply = third.request(&server, "slow", b"").unwrap();
        let body: ErrorBody = serde_json::from_slice(&reply).unwrap();
        assert_eq!(body.error, BUSY_ERROR);

        drop(held);
        handle.stop().unwrap();
    }
}
