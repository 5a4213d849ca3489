use crate::accumulator::EncodedBatch;
use crate::encoding::write_emit_batch;
use crate::error::{SendError, TransportError};
use crate::probe::Encoded;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use tracing::debug;

/// Trait for handing closed batches to the agent.
///
/// Sending is fire-and-forget: an `Ok` only means the datagram left the
/// process. Callers never retry a failed batch.
pub trait Sender {
    /// Sends one batch.
    fn emit_batch(&mut self, batch: &EncodedBatch) -> Result<(), SendError>;

    /// Releases the underlying resources. Later sends fail with [`SendError::Closed`].
    fn close(&mut self) {}

    /// Returns the sender name for debugging.
    fn name(&self) -> &str;
}

/// Boxed senders are senders too, so a transport can hold `Box<dyn Sender>`.
impl<S: Sender + ?Sized> Sender for Box<S> {
    fn emit_batch(&mut self, batch: &EncodedBatch) -> Result<(), SendError> {
        (**self).emit_batch(batch)
    }

    fn close(&mut self) {
        (**self).close();
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Sends each batch as one `emitBatch` UDP datagram to a Jaeger agent.
pub struct UdpSender {
    socket: Option<UdpSocket>,
    agent_addr: SocketAddr,
    max_packet_size: usize,
    /// Reused datagram buffer
    buffer: Vec<u8>,
    seq_id: i32,
}

impl UdpSender {
    /// Resolves `agent_host_port` and opens a socket connected to it.
    pub fn connect(agent_host_port: &str, max_packet_size: usize) -> Result<Self, TransportError> {
        let agent_addr = resolve(agent_host_port)?;
        let bind_addr = match agent_addr.ip() {
            IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };

        let socket = UdpSocket::bind(bind_addr)?;
        socket.connect(agent_addr)?;
        debug!(agent = %agent_addr, local = %socket.local_addr()?, "udp sender connected");

        Ok(Self {
            socket: Some(socket),
            agent_addr,
            max_packet_size,
            buffer: Vec::with_capacity(max_packet_size),
            seq_id: 0,
        })
    }

    /// The resolved agent address
    pub fn agent_addr(&self) -> SocketAddr {
        self.agent_addr
    }

    /// Local address of the socket, if still open
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    pub fn is_closed(&self) -> bool {
        self.socket.is_none()
    }
}

impl Sender for UdpSender {
    fn emit_batch(&mut self, batch: &EncodedBatch) -> Result<(), SendError> {
        let socket = self.socket.as_ref().ok_or(SendError::Closed)?;

        self.buffer.clear();
        write_emit_batch(
            &mut self.buffer,
            self.seq_id,
            batch.process.as_bytes(),
            batch.spans.iter().map(Encoded::as_bytes),
        )?;
        self.seq_id = self.seq_id.wrapping_add(1);

        if self.buffer.len() > self.max_packet_size {
            return Err(SendError::Oversized {
                size: self.buffer.len(),
                limit: self.max_packet_size,
            });
        }

        socket.send(&self.buffer)?;
        Ok(())
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            debug!(agent = %self.agent_addr, "udp sender closed");
        }
    }

    fn name(&self) -> &str {
        "udp"
    }
}

/// Sender that discards every batch (for benchmarking)
#[derive(Debug, Default)]
pub struct NullSender;

impl NullSender {
    pub fn new() -> Self {
        Self
    }
}

impl Sender for NullSender {
    fn emit_batch(&mut self, _batch: &EncodedBatch) -> Result<(), SendError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

fn resolve(host_port: &str) -> Result<SocketAddr, TransportError> {
    let valid = host_port
        .rsplit_once(':')
        .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
    if !valid {
        return Err(TransportError::InvalidAddress(host_port.to_string()));
    }

    // A failed lookup and an empty answer are the same to the caller
    host_port
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| TransportError::Unresolvable(host_port.to_string()))
}
