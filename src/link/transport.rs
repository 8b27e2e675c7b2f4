//! Trait abstraction over link transports, so links can be driven by
//! serial ports, sockets or in-memory channels interchangeably

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio_serial::SerialPortBuilderExt;
use tracing::debug;

use super::endpoint::Endpoint;
use crate::error::{ProxyError, Result};

/// Trait for link I/O operations
#[async_trait]
pub trait Transport: Send {
    /// Read whatever is available into `buf`
    ///
    /// `Ok(0)` means nothing arrived and is not an error; the caller backs
    /// off and tries again. A closed stream is reported as an error.
    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write one frame (or any byte run) in full
    async fn send(&mut self, data: &[u8]) -> io::Result<()>;

    /// Human-readable description for logs
    fn describe(&self) -> String;
}

/// Open the transport named by `endpoint`
///
/// # Errors
///
/// Returns [`ProxyError::Transport`] if the device or socket cannot be opened.
pub async fn open_transport(endpoint: &Endpoint, rtscts: bool) -> Result<Box<dyn Transport>> {
    let label = endpoint.to_string();
    match endpoint {
        Endpoint::Serial { path, baud } => {
            Ok(Box::new(SerialTransport::open(path, *baud, rtscts)?))
        }
        Endpoint::UdpIn(addr) => {
            let socket = UdpSocket::bind(addr)
                .await
                .map_err(|e| ProxyError::transport(&label, e))?;
            Ok(Box::new(UdpTransport::new(socket, None, true)))
        }
        Endpoint::UdpOut(addr) | Endpoint::UdpBroadcast(addr) => {
            let peer = tokio::net::lookup_host(addr.as_str())
                .await
                .map_err(|e| ProxyError::transport(&label, e))?
                .next()
                .ok_or_else(|| ProxyError::transport(&label, "address did not resolve"))?;
            let bind = if peer.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
            let socket = UdpSocket::bind(bind)
                .await
                .map_err(|e| ProxyError::transport(&label, e))?;
            if matches!(endpoint, Endpoint::UdpBroadcast(_)) {
                socket
                    .set_broadcast(true)
                    .map_err(|e| ProxyError::transport(&label, e))?;
            }
            Ok(Box::new(UdpTransport::new(socket, Some(peer), false)))
        }
        Endpoint::Tcp(addr) => {
            let stream = TcpStream::connect(addr.as_str())
                .await
                .map_err(|e| ProxyError::transport(&label, e))?;
            stream
                .set_nodelay(true)
                .map_err(|e| ProxyError::transport(&label, e))?;
            Ok(Box::new(TcpTransport {
                stream,
                label,
            }))
        }
    }
}

/// Serial device transport (8N1)
pub struct SerialTransport {
    port: tokio_serial::SerialStream,
    path: String,
}

impl SerialTransport {
    /// Open a serial device
    ///
    /// # Arguments
    ///
    /// * `path` - Device path (e.g., "/dev/ttyACM0")
    /// * `baud` - Baud rate
    /// * `rtscts` - Enable hardware flow control
    pub fn open(path: &str, baud: u32, rtscts: bool) -> Result<Self> {
        let flow = if rtscts {
            tokio_serial::FlowControl::Hardware
        } else {
            tokio_serial::FlowControl::None
        };

        let port = tokio_serial::new(path, baud)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(flow)
            .open_native_async()
            .map_err(|e| ProxyError::transport(path, format!("Failed to open: {}", e)))?;

        Ok(Self {
            port,
            path: path.to_string(),
        })
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf).await
    }

    async fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data).await?;
        self.port.flush().await
    }

    fn describe(&self) -> String {
        self.path.clone()
    }
}

/// UDP transport
///
/// A listening socket replies to whoever sent the last datagram and drops
/// writes until someone has.
pub struct UdpTransport {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
    learn_peer: bool,
}

impl UdpTransport {
    pub fn new(socket: UdpSocket, peer: Option<SocketAddr>, learn_peer: bool) -> Self {
        Self {
            socket,
            peer,
            learn_peer,
        }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let (n, from) = self.socket.recv_from(buf).await?;
        if self.learn_peer && self.peer != Some(from) {
            debug!("UDP peer is now {}", from);
            self.peer = Some(from);
        }
        Ok(n)
    }

    async fn send(&mut self, data: &[u8]) -> io::Result<()> {
        match self.peer {
            Some(peer) => self.socket.send_to(data, peer).await.map(|_| ()),
            None => Ok(()),
        }
    }

    fn describe(&self) -> String {
        match self.socket.local_addr() {
            Ok(local) => format!("udp {} -> {:?}", local, self.peer),
            Err(_) => "udp".to_string(),
        }
    }
}

/// TCP client transport
pub struct TcpTransport {
    stream: TcpStream,
    label: String,
}

#[async_trait]
impl Transport for TcpTransport {
    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.stream.read(buf).await? {
            0 if !buf.is_empty() => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            )),
            n => Ok(n),
        }
    }

    async fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.stream.write_all(data).await
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

/// In-process transport backed by channels
///
/// Used to attach simulated vehicles and by tests.
pub struct MemoryTransport {
    rx: mpsc::UnboundedReceiver<Bytes>,
    tx: mpsc::UnboundedSender<Bytes>,
    name: String,
}

/// The far side of a [`MemoryTransport`]
#[derive(Debug)]
pub struct MemoryPeer {
    /// Bytes pushed here are read by the transport
    pub to_link: mpsc::UnboundedSender<Bytes>,
    /// Bytes the transport sends arrive here
    pub from_link: mpsc::UnboundedReceiver<Bytes>,
}

/// Create a connected in-memory transport and its peer
pub fn memory_pair(name: &str) -> (MemoryTransport, MemoryPeer) {
    let (to_link, rx) = mpsc::unbounded_channel();
    let (tx, from_link) = mpsc::unbounded_channel();
    (
        MemoryTransport {
            rx,
            tx,
            name: name.to_string(),
        },
        MemoryPeer { to_link, from_link },
    )
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.rx.recv().await {
            Some(chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                Ok(n)
            }
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "memory peer dropped")),
        }
    }

    async fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.tx
            .send(Bytes::copy_from_slice(data))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "memory peer dropped"))
    }

    fn describe(&self) -> String {
        format!("memory:{}", self.name)
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Mock transport recording writes and replaying scripted reads
    #[derive(Clone)]
    pub struct MockTransport {
        pub written_data: Arc<Mutex<Vec<Vec<u8>>>>,
        pub reads: Arc<Mutex<Vec<io::Result<Vec<u8>>>>>,
        pub write_error: Arc<Mutex<Option<io::ErrorKind>>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self {
                written_data: Arc::new(Mutex::new(Vec::new())),
                reads: Arc::new(Mutex::new(Vec::new())),
                write_error: Arc::new(Mutex::new(None)),
            }
        }

        pub fn get_written_data(&self) -> Vec<Vec<u8>> {
            self.written_data.lock().unwrap().clone()
        }

        pub fn push_read(&self, data: io::Result<Vec<u8>>) {
            self.reads.lock().unwrap().push(data);
        }

        pub fn set_write_error(&self, error: io::ErrorKind) {
            *self.write_error.lock().unwrap() = Some(error);
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let next = {
                let mut reads = self.reads.lock().unwrap();
                if reads.is_empty() {
                    None
                } else {
                    Some(reads.remove(0))
                }
            };
            match next {
                Some(Ok(data)) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                Some(Err(e)) => Err(e),
                None => Ok(0),
            }
        }

        async fn send(&mut self, data: &[u8]) -> io::Result<()> {
            if let Some(error) = *self.write_error.lock().unwrap() {
                return Err(io::Error::new(error, "Mock write error"));
            }
            self.written_data.lock().unwrap().push(data.to_vec());
            Ok(())
        }

        fn describe(&self) -> String {
            "mock".to_string()
        }
    }
}
