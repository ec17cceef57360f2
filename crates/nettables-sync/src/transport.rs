//! Byte-stream transports.
//!
//! Clients get streams from a [`StreamFactory`] on every (re)connect; servers
//! take them from a [`StreamAcceptor`]. TCP is the real transport; the
//! [`memory`] module wires nodes together in-process for tests.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

/// A duplex byte stream.
pub trait DuplexStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> DuplexStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Owned, type-erased stream.
pub type BoxedStream = Box<dyn DuplexStream>;

/// Produces client streams on demand.
#[async_trait]
pub trait StreamFactory: Send + Sync {
    /// Open a stream to the server.
    ///
    /// `None` means no server is reachable right now; it is not an error.
    async fn create(&self) -> Option<BoxedStream>;
}

/// Yields server-side streams as clients connect.
#[async_trait]
pub trait StreamAcceptor: Send + Sync {
    async fn accept(&self) -> io::Result<BoxedStream>;
}

/// Connects to a TCP server with a timeout.
#[derive(Debug, Clone)]
pub struct TcpStreamFactory {
    host: String,
    port: u16,
    connect_timeout: Duration,
}

impl TcpStreamFactory {
    pub fn new(host: impl Into<String>, port: u16, connect_timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout,
        }
    }
}

#[async_trait]
impl StreamFactory for TcpStreamFactory {
    async fn create(&self) -> Option<BoxedStream> {
        let connect = TcpStream::connect((self.host.as_str(), self.port));
        match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(error = %e, "could not disable Nagle");
                }
                Some(Box::new(stream))
            }
            Ok(Err(e)) => {
                debug!(host = %self.host, port = self.port, error = %e, "connect failed");
                None
            }
            Err(_) => {
                debug!(host = %self.host, port = self.port, "connect timed out");
                None
            }
        }
    }
}

/// Accepts TCP clients.
#[derive(Debug)]
pub struct TcpAcceptor {
    listener: TcpListener,
}

impl TcpAcceptor {
    pub async fn bind(addr: impl tokio::net::ToSocketAddrs) -> io::Result<Self> {
        Ok(Self {
            listener: TcpListener::bind(addr).await?,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

#[async_trait]
impl StreamAcceptor for TcpAcceptor {
    async fn accept(&self) -> io::Result<BoxedStream> {
        let (stream, peer) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        debug!(%peer, "accepted TCP client");
        Ok(Box::new(stream))
    }
}

/// In-process transport for tests.
///
/// Each connect creates a `tokio::io::duplex` pair and hands the far end to
/// the listener.
pub mod memory {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::sync::{mpsc, Mutex};

    const PIPE_CAPACITY: usize = 64 * 1024;

    /// Create a connected factory/listener pair.
    pub fn channel() -> (MemoryStreamFactory, MemoryListener) {
        let (tx, rx) = mpsc::channel(16);
        let available = Arc::new(AtomicBool::new(true));
        (
            MemoryStreamFactory {
                tx,
                available: Arc::clone(&available),
            },
            MemoryListener {
                rx: Mutex::new(rx),
                available,
            },
        )
    }

    /// Client side of the in-memory transport.
    #[derive(Debug, Clone)]
    pub struct MemoryStreamFactory {
        tx: mpsc::Sender<tokio::io::DuplexStream>,
        available: Arc<AtomicBool>,
    }

    impl MemoryStreamFactory {
        /// Simulate the server going away (or coming back).
        pub fn set_available(&self, available: bool) {
            self.available.store(available, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl StreamFactory for MemoryStreamFactory {
        async fn create(&self) -> Option<BoxedStream> {
            if !self.available.load(Ordering::SeqCst) {
                return None;
            }
            let (client, server) = tokio::io::duplex(PIPE_CAPACITY);
            self.tx.send(server).await.ok()?;
            Some(Box::new(client))
        }
    }

    /// Server side of the in-memory transport.
    #[derive(Debug)]
    pub struct MemoryListener {
        rx: Mutex<mpsc::Receiver<tokio::io::DuplexStream>>,
        available: Arc<AtomicBool>,
    }

    impl MemoryListener {
        pub fn is_available(&self) -> bool {
            self.available.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StreamAcceptor for MemoryListener {
        async fn accept(&self) -> io::Result<BoxedStream> {
            match self.rx.lock().await.recv().await {
                Some(stream) => Ok(Box::new(stream)),
                None => Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "all memory stream factories dropped",
                )),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory;
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_memory_transport_carries_bytes() {
        let (factory, listener) = memory::channel();
        let mut client = factory.create().await.unwrap();
        let mut server = listener.accept().await.unwrap();

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn test_unavailable_memory_factory_yields_none() {
        let (factory, listener) = memory::channel();
        factory.set_available(false);
        assert!(!listener.is_available());
        assert!(factory.create().await.is_none());
    }

    #[tokio::test]
    async fn test_memory_factory_without_listener_yields_none() {
        let (factory, listener) = memory::channel();
        drop(listener);
        assert!(factory.create().await.is_none());
    }

    #[tokio::test]
    async fn test_tcp_factory_unreachable_yields_none() {
        let acceptor = TcpAcceptor::bind("127.0.0.1:0").await.unwrap();
        let port = acceptor.local_addr().unwrap().port();
        drop(acceptor);

        let factory = TcpStreamFactory::new("127.0.0.1", port, Duration::from_millis(500));
        assert!(factory.create().await.is_none());
    }

    #[tokio::test]
    async fn test_tcp_round_trip() {
        let acceptor = TcpAcceptor::bind("127.0.0.1:0").await.unwrap();
        let port = acceptor.local_addr().unwrap().port();
        let factory = TcpStreamFactory::new("127.0.0.1", port, Duration::from_secs(2));

        let (client, server) = tokio::join!(factory.create(), acceptor.accept());
        let mut client = client.unwrap();
        let mut server = server.unwrap();
        client.write_all(&[1, 2, 3]).await.unwrap();
        let mut buf = [0u8; 3];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [1, 2, 3]);
    }
}
