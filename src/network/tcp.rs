//! TCP transport
//!
//! Each connection runs two tokio tasks:
//! - **Reader task**: decodes frames and forwards them as
//!   [`TransportEvent::Frame`] to the poll scheduler's channel.
//! - **Writer task**: drains the connection's bounded outbound queue. A
//!   peer that stops reading long enough to fill it is disconnected.
//!
//! The first frame on every connection is a [`LinkFrame::Hello`] from the
//! connecting side; an accepted socket that does not introduce itself
//! within [`HELLO_TIMEOUT`] is dropped.

use dashmap::DashMap;
use socket2::{SockRef, TcpKeepalive};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::frame::{read_frame, write_frame, LinkFrame};
use super::{ConnId, Transport, TransportEvent};
use crate::error::TransportError;
use crate::link::LinkMode;

/// Window for an accepted socket to send its hello
pub const HELLO_TIMEOUT: Duration = Duration::from_secs(5);

/// Outbound connect timeout
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound frames buffered per connection before the peer counts as stalled
pub const WRITE_QUEUE_LEN: usize = 256;

/// Handle to one live connection's writer task
struct ConnHandle {
    tx: mpsc::Sender<LinkFrame>,
    shutdown: Arc<Notify>,
}

/// State shared by the transport and its connection tasks
struct Shared {
    local_node: String,
    next_id: AtomicU64,
    conns: DashMap<ConnId, ConnHandle>,
    events: mpsc::UnboundedSender<TransportEvent>,
    keepalive: Duration,
}

/// TCP implementation of [`Transport`]
pub struct TcpTransport {
    shared: Arc<Shared>,
    runtime: tokio::runtime::Handle,
}

impl TcpTransport {
    /// Create a transport. Must be called from within a tokio runtime.
    pub fn new(
        local_node: impl Into<String>,
        events: mpsc::UnboundedSender<TransportEvent>,
        keepalive: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::new(Shared {
                local_node: local_node.into(),
                next_id: AtomicU64::new(1),
                conns: DashMap::new(),
                events,
                keepalive,
            }),
            runtime: tokio::runtime::Handle::current(),
        })
    }

    /// Number of live connections
    pub fn connection_count(&self) -> usize {
        self.shared.conns.len()
    }

    /// Accept inbound links on `addr`
    pub async fn listen(&self, addr: SocketAddr) -> std::io::Result<JoinHandle<()>> {
        let listener = TcpListener::bind(addr).await?;
        info!("Accepting links on {}", listener.local_addr()?);

        let shared = Arc::clone(&self.shared);
        Ok(tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        tokio::spawn(Arc::clone(&shared).accept(stream, peer));
                    }
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }))
    }
}

impl Shared {
    fn allocate(&self) -> ConnId {
        ConnId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Tear down a connection whose peer stopped reading and report it
    /// closed
    fn drop_stalled(&self, conn: ConnId) {
        if let Some((_, handle)) = self.conns.remove(&conn) {
            handle.shutdown.notify_one();
            let _ = self.events.send(TransportEvent::Closed { conn });
        }
    }

    async fn accept(self: Arc<Self>, mut stream: TcpStream, peer: SocketAddr) {
        self.tune(&stream);
        let hello = tokio::time::timeout(HELLO_TIMEOUT, read_frame(&mut stream)).await;
        let (node, mode) = match hello {
            Ok(Ok(Some(LinkFrame::Hello { node, mode }))) => (node, mode),
            Ok(Ok(Some(other))) => {
                warn!("{} sent {:?} before hello, dropping", peer, other);
                return;
            }
            Ok(Ok(None)) => {
                debug!("{} closed before hello", peer);
                return;
            }
            Ok(Err(e)) => {
                warn!("Bad hello from {}: {}", peer, e);
                return;
            }
            Err(_) => {
                warn!("{} did not send hello within {:?}", peer, HELLO_TIMEOUT);
                return;
            }
        };

        let conn = self.allocate();
        info!("Inbound link from node {} at {} ({})", node, peer, conn);
        self.run(conn, stream, TransportEvent::Incoming { conn, node, mode });
    }

    async fn dial(
        self: &Arc<Self>,
        conn: ConnId,
        address: &str,
        mode: LinkMode,
    ) -> Result<(), TransportError> {
        let connect = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(address));
        let mut stream = match connect.await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(TransportError::ConnectionFailed(e.to_string())),
            Err(_) => {
                return Err(TransportError::ConnectionFailed(format!(
                    "timed out after {:?}",
                    CONNECT_TIMEOUT
                )))
            }
        };
        self.tune(&stream);

        let hello = LinkFrame::Hello {
            node: self.local_node.clone(),
            mode,
        };
        write_frame(&mut stream, &hello).await?;

        debug!("Connected to {} ({})", address, conn);
        self.run(conn, stream, TransportEvent::Connected { conn });
        Ok(())
    }

    fn tune(&self, stream: &TcpStream) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed: {}", e);
        }
        let keepalive = TcpKeepalive::new().with_time(self.keepalive);
        if let Err(e) = SockRef::from(stream).set_tcp_keepalive(&keepalive) {
            debug!("set_tcp_keepalive failed: {}", e);
        }
    }

    /// Register the connection, announce it, then spawn its reader and
    /// writer tasks. The announcement is queued before any frame from the
    /// reader can be.
    fn run(self: &Arc<Self>, conn: ConnId, stream: TcpStream, announce: TransportEvent) {
        let (mut reader, mut writer) = stream.into_split();
        let (tx, mut rx) = mpsc::channel::<LinkFrame>(WRITE_QUEUE_LEN);
        let shutdown = Arc::new(Notify::new());
        self.conns.insert(
            conn,
            ConnHandle {
                tx,
                shutdown: Arc::clone(&shutdown),
            },
        );
        let _ = self.events.send(announce);

        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = write_frame(&mut writer, &frame).await {
                    debug!("Write on {} failed: {}", conn, e);
                    break;
                }
            }
        });

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.notified() => return,
                    frame = read_frame(&mut reader) => match frame {
                        Ok(Some(frame)) => {
                            if shared.events.send(TransportEvent::Frame { conn, frame }).is_err() {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            debug!("Read on {} failed: {}", conn, e);
                            break;
                        }
                    },
                }
            }
            // Closed locally already if the handle is gone.
            if shared.conns.remove(&conn).is_some() {
                let _ = shared.events.send(TransportEvent::Closed { conn });
            }
        });
    }
}

impl Transport for TcpTransport {
    fn request_connection(&self, address: &str, mode: LinkMode) -> Result<ConnId, TransportError> {
        if address.is_empty() {
            return Err(TransportError::ConnectionFailed("empty address".into()));
        }
        let conn = self.shared.allocate();
        let shared = Arc::clone(&self.shared);
        let address = address.to_string();
        self.runtime.spawn(async move {
            if let Err(e) = shared.dial(conn, &address, mode).await {
                debug!("Connect to {} failed: {}", address, e);
                let _ = shared.events.send(TransportEvent::ConnectFailed {
                    conn,
                    reason: e.to_string(),
                });
            }
        });
        Ok(conn)
    }

    fn send(&self, conn: ConnId, frame: LinkFrame) -> Result<(), TransportError> {
        let queued = {
            let handle = self
                .shared
                .conns
                .get(&conn)
                .ok_or(TransportError::UnknownConnection(conn))?;
            handle.tx.try_send(frame)
        };
        match queued {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!("Write queue for {} full, dropping stalled peer", conn);
                self.shared.drop_stalled(conn);
                Err(TransportError::SendFailed(format!("{} write queue full", conn)))
            }
            Err(TrySendError::Closed(_)) => {
                Err(TransportError::SendFailed(format!("{} writer gone", conn)))
            }
        }
    }

    fn close(&self, conn: ConnId) {
        if let Some((_, handle)) = self.shared.conns.remove(&conn) {
            debug!("Closing {}", conn);
            handle.shutdown.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_and_exchange() {
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        let a = TcpTransport::new("2000", a_tx, Duration::from_secs(15));
        let b = TcpTransport::new("2001", b_tx, Duration::from_secs(15));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let _server = b.listen(addr).await.unwrap();

        let out = a
            .request_connection(&addr.to_string(), LinkMode::Transceive)
            .unwrap();
        assert_eq!(a_rx.recv().await, Some(TransportEvent::Connected { conn: out }));

        let inbound = match b_rx.recv().await {
            Some(TransportEvent::Incoming { conn, node, mode }) => {
                assert_eq!(node, "2000");
                assert_eq!(mode, LinkMode::Transceive);
                conn
            }
            other => panic!("unexpected {:?}", other),
        };

        a.send(out, LinkFrame::text("!NEWKEY1!")).unwrap();
        assert_eq!(
            b_rx.recv().await,
            Some(TransportEvent::Frame {
                conn: inbound,
                frame: LinkFrame::text("!NEWKEY1!")
            })
        );

        b.close(inbound);
        assert_eq!(a_rx.recv().await, Some(TransportEvent::Closed { conn: out }));
        assert!(matches!(
            a.send(out, LinkFrame::Key),
            Err(TransportError::UnknownConnection(_))
        ));
    }

    #[tokio::test]
    async fn test_stalled_peer_is_dropped() {
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, _b_rx) = mpsc::unbounded_channel();
        let a = TcpTransport::new("2000", a_tx, Duration::from_secs(15));
        let b = TcpTransport::new("2001", b_tx, Duration::from_secs(15));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let _server = b.listen(addr).await.unwrap();

        let out = a
            .request_connection(&addr.to_string(), LinkMode::Transceive)
            .unwrap();
        assert_eq!(a_rx.recv().await, Some(TransportEvent::Connected { conn: out }));
        assert_eq!(a.connection_count(), 1);

        // the writer task cannot run until this test yields
        for _ in 0..WRITE_QUEUE_LEN {
            a.send(out, LinkFrame::Key).unwrap();
        }
        assert!(matches!(
            a.send(out, LinkFrame::Key),
            Err(TransportError::SendFailed(_))
        ));
        assert_eq!(a_rx.recv().await, Some(TransportEvent::Closed { conn: out }));
        assert_eq!(a.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_reported() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = TcpTransport::new("2000", tx, Duration::from_secs(15));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let conn = transport
            .request_connection(&addr.to_string(), LinkMode::Monitor)
            .unwrap();
        match rx.recv().await {
            Some(TransportEvent::ConnectFailed { conn: failed, .. }) => assert_eq!(failed, conn),
            other => panic!("unexpected {:?}", other),
        }
    }
}
