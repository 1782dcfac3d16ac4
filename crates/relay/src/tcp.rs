//! TCP transport for the relay server.
//!
//! Each message travels as a 4-byte big-endian length prefix followed by the
//! frame bytes. Every accepted socket gets a reader task, which reports
//! frames as [`TransportEvent::Data`], and a writer task draining an
//! unbounded queue, so [`Transport::send`] never blocks.
//!
//! The listening socket is held in shared state rather than inside the
//! accept task, so [`Transport::stop`] closes it before returning and the
//! same address can be bound again right away.

use dashmap::DashMap;
use relay_server::{ConnectionId, EventSender, Transport, TransportEvent};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::future::poll_fn;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::Poll;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

struct TcpClient {
    address: SocketAddr,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl TcpClient {
    fn abort(&self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// State shared between the transport and its background tasks.
struct Shared {
    active: AtomicBool,
    next_id: AtomicUsize,
    max_frame_size: usize,
    clients: DashMap<ConnectionId, TcpClient>,
    listener: Mutex<Option<TcpListener>>,
    events: EventSender,
}

impl Shared {
    fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            debug!("TCP transport event dropped, server task is gone");
        }
    }

    /// Drops the listening socket, releasing the bound address.
    fn close_listener(&self) {
        if let Ok(mut listener) = self.listener.lock() {
            listener.take();
        }
    }
}

/// Length-prefixed TCP transport.
pub struct TcpTransport {
    listen_addr: SocketAddr,
    shared: Arc<Shared>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("listen_addr", &self.listen_addr)
            .field("active", &self.shared.active.load(Ordering::SeqCst))
            .field("clients", &self.shared.clients.len())
            .finish()
    }
}

impl TcpTransport {
    /// Creates a stopped transport that will listen on `listen_addr`.
    ///
    /// Connection ids are assigned from 1 in accept order and are never
    /// reused within the life of the transport.
    pub fn new(listen_addr: SocketAddr, max_frame_size: usize, events: EventSender) -> Self {
        Self {
            listen_addr,
            shared: Arc::new(Shared {
                active: AtomicBool::new(false),
                next_id: AtomicUsize::new(1),
                max_frame_size,
                clients: DashMap::new(),
                listener: Mutex::new(None),
                events,
            }),
            accept_task: Mutex::new(None),
        }
    }

    /// Address actually bound, once started. Differs from the configured one
    /// when listening on port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        let listener = self.shared.listener.lock().ok()?;
        listener.as_ref().and_then(|listener| listener.local_addr().ok())
    }

    pub fn client_count(&self) -> usize {
        self.shared.clients.len()
    }

    fn bind(&self) -> io::Result<TcpListener> {
        let domain = if self.listen_addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&self.listen_addr.into())?;
        socket.listen(1024)?;

        let std_listener: StdTcpListener = socket.into();
        std_listener.set_nonblocking(true)?;
        TcpListener::from_std(std_listener)
    }
}

impl Transport for TcpTransport {
    fn start(&self) -> io::Result<()> {
        if self.shared.active.load(Ordering::SeqCst) {
            return Ok(());
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "TCP transport must be started inside a tokio runtime",
            ));
        }

        let listener = self.bind()?;
        let local_addr = listener.local_addr()?;
        match self.shared.listener.lock() {
            Ok(mut slot) => *slot = Some(listener),
            Err(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    "TCP listener state is poisoned",
                ))
            }
        }

        self.shared.active.store(true, Ordering::SeqCst);
        let task = tokio::spawn(accept_loop(self.shared.clone()));
        if let Ok(mut accept_task) = self.accept_task.lock() {
            if let Some(previous) = accept_task.replace(task) {
                previous.abort();
            }
        }

        info!("✅ TCP transport listening on {}", local_addr);
        Ok(())
    }

    fn stop(&self) {
        self.shared.active.store(false, Ordering::SeqCst);
        self.shared.close_listener();

        if let Ok(mut accept_task) = self.accept_task.lock() {
            if let Some(task) = accept_task.take() {
                task.abort();
            }
        }

        let ids: Vec<ConnectionId> = self.shared.clients.iter().map(|entry| *entry.key()).collect();
        for connection_id in ids {
            if let Some((_, client)) = self.shared.clients.remove(&connection_id) {
                client.abort();
            }
        }

        info!("🛑 TCP transport stopped");
    }

    fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    fn send(&self, connection_ids: &[ConnectionId], _channel: u8, data: &[u8]) -> bool {
        if !self.is_active() {
            return false;
        }

        let mut all_queued = true;
        for connection_id in connection_ids {
            let queued = self
                .shared
                .clients
                .get(connection_id)
                .map(|client| client.outbound.send(data.to_vec()).is_ok())
                .unwrap_or(false);
            if !queued {
                debug!("Frame for connection {} not queued", connection_id);
                all_queued = false;
            }
        }
        all_queued
    }

    fn client_address(&self, connection_id: ConnectionId) -> String {
        self.shared
            .clients
            .get(&connection_id)
            .map(|client| client.address.to_string())
            .unwrap_or_default()
    }
}

async fn accept_loop(shared: Arc<Shared>) {
    loop {
        // The lock is only held while polling, never across a suspension.
        let accepted = poll_fn(|cx| match shared.listener.lock() {
            Ok(listener) => match listener.as_ref() {
                Some(listener) => listener.poll_accept(cx).map(Some),
                None => Poll::Ready(None),
            },
            Err(_) => Poll::Ready(None),
        })
        .await;

        match accepted {
            Some(Ok((stream, address))) => register_client(&shared, stream, address),
            Some(Err(e)) => error!("❌ Failed to accept connection: {}", e),
            None => {
                debug!("TCP listener closed, accept loop exiting");
                break;
            }
        }
    }
}

fn register_client(shared: &Arc<Shared>, stream: TcpStream, address: SocketAddr) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!("⚠️ Failed to set TCP_NODELAY for {}: {}", address, e);
    }

    let connection_id = shared.next_id.fetch_add(1, Ordering::SeqCst);
    let (read_half, write_half) = stream.into_split();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    let (registered_tx, registered_rx) = oneshot::channel::<()>();

    let writer = tokio::spawn(write_loop(connection_id, write_half, outbound_rx));
    let reader_shared = shared.clone();
    let reader = tokio::spawn(async move {
        // Reading starts only once the client is in the map and Connected was sent.
        if registered_rx.await.is_err() {
            return;
        }
        read_loop(connection_id, read_half, &reader_shared).await;
        if let Some((_, client)) = reader_shared.clients.remove(&connection_id) {
            client.writer.abort();
            reader_shared.emit(TransportEvent::Disconnected(connection_id));
        }
    });

    shared.clients.insert(
        connection_id,
        TcpClient {
            address,
            outbound: outbound_tx,
            reader,
            writer,
        },
    );
    debug!("🔗 Accepted connection {} from {}", connection_id, address);
    shared.emit(TransportEvent::Connected(connection_id));
    let _ = registered_tx.send(());
}

async fn read_loop(connection_id: ConnectionId, mut reader: OwnedReadHalf, shared: &Shared) {
    loop {
        let length = match reader.read_u32().await {
            Ok(length) => length as usize,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return,
            Err(e) => {
                shared.emit(TransportEvent::Error(connection_id, e.to_string()));
                return;
            }
        };

        if length > shared.max_frame_size {
            shared.emit(TransportEvent::Error(
                connection_id,
                format!("frame of {} bytes exceeds limit of {}", length, shared.max_frame_size),
            ));
            return;
        }

        let mut frame = vec![0u8; length];
        if let Err(e) = reader.read_exact(&mut frame).await {
            shared.emit(TransportEvent::Error(connection_id, e.to_string()));
            return;
        }
        shared.emit(TransportEvent::Data(connection_id, frame));
    }
}

async fn write_loop(
    connection_id: ConnectionId,
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    while let Some(frame) = outbound.recv().await {
        let length = match u32::try_from(frame.len()) {
            Ok(length) => length,
            Err(_) => {
                warn!("⚠️ Dropping oversized frame for connection {}", connection_id);
                continue;
            }
        };

        let result = async {
            writer.write_u32(length).await?;
            writer.write_all(&frame).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = result {
            debug!("Write to connection {} failed: {}", connection_id, e);
            break;
        }
    }
}
