//! TCP adapter - drives a [`Network`] from tokio sockets.
//!
//! Each accepted stream gets two tasks:
//!   reader - reads only as much as it holds receive credit for and
//!            reports data / EOF / errors to the network
//!   writer - drains the outbound channel onto the stream and reports
//!            acknowledged bytes back as `on_sent`
//!
//! Receive credit is a semaphore returned by `acknowledge_received`, so a
//! reader that stops consuming eventually stops the peer. The send window
//! is a byte budget returned once bytes are written to the kernel.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, watch, Semaphore};

use tinylink_core::config::NetworkConfig;
use tinylink_core::ConnectionId;

use crate::network::Network;
use crate::socket::{ByteChain, SendFlags, SocketError, SocketHandle};

/// Window sizes applied to every accepted connection.
#[derive(Debug, Clone, Copy)]
pub struct Windows {
    pub send: usize,
    pub recv: usize,
    pub segment: usize,
}

impl From<&NetworkConfig> for Windows {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            send: config.send_window,
            recv: config.recv_window,
            segment: config.segment_size,
        }
    }
}

enum Outbound {
    Data(Bytes),
    Flush,
    Close,
}

/// [`SocketHandle`] over one tokio TCP stream.
pub struct TcpSocket {
    peer: SocketAddr,
    send_budget: AtomicUsize,
    recv_credit: Semaphore,
    outbound: mpsc::UnboundedSender<Outbound>,
    detached: AtomicBool,
    closed: watch::Sender<bool>,
}

impl TcpSocket {
    fn new(peer: SocketAddr, windows: Windows) -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        let socket = Arc::new(Self {
            peer,
            send_budget: AtomicUsize::new(windows.send),
            recv_credit: Semaphore::new(windows.recv),
            outbound,
            detached: AtomicBool::new(false),
            closed,
        });
        (socket, rx)
    }

    fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Wait for at least one byte of receive credit and take up to `max`.
    async fn take_recv_credit(&self, max: usize) -> Option<usize> {
        self.recv_credit.acquire().await.ok()?.forget();
        let extra = self.recv_credit.available_permits().min(max.saturating_sub(1));
        let extra = u32::try_from(extra).unwrap_or(u32::MAX);
        if extra > 0 {
            match self.recv_credit.try_acquire_many(extra) {
                Ok(permits) => permits.forget(),
                Err(_) => return Some(1),
            }
        }
        Some(1 + extra as usize)
    }

    fn release_send_budget(&self, len: usize) {
        self.send_budget.fetch_add(len, Ordering::AcqRel);
    }
}

impl SocketHandle for TcpSocket {
    fn send(&self, data: &[u8], _flags: SendFlags) -> Result<(), SocketError> {
        if self.is_closed() {
            return Err(SocketError::Closed);
        }
        let len = data.len();
        self.send_budget
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |window| window.checked_sub(len))
            .map_err(|window| SocketError::WindowExceeded { len, window })?;
        // The stack always owns its copy.
        self.outbound
            .send(Outbound::Data(Bytes::copy_from_slice(data)))
            .map_err(|_| SocketError::Closed)
    }

    fn flush(&self) -> Result<(), SocketError> {
        self.outbound
            .send(Outbound::Flush)
            .map_err(|_| SocketError::Closed)
    }

    fn available_send_window(&self) -> usize {
        if self.is_closed() {
            return 0;
        }
        self.send_budget.load(Ordering::Acquire)
    }

    fn acknowledge_received(&self, len: usize) {
        self.recv_credit.add_permits(len);
    }

    fn detach(&self) {
        self.detached.store(true, Ordering::Release);
    }

    fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        let _ = self.outbound.send(Outbound::Close);
    }

    fn peer(&self) -> String {
        self.peer.to_string()
    }
}

/// Accept connections until `shutdown` fires.
pub async fn serve(
    network: Network,
    listener: TcpListener,
    windows: Windows,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "server started");
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("listener shutting down");
                return Ok(());
            }

            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(a) => a,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                attach(&network, stream, peer, windows);
            }
        }
    }
}

/// Hand an established stream to the network and spawn its I/O tasks.
///
/// Returns `None` if the network refused the connection.
pub fn attach(
    network: &Network,
    stream: TcpStream,
    peer: SocketAddr,
    windows: Windows,
) -> Option<ConnectionId> {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(error = %e, %peer, "failed to set TCP_NODELAY");
    }
    let (socket, outbound) = TcpSocket::new(peer, windows);
    let id = match network.on_accept(socket.clone()) {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(error = %e, %peer, "connection refused");
            return None;
        }
    };
    let (rd, wr) = stream.into_split();
    tokio::spawn(read_loop(network.clone(), id, rd, socket.clone(), windows.segment.max(1)));
    tokio::spawn(write_loop(network.clone(), id, wr, outbound, socket));
    Some(id)
}

async fn read_loop(
    network: Network,
    id: ConnectionId,
    mut rd: OwnedReadHalf,
    socket: Arc<TcpSocket>,
    segment: usize,
) {
    let mut closed = socket.closed.subscribe();
    let mut buf = vec![0u8; segment];
    loop {
        let credit = tokio::select! {
            _ = closed.wait_for(|c| *c) => break,
            credit = socket.take_recv_credit(segment) => match credit {
                Some(n) => n,
                None => break,
            },
        };

        let result = tokio::select! {
            _ = closed.wait_for(|c| *c) => break,
            r = rd.read(&mut buf[..credit]) => r,
        };

        match result {
            Ok(0) => {
                if !socket.is_detached() {
                    let _ = network.on_remote_close(id).await;
                }
                break;
            }
            Ok(n) => {
                socket.acknowledge_received(credit - n);
                if socket.is_detached() {
                    break;
                }
                let chain = ByteChain::from(Bytes::copy_from_slice(&buf[..n]));
                if network.on_data(id, chain).await.is_err() {
                    tracing::warn!(connection = %id, len = n, "data for unknown connection, discarding");
                    socket.acknowledge_received(n);
                    break;
                }
            }
            Err(e) => {
                if !socket.is_detached() {
                    let _ = network.on_error(id, SocketError::from(e)).await;
                }
                break;
            }
        }
    }
    tracing::debug!(connection = %id, "reader finished");
}

async fn write_loop(
    network: Network,
    id: ConnectionId,
    mut wr: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    socket: Arc<TcpSocket>,
) {
    while let Some(op) = outbound.recv().await {
        let result = match op {
            Outbound::Data(bytes) => {
                let len = bytes.len();
                let result = wr.write_all(&bytes).await;
                if result.is_ok() {
                    socket.release_send_budget(len);
                    if !socket.is_detached() {
                        let _ = network.on_sent(id, len);
                    }
                }
                result
            }
            Outbound::Flush => wr.flush().await,
            Outbound::Close => {
                let _ = wr.shutdown().await;
                break;
            }
        };
        if let Err(e) = result {
            if !socket.is_detached() {
                let _ = network.on_error(id, SocketError::from(e)).await;
            }
            break;
        }
    }
    tracing::debug!(connection = %id, "writer finished");
}
