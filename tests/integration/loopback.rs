use crate::*;

use std::net::SocketAddr;

use anyhow::{Context, Result};

use tinylink_services::tcp::{self, Windows};
use tinylink_services::{ConnectionId, Network, NetworkSettings};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

const WINDOWS: Windows = Windows {
    send: 8192,
    recv: 8192,
    segment: 1460,
};

struct Server {
    network: Network,
    addr: SocketAddr,
    _shutdown: broadcast::Sender<()>,
}

async fn start(settings: NetworkSettings, windows: Windows) -> Result<Server> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("failed to bind loopback listener")?;
    let addr = listener.local_addr()?;
    let network = Network::new(settings);
    let (shutdown, rx) = broadcast::channel(1);
    tokio::spawn(tcp::serve(network.clone(), listener, windows, rx));
    Ok(Server {
        network,
        addr,
        _shutdown: shutdown,
    })
}

/// Connect and wait until the server has registered `expected` connections.
async fn connect(server: &Server, expected: usize) -> Result<TcpStream> {
    let client = TcpStream::connect(server.addr)
        .await
        .with_context(|| format!("failed to connect to {}", server.addr))?;
    let network = server.network.clone();
    wait_until(move || network.connection_count() == expected).await;
    Ok(client)
}

#[tokio::test]
async fn echo_round_trip() -> Result<()> {
    let server = start(NetworkSettings::default(), WINDOWS).await?;
    let network = server.network.clone();
    tokio::spawn(async move {
        loop {
            let (id, line) = network.read_line().await;
            let mut reply = line.to_vec();
            reply.extend_from_slice(b"\r\n");
            let _ = network.write(id, &reply).await;
        }
    });

    let mut client = connect(&server, 1).await?;
    client.write_all(b"ping\r\n").await?;

    let mut buf = [0u8; 6];
    within(client.read_exact(&mut buf))
        .await
        .context("echo not received")?;
    assert_eq!(&buf, b"ping\r\n");
    Ok(())
}

#[tokio::test]
async fn accepted_connections_get_increasing_ids() -> Result<()> {
    let server = start(NetworkSettings::default(), WINDOWS).await?;
    let _a = connect(&server, 1).await?;
    let _b = connect(&server, 2).await?;
    assert_eq!(
        server.network.connection_ids(),
        vec![ConnectionId(1), ConnectionId(2)]
    );
    Ok(())
}

#[tokio::test]
async fn peer_disconnect_unregisters() -> Result<()> {
    let server = start(NetworkSettings::default(), WINDOWS).await?;
    let client = connect(&server, 1).await?;
    drop(client);

    let network = server.network.clone();
    wait_until(move || network.connection_count() == 0).await;
    Ok(())
}

#[tokio::test]
async fn local_close_sends_eof() -> Result<()> {
    let server = start(NetworkSettings::default(), WINDOWS).await?;
    let mut client = connect(&server, 1).await?;
    let id = server.network.connection_ids()[0];

    server.network.close_connection(id).await?;

    let mut buf = [0u8; 16];
    let n = within(client.read(&mut buf))
        .await
        .context("read after close failed")?;
    assert_eq!(n, 0);
    assert_eq!(server.network.connection_count(), 0);
    Ok(())
}

#[tokio::test]
async fn connection_limit_refuses_extra_peers() -> Result<()> {
    let server = start(
        NetworkSettings {
            max_connections: 1,
            ..Default::default()
        },
        WINDOWS,
    )
    .await?;
    let _first = connect(&server, 1).await?;

    let mut second = TcpStream::connect(server.addr).await?;
    let mut buf = [0u8; 1];
    let refused = within(second.read(&mut buf)).await;
    assert!(matches!(refused, Ok(0) | Err(_)));
    assert_eq!(server.network.connection_count(), 1);
    Ok(())
}

#[tokio::test]
async fn write_larger_than_send_window() -> Result<()> {
    let server = start(
        NetworkSettings::default(),
        Windows {
            send: 16,
            ..WINDOWS
        },
    )
    .await?;
    let mut client = connect(&server, 1).await?;
    let id = server.network.connection_ids()[0];

    let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    let writer = {
        let network = server.network.clone();
        let payload = payload.clone();
        tokio::spawn(async move { network.write(id, &payload).await })
    };

    let mut received = vec![0u8; payload.len()];
    within(client.read_exact(&mut received))
        .await
        .context("payload not received")?;
    assert_eq!(received, payload);
    within(writer).await.context("writer panicked")??;
    Ok(())
}

#[tokio::test]
async fn bounded_queue_still_delivers_everything() -> Result<()> {
    let server = start(
        NetworkSettings {
            queue_high_water: 4,
            ..Default::default()
        },
        Windows {
            recv: 8,
            segment: 8,
            ..WINDOWS
        },
    )
    .await?;
    let mut client = connect(&server, 1).await?;
    let id = server.network.connection_ids()[0];

    let payload: Vec<u8> = (0..64u8).collect();
    client.write_all(&payload).await?;

    let (from, data) = within(server.network.read_exact(payload.len())).await;
    assert_eq!(from, id);
    assert_eq!(&data[..], &payload[..]);
    Ok(())
}
