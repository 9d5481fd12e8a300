use crate::*;

use bytes::Bytes;
use tinylink_services::{
    ByteChain, Network, NetworkSettings, SocketError, SocketHandle, WriteError,
};

#[tokio::test]
async fn lines_follow_chunk_boundaries() {
    let s = Scripted::new(Network::new(NetworkSettings::default()));
    let socket = ScriptedSocket::with_window(0);
    let id = s.network.on_accept(socket.clone()).unwrap();

    s.push(Event::Data(id, b"hel"));
    s.push(Event::Data(id, b"lo\r\nwor"));
    s.push(Event::Data(id, b"\r\nld\r\n"));

    let mut lines = Vec::new();
    for _ in 0..4 {
        let (from, line) = within(s.network.read_line()).await;
        assert_eq!(from, id);
        lines.push(String::from_utf8(line.to_vec()).unwrap());
    }

    // No reassembly: a chunk without a terminator is a line of its own.
    assert_eq!(lines, ["hel", "lo", "wor", "ld"]);
    assert_eq!(s.remaining(), 0);
    assert_eq!(socket.acked(), 16);
    assert_eq!(s.network.queued_bytes().await, 0);
}

#[tokio::test]
async fn read_exact_reports_first_connection() {
    let s = Scripted::new(Network::new(NetworkSettings::default()));
    let a = s.network.on_accept(ScriptedSocket::with_window(0)).unwrap();
    let b = s.network.on_accept(ScriptedSocket::with_window(0)).unwrap();

    s.push(Event::Data(a, b"ab"));
    s.push(Event::Data(b, b"cdef\r\n"));

    let (from, data) = within(s.network.read_exact(4)).await;
    assert_eq!(from, a);
    assert_eq!(&data[..], b"abcd");

    let (from, line) = within(s.network.read_line()).await;
    assert_eq!(from, b);
    assert_eq!(&line[..], b"ef");
}

#[tokio::test]
async fn writer_waits_for_acknowledgments() {
    let s = Scripted::new(Network::new(NetworkSettings::default()));
    let socket = ScriptedSocket::with_window(3);
    let id = s.network.on_accept(socket.clone()).unwrap();

    s.push(Event::Ack(id, socket.clone(), 3));
    s.push(Event::Ack(id, socket.clone(), 3));

    within(s.network.write(id, b"abcdefgh")).await.unwrap();

    assert_eq!(socket.sent_sizes(), vec![3, 3, 2]);
    assert_eq!(socket.sent_bytes(), b"abcdefgh");
    assert_eq!(s.remaining(), 0);
    assert_eq!(socket.available_send_window(), 1);
}

#[tokio::test]
async fn remote_close_ends_blocked_write() {
    let s = Scripted::new(Network::new(NetworkSettings::default()));
    let socket = ScriptedSocket::with_window(0);
    let id = s.network.on_accept(socket.clone()).unwrap();

    s.push(Event::RemoteClose(id));

    assert_eq!(
        within(s.network.write(id, b"never")).await,
        Err(WriteError::ConnectionClosed(id))
    );
    assert!(socket.is_closed());
    assert!(socket.sent_bytes().is_empty());
    assert_eq!(s.network.connection_count(), 0);
}

#[tokio::test]
async fn socket_error_only_drops_that_connection() {
    let s = Scripted::new(Network::new(NetworkSettings::default()));
    let a = s.network.on_accept(ScriptedSocket::with_window(0)).unwrap();
    let b = s.network.on_accept(ScriptedSocket::with_window(0)).unwrap();

    s.push(Event::Error(a, SocketError::Reset));
    s.push(Event::Data(b, b"ok\r\n"));

    let (from, line) = within(s.network.read_line()).await;
    assert_eq!((from, &line[..]), (b, &b"ok"[..]));
    assert_eq!(s.network.connection_ids(), vec![b]);
    assert_eq!(s.pump_calls(), 2);
}

#[tokio::test]
async fn remote_close_discards_unread_data() {
    let network = Network::new(NetworkSettings::default());
    let socket_a = ScriptedSocket::with_window(0);
    let a = network.on_accept(socket_a.clone()).unwrap();
    let b = network.on_accept(ScriptedSocket::with_window(0)).unwrap();

    network
        .on_data(a, ByteChain::from(Bytes::from_static(b"one\r\n")))
        .await
        .unwrap();
    network
        .on_data(b, ByteChain::from(Bytes::from_static(b"two\r\n")))
        .await
        .unwrap();
    network.on_remote_close(a).await.unwrap();

    let (from, line) = within(network.read_line()).await;
    assert_eq!((from, &line[..]), (b, &b"two"[..]));
    assert!(socket_a.is_closed());
    assert_eq!(network.connection_ids(), vec![b]);
}

#[tokio::test]
async fn high_water_defers_acknowledgment() {
    let network = Network::new(NetworkSettings {
        queue_high_water: 4,
        ..Default::default()
    });
    let socket = ScriptedSocket::with_window(0);
    let id = network.on_accept(socket.clone()).unwrap();

    for data in [&b"aaaa\r\n"[..], b"bbbb\r\n"] {
        network
            .on_data(id, ByteChain::from(Bytes::from_static(data)))
            .await
            .unwrap();
    }
    assert_eq!(network.pending_len(id), Some(6));
    assert_eq!(socket.acked(), 6);

    let (_, line) = within(network.read_line()).await;
    assert_eq!(&line[..], b"aaaa");
    assert_eq!(socket.acked(), 12);

    let (_, line) = within(network.read_line()).await;
    assert_eq!(&line[..], b"bbbb");
}

#[tokio::test]
async fn remote_close_releases_other_held_data() {
    let network = Network::new(NetworkSettings {
        queue_high_water: 4,
        ..Default::default()
    });
    let a = network.on_accept(ScriptedSocket::with_window(0)).unwrap();
    let socket_b = ScriptedSocket::with_window(0);
    let b = network.on_accept(socket_b.clone()).unwrap();

    network
        .on_data(a, ByteChain::from(Bytes::from_static(b"aaaa\r\n")))
        .await
        .unwrap();
    network
        .on_data(b, ByteChain::from(Bytes::from_static(b"bb\r\n")))
        .await
        .unwrap();
    assert_eq!(socket_b.acked(), 0);

    // A leaves with its line unread; B's held-back line takes its place.
    network.on_remote_close(a).await.unwrap();
    assert_eq!(socket_b.acked(), 4);

    let (from, line) = within(network.read_line()).await;
    assert_eq!((from, &line[..]), (b, &b"bb"[..]));
}
