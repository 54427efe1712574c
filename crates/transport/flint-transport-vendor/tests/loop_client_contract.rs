//! 厂商 SDK 后端在回环替身上的契约测试。
//!
//! # 测试总览（Why）
//! - `LoopNetwork::poll()` 每调用一次推进一步（建连、投递并确认、关闭），所有场景都是确定性的；
//! - 覆盖回显、关闭、以 `space()` 为窗口的超窗写入、到达顺序、端口冲突、建连失败、
//!   SDK 名字解析、建连与接收超时以及强制关闭。

use std::time::Duration;

use flint_transport::{
    CloseOutcome, Connection, ConnectionState, ErrorKind, Socket, TransportConfig,
    TransportFactory, TransportSocketAddr,
};
use flint_transport_vendor::client::codes;
use flint_transport_vendor::testing::{LoopClient, LoopNetwork, LoopServer};
use flint_transport_vendor::{VendorFactory, VendorSocket};

type LoopSocket = VendorSocket<LoopClient, LoopServer>;
type LoopFactory = VendorFactory<LoopClient, LoopServer>;

const LOOPBACK: [u8; 4] = [127, 0, 0, 1];

fn factory(net: &LoopNetwork) -> LoopFactory {
    let clients = net.clone();
    let servers = net.clone();
    VendorFactory::new(
        move || clients.client(),
        move || servers.server(),
        TransportConfig::default(),
    )
}

fn read_all(socket: &mut LoopSocket) -> Vec<u8> {
    let mut buf = vec![0u8; socket.available()];
    let n = socket.read(&mut buf).expect("read");
    buf.truncate(n);
    buf
}

fn establish(net: &LoopNetwork, port: u16) -> (LoopSocket, LoopSocket, LoopSocket) {
    let factory = factory(net);
    let mut server = factory
        .make_server(TransportSocketAddr::any_v4(port), 4)
        .expect("server");
    let mut client = factory.make_socket().expect("client");
    client
        .connect(TransportSocketAddr::v4(LOOPBACK, port))
        .expect("connect");
    assert_eq!(client.state(), ConnectionState::Connecting);

    net.poll();
    assert_eq!(client.state(), ConnectionState::Connected);
    let accepted = server
        .accept()
        .expect("accept")
        .expect("connection established");
    (server, client, accepted)
}

#[test]
fn echo_round_trip() {
    let net = LoopNetwork::new();
    let (server, mut client, mut accepted) = establish(&net, 8080);
    assert_eq!(server.state(), ConnectionState::Connecting);
    assert_eq!(accepted.host(), "127.0.0.1");
    assert_eq!(
        accepted.peer_addr().map(|addr| addr.port()),
        client.local_addr().map(|addr| addr.port())
    );

    client.write(b"PING").expect("write");
    net.poll();
    assert_eq!(accepted.available(), 4);
    assert_eq!(read_all(&mut accepted), b"PING");

    accepted.write(b"PONG").expect("write");
    net.poll();
    assert_eq!(read_all(&mut client), b"PONG");
    assert!(client.flush().expect("flush"));
}

#[test]
fn graceful_close_delivers_pending_bytes_then_closes_both_sides() {
    let net = LoopNetwork::new();
    let (_server, mut client, mut accepted) = establish(&net, 8081);

    client.write(b"bye").expect("write");
    assert_eq!(client.close(false).expect("close"), CloseOutcome::Graceful);
    assert_eq!(client.state(), ConnectionState::Closing);
    assert_eq!(
        client.write(b"late").expect_err("closing").kind(),
        ErrorKind::ConnectionClosed
    );

    net.poll();
    assert_eq!(accepted.state(), ConnectionState::Closed);
    assert!(accepted.is_readable(), "buffered bytes outlive the connection");
    assert!(!accepted.is_writable());
    assert_eq!(read_all(&mut accepted), b"bye");
    accepted.tick().expect("peer close is not an error");

    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(client.close(false).expect("close"), CloseOutcome::AlreadyClosed);
    assert_eq!(net.live_clients(), 0);
}

#[test]
fn oversized_write_drains_through_sdk_space() {
    let net = LoopNetwork::with_space(10);
    let (_server, mut client, mut accepted) = establish(&net, 8082);

    let payload: Vec<u8> = (0..100u8).collect();
    assert_eq!(client.available_for_write(), 10);
    client.write(&payload).expect("write accepted in full");

    let mut received = Vec::new();
    for _ in 0..1000 {
        if received.len() >= payload.len() {
            break;
        }
        net.poll();
        received.extend(read_all(&mut accepted));
        client.tick().expect("drain");
    }
    assert_eq!(received, payload);
    assert!(client.flush().expect("flush"));
}

#[test]
fn ensure_capacity_guarantees_room() {
    let net = LoopNetwork::new();
    let (_server, mut client, _accepted) = establish(&net, 8083);
    client.ensure_capacity(100_000).expect("ensure");
    assert!(client.available_for_write() >= 100_000);
    client.reserve_at_least(200_000).expect("reserve");
}

#[test]
fn accept_preserves_arrival_order() {
    let net = LoopNetwork::new();
    let factory = factory(&net);
    let mut server = factory
        .make_server(TransportSocketAddr::any_v4(9000), 4)
        .expect("server");

    let mut clients = Vec::new();
    for _ in 0..3 {
        let mut client = factory.make_socket().expect("client");
        client
            .connect(TransportSocketAddr::v4(LOOPBACK, 9000))
            .expect("connect");
        clients.push(client);
    }
    net.poll();
    for (marker, client) in clients.iter_mut().enumerate() {
        client.write(&[marker as u8]).expect("write");
    }
    net.poll();
    assert_eq!(server.pending_accepts(), 3);

    for marker in 0..3u8 {
        let mut accepted = server.accept().expect("accept").expect("queued");
        assert_eq!(read_all(&mut accepted), [marker]);
    }
    assert!(server.accept().expect("accept").is_none());
}

#[test]
fn listener_conflicts_and_misuse_are_reported() {
    let net = LoopNetwork::new();
    let factory = factory(&net);
    let _server = factory
        .make_server(TransportSocketAddr::any_v4(80), 4)
        .expect("server");
    let err = factory
        .make_server(TransportSocketAddr::any_v4(80), 4)
        .expect_err("port taken");
    assert_eq!(err.kind(), ErrorKind::AddressInUse);
    assert_eq!(err.os_code(), Some(codes::ERR_USE));

    let mut idle = factory.make_socket().expect("socket");
    assert_eq!(
        idle.listen(4).expect_err("not bound").kind(),
        ErrorKind::InvalidArgument
    );
    assert_eq!(
        idle.accept().expect_err("not listening").kind(),
        ErrorKind::InvalidArgument
    );
}

#[test]
fn listener_on_port_zero_reports_the_assigned_port() {
    let net = LoopNetwork::new();
    let factory = factory(&net);
    let mut server = factory
        .make_server(TransportSocketAddr::any_v4(0), 4)
        .expect("server");
    let port = server.local_addr().expect("listener address").port();
    assert_ne!(port, 0);

    assert_eq!(server.close(false).expect("close"), CloseOutcome::Graceful);
    assert!(server.local_addr().is_none());
}

#[test]
fn refused_connection_surfaces_once_on_tick() {
    let net = LoopNetwork::new();
    let mut client = factory(&net).make_socket().expect("client");
    client
        .connect(TransportSocketAddr::v4(LOOPBACK, 7))
        .expect("connect");
    net.poll();

    assert_eq!(client.state(), ConnectionState::Closed);
    let err = client.tick().expect_err("refused");
    assert_eq!(err.code(), "flint.transport.vendor.connect_failed");
    assert_eq!(err.os_code(), Some(codes::ERR_RST));
    client.tick().expect("already surfaced");
}

#[test]
fn host_names_are_resolved_by_the_sdk() {
    let net = LoopNetwork::new();
    net.add_host("broker.local", LOOPBACK);
    let factory = factory(&net);
    let mut server = factory
        .make_server(TransportSocketAddr::any_v4(1883), 4)
        .expect("server");

    let mut client = factory.make_socket().expect("client");
    client.connect_host("broker.local", 1883).expect("connect");
    assert_eq!(client.host(), "broker.local");
    assert_eq!(client.state(), ConnectionState::Connecting);
    net.poll();
    assert!(client.is_connected());
    assert!(server.accept().expect("accept").is_some());

    let mut lost = factory.make_socket().expect("client");
    lost.connect_host("nowhere.invalid", 1883).expect("connect");
    net.poll();
    let err = lost.tick().expect_err("unresolvable");
    assert_eq!(err.os_code(), Some(codes::ERR_DNS));
}

#[test]
fn connect_timeout_aborts_on_tick() {
    let net = LoopNetwork::new();
    let mut client = factory(&net).make_socket().expect("client");
    client.set_timeout(Duration::ZERO);
    client
        .connect(TransportSocketAddr::v4(LOOPBACK, 7))
        .expect("connect");
    std::thread::sleep(Duration::from_millis(2));

    let err = client.tick().expect_err("timed out");
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(net.live_clients(), 0);
    client.tick().expect("the timeout is reported once");
}

#[test]
fn closing_a_pending_connect_abandons_it_quietly() {
    let net = LoopNetwork::new();
    let factory = factory(&net);
    let _server = factory
        .make_server(TransportSocketAddr::any_v4(8086), 4)
        .expect("server");
    let mut client = factory.make_socket().expect("client");
    client
        .connect(TransportSocketAddr::v4(LOOPBACK, 8086))
        .expect("connect");
    assert_eq!(client.state(), ConnectionState::Connecting);

    assert_eq!(client.close(false).expect("close"), CloseOutcome::Aborted);
    assert_eq!(client.state(), ConnectionState::Closed);
    net.poll();
    client.tick().expect("an abandoned connect is not an error");
    assert_eq!(net.live_clients(), 0);
}

#[test]
fn idle_receive_timeout_closes_the_connection() {
    let net = LoopNetwork::new();
    let (_server, mut client, mut accepted) = establish(&net, 8084);
    accepted.set_rx_timeout(Duration::from_millis(1));
    std::thread::sleep(Duration::from_millis(5));

    net.poll();
    assert_eq!(accepted.state(), ConnectionState::Closed);
    let err = accepted.tick().expect_err("timeout surfaces");
    assert_eq!(err.kind(), ErrorKind::Timeout);

    assert_eq!(client.state(), ConnectionState::Closed);
    client.tick().expect("peer close is not an error");
}

#[test]
fn force_close_is_idempotent() {
    let net = LoopNetwork::new();
    let (_server, mut client, mut accepted) = establish(&net, 8085);
    assert_eq!(client.close(true).expect("close"), CloseOutcome::Aborted);
    assert!(client.is_closed());
    client.tick().expect("a requested abort is not an error");
    assert_eq!(client.close(true).expect("close"), CloseOutcome::AlreadyClosed);
    client.tick().expect("still quiet after the second close");

    net.poll();
    assert_eq!(accepted.state(), ConnectionState::Closed);
    assert!(accepted.tick().is_err(), "reset surfaces on the peer");
}
