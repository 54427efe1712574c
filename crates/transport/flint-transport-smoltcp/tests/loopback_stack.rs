//! smoltcp 回环栈上的后端集成测试。
//!
//! # 测试总览（Why）
//! - 同一个 `SmolStack` 同时承载客户端与服务端，`poll()` 一次即可完成握手或一轮数据往返，
//!   因而所有场景都是确定性的；
//! - 覆盖回显、双向关闭、超窗写入、监听池的到达顺序与容量、端口冲突与建连超时。

use std::time::Duration;

use flint_transport::{
    CloseOutcome, Connection, ConnectionState, ErrorKind, Socket, TransportConfig,
    TransportFactory, TransportSocketAddr,
};
use flint_transport_smoltcp::{SmolFactory, SmolSocket, SmolStack};
use smoltcp::phy::Loopback;

type LoopSocket = SmolSocket<Loopback>;

const LOOPBACK: [u8; 4] = [127, 0, 0, 1];

fn factory(stack: &SmolStack<Loopback>) -> SmolFactory<Loopback> {
    SmolFactory::new(stack.clone(), TransportConfig::default())
}

fn read_all(socket: &mut LoopSocket) -> Vec<u8> {
    let mut buf = vec![0u8; socket.available()];
    let n = socket.read(&mut buf).expect("read");
    buf.truncate(n);
    buf
}

fn establish(stack: &SmolStack<Loopback>, port: u16) -> (LoopSocket, LoopSocket, LoopSocket) {
    let factory = factory(stack);
    let mut server = factory
        .make_server(TransportSocketAddr::any_v4(port), 4)
        .expect("server");
    let mut client = factory.make_socket().expect("client");
    client
        .connect(TransportSocketAddr::v4(LOOPBACK, port))
        .expect("connect");
    assert_eq!(client.state(), ConnectionState::Connecting);

    stack.poll();
    assert_eq!(client.state(), ConnectionState::Connected);
    let accepted = server
        .accept()
        .expect("accept")
        .expect("connection established");
    (server, client, accepted)
}

#[test]
fn echo_round_trip() {
    let stack = SmolStack::loopback(4096);
    let (server, mut client, mut accepted) = establish(&stack, 8080);
    assert_eq!(server.state(), ConnectionState::Connecting);
    assert_eq!(accepted.host(), "127.0.0.1");
    assert_eq!(
        accepted.peer_addr().map(|addr| addr.port()),
        client.local_addr().map(|addr| addr.port())
    );

    client.write(b"PING").expect("write");
    stack.poll();
    assert_eq!(accepted.available(), 4);
    assert_eq!(read_all(&mut accepted), b"PING");

    accepted.write(b"PONG").expect("write");
    stack.poll();
    assert_eq!(read_all(&mut client), b"PONG");
    assert!(client.flush().expect("flush"));
}

#[test]
fn both_sides_close_and_sockets_are_reaped() {
    let stack = SmolStack::loopback(4096);
    let (_server, mut client, mut accepted) = establish(&stack, 8081);

    client.write(b"bye").expect("write");
    assert_eq!(client.close(false).expect("close"), CloseOutcome::Graceful);
    assert_eq!(client.state(), ConnectionState::Closing);
    assert_eq!(
        client.write(b"late").expect_err("closing").kind(),
        ErrorKind::ConnectionClosed
    );

    stack.poll();
    assert_eq!(accepted.state(), ConnectionState::Closing);
    assert!(accepted.is_readable());
    assert!(!accepted.is_writable());
    assert_eq!(read_all(&mut accepted), b"bye");

    accepted.tick().expect("peer close");
    stack.poll();
    accepted.tick().expect("close completed");
    client.tick().expect("time wait reached");
    assert_eq!(accepted.state(), ConnectionState::Closed);
    assert_eq!(client.state(), ConnectionState::Closed);

    stack.poll();
    assert_eq!(stack.socket_count(), 4, "only the listener pool remains");
    assert_eq!(client.close(false).expect("close"), CloseOutcome::AlreadyClosed);
}

#[test]
fn oversized_write_drains_through_a_small_window() {
    let stack = SmolStack::loopback(64);
    let (_server, mut client, mut accepted) = establish(&stack, 8082);

    let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    assert_eq!(client.available_for_write(), 64);
    client.write(&payload).expect("write accepted in full");

    let mut received = Vec::new();
    for _ in 0..10_000 {
        if received.len() >= payload.len() {
            break;
        }
        stack.poll();
        received.extend(read_all(&mut accepted));
        client.tick().expect("drain");
    }
    assert!(received == payload, "payload corrupted or incomplete");
    assert!(client.flush().expect("flush"));
}

#[test]
fn ensure_capacity_guarantees_room() {
    let stack = SmolStack::loopback(1024);
    let (_server, mut client, _accepted) = establish(&stack, 8083);
    client.ensure_capacity(10_000).expect("ensure");
    assert!(client.available_for_write() >= 10_000);
    client.reserve_at_least(20_000).expect("reserve");
}

#[test]
fn accept_preserves_arrival_order() {
    let stack = SmolStack::loopback(1024);
    let factory = factory(&stack);
    let mut server = factory
        .make_server(TransportSocketAddr::any_v4(9000), 4)
        .expect("server");

    let mut clients = Vec::new();
    for marker in 0..3u8 {
        let mut client = factory.make_socket().expect("client");
        client
            .connect(TransportSocketAddr::v4(LOOPBACK, 9000))
            .expect("connect");
        stack.poll();
        client.write(&[marker]).expect("write");
        clients.push(client);
    }
    stack.poll();
    assert_eq!(server.pending_accepts(), 3);

    for marker in 0..3u8 {
        let mut accepted = server.accept().expect("accept").expect("queued");
        assert_eq!(read_all(&mut accepted), [marker]);
    }
    assert!(server.accept().expect("accept").is_none());
}

#[test]
fn backlog_limit_refuses_extra_connections() {
    let stack = SmolStack::loopback(1024);
    let factory = factory(&stack);
    let _server = factory
        .make_server(TransportSocketAddr::any_v4(9001), 1)
        .expect("server");

    let mut first = factory.make_socket().expect("client");
    first
        .connect(TransportSocketAddr::v4(LOOPBACK, 9001))
        .expect("connect");
    let mut second = factory.make_socket().expect("client");
    second
        .connect(TransportSocketAddr::v4(LOOPBACK, 9001))
        .expect("connect");
    stack.poll();

    assert_eq!(first.state(), ConnectionState::Connected);
    assert!(second.tick().is_err());
    assert_eq!(second.state(), ConnectionState::Closed);
}

#[test]
fn bind_conflicts_and_misuse_are_reported() {
    let stack = SmolStack::loopback(1024);
    let factory = factory(&stack);
    let _server = factory
        .make_server(TransportSocketAddr::any_v4(80), 4)
        .expect("server");
    let err = factory
        .make_server(TransportSocketAddr::any_v4(80), 4)
        .expect_err("port taken");
    assert_eq!(err.kind(), ErrorKind::AddressInUse);

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
fn connect_timeout_aborts_on_tick() {
    let stack = SmolStack::loopback(1024);
    let mut client = factory(&stack).make_socket().expect("client");
    client.set_timeout(Duration::ZERO);
    client
        .connect(TransportSocketAddr::v4(LOOPBACK, 7))
        .expect("connect");
    std::thread::sleep(Duration::from_millis(2));

    let err = client.tick().expect_err("timed out");
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(client.state(), ConnectionState::Closed);
    stack.poll();
    assert_eq!(stack.socket_count(), 0);
}

#[test]
fn force_close_is_idempotent() {
    let stack = SmolStack::loopback(1024);
    let (_server, mut client, mut accepted) = establish(&stack, 8084);
    assert_eq!(client.close(true).expect("close"), CloseOutcome::Aborted);
    assert!(client.is_closed());
    assert_eq!(client.close(true).expect("close"), CloseOutcome::AlreadyClosed);

    stack.poll();
    assert_eq!(accepted.state(), ConnectionState::Closed);
    assert!(accepted.tick().is_err(), "reset surfaces on the peer");
}
