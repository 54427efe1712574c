//! 原始回调后端在模拟栈上的契约测试。
//!
//! # 测试总览（Why）
//! - 回调驱动的连接必须对上层呈现与其他后端一致的非阻塞语义：回显、对端关闭、超窗写入、
//!   异步解析、复位与接受队列顺序；
//! - 模拟栈记录所有对失效 PCB 的调用，复位场景据此验证“错误回调后不再触碰句柄”。

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use flint_transport::{
    CloseOutcome, Connection, ConnectionState, ErrorKind, Socket, TransportConfig,
    TransportFactory, TransportSocketAddr,
};
use flint_transport_lwip::{RawFactory, RawSocket, SimConfig, SimStack, StackError};

const LOOPBACK: [u8; 4] = [127, 0, 0, 1];

fn factory(stack: &SimStack) -> RawFactory<SimStack> {
    RawFactory::new(stack.clone(), TransportConfig::default())
}

fn read_all(socket: &mut RawSocket<SimStack>) -> Vec<u8> {
    let mut buf = vec![0u8; socket.available()];
    let n = socket.read(&mut buf).expect("read");
    buf.truncate(n);
    buf
}

/// 建立一条回环连接，返回（监听、客户端、已接受）三元组。
fn establish(
    stack: &SimStack,
    port: u16,
) -> (RawSocket<SimStack>, RawSocket<SimStack>, RawSocket<SimStack>) {
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
        .expect("connection queued");
    (server, client, accepted)
}

#[test]
fn echo_round_trip() {
    let stack = SimStack::new();
    let (server, mut client, mut accepted) = establish(&stack, 8080);
    assert_eq!(server.state(), ConnectionState::Connecting);
    assert_eq!(accepted.host(), "127.0.0.1");
    assert_eq!(client.host(), "127.0.0.1");

    client.write(b"PING").expect("write");
    stack.poll();
    assert_eq!(accepted.available(), 4);
    assert_eq!(read_all(&mut accepted), b"PING");
    let pcb = accepted.pcb().expect("live pcb");
    assert_eq!(stack.rx_unacked(pcb), 0);

    accepted.write(b"PONG").expect("write");
    stack.poll();
    assert_eq!(read_all(&mut client), b"PONG");
    assert!(client.flush().expect("flush"));
}

#[test]
fn peer_close_moves_through_closing_to_closed() {
    let stack = SimStack::new();
    let (_server, mut client, mut accepted) = establish(&stack, 8081);

    client.write(b"bye").expect("write");
    assert_eq!(client.close(false).expect("close"), CloseOutcome::Graceful);
    assert_eq!(client.state(), ConnectionState::Closed);

    stack.poll();
    assert_eq!(accepted.state(), ConnectionState::Closing);
    assert!(accepted.is_readable());
    assert!(!accepted.is_writable());
    assert_eq!(read_all(&mut accepted), b"bye");

    accepted.tick().expect("tick");
    assert_eq!(accepted.state(), ConnectionState::Closed);
    stack.poll();
    assert_eq!(stack.pcb_count(), 1, "only the listener remains");
    assert_eq!(client.close(false).expect("close"), CloseOutcome::AlreadyClosed);
}

#[test]
fn oversized_write_is_drained_by_acknowledgements() {
    let stack = SimStack::with_config(SimConfig {
        snd_buf: 10,
        segment: 10,
        rx_window: 1024,
    });
    let (_server, mut client, mut accepted) = establish(&stack, 8082);

    let payload: Vec<u8> = (0..100u8).collect();
    assert_eq!(client.available_for_write(), 10);
    client.write(&payload).expect("write accepted in full");

    assert!(client.flush().expect("flush"));
    assert_eq!(read_all(&mut accepted), payload);
}

#[test]
fn ensure_capacity_guarantees_room() {
    let stack = SimStack::new();
    let (_server, mut client, _accepted) = establish(&stack, 8083);
    client.ensure_capacity(10_000).expect("ensure");
    assert!(client.available_for_write() >= 10_000);
    client.reserve_at_least(20_000).expect("reserve");
}

#[test]
fn host_names_are_resolved_by_the_stack() {
    let stack = SimStack::new();
    let factory = factory(&stack);
    let mut server = factory
        .make_server(TransportSocketAddr::any_v4(1883), 4)
        .expect("server");

    stack.add_host("broker.local", IpAddr::V4(Ipv4Addr::LOCALHOST));
    let mut client = factory.make_socket().expect("client");
    client.connect_host("broker.local", 1883).expect("connect_host");
    assert_eq!(client.host(), "broker.local");
    assert_eq!(client.state(), ConnectionState::Connecting);
    assert!(client.pcb().is_none(), "no pcb until the lookup completes");

    stack.poll();
    client.tick().expect("lookup completed");
    stack.poll();
    assert_eq!(client.state(), ConnectionState::Connected);
    assert!(server.accept().expect("accept").is_some());

    stack.cache_host("cached.local", IpAddr::V4(Ipv4Addr::LOCALHOST));
    let mut cached = factory.make_socket().expect("client");
    cached.connect_host("cached.local", 1883).expect("connect_host");
    assert!(cached.pcb().is_some(), "cache hit connects immediately");
}

#[test]
fn unknown_host_fails_on_tick() {
    let stack = SimStack::new();
    let mut client = factory(&stack).make_socket().expect("client");
    client.connect_host("example.invalid", 80).expect("connect_host");
    stack.poll();

    let err = client.tick().expect_err("lookup fails");
    assert_eq!(err.kind(), ErrorKind::Io);
    assert_eq!(err.code(), "flint.dns.lookup_failed");
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[test]
fn closing_a_pending_attempt_reports_abort() {
    let stack = SimStack::new();
    stack.add_host("late.local", IpAddr::V4(Ipv4Addr::LOCALHOST));
    let factory = factory(&stack);
    let _server = factory
        .make_server(TransportSocketAddr::any_v4(1884), 4)
        .expect("server");

    let mut resolving = factory.make_socket().expect("client");
    resolving.connect_host("late.local", 1884).expect("connect_host");
    assert_eq!(resolving.state(), ConnectionState::Connecting);
    assert!(resolving.pcb().is_none(), "still resolving");
    assert_eq!(resolving.close(false).expect("close"), CloseOutcome::Aborted);
    assert_eq!(resolving.state(), ConnectionState::Closed);

    let mut dialing = factory.make_socket().expect("client");
    dialing
        .connect(TransportSocketAddr::v4(LOOPBACK, 1884))
        .expect("connect");
    assert_eq!(dialing.close(false).expect("close"), CloseOutcome::Aborted);
    assert!(dialing.pcb().is_none());

    stack.poll();
    resolving.tick().expect("abandoned lookup is quiet");
    dialing.tick().expect("abandoned connect is quiet");
    assert_eq!(resolving.close(false).expect("close"), CloseOutcome::AlreadyClosed);
    assert_eq!(stack.stale_calls(), 0);
}

#[test]
fn reset_invalidates_the_pcb() {
    let stack = SimStack::new();
    let (_server, mut client, _accepted) = establish(&stack, 8084);
    let pcb = client.pcb().expect("live pcb");

    stack.reset(pcb);
    stack.poll();
    assert!(client.pcb().is_none());
    assert_eq!(client.state(), ConnectionState::Closed);

    let err = client.tick().expect_err("error surfaces once");
    assert_eq!(err.os_code(), Some(StackError::Reset.code()));
    client.tick().expect("nothing left to report");

    let err = client.write(b"late").expect_err("closed");
    assert_eq!(err.kind(), ErrorKind::ConnectionClosed);
    assert_eq!(client.close(false).expect("close"), CloseOutcome::AlreadyClosed);
    assert_eq!(stack.stale_calls(), 0);
}

#[test]
fn accept_preserves_arrival_order() {
    let stack = SimStack::new();
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
    assert_eq!(server.pending_accepts(), 3);

    for marker in 0..3u8 {
        let mut accepted = server.accept().expect("accept").expect("queued");
        stack.poll();
        assert_eq!(read_all(&mut accepted), [marker]);
    }
    assert!(server.accept().expect("accept").is_none());
}

#[test]
fn backlog_limit_refuses_extra_connections() {
    let stack = SimStack::new();
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
    let stack = SimStack::new();
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
fn no_delay_toggles_nagle() {
    let stack = SimStack::new();
    let config = TransportConfig::default().with_no_delay(true);
    let factory = RawFactory::new(stack.clone(), config);
    let mut client = factory.make_socket().expect("client");
    client
        .connect(TransportSocketAddr::v4(LOOPBACK, 7))
        .expect("connect");
    let pcb = client.pcb().expect("pcb");
    assert_eq!(stack.nagle_enabled(pcb), Some(false));

    client.set_no_delay(false);
    assert_eq!(stack.nagle_enabled(pcb), Some(true));
}

#[test]
fn connect_timeout_aborts_on_tick() {
    let stack = SimStack::new();
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
    assert_eq!(stack.stale_calls(), 0);
    assert_eq!(stack.pcb_count(), 0);
}
