//! Tokio 后端回环集成测试。
//!
//! # 测试总览（Why）
//! - 驱动任务在多线程运行时的工作线程上完成 I/O，测试线程只通过同步契约观察结果；
//! - 覆盖回显、双向优雅关闭、大块写入的窗口回收、名字解析、端口冲突、建连失败与强制关闭。

use std::time::Duration;

use anyhow::{Context, Result, bail};
use flint_transport::{
    CloseOutcome, Connection, ConnectionState, ErrorKind, Socket, TransportConfig,
    TransportFactory, TransportSocketAddr,
};
use flint_transport_tokio::{TokioFactory, TokioSocket};
use tokio::time::Instant;

const DEADLINE: Duration = Duration::from_secs(10);

async fn wait_until(mut condition: impl FnMut() -> Result<bool>) -> Result<()> {
    let started = Instant::now();
    while !condition()? {
        if started.elapsed() > DEADLINE {
            bail!("condition not reached within {DEADLINE:?}");
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    Ok(())
}

fn factory(config: TransportConfig) -> Result<TokioFactory> {
    TokioFactory::current(config).context("runtime handle")
}

fn listen(factory: &TokioFactory) -> Result<(TokioSocket, u16)> {
    let server = factory
        .make_server(TransportSocketAddr::v4([127, 0, 0, 1], 0), 4)
        .context("make_server")?;
    let port = server.local_addr().context("listener address")?.port();
    Ok((server, port))
}

async fn connect_pair(factory: &TokioFactory) -> Result<(TokioSocket, TokioSocket, TokioSocket)> {
    let (mut server, port) = listen(factory)?;
    let mut client = factory.make_socket()?;
    client.connect(TransportSocketAddr::v4([127, 0, 0, 1], port))?;
    assert_eq!(client.state(), ConnectionState::Connecting);

    let mut accepted = None;
    wait_until(|| {
        client.tick()?;
        if accepted.is_none() {
            accepted = server.accept()?;
        }
        Ok(client.is_connected() && accepted.is_some())
    })
    .await?;
    let accepted = accepted.context("accepted connection")?;
    Ok((server, client, accepted))
}

async fn read_exact(socket: &mut TokioSocket, len: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(len);
    let mut buf = [0u8; 4096];
    wait_until(|| {
        let n = socket.read(&mut buf)?;
        out.extend_from_slice(&buf[..n]);
        Ok(out.len() >= len)
    })
    .await?;
    Ok(out)
}

#[tokio::test(flavor = "multi_thread")]
async fn echo_round_trip() -> Result<()> {
    let factory = factory(TransportConfig::default())?;
    let (_server, mut client, mut accepted) = connect_pair(&factory).await?;
    assert_eq!(accepted.host(), "127.0.0.1");
    assert_eq!(
        accepted.peer_addr().map(|addr| addr.port()),
        client.local_addr().map(|addr| addr.port())
    );

    client.write(b"PING")?;
    assert!(client.flush()?);
    assert_eq!(read_exact(&mut accepted, 4).await?, b"PING");

    accepted.write(b"PONG")?;
    assert_eq!(read_exact(&mut client, 4).await?, b"PONG");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn graceful_close_reaches_closed_on_both_sides() -> Result<()> {
    let factory = factory(TransportConfig::default())?;
    let (_server, mut client, mut accepted) = connect_pair(&factory).await?;

    client.write(b"bye")?;
    assert_eq!(client.close(false)?, CloseOutcome::Graceful);
    assert_eq!(client.state(), ConnectionState::Closing);
    assert_eq!(
        client.write(b"late").err().map(|err| err.kind()),
        Some(ErrorKind::ConnectionClosed)
    );

    assert_eq!(read_exact(&mut accepted, 3).await?, b"bye");
    wait_until(|| {
        accepted.tick()?;
        Ok(accepted.state() != ConnectionState::Connected)
    })
    .await?;
    assert!(!accepted.is_writable());
    assert!(accepted.is_closed(), "peer EOF with nothing left to send closes on tick");

    wait_until(|| {
        client.tick()?;
        Ok(client.is_closed())
    })
    .await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn large_write_is_delivered_in_order() -> Result<()> {
    let factory = factory(TransportConfig::default().with_snd_buf(1024)?)?;
    let (_server, mut client, mut accepted) = connect_pair(&factory).await?;

    let payload: Vec<u8> = (0..1024 * 1024).map(|i: u32| (i % 251) as u8).collect();
    client.write(&payload)?;
    assert!(client.in_flight() <= 1024);

    let mut received = Vec::with_capacity(payload.len());
    let mut buf = vec![0u8; 64 * 1024];
    wait_until(|| {
        client.tick()?;
        let n = accepted.read(&mut buf)?;
        received.extend_from_slice(&buf[..n]);
        Ok(received.len() >= payload.len())
    })
    .await?;
    assert!(received == payload, "payload corrupted in transit");
    wait_until(|| {
        client.tick()?;
        Ok(client.in_flight() == 0)
    })
    .await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn ensure_capacity_guarantees_room() -> Result<()> {
    let factory = factory(TransportConfig::default())?;
    let (_server, mut client, _accepted) = connect_pair(&factory).await?;
    client.ensure_capacity(100_000)?;
    assert!(client.available_for_write() >= 100_000);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn second_listener_on_same_port_is_address_in_use() -> Result<()> {
    let factory = factory(TransportConfig::default())?;
    let (_server, port) = listen(&factory)?;
    let err = factory
        .make_server(TransportSocketAddr::v4([127, 0, 0, 1], port), 4)
        .err()
        .context("port already listening")?;
    assert_eq!(err.kind(), ErrorKind::AddressInUse);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn refused_connection_surfaces_once_on_tick() -> Result<()> {
    let factory = factory(TransportConfig::default())?;
    let port = {
        let (mut server, port) = listen(&factory)?;
        server.close(false)?;
        port
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let mut client = factory.make_socket()?;
    client.connect(TransportSocketAddr::v4([127, 0, 0, 1], port))?;
    let mut failure = None;
    wait_until(|| {
        if let Err(err) = client.tick() {
            failure = Some(err);
        }
        Ok(failure.is_some() || client.is_connected())
    })
    .await?;
    let failure = failure.context("connect to a closed port must fail")?;
    assert_eq!(failure.code(), "flint.transport.tokio.connect_failed");
    assert_eq!(client.state(), ConnectionState::Closed);
    client.tick()?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn accept_without_pending_connection_returns_none() -> Result<()> {
    let factory = factory(TransportConfig::default())?;
    let (mut server, _port) = listen(&factory)?;
    assert!(server.accept()?.is_none());
    assert_eq!(server.state(), ConnectionState::Connecting);
    assert_eq!(server.pending_accepts(), 0);

    let mut idle = factory.make_socket()?;
    assert_eq!(
        idle.accept().err().map(|err| err.kind()),
        Some(ErrorKind::InvalidArgument)
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn host_names_resolve_inside_the_driver() -> Result<()> {
    let factory = factory(TransportConfig::default())?;
    let (mut server, port) = listen(&factory)?;

    let mut client = factory.make_socket()?;
    client.connect_host("localhost", port)?;
    assert_eq!(client.host(), "localhost");
    assert_eq!(client.state(), ConnectionState::Connecting);

    let mut accepted = None;
    wait_until(|| {
        client.tick()?;
        if accepted.is_none() {
            accepted = server.accept()?;
        }
        Ok(client.is_connected() && accepted.is_some())
    })
    .await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn force_close_aborts_and_resets_the_peer() -> Result<()> {
    let factory = factory(TransportConfig::default())?;
    let (_server, mut client, mut accepted) = connect_pair(&factory).await?;
    assert_eq!(client.close(true)?, CloseOutcome::Aborted);
    assert!(client.is_closed());
    assert_eq!(client.close(true)?, CloseOutcome::AlreadyClosed);

    wait_until(|| {
        let _ = accepted.tick();
        Ok(accepted.state() != ConnectionState::Connected)
    })
    .await?;
    Ok(())
}
