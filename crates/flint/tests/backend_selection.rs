//! 门面层的后端无关用法。
//!
//! # 测试总览（Why）
//! - 同一段只依赖 `TransportFactory`/`Connection` 契约的回显逻辑，分别跑在构建期选定的
//!   内核后端与厂商 SDK 回环替身上，验证协议层无需感知后端；
//! - 门面的 `make_server` 对端口冲突原样返回 `AddressInUse`。

use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use flint::{
    Connection, ConnectionState, ErrorKind, Socket, TransportConfig, TransportFactory,
    TransportSocketAddr, make_server, make_socket,
};
use flint_transport_vendor::VendorFactory;
use flint_transport_vendor::testing::LoopNetwork;

const DEADLINE: Duration = Duration::from_secs(10);

fn wait_until(
    pump: &mut impl FnMut(),
    mut condition: impl FnMut() -> Result<bool>,
) -> Result<()> {
    let started = Instant::now();
    loop {
        pump();
        if condition()? {
            return Ok(());
        }
        if started.elapsed() > DEADLINE {
            bail!("condition not reached within {DEADLINE:?}");
        }
    }
}

/// 建立一对连接并完成一次 PING/PONG 往返。
fn ping_pong<F: TransportFactory>(
    factory: &F,
    bind: TransportSocketAddr,
    mut pump: impl FnMut(),
) -> Result<()> {
    let mut server = make_server(factory, bind, 4)?;
    let port = server.local_addr().context("listener address")?.port();
    assert_eq!(server.state(), ConnectionState::Connecting);

    let mut client = make_socket(factory)?;
    client.connect(TransportSocketAddr::v4([127, 0, 0, 1], port))?;

    let mut accepted = None;
    wait_until(&mut pump, || {
        client.tick()?;
        if accepted.is_none() {
            accepted = server.accept()?;
        }
        Ok(client.is_connected() && accepted.is_some())
    })?;
    let mut accepted = accepted.context("accepted connection")?;

    client.write(b"PING")?;
    let mut buf = [0u8; 16];
    let mut received = Vec::new();
    wait_until(&mut pump, || {
        client.tick()?;
        let n = accepted.read(&mut buf)?;
        received.extend_from_slice(&buf[..n]);
        Ok(received.len() >= 4)
    })?;
    assert_eq!(received, b"PING");

    accepted.write(b"PONG")?;
    received.clear();
    wait_until(&mut pump, || {
        accepted.tick()?;
        let n = client.read(&mut buf)?;
        received.extend_from_slice(&buf[..n]);
        Ok(received.len() >= 4)
    })?;
    assert_eq!(received, b"PONG");

    client.close(true)?;
    assert!(client.is_closed());
    Ok(())
}

#[cfg(feature = "kernel")]
#[test]
fn selected_backend_runs_the_echo() -> Result<()> {
    assert_eq!(flint::BACKEND, "kernel");
    let factory = flint::factory(TransportConfig::default())?;
    ping_pong(&factory, TransportSocketAddr::v4([127, 0, 0, 1], 0), || {
        std::thread::sleep(Duration::from_millis(1));
    })
}

#[test]
fn vendor_loop_runs_the_same_echo() -> Result<()> {
    let net = LoopNetwork::new();
    let (clients, servers) = (net.clone(), net.clone());
    let factory = VendorFactory::new(
        move || clients.client(),
        move || servers.server(),
        TransportConfig::default(),
    );
    ping_pong(&factory, TransportSocketAddr::any_v4(0), || {
        net.poll();
    })
}

#[test]
fn make_server_reports_address_in_use() -> Result<()> {
    let net = LoopNetwork::new();
    let (clients, servers) = (net.clone(), net.clone());
    let factory = VendorFactory::new(
        move || clients.client(),
        move || servers.server(),
        TransportConfig::default(),
    );
    let _first = make_server(&factory, TransportSocketAddr::any_v4(1883), 4)?;
    let err = make_server(&factory, TransportSocketAddr::any_v4(1883), 4)
        .err()
        .context("second listener must fail")?;
    assert_eq!(err.kind(), ErrorKind::AddressInUse);
    Ok(())
}
