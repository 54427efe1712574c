use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use flint_dns::{AddrHints, AddressFamily, DnsFuture, Resolver, ThreadResolver};
use flint_transport::{
    BackpressureQueue, CloseOutcome, Connection, ConnectionState, ErrorKind, OperationKind,
    Result, SendWindow, ShutdownDirection, Socket, TransportConfig, TransportError,
    TransportFactory, TransportSocketAddr, flush_with_budget,
};
use smoltcp::iface::SocketHandle;
use smoltcp::phy::Device;
use smoltcp::socket::tcp;
use smoltcp::wire::{IpAddress, IpEndpoint, IpListenEndpoint};
use tracing::{debug, trace};

use crate::error::{ACCEPT, BIND, CONNECT, CONNECTION, LISTEN, SHUTDOWN, WRITE};
use crate::stack::SmolStack;

enum Phase {
    Idle,
    Bound(IpListenEndpoint),
    Resolving(DnsFuture),
    Open { handle: SocketHandle, since: Instant },
    Listening(IpListenEndpoint),
    Closed,
}

/// smoltcp 套接字上的连接。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - smoltcp 提供 BSD 风格的非阻塞套接字，但数据真正收发发生在 [`SmolStack::poll`]；
///   本类型把每个操作一一映射到 `tcp::Socket` 调用，由协作式主循环负责推进协议栈。
///
/// ## 逻辑（How）
/// - 写路径与其他后端共用 [`BackpressureQueue`]，发送窗口余量为 `send_capacity - send_queue`；
/// - 对端 FIN 后（`CloseWait`），`tick()` 在预留缓冲与接收缓冲都清空后发出本端 FIN；
/// - 套接字在本端关闭或出错后交还给协议栈，待关闭握手结束再从 `SocketSet` 移除。
///
/// ## 契约（What）
/// - 监听状态报告为 `Connecting`；接受队列来自同端口监听池，按扫描到的到达顺序交付；
/// - 非本端发起的 `Closed`（RST、建连被拒、用户超时）只由下一次 `tick()` 返回一次错误。
pub struct SmolSocket<D: Device> {
    stack: SmolStack<D>,
    config: TransportConfig,
    phase: Phase,
    tx: BackpressureQueue,
    port: Option<u16>,
    host: String,
    closing: bool,
    read_shutdown: bool,
    no_delay: bool,
    connect_timeout: Duration,
}

impl<D: Device> SmolSocket<D> {
    pub fn new(stack: SmolStack<D>, config: TransportConfig) -> Self {
        let tx = BackpressureQueue::new(stack.buffer_size());
        Self {
            no_delay: config.no_delay(),
            connect_timeout: config.connect_timeout(),
            stack,
            config,
            phase: Phase::Idle,
            tx,
            port: None,
            host: String::new(),
            closing: false,
            read_shutdown: false,
        }
    }

    fn accepted(stack: SmolStack<D>, config: TransportConfig, handle: SocketHandle) -> Self {
        let mut socket = Self::new(stack, config);
        let no_delay = socket.no_delay;
        socket.host = socket.stack.with_socket(handle, |tcp| {
            tcp.set_nagle_enabled(!no_delay);
            tcp.remote_endpoint()
                .map(|endpoint| IpAddr::from(endpoint.addr).to_string())
                .unwrap_or_default()
        });
        socket.phase = Phase::Open {
            handle,
            since: Instant::now(),
        };
        socket
    }

    /// 监听中、尚未被取走的已建立入站连接数。
    pub fn pending_accepts(&self) -> usize {
        match self.phase {
            Phase::Listening(endpoint) => self.stack.pending_accepts(endpoint.port),
            _ => 0,
        }
    }

    fn handle(&self) -> Option<SocketHandle> {
        match self.phase {
            Phase::Open { handle, .. } => Some(handle),
            _ => None,
        }
    }

    fn headroom(&self) -> usize {
        self.handle().map_or(0, |handle| {
            SmolWindow {
                stack: &self.stack,
                handle,
            }
            .headroom()
        })
    }

    fn tcp_state(&self) -> Option<tcp::State> {
        self.handle()
            .map(|handle| self.stack.with_socket(handle, |tcp| tcp.state()))
    }

    fn ensure_idle(&self, operation: OperationKind) -> Result<()> {
        match self.phase {
            Phase::Idle => Ok(()),
            _ => Err(TransportError::invalid_argument(
                operation,
                "socket is already in use",
            )),
        }
    }

    fn start_connect(&mut self, addr: TransportSocketAddr) -> Result<()> {
        let Some(local_port) = self.stack.claim_port(0) else {
            return Err(TransportError::from_operation(
                ErrorKind::AddressInUse,
                CONNECT,
                "no ephemeral port available",
            ));
        };
        let handle = self.stack.add_socket();
        let remote = IpEndpoint::new(IpAddress::from(addr.ip()), addr.port());
        let no_delay = self.no_delay;
        trace!(host = %self.host, %addr, local_port, "connect");

        let connected = self.stack.with_socket_cx(handle, |tcp, cx| {
            tcp.set_nagle_enabled(!no_delay);
            tcp.connect(cx, remote, local_port)
        });
        if let Err(error) = connected {
            debug!(host = %self.host, %addr, ?error, "tcp connect failed");
            self.stack.retire(handle, false);
            self.stack.release_port(local_port);
            self.phase = Phase::Closed;
            return Err(TransportError::invalid_argument(CONNECT, format!("{error:?}")));
        }
        self.port = Some(local_port);
        self.phase = Phase::Open {
            handle,
            since: Instant::now(),
        };
        Ok(())
    }

    fn poll_resolution(&mut self) -> Result<()> {
        let Phase::Resolving(future) = &self.phase else {
            return Ok(());
        };
        if !future.completed() {
            return Ok(());
        }
        match future.fetch_result() {
            Ok(info) => {
                debug!(host = %self.host, addr = %info.addr, "dns lookup successful");
                self.start_connect(info.addr)
            }
            Err(error) => {
                debug!(host = %self.host, %error, "dns lookup failed, can't connect");
                self.phase = Phase::Closed;
                Err(error)
            }
        }
    }

    fn drain(&mut self, handle: SocketHandle) -> Result<bool> {
        let mut window = SmolWindow {
            stack: &self.stack,
            handle,
        };
        self.tx.drain(&mut window)
    }

    /// 放弃套接字句柄并进入 `Closed`；`abort` 为真时向对端发送 RST。
    fn release(&mut self, abort: bool) {
        if let Phase::Open { handle, .. } = self.phase {
            self.stack.retire(handle, abort);
        }
        if let Some(port) = self.port.take() {
            self.stack.release_port(port);
        }
        let dropped = self.tx.clear();
        if dropped > 0 {
            debug!(host = %self.host, dropped, "discarding unsent bytes");
        }
        self.phase = Phase::Closed;
    }

    fn tick_open(&mut self, handle: SocketHandle, since: Instant) -> Result<()> {
        let (state, rx_pending) = self
            .stack
            .with_socket(handle, |tcp| (tcp.state(), tcp.recv_queue()));
        match state {
            tcp::State::Closed => {
                let locally = self.closing;
                self.release(false);
                if locally {
                    debug!(host = %self.host, "graceful close completed");
                    return Ok(());
                }
                debug!(host = %self.host, "socket closed without local close");
                Err(TransportError::from_operation(
                    ErrorKind::Io,
                    CONNECTION,
                    "connection reset or refused",
                ))
            }
            tcp::State::TimeWait => {
                self.release(false);
                Ok(())
            }
            tcp::State::SynSent | tcp::State::SynReceived => {
                if since.elapsed() > self.connect_timeout {
                    debug!(host = %self.host, "connect timed out");
                    self.release(true);
                    return Err(TransportError::timeout(CONNECT));
                }
                Ok(())
            }
            tcp::State::CloseWait => {
                if self.drain(handle)? && rx_pending == 0 && !self.closing {
                    debug!(host = %self.host, "peer finished, closing socket");
                    self.stack.with_socket(handle, |tcp| tcp.close());
                    self.closing = true;
                }
                Ok(())
            }
            tcp::State::Established => self.drain(handle).map(|_| ()),
            _ => Ok(()),
        }
    }
}

impl<D: Device> fmt::Debug for SmolSocket<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmolSocket")
            .field("host", &self.host)
            .field("handle", &self.handle())
            .field("state", &self.state())
            .finish()
    }
}

impl<D: Device> Drop for SmolSocket<D> {
    fn drop(&mut self) {
        match self.phase {
            Phase::Open { handle, .. } => {
                trace!(host = %self.host, ?handle, "dropping live socket");
                self.stack.retire(handle, !self.closing);
            }
            Phase::Listening(endpoint) => self.stack.close_listener(endpoint.port),
            _ => {}
        }
        if let Some(port) = self.port.take() {
            self.stack.release_port(port);
        }
    }
}

/// `tcp::Socket` 发送缓冲：余量为尚未占用的发送缓冲，仅在可发送状态下开放。
struct SmolWindow<'a, D: Device> {
    stack: &'a SmolStack<D>,
    handle: SocketHandle,
}

impl<D: Device> SendWindow for SmolWindow<'_, D> {
    fn headroom(&self) -> usize {
        self.stack.with_socket(self.handle, |tcp| {
            if tcp.may_send() {
                tcp.send_capacity() - tcp.send_queue()
            } else {
                0
            }
        })
    }

    fn transmit(&mut self, data: &[u8], _more: bool) -> Result<usize> {
        self.stack
            .with_socket(self.handle, |tcp| tcp.send_slice(data))
            .map_err(|_| TransportError::closed(WRITE))
    }
}

fn map_tcp_state(state: tcp::State) -> ConnectionState {
    match state {
        tcp::State::Closed => ConnectionState::Closed,
        tcp::State::Listen | tcp::State::SynSent | tcp::State::SynReceived => {
            ConnectionState::Connecting
        }
        tcp::State::Established => ConnectionState::Connected,
        tcp::State::FinWait1
        | tcp::State::FinWait2
        | tcp::State::CloseWait
        | tcp::State::Closing
        | tcp::State::LastAck
        | tcp::State::TimeWait => ConnectionState::Closing,
    }
}

fn endpoint_addr(endpoint: IpEndpoint) -> TransportSocketAddr {
    SocketAddr::new(IpAddr::from(endpoint.addr), endpoint.port).into()
}

fn listen_addr(endpoint: IpListenEndpoint) -> TransportSocketAddr {
    let ip = endpoint
        .addr
        .map_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED), IpAddr::from);
    SocketAddr::new(ip, endpoint.port).into()
}

impl<D: Device> Connection for SmolSocket<D> {
    fn scheme(&self) -> &'static str {
        "smoltcp"
    }

    fn connect(&mut self, addr: TransportSocketAddr) -> Result<()> {
        self.ensure_idle(CONNECT)?;
        self.host = addr.ip().to_string();
        self.start_connect(addr)
    }

    fn connect_host(&mut self, host: &str, port: u16) -> Result<()> {
        if let Some(addr) = TransportSocketAddr::parse_ip(host, port) {
            return self.connect(addr);
        }
        self.ensure_idle(CONNECT)?;
        self.host = host.to_owned();
        let hints = AddrHints {
            family: AddressFamily::Inet,
            ..AddrHints::tcp()
        };
        let future = ThreadResolver::new().resolve(host, port, &hints)?;
        debug!(host, port, "resolving");
        self.phase = Phase::Resolving(future);
        self.poll_resolution()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Some(handle) = self.handle() else {
            return Ok(0);
        };
        if self.read_shutdown {
            return Ok(0);
        }
        match self.stack.with_socket(handle, |tcp| tcp.recv_slice(buf)) {
            Ok(n) => Ok(n),
            Err(tcp::RecvError::Finished) => Ok(0),
            Err(tcp::RecvError::InvalidState) => Ok(0),
        }
    }

    fn available(&self) -> usize {
        match self.handle() {
            Some(handle) if !self.read_shutdown => {
                self.stack.with_socket(handle, |tcp| tcp.recv_queue())
            }
            _ => 0,
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let Some(handle) = self.handle() else {
            return Err(TransportError::closed(WRITE));
        };
        if self.closing || self.state() != ConnectionState::Connected {
            return Err(TransportError::closed(WRITE));
        }
        trace!(host = %self.host, len = data.len(), "write");
        let mut window = SmolWindow {
            stack: &self.stack,
            handle,
        };
        if let Err(error) = self.tx.write(&mut window, data) {
            self.release(true);
            return Err(error);
        }
        Ok(())
    }

    fn available_for_write(&self) -> usize {
        self.tx.available_for_write(self.headroom())
    }

    fn reserve_at_least(&mut self, size: usize) -> Result<()> {
        self.tx.reserve_at_least(size)
    }

    fn ensure_capacity(&mut self, size: usize) -> Result<()> {
        let headroom = self.headroom();
        self.tx.ensure_capacity(size, headroom)
    }

    fn flush(&mut self) -> Result<bool> {
        let Some(handle) = self.handle() else {
            return Ok(false);
        };
        let budget = self.config.flush_budget();
        flush_with_budget(budget, || {
            self.drain(handle)?;
            self.stack.poll();
            let unacked = self.stack.with_socket(handle, |tcp| tcp.send_queue());
            Ok(self.tx.is_empty() && unacked == 0)
        })
    }

    fn close(&mut self, force: bool) -> Result<CloseOutcome> {
        let outcome = match self.phase {
            Phase::Idle | Phase::Closed => {
                self.phase = Phase::Closed;
                CloseOutcome::AlreadyClosed
            }
            Phase::Bound(_) => {
                self.release(false);
                CloseOutcome::Graceful
            }
            Phase::Resolving(_) => {
                self.release(false);
                CloseOutcome::Aborted
            }
            Phase::Listening(endpoint) => {
                self.stack.close_listener(endpoint.port);
                self.port = None;
                self.phase = Phase::Closed;
                CloseOutcome::Graceful
            }
            Phase::Open { handle, .. } => {
                let connecting = self
                    .tcp_state()
                    .is_some_and(|state| map_tcp_state(state) == ConnectionState::Connecting);
                if force || connecting {
                    self.release(true);
                    CloseOutcome::Aborted
                } else if self.closing {
                    CloseOutcome::Graceful
                } else {
                    if let Err(error) = self.drain(handle) {
                        debug!(host = %self.host, %error, "final drain failed, connection aborted");
                        self.release(true);
                        return Ok(CloseOutcome::Aborted);
                    }
                    let dropped = self.tx.clear();
                    if dropped > 0 {
                        debug!(host = %self.host, dropped, "discarding unsent bytes on close");
                    }
                    self.stack.with_socket(handle, |tcp| tcp.close());
                    self.closing = true;
                    CloseOutcome::Graceful
                }
            }
        };
        debug!(host = %self.host, force, ?outcome, "close");
        Ok(outcome)
    }

    fn shutdown(&mut self, direction: ShutdownDirection) -> Result<()> {
        let Some(handle) = self.handle() else {
            return Err(TransportError::closed(SHUTDOWN));
        };
        if direction.includes_read() {
            self.read_shutdown = true;
        }
        if direction.includes_write() && !self.closing {
            self.drain(handle)?;
            self.stack.with_socket(handle, |tcp| tcp.close());
            self.closing = true;
        }
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        match self.phase {
            Phase::Idle | Phase::Bound(_) => ConnectionState::Initialized,
            Phase::Resolving(_) | Phase::Listening(_) => ConnectionState::Connecting,
            Phase::Closed => ConnectionState::Closed,
            Phase::Open { .. } => self
                .tcp_state()
                .map_or(ConnectionState::Closed, map_tcp_state),
        }
    }

    fn set_no_delay(&mut self, no_delay: bool) {
        self.no_delay = no_delay;
        if let Some(handle) = self.handle() {
            self.stack
                .with_socket(handle, |tcp| tcp.set_nagle_enabled(!no_delay));
        }
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.connect_timeout = timeout;
        if let Some(handle) = self.handle() {
            let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
            self.stack.with_socket(handle, |tcp| {
                tcp.set_timeout(Some(smoltcp::time::Duration::from_millis(millis)));
            });
        }
    }

    fn tick(&mut self) -> Result<()> {
        self.poll_resolution()?;
        match self.phase {
            Phase::Open { handle, since } => self.tick_open(handle, since),
            _ => Ok(()),
        }
    }

    fn peer_addr(&self) -> Option<TransportSocketAddr> {
        let handle = self.handle()?;
        self.stack
            .with_socket(handle, |tcp| tcp.remote_endpoint())
            .map(endpoint_addr)
    }

    fn local_addr(&self) -> Option<TransportSocketAddr> {
        match self.phase {
            Phase::Bound(endpoint) | Phase::Listening(endpoint) => Some(listen_addr(endpoint)),
            Phase::Open { handle, .. } => self
                .stack
                .with_socket(handle, |tcp| tcp.local_endpoint())
                .map(endpoint_addr),
            _ => None,
        }
    }

    fn host(&self) -> &str {
        &self.host
    }
}

impl<D: Device> Socket for SmolSocket<D> {
    fn bind(&mut self, addr: TransportSocketAddr) -> Result<()> {
        self.ensure_idle(BIND)?;
        let Some(port) = self.stack.claim_port(addr.port()) else {
            debug!(%addr, "port already bound");
            return Err(TransportError::from_operation(
                ErrorKind::AddressInUse,
                BIND,
                format!("port {} is already in use", addr.port()),
            ));
        };
        let ip = addr.ip();
        let endpoint = IpListenEndpoint {
            addr: (!ip.is_unspecified()).then(|| IpAddress::from(ip)),
            port,
        };
        self.host = ip.to_string();
        self.port = Some(port);
        self.phase = Phase::Bound(endpoint);
        Ok(())
    }

    fn listen(&mut self, backlog: usize) -> Result<()> {
        let Phase::Bound(endpoint) = self.phase else {
            return Err(TransportError::invalid_argument(LISTEN, "socket is not bound"));
        };
        if let Err(error) = self.stack.open_listener(endpoint, backlog) {
            debug!(port = endpoint.port, ?error, "listen failed");
            self.release(false);
            return Err(TransportError::invalid_argument(LISTEN, format!("{error:?}")));
        }
        // 端口归监听池所有，由 close_listener 释放。
        self.port = None;
        self.phase = Phase::Listening(endpoint);
        debug!(port = endpoint.port, backlog, "listening");
        Ok(())
    }

    fn accept(&mut self) -> Result<Option<Self>> {
        let Phase::Listening(endpoint) = self.phase else {
            return Err(TransportError::invalid_argument(ACCEPT, "socket is not listening"));
        };
        let Some(handle) = self.stack.accept(endpoint.port) else {
            return Ok(None);
        };
        let socket = Self::accepted(self.stack.clone(), self.config.clone(), handle);
        debug!(peer = %socket.host, ?handle, "accepted");
        Ok(Some(socket))
    }
}

/// smoltcp 后端的工厂。
pub struct SmolFactory<D: Device> {
    stack: SmolStack<D>,
    config: TransportConfig,
}

impl<D: Device> SmolFactory<D> {
    pub fn new(stack: SmolStack<D>, config: TransportConfig) -> Self {
        Self { stack, config }
    }

    pub fn stack(&self) -> &SmolStack<D> {
        &self.stack
    }
}

impl<D: Device> Clone for SmolFactory<D> {
    fn clone(&self) -> Self {
        Self {
            stack: self.stack.clone(),
            config: self.config.clone(),
        }
    }
}

impl<D: Device> fmt::Debug for SmolFactory<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmolFactory")
            .field("stack", &self.stack)
            .field("config", &self.config)
            .finish()
    }
}

impl<D: Device> TransportFactory for SmolFactory<D> {
    type Socket = SmolSocket<D>;

    fn make_socket(&self) -> Result<SmolSocket<D>> {
        Ok(SmolSocket::new(self.stack.clone(), self.config.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smoltcp::phy::Loopback;
    use tracing_test::traced_test;

    #[test]
    fn tcp_states_map_onto_the_lifecycle() {
        assert_eq!(map_tcp_state(tcp::State::SynSent), ConnectionState::Connecting);
        assert_eq!(map_tcp_state(tcp::State::Established), ConnectionState::Connected);
        assert_eq!(map_tcp_state(tcp::State::CloseWait), ConnectionState::Closing);
        assert_eq!(map_tcp_state(tcp::State::TimeWait), ConnectionState::Closing);
        assert_eq!(map_tcp_state(tcp::State::Closed), ConnectionState::Closed);
    }

    #[test]
    fn unspecified_listen_address_reports_any() {
        let addr = listen_addr(IpListenEndpoint {
            addr: None,
            port: 80,
        });
        assert_eq!(addr, TransportSocketAddr::any_v4(80));
    }

    #[test]
    #[traced_test]
    fn refused_connect_is_reported_once() {
        let stack = SmolStack::<Loopback>::loopback(1024);
        let mut client = SmolSocket::new(stack.clone(), TransportConfig::default());
        client
            .connect(TransportSocketAddr::v4([127, 0, 0, 1], 9))
            .expect("connect issued");
        stack.poll();

        assert_eq!(client.state(), ConnectionState::Closed);
        let err = client.tick().expect_err("refusal surfaces");
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(logs_contain("socket closed without local close"));
        client.tick().expect("reported once");
        assert_eq!(client.close(true).expect("close"), CloseOutcome::AlreadyClosed);
    }

    #[test]
    fn closing_a_pending_connect_reports_abort() {
        let stack = SmolStack::<Loopback>::loopback(1024);
        let mut client = SmolSocket::new(stack.clone(), TransportConfig::default());
        client
            .connect(TransportSocketAddr::v4([127, 0, 0, 1], 9))
            .expect("connect issued");
        assert_eq!(client.state(), ConnectionState::Connecting);

        assert_eq!(client.close(false).expect("close"), CloseOutcome::Aborted);
        assert_eq!(client.state(), ConnectionState::Closed);
        stack.poll();
        client.tick().expect("an abandoned connect is not an error");
    }
}
