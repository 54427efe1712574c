use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use flint_buffer::ChunkQueue;
use flint_transport::error::map_io_error;
use flint_transport::{
    BackpressureQueue, CloseOutcome, Connection, ConnectionState, ErrorKind, OperationKind,
    Result, SendWindow, ShutdownDirection, Socket, TransportConfig, TransportError,
    TransportFactory, TransportSocketAddr, flush_with_budget,
};
use parking_lot::Mutex;
use tokio::net::{TcpSocket, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::driver::{self, AcceptQueue, Command, DriverEvent, StreamOptions, Target};
use crate::error::{ACCEPT, BIND, CONNECT, CONNECTION, LISTEN, RUNTIME, SHUTDOWN, WRITE};

enum Phase {
    Idle,
    Bound(TcpSocket),
    Connecting { since: Instant },
    Open,
    Listening { local: SocketAddr, task: JoinHandle<()> },
    Closed,
}

/// 与驱动任务之间的双向通道。
struct Link {
    commands: UnboundedSender<Command>,
    events: UnboundedReceiver<DriverEvent>,
}

impl Link {
    fn send(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }
}

/// Tokio 驱动任务上的连接。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 事件驱动运行时的 I/O 在其自己的任务中完成，上层却期望非阻塞的同步契约；
///   本类型把运行时回报的事件翻译回统一的 [`Connection`]/[`Socket`] 语义；
/// - 句柄本身不持有任何 Tokio I/O 资源，只持有与驱动任务之间的两条无界通道。
///
/// ## 逻辑（How）
/// - 写入经 [`BackpressureQueue`]：发送窗口为 `snd_buf - in_flight`，`in_flight` 在
///   [`DriverEvent::Sent`] 到达时回收，随后继续排空预留缓冲；
/// - 接收数据以 `Bytes` 挂入 [`ChunkQueue`]，`read()` 与 `tick()` 都会先应用已到达的事件；
/// - 驱动任务的失败被挂起，由下一次 `tick()` 交付一次。
///
/// ## 契约（What）
/// - `available()` 反映最近一次 `read()`/`tick()` 应用过的数据；
/// - `close(false)` 在驱动任务中依次完成已排队写入与 `shutdown(Write)`，读到对端 EOF 后进入 `Closed`；
/// - `close(true)` 与丢弃句柄都以 `SO_LINGER(0)` 中止连接。
///
/// ## 注意事项（Trade-offs）
/// - `flush()` 在调用线程上自旋等待驱动任务回报，需确保运行时有其他工作线程；
/// - `set_timeout` 只约束建连阶段。
pub struct TokioSocket {
    handle: Handle,
    config: TransportConfig,
    phase: Phase,
    link: Option<Link>,
    rx: ChunkQueue,
    rx_closed: bool,
    read_shutdown: bool,
    closing: bool,
    tx: BackpressureQueue,
    in_flight: usize,
    pending_error: Option<TransportError>,
    accepted: AcceptQueue,
    host: String,
    local: Option<SocketAddr>,
    peer: Option<SocketAddr>,
    no_delay: bool,
    connect_timeout: Duration,
}

impl TokioSocket {
    pub fn new(handle: Handle, config: TransportConfig) -> Self {
        Self {
            handle,
            phase: Phase::Idle,
            link: None,
            rx: ChunkQueue::new(),
            rx_closed: false,
            read_shutdown: false,
            closing: false,
            tx: BackpressureQueue::new(config.snd_buf()),
            in_flight: 0,
            pending_error: None,
            accepted: Arc::new(Mutex::new(VecDeque::new())),
            host: String::new(),
            local: None,
            peer: None,
            no_delay: config.no_delay(),
            connect_timeout: config.connect_timeout(),
            config,
        }
    }

    fn from_stream(handle: Handle, config: TransportConfig, stream: TcpStream, peer: SocketAddr) -> Self {
        let mut socket = Self::new(handle, config);
        if let Err(error) = socket.options().apply(&stream) {
            debug!(%peer, %error, "cannot apply stream options");
        }
        socket.local = stream.local_addr().ok();
        socket.peer = Some(peer);
        socket.host = peer.ip().to_string();

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::unbounded_channel();
        socket
            .handle
            .spawn(driver::run(stream, command_rx, event_tx));
        socket.link = Some(Link { commands, events });
        socket.phase = Phase::Open;
        socket
    }

    /// 监听连接中已被运行时接受、尚未取走的连接数。
    pub fn pending_accepts(&self) -> usize {
        self.accepted.lock().len()
    }

    /// 预留缓冲之外，已交给驱动任务但尚未写入内核的字节数。
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    fn options(&self) -> StreamOptions {
        StreamOptions {
            no_delay: self.no_delay,
            linger: self.config.linger(),
        }
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

    fn start(&mut self, target: Target) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::unbounded_channel();
        self.handle
            .spawn(driver::connect(target, self.options(), command_rx, event_tx));
        self.link = Some(Link { commands, events });
        self.phase = Phase::Connecting {
            since: Instant::now(),
        };
    }

    /// 应用驱动任务已回报的全部事件。
    fn pump(&mut self) {
        loop {
            let Some(link) = &mut self.link else {
                break;
            };
            let Ok(event) = link.events.try_recv() else {
                break;
            };
            self.apply(event);
        }
        if matches!(self.phase, Phase::Open) && self.closing && self.rx_closed {
            debug!(host = %self.host, "graceful close completed");
            self.finish(false);
        }
    }

    fn apply(&mut self, event: DriverEvent) {
        match event {
            DriverEvent::Connected { local, peer } => {
                if matches!(self.phase, Phase::Connecting { .. }) {
                    debug!(host = %self.host, %peer, "connected");
                    self.local = Some(local);
                    self.peer = Some(peer);
                    self.phase = Phase::Open;
                }
            }
            DriverEvent::Data(data) => {
                trace!(host = %self.host, len = data.len(), "received");
                if !self.read_shutdown {
                    self.rx.push(data);
                }
            }
            DriverEvent::Sent(len) => {
                self.in_flight = self.in_flight.saturating_sub(len);
                if matches!(self.phase, Phase::Open)
                    && let Err(error) = self.drain()
                {
                    self.pending_error = Some(error);
                }
            }
            DriverEvent::Eof => {
                debug!(host = %self.host, "connection closed by peer");
                self.rx_closed = true;
            }
            DriverEvent::Failed(error) => {
                let operation = if matches!(self.phase, Phase::Connecting { .. }) {
                    CONNECT
                } else {
                    CONNECTION
                };
                debug!(host = %self.host, %error, "driver task failed");
                self.pending_error = Some(map_io_error(operation, error));
                self.finish(true);
            }
        }
    }

    fn drain(&mut self) -> Result<bool> {
        let Some(link) = &self.link else {
            return Ok(self.tx.is_empty());
        };
        let mut window = DriverWindow {
            commands: &link.commands,
            in_flight: &mut self.in_flight,
            snd_buf: self.config.snd_buf(),
        };
        self.tx.drain(&mut window)
    }

    fn headroom(&self) -> usize {
        match (&self.phase, &self.link) {
            (Phase::Open, Some(_)) if !self.closing => {
                self.config.snd_buf().saturating_sub(self.in_flight)
            }
            _ => 0,
        }
    }

    /// 结束与驱动任务的关联并进入 `Closed`。
    fn finish(&mut self, abort: bool) {
        if let Some(link) = self.link.take() {
            link.send(Command::Close { abort });
        }
        let dropped = self.tx.clear();
        if dropped > 0 {
            debug!(host = %self.host, dropped, "discarding unsent bytes");
        }
        self.in_flight = 0;
        self.phase = Phase::Closed;
    }
}

impl fmt::Debug for TokioSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioSocket")
            .field("host", &self.host)
            .field("state", &self.state())
            .field("in_flight", &self.in_flight)
            .field("buffered", &self.tx.buffered())
            .finish()
    }
}

impl Drop for TokioSocket {
    fn drop(&mut self) {
        if let Phase::Listening { task, .. } = &self.phase {
            task.abort();
        }
        if let Some(link) = self.link.take() {
            trace!(host = %self.host, "dropping live connection");
            link.send(Command::Close { abort: true });
        }
    }
}

/// 驱动任务的发送窗口：`snd_buf` 减去已交给驱动任务、尚未确认写入内核的字节。
struct DriverWindow<'a> {
    commands: &'a UnboundedSender<Command>,
    in_flight: &'a mut usize,
    snd_buf: usize,
}

impl SendWindow for DriverWindow<'_> {
    fn headroom(&self) -> usize {
        self.snd_buf.saturating_sub(*self.in_flight)
    }

    fn transmit(&mut self, data: &[u8], _more: bool) -> Result<usize> {
        self.commands
            .send(Command::Write(Bytes::copy_from_slice(data)))
            .map_err(|_| TransportError::closed(WRITE))?;
        *self.in_flight += data.len();
        Ok(data.len())
    }
}

impl Connection for TokioSocket {
    fn scheme(&self) -> &'static str {
        "tokio"
    }

    fn connect(&mut self, addr: TransportSocketAddr) -> Result<()> {
        self.ensure_idle(CONNECT)?;
        self.host = addr.ip().to_string();
        trace!(host = %self.host, %addr, "connect");
        self.start(Target::Addr(addr.into()));
        Ok(())
    }

    fn connect_host(&mut self, host: &str, port: u16) -> Result<()> {
        if let Some(addr) = TransportSocketAddr::parse_ip(host, port) {
            return self.connect(addr);
        }
        self.ensure_idle(CONNECT)?;
        self.host = host.to_owned();
        debug!(host, port, "resolving");
        self.start(Target::Host(host.to_owned(), port));
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.pump();
        if self.read_shutdown {
            return Ok(0);
        }
        Ok(self.rx.read_into(buf))
    }

    fn available(&self) -> usize {
        if self.read_shutdown { 0 } else { self.rx.len() }
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.pump();
        if self.state() != ConnectionState::Connected {
            return Err(TransportError::closed(WRITE));
        }
        let Some(link) = &self.link else {
            return Err(TransportError::closed(WRITE));
        };
        trace!(host = %self.host, len = data.len(), "write");
        let mut window = DriverWindow {
            commands: &link.commands,
            in_flight: &mut self.in_flight,
            snd_buf: self.config.snd_buf(),
        };
        if let Err(error) = self.tx.write(&mut window, data) {
            self.finish(true);
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
        if self.link.is_none() {
            return Ok(false);
        }
        let budget = self.config.flush_budget();
        flush_with_budget(budget, || {
            self.pump();
            if self.link.is_none() {
                return Err(TransportError::closed(WRITE));
            }
            self.drain()?;
            Ok(self.tx.is_empty() && self.in_flight == 0)
        })
    }

    fn close(&mut self, force: bool) -> Result<CloseOutcome> {
        self.pump();
        let outcome = match &self.phase {
            Phase::Idle | Phase::Closed => {
                self.phase = Phase::Closed;
                CloseOutcome::AlreadyClosed
            }
            Phase::Bound(_) => {
                self.phase = Phase::Closed;
                CloseOutcome::Graceful
            }
            Phase::Listening { task, .. } => {
                task.abort();
                self.accepted.lock().clear();
                self.phase = Phase::Closed;
                CloseOutcome::Graceful
            }
            Phase::Connecting { .. } => {
                self.finish(true);
                CloseOutcome::Aborted
            }
            Phase::Open if force => {
                self.finish(true);
                CloseOutcome::Aborted
            }
            Phase::Open if self.closing => CloseOutcome::Graceful,
            Phase::Open => {
                if let Err(error) = self.drain() {
                    debug!(host = %self.host, %error, "final drain failed, connection aborted");
                    self.finish(true);
                    return Ok(CloseOutcome::Aborted);
                }
                let dropped = self.tx.clear();
                if dropped > 0 {
                    debug!(host = %self.host, dropped, "discarding unsent bytes on close");
                }
                if let Some(link) = &self.link {
                    link.send(Command::Close { abort: false });
                }
                self.closing = true;
                if self.rx_closed {
                    self.finish(false);
                }
                CloseOutcome::Graceful
            }
        };
        debug!(host = %self.host, force, ?outcome, "close");
        Ok(outcome)
    }

    fn shutdown(&mut self, direction: ShutdownDirection) -> Result<()> {
        self.pump();
        if !matches!(self.phase, Phase::Open) || self.link.is_none() {
            return Err(TransportError::closed(SHUTDOWN));
        }
        if direction.includes_read() {
            self.read_shutdown = true;
            self.rx.clear();
        }
        if direction.includes_write() && !self.closing {
            self.drain()?;
            if let Some(link) = &self.link {
                link.send(Command::Shutdown);
            }
            self.closing = true;
        }
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        match self.phase {
            Phase::Idle | Phase::Bound(_) => ConnectionState::Initialized,
            Phase::Connecting { .. } | Phase::Listening { .. } => ConnectionState::Connecting,
            Phase::Open if self.closing || self.rx_closed => ConnectionState::Closing,
            Phase::Open => ConnectionState::Connected,
            Phase::Closed => ConnectionState::Closed,
        }
    }

    fn set_no_delay(&mut self, no_delay: bool) {
        self.no_delay = no_delay;
        if let Some(link) = &self.link {
            link.send(Command::NoDelay(no_delay));
        }
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.connect_timeout = timeout;
    }

    fn tick(&mut self) -> Result<()> {
        self.pump();
        if let Some(error) = self.pending_error.take() {
            return Err(error);
        }
        if let Phase::Connecting { since } = self.phase
            && since.elapsed() > self.connect_timeout
        {
            debug!(host = %self.host, "connect timed out");
            self.finish(true);
            return Err(TransportError::timeout(CONNECT));
        }
        if !matches!(self.phase, Phase::Open) || self.closing {
            return Ok(());
        }
        let drained = self.drain()?;
        if self.rx_closed && drained && self.in_flight == 0 {
            debug!(host = %self.host, "peer finished, closing connection");
            self.finish(false);
        }
        Ok(())
    }

    fn peer_addr(&self) -> Option<TransportSocketAddr> {
        self.peer.map(TransportSocketAddr::from)
    }

    fn local_addr(&self) -> Option<TransportSocketAddr> {
        match &self.phase {
            Phase::Bound(socket) => socket.local_addr().ok().map(TransportSocketAddr::from),
            Phase::Listening { local, .. } => Some(TransportSocketAddr::from(*local)),
            _ => self.local.map(TransportSocketAddr::from),
        }
    }

    fn host(&self) -> &str {
        &self.host
    }
}

impl Socket for TokioSocket {
    fn bind(&mut self, addr: TransportSocketAddr) -> Result<()> {
        self.ensure_idle(BIND)?;
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(|error| map_io_error(BIND, error))?;
        socket
            .set_reuseaddr(true)
            .map_err(|error| map_io_error(BIND, error))?;
        if let Err(error) = socket.bind(addr.into()) {
            debug!(%addr, %error, "bind failed");
            return Err(map_io_error(BIND, error));
        }
        self.host = addr.ip().to_string();
        self.phase = Phase::Bound(socket);
        Ok(())
    }

    fn listen(&mut self, backlog: usize) -> Result<()> {
        let socket = match std::mem::replace(&mut self.phase, Phase::Closed) {
            Phase::Bound(socket) => socket,
            other => {
                self.phase = other;
                return Err(TransportError::invalid_argument(LISTEN, "socket is not bound"));
            }
        };
        let _runtime = self.handle.enter();
        let backlog = u32::try_from(backlog).unwrap_or(u32::MAX);
        let listener = socket
            .listen(backlog)
            .map_err(|error| map_io_error(LISTEN, error))?;
        let local = listener
            .local_addr()
            .map_err(|error| map_io_error(LISTEN, error))?;
        let task = self
            .handle
            .spawn(driver::accept_loop(listener, Arc::clone(&self.accepted)));
        debug!(%local, backlog, "listening");
        self.phase = Phase::Listening { local, task };
        Ok(())
    }

    fn accept(&mut self) -> Result<Option<Self>> {
        if !matches!(self.phase, Phase::Listening { .. }) {
            return Err(TransportError::invalid_argument(ACCEPT, "socket is not listening"));
        }
        let Some((stream, peer)) = self.accepted.lock().pop_front() else {
            return Ok(None);
        };
        Ok(Some(Self::from_stream(
            self.handle.clone(),
            self.config.clone(),
            stream,
            peer,
        )))
    }
}

/// Tokio 后端的工厂；新连接的驱动任务都派生到 `handle` 所属的运行时。
#[derive(Clone, Debug)]
pub struct TokioFactory {
    handle: Handle,
    config: TransportConfig,
}

impl TokioFactory {
    pub fn new(handle: Handle, config: TransportConfig) -> Self {
        Self { handle, config }
    }

    /// 使用当前线程所在的运行时；不在运行时内时返回 `NotReady`。
    pub fn current(config: TransportConfig) -> Result<Self> {
        let handle = Handle::try_current().map_err(|error| {
            TransportError::from_operation(ErrorKind::NotReady, RUNTIME, error.to_string())
        })?;
        Ok(Self::new(handle, config))
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }
}

impl TransportFactory for TokioFactory {
    type Socket = TokioSocket;

    fn make_socket(&self) -> Result<TokioSocket> {
        Ok(TokioSocket::new(self.handle.clone(), self.config.clone()))
    }
}
