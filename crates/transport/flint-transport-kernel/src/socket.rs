use std::fmt;
use std::io::{self, Read, Write};
use std::mem;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::time::{Duration, Instant};

use flint_dns::{AddrHints, AddressFamily, DnsFuture, Resolver, ThreadResolver};
use flint_transport::error::map_io_error;
use flint_transport::{
    BackpressureQueue, CloseOutcome, Connection, ConnectionState, Result, SendWindow,
    ShutdownDirection, Socket, TransportConfig, TransportError, TransportFactory,
    TransportSocketAddr, flush_with_budget,
};
use socket2::{Domain, Protocol, SockAddr, SockRef, Type};
use tracing::{debug, trace};

use crate::error::{ACCEPT, BIND, CONNECT, LISTEN, READ, SHUTDOWN, SOCKET, WRITE};

const PEEK_PROBE: usize = 2048;

enum Endpoint {
    Idle,
    Bound(socket2::Socket),
    Resolving(DnsFuture),
    Connecting { stream: TcpStream, since: Instant },
    Stream(TcpStream),
    Listening(TcpListener),
    Closed,
}

/// 内核非阻塞套接字上的连接。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 上层要求所有操作立即返回；内核套接字以 `O_NONBLOCK` 运行，`WouldBlock` 一律折算为
///   “暂无数据/窗口已满”，而不是错误；
/// - 内核不暴露发送窗口余量，写路径以“名义 `snd_buf`，短写后归零”近似，
///   下一次 `write`/`tick`/`flush` 时重新探测。
///
/// ## 逻辑（How）
/// - 套接字在 `bind`/`connect` 时才经 `socket2` 创建，并立即设置非阻塞与可选 `SO_LINGER`；
/// - 非阻塞 `connect` 返回 `EINPROGRESS` 后进入 `Connecting`，`tick()` 通过 `SO_ERROR`
///   与 `getpeername` 判定完成、失败或超时；
/// - `close(false)` 只发送 FIN（写半关闭），待读到对端 FIN 后才释放描述符。
///
/// ## 契约（What）
/// - `read` 读到 EOF 后状态为 `Closing`，此后返回 `0`；硬错误使连接进入 `Closed` 并原样返回；
/// - `available()` 基于 `peek`，是下界而非精确值；
/// - `flush()` 在预留缓冲全部交给内核后返回 `true`，不等待对端确认。
///
/// ## 注意事项（Trade-offs）
/// - 监听中的连接报告 `Connecting`，与回调栈后端保持一致。
pub struct KernelSocket {
    endpoint: Endpoint,
    config: TransportConfig,
    tx: BackpressureQueue,
    window_blocked: bool,
    read_closed: bool,
    write_closed: bool,
    host: String,
    no_delay: bool,
    connect_timeout: Duration,
}

impl KernelSocket {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            endpoint: Endpoint::Idle,
            tx: BackpressureQueue::new(config.snd_buf()),
            window_blocked: false,
            read_closed: false,
            write_closed: false,
            host: String::new(),
            no_delay: config.no_delay(),
            connect_timeout: config.connect_timeout(),
            config,
        }
    }

    fn from_stream(stream: TcpStream, peer: SocketAddr, config: TransportConfig) -> Self {
        let mut socket = Self::new(config);
        socket.host = peer.ip().to_string();
        socket.endpoint = Endpoint::Stream(stream);
        socket
    }

    fn ensure_idle(&self, operation: flint_transport::OperationKind) -> Result<()> {
        match self.endpoint {
            Endpoint::Idle => Ok(()),
            _ => Err(TransportError::invalid_argument(
                operation,
                "socket is already in use",
            )),
        }
    }

    fn start_connect(&mut self, addr: TransportSocketAddr) -> Result<()> {
        let target = SocketAddr::from(addr);
        let socket =
            new_socket(target, &self.config).map_err(|error| map_io_error(SOCKET, error))?;
        let in_progress = match socket.connect(&SockAddr::from(target)) {
            Ok(()) => false,
            Err(error) if connect_in_progress(&error) => true,
            Err(error) => {
                debug!(host = %self.host, %addr, %error, "connect failed");
                self.endpoint = Endpoint::Closed;
                return Err(map_io_error(CONNECT, error));
            }
        };

        let stream = TcpStream::from(socket);
        if self.no_delay
            && let Err(error) = stream.set_nodelay(true)
        {
            debug!(host = %self.host, %error, "cannot disable nagle");
        }
        trace!(host = %self.host, %addr, in_progress, "connect issued");
        self.endpoint = if in_progress {
            Endpoint::Connecting {
                stream,
                since: Instant::now(),
            }
        } else {
            Endpoint::Stream(stream)
        };
        Ok(())
    }

    fn poll_connect(&mut self) -> Result<()> {
        let Endpoint::Connecting { stream, since } = &self.endpoint else {
            return Ok(());
        };
        let since = *since;
        let failure = match stream.take_error() {
            Ok(Some(error)) | Err(error) => Some(error),
            Ok(None) => None,
        };
        if let Some(error) = failure {
            debug!(host = %self.host, %error, "connect failed");
            self.endpoint = Endpoint::Closed;
            return Err(map_io_error(CONNECT, error));
        }

        match stream.peer_addr() {
            Ok(peer) => {
                debug!(host = %self.host, %peer, "connected");
                if let Endpoint::Connecting { stream, .. } =
                    mem::replace(&mut self.endpoint, Endpoint::Closed)
                {
                    self.endpoint = Endpoint::Stream(stream);
                }
                Ok(())
            }
            Err(error) if error.kind() == io::ErrorKind::NotConnected => {
                if since.elapsed() > self.connect_timeout {
                    debug!(host = %self.host, "connect timed out");
                    self.endpoint = Endpoint::Closed;
                    return Err(TransportError::timeout(CONNECT));
                }
                Ok(())
            }
            Err(error) => {
                self.endpoint = Endpoint::Closed;
                Err(map_io_error(CONNECT, error))
            }
        }
    }

    fn poll_resolution(&mut self) -> Result<()> {
        let Endpoint::Resolving(future) = &self.endpoint else {
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
                self.endpoint = Endpoint::Closed;
                Err(error)
            }
        }
    }

    /// 排空预留缓冲；写方向关闭后改为探测对端 FIN。
    fn service_stream(&mut self) -> Result<()> {
        let Endpoint::Stream(stream) = &self.endpoint else {
            return Ok(());
        };
        if !self.write_closed {
            self.window_blocked = false;
            let mut window = StreamWindow {
                stream,
                blocked: &mut self.window_blocked,
                snd_buf: self.config.snd_buf(),
            };
            if let Err(error) = self.tx.drain(&mut window) {
                debug!(host = %self.host, %error, "drain failed");
                self.discard();
                return Err(error);
            }
            return Ok(());
        }

        if !self.read_closed {
            let mut probe = [0u8; 1];
            match stream.peek(&mut probe) {
                Ok(0) => self.read_closed = true,
                Ok(_) => {}
                Err(error) if is_transient(&error) => {}
                Err(error) => {
                    debug!(host = %self.host, %error, "connection lost while closing");
                    self.discard();
                    return Err(map_io_error(READ, error));
                }
            }
        }
        if self.read_closed {
            debug!(host = %self.host, "both directions closed, releasing socket");
            self.discard();
        }
        Ok(())
    }

    fn discard(&mut self) {
        self.endpoint = Endpoint::Closed;
        self.tx.clear();
    }

    fn headroom(&self) -> usize {
        match self.endpoint {
            Endpoint::Stream(_) if !self.window_blocked && !self.write_closed => {
                self.config.snd_buf()
            }
            _ => 0,
        }
    }
}

impl fmt::Debug for KernelSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelSocket")
            .field("host", &self.host)
            .field("state", &self.state())
            .field("buffered", &self.tx.buffered())
            .finish()
    }
}

/// 内核发送窗口的近似：短写或 `WouldBlock` 后余量归零。
struct StreamWindow<'a> {
    stream: &'a TcpStream,
    blocked: &'a mut bool,
    snd_buf: usize,
}

impl SendWindow for StreamWindow<'_> {
    fn headroom(&self) -> usize {
        if *self.blocked { 0 } else { self.snd_buf }
    }

    fn transmit(&mut self, data: &[u8], _more: bool) -> Result<usize> {
        let mut writer = self.stream;
        match writer.write(data) {
            Ok(n) => {
                if n < data.len() {
                    *self.blocked = true;
                }
                Ok(n)
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                *self.blocked = true;
                Ok(0)
            }
            Err(error) if error.kind() == io::ErrorKind::Interrupted => Ok(0),
            Err(error) => Err(map_io_error(WRITE, error)),
        }
    }
}

fn new_socket(target: SocketAddr, config: &TransportConfig) -> io::Result<socket2::Socket> {
    let socket = socket2::Socket::new(Domain::for_address(target), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;
    if let Some(linger) = config.linger() {
        socket.set_linger(Some(linger))?;
    }
    Ok(socket)
}

fn connect_in_progress(error: &io::Error) -> bool {
    #[cfg(unix)]
    if error.raw_os_error() == Some(libc::EINPROGRESS) {
        return true;
    }
    error.kind() == io::ErrorKind::WouldBlock
}

fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

impl Connection for KernelSocket {
    fn scheme(&self) -> &'static str {
        "kernel"
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
        self.endpoint = Endpoint::Resolving(future);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() || self.read_closed {
            return Ok(0);
        }
        let Endpoint::Stream(stream) = &self.endpoint else {
            return Ok(0);
        };
        let mut reader = stream;
        match reader.read(buf) {
            Ok(0) => {
                debug!(host = %self.host, "connection closed by peer");
                self.read_closed = true;
                if self.write_closed {
                    self.discard();
                }
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(error) if is_transient(&error) => Ok(0),
            Err(error) => {
                debug!(host = %self.host, %error, "read failed");
                self.discard();
                Err(map_io_error(READ, error))
            }
        }
    }

    fn available(&self) -> usize {
        match &self.endpoint {
            Endpoint::Stream(stream) if !self.read_closed => {
                let mut probe = [0u8; PEEK_PROBE];
                stream.peek(&mut probe).unwrap_or(0)
            }
            _ => 0,
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.state() != ConnectionState::Connected {
            return Err(TransportError::closed(WRITE));
        }
        let Endpoint::Stream(stream) = &self.endpoint else {
            return Err(TransportError::closed(WRITE));
        };
        self.window_blocked = false;
        let mut window = StreamWindow {
            stream,
            blocked: &mut self.window_blocked,
            snd_buf: self.config.snd_buf(),
        };
        match self.tx.write(&mut window, data) {
            Ok(direct) => {
                trace!(host = %self.host, len = data.len(), direct, "write");
                Ok(())
            }
            Err(error) => {
                debug!(host = %self.host, %error, "write failed");
                self.discard();
                Err(error)
            }
        }
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
        let Endpoint::Stream(stream) = &self.endpoint else {
            return Ok(false);
        };
        if self.write_closed {
            return Ok(self.tx.is_empty());
        }
        let snd_buf = self.config.snd_buf();
        let tx = &mut self.tx;
        let blocked = &mut self.window_blocked;
        let result = flush_with_budget(self.config.flush_budget(), || {
            *blocked = false;
            let mut window = StreamWindow {
                stream,
                blocked: &mut *blocked,
                snd_buf,
            };
            tx.drain(&mut window)
        });
        if result.is_err() {
            self.discard();
        }
        result
    }

    fn close(&mut self, force: bool) -> Result<CloseOutcome> {
        if !force
            && !self.write_closed
            && let Endpoint::Stream(stream) = &self.endpoint
        {
            self.window_blocked = false;
            let mut window = StreamWindow {
                stream,
                blocked: &mut self.window_blocked,
                snd_buf: self.config.snd_buf(),
            };
            if let Err(error) = self.tx.drain(&mut window) {
                debug!(host = %self.host, %error, "final drain failed");
            }
        }
        let dropped = self.tx.clear();
        if dropped > 0 {
            debug!(host = %self.host, dropped, "discarding unsent bytes on close");
        }

        let outcome = match mem::replace(&mut self.endpoint, Endpoint::Closed) {
            Endpoint::Idle | Endpoint::Closed => CloseOutcome::AlreadyClosed,
            Endpoint::Stream(stream) | Endpoint::Connecting { stream, .. } if force => {
                if let Err(error) = SockRef::from(&stream).set_linger(Some(Duration::ZERO)) {
                    debug!(host = %self.host, %error, "cannot arm reset on close");
                }
                CloseOutcome::Aborted
            }
            Endpoint::Stream(stream) if self.read_closed || self.write_closed => {
                if !self.read_closed {
                    self.endpoint = Endpoint::Stream(stream);
                }
                CloseOutcome::Graceful
            }
            Endpoint::Stream(stream) => match stream.shutdown(Shutdown::Write) {
                Ok(()) => {
                    self.write_closed = true;
                    self.endpoint = Endpoint::Stream(stream);
                    CloseOutcome::Graceful
                }
                Err(error) => {
                    debug!(host = %self.host, %error, "shutdown failed, connection already gone");
                    CloseOutcome::AlreadyClosed
                }
            },
            Endpoint::Resolving(_) => CloseOutcome::Aborted,
            Endpoint::Connecting { stream, .. } => {
                if let Err(error) = SockRef::from(&stream).set_linger(Some(Duration::ZERO)) {
                    debug!(host = %self.host, %error, "cannot arm reset on close");
                }
                CloseOutcome::Aborted
            }
            Endpoint::Bound(_) | Endpoint::Listening(_) => {
                if force {
                    CloseOutcome::Aborted
                } else {
                    CloseOutcome::Graceful
                }
            }
        };
        debug!(host = %self.host, force, ?outcome, "close");
        Ok(outcome)
    }

    fn shutdown(&mut self, direction: ShutdownDirection) -> Result<()> {
        let Endpoint::Stream(stream) = &self.endpoint else {
            return Err(TransportError::closed(SHUTDOWN));
        };
        stream
            .shutdown(direction.into())
            .map_err(|error| map_io_error(SHUTDOWN, error))?;
        if direction.includes_write() {
            self.write_closed = true;
        }
        if direction.includes_read() {
            self.read_closed = true;
        }
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        match self.endpoint {
            Endpoint::Idle | Endpoint::Bound(_) => ConnectionState::Initialized,
            Endpoint::Resolving(_) | Endpoint::Connecting { .. } | Endpoint::Listening(_) => {
                ConnectionState::Connecting
            }
            Endpoint::Stream(_) if self.read_closed || self.write_closed => {
                ConnectionState::Closing
            }
            Endpoint::Stream(_) => ConnectionState::Connected,
            Endpoint::Closed => ConnectionState::Closed,
        }
    }

    fn set_no_delay(&mut self, no_delay: bool) {
        self.no_delay = no_delay;
        let stream = match &self.endpoint {
            Endpoint::Stream(stream) | Endpoint::Connecting { stream, .. } => stream,
            _ => return,
        };
        if let Err(error) = stream.set_nodelay(no_delay) {
            debug!(host = %self.host, %error, "cannot change nagle");
        }
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.connect_timeout = timeout;
    }

    fn tick(&mut self) -> Result<()> {
        match self.endpoint {
            Endpoint::Resolving(_) => self.poll_resolution(),
            Endpoint::Connecting { .. } => self.poll_connect(),
            Endpoint::Stream(_) => self.service_stream(),
            _ => Ok(()),
        }
    }

    fn peer_addr(&self) -> Option<TransportSocketAddr> {
        match &self.endpoint {
            Endpoint::Stream(stream) | Endpoint::Connecting { stream, .. } => {
                stream.peer_addr().ok().map(Into::into)
            }
            _ => None,
        }
    }

    fn local_addr(&self) -> Option<TransportSocketAddr> {
        let local = match &self.endpoint {
            Endpoint::Stream(stream) | Endpoint::Connecting { stream, .. } => {
                stream.local_addr().ok()
            }
            Endpoint::Listening(listener) => listener.local_addr().ok(),
            Endpoint::Bound(socket) => socket.local_addr().ok().and_then(|addr| addr.as_socket()),
            _ => None,
        };
        local.map(Into::into)
    }

    fn host(&self) -> &str {
        &self.host
    }
}

impl Socket for KernelSocket {
    fn bind(&mut self, addr: TransportSocketAddr) -> Result<()> {
        self.ensure_idle(BIND)?;
        let target = SocketAddr::from(addr);
        let socket =
            new_socket(target, &self.config).map_err(|error| map_io_error(SOCKET, error))?;
        socket
            .set_reuse_address(true)
            .map_err(|error| map_io_error(SOCKET, error))?;
        if let Err(error) = socket.bind(&SockAddr::from(target)) {
            debug!(%addr, %error, "bind failed");
            return Err(map_io_error(BIND, error));
        }
        self.host = addr.ip().to_string();
        self.endpoint = Endpoint::Bound(socket);
        Ok(())
    }

    fn listen(&mut self, backlog: usize) -> Result<()> {
        if !matches!(self.endpoint, Endpoint::Bound(_)) {
            return Err(TransportError::invalid_argument(LISTEN, "socket is not bound"));
        }
        let Endpoint::Bound(socket) = mem::replace(&mut self.endpoint, Endpoint::Closed) else {
            return Err(TransportError::invalid_argument(LISTEN, "socket is not bound"));
        };
        let backlog = i32::try_from(backlog).unwrap_or(i32::MAX);
        if let Err(error) = socket.listen(backlog) {
            debug!(%error, "listen failed");
            return Err(map_io_error(LISTEN, error));
        }
        let listener = TcpListener::from(socket);
        debug!(local = ?listener.local_addr().ok(), backlog, "listening");
        self.endpoint = Endpoint::Listening(listener);
        Ok(())
    }

    fn accept(&mut self) -> Result<Option<Self>> {
        let Endpoint::Listening(listener) = &self.endpoint else {
            return Err(TransportError::invalid_argument(ACCEPT, "socket is not listening"));
        };
        match listener.accept() {
            Ok((stream, peer)) => {
                stream
                    .set_nonblocking(true)
                    .map_err(|error| map_io_error(ACCEPT, error))?;
                if self.no_delay
                    && let Err(error) = stream.set_nodelay(true)
                {
                    debug!(%peer, %error, "cannot disable nagle");
                }
                if let Some(linger) = self.config.linger()
                    && let Err(error) = SockRef::from(&stream).set_linger(Some(linger))
                {
                    debug!(%peer, %error, "cannot apply linger");
                }
                debug!(%peer, "accepted");
                Ok(Some(Self::from_stream(stream, peer, self.config.clone())))
            }
            Err(error) if is_transient(&error) => Ok(None),
            Err(error) => Err(map_io_error(ACCEPT, error)),
        }
    }
}

/// 内核后端的工厂。
#[derive(Clone, Debug, Default)]
pub struct KernelFactory {
    config: TransportConfig,
}

impl KernelFactory {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }
}

impl TransportFactory for KernelFactory {
    type Socket = KernelSocket;

    fn make_socket(&self) -> Result<KernelSocket> {
        Ok(KernelSocket::new(self.config.clone()))
    }
}
