use std::cell::RefCell;
use std::collections::VecDeque;
use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::BuildHasher;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use flint_buffer::ChunkQueue;
use flint_dns::{AddrHints, AddressFamily, DnsFuture, NativeResolver, Resolver};
use flint_transport::{
    BackpressureQueue, CloseOutcome, Connection, ConnectionState, OperationKind, Result,
    SendWindow, ShutdownDirection, Socket, TransportConfig, TransportError, TransportFactory,
    TransportSocketAddr, flush_with_budget,
};
use tracing::{debug, trace, warn};

use crate::error::{
    ACCEPT, BIND, CONNECT, CONNECTION, FLUSH, LISTEN, NEW, SHUTDOWN, WRITE, map_stack_error,
};
use crate::stack::{HandlerRef, Pcb, PcbState, RawTcpHandler, RawTcpStack, StackError};

const LOCAL_PORT_MIN: u16 = 32768;
const LOCAL_PORT_MAX: u16 = 61000;

/// 栈回调转换而来的内部事件，在连接状态未被借用时依序应用。
enum Event {
    Connected,
    Recv(Option<Bytes>),
    Sent(usize),
    Failed(StackError),
    Accepted(Pcb),
}

enum Phase {
    Idle,
    Bound,
    Resolving(DnsFuture),
    Connecting { since: Instant },
    Open,
    Listening,
    Closed,
}

struct Inner<S: RawTcpStack + 'static> {
    /// PCB 是否仍有效的唯一依据：错误回调、中止或关闭后立即置空，此后不再调用栈接口。
    pcb: Option<Pcb>,
    phase: Phase,
    rx: ChunkQueue,
    rx_closed: bool,
    tx: BackpressureQueue,
    pending_error: Option<TransportError>,
    accepted: VecDeque<RawSocket<S>>,
    host: String,
    no_delay: bool,
    connect_timeout: Duration,
}

struct Shared<S: RawTcpStack + 'static> {
    stack: S,
    config: TransportConfig,
    events: RefCell<VecDeque<Event>>,
    inner: RefCell<Inner<S>>,
}

/// 基于原始回调 API 的连接。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 原始回调栈没有描述符，也没有阻塞接口；连接状态完全由回调驱动，
///   本类型把回调翻译为统一的 [`Connection`]/[`Socket`] 契约；
/// - 栈只持有回调目标的弱引用：句柄析构后，迟到的回调被栈自然丢弃。
///
/// ## 逻辑（How）
/// - 回调先进入事件队列，再在连接状态未被借用时依序应用，因此栈即便在接口调用中
///   同步投递事件，也不会与正在进行的操作冲突；
/// - 接收数据以 `Bytes` 分片挂入 [`ChunkQueue`]，`read` 拷出后调用 `recved` 归还窗口；
/// - 写入经由 [`BackpressureQueue`]：`sndbuf` 放得下的部分直接 `write`，其余进入预留缓冲，
///   在 `on_sent`、`tick`、`flush` 中排空；
/// - 错误回调触发时 PCB 已被栈释放，连接立即放弃句柄，把错误挂起到下一次 `tick()` 交付。
///
/// ## 契约（What）
/// - 对端 FIN 后状态为 `Closing`，已缓冲数据仍可读；下一次 `tick()` 在预留缓冲排空后
///   关闭 PCB 并进入 `Closed`；
/// - `close(false)` 被栈以内存不足拒绝时退化为 `abort`，返回 [`CloseOutcome::Aborted`] 并记录告警；
/// - 监听中的连接状态报告为 `Connecting`（与 PCB 的 LISTEN 节点对应）。
///
/// ## 注意事项（Trade-offs）
/// - 主动连接的本地端口在 32768..61000 内随机选取，避免设备重启后复用旧连接的四元组；
/// - `set_timeout` 作用于建连阶段：超时后中止并在 `tick()` 返回 `Timeout`。
pub struct RawSocket<S: RawTcpStack + 'static> {
    shared: Rc<Shared<S>>,
    host: String,
}

impl<S: RawTcpStack + 'static> RawSocket<S> {
    pub fn new(stack: S, config: TransportConfig) -> Self {
        Self::with_phase(stack, config, Phase::Idle, None, String::new())
    }

    fn with_phase(
        stack: S,
        config: TransportConfig,
        phase: Phase,
        pcb: Option<Pcb>,
        host: String,
    ) -> Self {
        let inner = Inner {
            pcb,
            phase,
            rx: ChunkQueue::new(),
            rx_closed: false,
            tx: BackpressureQueue::new(stack.snd_buf_capacity()),
            pending_error: None,
            accepted: VecDeque::new(),
            host: host.clone(),
            no_delay: config.no_delay(),
            connect_timeout: config.connect_timeout(),
        };
        Self {
            shared: Rc::new(Shared {
                stack,
                config,
                events: RefCell::new(VecDeque::new()),
                inner: RefCell::new(inner),
            }),
            host,
        }
    }

    fn accepted(stack: S, config: TransportConfig, pcb: Pcb) -> Self {
        let host = stack
            .remote_endpoint(pcb)
            .map(|addr| addr.ip().to_string())
            .unwrap_or_default();
        let no_delay = config.no_delay();
        let socket = Self::with_phase(stack, config, Phase::Open, Some(pcb), host);
        let stack = &socket.shared.stack;
        stack.register(pcb, Some(Self::handler(&socket.shared)));
        if no_delay {
            stack.set_nagle(pcb, false);
        }
        socket
    }

    /// 当前持有的 PCB；连接关闭或出错后为 `None`。
    pub fn pcb(&self) -> Option<Pcb> {
        self.shared.inner.borrow().pcb
    }

    /// 监听连接中尚未被取走的入站连接数。
    pub fn pending_accepts(&self) -> usize {
        self.shared.inner.borrow().accepted.len()
    }

    fn handler(shared: &Rc<Shared<S>>) -> HandlerRef {
        let weak: Weak<Shared<S>> = Rc::downgrade(shared);
        weak
    }

    fn with_inner<R>(&self, f: impl FnOnce(&S, &TransportConfig, &mut Inner<S>) -> R) -> R {
        let shared = &*self.shared;
        let result = {
            let mut inner = shared.inner.borrow_mut();
            f(&shared.stack, &shared.config, &mut inner)
        };
        shared.process_events();
        result
    }
}

impl<S: RawTcpStack + 'static> fmt::Debug for RawSocket<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawSocket")
            .field("host", &self.host)
            .field("pcb", &self.pcb())
            .field("state", &self.state())
            .finish()
    }
}

impl<S: RawTcpStack + 'static> Drop for RawSocket<S> {
    fn drop(&mut self) {
        let pcb = match self.shared.inner.try_borrow_mut() {
            Ok(mut inner) => inner.pcb.take(),
            Err(_) => None,
        };
        if let Some(pcb) = pcb {
            trace!(host = %self.host, %pcb, "dropping live pcb");
            self.shared.stack.register(pcb, None);
            self.shared.stack.abort(pcb);
        }
    }
}

impl<S: RawTcpStack + 'static> Shared<S> {
    fn dispatch(&self, event: Event) {
        self.events.borrow_mut().push_back(event);
        self.process_events();
    }

    /// 应用排队事件；若连接状态正被借用，则留给持有者在释放后处理。
    fn process_events(&self) {
        let Ok(mut inner) = self.inner.try_borrow_mut() else {
            return;
        };
        loop {
            let next = self.events.borrow_mut().pop_front();
            let Some(event) = next else {
                break;
            };
            inner.apply(&self.stack, &self.config, event);
        }
    }
}

impl<S: RawTcpStack + 'static> RawTcpHandler for Shared<S> {
    fn on_connected(&self, _pcb: Pcb) {
        self.dispatch(Event::Connected);
    }

    fn on_recv(&self, _pcb: Pcb, data: Option<Bytes>) {
        self.dispatch(Event::Recv(data));
    }

    fn on_sent(&self, _pcb: Pcb, len: usize) {
        self.dispatch(Event::Sent(len));
    }

    fn on_error(&self, _pcb: Pcb, error: StackError) {
        self.dispatch(Event::Failed(error));
    }

    fn on_accept(&self, _listener: Pcb, pcb: Pcb) {
        self.dispatch(Event::Accepted(pcb));
    }
}

impl<S: RawTcpStack + 'static> Inner<S> {
    fn state(&self, stack: &S) -> ConnectionState {
        match self.phase {
            Phase::Idle | Phase::Bound => return ConnectionState::Initialized,
            Phase::Resolving(_) => return ConnectionState::Connecting,
            Phase::Closed => return ConnectionState::Closed,
            Phase::Connecting { .. } | Phase::Open | Phase::Listening => {}
        }
        let Some(pcb) = self.pcb else {
            return ConnectionState::Closed;
        };
        if matches!(self.phase, Phase::Connecting { .. }) {
            return ConnectionState::Connecting;
        }
        map_pcb_state(stack.pcb_state(pcb))
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

    fn apply(&mut self, stack: &S, config: &TransportConfig, event: Event) {
        match event {
            Event::Connected => {
                if matches!(self.phase, Phase::Connecting { .. }) {
                    debug!(host = %self.host, "connected");
                    self.phase = Phase::Open;
                }
            }
            Event::Recv(Some(data)) => {
                trace!(host = %self.host, len = data.len(), "received");
                self.rx.push(data);
            }
            Event::Recv(None) => {
                debug!(host = %self.host, "connection closed by peer");
                self.rx_closed = true;
            }
            Event::Sent(len) => {
                trace!(host = %self.host, len, "acknowledged");
                if self.state(stack) == ConnectionState::Connected
                    && let Err(error) = self.drain(stack)
                {
                    self.pending_error = Some(error);
                }
            }
            Event::Failed(error) => {
                debug!(host = %self.host, %error, "pcb released by stack after error");
                self.pcb = None;
                self.tx.clear();
                self.pending_error = Some(map_stack_error(CONNECTION, error));
            }
            Event::Accepted(pcb) => {
                if let Some(listener) = self.pcb {
                    stack.accepted(listener);
                }
                let socket = RawSocket::accepted(stack.clone(), config.clone(), pcb);
                debug!(peer = %socket.host, %pcb, "accepted");
                self.accepted.push_back(socket);
            }
        }
    }

    fn start_connect(
        &mut self,
        stack: &S,
        handler: HandlerRef,
        addr: TransportSocketAddr,
    ) -> Result<()> {
        let pcb = stack.tcp_new().map_err(|error| map_stack_error(NEW, error))?;
        stack.register(pcb, Some(handler));
        let local_port = ephemeral_port();
        trace!(host = %self.host, %addr, local_port, %pcb, "connect");

        if let Err(error) = stack.connect(pcb, addr, local_port) {
            debug!(host = %self.host, %error, "tcp connect failed");
            stack.register(pcb, None);
            stack.abort(pcb);
            self.phase = Phase::Closed;
            return Err(map_stack_error(CONNECT, error));
        }
        if self.no_delay {
            stack.set_nagle(pcb, false);
        }
        self.pcb = Some(pcb);
        self.phase = Phase::Connecting {
            since: Instant::now(),
        };
        Ok(())
    }

    fn poll_resolution(&mut self, stack: &S, handler: HandlerRef) -> Result<()> {
        let Phase::Resolving(future) = &self.phase else {
            return Ok(());
        };
        if !future.completed() {
            return Ok(());
        }
        match future.fetch_result() {
            Ok(info) => {
                debug!(host = %self.host, addr = %info.addr, "dns lookup successful");
                self.start_connect(stack, handler, info.addr)
            }
            Err(error) => {
                debug!(host = %self.host, %error, "dns lookup failed, can't connect");
                self.phase = Phase::Closed;
                Err(error)
            }
        }
    }

    fn drain(&mut self, stack: &S) -> Result<bool> {
        let Some(pcb) = self.pcb else {
            return Ok(self.tx.is_empty());
        };
        let mut window = PcbWindow { stack, pcb };
        match self.tx.drain(&mut window) {
            Ok(drained) => Ok(drained),
            Err(error) => {
                self.abort(stack);
                Err(error)
            }
        }
    }

    fn abort(&mut self, stack: &S) {
        if let Some(pcb) = self.pcb.take() {
            stack.register(pcb, None);
            stack.abort(pcb);
        }
        self.tx.clear();
        self.phase = Phase::Closed;
    }

    /// 优雅关闭 PCB；栈拒绝时退化为中止。
    fn release(&mut self, stack: &S) -> CloseOutcome {
        self.phase = Phase::Closed;
        let Some(pcb) = self.pcb.take() else {
            return CloseOutcome::AlreadyClosed;
        };
        stack.register(pcb, None);
        let dropped = self.tx.clear();
        if dropped > 0 {
            debug!(host = %self.host, dropped, "discarding unsent bytes on close");
        }
        match stack.close(pcb) {
            Ok(()) => CloseOutcome::Graceful,
            Err(error) => {
                warn!(host = %self.host, %pcb, %error, fallback = "abort", "graceful close refused by stack");
                stack.abort(pcb);
                CloseOutcome::Aborted
            }
        }
    }

    fn tick(&mut self, stack: &S, handler: HandlerRef) -> Result<()> {
        if let Some(error) = self.pending_error.take() {
            self.abort(stack);
            return Err(error);
        }
        self.poll_resolution(stack, handler)?;

        if let Phase::Connecting { since } = self.phase
            && since.elapsed() > self.connect_timeout
        {
            debug!(host = %self.host, "connect timed out");
            self.abort(stack);
            return Err(TransportError::timeout(CONNECT));
        }

        if self.rx_closed && self.pcb.is_some() {
            if self.drain(stack)? {
                debug!(host = %self.host, "peer finished, releasing pcb");
                self.release(stack);
            }
            return Ok(());
        }

        if self.state(stack) == ConnectionState::Connected {
            self.drain(stack)?;
        }
        Ok(())
    }
}

/// PCB 发送窗口：`sndbuf` 即可写余量，写入失败（内存不足）视为窗口已满。
struct PcbWindow<'a, S> {
    stack: &'a S,
    pcb: Pcb,
}

impl<S: RawTcpStack> SendWindow for PcbWindow<'_, S> {
    fn headroom(&self) -> usize {
        self.stack.sndbuf(self.pcb)
    }

    fn transmit(&mut self, data: &[u8], more: bool) -> Result<usize> {
        match self.stack.write(self.pcb, data, more) {
            Ok(()) => {
                if let Err(error) = self.stack.output(self.pcb) {
                    debug!(pcb = %self.pcb, %error, "tcp output failed");
                }
                Ok(data.len())
            }
            Err(StackError::Mem | StackError::Buf) => {
                debug!(pcb = %self.pcb, len = data.len(), "tcp write deferred, send buffer exhausted");
                Ok(0)
            }
            Err(error) => Err(map_stack_error(WRITE, error)),
        }
    }
}

fn map_pcb_state(state: PcbState) -> ConnectionState {
    match state {
        PcbState::Closed => ConnectionState::Closed,
        PcbState::Listen | PcbState::SynSent | PcbState::SynRcvd => ConnectionState::Connecting,
        PcbState::Established => ConnectionState::Connected,
        PcbState::FinWait1
        | PcbState::FinWait2
        | PcbState::CloseWait
        | PcbState::Closing
        | PcbState::LastAck
        | PcbState::TimeWait => ConnectionState::Closing,
    }
}

/// 在 `[32768, 61000)` 内随机选取本地端口。
fn ephemeral_port() -> u16 {
    static SEQUENCE: AtomicU64 = AtomicU64::new(0);
    let seed = RandomState::new().hash_one(SEQUENCE.fetch_add(1, Ordering::Relaxed));
    let span = u64::from(LOCAL_PORT_MAX - LOCAL_PORT_MIN);
    LOCAL_PORT_MIN + (seed % span) as u16
}

impl<S: RawTcpStack + 'static> Connection for RawSocket<S> {
    fn scheme(&self) -> &'static str {
        "lwip"
    }

    fn connect(&mut self, addr: TransportSocketAddr) -> Result<()> {
        let handler = Self::handler(&self.shared);
        let host = addr.ip().to_string();
        self.with_inner(|stack, _, inner| {
            inner.ensure_idle(CONNECT)?;
            inner.host = host;
            inner.start_connect(stack, handler, addr)
        })?;
        self.host = addr.ip().to_string();
        Ok(())
    }

    fn connect_host(&mut self, host: &str, port: u16) -> Result<()> {
        if let Some(addr) = TransportSocketAddr::parse_ip(host, port) {
            return self.connect(addr);
        }
        let handler = Self::handler(&self.shared);
        self.with_inner(|stack, _, inner| {
            inner.ensure_idle(CONNECT)?;
            inner.host = host.to_owned();
            let hints = AddrHints {
                family: AddressFamily::Inet,
                ..AddrHints::tcp()
            };
            let future = NativeResolver::new(stack.clone()).resolve(host, port, &hints)?;
            debug!(host, port, "resolving");
            inner.phase = Phase::Resolving(future);
            inner.poll_resolution(stack, handler)
        })?;
        self.host = host.to_owned();
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.with_inner(|stack, _, inner| {
            let n = inner.rx.read_into(buf);
            if n > 0
                && let Some(pcb) = inner.pcb
            {
                stack.recved(pcb, n);
            }
            n
        }))
    }

    fn available(&self) -> usize {
        self.shared.inner.borrow().rx.len()
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.with_inner(|stack, _, inner| {
            if inner.state(stack) != ConnectionState::Connected {
                return Err(TransportError::closed(WRITE));
            }
            let Some(pcb) = inner.pcb else {
                return Err(TransportError::closed(WRITE));
            };
            trace!(host = %inner.host, len = data.len(), "write");
            let mut window = PcbWindow { stack, pcb };
            if let Err(error) = inner.tx.write(&mut window, data) {
                inner.abort(stack);
                return Err(error);
            }
            Ok(())
        })
    }

    fn available_for_write(&self) -> usize {
        let inner = self.shared.inner.borrow();
        let headroom = inner
            .pcb
            .map_or(0, |pcb| self.shared.stack.sndbuf(pcb));
        inner.tx.available_for_write(headroom)
    }

    fn reserve_at_least(&mut self, size: usize) -> Result<()> {
        self.with_inner(|_, _, inner| inner.tx.reserve_at_least(size))
    }

    fn ensure_capacity(&mut self, size: usize) -> Result<()> {
        self.with_inner(|stack, _, inner| {
            let headroom = inner.pcb.map_or(0, |pcb| stack.sndbuf(pcb));
            inner.tx.ensure_capacity(size, headroom)
        })
    }

    fn flush(&mut self) -> Result<bool> {
        if self.shared.inner.borrow().pcb.is_none() {
            return Ok(false);
        }
        let shared = &*self.shared;
        flush_with_budget(shared.config.flush_budget(), || {
            let pcb = {
                let mut inner = shared.inner.borrow_mut();
                let Some(pcb) = inner.pcb else {
                    return Err(TransportError::closed(FLUSH));
                };
                if let Err(error) = shared.stack.output(pcb) {
                    trace!(%pcb, %error, "tcp output failed during flush");
                }
                inner.drain(&shared.stack)?;
                pcb
            };
            shared.stack.service();
            shared.process_events();

            let inner = shared.inner.borrow();
            Ok(inner.pcb == Some(pcb)
                && inner.tx.is_empty()
                && shared.stack.sndbuf(pcb) == shared.stack.snd_buf_capacity())
        })
    }

    fn close(&mut self, force: bool) -> Result<CloseOutcome> {
        let outcome = self.with_inner(|stack, _, inner| {
            inner.accepted.clear();
            if matches!(inner.phase, Phase::Resolving(_)) {
                debug!(host = %inner.host, "abandoning name lookup");
                inner.phase = Phase::Closed;
                return CloseOutcome::Aborted;
            }
            if inner.pcb.is_none() {
                inner.phase = Phase::Closed;
                return CloseOutcome::AlreadyClosed;
            }
            if force || matches!(inner.phase, Phase::Connecting { .. }) {
                inner.abort(stack);
                return CloseOutcome::Aborted;
            }
            if matches!(inner.phase, Phase::Open)
                && let Err(error) = inner.drain(stack)
            {
                debug!(host = %inner.host, %error, "final drain failed, connection aborted");
                return CloseOutcome::Aborted;
            }
            inner.release(stack)
        });
        debug!(host = %self.host, force, ?outcome, "close");
        Ok(outcome)
    }

    fn shutdown(&mut self, direction: ShutdownDirection) -> Result<()> {
        self.with_inner(|stack, _, inner| {
            let Some(pcb) = inner.pcb else {
                return Err(TransportError::closed(SHUTDOWN));
            };
            stack
                .shutdown(pcb, direction.includes_read(), direction.includes_write())
                .map_err(|error| map_stack_error(SHUTDOWN, error))
        })
    }

    fn state(&self) -> ConnectionState {
        self.shared.inner.borrow().state(&self.shared.stack)
    }

    fn set_no_delay(&mut self, no_delay: bool) {
        self.with_inner(|stack, _, inner| {
            inner.no_delay = no_delay;
            if let Some(pcb) = inner.pcb {
                stack.set_nagle(pcb, !no_delay);
            }
        });
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.with_inner(|_, _, inner| inner.connect_timeout = timeout);
    }

    fn tick(&mut self) -> Result<()> {
        let handler = Self::handler(&self.shared);
        self.with_inner(|stack, _, inner| inner.tick(stack, handler))
    }

    fn peer_addr(&self) -> Option<TransportSocketAddr> {
        let pcb = self.pcb()?;
        self.shared.stack.remote_endpoint(pcb)
    }

    fn local_addr(&self) -> Option<TransportSocketAddr> {
        let pcb = self.pcb()?;
        self.shared.stack.local_endpoint(pcb)
    }

    fn host(&self) -> &str {
        &self.host
    }
}

impl<S: RawTcpStack + 'static> Socket for RawSocket<S> {
    fn bind(&mut self, addr: TransportSocketAddr) -> Result<()> {
        let host = addr.ip().to_string();
        self.with_inner(|stack, _, inner| {
            inner.ensure_idle(BIND)?;
            let pcb = stack.tcp_new().map_err(|error| map_stack_error(NEW, error))?;
            if let Err(error) = stack.bind(pcb, addr) {
                debug!(%addr, %error, "server tcp_bind failed");
                if stack.close(pcb).is_err() {
                    stack.abort(pcb);
                }
                return Err(map_stack_error(BIND, error));
            }
            inner.host = host;
            inner.pcb = Some(pcb);
            inner.phase = Phase::Bound;
            Ok(())
        })?;
        self.host = addr.ip().to_string();
        Ok(())
    }

    fn listen(&mut self, backlog: usize) -> Result<()> {
        let handler = Self::handler(&self.shared);
        self.with_inner(|stack, _, inner| {
            let (Phase::Bound, Some(pcb)) = (&inner.phase, inner.pcb) else {
                return Err(TransportError::invalid_argument(LISTEN, "socket is not bound"));
            };
            let backlog = u8::try_from(backlog).unwrap_or(u8::MAX);
            match stack.listen(pcb, backlog) {
                Ok(listener) => {
                    stack.register(listener, Some(handler));
                    inner.pcb = Some(listener);
                    inner.phase = Phase::Listening;
                    debug!(%listener, backlog, "listening");
                    Ok(())
                }
                Err(error) => {
                    debug!(%pcb, %error, "server tcp_listen failed");
                    inner.pcb = None;
                    inner.phase = Phase::Closed;
                    if stack.close(pcb).is_err() {
                        stack.abort(pcb);
                    }
                    Err(map_stack_error(LISTEN, error))
                }
            }
        })
    }

    fn accept(&mut self) -> Result<Option<Self>> {
        self.with_inner(|_, _, inner| {
            if !matches!(inner.phase, Phase::Listening) {
                return Err(TransportError::invalid_argument(ACCEPT, "socket is not listening"));
            }
            Ok(inner.accepted.pop_front())
        })
    }
}

/// 原始回调后端的工厂。
#[derive(Clone, Debug)]
pub struct RawFactory<S> {
    stack: S,
    config: TransportConfig,
}

impl<S: RawTcpStack + 'static> RawFactory<S> {
    pub fn new(stack: S, config: TransportConfig) -> Self {
        Self { stack, config }
    }

    pub fn stack(&self) -> &S {
        &self.stack
    }
}

impl<S: RawTcpStack + 'static> TransportFactory for RawFactory<S> {
    type Socket = RawSocket<S>;

    fn make_socket(&self) -> Result<RawSocket<S>> {
        Ok(RawSocket::new(self.stack.clone(), self.config.clone()))
    }
}
