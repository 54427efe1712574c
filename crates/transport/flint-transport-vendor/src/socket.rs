use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use flint_buffer::ChunkQueue;
use flint_transport::{
    BackpressureQueue, CloseOutcome, Connection, ConnectionState, ErrorKind, OperationKind,
    Result, SendWindow, ShutdownDirection, Socket, TransportConfig, TransportError,
    TransportFactory, TransportSocketAddr, flush_with_budget,
};
use tracing::{debug, trace};

use crate::client::{
    AsyncClient, AsyncServer, ClientEvent, ClientHandler, EventHandler, codes,
};
use crate::error::{
    ACCEPT, BIND, CONNECT, CONNECTION, FLUSH, LISTEN, SHUTDOWN, WRITE, map_client_error,
};

/// SDK 回调转换而来的内部事件，在连接状态未被借用时依序应用。
enum Event<C> {
    Client(ClientEvent),
    Accepted(C),
}

enum Phase {
    Idle,
    Bound(TransportSocketAddr),
    Connecting { since: Instant },
    Open,
    /// 已请求优雅关闭，等待 SDK 回报 `Disconnected`。
    Closing,
    Listening,
    Closed,
}

/// 构造 SDK 对象的工厂函数，由工厂与其产出的全部连接共享。
struct Sdk<C, S> {
    new_client: Box<dyn Fn() -> C>,
    new_server: Box<dyn Fn() -> S>,
}

struct Inner<C, S>
where
    C: AsyncClient + 'static,
    S: AsyncServer<Client = C> + 'static,
{
    /// 客户端对象是否仍可调用的唯一依据：错误、断开或中止后立即置空。
    client: Option<C>,
    server: Option<S>,
    phase: Phase,
    rx: ChunkQueue,
    tx: BackpressureQueue,
    /// 建连时观察到的 `space()`，`flush` 以此判断已发送数据是否全部确认。
    idle_space: usize,
    pending_error: Option<TransportError>,
    accepted: VecDeque<VendorSocket<C, S>>,
    host: String,
    no_delay: bool,
    connect_timeout: Duration,
    rx_timeout: Option<Duration>,
}

struct Shared<C, S>
where
    C: AsyncClient + 'static,
    S: AsyncServer<Client = C> + 'static,
{
    sdk: Rc<Sdk<C, S>>,
    config: TransportConfig,
    events: RefCell<VecDeque<Event<C>>>,
    inner: RefCell<Inner<C, S>>,
}

/// 包装厂商 SDK 客户端对象的连接。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - SDK 客户端已经自带缓冲、名字解析与回调，本类型只做翻译：把 [`ClientEvent`]
///   映射到统一状态机，把写入交给与其他后端相同的 [`BackpressureQueue`]；
/// - SDK 回调只持有连接的弱引用，句柄析构后迟到的回调自然失效。
///
/// ## 逻辑（How）
/// - 回调先入事件队列，再在连接状态未被借用时依序应用，SDK 在接口调用内部同步回调也不会冲突；
/// - `space()` 即发送窗口余量：放得下的部分 `add` + `send`，其余进入预留缓冲，
///   在 `Acked`、`tick`、`flush` 中排空；
/// - 服务端对象在 `listen` 时创建，每个入站客户端对象立即包装为连接，按到达顺序排队。
///
/// ## 契约（What）
/// - SDK 在收到对端 FIN 后自行关闭并回报 `Disconnected`，连接随即进入 `Closed`，
///   已缓冲的数据仍可读出；
/// - SDK 不支持半关闭：`shutdown(Both)` 等价于优雅关闭，单方向返回 `InvalidArgument`；
/// - 监听中的连接状态报告为 `Connecting`。
///
/// ## 注意事项（Trade-offs）
/// - `set_timeout` 作用于建连阶段；SDK 自身的接收空闲时限通过 [`VendorSocket::set_rx_timeout`] 设置。
pub struct VendorSocket<C, S>
where
    C: AsyncClient + 'static,
    S: AsyncServer<Client = C> + 'static,
{
    shared: Rc<Shared<C, S>>,
    host: String,
}

impl<C, S> VendorSocket<C, S>
where
    C: AsyncClient + 'static,
    S: AsyncServer<Client = C> + 'static,
{
    fn new(sdk: Rc<Sdk<C, S>>, config: TransportConfig) -> Self {
        Self::with_phase(sdk, config, Phase::Idle, None, String::new())
    }

    fn with_phase(
        sdk: Rc<Sdk<C, S>>,
        config: TransportConfig,
        phase: Phase,
        client: Option<C>,
        host: String,
    ) -> Self {
        let inner = Inner {
            client,
            server: None,
            phase,
            rx: ChunkQueue::new(),
            tx: BackpressureQueue::new(config.snd_buf()),
            idle_space: 0,
            pending_error: None,
            accepted: VecDeque::new(),
            host: host.clone(),
            no_delay: config.no_delay(),
            connect_timeout: config.connect_timeout(),
            rx_timeout: None,
        };
        Self {
            shared: Rc::new(Shared {
                sdk,
                config,
                events: RefCell::new(VecDeque::new()),
                inner: RefCell::new(inner),
            }),
            host,
        }
    }

    fn accepted(sdk: Rc<Sdk<C, S>>, config: TransportConfig, mut client: C) -> Self {
        let host = client
            .remote_addr()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_default();
        if config.no_delay() {
            client.set_no_delay(true);
        }
        let idle_space = client.space();
        let socket = Self::with_phase(sdk, config, Phase::Open, None, host);
        {
            let mut inner = socket.shared.inner.borrow_mut();
            client.on_event(Self::event_handler(Rc::downgrade(&socket.shared)));
            inner.client = Some(client);
            inner.idle_space = idle_space;
        }
        socket.shared.process_events();
        socket
    }

    /// 监听连接中尚未被取走的入站连接数。
    pub fn pending_accepts(&self) -> usize {
        self.shared.inner.borrow().accepted.len()
    }

    /// 设置 SDK 的接收空闲时限：超时后 SDK 回报 `Timeout`，连接在下一次 `tick()` 返回超时错误。
    pub fn set_rx_timeout(&mut self, timeout: Duration) {
        self.with_inner(|_, inner| {
            inner.rx_timeout = Some(timeout);
            if let Some(client) = inner.client.as_mut() {
                client.set_rx_timeout(timeout);
            }
        });
    }

    fn event_handler(weak: Weak<Shared<C, S>>) -> EventHandler {
        Box::new(move |event| {
            if let Some(shared) = weak.upgrade() {
                shared.dispatch(Event::Client(event));
            }
        })
    }

    fn client_handler(weak: Weak<Shared<C, S>>) -> ClientHandler<C> {
        Box::new(move |mut client: C| match weak.upgrade() {
            Some(shared) => shared.dispatch(Event::Accepted(client)),
            None => {
                trace!("listener gone, aborting inbound client");
                client.abort();
            }
        })
    }

    fn with_inner<R>(&self, f: impl FnOnce(&Shared<C, S>, &mut Inner<C, S>) -> R) -> R {
        let shared = &*self.shared;
        let result = {
            let mut inner = shared.inner.borrow_mut();
            f(shared, &mut inner)
        };
        shared.process_events();
        result
    }
}

impl<C, S> fmt::Debug for VendorSocket<C, S>
where
    C: AsyncClient + 'static,
    S: AsyncServer<Client = C> + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VendorSocket")
            .field("host", &self.host)
            .field("state", &self.state())
            .finish()
    }
}

impl<C, S> Drop for VendorSocket<C, S>
where
    C: AsyncClient + 'static,
    S: AsyncServer<Client = C> + 'static,
{
    fn drop(&mut self) {
        let (client, server) = match self.shared.inner.try_borrow_mut() {
            Ok(mut inner) => (inner.client.take(), inner.server.take()),
            Err(_) => (None, None),
        };
        if let Some(mut client) = client {
            trace!(host = %self.host, "dropping live client");
            client.abort();
        }
        if let Some(mut server) = server {
            server.end();
        }
    }
}

impl<C, S> Shared<C, S>
where
    C: AsyncClient + 'static,
    S: AsyncServer<Client = C> + 'static,
{
    fn dispatch(&self, event: Event<C>) {
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
            inner.apply(self, event);
        }
    }
}

impl<C, S> Inner<C, S>
where
    C: AsyncClient + 'static,
    S: AsyncServer<Client = C> + 'static,
{
    fn state(&self) -> ConnectionState {
        match self.phase {
            Phase::Idle | Phase::Bound(_) => ConnectionState::Initialized,
            Phase::Connecting { .. } | Phase::Listening => ConnectionState::Connecting,
            Phase::Open => ConnectionState::Connected,
            Phase::Closing => ConnectionState::Closing,
            Phase::Closed => ConnectionState::Closed,
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

    fn apply(&mut self, shared: &Shared<C, S>, event: Event<C>) {
        let event = match event {
            Event::Accepted(client) => {
                let socket =
                    VendorSocket::accepted(shared.sdk.clone(), shared.config.clone(), client);
                debug!(peer = %socket.host, "accepted");
                self.accepted.push_back(socket);
                return;
            }
            Event::Client(event) => event,
        };
        // 客户端交还 SDK（abort、出错或关闭完成）后，其迟到的回调不再属于本连接。
        if self.client.is_none() && !matches!(event, ClientEvent::Data(_)) {
            trace!(host = %self.host, ?event, "ignoring event for released client");
            return;
        }
        match event {
            ClientEvent::Connected => {
                if matches!(self.phase, Phase::Connecting { .. }) {
                    debug!(host = %self.host, "connected");
                    self.phase = Phase::Open;
                    if let Some(client) = self.client.as_mut() {
                        self.idle_space = client.space();
                        if self.no_delay {
                            client.set_no_delay(true);
                        }
                        if let Some(timeout) = self.rx_timeout {
                            client.set_rx_timeout(timeout);
                        }
                    }
                }
            }
            ClientEvent::Data(data) => {
                trace!(host = %self.host, len = data.len(), "received");
                self.rx.push(data);
            }
            ClientEvent::Acked(len) => {
                trace!(host = %self.host, len, "acknowledged");
                if matches!(self.phase, Phase::Open)
                    && let Err(error) = self.drain()
                {
                    self.pending_error = Some(error);
                }
            }
            ClientEvent::Error(code) => {
                let operation = if matches!(self.phase, Phase::Connecting { .. }) {
                    CONNECT
                } else {
                    CONNECTION
                };
                debug!(host = %self.host, code, error = codes::describe(code), "client released by sdk after error");
                self.forget(Some(map_client_error(operation, code)));
            }
            ClientEvent::Disconnected => match self.phase {
                Phase::Closing => {
                    debug!(host = %self.host, "close completed");
                    self.forget(None);
                }
                Phase::Connecting { .. } => {
                    debug!(host = %self.host, "disconnected before connect completed");
                    self.forget(Some(TransportError::from_operation(
                        ErrorKind::Io,
                        CONNECT,
                        "disconnected before connect completed",
                    )));
                }
                Phase::Open => {
                    debug!(host = %self.host, "connection closed by peer");
                    self.forget(None);
                }
                _ => {}
            },
            ClientEvent::Timeout => {
                debug!(host = %self.host, "sdk reported timeout");
                if self.client.is_some() && self.pending_error.is_none() {
                    self.pending_error = Some(TransportError::timeout(CONNECTION));
                }
            }
        }
    }

    /// SDK 已放弃客户端对象：不再调用它，只保留已接收的数据。
    fn forget(&mut self, error: Option<TransportError>) {
        self.client = None;
        self.phase = Phase::Closed;
        let dropped = self.tx.clear();
        if dropped > 0 {
            debug!(host = %self.host, dropped, "discarding unsent bytes");
        }
        if error.is_some() {
            self.pending_error = error;
        }
    }

    fn drain(&mut self) -> Result<bool> {
        let Some(client) = self.client.as_mut() else {
            return Ok(self.tx.is_empty());
        };
        self.tx.drain(&mut ClientWindow { client })
    }

    fn abort(&mut self) {
        if let Some(mut client) = self.client.take() {
            client.abort();
        }
        self.tx.clear();
        self.phase = Phase::Closed;
    }

    fn headroom(&self) -> usize {
        match (&self.phase, self.client.as_ref()) {
            (Phase::Open, Some(client)) => client.space(),
            _ => 0,
        }
    }

    fn start_connect(&mut self, start: impl FnOnce(&mut C) -> bool, client: C) -> Result<()> {
        let mut client = client;
        if self.no_delay {
            client.set_no_delay(true);
        }
        self.phase = Phase::Connecting {
            since: Instant::now(),
        };
        let started = start(&mut client);
        if !started {
            debug!(host = %self.host, "sdk refused to start connecting");
            client.abort();
            self.phase = Phase::Closed;
            return Err(TransportError::from_operation(
                ErrorKind::Io,
                CONNECT,
                "client refused to start connecting",
            ));
        }
        self.client = Some(client);
        Ok(())
    }

    fn tick(&mut self) -> Result<()> {
        if let Some(error) = self.pending_error.take() {
            self.abort();
            return Err(error);
        }

        if let Phase::Connecting { since } = self.phase
            && since.elapsed() > self.connect_timeout
        {
            debug!(host = %self.host, "connect timed out");
            self.abort();
            return Err(TransportError::timeout(CONNECT));
        }

        if matches!(self.phase, Phase::Open) {
            self.drain()?;
        }
        Ok(())
    }
}

/// SDK 发送缓冲窗口：`space()` 即可写余量，`add` 接收多少就推送多少。
struct ClientWindow<'a, C> {
    client: &'a mut C,
}

impl<C: AsyncClient> SendWindow for ClientWindow<'_, C> {
    fn headroom(&self) -> usize {
        self.client.space()
    }

    fn transmit(&mut self, data: &[u8], more: bool) -> Result<usize> {
        let accepted = self.client.add(data, more);
        if accepted == 0 {
            trace!(len = data.len(), "client send buffer exhausted");
            return Ok(0);
        }
        if !self.client.send() {
            trace!(len = accepted, "client send deferred");
        }
        Ok(accepted)
    }
}

impl<C, S> Connection for VendorSocket<C, S>
where
    C: AsyncClient + 'static,
    S: AsyncServer<Client = C> + 'static,
{
    fn scheme(&self) -> &'static str {
        "vendor"
    }

    fn connect(&mut self, addr: TransportSocketAddr) -> Result<()> {
        let host = addr.ip().to_string();
        let weak = Rc::downgrade(&self.shared);
        self.with_inner(|shared, inner| {
            inner.ensure_idle(CONNECT)?;
            inner.host = host;
            let mut client = (shared.sdk.new_client)();
            client.on_event(Self::event_handler(weak));
            trace!(host = %inner.host, %addr, "connect");
            inner.start_connect(|client| client.connect(addr), client)
        })?;
        self.host = addr.ip().to_string();
        Ok(())
    }

    fn connect_host(&mut self, host: &str, port: u16) -> Result<()> {
        if let Some(addr) = TransportSocketAddr::parse_ip(host, port) {
            return self.connect(addr);
        }
        let weak = Rc::downgrade(&self.shared);
        self.with_inner(|shared, inner| {
            inner.ensure_idle(CONNECT)?;
            inner.host = host.to_owned();
            let mut client = (shared.sdk.new_client)();
            client.on_event(Self::event_handler(weak));
            debug!(host, port, "connecting through sdk resolver");
            inner.start_connect(|client| client.connect_host(host, port), client)
        })?;
        self.host = host.to_owned();
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.with_inner(|_, inner| inner.rx.read_into(buf)))
    }

    fn available(&self) -> usize {
        self.shared.inner.borrow().rx.len()
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.with_inner(|_, inner| {
            if !matches!(inner.phase, Phase::Open) {
                return Err(TransportError::closed(WRITE));
            }
            let Some(client) = inner.client.as_mut() else {
                return Err(TransportError::closed(WRITE));
            };
            trace!(host = %inner.host, len = data.len(), "write");
            if let Err(error) = inner.tx.write(&mut ClientWindow { client }, data) {
                inner.abort();
                return Err(error);
            }
            Ok(())
        })
    }

    fn available_for_write(&self) -> usize {
        let inner = self.shared.inner.borrow();
        inner.tx.available_for_write(inner.headroom())
    }

    fn reserve_at_least(&mut self, size: usize) -> Result<()> {
        self.with_inner(|_, inner| inner.tx.reserve_at_least(size))
    }

    fn ensure_capacity(&mut self, size: usize) -> Result<()> {
        self.with_inner(|_, inner| {
            let headroom = inner.headroom();
            inner.tx.ensure_capacity(size, headroom)
        })
    }

    fn flush(&mut self) -> Result<bool> {
        if self.shared.inner.borrow().client.is_none() {
            return Ok(false);
        }
        let shared = &*self.shared;
        flush_with_budget(shared.config.flush_budget(), || {
            {
                let mut inner = shared.inner.borrow_mut();
                let Some(client) = inner.client.as_mut() else {
                    return Err(TransportError::closed(FLUSH));
                };
                if !client.send() {
                    trace!("client send deferred during flush");
                }
                inner.drain()?;
            }
            shared.process_events();

            let inner = shared.inner.borrow();
            Ok(inner.tx.is_empty()
                && inner
                    .client
                    .as_ref()
                    .is_some_and(|client| client.space() >= inner.idle_space))
        })
    }

    fn close(&mut self, force: bool) -> Result<CloseOutcome> {
        let outcome = self.with_inner(|_, inner| {
            inner.accepted.clear();
            if let Some(mut server) = inner.server.take() {
                server.end();
                inner.phase = Phase::Closed;
                return CloseOutcome::Graceful;
            }
            match inner.phase {
                Phase::Idle | Phase::Closed => {
                    inner.phase = Phase::Closed;
                    return CloseOutcome::AlreadyClosed;
                }
                Phase::Bound(_) => {
                    inner.phase = Phase::Closed;
                    return CloseOutcome::Graceful;
                }
                _ => {}
            }
            if force {
                inner.abort();
                return CloseOutcome::Aborted;
            }
            match inner.phase {
                Phase::Open => {
                    if let Err(error) = inner.drain() {
                        debug!(host = %inner.host, %error, "final drain failed, connection aborted");
                        inner.abort();
                        return CloseOutcome::Aborted;
                    }
                    let dropped = inner.tx.clear();
                    if dropped > 0 {
                        debug!(host = %inner.host, dropped, "discarding unsent bytes on close");
                    }
                    if let Some(client) = inner.client.as_mut() {
                        client.close(false);
                    }
                    inner.phase = Phase::Closing;
                    CloseOutcome::Graceful
                }
                Phase::Connecting { .. } => {
                    inner.abort();
                    CloseOutcome::Aborted
                }
                _ => CloseOutcome::Graceful,
            }
        });
        debug!(host = %self.host, force, ?outcome, "close");
        Ok(outcome)
    }

    fn shutdown(&mut self, direction: ShutdownDirection) -> Result<()> {
        if direction != ShutdownDirection::Both {
            return Err(TransportError::invalid_argument(
                SHUTDOWN,
                "half-close is not supported by the vendor client",
            ));
        }
        if self.shared.inner.borrow().client.is_none() {
            return Err(TransportError::closed(SHUTDOWN));
        }
        self.close(false).map(|_| ())
    }

    fn state(&self) -> ConnectionState {
        self.shared.inner.borrow().state()
    }

    fn set_no_delay(&mut self, no_delay: bool) {
        self.with_inner(|_, inner| {
            inner.no_delay = no_delay;
            if let Some(client) = inner.client.as_mut() {
                client.set_no_delay(no_delay);
            }
        });
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.with_inner(|_, inner| inner.connect_timeout = timeout);
    }

    fn tick(&mut self) -> Result<()> {
        self.with_inner(|_, inner| inner.tick())
    }

    fn peer_addr(&self) -> Option<TransportSocketAddr> {
        self.shared.inner.borrow().client.as_ref()?.remote_addr()
    }

    fn local_addr(&self) -> Option<TransportSocketAddr> {
        let inner = self.shared.inner.borrow();
        match (&inner.client, &inner.server) {
            (Some(client), _) => client.local_addr(),
            (None, Some(server)) => server.local_addr(),
            (None, None) => None,
        }
    }

    fn host(&self) -> &str {
        &self.host
    }
}

impl<C, S> Socket for VendorSocket<C, S>
where
    C: AsyncClient + 'static,
    S: AsyncServer<Client = C> + 'static,
{
    fn bind(&mut self, addr: TransportSocketAddr) -> Result<()> {
        self.with_inner(|_, inner| -> Result<()> {
            inner.ensure_idle(BIND)?;
            inner.host = addr.ip().to_string();
            inner.phase = Phase::Bound(addr);
            Ok(())
        })?;
        self.host = addr.ip().to_string();
        Ok(())
    }

    fn listen(&mut self, backlog: usize) -> Result<()> {
        let weak = Rc::downgrade(&self.shared);
        self.with_inner(|shared, inner| {
            let Phase::Bound(addr) = inner.phase else {
                return Err(TransportError::invalid_argument(LISTEN, "socket is not bound"));
            };
            let mut server = (shared.sdk.new_server)();
            server.on_client(Self::client_handler(weak));
            if let Err(code) = server.begin(addr, backlog) {
                debug!(%addr, code, error = codes::describe(code), "server begin failed");
                inner.phase = Phase::Closed;
                return Err(map_client_error(LISTEN, code));
            }
            debug!(%addr, backlog, "listening");
            inner.server = Some(server);
            inner.phase = Phase::Listening;
            Ok(())
        })
    }

    fn accept(&mut self) -> Result<Option<Self>> {
        self.with_inner(|_, inner| {
            if !matches!(inner.phase, Phase::Listening) {
                return Err(TransportError::invalid_argument(ACCEPT, "socket is not listening"));
            }
            Ok(inner.accepted.pop_front())
        })
    }
}

/// 厂商 SDK 后端的工厂：持有构造客户端与服务端对象的函数。
pub struct VendorFactory<C, S> {
    sdk: Rc<Sdk<C, S>>,
    config: TransportConfig,
}

impl<C, S> VendorFactory<C, S>
where
    C: AsyncClient + 'static,
    S: AsyncServer<Client = C> + 'static,
{
    pub fn new(
        new_client: impl Fn() -> C + 'static,
        new_server: impl Fn() -> S + 'static,
        config: TransportConfig,
    ) -> Self {
        Self {
            sdk: Rc::new(Sdk {
                new_client: Box::new(new_client),
                new_server: Box::new(new_server),
            }),
            config,
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }
}

impl<C, S> Clone for VendorFactory<C, S> {
    fn clone(&self) -> Self {
        Self {
            sdk: self.sdk.clone(),
            config: self.config.clone(),
        }
    }
}

impl<C, S> fmt::Debug for VendorFactory<C, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VendorFactory")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<C, S> TransportFactory for VendorFactory<C, S>
where
    C: AsyncClient + 'static,
    S: AsyncServer<Client = C> + 'static,
{
    type Socket = VendorSocket<C, S>;

    fn make_socket(&self) -> Result<VendorSocket<C, S>> {
        Ok(VendorSocket::new(self.sdk.clone(), self.config.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{LoopClient, LoopNetwork, LoopServer};
    use tracing_test::traced_test;

    type LoopSocket = VendorSocket<LoopClient, LoopServer>;

    fn factory(net: &LoopNetwork) -> VendorFactory<LoopClient, LoopServer> {
        let clients = net.clone();
        let servers = net.clone();
        VendorFactory::new(
            move || clients.client(),
            move || servers.server(),
            TransportConfig::default(),
        )
    }

    fn connected_pair(net: &LoopNetwork) -> (LoopSocket, LoopSocket, LoopSocket) {
        let factory = factory(net);
        let mut server = factory
            .make_server(TransportSocketAddr::any_v4(7000), 4)
            .expect("server");
        let mut client = factory.make_socket().expect("client");
        client
            .connect(TransportSocketAddr::v4([127, 0, 0, 1], 7000))
            .expect("connect");
        net.poll();
        let accepted = server.accept().expect("accept").expect("pending connection");
        (server, client, accepted)
    }

    #[test]
    #[traced_test]
    fn peer_reset_surfaces_once_with_sdk_code() {
        let net = LoopNetwork::new();
        let (_server, mut client, mut accepted) = connected_pair(&net);

        assert_eq!(client.close(true).expect("close"), CloseOutcome::Aborted);
        net.poll();
        assert_eq!(accepted.state(), ConnectionState::Closed);
        let err = accepted.tick().expect_err("reset surfaces once");
        assert_eq!(err.os_code(), Some(codes::ERR_RST));
        accepted.tick().expect("already surfaced");
        assert!(logs_contain("client released by sdk after error"));
    }

    #[test]
    #[traced_test]
    fn callbacks_from_a_local_abort_are_not_reported() {
        let net = LoopNetwork::new();
        let (_server, mut client, _accepted) = connected_pair(&net);

        assert_eq!(client.close(true).expect("close"), CloseOutcome::Aborted);
        assert!(logs_contain("ignoring event for released client"));
        client.tick().expect("requested abort");
        assert_eq!(client.state(), ConnectionState::Closed);
    }

    #[test]
    fn dropping_a_socket_aborts_its_client() {
        let net = LoopNetwork::new();
        let (_server, client, mut accepted) = connected_pair(&net);
        assert_eq!(net.live_clients(), 2);
        drop(client);
        assert_eq!(net.live_clients(), 0, "abort resets both ends");

        net.poll();
        assert_eq!(accepted.state(), ConnectionState::Closed);
        assert!(accepted.tick().is_err());
    }

    #[test]
    fn second_connect_is_rejected() {
        let net = LoopNetwork::new();
        let mut socket = factory(&net).make_socket().expect("socket");
        socket
            .connect(TransportSocketAddr::v4([127, 0, 0, 1], 7001))
            .expect("first connect");
        assert_eq!(
            socket
                .connect(TransportSocketAddr::v4([127, 0, 0, 1], 7001))
                .expect_err("already connecting")
                .kind(),
            ErrorKind::InvalidArgument
        );
    }

    #[test]
    fn half_close_is_rejected() {
        let net = LoopNetwork::new();
        let (_server, mut client, _accepted) = connected_pair(&net);
        assert_eq!(
            client
                .shutdown(ShutdownDirection::Write)
                .expect_err("half close")
                .kind(),
            ErrorKind::InvalidArgument
        );
        client.shutdown(ShutdownDirection::Both).expect("full shutdown");
        assert_eq!(client.state(), ConnectionState::Closing);
    }
}
