//! 单进程回环 SDK 替身。
//!
//! [`LoopNetwork`] 在内存中连接 [`LoopClient`] 与 [`LoopServer`]：客户端 `send` 的数据在
//! 下一次 [`LoopNetwork::poll`] 时投递给对端并回报确认，建连、关闭与复位同样在 `poll` 中完成，
//! 因此测试可以逐步推进并断言每一步的状态。回调总是在网络状态的借用释放后触发，
//! 回调中可以再次调用客户端接口。

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::rc::Rc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use flint_transport::TransportSocketAddr;

use crate::client::{AsyncClient, AsyncServer, ClientEvent, ClientHandler, EventHandler, codes};

/// 与 lwIP 默认 `TCP_SND_BUF` 一致的发送缓冲大小。
const DEFAULT_SPACE: usize = 5744;
const EPHEMERAL_MIN: u16 = 49152;

enum Target {
    Addr(TransportSocketAddr),
    Host(String, u16),
}

enum Link {
    Idle,
    Dialing(Target),
    Open,
    Closing,
    Closed,
}

struct Endpoint {
    link: Link,
    handler: Option<EventHandler>,
    peer: Option<usize>,
    local: Option<TransportSocketAddr>,
    remote: Option<TransportSocketAddr>,
    /// 已 `add` 尚未 `send` 的字节。
    queued: Vec<u8>,
    /// 已 `send`、等待下一次 `poll` 投递的字节。
    in_flight: Vec<u8>,
    /// 对端动作引发、在下一次 `poll` 投递的事件。
    notices: Vec<ClientEvent>,
    no_delay: bool,
    rx_timeout: Option<Duration>,
    last_rx: Instant,
}

impl Endpoint {
    fn new() -> Self {
        Self {
            link: Link::Idle,
            handler: None,
            peer: None,
            local: None,
            remote: None,
            queued: Vec::new(),
            in_flight: Vec::new(),
            notices: Vec::new(),
            no_delay: false,
            rx_timeout: None,
            last_rx: Instant::now(),
        }
    }

    fn is_alive(&self) -> bool {
        matches!(self.link, Link::Open | Link::Closing)
    }

    fn shut(&mut self) {
        self.link = Link::Closed;
        self.queued.clear();
        self.in_flight.clear();
    }
}

struct Listener {
    handler: Option<ClientHandler<LoopClient>>,
    local: TransportSocketAddr,
}

enum Delivery {
    Client(usize, ClientEvent),
    Accept(u16, usize),
}

struct Net {
    endpoints: Vec<Endpoint>,
    listeners: HashMap<u16, Listener>,
    hosts: HashMap<String, IpAddr>,
    space: usize,
    next_port: u16,
}

impl Net {
    fn ephemeral_port(&mut self) -> u16 {
        let port = self.next_port;
        self.next_port = self.next_port.checked_add(1).unwrap_or(EPHEMERAL_MIN);
        port
    }

    fn resolve(&self, host: &str) -> Option<IpAddr> {
        if host == "localhost" {
            return Some(IpAddr::V4(Ipv4Addr::LOCALHOST));
        }
        self.hosts
            .get(host)
            .copied()
            .or_else(|| host.parse().ok())
    }

    fn live_peer(&self, id: usize) -> Option<usize> {
        let peer = self.endpoints[id].peer?;
        self.endpoints[peer].is_alive().then_some(peer)
    }

    fn step(&mut self) -> Vec<Delivery> {
        let mut out = Vec::new();
        for (id, endpoint) in self.endpoints.iter_mut().enumerate() {
            out.extend(
                endpoint
                    .notices
                    .drain(..)
                    .map(|event| Delivery::Client(id, event)),
            );
        }

        for id in 0..self.endpoints.len() {
            if matches!(self.endpoints[id].link, Link::Dialing(_)) {
                self.dial(id, &mut out);
            }
        }

        let now = Instant::now();
        for id in 0..self.endpoints.len() {
            if !self.endpoints[id].is_alive() || self.endpoints[id].in_flight.is_empty() {
                continue;
            }
            let data = Bytes::from(mem::take(&mut self.endpoints[id].in_flight));
            let len = data.len();
            if let Some(peer) = self.live_peer(id) {
                self.endpoints[peer].last_rx = now;
                out.push(Delivery::Client(peer, ClientEvent::Data(data)));
            }
            out.push(Delivery::Client(id, ClientEvent::Acked(len)));
        }

        for id in 0..self.endpoints.len() {
            let endpoint = &self.endpoints[id];
            if matches!(endpoint.link, Link::Closing) && endpoint.in_flight.is_empty() {
                self.hang_up(id, &mut out);
            }
        }

        for id in 0..self.endpoints.len() {
            let endpoint = &self.endpoints[id];
            let expired = matches!(endpoint.link, Link::Open)
                && endpoint
                    .rx_timeout
                    .is_some_and(|timeout| endpoint.last_rx.elapsed() >= timeout);
            if expired {
                out.push(Delivery::Client(id, ClientEvent::Timeout));
                self.hang_up(id, &mut out);
            }
        }
        out
    }

    /// 关闭本端并让仍存活的对端随之关闭，两端各收到一次 `Disconnected`。
    fn hang_up(&mut self, id: usize, out: &mut Vec<Delivery>) {
        let peer = self.live_peer(id);
        self.endpoints[id].shut();
        out.push(Delivery::Client(id, ClientEvent::Disconnected));
        if let Some(peer) = peer {
            self.endpoints[peer].shut();
            out.push(Delivery::Client(peer, ClientEvent::Disconnected));
        }
    }

    fn dial(&mut self, id: usize, out: &mut Vec<Delivery>) {
        let Link::Dialing(target) = mem::replace(&mut self.endpoints[id].link, Link::Closed)
        else {
            return;
        };
        let addr = match target {
            Target::Addr(addr) => Some(addr),
            Target::Host(host, port) => self
                .resolve(&host)
                .map(|ip| TransportSocketAddr::from(SocketAddr::new(ip, port))),
        };
        let Some(addr) = addr else {
            out.push(Delivery::Client(id, ClientEvent::Error(codes::ERR_DNS)));
            out.push(Delivery::Client(id, ClientEvent::Disconnected));
            return;
        };
        if !self.listeners.contains_key(&addr.port()) {
            out.push(Delivery::Client(id, ClientEvent::Error(codes::ERR_RST)));
            out.push(Delivery::Client(id, ClientEvent::Disconnected));
            return;
        }

        let local = TransportSocketAddr::v4([127, 0, 0, 1], self.ephemeral_port());
        let peer = self.endpoints.len();
        let mut accepted = Endpoint::new();
        accepted.link = Link::Open;
        accepted.peer = Some(id);
        accepted.local = Some(addr);
        accepted.remote = Some(local);
        self.endpoints.push(accepted);

        let endpoint = &mut self.endpoints[id];
        endpoint.link = Link::Open;
        endpoint.peer = Some(peer);
        endpoint.local = Some(local);
        endpoint.remote = Some(addr);
        endpoint.last_rx = Instant::now();

        out.push(Delivery::Accept(addr.port(), peer));
        out.push(Delivery::Client(id, ClientEvent::Connected));
    }
}

/// 内存回环网络；克隆共享同一网络。
#[derive(Clone)]
pub struct LoopNetwork {
    state: Rc<RefCell<Net>>,
}

impl LoopNetwork {
    pub fn new() -> Self {
        Self::with_space(DEFAULT_SPACE)
    }

    /// 每个客户端的 SDK 发送缓冲为 `space` 字节。
    pub fn with_space(space: usize) -> Self {
        Self {
            state: Rc::new(RefCell::new(Net {
                endpoints: Vec::new(),
                listeners: HashMap::new(),
                hosts: HashMap::new(),
                space,
                next_port: EPHEMERAL_MIN,
            })),
        }
    }

    /// 为 `connect_host` 登记一条名字解析记录。
    pub fn add_host(&self, name: &str, addr: [u8; 4]) {
        self.state
            .borrow_mut()
            .hosts
            .insert(name.to_owned(), IpAddr::from(addr));
    }

    pub fn client(&self) -> LoopClient {
        let mut net = self.state.borrow_mut();
        net.endpoints.push(Endpoint::new());
        LoopClient {
            net: self.clone(),
            id: net.endpoints.len() - 1,
        }
    }

    pub fn server(&self) -> LoopServer {
        LoopServer {
            net: self.clone(),
            port: None,
            handler: None,
        }
    }

    /// 正在建连或已建立的客户端数量。
    pub fn live_clients(&self) -> usize {
        self.state
            .borrow()
            .endpoints
            .iter()
            .filter(|endpoint| {
                matches!(
                    endpoint.link,
                    Link::Dialing(_) | Link::Open | Link::Closing
                )
            })
            .count()
    }

    /// 推进一步：投递通知、完成建连、传输数据并回报确认、完成关闭、检查接收超时。
    ///
    /// 返回本步触发的回调数量。
    pub fn poll(&self) -> usize {
        let deliveries = self.state.borrow_mut().step();
        let count = deliveries.len();
        for delivery in deliveries {
            self.deliver(delivery);
        }
        count
    }

    fn deliver(&self, delivery: Delivery) {
        match delivery {
            Delivery::Client(id, event) => {
                let handler = self
                    .state
                    .borrow_mut()
                    .endpoints
                    .get_mut(id)
                    .and_then(|endpoint| endpoint.handler.take());
                let Some(mut handler) = handler else {
                    return;
                };
                handler(event);
                if let Some(endpoint) = self.state.borrow_mut().endpoints.get_mut(id)
                    && endpoint.handler.is_none()
                {
                    endpoint.handler = Some(handler);
                }
            }
            Delivery::Accept(port, id) => {
                let client = LoopClient {
                    net: self.clone(),
                    id,
                };
                let handler = self
                    .state
                    .borrow_mut()
                    .listeners
                    .get_mut(&port)
                    .and_then(|listener| listener.handler.take());
                let Some(mut handler) = handler else {
                    // 无人接收：客户端析构时复位对端。
                    return;
                };
                handler(client);
                if let Some(listener) = self.state.borrow_mut().listeners.get_mut(&port)
                    && listener.handler.is_none()
                {
                    listener.handler = Some(handler);
                }
            }
        }
    }
}

impl Default for LoopNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LoopNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let net = self.state.borrow();
        f.debug_struct("LoopNetwork")
            .field("endpoints", &net.endpoints.len())
            .field("listeners", &net.listeners.len())
            .field("space", &net.space)
            .finish()
    }
}

/// 回环网络上的 SDK 客户端替身。
pub struct LoopClient {
    net: LoopNetwork,
    id: usize,
}

impl LoopClient {
    fn with_endpoint<R>(&self, f: impl FnOnce(&mut Endpoint, usize) -> R) -> R {
        let mut net = self.net.state.borrow_mut();
        let space = net.space;
        f(&mut net.endpoints[self.id], space)
    }

    fn dial(&mut self, target: Target) -> bool {
        self.with_endpoint(|endpoint, _| {
            if !matches!(endpoint.link, Link::Idle) {
                return false;
            }
            endpoint.link = Link::Dialing(target);
            true
        })
    }

    pub fn no_delay(&self) -> bool {
        self.with_endpoint(|endpoint, _| endpoint.no_delay)
    }
}

impl AsyncClient for LoopClient {
    fn connect(&mut self, addr: TransportSocketAddr) -> bool {
        self.dial(Target::Addr(addr))
    }

    fn connect_host(&mut self, host: &str, port: u16) -> bool {
        self.dial(Target::Host(host.to_owned(), port))
    }

    fn space(&self) -> usize {
        self.with_endpoint(|endpoint, space| {
            if !matches!(endpoint.link, Link::Open) {
                return 0;
            }
            space.saturating_sub(endpoint.queued.len() + endpoint.in_flight.len())
        })
    }

    fn add(&mut self, data: &[u8], _more: bool) -> usize {
        self.with_endpoint(|endpoint, space| {
            if !matches!(endpoint.link, Link::Open) {
                return 0;
            }
            let room = space.saturating_sub(endpoint.queued.len() + endpoint.in_flight.len());
            let len = room.min(data.len());
            endpoint.queued.extend_from_slice(&data[..len]);
            len
        })
    }

    fn send(&mut self) -> bool {
        self.with_endpoint(|endpoint, _| {
            if !matches!(endpoint.link, Link::Open) {
                return false;
            }
            let queued = mem::take(&mut endpoint.queued);
            endpoint.in_flight.extend_from_slice(&queued);
            true
        })
    }

    fn close(&mut self, now: bool) {
        self.with_endpoint(|endpoint, _| match endpoint.link {
            Link::Dialing(_) => endpoint.shut(),
            Link::Open => {
                if now {
                    endpoint.queued.clear();
                    endpoint.in_flight.clear();
                } else {
                    let queued = mem::take(&mut endpoint.queued);
                    endpoint.in_flight.extend_from_slice(&queued);
                }
                endpoint.link = Link::Closing;
            }
            Link::Idle | Link::Closing | Link::Closed => {}
        });
    }

    /// 与 lwIP `tcp_abort` 一致：返回前同步向本端回调 `Error(ERR_ABRT)` 与 `Disconnected`，
    /// 对端在下一次 `poll` 收到复位。
    fn abort(&mut self) {
        let handler = {
            let mut net = self.net.state.borrow_mut();
            if !matches!(
                net.endpoints[self.id].link,
                Link::Dialing(_) | Link::Open | Link::Closing
            ) {
                net.endpoints[self.id].link = Link::Closed;
                return;
            }
            let peer = net.live_peer(self.id);
            net.endpoints[self.id].shut();
            if let Some(peer) = peer {
                let peer = &mut net.endpoints[peer];
                peer.shut();
                peer.notices.push(ClientEvent::Error(codes::ERR_RST));
                peer.notices.push(ClientEvent::Disconnected);
            }
            net.endpoints[self.id].handler.take()
        };
        let Some(mut handler) = handler else {
            return;
        };
        handler(ClientEvent::Error(codes::ERR_ABRT));
        handler(ClientEvent::Disconnected);
        if let Some(endpoint) = self.net.state.borrow_mut().endpoints.get_mut(self.id)
            && endpoint.handler.is_none()
        {
            endpoint.handler = Some(handler);
        }
    }

    fn set_no_delay(&mut self, no_delay: bool) {
        self.with_endpoint(|endpoint, _| endpoint.no_delay = no_delay);
    }

    fn set_rx_timeout(&mut self, timeout: Duration) {
        self.with_endpoint(|endpoint, _| {
            endpoint.rx_timeout = (!timeout.is_zero()).then_some(timeout);
            endpoint.last_rx = Instant::now();
        });
    }

    fn connected(&self) -> bool {
        self.with_endpoint(|endpoint, _| matches!(endpoint.link, Link::Open))
    }

    fn remote_addr(&self) -> Option<TransportSocketAddr> {
        self.with_endpoint(|endpoint, _| endpoint.remote)
    }

    fn local_addr(&self) -> Option<TransportSocketAddr> {
        self.with_endpoint(|endpoint, _| endpoint.local)
    }

    fn on_event(&mut self, handler: EventHandler) {
        self.with_endpoint(|endpoint, _| endpoint.handler = Some(handler));
    }
}

impl Drop for LoopClient {
    fn drop(&mut self) {
        self.abort();
        let handler = self.with_endpoint(|endpoint, _| endpoint.handler.take());
        drop(handler);
    }
}

/// 回环网络上的 SDK 服务端替身。
pub struct LoopServer {
    net: LoopNetwork,
    port: Option<u16>,
    handler: Option<ClientHandler<LoopClient>>,
}

impl AsyncServer for LoopServer {
    type Client = LoopClient;

    fn begin(&mut self, addr: TransportSocketAddr, _backlog: usize) -> Result<(), i32> {
        if self.port.is_some() {
            return Err(codes::ERR_ALREADY);
        }
        let mut net = self.net.state.borrow_mut();
        let port = match addr.port() {
            0 => net.ephemeral_port(),
            port => port,
        };
        if net.listeners.contains_key(&port) {
            return Err(codes::ERR_USE);
        }
        net.listeners.insert(
            port,
            Listener {
                handler: self.handler.take(),
                local: addr.with_port(port),
            },
        );
        self.port = Some(port);
        Ok(())
    }

    fn on_client(&mut self, handler: ClientHandler<LoopClient>) {
        let Some(port) = self.port else {
            self.handler = Some(handler);
            return;
        };
        if let Some(listener) = self.net.state.borrow_mut().listeners.get_mut(&port) {
            listener.handler = Some(handler);
        }
    }

    fn end(&mut self) {
        if let Some(port) = self.port.take() {
            let listener = self.net.state.borrow_mut().listeners.remove(&port);
            drop(listener);
        }
    }

    fn local_addr(&self) -> Option<TransportSocketAddr> {
        let port = self.port?;
        self.net
            .state
            .borrow()
            .listeners
            .get(&port)
            .map(|listener| listener.local)
    }
}

impl Drop for LoopServer {
    fn drop(&mut self) {
        self.end();
    }
}
