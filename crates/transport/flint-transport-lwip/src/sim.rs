//! 单主机内存模拟栈。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 原始回调后端的全部行为（握手、分段、窗口、FIN、复位、异步解析）都需要在没有真实设备的
//!   环境中验证；本模块以 [`RawTcpStack`] 的原生形状实现一个确定性的模拟栈；
//! - 所有地址都路由到本机：连接按目标端口匹配监听 PCB。
//!
//! ## 逻辑（How）
//! - 接口调用只修改状态并把回调排入队列，**从不同步回调**，与真实栈“回调只在事件上下文投递”的契约一致；
//! - [`SimStack::poll`] 推进一轮：完成握手、按 `segment` 与接收窗口搬运数据、投递 FIN，
//!   然后在释放内部借用后逐个投递回调，直到没有新事件；
//! - 对已失效 PCB 的调用不会崩溃，而是计入 [`SimStack::stale_calls`]，测试据此断言句柄失效契约。
//!
//! ## 注意事项（Trade-offs）
//! - 数据一经搬运即视为被确认，`sndbuf` 立即回升；重传与拥塞控制不在模拟范围内。

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::net::IpAddr;
use std::rc::Rc;

use bytes::{Bytes, BytesMut};
use flint_dns::{HostLookup, NativeAnswer};
use flint_transport::TransportSocketAddr;
use flint_transport::config::DEFAULT_SND_BUF;
use tracing::trace;

use crate::stack::{HandlerRef, Pcb, PcbState, RawTcpStack, StackError};

const EPHEMERAL_START: u16 = 49152;
const MAX_ROUNDS: usize = 64;

/// 模拟栈的容量参数。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SimConfig {
    /// 每个 PCB 的发送缓冲总量（`TCP_SND_BUF`）。
    pub snd_buf: usize,
    /// 单次搬运的最大段长（MSS）。
    pub segment: usize,
    /// 接收窗口：已投递但尚未 `recved` 的字节上限。
    pub rx_window: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            snd_buf: DEFAULT_SND_BUF,
            segment: 1460,
            rx_window: DEFAULT_SND_BUF,
        }
    }
}

#[derive(Clone, Copy)]
enum SimHost {
    Cached(IpAddr),
    Delayed(IpAddr),
}

enum SimEvent {
    Connected,
    Recv(Option<Bytes>),
    Sent(usize),
    Error(StackError),
    Accept(Pcb),
}

struct Queued {
    pcb: Pcb,
    event: SimEvent,
    /// PCB 已被释放时预先捕获的回调目标（错误回调）。
    captured: Option<HandlerRef>,
}

type LookupCallback = Box<dyn FnOnce(Option<IpAddr>)>;

struct SimPcb {
    state: PcbState,
    handler: Option<HandlerRef>,
    local: Option<TransportSocketAddr>,
    remote: Option<TransportSocketAddr>,
    peer: Option<Pcb>,
    unsent: BytesMut,
    fin_queued: bool,
    fin_received: bool,
    released: bool,
    rx_unacked: usize,
    rx_shut: bool,
    nagle: bool,
    backlog: u8,
    unaccepted: u8,
}

impl SimPcb {
    fn new() -> Self {
        Self {
            state: PcbState::Closed,
            handler: None,
            local: None,
            remote: None,
            peer: None,
            unsent: BytesMut::new(),
            fin_queued: false,
            fin_received: false,
            released: false,
            rx_unacked: 0,
            rx_shut: false,
            nagle: true,
            backlog: 0,
            unaccepted: 0,
        }
    }
}

struct SimState {
    config: SimConfig,
    next_pcb: u32,
    next_port: u16,
    pcbs: BTreeMap<Pcb, SimPcb>,
    connects: VecDeque<Pcb>,
    events: VecDeque<Queued>,
    hosts: HashMap<String, SimHost>,
    lookups: Vec<(Option<IpAddr>, LookupCallback)>,
    fail_next_close: bool,
    stale_calls: usize,
}

impl SimState {
    fn new(config: SimConfig) -> Self {
        Self {
            config,
            next_pcb: 1,
            next_port: EPHEMERAL_START,
            pcbs: BTreeMap::new(),
            connects: VecDeque::new(),
            events: VecDeque::new(),
            hosts: HashMap::new(),
            lookups: Vec::new(),
            fail_next_close: false,
            stale_calls: 0,
        }
    }

    fn alloc(&mut self, pcb: SimPcb) -> Pcb {
        let id = Pcb::from_raw(self.next_pcb);
        self.next_pcb += 1;
        self.pcbs.insert(id, pcb);
        id
    }

    fn live(&mut self, pcb: Pcb) -> Option<&mut SimPcb> {
        if !self.pcbs.contains_key(&pcb) {
            trace!(%pcb, "call on released pcb");
            self.stale_calls += 1;
        }
        self.pcbs.get_mut(&pcb)
    }

    fn queue(&mut self, pcb: Pcb, event: SimEvent) {
        self.events.push_back(Queued {
            pcb,
            event,
            captured: None,
        });
    }

    /// 释放 `pcb` 并向其回调目标投递错误。
    fn fail(&mut self, pcb: Pcb, error: StackError) {
        self.connects.retain(|pending| *pending != pcb);
        if let Some(removed) = self.pcbs.remove(&pcb)
            && let Some(handler) = removed.handler
        {
            self.events.push_back(Queued {
                pcb,
                event: SimEvent::Error(error),
                captured: Some(handler),
            });
        }
    }

    fn port_in_use(&self, port: u16) -> bool {
        self.pcbs
            .values()
            .any(|pcb| pcb.local.is_some_and(|local| local.port() == port))
    }

    fn handshakes(&mut self) -> bool {
        let mut progressed = false;
        while let Some(client) = self.connects.pop_front() {
            progressed = true;
            let Some(target) = self.pcbs.get(&client).and_then(|pcb| pcb.remote) else {
                continue;
            };
            let listener = self.pcbs.iter().find_map(|(id, pcb)| {
                let matches = pcb.state == PcbState::Listen
                    && pcb.local.is_some_and(|local| local.port() == target.port())
                    && pcb.unaccepted < pcb.backlog.max(1);
                matches.then_some(*id)
            });
            let Some(listener) = listener else {
                trace!(%client, %target, "no listener, connection refused");
                self.fail(client, StackError::Reset);
                continue;
            };

            let client_local = self.pcbs.get(&client).and_then(|pcb| pcb.local);
            let mut server = SimPcb::new();
            server.state = PcbState::Established;
            server.local = Some(TransportSocketAddr::v4([127, 0, 0, 1], target.port()));
            server.remote = client_local;
            server.peer = Some(client);
            let server = self.alloc(server);

            if let Some(pcb) = self.pcbs.get_mut(&listener) {
                pcb.unaccepted += 1;
            }
            if let Some(pcb) = self.pcbs.get_mut(&client) {
                pcb.state = PcbState::Established;
                pcb.peer = Some(server);
            }
            self.queue(listener, SimEvent::Accept(server));
            self.queue(client, SimEvent::Connected);
        }
        progressed
    }

    fn transfers(&mut self) -> bool {
        let mut progressed = false;
        let ids: Vec<Pcb> = self.pcbs.keys().copied().collect();
        for id in ids {
            let (peer, pending) = match self.pcbs.get(&id) {
                Some(pcb) => (pcb.peer, pcb.unsent.len()),
                None => continue,
            };
            if pending == 0 {
                continue;
            }
            let Some(peer) = peer else {
                continue;
            };
            let room = match self.pcbs.get(&peer) {
                Some(remote) if remote.handler.is_some() && !remote.rx_shut => {
                    self.config.rx_window.saturating_sub(remote.rx_unacked)
                }
                Some(remote) if remote.rx_shut => usize::MAX,
                _ => 0,
            };
            let n = pending.min(self.config.segment).min(room);
            if n == 0 {
                continue;
            }
            let segment = match self.pcbs.get_mut(&id) {
                Some(pcb) => pcb.unsent.split_to(n).freeze(),
                None => continue,
            };
            if let Some(remote) = self.pcbs.get_mut(&peer)
                && !remote.rx_shut
            {
                remote.rx_unacked += n;
                self.queue(peer, SimEvent::Recv(Some(segment)));
            }
            self.queue(id, SimEvent::Sent(n));
            progressed = true;
        }
        progressed
    }

    fn fins(&mut self) -> bool {
        let mut progressed = false;
        let ids: Vec<Pcb> = self.pcbs.keys().copied().collect();
        for id in ids {
            let Some(pcb) = self.pcbs.get_mut(&id) else {
                continue;
            };
            if !pcb.fin_queued || !pcb.unsent.is_empty() {
                continue;
            }
            pcb.fin_queued = false;
            pcb.state = match pcb.state {
                PcbState::FinWait1 if pcb.fin_received => PcbState::TimeWait,
                PcbState::FinWait1 => PcbState::FinWait2,
                PcbState::LastAck => PcbState::Closed,
                other => other,
            };
            let peer = pcb.peer;
            progressed = true;

            if let Some(peer) = peer
                && let Some(remote) = self.pcbs.get_mut(&peer)
            {
                remote.fin_received = true;
                remote.state = match remote.state {
                    PcbState::Established => PcbState::CloseWait,
                    PcbState::FinWait1 | PcbState::FinWait2 => PcbState::TimeWait,
                    other => other,
                };
                if remote.handler.is_some() {
                    self.queue(peer, SimEvent::Recv(None));
                }
            }
        }
        self.reap();
        progressed
    }

    /// 回收应用已释放且双向 FIN 都已完成的 PCB。
    fn reap(&mut self) {
        let finished: Vec<Pcb> = self
            .pcbs
            .iter()
            .filter(|(_, pcb)| {
                pcb.released
                    && !pcb.fin_queued
                    && (pcb.fin_received || pcb.peer.is_none())
                    && !matches!(pcb.state, PcbState::Listen)
            })
            .map(|(id, _)| *id)
            .collect();
        for id in finished {
            trace!(pcb = %id, "reaping released pcb");
            if let Some(removed) = self.pcbs.remove(&id)
                && let Some(peer) = removed.peer
                && let Some(remote) = self.pcbs.get_mut(&peer)
            {
                remote.peer = None;
            }
        }
    }
}

/// 可克隆的模拟栈句柄；所有克隆共享同一份栈状态。
#[derive(Clone)]
pub struct SimStack {
    state: Rc<RefCell<SimState>>,
}

impl Default for SimStack {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SimStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("SimStack")
            .field("config", &state.config)
            .field("pcbs", &state.pcbs.len())
            .field("queued_events", &state.events.len())
            .finish()
    }
}

impl SimStack {
    pub fn new() -> Self {
        Self::with_config(SimConfig::default())
    }

    pub fn with_config(config: SimConfig) -> Self {
        Self {
            state: Rc::new(RefCell::new(SimState::new(config))),
        }
    }

    /// 推进栈直到没有新的事件，返回投递的回调数量。
    pub fn poll(&self) -> usize {
        let mut delivered = 0;
        for _ in 0..MAX_ROUNDS {
            let progressed = {
                let mut state = self.state.borrow_mut();
                let handshakes = state.handshakes();
                let transfers = state.transfers();
                let fins = state.fins();
                handshakes || transfers || fins
            };

            let lookups = std::mem::take(&mut self.state.borrow_mut().lookups);
            let resolved = !lookups.is_empty();
            for (ip, callback) in lookups {
                callback(ip);
                delivered += 1;
            }

            let mut dispatched = false;
            while let Some(queued) = self.next_event() {
                dispatched = true;
                delivered += 1;
                self.deliver(queued);
            }

            if !progressed && !resolved && !dispatched {
                break;
            }
        }
        delivered
    }

    fn next_event(&self) -> Option<Queued> {
        self.state.borrow_mut().events.pop_front()
    }

    fn deliver(&self, queued: Queued) {
        let Queued {
            pcb,
            event,
            captured,
        } = queued;
        let handler = match captured {
            Some(handler) => Some(handler),
            None => self
                .state
                .borrow()
                .pcbs
                .get(&pcb)
                .and_then(|live| live.handler.clone()),
        };
        let Some(handler) = handler.and_then(|weak| weak.upgrade()) else {
            trace!(%pcb, "event dropped, no handler");
            return;
        };
        match event {
            SimEvent::Connected => handler.on_connected(pcb),
            SimEvent::Recv(data) => handler.on_recv(pcb, data),
            SimEvent::Sent(len) => handler.on_sent(pcb, len),
            SimEvent::Error(error) => handler.on_error(pcb, error),
            SimEvent::Accept(accepted) => handler.on_accept(pcb, accepted),
        }
    }

    /// 模拟收到对端 RST：PCB 被释放，错误回调在下一次 `poll` 投递。
    pub fn reset(&self, pcb: Pcb) {
        self.state.borrow_mut().fail(pcb, StackError::Reset);
    }

    /// 使下一次 `close` 以内存不足失败。
    pub fn fail_next_close(&self) {
        self.state.borrow_mut().fail_next_close = true;
    }

    /// 注册一个需要异步解析的主机名，结果在下一次 `poll` 中回调。
    pub fn add_host(&self, name: &str, ip: IpAddr) {
        self.state
            .borrow_mut()
            .hosts
            .insert(name.to_owned(), SimHost::Delayed(ip));
    }

    /// 注册一个已缓存的主机名，`gethostbyname` 立即命中。
    pub fn cache_host(&self, name: &str, ip: IpAddr) {
        self.state
            .borrow_mut()
            .hosts
            .insert(name.to_owned(), SimHost::Cached(ip));
    }

    pub fn nagle_enabled(&self, pcb: Pcb) -> Option<bool> {
        self.state.borrow().pcbs.get(&pcb).map(|live| live.nagle)
    }

    pub fn rx_unacked(&self, pcb: Pcb) -> usize {
        self.state
            .borrow()
            .pcbs
            .get(&pcb)
            .map_or(0, |live| live.rx_unacked)
    }

    pub fn pcb_count(&self) -> usize {
        self.state.borrow().pcbs.len()
    }

    /// 对已失效 PCB 的调用次数；正确的使用方应始终为 0。
    pub fn stale_calls(&self) -> usize {
        self.state.borrow().stale_calls
    }
}

impl HostLookup for SimStack {
    fn gethostbyname(&self, host: &str, on_found: LookupCallback) -> NativeAnswer {
        let mut state = self.state.borrow_mut();
        match state.hosts.get(host).copied() {
            Some(SimHost::Cached(ip)) => NativeAnswer::Found(ip),
            Some(SimHost::Delayed(ip)) => {
                state.lookups.push((Some(ip), on_found));
                NativeAnswer::InProgress
            }
            None => {
                state.lookups.push((None, on_found));
                NativeAnswer::InProgress
            }
        }
    }
}

impl RawTcpStack for SimStack {
    fn tcp_new(&self) -> Result<Pcb, StackError> {
        Ok(self.state.borrow_mut().alloc(SimPcb::new()))
    }

    fn register(&self, pcb: Pcb, handler: Option<HandlerRef>) {
        if let Some(live) = self.state.borrow_mut().live(pcb) {
            live.handler = handler;
        }
    }

    fn bind(&self, pcb: Pcb, addr: TransportSocketAddr) -> Result<(), StackError> {
        let mut state = self.state.borrow_mut();
        let port = if addr.port() == 0 {
            let mut candidate = state.next_port;
            while state.port_in_use(candidate) {
                candidate = candidate.checked_add(1).unwrap_or(EPHEMERAL_START);
            }
            state.next_port = candidate.checked_add(1).unwrap_or(EPHEMERAL_START);
            candidate
        } else if state.port_in_use(addr.port()) {
            return Err(StackError::InUse);
        } else {
            addr.port()
        };
        let live = state.live(pcb).ok_or(StackError::Closed)?;
        if live.local.is_some() {
            return Err(StackError::Value);
        }
        live.local = Some(addr.with_port(port));
        Ok(())
    }

    fn listen(&self, pcb: Pcb, backlog: u8) -> Result<Pcb, StackError> {
        let mut state = self.state.borrow_mut();
        let mut old = state.pcbs.remove(&pcb).ok_or(StackError::Closed)?;
        if old.local.is_none() {
            state.pcbs.insert(pcb, old);
            return Err(StackError::Value);
        }
        old.state = PcbState::Listen;
        old.backlog = backlog;
        let listener = state.alloc(old);
        trace!(%pcb, %listener, "listen reallocated pcb");
        Ok(listener)
    }

    fn accepted(&self, listener: Pcb) {
        if let Some(live) = self.state.borrow_mut().live(listener) {
            live.unaccepted = live.unaccepted.saturating_sub(1);
        }
    }

    fn connect(&self, pcb: Pcb, addr: TransportSocketAddr, local_port: u16) -> Result<(), StackError> {
        let mut state = self.state.borrow_mut();
        let live = state.live(pcb).ok_or(StackError::Closed)?;
        if live.state != PcbState::Closed {
            return Err(StackError::IsConnected);
        }
        live.local = Some(TransportSocketAddr::v4([127, 0, 0, 1], local_port));
        live.remote = Some(addr);
        live.state = PcbState::SynSent;
        state.connects.push_back(pcb);
        Ok(())
    }

    fn write(&self, pcb: Pcb, data: &[u8], _more: bool) -> Result<(), StackError> {
        let mut state = self.state.borrow_mut();
        let snd_buf = state.config.snd_buf;
        let live = state.live(pcb).ok_or(StackError::Closed)?;
        if !matches!(
            live.state,
            PcbState::Established | PcbState::CloseWait | PcbState::SynSent
        ) {
            return Err(StackError::Closed);
        }
        if data.len() > snd_buf.saturating_sub(live.unsent.len()) {
            return Err(StackError::Mem);
        }
        live.unsent.extend_from_slice(data);
        Ok(())
    }

    fn output(&self, pcb: Pcb) -> Result<(), StackError> {
        match self.state.borrow_mut().live(pcb) {
            Some(_) => Ok(()),
            None => Err(StackError::Closed),
        }
    }

    fn sndbuf(&self, pcb: Pcb) -> usize {
        let mut state = self.state.borrow_mut();
        let snd_buf = state.config.snd_buf;
        state
            .live(pcb)
            .map_or(0, |live| snd_buf.saturating_sub(live.unsent.len()))
    }

    fn snd_buf_capacity(&self) -> usize {
        self.state.borrow().config.snd_buf
    }

    fn recved(&self, pcb: Pcb, len: usize) {
        if let Some(live) = self.state.borrow_mut().live(pcb) {
            live.rx_unacked = live.rx_unacked.saturating_sub(len);
        }
    }

    fn close(&self, pcb: Pcb) -> Result<(), StackError> {
        let mut state = self.state.borrow_mut();
        if std::mem::take(&mut state.fail_next_close) {
            return Err(StackError::Mem);
        }
        let live = state.live(pcb).ok_or(StackError::Closed)?;
        live.handler = None;
        live.released = true;
        let current = live.state;
        match current {
            PcbState::Established | PcbState::SynRcvd => {
                live.state = PcbState::FinWait1;
                live.fin_queued = true;
            }
            PcbState::CloseWait => {
                live.state = PcbState::LastAck;
                live.fin_queued = true;
            }
            PcbState::Closed | PcbState::Listen | PcbState::SynSent => {
                state.connects.retain(|pending| *pending != pcb);
                state.pcbs.remove(&pcb);
            }
            _ => {}
        }
        Ok(())
    }

    fn abort(&self, pcb: Pcb) {
        let mut state = self.state.borrow_mut();
        if state.live(pcb).is_none() {
            return;
        }
        state.connects.retain(|pending| *pending != pcb);
        if let Some(removed) = state.pcbs.remove(&pcb)
            && let Some(peer) = removed.peer
        {
            state.fail(peer, StackError::Reset);
        }
    }

    fn shutdown(&self, pcb: Pcb, rx: bool, tx: bool) -> Result<(), StackError> {
        let mut state = self.state.borrow_mut();
        let live = state.live(pcb).ok_or(StackError::Closed)?;
        if rx {
            live.rx_shut = true;
        }
        if tx {
            match live.state {
                PcbState::Established => live.state = PcbState::FinWait1,
                PcbState::CloseWait => live.state = PcbState::LastAck,
                _ => return Err(StackError::NotConnected),
            }
            live.fin_queued = true;
        }
        Ok(())
    }

    fn set_nagle(&self, pcb: Pcb, enabled: bool) {
        if let Some(live) = self.state.borrow_mut().live(pcb) {
            live.nagle = enabled;
        }
    }

    fn pcb_state(&self, pcb: Pcb) -> PcbState {
        self.state
            .borrow()
            .pcbs
            .get(&pcb)
            .map_or(PcbState::Closed, |live| live.state)
    }

    fn local_endpoint(&self, pcb: Pcb) -> Option<TransportSocketAddr> {
        self.state.borrow().pcbs.get(&pcb).and_then(|live| live.local)
    }

    fn remote_endpoint(&self, pcb: Pcb) -> Option<TransportSocketAddr> {
        self.state.borrow().pcbs.get(&pcb).and_then(|live| live.remote)
    }

    fn service(&self) {
        self.poll();
    }
}
