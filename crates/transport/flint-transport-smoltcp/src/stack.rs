use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::rc::Rc;

use smoltcp::iface::{Config, Context, Interface, SocketHandle, SocketSet};
use smoltcp::phy::{Device, Loopback, Medium};
use smoltcp::socket::tcp;
use smoltcp::time::Instant;
use smoltcp::wire::{EthernetAddress, HardwareAddress, IpAddress, IpCidr, IpListenEndpoint};
use tracing::{debug, trace, warn};

const EPHEMERAL_START: u16 = 49152;
const EPHEMERAL_END: u16 = 65535;
const MAX_POLL_ROUNDS: usize = 256;
/// 连续无进展的轮数达到该值才认为栈已静止。
const QUIET_ROUNDS: usize = 2;

/// 监听端口上的一组监听套接字。
///
/// smoltcp 的一个 `tcp::Socket` 只能承载一条连接，监听因此由 `backlog` 个
/// 同端口的监听套接字组成；离开 `Listen` 状态的套接字按扫描顺序移入 `arrived`。
struct ListenerPool {
    endpoint: IpListenEndpoint,
    backlog: usize,
    pool: Vec<SocketHandle>,
    arrived: VecDeque<SocketHandle>,
}

struct StackInner<D: Device> {
    device: D,
    iface: Interface,
    sockets: SocketSet<'static>,
    buffer_size: usize,
    next_port: u16,
    ports: HashSet<u16>,
    listeners: HashMap<u16, ListenerPool>,
    retired: Vec<SocketHandle>,
}

/// 单线程共享的 smoltcp 协议栈。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 嵌入式目标上只有一个网卡与一个 `Interface`，所有连接共享同一份 `SocketSet`；
///   协作式主循环单线程运行，因此以 `Rc<RefCell<…>>` 共享，而非加锁；
/// - 句柄可克隆，每个连接各持一份，工厂也持有一份。
///
/// ## 逻辑（How）
/// - [`SmolStack::poll`] 反复驱动 `Interface::poll` 直到连续两轮无进展，随后扫描监听池、
///   回收已退休的套接字。`Interface::poll` 的返回值不反映本轮发出的帧，发出帧的一轮之后
///   还需再跑一轮让回环设备把它交回协议栈；
/// - 连接关闭后，套接字句柄移交给栈的退休列表，待 FIN/RST 交换完成（`Closed`/`TimeWait`）再移除。
///
/// ## 注意事项（Trade-offs）
/// - 每个套接字的收发缓冲在创建时一次性分配，大小由 `buffer_size` 决定；
/// - 所有套接字关闭延迟 ACK，使确认与数据在同一次 `poll` 内完成往返，发送窗口回收可预测。
pub struct SmolStack<D: Device> {
    inner: Rc<RefCell<StackInner<D>>>,
}

impl<D: Device> Clone for SmolStack<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<D: Device> fmt::Debug for SmolStack<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("SmolStack")
            .field("sockets", &inner.sockets.iter().count())
            .field("listeners", &inner.listeners.len())
            .field("buffer_size", &inner.buffer_size)
            .finish()
    }
}

impl SmolStack<Loopback> {
    /// 以太网介质的回环栈，地址 127.0.0.1/8。
    pub fn loopback(buffer_size: usize) -> Self {
        let device = Loopback::new(Medium::Ethernet);
        let hardware = HardwareAddress::Ethernet(EthernetAddress([0x02, 0, 0, 0, 0, 0x01]));
        Self::new(
            device,
            hardware,
            &[IpCidr::new(IpAddress::v4(127, 0, 0, 1), 8)],
            buffer_size,
        )
    }
}

impl<D: Device> SmolStack<D> {
    pub fn new(mut device: D, hardware: HardwareAddress, cidrs: &[IpCidr], buffer_size: usize) -> Self {
        let mut iface = Interface::new(Config::new(hardware), &mut device, Instant::now());
        iface.update_ip_addrs(|addrs| {
            for cidr in cidrs {
                if addrs.push(*cidr).is_err() {
                    warn!(%cidr, "interface address table full");
                }
            }
        });
        Self {
            inner: Rc::new(RefCell::new(StackInner {
                device,
                iface,
                sockets: SocketSet::new(Vec::new()),
                buffer_size,
                next_port: EPHEMERAL_START,
                ports: HashSet::new(),
                listeners: HashMap::new(),
                retired: Vec::new(),
            })),
        }
    }

    /// 推进协议栈直到静止；返回本次是否有套接字状态变化。
    ///
    /// 一次调用即可完成回环上的完整交换，例如 SYN 与随后的 RST。
    pub fn poll(&self) -> bool {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        let mut changed = false;
        let mut quiet = 0;
        for _ in 0..MAX_POLL_ROUNDS {
            if inner
                .iface
                .poll(Instant::now(), &mut inner.device, &mut inner.sockets)
            {
                changed = true;
                quiet = 0;
            } else {
                quiet += 1;
                if quiet >= QUIET_ROUNDS {
                    break;
                }
            }
        }

        let buffer_size = inner.buffer_size;
        for listener in inner.listeners.values_mut() {
            scan(&mut inner.sockets, listener, buffer_size);
        }

        let sockets = &mut inner.sockets;
        inner.retired.retain(|handle| {
            let state = sockets.get::<tcp::Socket>(*handle).state();
            if matches!(state, tcp::State::Closed | tcp::State::TimeWait) {
                trace!(?handle, ?state, "reaping retired socket");
                sockets.remove(*handle);
                false
            } else {
                true
            }
        });
        changed
    }

    /// 当前存活的套接字数量（含监听池与退休中的套接字）。
    pub fn socket_count(&self) -> usize {
        self.inner.borrow().sockets.iter().count()
    }

    pub fn buffer_size(&self) -> usize {
        self.inner.borrow().buffer_size
    }

    pub(crate) fn add_socket(&self) -> SocketHandle {
        let mut inner = self.inner.borrow_mut();
        let socket = new_socket(inner.buffer_size);
        inner.sockets.add(socket)
    }

    pub(crate) fn with_socket<R>(
        &self,
        handle: SocketHandle,
        f: impl FnOnce(&mut tcp::Socket<'static>) -> R,
    ) -> R {
        let mut inner = self.inner.borrow_mut();
        f(inner.sockets.get_mut::<tcp::Socket>(handle))
    }

    pub(crate) fn with_socket_cx<R>(
        &self,
        handle: SocketHandle,
        f: impl FnOnce(&mut tcp::Socket<'static>, &mut Context) -> R,
    ) -> R {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        let cx = inner.iface.context();
        f(inner.sockets.get_mut::<tcp::Socket>(handle), cx)
    }

    /// 把不再由连接持有的套接字交给栈，待关闭握手完成后回收；`abort` 为真时先发送 RST。
    pub(crate) fn retire(&self, handle: SocketHandle, abort: bool) {
        if let Ok(mut inner) = self.inner.try_borrow_mut() {
            if abort {
                inner.sockets.get_mut::<tcp::Socket>(handle).abort();
            }
            inner.retired.push(handle);
        }
    }

    /// 登记本地端口；`0` 表示在 49152..=65535 内轮转分配临时端口。
    /// 端口已被占用或临时端口耗尽时返回 `None`。
    pub(crate) fn claim_port(&self, port: u16) -> Option<u16> {
        let mut inner = self.inner.borrow_mut();
        let port = if port == 0 { inner.allocate_port()? } else { port };
        inner.ports.insert(port).then_some(port)
    }

    pub(crate) fn release_port(&self, port: u16) {
        if let Ok(mut inner) = self.inner.try_borrow_mut() {
            inner.ports.remove(&port);
        }
    }

    pub(crate) fn open_listener(
        &self,
        endpoint: IpListenEndpoint,
        backlog: usize,
    ) -> Result<(), tcp::ListenError> {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        let mut pool = Vec::with_capacity(backlog);
        for _ in 0..backlog.max(1) {
            match listening_socket(&mut inner.sockets, endpoint, inner.buffer_size) {
                Ok(handle) => pool.push(handle),
                Err(error) => {
                    for handle in pool {
                        inner.sockets.remove(handle);
                    }
                    return Err(error);
                }
            }
        }
        debug!(port = endpoint.port, backlog, "listener pool ready");
        inner.listeners.insert(
            endpoint.port,
            ListenerPool {
                endpoint,
                backlog: backlog.max(1),
                pool,
                arrived: VecDeque::new(),
            },
        );
        Ok(())
    }

    pub(crate) fn close_listener(&self, port: u16) {
        let Ok(mut guard) = self.inner.try_borrow_mut() else {
            return;
        };
        let inner = &mut *guard;
        inner.ports.remove(&port);
        let Some(listener) = inner.listeners.remove(&port) else {
            return;
        };
        for handle in listener.pool {
            inner.sockets.remove(handle);
        }
        for handle in listener.arrived {
            inner.sockets.get_mut::<tcp::Socket>(handle).abort();
            inner.retired.push(handle);
        }
    }

    /// 取出最早完成握手的入站连接。
    pub(crate) fn accept(&self, port: u16) -> Option<SocketHandle> {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        let buffer_size = inner.buffer_size;
        let listener = inner.listeners.get_mut(&port)?;
        scan(&mut inner.sockets, listener, buffer_size);

        while let Some(&handle) = listener.arrived.front() {
            match inner.sockets.get::<tcp::Socket>(handle).state() {
                tcp::State::SynReceived => return None,
                tcp::State::Listen => {
                    listener.arrived.pop_front();
                    listener.pool.push(handle);
                }
                tcp::State::Closed | tcp::State::TimeWait => {
                    listener.arrived.pop_front();
                    inner.sockets.remove(handle);
                }
                _ => {
                    listener.arrived.pop_front();
                    scan(&mut inner.sockets, listener, buffer_size);
                    return Some(handle);
                }
            }
        }
        None
    }

    pub(crate) fn pending_accepts(&self, port: u16) -> usize {
        let inner = self.inner.borrow();
        inner.listeners.get(&port).map_or(0, |listener| {
            listener
                .arrived
                .iter()
                .filter(|handle| {
                    !matches!(
                        inner.sockets.get::<tcp::Socket>(**handle).state(),
                        tcp::State::Listen | tcp::State::SynReceived
                    )
                })
                .count()
        })
    }
}

impl<D: Device> StackInner<D> {
    /// 从上次位置起最多扫描一整轮临时端口区间。
    fn allocate_port(&mut self) -> Option<u16> {
        let span = usize::from(EPHEMERAL_END - EPHEMERAL_START) + 1;
        for _ in 0..span {
            let port = self.next_port;
            self.next_port = if port >= EPHEMERAL_END {
                EPHEMERAL_START
            } else {
                port + 1
            };
            if !self.ports.contains(&port) {
                return Some(port);
            }
        }
        None
    }
}

fn new_socket(buffer_size: usize) -> tcp::Socket<'static> {
    let rx = tcp::SocketBuffer::new(vec![0u8; buffer_size]);
    let tx = tcp::SocketBuffer::new(vec![0u8; buffer_size]);
    let mut socket = tcp::Socket::new(rx, tx);
    socket.set_ack_delay(None);
    socket
}

fn listening_socket(
    sockets: &mut SocketSet<'static>,
    endpoint: IpListenEndpoint,
    buffer_size: usize,
) -> Result<SocketHandle, tcp::ListenError> {
    let mut socket = new_socket(buffer_size);
    socket.listen(endpoint)?;
    Ok(sockets.add(socket))
}

/// 把离开 `Listen` 状态的池内套接字移入到达队列，并补足监听数量。
fn scan(sockets: &mut SocketSet<'static>, listener: &mut ListenerPool, buffer_size: usize) {
    let mut index = 0;
    while index < listener.pool.len() {
        let handle = listener.pool[index];
        if sockets.get::<tcp::Socket>(handle).state() == tcp::State::Listen {
            index += 1;
        } else {
            listener.pool.remove(index);
            listener.arrived.push_back(handle);
        }
    }
    while listener.pool.len() + listener.arrived.len() < listener.backlog {
        match listening_socket(sockets, listener.endpoint, buffer_size) {
            Ok(handle) => listener.pool.push(handle),
            Err(error) => {
                warn!(port = listener.endpoint.port, ?error, "cannot refill listener pool");
                break;
            }
        }
    }
}
