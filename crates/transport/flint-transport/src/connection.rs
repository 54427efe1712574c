use std::time::Duration;

use crate::{
    CloseOutcome, ConnectionState, Result, ShutdownDirection, TransportSocketAddr,
};

/// 单条 TCP 连接的非阻塞契约。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 让 MQTT、HTTP、telnet 等协议层只面向一套接口读写字节流，不感知底层是内核套接字、
///   嵌入式协议栈还是厂商异步客户端；
/// - 所有操作立即返回（`flush` 除外，且有时限），适配单线程协作式主循环。
///
/// ## 架构定位（Architecture）
/// - 每个后端提供一个实现本 trait 的具体类型，由 [`TransportFactory`] 构造；
/// - TLS 等装饰器同样实现本 trait，对协议层透明。
///
/// ## 契约说明（What）
/// - `read` 返回 `0` 表示“此刻无数据”，既不是错误也不是 EOF；流结束后继续返回 `0`，
///   由 `state()` 判断连接是否仍可读；`Closing`/`Closed` 状态下已缓冲的数据仍可读出；
/// - `write` 总是整块接收（放不进发送窗口的部分进入预留缓冲），不可写时返回
///   `ConnectionClosed`，硬错误返回 `Io` 并使连接进入 `Closed`；
/// - `available_for_write` 是不触发内部扩容即可写入字节数的下界；
/// - `reserve_at_least` 为软提示，`ensure_capacity` 为硬保证：返回 `Ok` 后
///   `available_for_write() >= n`；
/// - `flush` 在配置的时限内尽力排空预留缓冲，全部交付（可观测时含确认）返回 `true`；
/// - `close(false)` 发起优雅关闭，协议栈拒绝时退化为中止并返回 [`CloseOutcome::Aborted`]；
///   `close(true)` 立即中止、从不失败、可重复调用；
/// - `tick` 是协作式驱动入口：交付挂起错误（仅一次）、应用已完成的名字解析、确认建连、排空缓冲。
///
/// ## 风险提示（Trade-offs）
/// - 句柄不可克隆，析构即释放底层资源（按中止语义）；
/// - 不支持的调优项（`set_no_delay`、`set_timeout`）静默忽略。
pub trait Connection {
    /// 后端标识（例如 `"kernel"`、`"lwip"`）。
    fn scheme(&self) -> &'static str;

    /// 向字面地址发起连接：`Initialized → Connecting`。
    fn connect(&mut self, addr: TransportSocketAddr) -> Result<()>;

    /// 向主机名发起连接；非字面地址先异步解析，解析阶段同样报告 `Connecting`。
    fn connect_host(&mut self, host: &str, port: u16) -> Result<()>;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn available(&self) -> usize;

    fn write(&mut self, data: &[u8]) -> Result<()>;

    fn available_for_write(&self) -> usize;

    fn reserve_at_least(&mut self, size: usize) -> Result<()>;

    fn ensure_capacity(&mut self, size: usize) -> Result<()>;

    fn flush(&mut self) -> Result<bool>;

    fn close(&mut self, force: bool) -> Result<CloseOutcome>;

    fn shutdown(&mut self, direction: ShutdownDirection) -> Result<()>;

    fn state(&self) -> ConnectionState;

    fn set_no_delay(&mut self, no_delay: bool);

    fn set_timeout(&mut self, timeout: Duration);

    fn tick(&mut self) -> Result<()>;

    fn peer_addr(&self) -> Option<TransportSocketAddr>;

    fn local_addr(&self) -> Option<TransportSocketAddr>;

    /// 建连时使用的主机字符串；被动接受的连接为对端 IP。
    fn host(&self) -> &str;

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// `Connected`/`Closing` 状态，或仍有已缓冲数据时可读。
    fn is_readable(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Connected | ConnectionState::Closing
        ) || self.available() > 0
    }

    fn is_writable(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }
}

/// 在连接能力之上增加服务端角色。
///
/// # 契约（What）
/// - `bind`：端口被占用返回 `AddressInUse`，地址非法返回 `InvalidArgument`；
/// - `listen`：进入监听，之后到达的连接按到达顺序进入待接受队列；
/// - `accept`：取出队首连接并转移所有权，没有待接受连接时返回 `Ok(None)`。
pub trait Socket: Connection + Sized {
    fn bind(&mut self, addr: TransportSocketAddr) -> Result<()>;

    fn listen(&mut self, backlog: usize) -> Result<()>;

    fn accept(&mut self) -> Result<Option<Self>>;
}

/// 构建期选定的后端工厂。
///
/// `make_server` 默认实现为 `make_socket` + `bind` + `listen`。
pub trait TransportFactory {
    type Socket: Socket;

    fn make_socket(&self) -> Result<Self::Socket>;

    fn make_server(&self, addr: TransportSocketAddr, backlog: usize) -> Result<Self::Socket> {
        let mut socket = self.make_socket()?;
        socket.bind(addr)?;
        socket.listen(backlog)?;
        Ok(socket)
    }
}
