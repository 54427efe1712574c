//! 厂商 SDK 对象边界。
//!
//! SDK 客户端自带连接状态、发送缓冲与名字解析，只通过回调报告进展；
//! 这里按其原生形状描述接口，具体绑定（或测试替身）实现这两个 trait 即可接入。

use std::time::Duration;

use bytes::Bytes;
use flint_transport::TransportSocketAddr;

/// SDK 客户端回调的统一形态。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connected,
    Data(Bytes),
    /// 对端确认了 `len` 字节，SDK 发送缓冲随之腾出同等空间。
    Acked(usize),
    /// SDK 原生错误码；随后总会跟随一次 `Disconnected`。
    Error(i32),
    Disconnected,
    /// 接收空闲或确认等待超过 SDK 设定的时限。
    Timeout,
}

pub type EventHandler = Box<dyn FnMut(ClientEvent)>;

pub type ClientHandler<C> = Box<dyn FnMut(C)>;

/// 高层异步客户端对象。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 厂商 SDK 把 TCP 封装为“带缓冲的客户端对象 + 回调”，既不暴露描述符，也不暴露 PCB；
///   连接层只需要它的这组原语即可实现统一契约。
///
/// ## 契约（What）
/// - `connect`/`connect_host` 只负责发起，返回 `false` 表示 SDK 当场拒绝；
///   结果通过 [`ClientEvent::Connected`] 或 [`ClientEvent::Error`] 回报；
/// - `space` 是 SDK 发送缓冲的剩余字节数，`add` 复制至多这么多字节并返回实际接收量，
///   `more` 提示后续还有数据；`send` 把已添加的数据推给网络；
/// - `close(false)` 优雅关闭，`close(true)` 立即关闭（丢弃未发送数据），`abort` 发送 RST；
/// - 回调可能在任意 SDK 调用内部同步触发，处理方必须能容忍重入。
pub trait AsyncClient {
    fn connect(&mut self, addr: TransportSocketAddr) -> bool;

    /// 由 SDK 自行解析主机名后再连接。
    fn connect_host(&mut self, host: &str, port: u16) -> bool;

    fn space(&self) -> usize;

    fn add(&mut self, data: &[u8], more: bool) -> usize;

    fn send(&mut self) -> bool;

    fn close(&mut self, now: bool);

    fn abort(&mut self);

    fn set_no_delay(&mut self, no_delay: bool);

    fn set_rx_timeout(&mut self, timeout: Duration);

    fn connected(&self) -> bool;

    fn remote_addr(&self) -> Option<TransportSocketAddr>;

    fn local_addr(&self) -> Option<TransportSocketAddr>;

    /// 注册事件回调，替换之前的回调。
    fn on_event(&mut self, handler: EventHandler);
}

/// 高层异步服务端对象：每个入站连接以一个新的客户端对象交给回调。
pub trait AsyncServer {
    type Client: AsyncClient;

    /// 开始监听；失败时返回 SDK 错误码（如 [`codes::ERR_USE`]）。
    fn begin(&mut self, addr: TransportSocketAddr, backlog: usize) -> Result<(), i32>;

    fn on_client(&mut self, handler: ClientHandler<Self::Client>);

    fn end(&mut self);

    fn local_addr(&self) -> Option<TransportSocketAddr>;
}

/// SDK 沿用的 lwIP `err_t` 错误码。
pub mod codes {
    pub const ERR_MEM: i32 = -1;
    pub const ERR_BUF: i32 = -2;
    pub const ERR_TIMEOUT: i32 = -3;
    pub const ERR_RTE: i32 = -4;
    pub const ERR_INPROGRESS: i32 = -5;
    pub const ERR_VAL: i32 = -6;
    pub const ERR_WOULDBLOCK: i32 = -7;
    pub const ERR_USE: i32 = -8;
    pub const ERR_ALREADY: i32 = -9;
    pub const ERR_ISCONN: i32 = -10;
    pub const ERR_CONN: i32 = -11;
    pub const ERR_IF: i32 = -12;
    pub const ERR_ABRT: i32 = -13;
    pub const ERR_RST: i32 = -14;
    pub const ERR_CLSD: i32 = -15;
    pub const ERR_ARG: i32 = -16;
    /// SDK 自定义：名字解析失败。
    pub const ERR_DNS: i32 = -55;

    pub fn describe(code: i32) -> &'static str {
        match code {
            0 => "No error, everything OK",
            ERR_MEM => "Out of memory error",
            ERR_BUF => "Buffer error",
            ERR_TIMEOUT => "Timeout",
            ERR_RTE => "Routing problem",
            ERR_INPROGRESS => "Operation in progress",
            ERR_VAL => "Illegal value",
            ERR_WOULDBLOCK => "Operation would block",
            ERR_USE => "Address in use",
            ERR_ALREADY => "Already connecting",
            ERR_ISCONN => "Connection already established",
            ERR_CONN => "Not connected",
            ERR_IF => "Low-level netif error",
            ERR_ABRT => "Connection aborted",
            ERR_RST => "Connection reset",
            ERR_CLSD => "Connection closed",
            ERR_ARG => "Illegal argument",
            ERR_DNS => "DNS failed",
            _ => "Unknown error",
        }
    }
}
