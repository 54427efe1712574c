use std::fmt;
use std::rc::Weak;

use bytes::Bytes;
use flint_dns::HostLookup;
use flint_transport::TransportSocketAddr;
use thiserror::Error;

/// 协议控制块（PCB）的不透明句柄。
///
/// 句柄仅在协议栈确认其存活期间有效：`close` 成功、`abort` 返回或错误回调触发后，
/// 持有者不得再以该句柄调用任何栈接口。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pcb(u32);

impl Pcb {
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Pcb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pcb#{}", self.0)
    }
}

/// TCP 协议状态机节点。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PcbState {
    Closed,
    Listen,
    SynSent,
    SynRcvd,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

/// 协议栈原生错误码（`err_t`）。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Error)]
pub enum StackError {
    #[error("out of memory")]
    Mem,
    #[error("buffer error")]
    Buf,
    #[error("timeout")]
    Timeout,
    #[error("routing problem")]
    Route,
    #[error("operation in progress")]
    InProgress,
    #[error("illegal value")]
    Value,
    #[error("operation would block")]
    WouldBlock,
    #[error("address in use")]
    InUse,
    #[error("already connecting")]
    Already,
    #[error("already connected")]
    IsConnected,
    #[error("not connected")]
    NotConnected,
    #[error("low-level netif error")]
    Interface,
    #[error("connection aborted")]
    Aborted,
    #[error("connection reset")]
    Reset,
    #[error("connection closed")]
    Closed,
    #[error("illegal argument")]
    Argument,
}

impl StackError {
    /// 对应的数值 `err_t`。
    pub fn code(self) -> i32 {
        match self {
            StackError::Mem => -1,
            StackError::Buf => -2,
            StackError::Timeout => -3,
            StackError::Route => -4,
            StackError::InProgress => -5,
            StackError::Value => -6,
            StackError::WouldBlock => -7,
            StackError::InUse => -8,
            StackError::Already => -9,
            StackError::IsConnected => -10,
            StackError::NotConnected => -11,
            StackError::Interface => -12,
            StackError::Aborted => -13,
            StackError::Reset => -14,
            StackError::Closed => -15,
            StackError::Argument => -16,
        }
    }
}

/// 挂在 PCB 上的回调目标。
///
/// # 契约（What）
/// - `on_connected`：主动连接完成握手；
/// - `on_recv`：收到一段数据；`None` 表示对端已发送 FIN；
/// - `on_sent`：对端确认了 `len` 字节，发送窗口随之增长；
/// - `on_error`：连接因错误终止，**PCB 在回调前已被栈释放**；
/// - `on_accept`：监听 PCB 接受了新连接 `pcb`，新 PCB 尚未注册回调。
pub trait RawTcpHandler {
    fn on_connected(&self, pcb: Pcb);

    fn on_recv(&self, pcb: Pcb, data: Option<Bytes>);

    fn on_sent(&self, pcb: Pcb, len: usize);

    fn on_error(&self, pcb: Pcb, error: StackError);

    fn on_accept(&self, listener: Pcb, pcb: Pcb);
}

/// 栈侧持有的回调目标引用；目标被释放后栈自动停止投递。
pub type HandlerRef = Weak<dyn RawTcpHandler>;

/// 嵌入式协议栈的原始 TCP 接口。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 原始回调 API 没有文件描述符，所有操作都以 PCB 句柄为参数，事件通过注册的回调投递；
///   本 trait 按其原生形状建模，使真实协议栈绑定与内存模拟栈可互换；
/// - 句柄可克隆（通常是对栈全局状态的共享引用），每个连接各持一份。
///
/// ## 契约（What）
/// - 回调必须在栈的事件上下文（输入处理、定时器、`service`）中投递，
///   不得在 `write`/`output` 等调用内部同步重入；
/// - `write` 会拷贝数据，且只接受不超过 `sndbuf` 的长度，超出时返回 `Mem`；
/// - `listen` 可能重新分配 PCB，调用方必须改用返回的新句柄；
/// - `close` 可能因内存不足返回 `Mem`，此时 PCB 仍归调用方所有；
/// - `abort` 从不失败，返回后句柄失效；
/// - `snd_buf_capacity` 为单连接发送缓冲总量，`sndbuf` 回到该值意味着所有数据已被确认。
pub trait RawTcpStack: HostLookup + Clone {
    fn tcp_new(&self) -> Result<Pcb, StackError>;

    /// 注册或清除回调目标。
    fn register(&self, pcb: Pcb, handler: Option<HandlerRef>);

    fn bind(&self, pcb: Pcb, addr: TransportSocketAddr) -> Result<(), StackError>;

    fn listen(&self, pcb: Pcb, backlog: u8) -> Result<Pcb, StackError>;

    /// 通知栈监听队列中的一个连接已被应用取走。
    fn accepted(&self, _listener: Pcb) {}

    fn connect(&self, pcb: Pcb, addr: TransportSocketAddr, local_port: u16) -> Result<(), StackError>;

    fn write(&self, pcb: Pcb, data: &[u8], more: bool) -> Result<(), StackError>;

    fn output(&self, pcb: Pcb) -> Result<(), StackError>;

    fn sndbuf(&self, pcb: Pcb) -> usize;

    fn snd_buf_capacity(&self) -> usize;

    /// 应用已消费 `len` 字节，扩大接收窗口。
    fn recved(&self, pcb: Pcb, len: usize);

    fn close(&self, pcb: Pcb) -> Result<(), StackError>;

    fn abort(&self, pcb: Pcb);

    fn shutdown(&self, pcb: Pcb, rx: bool, tx: bool) -> Result<(), StackError>;

    fn set_nagle(&self, pcb: Pcb, enabled: bool);

    fn pcb_state(&self, pcb: Pcb) -> PcbState;

    fn local_endpoint(&self, pcb: Pcb) -> Option<TransportSocketAddr>;

    fn remote_endpoint(&self, pcb: Pcb) -> Option<TransportSocketAddr>;

    /// 在 `flush` 自旋期间推进栈；真实栈由中断或主循环驱动时保持空实现。
    fn service(&self) {}
}
