use std::fmt;

/// 连接生命周期状态。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 统一五个后端各自的状态表示（内核 `connect` 进度、原始栈 PCB 状态、smoltcp `tcp::State`、
///   厂商客户端事件、驱动任务事件），上层协议只需判断本枚举。
///
/// ## 契约（What）
/// - `Initialized → Connecting`：调用 `connect`/`connect_host`，名字解析阶段也归入 `Connecting`；
/// - `Connecting → Connected`：后端确认握手完成；
/// - `Connecting/Connected → Closing`：本端优雅关闭或对端 FIN；
/// - 任意非 `Closed` 状态 `→ Closed`：强制关闭、不可恢复错误、或优雅关闭完成；
/// - `Closed` 为终态，此后不会再对底层资源发起任何调用。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Initialized,
    Connecting,
    Connected,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Initialized => "initialized",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `close` 的实际结果。
///
/// 优雅关闭被协议栈拒绝时后端会退化为中止，此时返回 `Aborted`，调用方可据此
/// 判断未冲刷的数据是否已被丢弃。
///
/// 关闭仍在解析或建连中的套接字总是放弃这次尝试，所有后端都返回 `Aborted`，
/// 与 `force` 无关。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseOutcome {
    /// 已发起 FIN，未发送数据按协议栈语义继续投递。
    Graceful,
    /// 以 RST 中止或放弃了尚未完成的建连，未发送数据被丢弃。
    Aborted,
    /// 连接此前已关闭，本次调用无副作用。
    AlreadyClosed,
}
