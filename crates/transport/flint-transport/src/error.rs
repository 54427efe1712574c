use std::borrow::Cow;
use std::io;

use thiserror::Error;

/// 传输层统一返回类型。
pub type Result<T, E = TransportError> = core::result::Result<T, E>;

/// 传输错误的分类。
///
/// # 契约（What）
/// - `WouldBlock`/`NotReady`：瞬时状态，调用方稍后重试即可，不应记录为故障；
/// - `AddressInUse`/`InvalidArgument`：配置类错误，由 `bind`/`listen`/`connect` 等建立阶段返回；
/// - `ConnectionClosed`：对已关闭或尚未建立的连接执行 I/O；
/// - `Timeout`：建连或冲刷超出时限；
/// - `Io`：底层栈或内核报告的硬错误，`TransportError::os_code` 携带平台错误码。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    WouldBlock,
    AddressInUse,
    InvalidArgument,
    ConnectionClosed,
    Timeout,
    NotReady,
    Io,
}

impl ErrorKind {
    /// 是否属于“稍后再试”的瞬时状态。
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorKind::WouldBlock | ErrorKind::NotReady)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::WouldBlock => "would_block",
            ErrorKind::AddressInUse => "address_in_use",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::ConnectionClosed => "connection_closed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::NotReady => "not_ready",
            ErrorKind::Io => "io",
        }
    }
}

/// 描述一次底层操作对应的稳定错误码与默认文案。
///
/// 各后端在自己的 `error.rs` 中以常量形式声明，例如
/// `flint.transport.kernel.bind_failed`。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

impl OperationKind {
    pub const fn new(code: &'static str, message: &'static str) -> Self {
        Self { code, message }
    }
}

/// 传输层错误。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 所有后端共享同一错误形状：分类（供调用方分支）、稳定错误码（供日志检索）、
///   人类可读文案、可选的平台错误码；
/// - 错误需要在“挂起错误”槽位中保存并在下一次 `tick()` 交付，因此实现 `Clone`。
///
/// ## 契约（What）
/// - `kind()` 决定调用方的处理策略；`code()` 在版本间保持稳定；
/// - `os_code()` 对内核后端是 `errno`，对嵌入式栈是其原生 `err_t`。
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("[{code}] {message}")]
pub struct TransportError {
    kind: ErrorKind,
    code: &'static str,
    message: Cow<'static, str>,
    os_code: Option<i32>,
}

impl TransportError {
    pub fn new(kind: ErrorKind, code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            os_code: None,
        }
    }

    /// 以操作描述构造错误，文案为 `"<操作>: <细节>"`。
    pub fn from_operation(kind: ErrorKind, operation: OperationKind, detail: impl AsRef<str>) -> Self {
        Self::new(
            kind,
            operation.code,
            format!("{}: {}", operation.message, detail.as_ref()),
        )
    }

    /// 附加平台或协议栈的原始错误码。
    pub fn with_os_code(mut self, code: i32) -> Self {
        self.os_code = Some(code);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn os_code(&self) -> Option<i32> {
        self.os_code
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    /// 连接不可写或已关闭。
    pub fn closed(operation: OperationKind) -> Self {
        Self::from_operation(ErrorKind::ConnectionClosed, operation, "connection is closed")
    }

    /// 结果尚未就绪（例如异步解析仍在进行）。
    pub fn not_ready(operation: OperationKind) -> Self {
        Self::from_operation(ErrorKind::NotReady, operation, "result is not ready yet")
    }

    pub fn timeout(operation: OperationKind) -> Self {
        Self::from_operation(ErrorKind::Timeout, operation, "timed out")
    }

    pub fn invalid_argument(operation: OperationKind, reason: impl AsRef<str>) -> Self {
        Self::from_operation(ErrorKind::InvalidArgument, operation, reason)
    }

    /// 预留缓冲扩容失败。
    pub fn alloc_failed(requested: usize) -> Self {
        Self::new(
            ErrorKind::Io,
            ALLOC_FAILED_CODE,
            format!("reserve buffer cannot grow to {requested} bytes"),
        )
    }
}

const ALLOC_FAILED_CODE: &str = "flint.buffer.alloc_failed";

impl From<flint_buffer::ReserveError> for TransportError {
    fn from(error: flint_buffer::ReserveError) -> Self {
        Self::alloc_failed(error.requested())
    }
}

/// 将标准库 IO 错误映射为传输错误，并保留 `errno`。
pub fn map_io_error(operation: OperationKind, error: io::Error) -> TransportError {
    let kind = categorize_io_error(&error);
    let mapped = TransportError::from_operation(kind, operation, error.to_string());
    match error.raw_os_error() {
        Some(code) => mapped.with_os_code(code),
        None => mapped,
    }
}

fn categorize_io_error(error: &io::Error) -> ErrorKind {
    use io::ErrorKind as Std;
    match error.kind() {
        Std::WouldBlock | Std::Interrupted => ErrorKind::WouldBlock,
        Std::AddrInUse => ErrorKind::AddressInUse,
        Std::InvalidInput | Std::AddrNotAvailable => ErrorKind::InvalidArgument,
        Std::TimedOut => ErrorKind::Timeout,
        Std::NotConnected | Std::BrokenPipe => ErrorKind::ConnectionClosed,
        _ => ErrorKind::Io,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const READ: OperationKind = OperationKind::new("flint.transport.test.read_failed", "test read");

    #[test]
    fn io_errors_keep_errno_and_category() {
        let err = map_io_error(READ, io::Error::from_raw_os_error(98));
        assert_eq!(err.os_code(), Some(98));
        assert_eq!(err.code(), "flint.transport.test.read_failed");
        assert!(err.message().starts_with("test read: "));

        let blocked = map_io_error(READ, io::Error::from(io::ErrorKind::WouldBlock));
        assert!(blocked.is_transient());
        let reset = map_io_error(READ, io::Error::from(io::ErrorKind::ConnectionReset));
        assert_eq!(reset.kind(), ErrorKind::Io);
    }

    #[test]
    fn display_includes_stable_code() {
        let err = TransportError::closed(READ);
        assert_eq!(
            err.to_string(),
            "[flint.transport.test.read_failed] test read: connection is closed"
        );
    }
}
