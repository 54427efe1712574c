use flint_transport::{ErrorKind, OperationKind, TransportError};

use crate::stack::StackError;

pub(crate) const NEW: OperationKind =
    OperationKind::new("flint.transport.lwip.tcp_new_failed", "lwip tcp_new");
pub(crate) const BIND: OperationKind =
    OperationKind::new("flint.transport.lwip.bind_failed", "lwip bind");
pub(crate) const LISTEN: OperationKind =
    OperationKind::new("flint.transport.lwip.listen_failed", "lwip listen");
pub(crate) const ACCEPT: OperationKind =
    OperationKind::new("flint.transport.lwip.accept_failed", "lwip accept");
pub(crate) const CONNECT: OperationKind =
    OperationKind::new("flint.transport.lwip.connect_failed", "lwip connect");
pub(crate) const WRITE: OperationKind =
    OperationKind::new("flint.transport.lwip.write_failed", "lwip write");
pub(crate) const FLUSH: OperationKind =
    OperationKind::new("flint.transport.lwip.flush_failed", "lwip flush");
pub(crate) const SHUTDOWN: OperationKind =
    OperationKind::new("flint.transport.lwip.shutdown_failed", "lwip shutdown");
pub(crate) const CONNECTION: OperationKind =
    OperationKind::new("flint.transport.lwip.connection_error", "lwip connection");

/// 将栈原生错误映射为传输错误，保留 `err_t` 数值。
pub(crate) fn map_stack_error(operation: OperationKind, error: StackError) -> TransportError {
    let kind = match error {
        StackError::InUse => ErrorKind::AddressInUse,
        StackError::Value | StackError::Argument => ErrorKind::InvalidArgument,
        StackError::WouldBlock | StackError::InProgress => ErrorKind::WouldBlock,
        StackError::Timeout => ErrorKind::Timeout,
        StackError::Closed | StackError::NotConnected => ErrorKind::ConnectionClosed,
        _ => ErrorKind::Io,
    };
    TransportError::from_operation(kind, operation, error.to_string()).with_os_code(error.code())
}
