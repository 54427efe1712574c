use flint_transport::{ErrorKind, OperationKind, TransportError};

use crate::client::codes;

pub(crate) const BIND: OperationKind =
    OperationKind::new("flint.transport.vendor.bind_failed", "vendor bind");
pub(crate) const LISTEN: OperationKind =
    OperationKind::new("flint.transport.vendor.listen_failed", "vendor listen");
pub(crate) const ACCEPT: OperationKind =
    OperationKind::new("flint.transport.vendor.accept_failed", "vendor accept");
pub(crate) const CONNECT: OperationKind =
    OperationKind::new("flint.transport.vendor.connect_failed", "vendor connect");
pub(crate) const WRITE: OperationKind =
    OperationKind::new("flint.transport.vendor.write_failed", "vendor write");
pub(crate) const FLUSH: OperationKind =
    OperationKind::new("flint.transport.vendor.flush_failed", "vendor flush");
pub(crate) const SHUTDOWN: OperationKind =
    OperationKind::new("flint.transport.vendor.shutdown_failed", "vendor shutdown");
pub(crate) const CONNECTION: OperationKind =
    OperationKind::new("flint.transport.vendor.connection_error", "vendor connection");

/// 将 SDK 回报的错误码映射为传输错误，保留原始数值。
pub(crate) fn map_client_error(operation: OperationKind, code: i32) -> TransportError {
    let kind = match code {
        codes::ERR_USE => ErrorKind::AddressInUse,
        codes::ERR_VAL | codes::ERR_ARG => ErrorKind::InvalidArgument,
        codes::ERR_TIMEOUT => ErrorKind::Timeout,
        codes::ERR_CLSD => ErrorKind::ConnectionClosed,
        _ => ErrorKind::Io,
    };
    TransportError::from_operation(kind, operation, codes::describe(code)).with_os_code(code)
}
