use flint_transport::OperationKind;

pub(crate) const RUNTIME: OperationKind =
    OperationKind::new("flint.transport.tokio.runtime_unavailable", "tokio runtime");
pub(crate) const BIND: OperationKind =
    OperationKind::new("flint.transport.tokio.bind_failed", "tokio bind");
pub(crate) const LISTEN: OperationKind =
    OperationKind::new("flint.transport.tokio.listen_failed", "tokio listen");
pub(crate) const ACCEPT: OperationKind =
    OperationKind::new("flint.transport.tokio.accept_failed", "tokio accept");
pub(crate) const CONNECT: OperationKind =
    OperationKind::new("flint.transport.tokio.connect_failed", "tokio connect");
pub(crate) const WRITE: OperationKind =
    OperationKind::new("flint.transport.tokio.write_failed", "tokio write");
pub(crate) const SHUTDOWN: OperationKind =
    OperationKind::new("flint.transport.tokio.shutdown_failed", "tokio shutdown");
pub(crate) const CONNECTION: OperationKind =
    OperationKind::new("flint.transport.tokio.connection_error", "tokio connection");
