use flint_transport::OperationKind;

pub(crate) const BIND: OperationKind =
    OperationKind::new("flint.transport.smoltcp.bind_failed", "smoltcp bind");
pub(crate) const LISTEN: OperationKind =
    OperationKind::new("flint.transport.smoltcp.listen_failed", "smoltcp listen");
pub(crate) const ACCEPT: OperationKind =
    OperationKind::new("flint.transport.smoltcp.accept_failed", "smoltcp accept");
pub(crate) const CONNECT: OperationKind =
    OperationKind::new("flint.transport.smoltcp.connect_failed", "smoltcp connect");
pub(crate) const WRITE: OperationKind =
    OperationKind::new("flint.transport.smoltcp.write_failed", "smoltcp write");
pub(crate) const SHUTDOWN: OperationKind =
    OperationKind::new("flint.transport.smoltcp.shutdown_failed", "smoltcp shutdown");
pub(crate) const CONNECTION: OperationKind =
    OperationKind::new("flint.transport.smoltcp.connection_error", "smoltcp connection");
