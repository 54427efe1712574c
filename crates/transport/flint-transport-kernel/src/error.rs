use flint_transport::OperationKind;

pub(crate) const SOCKET: OperationKind =
    OperationKind::new("flint.transport.kernel.socket_failed", "kernel socket");
pub(crate) const BIND: OperationKind =
    OperationKind::new("flint.transport.kernel.bind_failed", "kernel bind");
pub(crate) const LISTEN: OperationKind =
    OperationKind::new("flint.transport.kernel.listen_failed", "kernel listen");
pub(crate) const ACCEPT: OperationKind =
    OperationKind::new("flint.transport.kernel.accept_failed", "kernel accept");
pub(crate) const CONNECT: OperationKind =
    OperationKind::new("flint.transport.kernel.connect_failed", "kernel connect");
pub(crate) const READ: OperationKind =
    OperationKind::new("flint.transport.kernel.read_failed", "kernel read");
pub(crate) const WRITE: OperationKind =
    OperationKind::new("flint.transport.kernel.write_failed", "kernel write");
pub(crate) const SHUTDOWN: OperationKind =
    OperationKind::new("flint.transport.kernel.shutdown_failed", "kernel shutdown");
