#![deny(unsafe_code)]
#![doc = "flint: 传输层门面。"]
#![doc = ""]
#![doc = "== 使命概述 =="]
#![doc = "- **Why**：协议层（MQTT、HTTP、telnet）只依赖本 crate，目标平台由 cargo 特性决定，切换后端无需改动调用方代码。"]
#![doc = "- **What**：导出 `Connection`/`Socket`/`TransportFactory` 契约、构建期选定的 [`Factory`] 类型与其构造函数 [`factory`]、带诊断日志的 [`make_socket`]/[`make_server`]，以及 [`logging::init`]。"]
#![doc = "- **How**：后端选择完全在编译期完成（类型别名 + `cfg`），不存在运行时分发或全局注册表。"]

mod backend;
pub mod logging;

pub use backend::{BACKEND, Factory, factory};
pub use flint_buffer::{ChunkQueue, RingBuffer};
pub use flint_dns as dns;
pub use flint_transport::{
    BackpressureQueue, CloseOutcome, ConfigError, Connection, ConnectionState, ErrorKind,
    OperationKind, Result, SendWindow, ShutdownDirection, Socket, TransportConfig,
    TransportError, TransportFactory, TransportSocketAddr, flush_with_budget,
};

#[cfg(feature = "kernel")]
pub use flint_transport_kernel as kernel;
#[cfg(feature = "lwip")]
pub use flint_transport_lwip as lwip;
#[cfg(feature = "smoltcp")]
pub use flint_transport_smoltcp as smoltcp;
#[cfg(feature = "tokio")]
pub use flint_transport_tokio as tokio;
#[cfg(feature = "vendor")]
pub use flint_transport_vendor as vendor;

use tracing::{debug, trace};

/// 通过工厂创建一个空闲连接句柄。
pub fn make_socket<F: TransportFactory>(factory: &F) -> Result<F::Socket> {
    let socket = factory.make_socket()?;
    trace!(backend = socket.scheme(), "socket created");
    Ok(socket)
}

/// 创建并启动监听句柄：`make_socket` + `bind` + `listen`。
///
/// 失败以 `debug` 级别记录后原样返回；监听地址的端口为 `0` 时，
/// 实际端口可从返回句柄的 `local_addr()` 读取。
pub fn make_server<F: TransportFactory>(
    factory: &F,
    addr: TransportSocketAddr,
    backlog: usize,
) -> Result<F::Socket> {
    match factory.make_server(addr, backlog) {
        Ok(server) => {
            debug!(
                backend = server.scheme(),
                %addr,
                local = ?server.local_addr(),
                backlog,
                "listening"
            );
            Ok(server)
        }
        Err(error) => {
            debug!(%addr, backlog, %error, "cannot start listening");
            Err(error)
        }
    }
}
