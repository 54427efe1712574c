#![deny(unsafe_code)]
#![doc = "flint-transport: 传输层契约接口统一抽象层。"]
#![doc = ""]
#![doc = "== 使命概述 =="]
#![doc = "- **Why**：内核套接字、嵌入式协议栈、厂商 SDK 与异步运行时提供的 TCP 能力差异巨大，上层协议（MQTT、HTTP、telnet）需要一套与后端无关的非阻塞字节流接口。"]
#![doc = "- **What**：定义 `Connection`/`Socket`/`TransportFactory` 契约、生命周期状态、错误分类、运行配置，以及所有后端共享的写路径背压策略。"]
#![doc = "- **How**：后端只需实现 `SendWindow` 描述自身发送窗口，写入、排空与限时冲刷逻辑统一由 `BackpressureQueue` 与 `flush_with_budget` 完成。"]

pub mod addr;
pub mod backpressure;
pub mod config;
pub mod connection;
pub mod error;
pub mod flush;
pub mod shutdown;
pub mod state;

pub use addr::TransportSocketAddr;
pub use backpressure::{BackpressureQueue, SendWindow};
pub use config::{ConfigError, TransportConfig};
pub use connection::{Connection, Socket, TransportFactory};
pub use error::{ErrorKind, OperationKind, Result, TransportError};
pub use flush::flush_with_budget;
pub use shutdown::ShutdownDirection;
pub use state::{CloseOutcome, ConnectionState};
