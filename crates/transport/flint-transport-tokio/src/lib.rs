#![deny(unsafe_code)]

//! `flint-transport-tokio`：托管异步运行时上的传输后端。
//!
//! - 每条连接由运行时中的驱动任务持有 `TcpStream`，读写完成后以 [`DriverEvent`] 回报；
//! - [`TokioSocket`] 在协作式主循环的 `tick()` 中应用事件，对上层呈现与其他后端一致的非阻塞契约；
//! - 监听由驱动任务持续 `accept`，新连接进入待接受队列。

mod driver;
mod error;
mod socket;

pub use driver::{Command, DriverEvent};
pub use socket::{TokioFactory, TokioSocket};
