#![deny(unsafe_code)]

//! `flint-transport-smoltcp`：smoltcp 套接字 API 上的传输后端。
//!
//! - [`SmolStack`] 让同一目标上的所有连接共享一个 `Interface`、`SocketSet` 与网卡设备，
//!   由主循环调用 [`SmolStack::poll`] 推进；
//! - [`SmolSocket`] 将 `tcp::Socket` 的调用一一映射到统一的连接契约。

mod error;
mod socket;
mod stack;

pub use socket::{SmolFactory, SmolSocket};
pub use stack::SmolStack;
