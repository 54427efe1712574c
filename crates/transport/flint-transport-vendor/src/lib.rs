#![deny(unsafe_code)]

//! `flint-transport-vendor`：厂商 SDK 异步客户端上的传输后端。
//!
//! - [`client`] 以 SDK 原生形状描述客户端/服务端对象，真实绑定只需实现 [`AsyncClient`] 与 [`AsyncServer`]；
//! - [`VendorSocket`] 只做翻译：SDK 事件驱动统一状态机，写入经由共享的背压策略；
//! - `testing`（特性 `test-util`）提供单进程回环替身。

pub mod client;
mod error;
mod socket;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use client::{AsyncClient, AsyncServer, ClientEvent, ClientHandler, EventHandler};
pub use socket::{VendorFactory, VendorSocket};
