#![deny(unsafe_code)]

//! `flint-transport-lwip`：嵌入式协议栈原始回调 API 上的传输后端。
//!
//! - [`stack`] 以原生形状描述 PCB 句柄、回调与栈接口，真实绑定只需实现 [`RawTcpStack`]；
//! - [`RawSocket`] 把回调驱动的连接翻译为统一的 `Connection`/`Socket` 契约；
//! - [`sim`] 提供单主机内存模拟栈，用于在宿主机上验证全部行为。

mod error;
pub mod sim;
mod socket;
pub mod stack;

pub use sim::{SimConfig, SimStack};
pub use socket::{RawFactory, RawSocket};
pub use stack::{HandlerRef, Pcb, PcbState, RawTcpHandler, RawTcpStack, StackError};
