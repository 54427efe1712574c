#![deny(unsafe_code)]

//! `flint-transport-kernel`：宿主操作系统的非阻塞 TCP 套接字后端。
//!
//! # 模块定位（Why）
//! - 桌面与服务器目标直接使用内核协议栈，发送窗口无法直接观测，只能从短写推断；
//! - 套接字选项（`SO_REUSEADDR`、`SO_LINGER`、非阻塞）通过 `socket2` 在创建期一次性落地，
//!   之后转换为标准库的 `TcpStream`/`TcpListener` 进行读写。

mod error;
mod socket;

pub use socket::{KernelFactory, KernelSocket};
