#![deny(unsafe_code)]

//! `flint-buffer` 提供传输层两侧共用的字节容器。
//!
//! # 模块定位（Why）
//! - 写侧：当底层发送窗口不足时，连接需要一块“预留缓冲”暂存溢出的字节，
//!   `RingBuffer` 以按需倍增的环形队列承担这一职责；
//! - 读侧：协议栈以分片链形式交付接收数据，`ChunkQueue` 在不拷贝的前提下
//!   串接这些分片，并在读取时报告消费量，便于后端归还接收窗口。
//!
//! # 设计概要（How）
//! - `ring` 模块只暴露“线性段”访问器（`peek_front_linear`/`pop_front_linear`），
//!   调用方永远不需要理解回绕细节；
//! - `chunk` 模块基于 `bytes::Bytes`，推进游标时直接 `advance`，已读尽的分片立即释放。
//!
//! # 命名约定（Consistency）
//! - 容量、长度遵循标准库术语：`capacity`/`len`/`is_empty`。

mod chunk;
mod ring;

pub use chunk::ChunkQueue;
pub use ring::{MIN_CAPACITY, ReserveError, RingBuffer};
