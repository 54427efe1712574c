#![deny(unsafe_code)]

//! `flint-dns`：不阻塞调用线程的名字解析。
//!
//! # 模块定位（Why）
//! - 连接的 `connect_host` 不能在协作式主循环里同步等待解析结果，因此解析被拆成
//!   “发起 → 轮询 `completed()` → `fetch_result()`”三步；
//! - 协议栈自带异步解析器时（原始回调 API 的 `gethostbyname`），结果由栈回调写入；
//!   否则在独立线程里调用平台解析器。两种策略对调用方呈现同一个 [`DnsFuture`]。
//!
//! # 设计概要（How）
//! - 结果槽位是 `Arc<OnceLock<…>>`，回调/线程只持有 `Weak`：句柄被丢弃后，迟到的完成通知自然失效；
//! - [`resolve_async`] 负责服务名解析与字面 IP 快速路径，再委托给具体 [`Resolver`]。

mod future;
mod hints;
mod native;
mod thread;

pub use future::{DnsCompleter, DnsFuture};
pub use hints::{AddrHints, AddrInfo, AddressFamily, Protocol, SocketType, parse_service};
pub use native::{HostLookup, NativeAnswer, NativeResolver};
pub use thread::ThreadResolver;

use flint_transport::{OperationKind, Result, TransportSocketAddr};

pub(crate) const LOOKUP: OperationKind =
    OperationKind::new("flint.dns.lookup_failed", "dns lookup");
pub(crate) const FETCH: OperationKind = OperationKind::new("flint.dns.fetch_failed", "dns fetch");
pub(crate) const SERVICE: OperationKind =
    OperationKind::new("flint.dns.service_invalid", "dns service");

/// 一种名字解析策略。
///
/// 实现必须立即返回；结果通过返回的 [`DnsFuture`] 异步交付。
pub trait Resolver {
    fn resolve(&self, host: &str, port: u16, hints: &AddrHints) -> Result<DnsFuture>;
}

/// 发起一次异步解析。
///
/// - `service` 为数字端口或常见服务名（`http`、`https`、`mqtt`、`mqtts`、`telnet`）；
/// - `host` 为字面 IP 时直接返回已完成的句柄，不经过解析器。
pub fn resolve_async<R>(resolver: &R, host: &str, service: &str, hints: AddrHints) -> Result<DnsFuture>
where
    R: Resolver + ?Sized,
{
    let port = parse_service(service)?;
    if let Some(addr) = TransportSocketAddr::parse_ip(host, port) {
        let completed = DnsFuture::ready(host, Ok(hints.to_info(addr)));
        return Ok(completed);
    }
    resolver.resolve(host, port, &hints)
}
