use std::net::ToSocketAddrs;
use std::thread;

use flint_transport::{ErrorKind, Result, TransportError};
use tracing::{debug, warn};

use crate::future::DnsFuture;
use crate::hints::AddrHints;
use crate::{LOOKUP, Resolver};

/// 线程解析策略：每次查询在分离的工作线程中调用平台解析器。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 内核套接字与 smoltcp 后端没有栈内异步解析器，平台 `getaddrinfo` 又是阻塞调用，
///   只能移交给独立线程；
/// - 主机名、端口、提示在派生前整体拷贝进线程，线程与调用方之间只通过结果槽位交接。
///
/// ## 注意事项（Trade-offs）
/// - 线程不可取消：丢弃 [`DnsFuture`] 后线程仍会跑完，但结果被丢弃；
/// - 线程创建失败时句柄以错误完成，而不是让调用方永远等待。
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadResolver;

impl ThreadResolver {
    pub fn new() -> Self {
        Self
    }
}

impl Resolver for ThreadResolver {
    fn resolve(&self, host: &str, port: u16, hints: &AddrHints) -> Result<DnsFuture> {
        let (future, completer) = DnsFuture::pending(host, port, *hints);
        let target = host.to_owned();
        let worker = completer.clone();

        let spawned = thread::Builder::new()
            .name("flint-dns".into())
            .spawn(move || match (target.as_str(), port).to_socket_addrs() {
                Ok(addrs) => {
                    worker.complete_with_addrs(addrs);
                }
                Err(error) => {
                    debug!(host = %target, %error, "platform lookup failed");
                    let mut failure =
                        TransportError::from_operation(ErrorKind::Io, LOOKUP, error.to_string());
                    if let Some(code) = error.raw_os_error() {
                        failure = failure.with_os_code(code);
                    }
                    worker.fail(failure);
                }
            });

        if let Err(error) = spawned {
            warn!(host, %error, "cannot spawn resolver thread");
            completer.fail(TransportError::from_operation(
                ErrorKind::Io,
                LOOKUP,
                format!("cannot spawn resolver thread: {error}"),
            ));
        }
        Ok(future)
    }
}
