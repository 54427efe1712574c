use std::net::IpAddr;

use flint_transport::{ErrorKind, Result, TransportError};
use tracing::debug;

use crate::future::DnsFuture;
use crate::hints::AddrHints;
use crate::{LOOKUP, Resolver};

/// 协议栈原生解析调用的即时应答。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NativeAnswer {
    /// 缓存命中，回调不会再触发。
    Found(IpAddr),
    /// 查询已发出，结果稍后经回调交付。
    InProgress,
    /// 无法发起查询，携带栈的原生错误码。
    Failed(i32),
}

/// 嵌入式协议栈自带的异步 `gethostbyname`。
///
/// 回调在栈的事件上下文中触发，参数 `None` 表示主机不存在。
pub trait HostLookup {
    fn gethostbyname(&self, host: &str, on_found: Box<dyn FnOnce(Option<IpAddr>)>) -> NativeAnswer;
}

/// 栈原生解析策略：回调只捕获结果槽位的弱引用。
#[derive(Clone, Debug)]
pub struct NativeResolver<L> {
    lookup: L,
}

impl<L: HostLookup> NativeResolver<L> {
    pub fn new(lookup: L) -> Self {
        Self { lookup }
    }
}

impl<L: HostLookup> Resolver for NativeResolver<L> {
    fn resolve(&self, host: &str, port: u16, hints: &AddrHints) -> Result<DnsFuture> {
        let (future, completer) = DnsFuture::pending(host, port, *hints);
        let deferred = completer.clone();
        let answer = self.lookup.gethostbyname(
            host,
            Box::new(move |ip| {
                deferred.complete_with_ip(ip);
            }),
        );

        match answer {
            NativeAnswer::Found(ip) => {
                completer.complete_with_ip(Some(ip));
            }
            NativeAnswer::InProgress => {
                debug!(host, "native lookup in progress");
            }
            NativeAnswer::Failed(code) => {
                debug!(host, code, "native lookup rejected");
                completer.fail(
                    TransportError::from_operation(ErrorKind::Io, LOOKUP, "gethostbyname failed")
                        .with_os_code(code),
                );
            }
        }
        Ok(future)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::net::Ipv4Addr;
    use std::rc::Rc;

    type PendingCallback = Box<dyn FnOnce(Option<IpAddr>)>;

    /// 可手动触发回调的原生解析器替身。
    #[derive(Clone, Default)]
    struct ManualLookup {
        cached: Option<IpAddr>,
        pending: Rc<RefCell<Vec<PendingCallback>>>,
    }

    impl HostLookup for ManualLookup {
        fn gethostbyname(&self, _host: &str, on_found: PendingCallback) -> NativeAnswer {
            match self.cached {
                Some(ip) => NativeAnswer::Found(ip),
                None => {
                    self.pending.borrow_mut().push(on_found);
                    NativeAnswer::InProgress
                }
            }
        }
    }

    #[test]
    fn cached_answer_completes_immediately() {
        let lookup = ManualLookup {
            cached: Some(IpAddr::V4(Ipv4Addr::new(192, 168, 0, 10))),
            ..ManualLookup::default()
        };
        let future = NativeResolver::new(lookup)
            .resolve("broker.local", 1883, &AddrHints::tcp())
            .expect("resolve");
        assert!(future.completed());
        assert_eq!(future.fetch_result().expect("ok").addr.port(), 1883);
    }

    #[test]
    fn deferred_callback_completes_later() {
        let lookup = ManualLookup::default();
        let resolver = NativeResolver::new(lookup.clone());
        let future = resolver
            .resolve("example.invalid", 80, &AddrHints::tcp())
            .expect("resolve");
        assert!(!future.completed());

        for callback in lookup.pending.borrow_mut().drain(..) {
            callback(None);
        }
        assert!(future.completed());
        assert_eq!(future.fetch_result().expect_err("nxdomain").kind(), ErrorKind::Io);
    }
}
