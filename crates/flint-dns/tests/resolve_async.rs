//! `resolve_async` 集成测试：覆盖字面地址快速路径与线程解析策略的完成语义。
//!
//! # 测试总览（Why）
//! - 字面 IP 不应触发任何解析器调用，句柄创建即完成；
//! - 线程策略在完成前返回 `NotReady`，对不存在的主机最终以错误完成，而不是永远挂起。

use std::time::{Duration, Instant};

use flint_dns::{AddrHints, DnsFuture, Resolver, ThreadResolver, resolve_async};
use flint_transport::{ErrorKind, Result, TransportSocketAddr};

/// 被调用即失败的解析器，用于证明快速路径未经过解析器。
struct Unreachable;

impl Resolver for Unreachable {
    fn resolve(&self, host: &str, _port: u16, _hints: &AddrHints) -> Result<DnsFuture> {
        panic!("resolver must not be consulted for `{host}`");
    }
}

fn wait_until_completed(future: &DnsFuture) {
    let deadline = Instant::now() + Duration::from_secs(20);
    while !future.completed() {
        assert!(Instant::now() < deadline, "lookup for `{}` never completed", future.host());
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn literal_address_completes_without_resolver() {
    let future = resolve_async(&Unreachable, "10.0.0.8", "mqtt", AddrHints::tcp()).expect("resolve");
    assert!(future.completed());
    assert_eq!(
        future.fetch_result().expect("literal").addr,
        TransportSocketAddr::v4([10, 0, 0, 8], 1883)
    );
}

#[test]
fn unknown_service_is_invalid_argument() {
    let err = resolve_async(&Unreachable, "10.0.0.8", "no-such-service", AddrHints::tcp())
        .expect_err("service");
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn invalid_host_completes_with_error() {
    let future = resolve_async(&ThreadResolver::new(), "example.invalid", "80", AddrHints::tcp())
        .expect("resolve");
    if !future.completed() {
        assert_eq!(
            future.fetch_result().expect_err("pending").kind(),
            ErrorKind::NotReady
        );
    }
    wait_until_completed(&future);
    let err = future.fetch_result().expect_err("example.invalid must not resolve");
    assert_eq!(err.kind(), ErrorKind::Io);
    assert_eq!(err.code(), "flint.dns.lookup_failed");
}
