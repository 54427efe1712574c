use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, OnceLock, Weak};

use flint_transport::{ErrorKind, Result, TransportError, TransportSocketAddr};
use tracing::trace;

use crate::hints::{AddrHints, AddrInfo};
use crate::{FETCH, LOOKUP};

type Slot = OnceLock<Result<AddrInfo>>;

/// 一次进行中或已完成的名字解析。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 连接在 `Connecting` 的解析子阶段持有本句柄，每次 `tick()` 只做一次无锁探测；
/// - 结果只写一次，写入方（栈回调或工作线程）与读取方之间没有其他同步。
///
/// ## 契约（What）
/// - `completed()`：结果是否已写入；
/// - `fetch_result()`：完成前返回 `NotReady`，完成后返回解析到的地址或解析错误；可重复调用；
/// - 丢弃句柄即取消：对应的 [`DnsCompleter`] 只持有弱引用，迟到的结果被静默丢弃。
#[derive(Debug)]
pub struct DnsFuture {
    host: String,
    slot: Arc<Slot>,
}

impl DnsFuture {
    /// 创建待完成的句柄与配套的完成器。
    pub fn pending(host: &str, port: u16, hints: AddrHints) -> (Self, DnsCompleter) {
        let slot = Arc::new(Slot::new());
        let completer = DnsCompleter {
            slot: Arc::downgrade(&slot),
            host: host.to_owned(),
            port,
            hints,
        };
        (
            Self {
                host: host.to_owned(),
                slot,
            },
            completer,
        )
    }

    /// 创建已完成的句柄（缓存命中、字面地址或同步失败）。
    pub fn ready(host: &str, result: Result<AddrInfo>) -> Self {
        let slot = Slot::new();
        let _ = slot.set(result);
        Self {
            host: host.to_owned(),
            slot: Arc::new(slot),
        }
    }

    pub fn completed(&self) -> bool {
        self.slot.get().is_some()
    }

    pub fn fetch_result(&self) -> Result<AddrInfo> {
        match self.slot.get() {
            Some(result) => result.clone(),
            None => Err(TransportError::not_ready(FETCH)),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

/// 解析结果的写入端，只持有结果槽位的弱引用。
///
/// 可克隆；多个副本中第一个写入的结果生效。
#[derive(Clone, Debug)]
pub struct DnsCompleter {
    slot: Weak<Slot>,
    host: String,
    port: u16,
    hints: AddrHints,
}

impl DnsCompleter {
    pub fn host(&self) -> &str {
        &self.host
    }

    /// 对应的 [`DnsFuture`] 是否已被丢弃。
    pub fn is_abandoned(&self) -> bool {
        self.slot.strong_count() == 0
    }

    /// 以栈回调的形式完成：`None` 表示主机不存在。
    pub fn complete_with_ip(self, ip: Option<IpAddr>) -> bool {
        let result = match ip {
            Some(ip) => {
                let addr = TransportSocketAddr::from(SocketAddr::new(ip, self.port));
                if self.hints.family.accepts(&addr) {
                    Ok(self.hints.to_info(addr))
                } else {
                    Err(self.not_found())
                }
            }
            None => Err(self.not_found()),
        };
        self.complete(result)
    }

    /// 以平台解析器返回的地址列表完成，取第一个满足族约束的地址。
    pub fn complete_with_addrs<I>(self, addrs: I) -> bool
    where
        I: IntoIterator<Item = SocketAddr>,
    {
        let picked = addrs
            .into_iter()
            .map(TransportSocketAddr::from)
            .find(|addr| self.hints.family.accepts(addr))
            .map(|addr| self.hints.to_info(addr.with_port(self.port)));
        let result = picked.ok_or_else(|| self.not_found());
        self.complete(result)
    }

    pub fn fail(self, error: TransportError) -> bool {
        self.complete(Err(error))
    }

    fn not_found(&self) -> TransportError {
        TransportError::from_operation(
            ErrorKind::Io,
            LOOKUP,
            format!("host `{}` not found", self.host),
        )
    }

    fn complete(self, result: Result<AddrInfo>) -> bool {
        match self.slot.upgrade() {
            Some(slot) => slot.set(result).is_ok(),
            None => {
                trace!(host = %self.host, "lookup finished after its handle was dropped");
                false
            }
        }
    }
}
