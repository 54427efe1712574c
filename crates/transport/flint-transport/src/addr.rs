use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// 后端无关的 TCP 端点地址。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 嵌入式协议栈（原始回调 API、smoltcp）与内核套接字各有一套地址类型，
///   契约层统一使用本枚举，后端在边界处自行转换；
/// - 日志与 `host()` 诊断需要稳定的字符串形式，`Display` 提供 `ip:port` / `[v6]:port`。
///
/// ## 契约（What）
/// - `V4`/`V6` 分别携带八位组与十六位段表示，端口为主机序 `u16`；
/// - 与 `std::net::SocketAddr` 双向无损转换。
///
/// ## 注意事项（Trade-offs）
/// - IPv6 格式化不做零压缩，优先保证逐段可读。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[non_exhaustive]
pub enum TransportSocketAddr {
    /// IPv4 地址。
    V4 { addr: [u8; 4], port: u16 },
    /// IPv6 地址。
    V6 { addr: [u16; 8], port: u16 },
}

impl TransportSocketAddr {
    /// 构造 IPv4 端点。
    pub const fn v4(addr: [u8; 4], port: u16) -> Self {
        Self::V4 { addr, port }
    }

    /// 监听所有 IPv4 网卡的端点（`0.0.0.0:port`）。
    pub const fn any_v4(port: u16) -> Self {
        Self::V4 {
            addr: [0, 0, 0, 0],
            port,
        }
    }

    /// 若 `host` 是字面 IP（IPv4 点分或 IPv6 冒号形式），返回对应端点。
    ///
    /// 用于 `connect_host` 的快速路径：字面地址无需走名字解析。
    pub fn parse_ip(host: &str, port: u16) -> Option<Self> {
        host.parse::<IpAddr>()
            .ok()
            .map(|ip| Self::from(SocketAddr::new(ip, port)))
    }

    pub fn port(&self) -> u16 {
        match self {
            Self::V4 { port, .. } | Self::V6 { port, .. } => *port,
        }
    }

    /// 返回替换端口后的副本。
    pub fn with_port(self, port: u16) -> Self {
        match self {
            Self::V4 { addr, .. } => Self::V4 { addr, port },
            Self::V6 { addr, .. } => Self::V6 { addr, port },
        }
    }

    pub fn ip(&self) -> IpAddr {
        match self {
            Self::V4 { addr, .. } => IpAddr::V4(Ipv4Addr::from(*addr)),
            Self::V6 { addr, .. } => IpAddr::V6(Ipv6Addr::from(*addr)),
        }
    }

    pub fn is_ipv4(&self) -> bool {
        matches!(self, Self::V4 { .. })
    }
}

impl fmt::Display for TransportSocketAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportSocketAddr::V4 { addr, port } => write!(
                f,
                "{}.{}.{}.{}:{}",
                addr[0], addr[1], addr[2], addr[3], port
            ),
            TransportSocketAddr::V6 { addr, port } => {
                let segments: Vec<String> = addr
                    .iter()
                    .map(|segment| format!("{:x}", segment))
                    .collect();
                write!(f, "[{}]:{}", segments.join(":"), port)
            }
        }
    }
}

impl From<SocketAddr> for TransportSocketAddr {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => Self::V4 {
                addr: v4.ip().octets(),
                port: v4.port(),
            },
            SocketAddr::V6(v6) => Self::V6 {
                addr: v6.ip().segments(),
                port: v6.port(),
            },
        }
    }
}

impl From<TransportSocketAddr> for SocketAddr {
    fn from(addr: TransportSocketAddr) -> Self {
        match addr {
            TransportSocketAddr::V4 { addr, port } => SocketAddr::from((addr, port)),
            TransportSocketAddr::V6 { addr, port } => {
                SocketAddr::from((Ipv6Addr::from(addr), port))
            }
        }
    }
}
