use flint_transport::{Result, TransportError, TransportSocketAddr};

use crate::SERVICE;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    #[default]
    Unspecified,
    Inet,
    Inet6,
}

impl AddressFamily {
    /// 判断地址是否满足族约束。
    pub fn accepts(self, addr: &TransportSocketAddr) -> bool {
        match self {
            AddressFamily::Unspecified => true,
            AddressFamily::Inet => addr.is_ipv4(),
            AddressFamily::Inet6 => !addr.is_ipv4(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SocketType {
    Stream,
    Datagram,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

/// 解析提示，语义同 `getaddrinfo` 的 `hints`。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AddrHints {
    pub family: AddressFamily,
    pub socktype: Option<SocketType>,
    pub protocol: Option<Protocol>,
}

impl AddrHints {
    /// TCP 连接常用提示：任意族、流式、TCP。
    pub fn tcp() -> Self {
        Self {
            family: AddressFamily::Unspecified,
            socktype: Some(SocketType::Stream),
            protocol: Some(Protocol::Tcp),
        }
    }

    /// 用提示补全一条解析结果：未指定的套接字类型默认为流式，协议由类型推断。
    pub fn to_info(&self, addr: TransportSocketAddr) -> AddrInfo {
        let socktype = self.socktype.unwrap_or(SocketType::Stream);
        let protocol = self.protocol.unwrap_or(match socktype {
            SocketType::Stream => Protocol::Tcp,
            SocketType::Datagram => Protocol::Udp,
        });
        let family = if addr.is_ipv4() {
            AddressFamily::Inet
        } else {
            AddressFamily::Inet6
        };
        AddrInfo {
            family,
            socktype,
            protocol,
            addr,
        }
    }
}

/// 一条解析结果：单个地址加上套接字类型与协议。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddrInfo {
    pub family: AddressFamily,
    pub socktype: SocketType,
    pub protocol: Protocol,
    pub addr: TransportSocketAddr,
}

/// 把服务描述解析为端口：数字端口或常见服务名。
pub fn parse_service(service: &str) -> Result<u16> {
    if let Ok(port) = service.parse::<u16>() {
        return Ok(port);
    }
    let port = match service {
        "telnet" => 23,
        "http" => 80,
        "https" => 443,
        "mqtt" => 1883,
        "mqtts" => 8883,
        _ => {
            return Err(TransportError::invalid_argument(
                SERVICE,
                format!("unknown service `{service}`"),
            ));
        }
    };
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn services_resolve_to_ports() {
        assert_eq!(parse_service("8080").expect("numeric"), 8080);
        assert_eq!(parse_service("mqtt").expect("named"), 1883);
        assert!(parse_service("gopher").is_err());
    }

    #[test]
    fn protocol_is_inferred_from_socket_type() {
        let hints = AddrHints {
            socktype: Some(SocketType::Datagram),
            ..AddrHints::default()
        };
        let info = hints.to_info(TransportSocketAddr::v4([10, 0, 0, 1], 53));
        assert_eq!(info.protocol, Protocol::Udp);
        assert_eq!(info.family, AddressFamily::Inet);
        assert_eq!(AddrHints::default().to_info(info.addr).socktype, SocketType::Stream);
    }
}
