/// 半关闭方向。
///
/// `Write` 发送 FIN 但仍可读取对端剩余数据；`Read` 丢弃后续到达的数据；`Both` 等价于两者同时生效。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShutdownDirection {
    Read,
    Write,
    Both,
}

impl ShutdownDirection {
    pub fn includes_read(self) -> bool {
        matches!(self, ShutdownDirection::Read | ShutdownDirection::Both)
    }

    pub fn includes_write(self) -> bool {
        matches!(self, ShutdownDirection::Write | ShutdownDirection::Both)
    }
}

impl From<ShutdownDirection> for std::net::Shutdown {
    fn from(direction: ShutdownDirection) -> Self {
        match direction {
            ShutdownDirection::Read => std::net::Shutdown::Read,
            ShutdownDirection::Write => std::net::Shutdown::Write,
            ShutdownDirection::Both => std::net::Shutdown::Both,
        }
    }
}
