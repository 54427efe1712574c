//! 构建期后端选择。
//!
//! 同时启用多个后端特性时按 kernel → smoltcp → lwip → vendor → tokio 的顺序取第一个；
//! 未启用的后端 crate 不参与编译，被遮蔽的后端仍可通过各自的模块别名直接使用。

use flint_transport::{OperationKind, Result, TransportConfig, TransportError};

#[cfg(not(any(
    feature = "kernel",
    feature = "smoltcp",
    feature = "lwip",
    feature = "vendor",
    feature = "tokio"
)))]
compile_error!("enable one transport backend feature: kernel, smoltcp, lwip, vendor or tokio");

#[cfg(feature = "kernel")]
mod selected {
    use super::*;

    pub const BACKEND: &str = "kernel";

    pub type Factory = flint_transport_kernel::KernelFactory;

    /// 内核后端无需外部环境。
    pub fn factory(config: TransportConfig) -> Result<Factory> {
        config_checked(config).map(Factory::new)
    }
}

#[cfg(all(feature = "smoltcp", not(feature = "kernel")))]
mod selected {
    use super::*;
    use flint_transport_smoltcp::{SmolFactory, SmolStack};
    use smoltcp::phy::{Device, Loopback};

    pub const BACKEND: &str = "smoltcp";

    pub type Factory<D = Loopback> = SmolFactory<D>;

    /// 在调用方持有的协议栈上构造工厂；栈由主循环负责 `poll()`。
    pub fn factory<D: Device>(
        stack: SmolStack<D>,
        config: TransportConfig,
    ) -> Result<Factory<D>> {
        config_checked(config).map(|config| SmolFactory::new(stack, config))
    }
}

#[cfg(all(feature = "lwip", not(any(feature = "kernel", feature = "smoltcp"))))]
mod selected {
    use super::*;
    use flint_transport_lwip::{RawFactory, RawTcpStack, SimStack};

    pub const BACKEND: &str = "lwip";

    pub type Factory<S = SimStack> = RawFactory<S>;

    /// 在原始回调栈绑定（或模拟栈）上构造工厂。
    pub fn factory<S: RawTcpStack + 'static>(
        stack: S,
        config: TransportConfig,
    ) -> Result<Factory<S>> {
        config_checked(config).map(|config| RawFactory::new(stack, config))
    }
}

#[cfg(all(
    feature = "vendor",
    not(any(feature = "kernel", feature = "smoltcp", feature = "lwip"))
))]
mod selected {
    use super::*;
    use flint_transport_vendor::{AsyncClient, AsyncServer, VendorFactory};

    pub const BACKEND: &str = "vendor";

    pub type Factory<C, S> = VendorFactory<C, S>;

    /// 以 SDK 对象的构造函数创建工厂。
    pub fn factory<C, S>(
        new_client: impl Fn() -> C + 'static,
        new_server: impl Fn() -> S + 'static,
        config: TransportConfig,
    ) -> Result<Factory<C, S>>
    where
        C: AsyncClient + 'static,
        S: AsyncServer<Client = C> + 'static,
    {
        config_checked(config).map(|config| VendorFactory::new(new_client, new_server, config))
    }
}

#[cfg(all(
    feature = "tokio",
    not(any(
        feature = "kernel",
        feature = "smoltcp",
        feature = "lwip",
        feature = "vendor"
    ))
))]
mod selected {
    use super::*;

    pub const BACKEND: &str = "tokio";

    pub type Factory = flint_transport_tokio::TokioFactory;

    /// 绑定当前 Tokio 运行时；在运行时之外调用返回 `NotReady`。
    pub fn factory(config: TransportConfig) -> Result<Factory> {
        config_checked(config).and_then(Factory::current)
    }
}

pub use selected::{BACKEND, Factory, factory};

const CONFIG: OperationKind = OperationKind::new("flint.config_invalid", "transport config");

fn config_checked(config: TransportConfig) -> Result<TransportConfig> {
    config
        .validate()
        .map_err(|error| TransportError::invalid_argument(CONFIG, error.to_string()))?;
    Ok(config)
}

#[cfg(all(test, feature = "kernel"))]
mod tests {
    use super::*;
    use flint_transport::ErrorKind;

    #[test]
    fn kernel_wins_when_enabled() {
        assert_eq!(BACKEND, "kernel");
    }

    #[test]
    fn invalid_config_is_rejected_before_construction() {
        // 反序列化本身不校验，外部格式加载的配置在门面处被拦下。
        let config: TransportConfig = toml::from_str("snd_buf = 0").expect("well-formed");
        let err = factory(config).expect_err("invalid");
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(err.code(), "flint.config_invalid");
    }
}
