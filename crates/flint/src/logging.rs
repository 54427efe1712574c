//! 日志引导。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 各后端只通过 `tracing` 宏产出结构化事件，是否输出、输出到哪里由宿主决定；
//!   本模块为没有自建订阅者的宿主提供一键安装的默认方案。
//!
//! ## 逻辑（How）
//! - 组装 `registry + EnvFilter + fmt` 三层：过滤规则取自 `RUST_LOG`，缺省为 `info`；
//!   每个后端的事件目标即其模块路径（如 `flint_transport_lwip::socket`），可单独调节；
//! - 安装结果记录在进程级 `OnceLock` 中。
//!
//! ## 契约（What）
//! - 首次成功后再次调用返回 [`InitError::AlreadyInitialized`]；
//! - 宿主已设置全局订阅者时返回 [`InitError::SubscriberAlreadySet`]，绝不覆盖。

use std::sync::OnceLock;

use thiserror::Error;
use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

static INSTALLED: OnceLock<()> = OnceLock::new();

#[derive(Debug, Error)]
pub enum InitError {
    #[error("flint logging is already initialized")]
    AlreadyInitialized,
    #[error("a global tracing subscriber is already set")]
    SubscriberAlreadySet,
    #[error("failed to set the global tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

pub fn init() -> Result<(), InitError> {
    if INSTALLED.get().is_some() {
        return Err(InitError::AlreadyInitialized);
    }
    if dispatcher::has_been_set() {
        return Err(InitError::SubscriberAlreadySet);
    }

    let subscriber = tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer());
    tracing::subscriber::set_global_default(subscriber)?;
    INSTALLED
        .set(())
        .map_err(|_| InitError::AlreadyInitialized)
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
