use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 与 lwIP 默认 `TCP_SND_BUF`（4 × MSS 1436）一致的发送缓冲大小。
pub const DEFAULT_SND_BUF: usize = 5744;
const DEFAULT_FLUSH_BUDGET_MS: u64 = 50;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_BACKLOG: usize = 4;

/// 配置加载或校验失败。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse transport config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid transport config field `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// 传输后端共享的运行配置。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把散落在各后端中的魔数（冲刷时限 50ms、发送缓冲 `TCP_SND_BUF`、服务端默认 backlog 4）
///   集中为一份可由 TOML 覆盖的配置；
/// - 构建器式 `with_*` 便于在代码中局部调整，未出现在 TOML 中的字段取默认值；
///   有取值约束的字段（`snd_buf`、`flush_budget`）的构建器与 TOML 走同一套校验，返回 `Result`。
///
/// ## 契约（What）
/// - `flush_budget`：`flush()` 自旋的最长时间，必须大于 0；
/// - `connect_timeout`：`Connecting` 状态允许停留的最长时间；
/// - `snd_buf`：后端无法查询真实窗口时使用的名义发送缓冲，也是 `reserve_at_least` 的扣减基准，必须大于 0；
/// - `default_backlog`：`make_server` 未显式指定时的监听队列长度；
/// - `no_delay`：新连接是否默认关闭 Nagle；
/// - `linger`：强制关闭时写入 `SO_LINGER` 的时长，仅内核后端使用。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    flush_budget_ms: u64,
    connect_timeout_ms: u64,
    snd_buf: usize,
    default_backlog: usize,
    no_delay: bool,
    linger_ms: Option<u64>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            flush_budget_ms: DEFAULT_FLUSH_BUDGET_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            snd_buf: DEFAULT_SND_BUF,
            default_backlog: DEFAULT_BACKLOG,
            no_delay: false,
            linger_ms: None,
        }
    }
}

impl TransportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 TOML 文本解析配置并校验。
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_snd_buf(self.snd_buf)?;
        check_flush_budget(self.flush_budget_ms)
    }

    /// 冲刷时限按毫秒保存，不足 1ms 的时长视为 0 而被拒绝。
    pub fn with_flush_budget(mut self, budget: Duration) -> Result<Self, ConfigError> {
        let millis = duration_to_millis(budget);
        check_flush_budget(millis)?;
        self.flush_budget_ms = millis;
        Ok(self)
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = duration_to_millis(timeout);
        self
    }

    pub fn with_snd_buf(mut self, snd_buf: usize) -> Result<Self, ConfigError> {
        check_snd_buf(snd_buf)?;
        self.snd_buf = snd_buf;
        Ok(self)
    }

    pub fn with_default_backlog(mut self, backlog: usize) -> Self {
        self.default_backlog = backlog;
        self
    }

    pub fn with_no_delay(mut self, no_delay: bool) -> Self {
        self.no_delay = no_delay;
        self
    }

    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger_ms = linger.map(duration_to_millis);
        self
    }

    pub fn flush_budget(&self) -> Duration {
        Duration::from_millis(self.flush_budget_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn snd_buf(&self) -> usize {
        self.snd_buf
    }

    pub fn default_backlog(&self) -> usize {
        self.default_backlog
    }

    pub fn no_delay(&self) -> bool {
        self.no_delay
    }

    pub fn linger(&self) -> Option<Duration> {
        self.linger_ms.map(Duration::from_millis)
    }
}

fn check_snd_buf(snd_buf: usize) -> Result<(), ConfigError> {
    if snd_buf == 0 {
        return Err(ConfigError::Invalid {
            field: "snd_buf",
            reason: "must be greater than zero",
        });
    }
    Ok(())
}

fn check_flush_budget(millis: u64) -> Result<(), ConfigError> {
    if millis == 0 {
        return Err(ConfigError::Invalid {
            field: "flush_budget_ms",
            reason: "must be greater than zero",
        });
    }
    Ok(())
}

fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
