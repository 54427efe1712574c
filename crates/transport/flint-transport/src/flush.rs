use std::time::{Duration, Instant};

use crate::error::Result;

/// 在时限内反复执行 `step`，直到其报告“已冲刷完毕”。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - `flush()` 是契约中唯一允许等待的操作，但等待必须有界（默认 50ms），
///   防止单个慢连接拖住整个协作式主循环；
/// - 各后端只需提供一步“输出 + 排空 + 检查”的闭包，计时与让出逻辑在此统一。
///
/// ## 契约（What）
/// - `step` 至少执行一次，即使 `budget` 为零；
/// - `step` 返回 `Ok(true)` 时立即返回 `Ok(true)`；超时返回 `Ok(false)`；
/// - `step` 的错误原样向上传播。
pub fn flush_with_budget<F>(budget: Duration, mut step: F) -> Result<bool>
where
    F: FnMut() -> Result<bool>,
{
    let started = Instant::now();
    loop {
        if step()? {
            return Ok(true);
        }
        if started.elapsed() >= budget {
            return Ok(false);
        }
        std::thread::yield_now();
    }
}
