use flint_buffer::RingBuffer;
use tracing::{debug, trace};

use crate::error::Result;

/// 后端发送窗口的最小抽象。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 各协议栈对“还能发多少”的表达不同：原始回调栈有 `tcp_sndbuf`，smoltcp 有
///   `send_capacity - send_queue`，厂商客户端有 `space()`，内核套接字只能从短写推断；
///   本 trait 把它们收敛为 `headroom` + `transmit` 两个动作；
/// - 写入与排空策略因此只需在 [`BackpressureQueue`] 中实现一次，所有后端行为一致。
///
/// ## 契约（What）
/// - `headroom`：当前可直接交给传输层的字节数，`0` 表示窗口已满；
/// - `transmit`：把 `data` 交给传输层，返回实际接受的字节数；接受量小于 `data.len()`
///   视为“窗口已满，停止排空”，而非错误；`more` 为 `true` 表示后面还有数据（不设置 PSH）；
/// - 只有不可恢复的故障才返回 `Err`，此时连接应转入 `Closed`。
pub trait SendWindow {
    fn headroom(&self) -> usize;

    fn transmit(&mut self, data: &[u8], more: bool) -> Result<usize>;
}

/// 写路径的预留缓冲与排空策略。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - `write` 必须整块接收调用方数据：发送窗口放得下的部分直接下发，其余进入环形预留缓冲，
///   待窗口增长（ACK 回调、`tick`、`flush`）时再按序排空；
/// - 通过集中实现，保证“字节顺序与调用顺序一致”“传输层 + 缓冲中的在途字节守恒”两条性质。
///
/// ## 逻辑（How）
/// 1. `write` 先尝试排空已有缓冲；
/// 2. 缓冲为空时直接下发 `min(headroom, len)`，未被接受的剩余部分追加到缓冲；
/// 3. 缓冲非空时整块追加，绝不越过缓冲中的旧数据；
/// 4. `drain` 每轮只查看长度不超过 `headroom` 的线性段，交付后仅提交实际被接受的部分。
///
/// ## 契约（What）
/// - `available_for_write(headroom) = headroom + 缓冲剩余容量`；
/// - `reserve_at_least(n)`：软提示，`n` 超出名义发送缓冲时把缓冲容量预扩到 `n - snd_buf`；
/// - `ensure_capacity(n, headroom)`：硬保证，返回 `Ok` 后 `available_for_write(headroom) >= n`。
///
/// ## 注意事项（Trade-offs）
/// - 缓冲只增不减，突发写入后的内存不会归还，换取稳定态零分配。
#[derive(Debug)]
pub struct BackpressureQueue {
    reserve: RingBuffer,
    snd_buf: usize,
}

impl BackpressureQueue {
    /// `snd_buf` 为后端的名义发送缓冲大小。
    pub fn new(snd_buf: usize) -> Self {
        Self {
            reserve: RingBuffer::new(),
            snd_buf,
        }
    }

    /// 尚在缓冲中、未交给传输层的字节数。
    pub fn buffered(&self) -> usize {
        self.reserve.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reserve.is_empty()
    }

    pub fn reserve_capacity(&self) -> usize {
        self.reserve.capacity()
    }

    pub fn available_for_write(&self, headroom: usize) -> usize {
        headroom.saturating_add(self.reserve.spare_capacity())
    }

    /// 整块接收 `data`，返回本次直接交给传输层的字节数。
    pub fn write<W>(&mut self, window: &mut W, data: &[u8]) -> Result<usize>
    where
        W: SendWindow + ?Sized,
    {
        self.drain(window)?;
        if data.is_empty() {
            return Ok(0);
        }

        if !self.reserve.is_empty() {
            trace!(len = data.len(), buffered = self.reserve.len(), "append behind buffered bytes");
            self.reserve.push_back(data)?;
            return Ok(0);
        }

        let to_write = window.headroom().min(data.len());
        let written = if to_write > 0 {
            window.transmit(&data[..to_write], to_write != data.len())?
        } else {
            0
        };
        if written < data.len() {
            trace!(written, rest = data.len() - written, "buffer remainder");
            self.reserve.push_back(&data[written..])?;
        }
        Ok(written)
    }

    /// 在窗口允许的范围内排空缓冲，返回缓冲是否已空。
    pub fn drain<W>(&mut self, window: &mut W) -> Result<bool>
    where
        W: SendWindow + ?Sized,
    {
        while !self.reserve.is_empty() {
            let headroom = window.headroom();
            if headroom == 0 {
                return Ok(false);
            }
            let run = self.reserve.peek_front_linear(headroom);
            let len = run.len();
            let more = len < self.reserve.len();
            let accepted = window.transmit(run, more)?;
            self.reserve.consume(accepted);
            trace!(accepted, buffered = self.reserve.len(), "drained");
            if accepted != len {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn reserve_at_least(&mut self, size: usize) -> Result<()> {
        if size <= self.snd_buf {
            return Ok(());
        }
        let wanted = size - self.snd_buf;
        if wanted > self.reserve.capacity() {
            debug!(size, capacity = self.reserve.capacity(), "reserve_at_least grows buffer");
        }
        self.reserve.reserve(wanted)?;
        Ok(())
    }

    pub fn ensure_capacity(&mut self, size: usize, headroom: usize) -> Result<()> {
        if size <= self.available_for_write(headroom) {
            return Ok(());
        }
        let spare_needed = size - headroom;
        let target = self.reserve.len().saturating_add(spare_needed);
        debug!(size, headroom, capacity = self.reserve.capacity(), "ensure_capacity grows buffer");
        self.reserve.reserve(target)?;
        Ok(())
    }

    /// 丢弃全部缓冲数据（中止连接时使用），返回丢弃量。
    pub fn clear(&mut self) -> usize {
        let dropped = self.reserve.len();
        self.reserve.clear();
        dropped
    }
}
