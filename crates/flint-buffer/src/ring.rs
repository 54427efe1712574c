use thiserror::Error;

/// 首次分配时的最小容量。
pub const MIN_CAPACITY: usize = 32;

/// 预留缓冲扩容失败。
///
/// 目标容量超出地址空间或分配器拒绝时返回；缓冲内容保持不变。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("ring buffer cannot grow to hold {requested} bytes")]
pub struct ReserveError {
    requested: usize,
}

impl ReserveError {
    /// 触发失败的目标容量。
    pub fn requested(&self) -> usize {
        self.requested
    }
}

/// 按需倍增、单次回绕的环形字节队列。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 作为连接写路径的“预留缓冲”，吸收发送窗口暂时放不下的字节，
///   让 `write` 始终可以整块接收调用方数据；
/// - 只暴露线性段访问，使各后端的排空循环无需关心回绕，也无需额外分配。
///
/// ## 逻辑（How）
/// - 内部 `data.len()` 即容量，始终为 2 的幂（未分配时为 0，首次分配不少于 [`MIN_CAPACITY`]）；
/// - `start` 指向队首，`size` 为已存字节数，尾部位置为 `(start + size) & (capacity - 1)`；
/// - 扩容前先 `linearize` 把内容旋转到下标 0，再整体加倍，旧数据原样保留在前部。
///
/// ## 契约（What）
/// - 不变式：`size <= capacity`，且 `start < capacity`（未分配时 `start == 0`）；
/// - `reserve` 从不缩容，也不改变 `len()`；
/// - 出队的字节不会被清零，仅移动游标。
///
/// ## 注意事项（Trade-offs）
/// - 倍增策略可能让容量最多浪费一半，换来均摊 O(1) 的追加；
/// - 缓冲从不收缩，生命周期随所属连接结束。
#[derive(Clone, Debug, Default)]
pub struct RingBuffer {
    data: Vec<u8>,
    start: usize,
    size: usize,
}

impl RingBuffer {
    /// 创建未分配的空缓冲。
    pub const fn new() -> Self {
        Self {
            data: Vec::new(),
            start: 0,
            size: 0,
        }
    }

    /// 创建至少能容纳 `capacity` 字节的缓冲。
    pub fn with_capacity(capacity: usize) -> Result<Self, ReserveError> {
        let mut buffer = Self::new();
        buffer.reserve(capacity)?;
        Ok(buffer)
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// 不触发扩容即可追加的字节数。
    pub fn spare_capacity(&self) -> usize {
        self.capacity() - self.size
    }

    /// 确保容量不小于 `min_capacity`。
    ///
    /// 需要扩容时先线性化，再从当前容量（至少 [`MIN_CAPACITY`]）开始倍增直到满足要求。
    /// 失败时缓冲保持原样。
    pub fn reserve(&mut self, min_capacity: usize) -> Result<(), ReserveError> {
        let capacity = self.capacity();
        if min_capacity <= capacity {
            return Ok(());
        }
        let error = ReserveError {
            requested: min_capacity,
        };
        let target = min_capacity
            .max(MIN_CAPACITY)
            .checked_next_power_of_two()
            .ok_or(error)?;

        self.linearize();
        self.data
            .try_reserve_exact(target - capacity)
            .map_err(|_| error)?;
        self.data.resize(target, 0);
        Ok(())
    }

    /// 追加 `bytes` 到队尾，空间不足时自动扩容。
    pub fn push_back(&mut self, bytes: &[u8]) -> Result<(), ReserveError> {
        if bytes.is_empty() {
            return Ok(());
        }
        let required = self.size.checked_add(bytes.len()).ok_or(ReserveError {
            requested: usize::MAX,
        })?;
        self.reserve(required)?;

        let capacity = self.capacity();
        let tail = (self.start + self.size) & (capacity - 1);
        let first = bytes.len().min(capacity - tail);
        self.data[tail..tail + first].copy_from_slice(&bytes[..first]);
        let rest = bytes.len() - first;
        if rest > 0 {
            self.data[..rest].copy_from_slice(&bytes[first..]);
        }
        self.size += bytes.len();
        Ok(())
    }

    /// 查看队首的连续字节段，长度为 `min(max_len, capacity - start, len)`，不移动游标。
    pub fn peek_front_linear(&self, max_len: usize) -> &[u8] {
        let run = self.front_run(max_len);
        &self.data[self.start..self.start + run]
    }

    /// 取出队首的连续字节段并推进游标。
    ///
    /// 返回的切片仍指向内部存储，在下一次修改前有效。
    pub fn pop_front_linear(&mut self, max_len: usize) -> &[u8] {
        let run = self.front_run(max_len);
        let begin = self.start;
        self.advance(run);
        &self.data[begin..begin + run]
    }

    /// 丢弃队首 `n` 字节（超过 `len()` 时按 `len()` 计），返回实际丢弃量。
    ///
    /// 与 `peek_front_linear` 配合使用：先查看，交给传输层后只提交被接受的部分。
    pub fn consume(&mut self, n: usize) -> usize {
        let mut remaining = n.min(self.size);
        let consumed = remaining;
        while remaining > 0 {
            let run = self.front_run(remaining);
            self.advance(run);
            remaining -= run;
        }
        consumed
    }

    pub fn clear(&mut self) {
        self.start = 0;
        self.size = 0;
    }

    /// 将内容旋转到下标 0，使 `start == 0`。
    fn linearize(&mut self) {
        if self.start != 0 {
            self.data.rotate_left(self.start);
            self.start = 0;
        }
    }

    fn front_run(&self, max_len: usize) -> usize {
        max_len.min(self.capacity() - self.start).min(self.size)
    }

    fn advance(&mut self, run: usize) {
        if run == 0 {
            return;
        }
        self.start = (self.start + run) & (self.capacity() - 1);
        self.size -= run;
    }
}
