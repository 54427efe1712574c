use std::collections::VecDeque;

use bytes::{Buf, Bytes};

/// 接收方向的零拷贝分片链。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 协议栈在回调中一次交付一段 `Bytes`，连接只需把它挂到链尾，无需拷贝；
/// - 读取时按序复制到调用方缓冲，读尽的分片立刻释放，内存占用与未读数据成正比。
///
/// ## 契约（What）
/// - `len()` 恒等于所有未读字节之和；
/// - `read_into`/`discard`/`clear` 返回实际消费的字节数，后端据此向协议栈归还接收窗口。
#[derive(Debug, Default)]
pub struct ChunkQueue {
    chunks: VecDeque<Bytes>,
    len: usize,
}

impl ChunkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 挂接一段新数据；空分片被忽略。
    pub fn push(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        self.len += chunk.len();
        self.chunks.push_back(chunk);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// 按序复制到 `dst`，返回复制的字节数。
    pub fn read_into(&mut self, dst: &mut [u8]) -> usize {
        let mut copied = 0;
        while copied < dst.len() {
            let Some(head) = self.chunks.front_mut() else {
                break;
            };
            let n = head.len().min(dst.len() - copied);
            dst[copied..copied + n].copy_from_slice(&head[..n]);
            copied += n;
            self.advance_head(n);
        }
        copied
    }

    /// 丢弃最多 `n` 字节，返回实际丢弃量。
    pub fn discard(&mut self, n: usize) -> usize {
        let mut dropped = 0;
        while dropped < n {
            let Some(head) = self.chunks.front() else {
                break;
            };
            let step = head.len().min(n - dropped);
            dropped += step;
            self.advance_head(step);
        }
        dropped
    }

    /// 丢弃全部未读数据，返回丢弃量。
    pub fn clear(&mut self) -> usize {
        let dropped = self.len;
        self.chunks.clear();
        self.len = 0;
        dropped
    }

    fn advance_head(&mut self, n: usize) {
        self.len -= n;
        if let Some(head) = self.chunks.front_mut() {
            if n == head.len() {
                self.chunks.pop_front();
            } else {
                head.advance(n);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_span_chunks_and_release_consumed_links() {
        let mut queue = ChunkQueue::new();
        queue.push(Bytes::from_static(b"PI"));
        queue.push(Bytes::new());
        queue.push(Bytes::from_static(b"NG!"));
        assert_eq!(queue.len(), 5);
        assert_eq!(queue.chunk_count(), 2);

        let mut out = [0u8; 3];
        assert_eq!(queue.read_into(&mut out), 3);
        assert_eq!(&out, b"PIN");
        assert_eq!(queue.chunk_count(), 1);

        let mut rest = [0u8; 8];
        assert_eq!(queue.read_into(&mut rest), 2);
        assert_eq!(&rest[..2], b"G!");
        assert!(queue.is_empty());
        assert_eq!(queue.read_into(&mut rest), 0);
    }

    #[test]
    fn discard_and_clear_report_dropped_bytes() {
        let mut queue = ChunkQueue::new();
        queue.push(Bytes::from_static(b"abc"));
        queue.push(Bytes::from_static(b"defg"));
        assert_eq!(queue.discard(4), 4);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.clear(), 3);
        assert_eq!(queue.discard(1), 0);
    }
}
