//! `RingBuffer` 性质测试：以 `VecDeque` 作为影子模型验证 FIFO 律与容量不变式。
//!
//! # 测试总览（Why）
//! - 任意 push/pop/reserve 交错序列下，出队字节序必须与影子模型完全一致，扩容不得丢失或重排数据；
//! - 每一步之后容量要么为 0，要么是不小于 32 的 2 的幂，且 `len() <= capacity()`；
//! - `reserve(n)` 之后容量至少为 `n`，且不改变已存字节数。

use std::collections::VecDeque;

use flint_buffer::{MIN_CAPACITY, RingBuffer};
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
    Push(Vec<u8>),
    Pop(usize),
    Reserve(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => proptest::collection::vec(any::<u8>(), 0..96).prop_map(Op::Push),
        2 => (0usize..80).prop_map(Op::Pop),
        1 => (0usize..300).prop_map(Op::Reserve),
    ]
}

fn assert_capacity_invariant(buffer: &RingBuffer) {
    let capacity = buffer.capacity();
    assert!(buffer.len() <= capacity);
    if capacity != 0 {
        assert!(capacity.is_power_of_two(), "capacity {capacity} not a power of two");
        assert!(capacity >= MIN_CAPACITY);
    }
}

proptest! {
    #[test]
    fn prop_fifo_law_holds_under_growth(ops in proptest::collection::vec(op(), 1..64)) {
        let mut buffer = RingBuffer::new();
        let mut model = VecDeque::new();

        for op in ops {
            match op {
                Op::Push(bytes) => {
                    buffer.push_back(&bytes).expect("push_back");
                    model.extend(bytes);
                }
                Op::Pop(max_len) => {
                    let run = buffer.pop_front_linear(max_len).to_vec();
                    prop_assert!(run.len() <= max_len);
                    let expected: Vec<u8> = model.drain(..run.len()).collect();
                    prop_assert_eq!(run, expected);
                }
                Op::Reserve(n) => {
                    let before = buffer.len();
                    buffer.reserve(n).expect("reserve");
                    prop_assert!(buffer.capacity() >= n);
                    prop_assert_eq!(buffer.len(), before);
                }
            }
            assert_capacity_invariant(&buffer);
            prop_assert_eq!(buffer.len(), model.len());
        }

        let mut rest = Vec::new();
        while !buffer.is_empty() {
            let run = buffer.pop_front_linear(usize::MAX);
            prop_assert!(!run.is_empty());
            rest.extend_from_slice(run);
        }
        prop_assert_eq!(rest, model.into_iter().collect::<Vec<_>>());
    }

    #[test]
    fn prop_peek_then_consume_matches_pop(data in proptest::collection::vec(any::<u8>(), 1..200), step in 1usize..50) {
        let mut peeked = RingBuffer::new();
        let mut popped = RingBuffer::new();
        peeked.push_back(&data).expect("push");
        popped.push_back(&data).expect("push");

        while !peeked.is_empty() {
            let view = peeked.peek_front_linear(step).to_vec();
            peeked.consume(view.len());
            prop_assert_eq!(view, popped.pop_front_linear(step).to_vec());
        }
        prop_assert!(popped.is_empty());
    }
}
