//! `BackpressureQueue` 守恒性质测试。
//!
//! # 测试总览（Why）
//! - 任意写入与窗口开合序列下，“已交给传输层的字节 + 预留缓冲中的字节”恒等于调用方写入总量；
//! - 传输层观察到的字节序与调用方写入顺序一致；
//! - 每次写入后 `available_for_write` 精确等于“剩余窗口 + 缓冲剩余容量”，排空事件使缓冲恰好减少被排空的量。

use flint_transport::{BackpressureQueue, Result, SendWindow};
use proptest::prelude::*;

/// 记录所有下发字节的模拟窗口，`open` 由测试驱动。
#[derive(Default)]
struct Wire {
    open: usize,
    delivered: Vec<u8>,
}

impl SendWindow for Wire {
    fn headroom(&self) -> usize {
        self.open
    }

    fn transmit(&mut self, data: &[u8], _more: bool) -> Result<usize> {
        let n = data.len().min(self.open);
        self.open -= n;
        self.delivered.extend_from_slice(&data[..n]);
        Ok(n)
    }
}

#[derive(Clone, Debug)]
enum Step {
    Write(Vec<u8>),
    Ack(usize),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        proptest::collection::vec(any::<u8>(), 0..120).prop_map(Step::Write),
        (0usize..64).prop_map(Step::Ack),
    ]
}

proptest! {
    #[test]
    fn prop_in_flight_bytes_are_conserved(initial in 0usize..40, steps in proptest::collection::vec(step(), 1..40)) {
        let mut queue = BackpressureQueue::new(32);
        let mut wire = Wire { open: initial, delivered: Vec::new() };
        let mut written = Vec::new();

        for step in steps {
            match step {
                Step::Write(data) => {
                    queue.write(&mut wire, &data).expect("write");
                    written.extend_from_slice(&data);
                    prop_assert_eq!(
                        queue.available_for_write(wire.headroom()),
                        wire.headroom() + queue.reserve_capacity() - queue.buffered()
                    );
                }
                Step::Ack(n) => {
                    wire.open += n;
                    let before = queue.buffered();
                    let delivered_before = wire.delivered.len();
                    queue.drain(&mut wire).expect("drain");
                    prop_assert_eq!(before - queue.buffered(), wire.delivered.len() - delivered_before);
                }
            }
            prop_assert_eq!(wire.delivered.len() + queue.buffered(), written.len());
            prop_assert_eq!(&wire.delivered[..], &written[..wire.delivered.len()]);
        }
    }
}

/// 传输层每次只接受 10 字节时，100 字节写入按 10 字节增量、按原序全部送达。
#[test]
fn oversized_write_drains_in_window_sized_steps() {
    let mut queue = BackpressureQueue::new(10);
    let mut wire = Wire { open: 10, delivered: Vec::new() };
    let payload: Vec<u8> = (0..100).collect();

    queue.ensure_capacity(100, wire.headroom()).expect("ensure");
    let before = queue.available_for_write(wire.headroom());
    queue.write(&mut wire, &payload).expect("write");
    assert_eq!(before - queue.available_for_write(wire.headroom()), 100);

    let mut rounds = 0;
    while !queue.is_empty() {
        wire.open = 10;
        let delivered = wire.delivered.len();
        queue.drain(&mut wire).expect("drain");
        assert_eq!(wire.delivered.len() - delivered, 10);
        rounds += 1;
    }
    assert_eq!(rounds, 9);
    assert_eq!(wire.delivered, payload);
}
