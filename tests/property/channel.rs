//! Property tests for the bounded SPSC channel.

use std::collections::VecDeque;

use crossbeam_utils::Backoff;
use proptest::prelude::*;

use pipekit::channel::{bounded, TrySendError};

#[derive(Clone, Debug)]
enum Op {
    Send(u64),
    Recv,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![any::<u64>().prop_map(Op::Send), Just(Op::Recv)]
}

proptest! {
    /// Single-thread model check: the channel behaves like a FIFO with a
    /// capacity-bounded shared segment and a swap-drained cache segment.
    #[test]
    fn fifo_and_capacity_under_random_ops(
        ops in proptest::collection::vec(op_strategy(), 0..400),
        cap in 1usize..8,
    ) {
        let (mut tx, mut rx) = bounded::<u64>(cap);
        let mut shared: VecDeque<u64> = VecDeque::new();
        let mut cache: VecDeque<u64> = VecDeque::new();

        for op in ops {
            match op {
                Op::Send(v) => match tx.try_send(v) {
                    Ok(()) => {
                        prop_assert!(shared.len() < cap, "push accepted past capacity");
                        shared.push_back(v);
                    }
                    Err(TrySendError::Busy(returned)) => {
                        prop_assert_eq!(returned, v);
                        // Uncontended lock: Busy can only mean full.
                        prop_assert_eq!(shared.len(), cap);
                    }
                    Err(TrySendError::Closed(_)) => {
                        prop_assert!(false, "channel never closes in this test");
                    }
                },
                Op::Recv => {
                    if cache.is_empty() {
                        cache.append(&mut shared);
                    }
                    let expected = cache.pop_front();
                    prop_assert_eq!(rx.try_recv(), expected);
                }
            }
        }
    }

    /// If the queue has been drained and nothing contends the lock,
    /// `try_send` succeeds within a bounded number of attempts.
    #[test]
    fn try_send_liveness_after_drain(cap in 1usize..8) {
        let (mut tx, mut rx) = bounded::<u64>(cap);
        for i in 0..cap as u64 {
            prop_assert!(tx.try_send(i).is_ok());
        }
        // One recv swaps the whole buffer out, freeing all capacity.
        prop_assert!(rx.recv().is_some());

        let backoff = Backoff::new();
        let mut sent = false;
        for _ in 0..64 {
            match tx.try_send(1_000) {
                Ok(()) => {
                    sent = true;
                    break;
                }
                Err(TrySendError::Busy(_)) => backoff.snooze(),
                Err(TrySendError::Closed(_)) => break,
            }
        }
        prop_assert!(sent);
    }

    /// Consumer closes; the very next blocking send observes it.
    #[test]
    fn consumer_close_stops_producer_within_bounded_attempts(cap in 1usize..8) {
        let (mut tx, mut rx) = bounded::<u64>(cap);
        for i in 0..cap as u64 {
            prop_assert!(tx.send(i).is_ok());
        }
        rx.close();

        prop_assert!(tx.send(99).is_err());
        prop_assert!(tx.is_closed());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Producer sends `n` values and hangs up; the consumer receives exactly
    /// those values, in order, then the terminal empty.
    #[test]
    fn graceful_close_delivers_everything(n in 0usize..200, cap in 1usize..8) {
        let (mut tx, mut rx) = bounded::<usize>(cap);

        let producer = std::thread::spawn(move || {
            for i in 0..n {
                assert!(tx.send(i).is_ok());
            }
        });

        let mut received = Vec::with_capacity(n);
        while let Some(v) = rx.recv() {
            received.push(v);
        }
        producer.join().unwrap();

        prop_assert_eq!(received, (0..n).collect::<Vec<_>>());
        prop_assert!(rx.is_closed());
        prop_assert_eq!(rx.recv(), None);
    }
}
