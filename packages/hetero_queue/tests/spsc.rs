//! Cross-thread tests: the two endpoints on separate preemptively
//! scheduled threads, with small blocks so wrap-around and block growth
//! both happen under contention.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use hetero_queue::{HeterogeneousQueue, define_element_interface};

/// Runs a test with a 30-second timeout so a lost wakeup cannot hang the
/// whole test run.
fn with_watchdog<F>(test_fn: F)
where
    F: FnOnce() + Send + 'static,
{
    let (tx, rx) = mpsc::channel();

    let test_handle = thread::spawn(move || {
        test_fn();
        drop(tx.send(()));
    });

    match rx.recv_timeout(Duration::from_secs(30)) {
        Ok(()) => {
            test_handle.join().expect("test thread should not panic");
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            panic!("test exceeded 30-second timeout - likely hanging in dequeue()");
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => match test_handle.join() {
            Ok(()) => panic!("test thread disconnected unexpectedly"),
            Err(e) => std::panic::resume_unwind(e),
        },
    }
}

#[test]
fn ordered_stream_across_threads() {
    with_watchdog(|| {
        const COUNT: u64 = 10_000;

        let mut queue = HeterogeneousQueue::<u64>::builder()
            .initial_capacity(256)
            .build();
        let (mut producer, mut consumer) = queue.split();

        thread::scope(|scope| {
            scope.spawn(move || {
                for value in 0..COUNT {
                    producer.enqueue(value);
                }
            });

            scope.spawn(move || {
                for expected in 0..COUNT {
                    assert_eq!(*consumer.dequeue(), expected);
                }
                assert!(consumer.is_empty());
            });
        });
    });
}

#[test]
fn mixed_payload_sizes_across_threads() {
    // Send as a supertrait makes `dyn Numbered` itself Send, which the
    // queue requires to cross threads.
    trait Numbered: Send {
        fn number(&self) -> u64;
    }

    struct Small(u64);

    struct Large {
        number: u64,
        _bulk: [u64; 13],
    }

    impl Numbered for Small {
        fn number(&self) -> u64 {
            self.0
        }
    }

    impl Numbered for Large {
        fn number(&self) -> u64 {
            self.number
        }
    }

    define_element_interface!(EnqueueNumbered for Numbered);

    with_watchdog(|| {
        const COUNT: u64 = 2_000;

        let mut queue = HeterogeneousQueue::<dyn Numbered>::builder()
            .initial_capacity(192)
            .build();
        let (mut producer, mut consumer) = queue.split();

        thread::scope(|scope| {
            scope.spawn(move || {
                for number in 0..COUNT {
                    if number % 3 == 0 {
                        producer.enqueue(Large {
                            number,
                            _bulk: [0; 13],
                        });
                    } else {
                        producer.enqueue(Small(number));
                    }
                }
            });

            scope.spawn(move || {
                for expected in 0..COUNT {
                    assert_eq!(consumer.dequeue().number(), expected);
                }
            });
        });
    });
}

#[test]
fn every_payload_dropped_exactly_once_across_threads() {
    struct Tracked {
        drops: Arc<AtomicUsize>,
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::Relaxed);
        }
    }

    with_watchdog(|| {
        const COUNT: usize = 1_000;
        const CONSUMED: usize = 400;

        let drops = Arc::new(AtomicUsize::new(0));

        {
            let mut queue = HeterogeneousQueue::<Tracked>::builder()
                .initial_capacity(256)
                .build();
            let (mut producer, mut consumer) = queue.split();

            thread::scope(|scope| {
                let producer_drops = Arc::clone(&drops);
                scope.spawn(move || {
                    for _ in 0..COUNT {
                        producer.enqueue(Tracked {
                            drops: Arc::clone(&producer_drops),
                        });
                    }
                });

                scope.spawn(move || {
                    for _ in 0..CONSUMED {
                        _ = consumer.dequeue();
                    }
                });
            });

            // The consumer advanced past all but the payload it still
            // held when it stopped.
            assert_eq!(drops.load(Ordering::Relaxed), CONSUMED - 1);
        }

        // Dropping the queue drained the rest.
        assert_eq!(drops.load(Ordering::Relaxed), COUNT);
    });
}
