/// Defines a typed `enqueue` extension for a `dyn Trait` element universe.
///
/// [`Producer::enqueue`](crate::Producer::enqueue) is only available when
/// the element interface is a concrete type. For a trait-object interface
/// the producer offers [`enqueue_as`](crate::Producer::enqueue_as), which
/// needs the unsizing projection spelled out at each call site. This macro
/// generates a local extension trait that captures the projection once, so
/// call sites read the same as the concrete-type case:
///
/// ```rust
/// use std::fmt::Display;
///
/// use hetero_queue::{HeterogeneousQueue, define_element_interface};
///
/// define_element_interface!(EnqueueDisplay for Display);
///
/// let mut queue = HeterogeneousQueue::<dyn Display>::builder().build();
/// let (mut producer, mut consumer) = queue.split();
///
/// producer.enqueue(7_u32);
/// producer.enqueue("seven");
///
/// assert_eq!(consumer.dequeue().to_string(), "7");
/// assert_eq!(consumer.dequeue().to_string(), "seven");
/// ```
///
/// The generated trait is local to the calling crate (a blanket
/// implementation of a queue trait for every `U: Trait` would fall foul of
/// the orphan rule), which also means it can be given any visibility:
/// `define_element_interface!(pub EnqueueShape for Shape);`.
#[macro_export]
macro_rules! define_element_interface {
    ($vis:vis $name:ident for $interface:path) => {
        /// Typed enqueue for one `dyn Trait` element universe.
        $vis trait $name {
            /// Constructs `value` in place inside the queue's storage and
            /// publishes it under the trait-object interface.
            fn enqueue<U>(&mut self, value: U)
            where
                U: $interface + Send + 'static;
        }

        impl $name for $crate::Producer<'_, dyn $interface> {
            fn enqueue<U>(&mut self, value: U)
            where
                U: $interface + Send + 'static,
            {
                self.enqueue_as(value, |value| {
                    let element: &dyn $interface = value;
                    element
                });
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::HeterogeneousQueue;

    trait Tagged {
        fn tag(&self) -> u64;
    }

    struct Narrow(u64);
    struct Wide {
        tag: u64,
        _fill: [u64; 9],
    }

    impl Tagged for Narrow {
        fn tag(&self) -> u64 {
            self.0
        }
    }

    impl Tagged for Wide {
        fn tag(&self) -> u64 {
            self.tag
        }
    }

    define_element_interface!(EnqueueTagged for Tagged);

    #[test]
    fn generated_enqueue_handles_mixed_sizes() {
        let mut queue = HeterogeneousQueue::<dyn Tagged>::builder()
            .initial_capacity(256)
            .build();
        let (mut producer, mut consumer) = queue.split();

        producer.enqueue(Narrow(1));
        producer.enqueue(Wide {
            tag: 2,
            _fill: [0; 9],
        });
        producer.enqueue(Narrow(3));

        assert_eq!(consumer.dequeue().tag(), 1);
        assert_eq!(consumer.dequeue().tag(), 2);
        assert_eq!(consumer.dequeue().tag(), 3);
        assert!(consumer.is_empty());
    }
}
