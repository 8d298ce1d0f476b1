//! Bounded producer/consumer plumbing for import stages.
//!
//! Producers block on a full queue and consumers block on an empty,
//! not-yet-finished queue, so a fast reader never outruns memory and a
//! fast worker never spins. The queue finishes when every producer handle
//! is dropped; consumers then drain the remainder and stop.

use crossbeam_channel::{bounded, Receiver, Sender};

/// Create a bounded work queue with the given depth.
pub fn work_queue<T>(depth: usize) -> (WorkProducer<T>, WorkConsumer<T>) {
    let (tx, rx) = bounded(depth);
    (WorkProducer { tx }, WorkConsumer { rx })
}

/// Sending half of a work queue. Dropping the last producer finishes the
/// queue.
pub struct WorkProducer<T> {
    tx: Sender<T>,
}

impl<T> WorkProducer<T> {
    /// Push one item, blocking while the queue is full. Returns false if
    /// every consumer is gone.
    pub fn push(&self, item: T) -> bool {
        self.tx.send(item).is_ok()
    }
}

impl<T> Clone for WorkProducer<T> {
    fn clone(&self) -> Self {
        WorkProducer {
            tx: self.tx.clone(),
        }
    }
}

/// Receiving half of a work queue.
pub struct WorkConsumer<T> {
    rx: Receiver<T>,
}

impl<T> WorkConsumer<T> {
    /// Pop one item, blocking while the queue is empty but unfinished.
    /// Returns `None` once the queue is finished and drained.
    pub fn pop(&self) -> Option<T> {
        self.rx.recv().ok()
    }
}

impl<T> Clone for WorkConsumer<T> {
    fn clone(&self) -> Self {
        WorkConsumer {
            rx: self.rx.clone(),
        }
    }
}

/// Fixed-size worker pool over a bounded queue.
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> WorkerPool {
        WorkerPool {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `produce` on its own thread and `job` on every worker until
    /// the queue is finished and drained. Blocks until all work is done.
    ///
    /// Results travel through whatever shared state `job` captures;
    /// workers run unordered, so order-sensitive callers tag items with
    /// a sequence number.
    pub fn run<T, P, F>(&self, depth: usize, produce: P, job: F)
    where
        T: Send,
        P: FnOnce(&WorkProducer<T>) + Send,
        F: Fn(T) + Send + Sync,
    {
        let (producer, consumer) = work_queue(depth);

        std::thread::scope(|scope| {
            scope.spawn(move || {
                produce(&producer);
            });

            for _ in 0..self.workers {
                let consumer = consumer.clone();
                let job = &job;
                scope.spawn(move || {
                    while let Some(item) = consumer.pop() {
                        job(item);
                    }
                });
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::BTreeSet;

    #[test]
    fn test_queue_drains_after_producer_drop() {
        let (producer, consumer) = work_queue(4);
        producer.push(1);
        producer.push(2);
        drop(producer);

        assert_eq!(consumer.pop(), Some(1));
        assert_eq!(consumer.pop(), Some(2));
        assert_eq!(consumer.pop(), None);
    }

    #[test]
    fn test_pool_processes_every_item() {
        let seen = Mutex::new(BTreeSet::new());
        let pool = WorkerPool::new(4);

        pool.run(
            8,
            |producer| {
                for item in 0..1000u32 {
                    producer.push(item);
                }
            },
            |item| {
                seen.lock().insert(item);
            },
        );

        assert_eq!(seen.lock().len(), 1000);
    }

    #[test]
    fn test_pool_backpressure_with_tiny_queue() {
        // Queue depth 1 forces the producer to block between items; all
        // items still arrive.
        let count = Mutex::new(0u32);
        let pool = WorkerPool::new(1);

        pool.run(
            1,
            |producer| {
                for item in 0..100u32 {
                    producer.push(item);
                }
            },
            |_item| {
                *count.lock() += 1;
            },
        );

        assert_eq!(*count.lock(), 100);
    }

    #[test]
    fn test_pool_clamps_zero_workers() {
        assert_eq!(WorkerPool::new(0).workers(), 1);
    }
}
