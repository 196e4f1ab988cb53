use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use ingest_api::{PartitionKey, Record};

use crate::config::{BlockPolicy, CapacityUnit};
use crate::error::{QueueError, TryDequeueError};

// ═══════════════════════════════════════════════════════════════
//  BoundedQueue: one partition's FIFO
// ═══════════════════════════════════════════════════════════════

#[derive(Default)]
struct QueueState {
    items: VecDeque<Record>,
    /// Capacity currently used, in the set's unit.
    used: usize,
    closed: bool,
}

#[derive(Default)]
struct BoundedQueue {
    state: Mutex<QueueState>,
    /// Signalled when a dequeue frees capacity (all waiting producers).
    space: Notify,
    /// Signalled when records arrive (the single consumer).
    data: Notify,
}

impl BoundedQueue {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // State is only mutated under short non-panicking sections, a
        // poisoned lock still holds consistent data.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ═══════════════════════════════════════════════════════════════
//  PartitionedQueueSet
// ═══════════════════════════════════════════════════════════════

/// Fixed set of bounded FIFO queues, records routed by partition key.
///
/// Each queue accepts many concurrent producers and is drained by a
/// single consumer. Capacity is enforced at all times: a producer that
/// does not fit waits (see [`BlockPolicy`]) instead of dropping or
/// growing the queue.
///
/// Queue indices passed to the methods below must be `< len()`; an out
/// of range index is a programming error and panics.
pub struct PartitionedQueueSet {
    queues: Vec<BoundedQueue>,
    capacity: usize,
    unit: CapacityUnit,
}

impl PartitionedQueueSet {
    /// # Panics
    ///
    /// Panics if `count` is zero.
    pub fn new(count: usize, capacity: usize, unit: CapacityUnit) -> Self {
        assert!(count > 0, "queue count must be positive");
        Self {
            queues: (0..count).map(|_| BoundedQueue::default()).collect(),
            capacity,
            unit,
        }
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn unit(&self) -> CapacityUnit {
        self.unit
    }

    /// Queue index for a partition key. Fixed for the set's lifetime.
    pub fn route(&self, key: &PartitionKey) -> usize {
        key.slot(self.queues.len())
    }

    fn cost(&self, record: &Record) -> usize {
        match self.unit {
            CapacityUnit::Items => 1,
            CapacityUnit::Bytes => record.size().max(1),
        }
    }

    /// Append `records` to queue `idx`, in order, waiting for capacity
    /// as needed.
    ///
    /// Records are admitted one by one as space frees up, so a large call
    /// may interleave with other producers' records, but never reorders its
    /// own. On `Closed`/`Timeout` the already admitted prefix stays queued
    /// and its length is reported in the error.
    pub async fn enqueue_many(
        &self,
        idx: usize,
        records: Vec<Record>,
        policy: BlockPolicy,
    ) -> Result<(), QueueError> {
        if let Some(size) = records.iter().map(|r| self.cost(r)).find(|c| *c > self.capacity) {
            return Err(QueueError::Oversized { size, capacity: self.capacity });
        }

        let queue = &self.queues[idx];
        let mut pending: VecDeque<Record> = records.into();
        let mut accepted = 0;

        loop {
            // Register before inspecting state: a dequeue between the
            // check and the await must still wake us.
            let space = queue.space.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            {
                let mut state = queue.lock();
                if state.closed {
                    return Err(QueueError::Closed { accepted });
                }

                let before = accepted;
                while let Some(record) = pending.pop_front() {
                    let cost = self.cost(&record);
                    if state.used + cost > self.capacity {
                        pending.push_front(record);
                        break;
                    }
                    state.used += cost;
                    state.items.push_back(record);
                    accepted += 1;
                }
                if accepted > before {
                    queue.data.notify_one();
                }
                if pending.is_empty() {
                    return Ok(());
                }
            }

            match policy {
                BlockPolicy::Forever => space.await,
                BlockPolicy::Timeout(limit) => {
                    if tokio::time::timeout(limit, space).await.is_err() {
                        return Err(QueueError::Timeout { accepted });
                    }
                }
            }
        }
    }

    /// Take up to `max` records from the head of queue `idx` without
    /// waiting. A `max` of zero is treated as one.
    pub fn try_dequeue_many(&self, idx: usize, max: usize) -> Result<Vec<Record>, TryDequeueError> {
        let queue = &self.queues[idx];
        let batch = {
            let mut state = queue.lock();
            if state.items.is_empty() {
                return Err(if state.closed {
                    TryDequeueError::Closed
                } else {
                    TryDequeueError::Empty
                });
            }
            let n = max.max(1).min(state.items.len());
            let batch: Vec<Record> = state.items.drain(..n).collect();
            let freed: usize = batch.iter().map(|r| self.cost(r)).sum();
            state.used -= freed;
            batch
        };
        queue.space.notify_waiters();
        Ok(batch)
    }

    /// Resolves once queue `idx` has records or is closed. May resolve
    /// spuriously; callers re-check with `try_dequeue_many`.
    pub async fn readable(&self, idx: usize) {
        let queue = &self.queues[idx];
        let data = queue.data.notified();
        {
            let state = queue.lock();
            if !state.items.is_empty() || state.closed {
                return;
            }
        }
        data.await;
    }

    /// Release every queue: blocked and future enqueues fail with
    /// `Closed`, consumers see `Closed` once the remaining records are
    /// taken.
    pub fn close(&self) {
        for queue in &self.queues {
            queue.lock().closed = true;
            queue.space.notify_waiters();
            queue.data.notify_one();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.queues.iter().all(|q| q.lock().closed)
    }

    /// Number of records in queue `idx`.
    pub fn depth(&self, idx: usize) -> usize {
        self.queues[idx].lock().items.len()
    }

    /// Capacity used by queue `idx`, in the set's unit.
    pub fn used(&self, idx: usize) -> usize {
        self.queues[idx].lock().used
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    fn rec(key: u64, seq: i64) -> Record {
        Record::new(key, seq, format!("d{key},{seq}"))
    }

    fn keys_and_seqs(batch: &[Record]) -> Vec<(u64, i64)> {
        batch
            .iter()
            .map(|r| match r.key {
                PartitionKey::Id(k) => (k, r.ts_ms),
                PartitionKey::Name(_) => unreachable!(),
            })
            .collect()
    }

    #[test]
    fn test_route_congruent_keys_share_queue() {
        let set = PartitionedQueueSet::new(4, 10, CapacityUnit::Items);
        for k in 0..100u64 {
            assert_eq!(set.route(&PartitionKey::Id(k)), set.route(&PartitionKey::Id(k + 4)));
            assert_eq!(set.route(&PartitionKey::Id(k)), (k % 4) as usize);
        }
    }

    #[tokio::test]
    async fn test_single_call_order_preserved() {
        let set = PartitionedQueueSet::new(1, 1000, CapacityUnit::Items);
        let records: Vec<Record> = (0..50).map(|i| rec(7, i)).collect();
        set.enqueue_many(0, records, BlockPolicy::Forever).await.unwrap();

        let batch = set.try_dequeue_many(0, 1000).unwrap();
        let seqs: Vec<i64> = batch.iter().map(|r| r.ts_ms).collect();
        assert_eq!(seqs, (0..50).collect::<Vec<_>>());
        assert_eq!(set.used(0), 0);
    }

    #[tokio::test]
    async fn test_dequeue_is_capped_by_max() {
        let set = PartitionedQueueSet::new(1, 100, CapacityUnit::Items);
        set.enqueue_many(0, (0..10).map(|i| rec(1, i)).collect(), BlockPolicy::Forever)
            .await
            .unwrap();

        assert_eq!(set.try_dequeue_many(0, 4).unwrap().len(), 4);
        assert_eq!(set.try_dequeue_many(0, 4).unwrap().len(), 4);
        assert_eq!(set.try_dequeue_many(0, 4).unwrap().len(), 2);
        assert_eq!(set.try_dequeue_many(0, 4), Err(TryDequeueError::Empty));
    }

    #[tokio::test]
    async fn test_closed_queue_drains_then_reports_closed() {
        let set = PartitionedQueueSet::new(2, 100, CapacityUnit::Items);
        set.enqueue_many(1, vec![rec(1, 0), rec(1, 1)], BlockPolicy::Forever)
            .await
            .unwrap();
        set.close();

        assert!(set.is_closed());
        assert_eq!(set.try_dequeue_many(0, 10), Err(TryDequeueError::Closed));
        assert_eq!(set.try_dequeue_many(1, 10).unwrap().len(), 2);
        assert_eq!(set.try_dequeue_many(1, 10), Err(TryDequeueError::Closed));

        let err = set.enqueue_many(1, vec![rec(1, 2)], BlockPolicy::Forever).await.unwrap_err();
        assert_eq!(err, QueueError::Closed { accepted: 0 });
    }

    #[tokio::test]
    async fn test_byte_capacity() {
        let set = PartitionedQueueSet::new(1, 25, CapacityUnit::Bytes);
        // "d1,0" style lines are 4 bytes; pad to exactly 10.
        let r = |i: i64| Record::new(1u64, i, format!("{:<10}", i));
        let res = set
            .enqueue_many(0, vec![r(0), r(1), r(2)], BlockPolicy::Timeout(Duration::from_millis(20)))
            .await;
        assert_eq!(res, Err(QueueError::Timeout { accepted: 2 }));
        assert_eq!(set.used(0), 20);
        assert_eq!(set.depth(0), 2);
    }

    #[tokio::test]
    async fn test_oversized_record_rejected_whole() {
        let set = PartitionedQueueSet::new(1, 8, CapacityUnit::Bytes);
        let small = Record::new(1u64, 0, "ok");
        let big = Record::new(1u64, 1, "much too long for the queue");
        let err = set.enqueue_many(0, vec![small, big], BlockPolicy::Forever).await.unwrap_err();

        assert_eq!(err, QueueError::Oversized { size: 27, capacity: 8 });
        assert_eq!(err.accepted(), 0);
        assert_eq!(set.depth(0), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reports_accepted_prefix() {
        let set = PartitionedQueueSet::new(1, 1, CapacityUnit::Items);
        let err = set
            .enqueue_many(0, vec![rec(0, 0), rec(0, 1), rec(0, 2)], BlockPolicy::Timeout(Duration::from_secs(1)))
            .await
            .unwrap_err();

        assert_eq!(err, QueueError::Timeout { accepted: 1 });
        assert_eq!(keys_and_seqs(&set.try_dequeue_many(0, 10).unwrap()), vec![(0, 0)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_full_queue_blocks_until_dequeue() {
        let set = Arc::new(PartitionedQueueSet::new(1, 3, CapacityUnit::Items));

        let producer = {
            let set = set.clone();
            tokio::spawn(async move {
                set.enqueue_many(0, (0..5).map(|i| rec(0, i)).collect(), BlockPolicy::Forever)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!producer.is_finished());
        assert_eq!(set.depth(0), 3);

        let first = set.try_dequeue_many(0, 2).unwrap();
        assert_eq!(keys_and_seqs(&first), vec![(0, 0), (0, 1)]);

        tokio::time::timeout(Duration::from_secs(5), producer)
            .await
            .expect("producer stays blocked")
            .unwrap()
            .unwrap();

        let rest = set.try_dequeue_many(0, 10).unwrap();
        assert_eq!(keys_and_seqs(&rest), vec![(0, 2), (0, 3), (0, 4)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_wakes_blocked_producer() {
        let set = Arc::new(PartitionedQueueSet::new(1, 1, CapacityUnit::Items));
        set.enqueue_many(0, vec![rec(0, 0)], BlockPolicy::Forever).await.unwrap();

        let producer = {
            let set = set.clone();
            tokio::spawn(async move { set.enqueue_many(0, vec![rec(0, 1)], BlockPolicy::Forever).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        set.close();

        let res = tokio::time::timeout(Duration::from_secs(5), producer).await.unwrap().unwrap();
        assert_eq!(res, Err(QueueError::Closed { accepted: 0 }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_readable_wakes_on_enqueue() {
        let set = Arc::new(PartitionedQueueSet::new(2, 10, CapacityUnit::Items));

        let waiter = {
            let set = set.clone();
            tokio::spawn(async move { set.readable(1).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        set.enqueue_many(1, vec![rec(1, 0)], BlockPolicy::Forever).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), waiter).await.unwrap().unwrap();
        assert_eq!(set.depth(1), 1);
        assert_eq!(set.depth(0), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_producers_keep_own_order() {
        let set = Arc::new(PartitionedQueueSet::new(1, 1, CapacityUnit::Items));

        let mut producers = Vec::new();
        for p in 0..2u64 {
            let set = set.clone();
            producers.push(tokio::spawn(async move {
                for chunk in 0..10i64 {
                    let records = (0..5).map(|i| rec(p, chunk * 5 + i)).collect();
                    set.enqueue_many(0, records, BlockPolicy::Forever).await.unwrap();
                }
            }));
        }

        let mut seen: Vec<(u64, i64)> = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while seen.len() < 100 && tokio::time::Instant::now() < deadline {
            match set.try_dequeue_many(0, 3) {
                Ok(batch) => {
                    assert!(set.used(0) <= 1);
                    seen.extend(keys_and_seqs(&batch));
                }
                Err(TryDequeueError::Empty) => {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
                Err(TryDequeueError::Closed) => unreachable!(),
            }
        }
        for p in producers {
            p.await.unwrap();
        }

        assert_eq!(seen.len(), 100);
        for p in 0..2u64 {
            let seqs: Vec<i64> = seen.iter().filter(|(k, _)| *k == p).map(|(_, s)| *s).collect();
            assert_eq!(seqs, (0..50).collect::<Vec<_>>());
        }
    }
}
