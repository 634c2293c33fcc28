use std::collections::VecDeque;
use std::sync::Mutex;

use futures_util::Stream;
use thiserror::Error;
use tokio::sync::Notify;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("work queue is already completed")]
    Closed,
    #[error("work queue was completed twice")]
    AlreadyCompleted,
}

/// Unbounded multi-producer FIFO with an explicit end-of-input signal.
///
/// Consumers block in [`WorkQueue::pop`] until an item arrives or the queue is
/// both completed and empty.
#[derive(Debug)]
pub struct WorkQueue<T> {
    state: Mutex<State<T>>,
    notify: Notify,
}

#[derive(Debug)]
struct State<T> {
    items: VecDeque<T>,
    closed: bool,
    total_added: u64,
    last_added: Option<T>,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                closed: false,
                total_added: 0,
                last_added: None,
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add(&self, item: T) -> Result<(), QueueError>
    where
        T: Clone,
    {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(QueueError::Closed);
            }
            state.total_added += 1;
            state.last_added = Some(item.clone());
            state.items.push_back(item);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Signals that no more items will be added.
    pub fn complete(&self) -> Result<(), QueueError> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(QueueError::AlreadyCompleted);
            }
            state.closed = true;
        }
        self.notify.notify_waiters();
        Ok(())
    }

    /// Next item in FIFO order, or `None` once the queue is completed and empty.
    pub async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.lock();
                if let Some(item) = state.items.pop_front() {
                    let more = !state.items.is_empty();
                    drop(state);
                    if more {
                        // Pass the wakeup on so other consumers keep draining.
                        self.notify.notify_one();
                    }
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Consumes the queue as a stream that ends on completion.
    pub fn drain(&self) -> impl Stream<Item = T> + '_ {
        futures_util::stream::unfold(self, |queue| async move {
            queue.pop().await.map(|item| (item, queue))
        })
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn is_completed(&self) -> bool {
        self.lock().closed
    }

    /// Completed and nothing left to hand out.
    pub fn is_drained(&self) -> bool {
        let state = self.lock();
        state.closed && state.items.is_empty()
    }

    pub fn total_added(&self) -> u64 {
        self.lock().total_added
    }

    pub fn last_added(&self) -> Option<T>
    where
        T: Clone,
    {
        self.lock().last_added.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn fifo_order_is_preserved() {
        let queue = WorkQueue::new();
        queue.add("/A").unwrap();
        queue.add("/B").unwrap();
        queue.complete().unwrap();

        assert_eq!(queue.pop().await, Some("/A"));
        assert_eq!(queue.pop().await, Some("/B"));
        assert_eq!(queue.pop().await, None);
        assert!(queue.is_drained());
    }

    #[tokio::test]
    async fn add_after_complete_is_rejected() {
        let queue = WorkQueue::new();
        queue.add(1).unwrap();
        queue.complete().unwrap();

        assert_eq!(queue.add(2), Err(QueueError::Closed));
        assert_eq!(queue.complete(), Err(QueueError::AlreadyCompleted));
        assert_eq!(queue.total_added(), 1);
        assert_eq!(queue.last_added(), Some(1));
    }

    #[tokio::test]
    async fn pop_waits_for_producer() {
        let queue = Arc::new(WorkQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.drain().collect::<Vec<u32>>().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());
        for i in 0..5 {
            queue.add(i).unwrap();
        }
        queue.complete().unwrap();

        assert_eq!(consumer.await.unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn every_item_is_delivered_once_across_consumers() {
        let queue = Arc::new(WorkQueue::new());
        let mut consumers = Vec::new();
        for _ in 0..4 {
            let queue = Arc::clone(&queue);
            consumers.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(item) = queue.pop().await {
                    seen.push(item);
                }
                seen
            }));
        }
        for i in 0..200u32 {
            queue.add(i).unwrap();
            if i % 50 == 0 {
                tokio::task::yield_now().await;
            }
        }
        queue.complete().unwrap();

        let mut all = Vec::new();
        for consumer in consumers {
            all.extend(consumer.await.unwrap());
        }
        all.sort_unstable();
        assert_eq!(all, (0..200).collect::<Vec<_>>());
        assert!(queue.is_drained());
    }
}
