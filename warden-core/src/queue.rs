//! ## warden-core::queue
//! **Ticket handoff between the watcher and actuator threads**
//!
//! Unbounded FIFO backed by crossbeam's segmented queue, so the watcher
//! never blocks on push and the actuator never blocks on pop.
//! No deduplication happens here; merging repeat offenses is the
//! watcher's job before it enqueues.

use crossbeam::queue::SegQueue;

use crate::ticket::Ticket;

#[derive(Default)]
pub struct TicketQueue {
    queue: SegQueue<Ticket>,
}

impl TicketQueue {
    pub fn new() -> Self {
        Self {
            queue: SegQueue::new(),
        }
    }

    /// Append a ticket in arrival order.
    pub fn ticket_enqueue(&self, ticket: Ticket) {
        self.queue.push(ticket);
    }

    /// Oldest pending ticket, `None` when the queue is drained.
    pub fn ticket_dequeue(&self) -> Option<Ticket> {
        self.queue.pop()
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn dequeue_on_empty_returns_none() {
        let queue = TicketQueue::new();
        assert!(!queue.has_pending());
        assert!(queue.ticket_dequeue().is_none());
    }

    #[test]
    fn enqueue_dequeue_preserves_order() {
        let queue = TicketQueue::new();
        for i in 0..100 {
            queue.ticket_enqueue(Ticket::new(format!("10.0.0.{i}"), Utc::now()));
        }
        assert!(queue.has_pending());
        assert_eq!(queue.len(), 100);

        for i in 0..100 {
            let ticket = queue.ticket_dequeue().unwrap();
            assert_eq!(ticket.id(), format!("10.0.0.{i}"));
        }
        assert!(queue.is_empty());
    }

    proptest! {
        #[test]
        fn cross_thread_fifo(count in 1usize..500) {
            let queue = Arc::new(TicketQueue::new());

            let producer = {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..count {
                        queue.ticket_enqueue(Ticket::new(i.to_string(), Utc::now()));
                    }
                })
            };

            let mut received = Vec::with_capacity(count);
            while received.len() < count {
                match queue.ticket_dequeue() {
                    Some(ticket) => received.push(ticket.id().parse::<usize>().unwrap()),
                    None => thread::yield_now(),
                }
            }
            producer.join().unwrap();

            prop_assert_eq!(received, (0..count).collect::<Vec<_>>());
            prop_assert!(queue.ticket_dequeue().is_none());
        }
    }
}
