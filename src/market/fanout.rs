//! Non-blocking fan-out to bounded consumer queues.

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

/// Outcome of offering one item to every consumer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub dropped: usize,
}

/// A list of bounded senders that each receive a clone of every item.
pub struct Fanout<T> {
    label: String,
    consumers: Vec<mpsc::Sender<T>>,
}

impl<T: Clone> Fanout<T> {
    /// `label` identifies the producer in drop warnings.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            consumers: Vec::new(),
        }
    }

    pub fn add_consumer(&mut self, sender: mpsc::Sender<T>) {
        self.consumers.push(sender);
    }

    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }

    /// Offer `item` to every consumer without waiting.
    ///
    /// A full or closed queue loses the item for that consumer only.
    pub fn publish(&self, item: &T) -> Delivery {
        let mut delivery = Delivery::default();
        for (index, consumer) in self.consumers.iter().enumerate() {
            match consumer.try_send(item.clone()) {
                Ok(()) => delivery.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    delivery.dropped += 1;
                    warn!(producer = %self.label, consumer = index, "Consumer queue full, dropping update");
                }
                Err(TrySendError::Closed(_)) => {
                    delivery.dropped += 1;
                    warn!(producer = %self.label, consumer = index, "Consumer queue closed, dropping update");
                }
            }
        }
        delivery
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_full_consumer_does_not_block_others() {
        let (slow_tx, mut slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(10);

        let mut fanout = Fanout::new("test");
        fanout.add_consumer(slow_tx);
        fanout.add_consumer(fast_tx);

        assert_eq!(fanout.publish(&1), Delivery { delivered: 2, dropped: 0 });
        assert_eq!(fanout.publish(&2), Delivery { delivered: 1, dropped: 1 });
        assert_eq!(fanout.publish(&3), Delivery { delivered: 1, dropped: 1 });

        assert_eq!(slow_rx.recv().await, Some(1));
        assert!(slow_rx.try_recv().is_err());

        for expected in 1..=3 {
            assert_eq!(fast_rx.recv().await, Some(expected));
        }
    }

    #[tokio::test]
    async fn test_closed_consumer_counts_as_dropped() {
        let (tx, rx) = mpsc::channel::<u8>(4);
        drop(rx);

        let mut fanout = Fanout::new("test");
        fanout.add_consumer(tx);
        assert_eq!(fanout.publish(&7), Delivery { delivered: 0, dropped: 1 });
    }

    #[test]
    fn test_empty_fanout() {
        let fanout: Fanout<u8> = Fanout::new("none");
        assert!(fanout.is_empty());
        assert_eq!(fanout.publish(&1), Delivery::default());
    }
}
