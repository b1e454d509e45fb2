// Lock-free notification channel
//
// Stream error callbacks push here without blocking; the control thread
// drains the consumer into run logs.

use crate::messaging::notification::Notification;
use ringbuf::traits::{Consumer, Split};
use ringbuf::HeapRb;

pub type NotificationProducer = ringbuf::HeapProd<Notification>;
pub type NotificationConsumer = ringbuf::HeapCons<Notification>;

/// Default capacity: stream errors are rare, a burst of 64 is plenty
pub const NOTIFICATION_CAPACITY: usize = 64;

pub fn create_notification_channel(
    capacity: usize,
) -> (NotificationProducer, NotificationConsumer) {
    let rb = HeapRb::<Notification>::new(capacity);
    rb.split()
}

/// Pop everything currently queued
pub fn drain(consumer: &mut NotificationConsumer) -> Vec<Notification> {
    let mut out = Vec::new();
    while let Some(notification) = consumer.try_pop() {
        out.push(notification);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::notification::NotificationCategory;
    use ringbuf::traits::Producer;

    #[test]
    fn test_drain_returns_in_order() {
        let (mut tx, mut rx) = create_notification_channel(4);
        let _ = tx.try_push(Notification::warning(
            NotificationCategory::Engine,
            "first".to_string(),
        ));
        let _ = tx.try_push(Notification::error(
            NotificationCategory::Capture,
            "second".to_string(),
        ));

        let drained = drain(&mut rx);
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].message, "first");
        assert_eq!(drained[1].message, "second");
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_full_channel_rejects_without_blocking() {
        let (mut tx, _rx) = create_notification_channel(1);
        assert!(tx
            .try_push(Notification::info(NotificationCategory::Engine, "a".into()))
            .is_ok());
        assert!(tx
            .try_push(Notification::info(NotificationCategory::Engine, "b".into()))
            .is_err());
    }
}
