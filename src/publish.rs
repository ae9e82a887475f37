//! Result publication.
//!
//! `ResultBatch` is the wire contract the overlay renderer and benchmark
//! collector depend on; field names and units must not change. The publisher
//! hands each batch to exactly one registered consumer, synchronously, and
//! silently discards batches when no consumer is registered.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// A suppressed, normalized detection. Invariants: `xmax > xmin`,
/// `ymax > ymin`, coordinates in `[0,1]`, `score` at or above the configured
/// confidence threshold.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub score: f32,
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

/// Timestamped detections for one processed frame. All timestamps are
/// milliseconds since epoch; `capture_ts` is carried unchanged from the frame,
/// `recv_ts` is taken when the frame is dequeued for processing, and
/// `inference_ts` when decoding plus suppression completes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResultBatch {
    pub frame_id: String,
    pub capture_ts: u64,
    pub recv_ts: u64,
    pub inference_ts: u64,
    pub detections: Vec<Detection>,
}

type Consumer = Box<dyn FnMut(ResultBatch) + Send>;

/// Registered consumer plus a counter bumped on every registration change, so
/// a delivery can tell whether the slot was touched while it ran.
struct ConsumerSlot {
    consumer: Option<Consumer>,
    generation: u64,
}

/// Single-consumer result sink.
pub struct ResultPublisher {
    slot: Mutex<ConsumerSlot>,
}

impl ResultPublisher {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(ConsumerSlot {
                consumer: None,
                generation: 0,
            }),
        }
    }

    /// Register the consumer. A previously registered consumer is replaced;
    /// there is never more than one.
    pub fn set_consumer(&self, consumer: impl FnMut(ResultBatch) + Send + 'static) {
        if let Ok(mut slot) = self.slot.lock() {
            slot.consumer = Some(Box::new(consumer));
            slot.generation += 1;
        }
    }

    pub fn clear_consumer(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            slot.consumer = None;
            slot.generation += 1;
        }
    }

    /// Deliver a batch to the registered consumer, if any.
    ///
    /// The consumer runs outside the registration lock, so it may call
    /// `set_consumer` or `clear_consumer` on this publisher without
    /// deadlocking; such a call takes effect from the next batch.
    pub fn publish(&self, batch: ResultBatch) {
        let (mut consumer, generation) = {
            let Ok(mut slot) = self.slot.lock() else {
                return;
            };
            match slot.consumer.take() {
                Some(consumer) => (consumer, slot.generation),
                None => return,
            }
        };

        consumer(batch);

        if let Ok(mut slot) = self.slot.lock() {
            // Put the consumer back only if no registration change happened
            // while it ran.
            if slot.generation == generation {
                slot.consumer = Some(consumer);
            }
        }
    }
}

impl Default for ResultPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn batch(frame_id: &str) -> ResultBatch {
        ResultBatch {
            frame_id: frame_id.to_string(),
            capture_ts: 1_690_000_000_000,
            recv_ts: 1_690_000_000_100,
            inference_ts: 1_690_000_000_150,
            detections: vec![Detection {
                label: "person".to_string(),
                score: 0.93,
                xmin: 0.12,
                ymin: 0.08,
                xmax: 0.34,
                ymax: 0.67,
            }],
        }
    }

    #[test]
    fn wire_format_matches_the_contract() {
        let value = serde_json::to_value(batch("frame_12345")).unwrap();
        assert_eq!(value["frame_id"], "frame_12345");
        assert_eq!(value["capture_ts"], 1_690_000_000_000u64);
        assert_eq!(value["recv_ts"], 1_690_000_000_100u64);
        assert_eq!(value["inference_ts"], 1_690_000_000_150u64);
        let det = &value["detections"][0];
        assert_eq!(det["label"], "person");
        assert!(det.get("score").is_some());
        for key in ["xmin", "ymin", "xmax", "ymax"] {
            assert!(det.get(key).is_some(), "missing {}", key);
        }
    }

    #[test]
    fn publishes_to_the_registered_consumer() {
        let publisher = ResultPublisher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        publisher.set_consumer(move |b| sink.lock().unwrap().push(b.frame_id.clone()));

        publisher.publish(batch("f1"));
        publisher.publish(batch("f2"));
        assert_eq!(*seen.lock().unwrap(), vec!["f1", "f2"]);
    }

    #[test]
    fn no_consumer_discards_without_error() {
        let publisher = ResultPublisher::new();
        publisher.publish(batch("f1"));
    }

    #[test]
    fn consumer_may_replace_itself_during_delivery() {
        let publisher = Arc::new(ResultPublisher::new());
        let second_seen = Arc::new(Mutex::new(Vec::new()));

        let publisher_handle = Arc::clone(&publisher);
        let sink = Arc::clone(&second_seen);
        publisher.set_consumer(move |_| {
            let sink = Arc::clone(&sink);
            publisher_handle.set_consumer(move |b| sink.lock().unwrap().push(b.frame_id.clone()));
        });

        publisher.publish(batch("f1")); // handled by the first, which swaps itself out
        publisher.publish(batch("f2"));
        assert_eq!(*second_seen.lock().unwrap(), vec!["f2"]);
    }

    #[test]
    fn consumer_may_clear_itself_during_delivery() {
        let publisher = Arc::new(ResultPublisher::new());
        let deliveries = Arc::new(Mutex::new(0u32));

        let publisher_handle = Arc::clone(&publisher);
        let count = Arc::clone(&deliveries);
        publisher.set_consumer(move |_| {
            *count.lock().unwrap() += 1;
            publisher_handle.clear_consumer();
        });

        publisher.publish(batch("f1"));
        publisher.publish(batch("f2")); // discarded: the consumer removed itself
        assert_eq!(*deliveries.lock().unwrap(), 1);
    }

    #[test]
    fn replacing_the_consumer_redirects_batches() {
        let publisher = ResultPublisher::new();
        let first = Arc::new(Mutex::new(0u32));
        let second = Arc::new(Mutex::new(0u32));

        let sink = Arc::clone(&first);
        publisher.set_consumer(move |_| *sink.lock().unwrap() += 1);
        publisher.publish(batch("f1"));

        let sink = Arc::clone(&second);
        publisher.set_consumer(move |_| *sink.lock().unwrap() += 1);
        publisher.publish(batch("f2"));

        assert_eq!(*first.lock().unwrap(), 1);
        assert_eq!(*second.lock().unwrap(), 1);
    }
}
