//! Allocation-free reporting channel out of the real-time callback.

use crate::hw::format::SampleType;
use ringbuf::{HeapCons, HeapProd, HeapRb, traits::*};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Conditions observed on the real-time thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RtEvent {
    /// The driver passed a buffer index outside the ping-pong pair.
    InvalidBufferIndex(usize),
    UnsupportedFormat {
        channel: usize,
        sample_type: SampleType,
    },
    /// A negotiated position has no staging buffer.
    ChannelRange { position: usize, len: usize },
    SampleRateChanged(f64),
    Overload,
}

impl fmt::Display for RtEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RtEvent::InvalidBufferIndex(index) => {
                write!(f, "driver reported buffer index {index}")
            }
            RtEvent::UnsupportedFormat {
                channel,
                sample_type,
            } => write!(f, "channel {channel} has unsupported format {sample_type}"),
            RtEvent::ChannelRange { position, len } => {
                write!(f, "channel position {position} out of range 0..{len}")
            }
            RtEvent::SampleRateChanged(rate) => {
                write!(f, "sample rate changed to {rate} while running")
            }
            RtEvent::Overload => f.write_str("driver reported overload"),
        }
    }
}

/// Real-time side. Never blocks and never allocates.
pub struct EventProducer {
    producer: HeapProd<RtEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventProducer {
    /// Returns false and counts the event when the ring is full.
    #[inline]
    pub fn push(&mut self, event: RtEvent) -> bool {
        if self.producer.try_push(event).is_ok() {
            true
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }
}

/// Control-thread side.
pub struct EventConsumer {
    consumer: HeapCons<RtEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventConsumer {
    pub fn drain(&mut self) -> Vec<RtEvent> {
        let mut events = Vec::with_capacity(self.consumer.occupied_len());
        while let Some(event) = self.consumer.try_pop() {
            events.push(event);
        }
        events
    }

    /// Events lost to a full ring since the last call.
    pub fn take_dropped(&self) -> u64 {
        self.dropped.swap(0, Ordering::Relaxed)
    }
}

pub fn event_channel(capacity: usize) -> (EventProducer, EventConsumer) {
    let (producer, consumer) = HeapRb::<RtEvent>::new(capacity.max(1)).split();
    let dropped = Arc::new(AtomicU64::new(0));
    (
        EventProducer {
            producer,
            dropped: dropped.clone(),
        },
        EventConsumer { consumer, dropped },
    )
}
