/*
    Copyright (C) 2020-2022  Rafal Michalski

    This file is part of CARTRUSTY, a Rust library for emulating C64 expansion port hardware.

    For the full copyright notice, see the lib.rs file.
*/
//! A single-producer single-consumer ring of [RegisterEvent]s.
//!
//! The producer never blocks: when the ring is full the event is rejected and counted.
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use ringbuf::{
    HeapCons, HeapProd, HeapRb,
    traits::{Consumer, Observer, Producer, Split},
};

use super::RegisterEvent;

/// Returned by [EventProducer::push] when the ring is full. Carries the rejected event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RingFull(pub RegisterEvent);

impl std::error::Error for RingFull {}

impl fmt::Display for RingFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "register event ring is full, event at {} dropped", self.0.timestamp)
    }
}

/// Returned by [event_ring] when the capacity is not a power of two.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RingCapacityError(pub usize);

impl std::error::Error for RingCapacityError {}

impl fmt::Display for RingCapacityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ring capacity must be a non-zero power of two: {}", self.0)
    }
}

/// The writing end of the event ring, owned by the real-time handler.
pub struct EventProducer {
    inner: HeapProd<RegisterEvent>,
    dropped: Arc<AtomicU32>,
}

/// The reading end of the event ring, owned by the background pipeline.
pub struct EventConsumer {
    inner: HeapCons<RegisterEvent>,
    /// The oldest event, already taken out of the ring but not yet due.
    next: Option<RegisterEvent>,
    dropped: Arc<AtomicU32>,
}

impl fmt::Debug for EventProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventProducer {{ len: {}, capacity: {} }}", self.len(), self.capacity())
    }
}

impl fmt::Debug for EventConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventConsumer {{ len: {}, capacity: {} }}", self.len(), self.capacity())
    }
}

/// Creates an event ring able to hold `capacity` events.
pub fn event_ring(capacity: usize) -> Result<(EventProducer, EventConsumer), RingCapacityError> {
    if !capacity.is_power_of_two() {
        return Err(RingCapacityError(capacity))
    }
    let (producer, consumer) = HeapRb::<RegisterEvent>::new(capacity).split();
    let dropped = Arc::new(AtomicU32::new(0));
    Ok((EventProducer { inner: producer, dropped: Arc::clone(&dropped) },
        EventConsumer { inner: consumer, next: None, dropped }))
}

impl EventProducer {
    /// Appends the `event` to the ring.
    ///
    /// Never blocks. If the ring is full the event is not stored, the dropped count is incremented
    /// and the event is returned in the error.
    #[inline]
    pub fn push(&mut self, event: RegisterEvent) -> Result<(), RingFull> {
        self.inner.try_push(event).map_err(|event| {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            RingFull(event)
        })
    }
    /// Returns the number of events stored in the ring.
    pub fn len(&self) -> usize {
        self.inner.occupied_len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn capacity(&self) -> usize {
        self.inner.capacity().get()
    }
    /// Returns the number of events rejected so far because the ring was full.
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventConsumer {
    /// Returns a copy of the oldest event without consuming it.
    #[inline]
    pub fn peek(&mut self) -> Option<RegisterEvent> {
        if self.next.is_none() {
            self.next = self.inner.try_pop();
        }
        self.next
    }
    /// Removes and returns the oldest event.
    #[inline]
    pub fn pop(&mut self) -> Option<RegisterEvent> {
        self.next.take().or_else(|| self.inner.try_pop())
    }
    /// Removes and returns the oldest event if its time-stamp is not later than `timestamp`.
    #[inline]
    pub fn pop_due(&mut self, timestamp: u64) -> Option<RegisterEvent> {
        match self.peek() {
            Some(event) if event.timestamp <= timestamp => self.next.take(),
            _ => None
        }
    }
    /// Returns the number of events not consumed yet.
    pub fn len(&self) -> usize {
        self.inner.occupied_len() + usize::from(self.next.is_some())
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn capacity(&self) -> usize {
        self.inner.capacity().get()
    }
    /// Returns the number of events rejected so far because the ring was full.
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::ChipSelector;
    use rand::prelude::*;
    use rand::rngs::SmallRng;

    fn event(timestamp: u64) -> RegisterEvent {
        RegisterEvent::new(timestamp, ChipSelector::Sid1, timestamp as u8 & 31, !(timestamp as u8))
    }

    #[test]
    fn event_ring_works() {
        assert_eq!(event_ring(0).unwrap_err(), RingCapacityError(0));
        assert!(event_ring(12).is_err());
        let (mut producer, mut consumer) = event_ring(8).unwrap();
        assert_eq!(producer.capacity(), 8);
        assert!(consumer.peek().is_none());
        for ts in 1..=8 {
            producer.push(event(ts)).unwrap();
        }
        assert_eq!(producer.push(event(9)), Err(RingFull(event(9))));
        assert_eq!(consumer.dropped(), 1);
        assert_eq!(consumer.len(), 8);
        assert_eq!(consumer.pop(), Some(event(1)));
        producer.push(event(9)).unwrap();
        assert_eq!(producer.push(event(10)), Err(RingFull(event(10))));
        assert_eq!(producer.dropped(), 2);
        for ts in 2..=9 {
            assert_eq!(consumer.peek(), Some(event(ts)));
            assert_eq!(consumer.pop(), Some(event(ts)));
        }
        assert!(consumer.is_empty());
        assert_eq!(consumer.pop(), None);
    }

    #[test]
    fn pop_due_works() {
        let (mut producer, mut consumer) = event_ring(4).unwrap();
        producer.push(event(100)).unwrap();
        producer.push(event(105)).unwrap();
        assert_eq!(consumer.pop_due(99), None);
        assert_eq!(consumer.pop_due(100), Some(event(100)));
        assert_eq!(consumer.pop_due(104), None);
        assert_eq!(consumer.pop_due(200), Some(event(105)));
        assert_eq!(consumer.pop_due(200), None);
    }

    #[test]
    fn event_ring_across_threads() {
        const COUNT: u64 = 100_000;
        let (mut producer, mut consumer) = event_ring(64).unwrap();
        let handle = std::thread::spawn(move || {
            let mut rng = SmallRng::seed_from_u64(7);
            let mut ts = 1;
            while ts <= COUNT {
                if producer.push(event(ts)).is_ok() {
                    ts += 1;
                }
                else if rng.gen_bool(0.5) {
                    std::thread::yield_now();
                }
            }
            producer.dropped()
        });
        let mut expected = 1;
        while expected <= COUNT {
            if let Some(ev) = consumer.pop() {
                assert_eq!(ev, event(expected));
                expected += 1;
            }
            else {
                std::thread::yield_now();
            }
        }
        let dropped = handle.join().unwrap();
        assert_eq!(dropped, consumer.dropped());
        assert!(consumer.is_empty());
    }
}
