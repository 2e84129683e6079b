/*
    Copyright (C) 2020-2022  Rafal Michalski

    This file is part of CARTRUSTY, a Rust library for emulating C64 expansion port hardware.

    For the full copyright notice, see the lib.rs file.
*/
//! # Audio API.
use core::fmt;

use ringbuf::{
    HeapRb,
    traits::{Consumer, Observer, Producer},
};

/// A default length of the silence queued before the audio output starts, in milliseconds.
pub const QUEUE_PREFILL_MILLIS: u32 = 50;

/// A destination of the stereo 16-bit PCM samples.
pub trait AudioSink {
    fn put_sample(&mut self, left: i16, right: i16);
}

impl AudioSink for Vec<(i16, i16)> {
    #[inline]
    fn put_sample(&mut self, left: i16, right: i16) {
        self.push((left, right))
    }
}

impl<S: AudioSink + ?Sized> AudioSink for &mut S {
    #[inline]
    fn put_sample(&mut self, left: i16, right: i16) {
        (**self).put_sample(left, right)
    }
}

/// Saturates `value` to the range of `i16`.
#[inline]
pub fn clamp_sample(value: i32) -> i16 {
    value.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// A bounded queue of stereo frames between the sound pipeline and the audio device.
///
/// When the queue is full the oldest frames are discarded to make room.
pub struct PcmQueue {
    frames: HeapRb<(i16, i16)>,
    overruns: u64,
}

impl fmt::Debug for PcmQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PcmQueue {{ len: {}, capacity: {}, overruns: {} }}",
                self.len(), self.capacity(), self.overruns)
    }
}

impl PcmQueue {
    /// Creates an empty queue holding up to `capacity_frames` frames, at least one.
    pub fn new(capacity_frames: usize) -> Self {
        PcmQueue {
            frames: HeapRb::new(capacity_frames.max(1)),
            overruns: 0
        }
    }
    /// Creates a queue with the capacity of three pre-fill lengths, pre-filled with silence
    /// of [QUEUE_PREFILL_MILLIS] at `sample_rate`.
    pub fn with_prefill(sample_rate: u32) -> Self {
        let frames = prefill_frames(sample_rate, QUEUE_PREFILL_MILLIS);
        let mut queue = PcmQueue::new(frames * 3);
        queue.prefill_silence(frames);
        queue
    }
    /// Appends silence so the queue holds at least `frames` frames.
    pub fn prefill_silence(&mut self, frames: usize) {
        while self.len() < frames {
            if self.frames.try_push((0, 0)).is_err() {
                break
            }
        }
    }
    /// Returns the number of stereo frames in the queue.
    pub fn len(&self) -> usize {
        self.frames.occupied_len()
    }
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
    pub fn capacity(&self) -> usize {
        self.frames.capacity().get()
    }
    /// Returns the number of frames discarded because the queue was full.
    pub fn overruns(&self) -> u64 {
        self.overruns
    }
    /// Moves interleaved samples into `out` and returns the number of values written.
    ///
    /// The remainder of `out` is filled with silence.
    pub fn pop_into(&mut self, out: &mut [i16]) -> usize {
        let mut count = 0;
        for chunk in out.chunks_exact_mut(2) {
            match self.frames.try_pop() {
                Some((left, right)) => {
                    chunk[0] = left;
                    chunk[1] = right;
                    count += 2;
                }
                None => break
            }
        }
        for dst in out[count..].iter_mut() {
            *dst = 0;
        }
        count
    }
}

impl AudioSink for PcmQueue {
    fn put_sample(&mut self, left: i16, right: i16) {
        if self.frames.is_full() {
            let _ = self.frames.try_pop();
            self.overruns += 1;
        }
        let _ = self.frames.try_push((left, right));
    }
}

/// Returns the number of frames of `millis` milliseconds at `sample_rate`, with a half more for slack.
pub fn prefill_frames(sample_rate: u32, millis: u32) -> usize {
    (u64::from(millis) * u64::from(sample_rate) / 1000 * 3 / 2) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_queue_works() {
        let mut queue = PcmQueue::new(4);
        queue.prefill_silence(2);
        assert_eq!(queue.len(), 2);
        queue.put_sample(1, -1);
        queue.put_sample(2, -2);
        queue.put_sample(3, -3);
        assert_eq!(queue.len(), 4);
        assert_eq!(queue.overruns(), 1);
        let mut out = [9i16; 10];
        assert_eq!(queue.pop_into(&mut out), 8);
        assert_eq!(out, [0, 0, 1, -1, 2, -2, 3, -3, 0, 0]);
        assert!(queue.is_empty());
        assert_eq!(queue.pop_into(&mut out[..3]), 0);
        assert_eq!(PcmQueue::new(0).capacity(), 1);
    }

    #[test]
    fn prefill_works() {
        assert_eq!(prefill_frames(44100, QUEUE_PREFILL_MILLIS), 3307);
        let queue = PcmQueue::with_prefill(44100);
        assert_eq!(queue.len(), 3307);
        assert_eq!(queue.capacity(), 3307 * 3);
        assert_eq!(clamp_sample(40000), i16::MAX);
        assert_eq!(clamp_sample(-40000), i16::MIN);
        assert_eq!(clamp_sample(-4), -4);
    }
}
