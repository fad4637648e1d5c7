//! Single-item mailbox holding the latest published frame.

use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::capture::Frame;

/// The shared frame slot: one writer (the capture loop), any number of
/// readers, no queueing. A publish replaces the content wholesale and an
/// earlier publish is simply gone; readers get an `Arc` snapshot that
/// later publishes cannot touch. Empty until the first publish.
#[derive(Default)]
pub struct FrameSlot {
    latest: ArcSwapOption<Frame>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self {
            latest: ArcSwapOption::empty(),
        }
    }

    /// Replace the current content. Never blocks, never waits on readers.
    pub fn publish(&self, frame: Frame) {
        self.latest.store(Some(Arc::new(frame)));
    }

    /// Snapshot of the latest frame, or `None` before the first publish.
    pub fn read(&self) -> Option<Arc<Frame>> {
        self.latest.load_full()
    }

    /// Sequence number of the latest frame without cloning the handle
    pub fn latest_sequence(&self) -> Option<u64> {
        self.latest.load().as_ref().map(|frame| frame.meta.sequence)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, Instant, SystemTime};

    use bytes::Bytes;

    use super::*;
    use crate::capture::frame::{FrameMetadata, PixelFormat};

    // Payload bytes derived from the sequence number, so a torn read
    // would be detectable as a payload/sequence mismatch
    fn tagged_frame(sequence: u64) -> Frame {
        let tag = (sequence % 251) as u8;
        Frame {
            data: Bytes::from(vec![tag; 64]),
            meta: Arc::new(FrameMetadata {
                sequence,
                width: 8,
                height: 8,
                stride: 8,
                format: PixelFormat::Gray8,
                device_timestamp: None,
            }),
            timestamp: Instant::now(),
            captured_at: SystemTime::now(),
        }
    }

    fn assert_consistent(frame: &Frame) {
        let tag = (frame.meta.sequence % 251) as u8;
        assert!(
            frame.data.iter().all(|&b| b == tag),
            "read a frame whose payload does not match its sequence"
        );
    }

    #[test]
    fn empty_before_first_publish() {
        let slot = FrameSlot::new();
        assert!(slot.read().is_none());
        assert!(slot.latest_sequence().is_none());
    }

    #[test]
    fn latest_publish_wins() {
        let slot = FrameSlot::new();
        slot.publish(tagged_frame(1));
        slot.publish(tagged_frame(2));

        let frame = slot.read().unwrap();
        assert_eq!(frame.meta.sequence, 2);
        assert_consistent(&frame);
    }

    #[test]
    fn reads_are_idempotent_between_publishes() {
        let slot = FrameSlot::new();
        slot.publish(tagged_frame(5));

        let first = slot.read().unwrap();
        let second = slot.read().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.data, second.data);
    }

    #[test]
    fn snapshot_survives_later_publishes() {
        let slot = FrameSlot::new();
        slot.publish(tagged_frame(1));
        let held = slot.read().unwrap();

        slot.publish(tagged_frame(2));
        assert_eq!(held.meta.sequence, 1);
        assert_consistent(&held);
    }

    #[test]
    fn concurrent_reads_never_tear() {
        let slot = Arc::new(FrameSlot::new());
        let stop = Arc::new(AtomicBool::new(false));

        let writer = {
            let slot = Arc::clone(&slot);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                let mut sequence = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    sequence += 1;
                    slot.publish(tagged_frame(sequence));
                }
                sequence
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let slot = Arc::clone(&slot);
                let stop = Arc::clone(&stop);
                std::thread::spawn(move || {
                    let mut last_seen = 0u64;
                    while !stop.load(Ordering::Relaxed) {
                        if let Some(frame) = slot.read() {
                            assert_consistent(&frame);
                            // Sequences move forward, never backward
                            assert!(frame.meta.sequence >= last_seen);
                            last_seen = frame.meta.sequence;
                        }
                    }
                })
            })
            .collect();

        std::thread::sleep(Duration::from_millis(200));
        stop.store(true, Ordering::Relaxed);

        let published = writer.join().unwrap();
        assert!(published > 0);
        for reader in readers {
            reader.join().unwrap();
        }
    }

    #[test]
    fn slow_readers_do_not_block_the_writer() {
        let slot = Arc::new(FrameSlot::new());
        slot.publish(tagged_frame(0));

        // Readers that grab a snapshot and sit on it
        let stop = Arc::new(AtomicBool::new(false));
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let slot = Arc::clone(&slot);
                let stop = Arc::clone(&stop);
                std::thread::spawn(move || {
                    let mut held = Vec::new();
                    while !stop.load(Ordering::Relaxed) {
                        if let Some(frame) = slot.read() {
                            held.push(frame);
                        }
                        if held.len() > 64 {
                            held.clear();
                        }
                        std::thread::sleep(Duration::from_millis(1));
                    }
                })
            })
            .collect();

        // 1000 publishes must finish in far less than a frame interval each
        let started = Instant::now();
        for sequence in 1..=1000 {
            slot.publish(tagged_frame(sequence));
        }
        let elapsed = started.elapsed();

        stop.store(true, Ordering::Relaxed);
        for reader in readers {
            reader.join().unwrap();
        }

        assert_eq!(slot.latest_sequence(), Some(1000));
        assert!(
            elapsed < Duration::from_secs(1),
            "publishing stalled behind readers: {elapsed:?}"
        );
    }
}
