use core::fmt::Debug;
use std::cmp::Reverse;

use priority_queue::PriorityQueue;
use rand::Rng;

use crate::config::ReplacementStrategy;

use super::frame::Frame;
use super::FrameId;

/// Picks the frame to give up when every frame is occupied. The pool calls
/// [`Replacer::on_pin`] for every pin with a monotonic sequence number;
/// strategies that rank by per-frame history read it straight off the
/// frames passed to [`Replacer::find_victim`].
///
/// A pinned frame is never a candidate.
pub(super) trait Replacer: Send + Debug {
    fn on_pin(&mut self, frame_id: FrameId, timestamp: u64);
    fn find_victim(&mut self, frames: &mut [Frame]) -> Option<FrameId>;
}

pub(super) fn build(strategy: ReplacementStrategy, count_frames: usize, lru_k: usize) -> Box<dyn Replacer> {
    match strategy {
        ReplacementStrategy::Random => Box::new(Random),
        ReplacementStrategy::Lru => Box::new(Lru::new(count_frames)),
        ReplacementStrategy::LruK => Box::new(LruK::new(lru_k)),
        ReplacementStrategy::Lfu => Box::new(Lfu),
        ReplacementStrategy::Clock => Box::new(Clock::new()),
    }
}

fn is_candidate(frame: &Frame) -> bool {
    frame.is_occupied() && !frame.is_pinned()
}

/// Uniformly random unpinned frame.
#[derive(Debug)]
pub(super) struct Random;

impl Replacer for Random {
    fn on_pin(&mut self, _frame_id: FrameId, _timestamp: u64) {}

    fn find_victim(&mut self, frames: &mut [Frame]) -> Option<FrameId> {
        let candidates = frames
            .iter()
            .enumerate()
            .filter(|(_, frame)| is_candidate(frame))
            .map(|(frame_id, _)| frame_id)
            .collect::<Vec<_>>();

        if candidates.is_empty() {
            return None;
        }

        Some(candidates[rand::thread_rng().gen_range(0..candidates.len())])
    }
}

/// Smallest last-pin timestamp wins. The heap orders by `Reverse(timestamp)`
/// so the top of the queue is the least recently pinned frame.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug)]
pub(super) struct Lru {
    heap: PriorityQueue<FrameId, Reverse<u64>>,
}

impl Lru {
    fn new(count_frames: usize) -> Self {
        Self {
            heap: PriorityQueue::with_capacity(count_frames),
        }
    }
}

impl Replacer for Lru {
    fn on_pin(&mut self, frame_id: FrameId, timestamp: u64) {
        // push replaces the priority when the frame is already queued
        self.heap.push(frame_id, Reverse(timestamp));
    }

    fn find_victim(&mut self, frames: &mut [Frame]) -> Option<FrameId> {
        let mut skipped = Vec::new();
        let mut victim = None;

        while let Some((frame_id, priority)) = self.heap.pop() {
            if is_candidate(&frames[frame_id]) {
                victim = Some(frame_id);
                break;
            }
            if frames[frame_id].is_occupied() {
                skipped.push((frame_id, priority));
            }
        }

        for (frame_id, priority) in skipped {
            self.heap.push(frame_id, priority);
        }

        victim
    }
}

/// Smallest k-th most recent pin timestamp wins; frames with fewer than k
/// pins rank before every frame with a full history.
#[derive(Debug)]
pub(super) struct LruK {
    k: usize,
}

impl LruK {
    fn new(k: usize) -> Self {
        assert!(k > 0);
        Self { k }
    }
}

impl Replacer for LruK {
    fn on_pin(&mut self, _frame_id: FrameId, _timestamp: u64) {}

    fn find_victim(&mut self, frames: &mut [Frame]) -> Option<FrameId> {
        frames
            .iter()
            .enumerate()
            .filter(|(_, frame)| is_candidate(frame))
            // None sorts before Some, which is the missing-history priority
            .min_by_key(|(_, frame)| frame.nth_recent_pin_timestamp(self.k))
            .map(|(frame_id, _)| frame_id)
    }
}

/// Smallest total pin count wins.
#[derive(Debug)]
pub(super) struct Lfu;

impl Replacer for Lfu {
    fn on_pin(&mut self, _frame_id: FrameId, _timestamp: u64) {}

    fn find_victim(&mut self, frames: &mut [Frame]) -> Option<FrameId> {
        frames
            .iter()
            .enumerate()
            .filter(|(_, frame)| is_candidate(frame))
            .min_by_key(|(_, frame)| frame.count_all_pins())
            .map(|(frame_id, _)| frame_id)
    }
}

/// Second chance. The hand persists across calls; an unpinned frame with
/// its last-chance bit set gets the bit cleared and is passed over once.
#[derive(Debug)]
pub(super) struct Clock {
    hand: FrameId,
}

impl Clock {
    fn new() -> Self {
        Self { hand: 0 }
    }
}

impl Replacer for Clock {
    fn on_pin(&mut self, _frame_id: FrameId, _timestamp: u64) {}

    fn find_victim(&mut self, frames: &mut [Frame]) -> Option<FrameId> {
        // two sweeps: the first may only clear bits, the second must hit
        for _ in 0..frames.len() * 2 {
            let frame_id = self.hand;
            self.hand = (self.hand + 1) % frames.len();

            let frame = &mut frames[frame_id];
            if !is_candidate(frame) {
                continue;
            }
            if frame.is_last_chance() {
                frame.set_last_chance(false);
                continue;
            }
            return Some(frame_id);
        }

        None
    }
}
