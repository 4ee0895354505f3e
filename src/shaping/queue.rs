//! Echo delay line shared by the shaped axes.

use crate::axis::{Axis, NUM_AXES};
use crate::stepper::timing::NEVER;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Echo {
    None,
    Forward,
    Backward,
}

/// Pending echoes of the primary steps.
///
/// One timestamp ring is shared by all axes; each entry carries an echo
/// tag per axis. Every axis has its own read head and delay, so an echo
/// leaves the queue `delay(axis)` ticks after the primary step that
/// recorded it. An entry is enqueued for every primary step event on any
/// shaped axis; axes that did not step get an empty tag that their head
/// skips.
#[derive(Debug, Clone)]
pub struct ShapingQueue<const N: usize> {
    now: u32,
    times: [u32; N],
    echoes: [[Echo; NUM_AXES]; N],
    tail: usize,
    delay: [u32; NUM_AXES],
    peek: [u32; NUM_AXES],
    head: [usize; NUM_AXES],
    free_count: [usize; NUM_AXES],
}

impl<const N: usize> ShapingQueue<N> {
    /// Empty queue with every axis disabled.
    pub const fn new() -> Self {
        Self {
            now: 0,
            times: [0; N],
            echoes: [[Echo::None; NUM_AXES]; N],
            tail: 0,
            delay: [NEVER; NUM_AXES],
            peek: [NEVER; NUM_AXES],
            head: [0; NUM_AXES],
            free_count: [N.saturating_sub(1); NUM_AXES],
        }
    }

    #[inline]
    const fn next(i: usize) -> usize {
        if i + 1 >= N {
            0
        } else {
            i + 1
        }
    }

    /// Advance the queue clock.
    pub fn decrement_delays(&mut self, interval: u32) {
        self.now = self.now.wrapping_add(interval);
        for peek in self.peek.iter_mut() {
            if *peek != NEVER {
                *peek = peek.saturating_sub(interval);
            }
        }
    }

    /// Echo delay of an axis in timer ticks.
    #[inline]
    pub fn delay(&self, axis: Axis) -> u32 {
        self.delay[axis.index()]
    }

    /// Set the echo delay of an axis. [`NEVER`] disables queueing.
    #[inline]
    pub fn set_delay(&mut self, axis: Axis, delay: u32) {
        self.delay[axis.index()] = delay;
    }

    /// Record one primary step event.
    ///
    /// `steps[axis]` is `Some(forward)` when the axis stepped.
    pub fn enqueue(&mut self, steps: [Option<bool>; NUM_AXES]) {
        let tail = self.tail;
        for (i, step) in steps.iter().enumerate() {
            match step {
                Some(forward) => {
                    if self.head[i] == tail {
                        self.peek[i] = self.delay[i];
                    }
                    self.echoes[tail][i] = if *forward { Echo::Forward } else { Echo::Backward };
                    self.free_count[i] = self.free_count[i].saturating_sub(1);
                }
                None => {
                    self.echoes[tail][i] = Echo::None;
                    if self.head[i] != tail {
                        self.free_count[i] = self.free_count[i].saturating_sub(1);
                    } else {
                        self.head[i] = Self::next(self.head[i]);
                    }
                }
            }
        }
        self.times[tail] = self.now;
        self.tail = Self::next(tail);
    }

    /// Ticks until the oldest echo of an axis is due, [`NEVER`] if none.
    #[inline]
    pub fn peek(&self, axis: Axis) -> u32 {
        self.peek[axis.index()]
    }

    /// Take the oldest echo of an axis. Returns its direction
    /// (`true` for forward), `None` if the axis has nothing queued.
    pub fn dequeue(&mut self, axis: Axis) -> Option<bool> {
        let i = axis.index();
        if self.head[i] == self.tail {
            return None;
        }
        let forward = self.echoes[self.head[i]][i] == Echo::Forward;
        loop {
            self.free_count[i] += 1;
            self.head[i] = Self::next(self.head[i]);
            if self.head[i] == self.tail || self.echoes[self.head[i]][i] != Echo::None {
                break;
            }
        }
        self.peek[i] = if self.head[i] == self.tail {
            NEVER
        } else {
            self.times[self.head[i]]
                .wrapping_add(self.delay[i])
                .wrapping_sub(self.now)
        };
        Some(forward)
    }

    /// Whether an axis has no echo pending.
    #[inline]
    pub fn is_empty(&self, axis: Axis) -> bool {
        self.head[axis.index()] == self.tail
    }

    /// Entries an axis can still take.
    #[inline]
    pub fn free_count(&self, axis: Axis) -> usize {
        self.free_count[axis.index()]
    }

    /// Drop every pending echo.
    pub fn purge(&mut self) {
        for i in 0..NUM_AXES {
            self.head[i] = self.tail;
            self.free_count[i] = N.saturating_sub(1);
            self.peek[i] = NEVER;
        }
    }
}

impl<const N: usize> Default for ShapingQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}
