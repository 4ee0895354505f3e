//! Block queue shared by the planner and the step interrupt.
//!
//! The planner writes at `head`, the stepper engine consumes at `tail`.
//! `nonbusy` marks the first block the engine has not claimed, so
//! `tail <= nonbusy <= head` modulo the capacity. One slot stays free to
//! tell a full ring from an empty one.
//!
//! [`MotionQueue`] keeps the [`BlockRing`] behind a
//! [`critical_section::Mutex`] and hands it out one critical section at a
//! time through [`MotionQueue::lock`]. Callers keep every section O(1):
//! the planner re-plans one block per section, the engine claims or
//! retires one block per section. Being `Sync`, the queue can live in a
//! `static` that both the main loop and the interrupt reach.

use core::cell::RefCell;

use critical_section::Mutex;

use super::block::Block;

/// Default queue capacity.
pub const BLOCK_BUFFER_SIZE: usize = 16;

/// Engine polls to wait before the first block of a burst is delivered.
pub const BLOCK_DELAY_FOR_1ST_MOVE: u8 = 100;

/// Ring buffer of [`Block`]s plus the delivery state both sides update.
#[derive(Debug, Clone)]
pub struct BlockRing<const N: usize = BLOCK_BUFFER_SIZE> {
    blocks: [Block; N],
    head: usize,
    tail: usize,
    nonbusy: usize,
    delay_before_delivering: u8,
    buffer_runtime_us: u32,
}

impl<const N: usize> BlockRing<N> {
    /// Create an empty ring.
    pub const fn new() -> Self {
        Self {
            blocks: [Block::EMPTY; N],
            head: 0,
            tail: 0,
            nonbusy: 0,
            delay_before_delivering: 0,
            buffer_runtime_us: 0,
        }
    }

    /// Index after `i`.
    #[inline]
    pub const fn next_index(i: usize) -> usize {
        if i + 1 >= N {
            0
        } else {
            i + 1
        }
    }

    /// Index before `i`.
    #[inline]
    pub const fn prev_index(i: usize) -> usize {
        if i == 0 {
            N - 1
        } else {
            i - 1
        }
    }

    /// Usable capacity.
    #[inline]
    pub const fn capacity(&self) -> usize {
        N - 1
    }

    /// Write index.
    #[inline]
    pub fn head(&self) -> usize {
        self.head
    }

    /// Read index.
    #[inline]
    pub fn tail(&self) -> usize {
        self.tail
    }

    /// First unclaimed index.
    #[inline]
    pub fn nonbusy(&self) -> usize {
        self.nonbusy
    }

    /// Blocks between tail and head, claimed or not.
    #[inline]
    pub fn len(&self) -> usize {
        (self.head + N - self.tail) % N
    }

    /// Blocks the planner may still modify.
    #[inline]
    pub fn nonbusy_len(&self) -> usize {
        (self.head + N - self.nonbusy) % N
    }

    /// No blocks queued.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// No free slot for a new block.
    #[inline]
    pub fn is_full(&self) -> bool {
        Self::next_index(self.head) == self.tail
    }

    /// Whether `index` lies between tail and head.
    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        (index % N + N - self.tail) % N < self.len()
    }

    /// Whether `index` lies between nonbusy and head.
    #[inline]
    pub fn is_unclaimed(&self, index: usize) -> bool {
        (index % N + N - self.nonbusy) % N < self.nonbusy_len()
    }

    /// Block at a raw index.
    #[inline]
    pub fn get(&self, index: usize) -> &Block {
        &self.blocks[index % N]
    }

    /// Mutable block at a raw index.
    #[inline]
    pub fn get_mut(&mut self, index: usize) -> &mut Block {
        &mut self.blocks[index % N]
    }

    /// Whether a slot is claimed by the engine.
    #[inline]
    pub fn is_busy(&self, index: usize) -> bool {
        self.blocks[index % N].flags.busy
    }

    /// Block `offset` positions after the tail, if queued.
    pub fn peek(&self, offset: usize) -> Option<&Block> {
        if offset >= self.len() {
            return None;
        }
        Some(&self.blocks[(self.tail + offset) % N])
    }

    /// Block `offset` places after the oldest, if its trapezoid is ready.
    pub fn get_future_block(&self, offset: usize) -> Option<&Block> {
        self.peek(offset).filter(|b| !b.flags.recalculate)
    }

    /// Ready blocks from `offset` on, stopping at the first one being planned.
    pub fn future_blocks(&self, offset: usize) -> impl Iterator<Item = &Block> + '_ {
        (offset..).map_while(move |i| self.get_future_block(i))
    }

    /// Planned time of the unclaimed blocks in microseconds.
    #[inline]
    pub fn buffer_runtime_us(&self) -> u32 {
        self.buffer_runtime_us
    }

    /// Publish `block` at the head.
    ///
    /// A block landing in an empty ring starts the first-move delay.
    /// Returns `false` when the ring is full.
    pub fn push(&mut self, block: Block) -> bool {
        if self.is_full() {
            return false;
        }
        if self.is_empty() {
            // Give the next few moves a chance to join before starting
            self.delay_before_delivering = BLOCK_DELAY_FOR_1ST_MOVE;
        }
        self.buffer_runtime_us = self.buffer_runtime_us.saturating_add(block.segment_time_us);
        self.blocks[self.head] = block;
        self.head = Self::next_index(self.head);
        true
    }

    /// Claim the oldest block for execution.
    ///
    /// Returns `None` when the ring is empty, while the first-move delay
    /// runs with fewer than three blocks queued, or while the oldest block
    /// still awaits its trapezoid.
    pub fn claim(&mut self) -> Option<Block> {
        let moves = self.len();
        if moves == 0 {
            self.buffer_runtime_us = 0;
            return None;
        }

        if self.delay_before_delivering > 0 {
            self.delay_before_delivering -= 1;
            if moves < 3 && self.delay_before_delivering > 0 {
                return None;
            }
            self.delay_before_delivering = 0;
        }

        let tail = self.tail;
        let block = &mut self.blocks[tail];
        if block.flags.recalculate {
            return None;
        }
        block.flags.busy = true;
        self.buffer_runtime_us = self.buffer_runtime_us.saturating_sub(block.segment_time_us);
        self.nonbusy = Self::next_index(tail);
        Some(*block)
    }

    /// Free the claimed tail slot.
    ///
    /// No-op when the ring is empty or the tail was never claimed, which is
    /// the state after [`Self::clear_to_tail`] once a new block reuses the slot.
    pub fn discard_tail(&mut self) {
        if self.is_empty() || !self.blocks[self.tail].flags.busy {
            return;
        }
        self.blocks[self.tail].flags.busy = false;
        self.tail = Self::next_index(self.tail);
    }

    /// Drop every unclaimed block: `head = nonbusy = tail`.
    ///
    /// Re-arms the first-move delay for whatever is queued next.
    pub fn clear_to_tail(&mut self) {
        self.head = self.tail;
        self.nonbusy = self.tail;
        self.delay_before_delivering = BLOCK_DELAY_FOR_1ST_MOVE;
        self.buffer_runtime_us = 0;
    }
}

impl<const N: usize> Default for BlockRing<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// A [`BlockRing`] that the main loop and the step interrupt share.
///
/// # Example
///
/// ```rust,ignore
/// static QUEUE: MotionQueue = MotionQueue::new();
///
/// // main loop
/// let mut planner = Planner::from_config(&config, &QUEUE)?;
///
/// // step interrupt
/// let ticks = stepper.isr(&QUEUE, &mut output);
/// ```
pub struct MotionQueue<const N: usize = BLOCK_BUFFER_SIZE> {
    ring: Mutex<RefCell<BlockRing<N>>>,
}

impl<const N: usize> MotionQueue<N> {
    /// Create an empty queue.
    pub const fn new() -> Self {
        Self {
            ring: Mutex::new(RefCell::new(BlockRing::new())),
        }
    }

    /// Run `f` on the ring inside one critical section.
    ///
    /// Must not be nested on the same queue.
    pub fn lock<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut BlockRing<N>) -> R,
    {
        critical_section::with(|cs| {
            let mut ring = self.ring.borrow_ref_mut(cs);
            f(&mut *ring)
        })
    }

    /// Claim the oldest block for execution. See [`BlockRing::claim`].
    pub fn get_current_block(&self) -> Option<Block> {
        self.lock(BlockRing::claim)
    }

    /// Free the slot of the block the engine finished or dropped.
    pub fn discard_current_block(&self) {
        self.lock(BlockRing::discard_tail)
    }

    /// Copy of the block `offset` places after the oldest, if its
    /// trapezoid is ready.
    pub fn get_future_block(&self, offset: usize) -> Option<Block> {
        self.lock(|ring| ring.get_future_block(offset).copied())
    }

    /// Copy of the block `offset` positions after the tail, planned or not.
    pub fn peek(&self, offset: usize) -> Option<Block> {
        self.lock(|ring| ring.peek(offset).copied())
    }

    /// Copy of the block at a raw index.
    pub fn get(&self, index: usize) -> Block {
        self.lock(|ring| *ring.get(index))
    }

    /// Blocks between tail and head, claimed or not.
    pub fn len(&self) -> usize {
        self.lock(|ring| ring.len())
    }

    /// Blocks the planner may still modify.
    pub fn nonbusy_len(&self) -> usize {
        self.lock(|ring| ring.nonbusy_len())
    }

    /// No blocks queued.
    pub fn is_empty(&self) -> bool {
        self.lock(|ring| ring.is_empty())
    }

    /// No free slot for a new block.
    pub fn is_full(&self) -> bool {
        self.lock(|ring| ring.is_full())
    }

    /// Write index.
    pub fn head(&self) -> usize {
        self.lock(|ring| ring.head())
    }

    /// Read index.
    pub fn tail(&self) -> usize {
        self.lock(|ring| ring.tail())
    }

    /// Planned time of the unclaimed blocks in microseconds.
    pub fn buffer_runtime_us(&self) -> u32 {
        self.lock(|ring| ring.buffer_runtime_us())
    }

    /// Usable capacity.
    #[inline]
    pub const fn capacity(&self) -> usize {
        N - 1
    }
}

impl<const N: usize> Default for MotionQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> core::fmt::Debug for MotionQueue<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let (head, tail, nonbusy) = self.lock(|ring| (ring.head, ring.tail, ring.nonbusy));
        f.debug_struct("MotionQueue")
            .field("head", &head)
            .field("tail", &tail)
            .field("nonbusy", &nonbusy)
            .finish()
    }
}
