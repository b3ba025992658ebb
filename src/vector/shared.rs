//! Slot-partitioned result buffer shared between an orchestrator and its workers.
//!
//! The buffer is one contiguous run of 64-bit lanes cut into `num_slots`
//! equal slots. Slot `i` has exactly one [`SlotWriter`], owned by worker `i`.
//! The orchestrator reads a slot only after it received that worker's reply
//! for the current call; the reply channel orders the writer's stores before
//! the reader's loads, so lanes use relaxed atomics and no lock is involved.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::core::{GymError, Result};
use crate::spaces::FlatSpace;

/// Pre-allocated observation storage for a batch of `num_slots` instances.
#[derive(Debug)]
pub struct SharedResultBuffer {
    lanes: Box<[AtomicU64]>,
    slot_len: usize,
    num_slots: usize,
}

impl SharedResultBuffer {
    /// Allocate `num_slots * slot_len` zeroed lanes.
    pub fn new(num_slots: usize, slot_len: usize) -> Arc<Self> {
        let lanes = (0..num_slots * slot_len).map(|_| AtomicU64::new(0)).collect();
        Arc::new(Self { lanes, slot_len, num_slots })
    }

    /// Allocate a buffer holding one element of `space` per slot.
    pub fn for_space<S: FlatSpace>(space: &S, num_slots: usize) -> Arc<Self> {
        Self::new(num_slots, space.flat_dim())
    }

    /// Lanes per slot.
    pub fn slot_len(&self) -> usize { self.slot_len }

    /// Number of slots.
    pub fn num_slots(&self) -> usize { self.num_slots }

    fn slot(&self, slot: usize) -> &[AtomicU64] {
        &self.lanes[slot * self.slot_len..(slot + 1) * self.slot_len]
    }

    /// The writer for `slot`. Hand out at most one per slot.
    pub(crate) fn writer(self: &Arc<Self>, slot: usize) -> SlotWriter {
        assert!(slot < self.num_slots, "slot {slot} out of range ({} slots)", self.num_slots);
        SlotWriter { buffer: Arc::clone(self), slot }
    }

    /// Copy the lanes of `slot` into `out`.
    ///
    /// Only meaningful once the slot's writer has reported completion.
    pub fn read_slot(&self, slot: usize, out: &mut [u64]) -> Result<()> {
        if slot >= self.num_slots || out.len() != self.slot_len {
            return Err(GymError::InvalidObservation(format!(
                "cannot read slot {slot} into {} lanes ({} slots of {} lanes)",
                out.len(),
                self.num_slots,
                self.slot_len
            )));
        }
        for (dst, lane) in out.iter_mut().zip(self.slot(slot)) {
            *dst = lane.load(Ordering::Relaxed);
        }
        Ok(())
    }

    /// Read `slot` and rebuild the element of `space` stored there.
    pub fn read_element<S: FlatSpace>(&self, space: &S, slot: usize, scratch: &mut Vec<u64>) -> Result<S::Element> {
        scratch.resize(self.slot_len, 0);
        self.read_slot(slot, scratch)?;
        Ok(space.unflatten(scratch))
    }
}

/// Exclusive write access to one slot of a [`SharedResultBuffer`].
///
/// Not `Clone`: the single writer of a slot is whoever owns this value.
#[derive(Debug)]
pub struct SlotWriter {
    buffer: Arc<SharedResultBuffer>,
    slot: usize,
}

impl SlotWriter {
    /// Slot this writer owns.
    pub fn slot(&self) -> usize { self.slot }

    /// Store `lanes` into the slot. The length must equal the slot length.
    pub fn write(&mut self, lanes: &[u64]) -> Result<()> {
        if lanes.len() != self.buffer.slot_len {
            return Err(GymError::InvalidObservation(format!(
                "observation has {} lanes, slot {} holds {}",
                lanes.len(),
                self.slot,
                self.buffer.slot_len
            )));
        }
        for (lane, &v) in self.buffer.slot(self.slot).iter().zip(lanes) {
            lane.store(v, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Flatten `elem` through `scratch` and store it into the slot.
    pub fn write_element<S: FlatSpace>(&mut self, space: &S, elem: &S::Element, scratch: &mut Vec<u64>) -> Result<()> {
        if !space.has_shape(elem) {
            return Err(GymError::InvalidObservation(format!(
                "observation for slot {} does not match the observation space",
                self.slot
            )));
        }
        scratch.clear();
        scratch.resize(space.flat_dim(), 0);
        space.flatten_into(elem, scratch);
        self.write(scratch)
    }
}
