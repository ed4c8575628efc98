//! Fixed-slot ring over a shared-memory segment.
//!
//! Cursors live in each process, not in the segment. A reader finds out
//! that a message has arrived by comparing the slot under its cursor with
//! the message it expects, so both sides only stay in step while they take
//! strict turns and every message differs from the one it overwrites.

use std::ptr;
use std::sync::atomic::{fence, Ordering};

use crate::channel::Channel;
use crate::error::{Error, ErrorKind, Result};
use crate::segment::Segment;

/// Default number of slots per ring.
pub const DEFAULT_CAPACITY: usize = 1 << 12;

#[derive(Debug)]
pub struct RingChannel {
    shm: Segment,
    slot_size: usize,
    capacity: usize,
    write_slot: usize,
    read_slot: usize,
}

impl RingChannel {
    /// Attaches to (or creates) `name`, sized for `capacity` slots.
    pub fn open(name: &str, slot_size: usize, capacity: usize) -> Result<Self> {
        let len = checked_len(slot_size, capacity)?;
        let shm = Segment::open(name, len)?;
        Ok(RingChannel {
            shm,
            slot_size,
            capacity,
            write_slot: 0,
            read_slot: 0,
        })
    }

    /// Copies `message` into the slot under the write cursor and moves on.
    ///
    /// Nothing stops this from overwriting a slot the peer has not read yet.
    pub fn publish(&mut self, message: &[u8]) -> Result<()> {
        self.check_len(message)?;
        let base = self.shm.as_ptr()?;
        unsafe {
            ptr::copy_nonoverlapping(
                message.as_ptr(),
                base.add(self.write_cursor()),
                self.slot_size,
            );
        }
        fence(Ordering::Release);
        self.write_slot = self.next(self.write_slot);
        Ok(())
    }

    /// Consumes the slot under the read cursor if it holds `expected`.
    ///
    /// Returns `false`, leaving the cursor where it is, when it does not.
    pub fn try_consume(&mut self, expected: &[u8]) -> Result<bool> {
        self.check_len(expected)?;
        let base = self.shm.as_ptr()?;
        fence(Ordering::Acquire);
        let slot = unsafe {
            std::slice::from_raw_parts(base.add(self.read_cursor()) as *const u8, self.slot_size)
        };
        if slot != expected {
            return Ok(false);
        }
        self.read_slot = self.next(self.read_slot);
        Ok(true)
    }

    pub fn close(&mut self) {
        self.shm.close();
    }

    /// Byte offset of the next write.
    pub fn write_cursor(&self) -> usize {
        self.write_slot * self.slot_size
    }

    /// Byte offset of the next read.
    pub fn read_cursor(&self) -> usize {
        self.read_slot * self.slot_size
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn name(&self) -> &str {
        self.shm.name()
    }

    fn next(&self, slot: usize) -> usize {
        (slot + 1) & (self.capacity - 1)
    }

    fn check_len(&self, message: &[u8]) -> Result<()> {
        if message.len() != self.slot_size {
            return Err(Error::new(ErrorKind::MessageSize {
                expected: self.slot_size,
                actual: message.len(),
            }));
        }
        Ok(())
    }
}

impl Channel for RingChannel {
    fn slot_size(&self) -> usize {
        self.slot_size
    }

    fn try_publish(&mut self, message: &[u8]) -> Result<bool> {
        self.publish(message)?;
        Ok(true)
    }

    fn try_consume(&mut self, expected: &[u8]) -> Result<bool> {
        RingChannel::try_consume(self, expected)
    }

    fn close(&mut self) {
        RingChannel::close(self)
    }
}

/// Validates the ring geometry and returns the size of the slot area.
pub(crate) fn checked_len(slot_size: usize, capacity: usize) -> Result<usize> {
    if slot_size == 0 {
        return Err(Error::new(ErrorKind::SlotSize));
    }
    if !capacity.is_power_of_two() {
        return Err(Error::new(ErrorKind::Capacity(capacity)));
    }
    slot_size
        .checked_mul(capacity)
        .ok_or(Error::new(ErrorKind::Capacity(capacity)))
}
