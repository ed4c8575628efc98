//! Ring whose position lives in the segment.
//!
//! The segment starts with two counters, the number of messages published
//! and the number consumed. Readiness comes from comparing them instead of
//! from the payload, the writer stops when the ring is full, and a reader
//! that finds something other than what it expected reports it instead of
//! spinning.

use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::channel::Channel;
use crate::error::{Error, ErrorKind, Result};
use crate::ring::checked_len;
use crate::segment::Segment;

#[repr(C)]
struct Header {
    published: AtomicU64,
    _pad0: [u8; 56],
    consumed: AtomicU64,
    _pad1: [u8; 56],
}

const HEADER_SIZE: usize = size_of::<Header>();

#[derive(Debug)]
pub struct SequencedRing {
    shm: Segment,
    slot_size: usize,
    capacity: usize,
}

impl SequencedRing {
    pub fn open(name: &str, slot_size: usize, capacity: usize) -> Result<Self> {
        let len = checked_len(slot_size, capacity)?
            .checked_add(HEADER_SIZE)
            .ok_or(Error::new(ErrorKind::Capacity(capacity)))?;
        // A freshly sized segment is zero-filled, which is an empty ring.
        let shm = Segment::open(name, len)?;
        Ok(SequencedRing {
            shm,
            slot_size,
            capacity,
        })
    }

    /// Writes `message` unless the peer still has `capacity` messages to read.
    pub fn try_publish(&mut self, message: &[u8]) -> Result<bool> {
        self.check_len(message)?;
        let base = self.shm.as_ptr()?;
        let hdr = unsafe { &*(base as *const Header) };
        let published = hdr.published.load(Ordering::Relaxed);
        let consumed = hdr.consumed.load(Ordering::Acquire);
        if published.wrapping_sub(consumed) >= self.capacity as u64 {
            return Ok(false);
        }
        unsafe {
            ptr::copy_nonoverlapping(message.as_ptr(), self.slot_ptr(base, published), self.slot_size);
        }
        hdr.published.store(published.wrapping_add(1), Ordering::Release);
        Ok(true)
    }

    /// Consumes the next message if there is one.
    ///
    /// A message that differs from `expected` means the peers are out of
    /// step and is reported as [`ErrorKind::Protocol`].
    pub fn try_consume(&mut self, expected: &[u8]) -> Result<bool> {
        self.check_len(expected)?;
        let base = self.shm.as_ptr()?;
        let hdr = unsafe { &*(base as *const Header) };
        let consumed = hdr.consumed.load(Ordering::Relaxed);
        if hdr.published.load(Ordering::Acquire) == consumed {
            return Ok(false);
        }
        let slot =
            unsafe { std::slice::from_raw_parts(self.slot_ptr(base, consumed), self.slot_size) };
        if slot != expected {
            return Err(Error::new(ErrorKind::Protocol { sequence: consumed }));
        }
        hdr.consumed.store(consumed.wrapping_add(1), Ordering::Release);
        Ok(true)
    }

    /// Copies the next message into `buf` if there is one.
    pub fn try_recv(&mut self, buf: &mut [u8]) -> Result<bool> {
        self.check_len(buf)?;
        let base = self.shm.as_ptr()?;
        let hdr = unsafe { &*(base as *const Header) };
        let consumed = hdr.consumed.load(Ordering::Relaxed);
        if hdr.published.load(Ordering::Acquire) == consumed {
            return Ok(false);
        }
        unsafe {
            ptr::copy_nonoverlapping(self.slot_ptr(base, consumed), buf.as_mut_ptr(), self.slot_size);
        }
        hdr.consumed.store(consumed.wrapping_add(1), Ordering::Release);
        Ok(true)
    }

    /// Messages published but not consumed yet.
    pub fn len(&self) -> Result<usize> {
        let (published, consumed) = self.counters()?;
        Ok(published.wrapping_sub(consumed) as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn is_full(&self) -> Result<bool> {
        Ok(self.len()? == self.capacity)
    }

    /// Total published and consumed counts since the segment was created.
    pub fn counters(&self) -> Result<(u64, u64)> {
        let hdr = unsafe { &*(self.shm.as_ptr()? as *const Header) };
        Ok((
            hdr.published.load(Ordering::Acquire),
            hdr.consumed.load(Ordering::Acquire),
        ))
    }

    pub fn close(&mut self) {
        self.shm.close();
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

    unsafe fn slot_ptr(&self, base: *mut u8, sequence: u64) -> *mut u8 {
        let slot = sequence as usize & (self.capacity - 1);
        base.add(HEADER_SIZE + slot * self.slot_size)
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

impl Channel for SequencedRing {
    fn slot_size(&self) -> usize {
        self.slot_size
    }

    fn try_publish(&mut self, message: &[u8]) -> Result<bool> {
        SequencedRing::try_publish(self, message)
    }

    fn try_consume(&mut self, expected: &[u8]) -> Result<bool> {
        SequencedRing::try_consume(self, expected)
    }

    fn close(&mut self) {
        SequencedRing::close(self)
    }
}
