use std::io::Result;
use std::num::NonZero;
use std::os::fd::AsFd;
use std::ptr::NonNull;

use nix::libc::c_void;
use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};

/// A shared, read-write mapping of a whole file descriptor.
///
/// The mapping stays valid after the descriptor is closed and is released
/// on drop.
#[derive(Debug)]
pub(crate) struct MmapRaw {
    ptr: NonNull<c_void>,
    len: usize,
}

impl MmapRaw {
    pub fn new<F: AsFd>(len: NonZero<usize>, file: &F) -> Result<Self> {
        let ptr = unsafe {
            mmap(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                file,
                0,
            )?
        };
        Ok(MmapRaw {
            ptr,
            len: len.into(),
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr() as *mut u8
    }
}

impl Drop for MmapRaw {
    fn drop(&mut self) {
        if let Err(err) = unsafe { munmap(self.ptr, self.len) } {
            tracing::warn!(len = self.len, %err, "munmap failed");
        }
    }
}

// The mapping is plain memory owned by this handle; moving it to another
// thread is no different from moving a `Vec<u8>`.
unsafe impl Send for MmapRaw {}
