//! Named POSIX shared-memory segments.
//!
//! A [`Segment`] is created by whichever process opens the name first and
//! attached by the other. Neither side owns it: each one unlinks the name
//! and unmaps its own view when it is done, and an unlink that finds the
//! name already gone is not an error.

use std::num::NonZero;
use std::os::fd::AsRawFd;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::{fstat, Mode};
use nix::unistd::ftruncate;

use crate::error::{Error, ErrorKind, Result};
use crate::mmap_raw::MmapRaw;

pub struct OpenOptions {
    mode: Mode,
    oflg: OFlag,
}

impl OpenOptions {
    /// Opens `name`, sizes it to `len` bytes and maps it read-write.
    pub fn map(self, name: &str, len: usize) -> Result<Segment> {
        let len = NonZero::new(len).ok_or(Error::new(ErrorKind::SegmentSize {
            expected: 1,
            actual: 0,
        }))?;
        let name = prepend_slash(name);
        let fd = shm_open(name.as_str(), self.oflg, self.mode)?;
        match ftruncate(&fd, len.get() as i64) {
            // Some platforms refuse to truncate an object that already has a size.
            Ok(()) | Err(Errno::EINVAL) => (),
            Err(err) => return Err(err.into()),
        }
        let statbuf = fstat(fd.as_raw_fd())?;
        if statbuf.st_size as usize != len.get() {
            return Err(Error::new(ErrorKind::SegmentSize {
                expected: len.get(),
                actual: statbuf.st_size as usize,
            }));
        }
        // The mapping outlives the descriptor, which closes when `fd` drops.
        let inner = MmapRaw::new(len, &fd)?;
        tracing::debug!(name = %name, len = len.get(), "mapped shared memory segment");
        Ok(Segment {
            name,
            inner: Some(inner),
        })
    }

    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = Mode::from_bits_truncate(mode);
        self
    }

    pub fn create(mut self, create: bool) -> Self {
        if create {
            self.oflg |= OFlag::O_CREAT;
        } else {
            self.oflg &= !OFlag::O_CREAT;
        }
        self
    }

    pub fn exclusive(mut self, exclusive: bool) -> Self {
        if exclusive {
            self.oflg |= OFlag::O_EXCL;
        } else {
            self.oflg &= !OFlag::O_EXCL;
        }
        self
    }
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions {
            mode: Mode::from_bits_truncate(0o666),
            oflg: OFlag::O_RDWR,
        }
    }
}

#[derive(Debug)]
pub struct Segment {
    name: String,
    inner: Option<MmapRaw>,
}

impl Segment {
    /// Creates the segment, or attaches to it if the peer got there first.
    pub fn open(name: &str, len: usize) -> Result<Self> {
        Segment::options().create(true).map(name, len)
    }

    pub fn options() -> OpenOptions {
        OpenOptions::default()
    }

    /// Unlinks a leftover name. Returns whether there was anything to remove.
    pub fn remove(name: &str) -> Result<bool> {
        match shm_unlink(prepend_slash(name).as_str()) {
            Ok(()) => Ok(true),
            Err(Errno::ENOENT) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.inner.as_ref().map_or(0, MmapRaw::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_mapped(&self) -> bool {
        self.inner.is_some()
    }

    /// Base address of the local mapping.
    pub(crate) fn as_ptr(&self) -> Result<*mut u8> {
        self.inner
            .as_ref()
            .map(MmapRaw::as_ptr)
            .ok_or(Error::new(ErrorKind::Closed))
    }

    /// Unlinks the name, then drops the local mapping. Safe to call again.
    pub fn close(&mut self) {
        if self.inner.is_none() {
            return;
        }
        // The peer may have unlinked first.
        match shm_unlink(self.name.as_str()) {
            Ok(()) | Err(Errno::ENOENT) => (),
            Err(err) => tracing::warn!(name = %self.name, %err, "shm_unlink failed"),
        }
        drop(self.inner.take());
        tracing::debug!(name = %self.name, "closed shared memory segment");
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        self.close();
    }
}

fn prepend_slash(name: &str) -> String {
    if name.starts_with('/') {
        String::from(name)
    } else {
        String::from("/") + name
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    static NEXT: AtomicUsize = AtomicUsize::new(0);

    /// A segment name no other test in this process uses.
    pub(crate) fn unique_name(tag: &str) -> String {
        format!(
            "/shmring_test_{}_{}_{}",
            tag,
            std::process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        )
    }

    #[test]
    fn both_sides_see_the_same_bytes() {
        let name = unique_name("segment");
        let mut a = Segment::open(&name, 4096).unwrap();
        let mut b = Segment::open(&name, 4096).unwrap();
        assert_eq!(a.len(), 4096);
        unsafe {
            a.as_ptr().unwrap().add(100).write(0xab);
            assert_eq!(b.as_ptr().unwrap().add(100).read(), 0xab);
        }
        a.close();
        b.close();
    }

    #[test]
    fn close_is_idempotent() {
        let name = unique_name("close");
        let mut seg = Segment::open(&name, 64).unwrap();
        seg.close();
        assert!(!seg.is_mapped());
        seg.close();
        assert!(matches!(
            seg.as_ptr().unwrap_err().kind(),
            ErrorKind::Closed
        ));
    }

    #[test]
    fn peer_unlink_is_benign() {
        let name = unique_name("peer");
        let mut a = Segment::open(&name, 64).unwrap();
        let mut b = Segment::open(&name, 64).unwrap();
        a.close();
        b.close();
        assert!(!Segment::remove(&name).unwrap());
    }

    #[test]
    fn exclusive_open_fails_when_name_exists() {
        let name = unique_name("excl");
        let _seg = Segment::open(&name, 64).unwrap();
        let err = Segment::options()
            .create(true)
            .exclusive(true)
            .map(&name, 64)
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Io(_)));
    }

    #[test]
    fn zero_length_is_rejected() {
        let err = Segment::open(&unique_name("zero"), 0).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::SegmentSize { .. }));
    }

    #[test]
    fn names_get_a_leading_slash() {
        let name = unique_name("slash");
        let seg = Segment::open(name.trim_start_matches('/'), 64).unwrap();
        assert_eq!(seg.name(), name);
    }
}
