use std::time::{Duration, Instant};

use crate::error::{Error, ErrorKind, Result};

/// One direction of a two-peer message exchange over shared memory.
///
/// Neither operation blocks. Callers spin on them, see [`spin_until`].
pub trait Channel {
    fn slot_size(&self) -> usize;

    /// Writes `message` into the next slot. `false` means there is no room yet.
    fn try_publish(&mut self, message: &[u8]) -> Result<bool>;

    /// Consumes the next slot if it holds `expected`. `false` means not yet.
    fn try_consume(&mut self, expected: &[u8]) -> Result<bool>;

    /// Unlinks and unmaps the backing segment. Idempotent.
    fn close(&mut self);
}

/// Busy-polls `ready` until it returns `true`.
///
/// With no timeout this spins for as long as it takes, including forever
/// if the peer is gone.
pub fn spin_until<F>(timeout: Option<Duration>, mut ready: F) -> Result<()>
where
    F: FnMut() -> Result<bool>,
{
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut spins: u32 = 0;
    loop {
        if ready()? {
            return Ok(());
        }
        spins = spins.wrapping_add(1);
        // Only look at the clock every 1024 spins.
        if spins % 1024 == 0 {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(Error::new(ErrorKind::Timeout));
                }
            }
        }
        std::hint::spin_loop();
    }
}
