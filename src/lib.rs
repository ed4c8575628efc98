mod channel;
pub mod error;
mod mmap_raw;
pub mod pingpong;
pub mod rendezvous;
mod ring;
mod segment;
mod sequenced;
pub mod stats;

pub use channel::{spin_until, Channel};
pub use error::{Error, ErrorKind, Result};
pub use rendezvous::{LocalDoorbell, Rendezvous, Role, SignalDoorbell};
pub use ring::{RingChannel, DEFAULT_CAPACITY};
pub use segment::{OpenOptions, Segment};
pub use sequenced::SequencedRing;
