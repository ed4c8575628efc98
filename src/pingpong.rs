//! The benchmarked loop.
//!
//! After the handshake the responder publishes into the responder→initiator
//! ring and waits for the same payload to come back on the
//! initiator→responder ring; the initiator does the mirror image. Every
//! iteration carries a payload derived from its number, so a slot never
//! still holds the message that is expected in it next.

use std::time::Duration;

use crate::channel::{spin_until, Channel};
use crate::error::{Error, ErrorKind, Result};
use crate::rendezvous::{Doorbell, Rendezvous, Role};
use crate::ring::{RingChannel, DEFAULT_CAPACITY};
use crate::segment::Segment;
use crate::sequenced::SequencedRing;
use crate::stats::{Accumulator, Benchmark, Discard, Report};

/// Largest accepted message size.
pub const MAX_MESSAGE_SIZE: usize = 1 << 16;

pub const DEFAULT_NAMESPACE: &str = "shmring";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Transport {
    /// Process-local cursors, readiness by payload comparison.
    #[default]
    Ring,
    /// Shared published/consumed counters.
    Sequenced,
}

impl Transport {
    pub fn name(self) -> &'static str {
        match self {
            Transport::Ring => "shm",
            Transport::Sequenced => "shm-sequenced",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub message_size: usize,
    pub iterations: u64,
    pub capacity: usize,
    /// `None` spins forever when the peer stops responding.
    pub spin_timeout: Option<Duration>,
    pub namespace: String,
    pub transport: Transport,
}

impl Config {
    pub fn new(message_size: usize, iterations: u64) -> Self {
        Config {
            message_size,
            iterations,
            capacity: DEFAULT_CAPACITY,
            spin_timeout: None,
            namespace: String::from(DEFAULT_NAMESPACE),
            transport: Transport::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.message_size == 0 || self.iterations == 0 {
            return Err(config_error(
                "message size and iterations must be positive integers",
            ));
        }
        if self.message_size > MAX_MESSAGE_SIZE {
            return Err(config_error(format!(
                "message size must be at most {MAX_MESSAGE_SIZE} bytes"
            )));
        }
        if !self.capacity.is_power_of_two() {
            return Err(Error::new(ErrorKind::Capacity(self.capacity)));
        }
        if self.namespace.is_empty() || self.namespace.contains('/') {
            return Err(config_error("namespace must be non-empty and contain no '/'"));
        }
        Ok(())
    }

    pub fn segment_names(&self) -> SegmentNames {
        SegmentNames {
            to_initiator: format!("/{}_r2i", self.namespace),
            to_responder: format!("/{}_i2r", self.namespace),
        }
    }
}

fn config_error(msg: impl Into<String>) -> Error {
    Error::new(ErrorKind::Config(msg.into()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentNames {
    pub to_initiator: String,
    pub to_responder: String,
}

/// Both directions, as seen from either peer.
#[derive(Debug)]
pub struct Channels<C> {
    pub to_initiator: C,
    pub to_responder: C,
}

impl<C: Channel> Channels<C> {
    pub fn close(&mut self) {
        self.to_initiator.close();
        self.to_responder.close();
    }

    fn check(&self, config: &Config) -> Result<()> {
        for slot_size in [self.to_initiator.slot_size(), self.to_responder.slot_size()] {
            if slot_size != config.message_size {
                return Err(Error::new(ErrorKind::MessageSize {
                    expected: slot_size,
                    actual: config.message_size,
                }));
            }
        }
        Ok(())
    }
}

/// Writes the payload of `iteration` into `buf`.
///
/// The decimal iteration number is left-aligned and padded with `.`. When it
/// does not fit only its low-order digits are kept, so the payloads of two
/// iterations a power of two apart always differ.
pub fn fill_payload(iteration: u64, buf: &mut [u8]) {
    let mut digits = [0u8; 20];
    let mut start = digits.len();
    let mut n = iteration;
    loop {
        start -= 1;
        digits[start] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    let digits = &digits[start..];
    let keep = digits.len().min(buf.len());
    buf[..keep].copy_from_slice(&digits[digits.len() - keep..]);
    buf[keep..].fill(b'.');
}

pub fn payload(iteration: u64, size: usize) -> Vec<u8> {
    let mut buf = vec![0; size];
    fill_payload(iteration, &mut buf);
    buf
}

/// Waits for the initiator, then times `config.iterations` round trips.
pub fn run_responder<C, D, A>(
    channels: &mut Channels<C>,
    rendezvous: &Rendezvous<D>,
    accumulator: &mut A,
    config: &Config,
) -> Result<()>
where
    C: Channel,
    D: Doorbell,
    A: Accumulator,
{
    config.validate()?;
    channels.check(config)?;
    let mut message = vec![0; config.message_size];

    match config.spin_timeout {
        Some(timeout) => rendezvous.wait_timeout(timeout)?,
        None => rendezvous.wait_until_notified()?,
    }
    tracing::info!(
        iterations = config.iterations,
        message_size = config.message_size,
        "responder starting"
    );

    for i in 0..config.iterations {
        fill_payload(i, &mut message);
        accumulator.begin_iteration();
        spin_until(config.spin_timeout, || {
            channels.to_initiator.try_publish(&message)
        })
        .inspect_err(|err| tracing::warn!(iteration = i, %err, "publish failed"))?;
        spin_until(config.spin_timeout, || {
            channels.to_responder.try_consume(&message)
        })
        .inspect_err(|err| tracing::warn!(iteration = i, %err, "no reply from initiator"))?;
        accumulator.end_iteration(1);
    }
    tracing::info!("responder finished");
    Ok(())
}

/// Signals readiness, then echoes every payload back.
pub fn run_initiator<C, D>(
    channels: &mut Channels<C>,
    rendezvous: &Rendezvous<D>,
    config: &Config,
) -> Result<()>
where
    C: Channel,
    D: Doorbell,
{
    config.validate()?;
    channels.check(config)?;
    let mut message = vec![0; config.message_size];

    rendezvous.notify()?;
    tracing::info!(
        iterations = config.iterations,
        message_size = config.message_size,
        "initiator starting"
    );

    for i in 0..config.iterations {
        fill_payload(i, &mut message);
        spin_until(config.spin_timeout, || {
            channels.to_initiator.try_consume(&message)
        })
        .inspect_err(|err| tracing::warn!(iteration = i, %err, "no message from responder"))?;
        spin_until(config.spin_timeout, || {
            channels.to_responder.try_publish(&message)
        })
        .inspect_err(|err| tracing::warn!(iteration = i, %err, "publish failed"))?;
    }
    tracing::info!("initiator finished");
    Ok(())
}

/// Runs one peer of a benchmark over real shared memory and signals.
///
/// Returns the timing report on the responder side.
pub fn run_peer(role: Role, config: &Config) -> Result<Option<Report>> {
    match config.transport {
        Transport::Ring => run_peer_with(role, config, RingChannel::open),
        Transport::Sequenced => run_peer_with(role, config, SequencedRing::open),
    }
}

fn run_peer_with<C, F>(role: Role, config: &Config, open: F) -> Result<Option<Report>>
where
    C: Channel,
    F: Fn(&str, usize, usize) -> Result<C>,
{
    config.validate()?;
    if role == Role::Coordinator {
        return Err(Error::new(ErrorKind::Role(role)));
    }
    // Arm before anything else so an early notification cannot kill us.
    let rendezvous = Rendezvous::install(role)?;

    let names = config.segment_names();
    if role == Role::Responder {
        // Leftovers of a crashed run could satisfy a payload comparison.
        for name in [&names.to_initiator, &names.to_responder] {
            if Segment::remove(name)? {
                tracing::warn!(%name, "removed stale shared memory segment");
            }
        }
    }

    let mut channels = Channels {
        to_initiator: open(&names.to_initiator, config.message_size, config.capacity)?,
        to_responder: open(&names.to_responder, config.message_size, config.capacity)?,
    };

    let report = match role {
        Role::Responder => {
            let mut bench = Benchmark::with_capacity(
                config.transport.name(),
                config.message_size,
                usize::try_from(config.iterations).unwrap_or(0),
            );
            run_responder(&mut channels, &rendezvous, &mut bench, config)?;
            bench.report()
        }
        _ => {
            run_initiator(&mut channels, &rendezvous, config)?;
            Discard.report()
        }
    };
    channels.close();
    Ok(report)
}
