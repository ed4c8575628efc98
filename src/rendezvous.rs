//! One-shot start handshake between the two peers.
//!
//! The initiator tells the responder it is ready by signalling the whole
//! process group; no shared memory is involved. Each process reacts only to
//! the signal addressed to its own role and swallows the other one, whose
//! default action would otherwise terminate it.
//!
//! The signal handler does nothing but set an atomic flag. The waiter spins
//! on an atomic swap of that flag, which checks and clears it in one step,
//! so a signal that lands before the wait starts is still seen.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nix::libc::c_int;
use nix::sys::signal::{kill, sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::Pid;

use crate::channel::spin_until;
use crate::error::{Error, ErrorKind, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Signals readiness, then echoes.
    Initiator,
    /// Waits for the initiator, then drives the timed loop.
    Responder,
    /// Spawns both peers and must survive their signals.
    Coordinator,
}

impl Role {
    /// The role a notification from `self` is addressed to.
    pub fn peer(self) -> Option<Role> {
        match self {
            Role::Initiator => Some(Role::Responder),
            Role::Responder => Some(Role::Initiator),
            Role::Coordinator => None,
        }
    }

    /// The signal that notifies a process waiting as `self`.
    pub fn signal(self) -> Option<Signal> {
        match self {
            Role::Responder => Some(Signal::SIGUSR1),
            Role::Initiator => Some(Signal::SIGUSR2),
            Role::Coordinator => None,
        }
    }
}

/// Delivers notifications and records their arrival.
pub trait Doorbell {
    /// Notifies every waiter in the `target` role.
    fn ring(&self, target: Role) -> Result<()>;

    /// Flag raised when a notification for `role` arrives.
    fn flag(&self, role: Role) -> Option<&AtomicBool>;
}

type Handler = extern "C" fn(c_int);

static RESPONDER_NOTIFIED: AtomicBool = AtomicBool::new(false);
static INITIATOR_NOTIFIED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_responder_signal(_: c_int) {
    RESPONDER_NOTIFIED.store(true, Ordering::Release);
}

extern "C" fn on_initiator_signal(_: c_int) {
    INITIATOR_NOTIFIED.store(true, Ordering::Release);
}

extern "C" fn ignore_signal(_: c_int) {}

/// Process-group signals. Handlers and flags are process-wide.
#[derive(Debug, Clone, Copy)]
pub struct SignalDoorbell {
    _priv: (),
}

impl SignalDoorbell {
    /// Installs the handlers for `role`.
    pub fn install(role: Role) -> Result<Self> {
        let responder: Handler = if role == Role::Responder {
            on_responder_signal
        } else {
            ignore_signal
        };
        let initiator: Handler = if role == Role::Initiator {
            on_initiator_signal
        } else {
            ignore_signal
        };
        install_handler(Signal::SIGUSR1, responder)?;
        install_handler(Signal::SIGUSR2, initiator)?;
        tracing::debug!(?role, "installed rendezvous signal handlers");
        Ok(SignalDoorbell { _priv: () })
    }
}

fn install_handler(signal: Signal, handler: Handler) -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(handler),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    // The handlers only store into an atomic.
    unsafe { sigaction(signal, &action) }?;
    Ok(())
}

impl Doorbell for SignalDoorbell {
    fn ring(&self, target: Role) -> Result<()> {
        let signal = target.signal().ok_or(Error::new(ErrorKind::Role(target)))?;
        // Pid 0 addresses every process in our process group.
        kill(Pid::from_raw(0), signal)?;
        Ok(())
    }

    fn flag(&self, role: Role) -> Option<&AtomicBool> {
        match role {
            Role::Responder => Some(&RESPONDER_NOTIFIED),
            Role::Initiator => Some(&INITIATOR_NOTIFIED),
            Role::Coordinator => None,
        }
    }
}

/// In-memory notifications for peers that are threads of one process.
#[derive(Debug, Clone, Default)]
pub struct LocalDoorbell {
    flags: Arc<[AtomicBool; 2]>,
}

impl LocalDoorbell {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Doorbell for LocalDoorbell {
    fn ring(&self, target: Role) -> Result<()> {
        let flag = self.flag(target).ok_or(Error::new(ErrorKind::Role(target)))?;
        flag.store(true, Ordering::Release);
        Ok(())
    }

    fn flag(&self, role: Role) -> Option<&AtomicBool> {
        match role {
            Role::Responder => Some(&self.flags[0]),
            Role::Initiator => Some(&self.flags[1]),
            Role::Coordinator => None,
        }
    }
}

#[derive(Debug)]
pub struct Rendezvous<D = SignalDoorbell> {
    role: Role,
    doorbell: D,
}

impl Rendezvous<SignalDoorbell> {
    /// Arms the process for `role` using real signals.
    pub fn install(role: Role) -> Result<Self> {
        Ok(Rendezvous {
            role,
            doorbell: SignalDoorbell::install(role)?,
        })
    }
}

impl<D: Doorbell> Rendezvous<D> {
    pub fn with_doorbell(role: Role, doorbell: D) -> Self {
        Rendezvous { role, doorbell }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Tells the peer role we are ready. Fire and forget.
    pub fn notify(&self) -> Result<()> {
        let peer = self.role.peer().ok_or(Error::new(ErrorKind::Role(self.role)))?;
        tracing::debug!(role = ?self.role, ?peer, "notifying peer");
        self.doorbell.ring(peer)
    }

    /// Consumes a pending notification, if there is one.
    pub fn poll(&self) -> Result<bool> {
        let flag = self
            .doorbell
            .flag(self.role)
            .ok_or(Error::new(ErrorKind::Role(self.role)))?;
        Ok(flag.swap(false, Ordering::AcqRel))
    }

    /// Spins until the peer has notified us.
    pub fn wait_until_notified(&self) -> Result<()> {
        spin_until(None, || self.poll())?;
        tracing::debug!(role = ?self.role, "peer is ready");
        Ok(())
    }

    /// Like [`wait_until_notified`](Self::wait_until_notified), giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<()> {
        spin_until(Some(timeout), || self.poll())?;
        tracing::debug!(role = ?self.role, "peer is ready");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn local_pair() -> (Rendezvous<LocalDoorbell>, Rendezvous<LocalDoorbell>) {
        let bell = LocalDoorbell::new();
        (
            Rendezvous::with_doorbell(Role::Initiator, bell.clone()),
            Rendezvous::with_doorbell(Role::Responder, bell),
        )
    }

    #[test]
    fn roles_address_each_other() {
        assert_eq!(Role::Initiator.peer(), Some(Role::Responder));
        assert_eq!(Role::Responder.peer(), Some(Role::Initiator));
        assert_eq!(Role::Coordinator.peer(), None);
        assert_ne!(Role::Initiator.signal(), Role::Responder.signal());
    }

    #[test]
    fn early_notification_is_not_lost() {
        let (initiator, responder) = local_pair();
        initiator.notify().unwrap();
        assert!(responder.poll().unwrap());
        // Consumed.
        assert!(!responder.poll().unwrap());
    }

    #[test]
    fn notification_reaches_only_the_peer() {
        let (initiator, responder) = local_pair();
        initiator.notify().unwrap();
        assert!(!initiator.poll().unwrap());
        assert!(responder.poll().unwrap());
    }

    #[test]
    fn wait_completes_after_a_concurrent_notify() {
        let (initiator, responder) = local_pair();
        let waiter = thread::spawn(move || responder.wait_timeout(Duration::from_secs(10)));
        thread::sleep(Duration::from_millis(10));
        initiator.notify().unwrap();
        waiter.join().unwrap().unwrap();
    }

    #[test]
    fn handshake_can_be_repeated() {
        let (initiator, responder) = local_pair();
        for _ in 0..3 {
            initiator.notify().unwrap();
            responder.wait_until_notified().unwrap();
            responder.notify().unwrap();
            initiator.wait_until_notified().unwrap();
        }
    }

    #[test]
    fn wait_without_notify_times_out() {
        let (_initiator, responder) = local_pair();
        let err = responder
            .wait_timeout(Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Timeout));
    }

    #[test]
    fn coordinator_neither_notifies_nor_waits() {
        let coordinator = Rendezvous::with_doorbell(Role::Coordinator, LocalDoorbell::new());
        assert!(matches!(
            coordinator.notify().unwrap_err().kind(),
            ErrorKind::Role(Role::Coordinator)
        ));
        assert!(coordinator.poll().is_err());
    }
}
