//! The collaborator traits the engine is constructed over.
//!
//! All three traits are callback-based and synchronous: a call returns
//! immediately and completion (data, nack, timeout, scheduled tick)
//! arrives as a later callback on the same event-loop thread. The
//! engine is single-threaded by contract, so callbacks are plain
//! (non-`Send`) closures.

use std::rc::Rc;
use std::time::Duration;

use vectorsync_core::Name;

use crate::error::Result;
use crate::packet::{Data, Interest, Nack};

/// Called for every incoming interest matching a registered prefix.
/// Arguments: the registered prefix and the interest.
pub type OnInterest = Rc<dyn Fn(&Name, &Interest)>;

/// Called when prefix registration fails.
pub type OnRegisterFailed = Box<dyn FnOnce(&Name)>;

/// Called when data satisfies an expressed interest.
pub type OnData = Box<dyn FnOnce(&Interest, &Data)>;

/// Called when an expressed interest is refused.
pub type OnNack = Box<dyn FnOnce(&Interest, &Nack)>;

/// Called when an expressed interest times out unsatisfied.
pub type OnTimeout = Box<dyn FnOnce(&Interest)>;

/// A scoped prefix registration. Dropping it unregisters the prefix.
pub struct RegisteredPrefix {
    unregister: Option<Box<dyn FnOnce()>>,
}

impl RegisteredPrefix {
    /// Wrap an unregister action.
    pub fn new(unregister: impl FnOnce() + 'static) -> Self {
        Self {
            unregister: Some(Box::new(unregister)),
        }
    }

    /// A handle with nothing to unregister.
    pub fn noop() -> Self {
        Self { unregister: None }
    }
}

impl Drop for RegisteredPrefix {
    fn drop(&mut self) {
        if let Some(unregister) = self.unregister.take() {
            unregister();
        }
    }
}

/// A scoped outgoing interest. Dropping it cancels the interest: its
/// callbacks will never fire.
pub struct InterestHandle {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl InterestHandle {
    /// Wrap a cancel action.
    pub fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle with nothing to cancel (e.g. an interest satisfied
    /// immediately from a cache).
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    /// Cancel the interest now.
    pub fn cancel(self) {
        drop(self);
    }

    /// Let the interest run to completion without a live handle.
    pub fn detach(mut self) {
        self.cancel = None;
    }
}

impl Drop for InterestHandle {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// The request/response substrate.
pub trait Face {
    /// Receive interests matching `prefix` through `on_interest`.
    ///
    /// Registration may fail asynchronously, in which case
    /// `on_register_failed` fires with the prefix.
    fn register_prefix(
        &self,
        prefix: &Name,
        on_interest: OnInterest,
        on_register_failed: OnRegisterFailed,
    ) -> RegisteredPrefix;

    /// Express an interest. Exactly one of the three callbacks fires,
    /// unless the returned handle is dropped first.
    fn express_interest(
        &self,
        interest: Interest,
        on_data: OnData,
        on_nack: OnNack,
        on_timeout: OnTimeout,
    ) -> InterestHandle;

    /// Send a data packet.
    fn put(&self, data: Data) -> Result<()>;
}

/// Signs outgoing data packets.
pub trait KeyChain {
    /// Fill in `data.signature`, optionally with a specific certificate
    /// (`None` uses the default identity).
    fn sign(&self, data: &mut Data, certificate: Option<&Name>) -> Result<()>;
}

/// Runs a callback after a delay on the event-loop thread.
pub trait Scheduler {
    /// Schedule `callback` to run once after `delay`.
    fn schedule(&self, delay: Duration, callback: Box<dyn FnOnce()>);
}
