//! In-process implementations of the collaborator traits.
//!
//! [`MemoryNetwork`] is a broadcast medium connecting any number of
//! [`MemoryFace`]s: an expressed interest fans out to every *other*
//! face's matching filter, and a data packet satisfies matching
//! pending interests across the network. Data with a freshness period
//! is cached and can answer later interests until it goes stale, which
//! is exactly the behaviour newcomer responses rely on.
//!
//! Every callback is delivered as its own `spawn_local` task, so each
//! one runs to completion on the single event-loop thread. All of this
//! therefore requires a running tokio `LocalSet`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Duration;

use bytes::Bytes;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use tokio::time::Instant;
use tracing::{debug, trace};
use vectorsync_core::Name;

use crate::error::Result;
use crate::packet::{Data, Interest};
use crate::traits::{
    Face, InterestHandle, KeyChain, OnData, OnInterest, OnNack, OnRegisterFailed, OnTimeout,
    RegisteredPrefix, Scheduler,
};

/// A shared in-process broadcast medium.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    core: Rc<RefCell<NetworkCore>>,
}

#[derive(Default)]
struct NetworkCore {
    faces: Vec<Weak<RefCell<FaceCore>>>,
    cache: Vec<CachedData>,
}

struct CachedData {
    data: Data,
    stale_at: Instant,
}

impl NetworkCore {
    fn purge_cache(&mut self, now: Instant) {
        self.cache.retain(|c| now < c.stale_at);
    }
}

impl MemoryNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new face to the network.
    pub fn face(&self) -> MemoryFace {
        let core = Rc::new(RefCell::new(FaceCore {
            filters: Vec::new(),
            pending: HashMap::new(),
            next_id: 0,
            link_up: true,
            refuse_registrations: false,
        }));
        self.core.borrow_mut().faces.push(Rc::downgrade(&core));
        MemoryFace {
            core,
            network: Rc::clone(&self.core),
        }
    }
}

struct FaceCore {
    filters: Vec<Filter>,
    pending: HashMap<u64, PendingOut>,
    next_id: u64,
    link_up: bool,
    refuse_registrations: bool,
}

struct Filter {
    id: u64,
    prefix: Name,
    on_interest: OnInterest,
}

struct PendingOut {
    interest: Interest,
    on_data: OnData,
    #[allow(dead_code)]
    on_nack: OnNack,
    on_timeout: OnTimeout,
}

/// One endpoint on a [`MemoryNetwork`].
pub struct MemoryFace {
    core: Rc<RefCell<FaceCore>>,
    network: Rc<RefCell<NetworkCore>>,
}

impl MemoryFace {
    /// Simulate link state. While the link is down, nothing this face
    /// sends reaches the network and nothing on the network reaches
    /// this face; pending interests still time out.
    pub fn set_link_up(&self, up: bool) {
        self.core.borrow_mut().link_up = up;
    }

    /// Make subsequent `register_prefix` calls fail through their
    /// `on_register_failed` callback.
    pub fn set_refuse_registrations(&self, refuse: bool) {
        self.core.borrow_mut().refuse_registrations = refuse;
    }

    /// Number of interests currently pending on this face.
    pub fn pending_count(&self) -> usize {
        self.core.borrow().pending.len()
    }
}

impl Face for MemoryFace {
    fn register_prefix(
        &self,
        prefix: &Name,
        on_interest: OnInterest,
        on_register_failed: OnRegisterFailed,
    ) -> RegisteredPrefix {
        let mut core = self.core.borrow_mut();
        if core.refuse_registrations {
            let prefix = prefix.clone();
            tokio::task::spawn_local(async move {
                on_register_failed(&prefix);
            });
            return RegisteredPrefix::noop();
        }

        let id = core.next_id;
        core.next_id += 1;
        core.filters.push(Filter {
            id,
            prefix: prefix.clone(),
            on_interest,
        });
        debug!(prefix = %prefix, "prefix registered");

        let weak = Rc::downgrade(&self.core);
        RegisteredPrefix::new(move || {
            if let Some(core) = weak.upgrade() {
                core.borrow_mut().filters.retain(|f| f.id != id);
            }
        })
    }

    fn express_interest(
        &self,
        interest: Interest,
        on_data: OnData,
        on_nack: OnNack,
        on_timeout: OnTimeout,
    ) -> InterestHandle {
        let link_up = self.core.borrow().link_up;

        // A cached fresh data packet answers immediately.
        if link_up {
            let mut network = self.network.borrow_mut();
            network.purge_cache(Instant::now());
            if let Some(cached) = network
                .cache
                .iter()
                .find(|c| interest.matches(&c.data.name))
            {
                trace!(name = %interest.name, "interest satisfied from cache");
                let data = cached.data.clone();
                drop(network);
                tokio::task::spawn_local(async move {
                    on_data(&interest, &data);
                });
                return InterestHandle::noop();
            }
        }

        let id = {
            let mut core = self.core.borrow_mut();
            let id = core.next_id;
            core.next_id += 1;
            core.pending.insert(
                id,
                PendingOut {
                    interest: interest.clone(),
                    on_data,
                    on_nack,
                    on_timeout,
                },
            );
            id
        };

        if link_up {
            let network = Rc::clone(&self.network);
            let own = Rc::downgrade(&self.core);
            let outgoing = interest.clone();
            tokio::task::spawn_local(async move {
                deliver_interest(&network, &own, &outgoing);
            });
        }

        if let Some(lifetime) = interest.lifetime {
            let weak = Rc::downgrade(&self.core);
            tokio::task::spawn_local(async move {
                tokio::time::sleep(lifetime).await;
                let entry = weak
                    .upgrade()
                    .and_then(|core| core.borrow_mut().pending.remove(&id));
                if let Some(entry) = entry {
                    trace!(name = %entry.interest.name, "interest timed out");
                    (entry.on_timeout)(&entry.interest);
                }
            });
        }

        let weak = Rc::downgrade(&self.core);
        InterestHandle::new(move || {
            if let Some(core) = weak.upgrade() {
                core.borrow_mut().pending.remove(&id);
            }
        })
    }

    fn put(&self, data: Data) -> Result<()> {
        if !self.core.borrow().link_up {
            // Lost on the wire; callers rely on re-expression.
            return Ok(());
        }

        if let Some(freshness) = data.freshness {
            self.network.borrow_mut().cache.push(CachedData {
                data: data.clone(),
                stale_at: Instant::now() + freshness,
            });
        }

        let network = Rc::clone(&self.network);
        let own = Rc::downgrade(&self.core);
        tokio::task::spawn_local(async move {
            deliver_data(&network, &own, &data);
        });
        Ok(())
    }
}

/// Fan an interest out to every other live face's matching filters.
fn deliver_interest(
    network: &Rc<RefCell<NetworkCore>>,
    sender: &Weak<RefCell<FaceCore>>,
    interest: &Interest,
) {
    let sender = sender.upgrade();
    let mut targets = Vec::new();
    {
        let mut net = network.borrow_mut();
        net.faces.retain(|f| f.upgrade().is_some());
        for face in &net.faces {
            let Some(face) = face.upgrade() else { continue };
            if sender.as_ref().is_some_and(|s| Rc::ptr_eq(s, &face)) {
                continue;
            }
            let core = face.borrow();
            if !core.link_up {
                continue;
            }
            for filter in &core.filters {
                if filter.prefix.is_prefix_of(&interest.name) {
                    targets.push((filter.prefix.clone(), Rc::clone(&filter.on_interest)));
                }
            }
        }
    }
    for (prefix, on_interest) in targets {
        on_interest(&prefix, interest);
    }
}

/// Satisfy matching pending interests on every other live face.
fn deliver_data(
    network: &Rc<RefCell<NetworkCore>>,
    sender: &Weak<RefCell<FaceCore>>,
    data: &Data,
) {
    let sender = sender.upgrade();
    let mut satisfied = Vec::new();
    {
        let net = network.borrow();
        for face in &net.faces {
            let Some(face) = face.upgrade() else { continue };
            if sender.as_ref().is_some_and(|s| Rc::ptr_eq(s, &face)) {
                continue;
            }
            let mut core = face.borrow_mut();
            if !core.link_up {
                continue;
            }
            let ids: Vec<u64> = core
                .pending
                .iter()
                .filter(|(_, p)| p.interest.matches(&data.name))
                .map(|(&id, _)| id)
                .collect();
            for id in ids {
                if let Some(entry) = core.pending.remove(&id) {
                    satisfied.push(entry);
                }
            }
        }
    }
    for entry in satisfied {
        (entry.on_data)(&entry.interest, data);
    }
}

/// Schedules callbacks on the current tokio `LocalSet`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, callback: Box<dyn FnOnce()>) {
        tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
    }
}

/// An ed25519 keychain for tests.
pub struct TestKeyChain {
    key: SigningKey,
    identity: Name,
}

impl TestKeyChain {
    /// Deterministic keychain from a 32-byte seed.
    pub fn from_seed(identity: Name, seed: [u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(&seed),
            identity,
        }
    }

    /// Keychain with a freshly generated key.
    pub fn generate(identity: Name) -> Self {
        Self {
            key: SigningKey::generate(&mut rand::rngs::OsRng),
            identity,
        }
    }

    /// The default identity name.
    pub fn identity(&self) -> &Name {
        &self.identity
    }

    /// The verifying half of the signing key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    /// Check a signature produced by [`KeyChain::sign`].
    pub fn verify(data: &Data, key: &VerifyingKey) -> bool {
        let Some(signature) = &data.signature else {
            return false;
        };
        let Ok(bytes) = <[u8; 64]>::try_from(signature.as_ref()) else {
            return false;
        };
        let signature = ed25519_dalek::Signature::from_bytes(&bytes);
        key.verify(&data.signed_portion(), &signature).is_ok()
    }
}

impl KeyChain for TestKeyChain {
    fn sign(&self, data: &mut Data, certificate: Option<&Name>) -> Result<()> {
        let _ = certificate; // one identity per test keychain
        let signature = self.key.sign(&data.signed_portion());
        data.signature = Some(Bytes::copy_from_slice(&signature.to_bytes()));
        Ok(())
    }
}
