//! Shared harness for the integration suites: engine participants and
//! a bare-face probe for driving one side of the protocol by hand.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use vectorsync::{SyncConfig, SyncEngine, SyncHandlers, SyncStateMsg, SyncUpdate};
use vectorsync_core::Name;
use vectorsync_face::memory::{MemoryFace, MemoryNetwork, TestKeyChain, TokioScheduler};
use vectorsync_face::{Data, Face, Interest, RegisteredPrefix};

/// Sync interest lifetime used throughout the suites.
pub const LIFETIME: Duration = Duration::from_millis(1000);

/// The broadcast prefix used throughout the suites.
pub const BROADCAST: &str = "/broadcast/app";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn broadcast() -> Name {
    Name::from_uri(BROADCAST)
}

/// Let spawned deliveries and short timers run.
pub async fn tick() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

/// Wait long enough for bootstrap timeouts and interest re-expressions.
pub async fn settle() {
    tokio::time::sleep(LIFETIME * 3).await;
}

/// One engine-backed participant with its callbacks recorded.
pub struct Participant {
    pub engine: SyncEngine,
    pub face: Rc<MemoryFace>,
    pub updates: Rc<RefCell<Vec<SyncUpdate>>>,
    pub initialized: Rc<Cell<u32>>,
}

impl Participant {
    pub fn update_count(&self) -> usize {
        self.updates.borrow().len()
    }

    pub fn last_update(&self) -> Option<SyncUpdate> {
        self.updates.borrow().last().cloned()
    }
}

pub fn participant(network: &MemoryNetwork, data_prefix: &str, session: u32) -> Participant {
    participant_with(network, data_prefix, session, |config| config)
}

pub fn participant_with(
    network: &MemoryNetwork,
    data_prefix: &str,
    session: u32,
    tweak: impl FnOnce(SyncConfig) -> SyncConfig,
) -> Participant {
    let face = Rc::new(network.face());
    let updates = Rc::new(RefCell::new(Vec::new()));
    let initialized = Rc::new(Cell::new(0u32));

    let update_sink = Rc::clone(&updates);
    let init_count = Rc::clone(&initialized);
    let handlers = SyncHandlers::new(
        move |batch: &[SyncUpdate], _is_recovery| {
            update_sink.borrow_mut().extend_from_slice(batch);
        },
        move || init_count.set(init_count.get() + 1),
    );

    let config = tweak(
        SyncConfig::new(Name::from_uri(data_prefix), broadcast(), session)
            .sync_lifetime(LIFETIME),
    );
    let mut seed = [0u8; 32];
    seed[0] = session as u8;
    let engine = SyncEngine::new(
        config,
        handlers,
        Rc::clone(&face) as Rc<dyn Face>,
        Rc::new(TestKeyChain::from_seed(Name::from_uri("/keys").append(format!("s{session}")), seed)),
        Rc::new(TokioScheduler),
        Box::new(|prefix: &Name| panic!("prefix registration failed for {prefix}")),
    );

    Participant {
        engine,
        face,
        updates,
        initialized,
    }
}

/// A bare face on the broadcast prefix: records every interest it
/// sees, and can express interests and publish data by hand.
pub struct Probe {
    pub face: MemoryFace,
    pub interests: Rc<RefCell<Vec<Interest>>>,
    _registration: RegisteredPrefix,
}

impl Probe {
    pub fn new(network: &MemoryNetwork) -> Self {
        let face = network.face();
        let interests = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&interests);
        let registration = face.register_prefix(
            &broadcast(),
            Rc::new(move |_prefix: &Name, interest: &Interest| {
                sink.borrow_mut().push(interest.clone());
            }),
            Box::new(|prefix: &Name| panic!("probe registration failed for {prefix}")),
        );
        Self {
            face,
            interests,
            _registration: registration,
        }
    }

    /// How many observed interests carry `component` right after the
    /// broadcast prefix.
    pub fn seen(&self, component: &str) -> usize {
        let at = broadcast().len();
        self.interests
            .borrow()
            .iter()
            .filter(|i| i.name.get(at) == Some(component))
            .count()
    }

    /// How many observed interests are discovery queries for `session`.
    pub fn seen_discovery(&self, session: &str) -> usize {
        let at = broadcast().len();
        self.interests
            .borrow()
            .iter()
            .filter(|i| i.name.get(at) == Some("DISCOVERY") && i.name.get(at + 1) == Some(session))
            .count()
    }

    pub fn total_seen(&self) -> usize {
        self.interests.borrow().len()
    }

    /// Express an interest and collect whatever data answers it.
    pub fn express(&self, name: Name) -> Rc<RefCell<Vec<Data>>> {
        let out = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&out);
        self.face
            .express_interest(
                Interest::new(name).with_lifetime(LIFETIME),
                Box::new(move |_interest: &Interest, data: &Data| {
                    sink.borrow_mut().push(data.clone());
                }),
                Box::new(|_, _| {}),
                Box::new(|_| {}),
            )
            .detach();
        out
    }

    /// Publish a sync payload under `name`.
    pub fn put(&self, name: Name, msg: &SyncStateMsg) {
        self.face
            .put(Data::new(name, msg.encode_to_bytes()))
            .expect("memory face put");
    }
}
