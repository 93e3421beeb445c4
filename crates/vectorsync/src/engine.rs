//! The sync protocol state machine.
//!
//! A [`SyncEngine`] binds one participant to a broadcast prefix. It
//! ingests incoming interests and data, drives outgoing long-lived
//! sync interests, parks unanswerable requests, dispatches updates to
//! the application, and handles newcomer bootstrap and discovery
//! recovery.
//!
//! The engine runs entirely on one event-loop thread. Face callbacks
//! hold only weak back-references, so the engine's lifetime is tied to
//! the [`SyncEngine`] handle and ends cleanly at [`SyncEngine::shutdown`].

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, error, warn};
use vectorsync_core::{unescape, Name, VectorState, EMPTY_ROOT};
use vectorsync_face::{
    Data, Face, Interest, InterestHandle, KeyChain, OnData, OnInterest, OnNack, OnRegisterFailed,
    OnTimeout, RegisteredPrefix, Scheduler,
};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::messages::{ActionType, SyncStateMsg, SyncUpdate, WireSyncState};
use crate::pending::PendingInterestStore;

/// Name component tagging discovery traffic.
const DISCOVERY_COMPONENT: &str = "DISCOVERY";

/// Freshness of newcomer responses. Replies to the newcomer interest
/// differ between participants, so they must age out of caches fast.
const NEWCOMER_FRESHNESS: Duration = Duration::from_millis(500);

/// Application callbacks invoked by the engine.
pub struct SyncHandlers {
    on_received_sync_state: Box<dyn FnMut(&[SyncUpdate], bool)>,
    on_initialized: Box<dyn FnMut()>,
}

impl SyncHandlers {
    /// Bundle the two application callbacks.
    ///
    /// `on_received_sync_state` fires for every batch of table updates;
    /// its second argument (`is_recovery`) is always `false` in the
    /// current protocol. `on_initialized` fires once bootstrap
    /// completes, and may fire twice when self-insertion follows
    /// bootstrap data.
    pub fn new(
        on_received_sync_state: impl FnMut(&[SyncUpdate], bool) + 'static,
        on_initialized: impl FnMut() + 'static,
    ) -> Self {
        Self {
            on_received_sync_state: Box::new(on_received_sync_state),
            on_initialized: Box::new(on_initialized),
        }
    }
}

/// One participant's sync endpoint.
///
/// Construction registers the broadcast prefix and expresses the
/// newcomer interest; the engine then runs off face and scheduler
/// callbacks until [`shutdown`](SyncEngine::shutdown).
pub struct SyncEngine {
    shared: Rc<EngineShared>,
}

struct EngineShared {
    weak: Weak<EngineShared>,
    face: Rc<dyn Face>,
    keychain: Rc<dyn KeyChain>,
    scheduler: Rc<dyn Scheduler>,
    // Handlers live outside the state cell so the application may call
    // back into the engine from inside a callback.
    handlers: RefCell<SyncHandlers>,
    state: RefCell<EngineState>,
}

struct EngineState {
    data_prefix: Name,
    broadcast: Name,
    session_id: u32,
    sync_lifetime: Duration,
    update_interval: Option<Duration>,
    certificate_name: Option<Name>,
    discovery: bool,
    no_data: bool,

    table: VectorState,
    pending: PendingInterestStore,
    sequence_no: i64,
    initial_previous: i64,
    last_app_info: Bytes,

    enabled: bool,
    registration: Option<RegisteredPrefix>,
    last_expressed: Option<InterestHandle>,
    last_sent_digest: String,
    next_interest_at: Option<Instant>,
    update_timer_gen: u64,
    outgoing_discovery: BTreeMap<u32, u32>,
}

impl SyncEngine {
    /// Create an engine and start its bootstrap exchange.
    ///
    /// Registers `config.broadcast_prefix` on `face` (failures surface
    /// through `on_register_failed`) and expresses the newcomer
    /// interest. Must be called on the event-loop thread the face
    /// delivers callbacks on.
    pub fn new(
        config: SyncConfig,
        handlers: SyncHandlers,
        face: Rc<dyn Face>,
        keychain: Rc<dyn KeyChain>,
        scheduler: Rc<dyn Scheduler>,
        on_register_failed: OnRegisterFailed,
    ) -> Self {
        let shared = Rc::new_cyclic(|weak| EngineShared {
            weak: weak.clone(),
            face,
            keychain,
            scheduler,
            handlers: RefCell::new(handlers),
            state: RefCell::new(EngineState {
                data_prefix: config.data_prefix,
                broadcast: config.broadcast_prefix,
                session_id: config.session_id,
                sync_lifetime: config.sync_lifetime,
                update_interval: config.update_interval,
                certificate_name: config.certificate_name,
                discovery: config.discovery,
                no_data: config.no_data,
                table: VectorState::new(),
                pending: PendingInterestStore::new(),
                sequence_no: config.previous_sequence,
                initial_previous: config.previous_sequence,
                last_app_info: Bytes::new(),
                enabled: true,
                registration: None,
                last_expressed: None,
                last_sent_digest: String::new(),
                next_interest_at: None,
                update_timer_gen: 0,
                outgoing_discovery: BTreeMap::new(),
            }),
        });
        EngineShared::initialize(&shared, on_register_failed);
        Self { shared }
    }

    /// Publish the next sequence number.
    ///
    /// Increments the local sequence, answers every parked interest the
    /// new state has a positive diff against, and expresses a sync
    /// interest carrying the new root. `application_info` rides along
    /// on subsequent sync data for this participant's entry.
    pub fn publish(&self, application_info: Bytes) {
        let this = &self.shared;
        let mut state = this.state.borrow_mut();
        if !state.enabled {
            warn!("publish after shutdown ignored");
            return;
        }
        state.sequence_no += 1;
        state.last_app_info = application_info;
        let prefix = state.data_prefix.clone();
        let (session, seq) = (state.session_id, state.sequence_no.max(0) as u32);
        debug!(prefix = %prefix, session, seq, "publishing next sequence number");
        state.table.update(&prefix, session, seq);

        EngineShared::broadcast_sync_data(this, &mut state);
        EngineShared::send_sync_interest(this, &mut state);
    }

    /// The latest sequence number published by this participant.
    pub fn sequence_no(&self) -> i64 {
        self.shared.state.borrow().sequence_no
    }

    /// This participant's session number.
    pub fn session_id(&self) -> u32 {
        self.shared.state.borrow().session_id
    }

    /// The current root digest of the replicated table.
    pub fn vector_root(&self) -> String {
        self.shared.state.borrow().table.root().to_string()
    }

    /// Every known producer prefix with its session number, including
    /// this participant's own.
    pub fn producer_prefixes(&self) -> Vec<(Name, u32)> {
        self.shared
            .state
            .borrow()
            .table
            .entries()
            .map(|e| (e.data_prefix().clone(), e.session_id()))
            .collect()
    }

    /// The latest known sequence number for a producer, if the
    /// `(prefix, session)` pair is in the table.
    pub fn producer_sequence_no(&self, data_prefix: &Name, session_id: u32) -> Option<u32> {
        let state = self.shared.state.borrow();
        let index = state.table.find(data_prefix, session_id)?;
        Some(state.table.get(index).sequence_no())
    }

    /// Re-attempt the broadcast prefix registration after a failure.
    pub fn re_register(&self, on_register_failed: OnRegisterFailed) {
        let this = &self.shared;
        let broadcast = this.state.borrow().broadcast.clone();
        debug!(prefix = %broadcast, "re-registering broadcast prefix");
        let registration =
            this.face
                .register_prefix(&broadcast, EngineShared::interest_callback(this), on_register_failed);
        this.state.borrow_mut().registration = Some(registration);
    }

    /// Stop responding to sync traffic.
    ///
    /// Unregisters the broadcast prefix, cancels the outstanding sync
    /// interest, and makes every later callback a no-op.
    pub fn shutdown(&self) {
        let mut state = self.shared.state.borrow_mut();
        debug!("shutting down sync engine");
        state.enabled = false;
        state.registration = None;
        state.last_expressed = None;
    }
}

impl EngineShared {
    fn initialize(this: &Rc<Self>, on_register_failed: OnRegisterFailed) {
        let (broadcast, lifetime, interval) = {
            let state = this.state.borrow();
            (
                state.broadcast.clone(),
                state.sync_lifetime,
                state.update_interval,
            )
        };

        let registration =
            this.face
                .register_prefix(&broadcast, Self::interest_callback(this), on_register_failed);
        this.state.borrow_mut().registration = Some(registration);

        let interest = Interest::new(broadcast.append(EMPTY_ROOT)).with_lifetime(lifetime);
        debug!(name = %interest.name, "initial sync interest expressed");
        this.face
            .express_interest(
                interest,
                Self::data_callback(this),
                Self::initial_nack_callback(this),
                Self::initial_timeout_callback(this),
            )
            .detach();

        if let Some(interval) = interval {
            let mut state = this.state.borrow_mut();
            Self::schedule_update_check(this, &mut state, interval);
        }
    }

    // ── Callback plumbing ───────────────────────────────────────────

    fn interest_callback(this: &Rc<Self>) -> OnInterest {
        let weak = this.weak.clone();
        Rc::new(move |prefix, interest| {
            if let Some(shared) = weak.upgrade() {
                Self::handle_interest(&shared, prefix, interest);
            }
        })
    }

    fn data_callback(this: &Rc<Self>) -> OnData {
        let weak = this.weak.clone();
        Box::new(move |interest, data| {
            if let Some(shared) = weak.upgrade() {
                Self::handle_data(&shared, interest, data);
            }
        })
    }

    fn sync_timeout_callback(this: &Rc<Self>) -> OnTimeout {
        let weak = this.weak.clone();
        Box::new(move |interest| {
            if let Some(shared) = weak.upgrade() {
                Self::handle_sync_timeout(&shared, interest);
            }
        })
    }

    fn sync_nack_callback(this: &Rc<Self>) -> OnNack {
        let weak = this.weak.clone();
        Box::new(move |interest, _nack| {
            if let Some(shared) = weak.upgrade() {
                Self::handle_sync_timeout(&shared, interest);
            }
        })
    }

    fn initial_timeout_callback(this: &Rc<Self>) -> OnTimeout {
        let weak = this.weak.clone();
        Box::new(move |interest| {
            if let Some(shared) = weak.upgrade() {
                Self::handle_initial_timeout(&shared, interest);
            }
        })
    }

    fn initial_nack_callback(this: &Rc<Self>) -> OnNack {
        let weak = this.weak.clone();
        Box::new(move |interest, _nack| {
            if let Some(shared) = weak.upgrade() {
                Self::handle_initial_timeout(&shared, interest);
            }
        })
    }

    fn discovery_timeout_callback(this: &Rc<Self>) -> OnTimeout {
        let weak = this.weak.clone();
        Box::new(move |interest| {
            if let Some(shared) = weak.upgrade() {
                Self::handle_discovery_timeout(&shared, interest);
            }
        })
    }

    fn discovery_nack_callback(this: &Rc<Self>) -> OnNack {
        let weak = this.weak.clone();
        Box::new(move |interest, _nack| {
            if let Some(shared) = weak.upgrade() {
                Self::handle_discovery_timeout(&shared, interest);
            }
        })
    }

    // ── Inbound interests ───────────────────────────────────────────

    fn handle_interest(this: &Rc<Self>, _prefix: &Name, interest: &Interest) {
        let digest = {
            let mut state = this.state.borrow_mut();
            if !state.enabled {
                return;
            }
            debug!(name = %interest.name, "sync interest received");

            let tail_len = interest.name.len().saturating_sub(state.broadcast.len());
            if tail_len == 0 {
                debug!("interest carries no digest component, dropped");
                return;
            }
            let first = interest
                .name
                .get(state.broadcast.len())
                .unwrap_or_default()
                .to_string();

            if tail_len == 2 && first == DISCOVERY_COMPONENT {
                if state.discovery {
                    Self::process_discovery_interest(this, &mut state, interest);
                } else {
                    error!("received DISCOVERY interest but discovery mode is off, dropped");
                }
                return;
            }

            // Any other trailing component is a nonce; the first tail
            // component is the digest either way.
            if first == EMPTY_ROOT {
                Self::process_newcomer_interest(this, &mut state, interest);
                return;
            }
            if unescape(&first) == state.table.root() {
                if !state.no_data {
                    debug!("digest matches local root, parking interest");
                    state.pending.store(interest.clone());
                }
                return;
            }
            first
        };

        Self::process_sync_interest(this, interest, &digest);
    }

    /// Answer a `"00"` interest with the full local table.
    fn process_newcomer_interest(this: &Rc<Self>, state: &mut EngineState, interest: &Interest) {
        if state.no_data {
            return;
        }
        if state.table.root() == EMPTY_ROOT {
            debug!("local state is empty, nothing to answer a newcomer with");
            return;
        }

        let msg = SyncStateMsg {
            ss: state
                .table
                .entries()
                .map(|e| WireSyncState::update(e.data_prefix(), e.session_id(), e.sequence_no()))
                .collect(),
        };
        let data = Data::new(interest.name.clone(), msg.encode_to_bytes())
            .with_freshness(NEWCOMER_FRESHNESS);
        Self::sign_and_put(this, state, data, "newcomer response");
    }

    /// Diff an incoming digest against the local table and act on all
    /// three classes of difference.
    fn process_sync_interest(this: &Rc<Self>, interest: &Interest, digest: &str) {
        let (app_updates, had_negatives, unknowns) = {
            let mut state = this.state.borrow_mut();
            let diff = state.table.diff(digest);

            if diff.has_positive() {
                debug!(
                    count = diff.ahead.len(),
                    "positive set-difference, answering with sync data"
                );
                Self::send_sync_data(this, &mut state, &interest.name, &diff.ahead, diff.push_names);
            } else if !state.no_data {
                debug!("nothing to send, parking interest for future updates");
                state.pending.store(interest.clone());
            }

            let mut app_updates = Vec::new();
            for &(session, seq) in &diff.behind {
                let Some(index) = state.table.find_session(session) else {
                    debug!(session, "negative update for unrecognized session, skipped");
                    continue;
                };
                let prefix = state.table.get(index).data_prefix().clone();
                state.table.update(&prefix, session, seq);
                app_updates.push(SyncUpdate {
                    data_prefix: prefix,
                    session_id: session,
                    sequence_no: seq,
                    application_info: Bytes::new(),
                });
            }
            (app_updates, !diff.behind.is_empty(), diff.unknown)
        };

        if had_negatives {
            Self::notify_received(this, &app_updates);
            let mut state = this.state.borrow_mut();
            Self::send_sync_interest(this, &mut state);
        }

        if !unknowns.is_empty() {
            let mut state = this.state.borrow_mut();
            if state.discovery {
                Self::process_unknown_sessions(this, &mut state, &unknowns);
            }
        }
    }

    /// Answer a `DISCOVERY/<sid>` query for a known session.
    fn process_discovery_interest(this: &Rc<Self>, state: &mut EngineState, interest: &Interest) {
        let component = interest
            .name
            .get(state.broadcast.len() + 1)
            .unwrap_or_default();
        let Ok(session) = component.parse::<u32>() else {
            error!(component, "malformed session id in discovery interest");
            return;
        };
        let Some(index) = state.table.find_session(session) else {
            debug!(session, "unknown session in discovery interest, dropped");
            return;
        };

        let entry = state.table.get(index);
        debug!(session, prefix = %entry.data_prefix(), seq = entry.sequence_no(),
            "answering discovery query");
        let msg = SyncStateMsg {
            ss: vec![WireSyncState::update(
                entry.data_prefix(),
                session,
                entry.sequence_no(),
            )],
        };
        let data = Data::new(interest.name.clone(), msg.encode_to_bytes());
        Self::sign_and_put(this, state, data, "discovery response");
    }

    /// Open a discovery interest for every unknown session, at most one
    /// in flight per session id.
    fn process_unknown_sessions(this: &Rc<Self>, state: &mut EngineState, unknowns: &[(u32, u32)]) {
        for &(session, seq) in unknowns {
            if let Some(stored) = state.outgoing_discovery.get_mut(&session) {
                debug!(session, "discovery interest already in flight, waiting for timeout");
                if *stored < seq {
                    *stored = seq;
                }
                continue;
            }

            let name = state
                .broadcast
                .append(DISCOVERY_COMPONENT)
                .append(session.to_string());
            debug!(session, name = %name, "discovery interest expressed");
            this.face
                .express_interest(
                    Interest::new(name).with_lifetime(state.sync_lifetime),
                    Self::data_callback(this),
                    Self::discovery_nack_callback(this),
                    Self::discovery_timeout_callback(this),
                )
                .detach();
            state.outgoing_discovery.insert(session, seq);
        }
    }

    // ── Inbound data ────────────────────────────────────────────────

    fn handle_data(this: &Rc<Self>, interest: &Interest, data: &Data) {
        let parsed = {
            let state = this.state.borrow();
            if !state.enabled {
                return;
            }
            debug!(name = %data.name, "sync data received");
            let tail = data
                .name
                .get(state.broadcast.len())
                .unwrap_or_default()
                .to_string();

            if state.discovery && tail != DISCOVERY_COMPONENT {
                // In discovery mode the table is only fed by the
                // discovery exchange; the eaten interest still has to
                // be replaced.
                debug!("in discovery mode but not discovery data, skipping payload");
                None
            } else if data.content.is_empty() {
                Some((tail, SyncStateMsg::default()))
            } else {
                match SyncStateMsg::decode_from_bytes(&data.content) {
                    Ok(msg) => Some((tail, msg)),
                    Err(err) => {
                        let err = SyncError::Decode(err);
                        error!(%err, name = %data.name, "failed to decode sync payload, dropped");
                        None
                    }
                }
            }
        };

        if let Some((tail, msg)) = parsed {
            let updated = if tail == DISCOVERY_COMPONENT {
                let mut state = this.state.borrow_mut();
                if !state.discovery {
                    error!("received discovery data but discovery mode is off, dropped");
                    return;
                }
                Self::on_discovery_data(&mut state, interest, &msg)
            } else if this.state.borrow().table.root() == EMPTY_ROOT {
                Self::initial_on_data(this, &msg);
                true
            } else {
                let mut state = this.state.borrow_mut();
                Self::apply_updates(&mut state, &msg)
            };

            if updated {
                let app_updates = {
                    let state = this.state.borrow();
                    Self::collect_app_updates(&state, &msg)
                };
                Self::notify_received(this, &app_updates);
            }
        }

        // Express an up-to-date interest regardless of the outcome.
        let mut state = this.state.borrow_mut();
        Self::send_sync_interest(this, &mut state);
    }

    /// Fold a batch of wire updates into the table. Returns true iff
    /// at least one row changed.
    fn apply_updates(state: &mut EngineState, msg: &SyncStateMsg) -> bool {
        let mut updated = 0usize;
        for entry in &msg.ss {
            let name = match entry.action_type() {
                Some(ActionType::Update) => match &entry.name {
                    Some(uri) => Name::from_uri(uri),
                    None => {
                        warn!(session = entry.session(), "UPDATE entry without a name, skipped");
                        continue;
                    }
                },
                Some(ActionType::UpdateNoName) => {
                    match state.table.session_name(entry.session()) {
                        Some(name) => name.clone(),
                        None => {
                            debug!(
                                session = entry.session(),
                                "no name known for session in UPDATE_NO_NAME, skipped"
                            );
                            continue;
                        }
                    }
                }
                None => {
                    warn!(action = entry.action, "unknown action type, skipped");
                    continue;
                }
            };

            if state.table.update(&name, entry.session(), entry.seq()) {
                updated += 1;
                if name == state.data_prefix {
                    state.sequence_no = i64::from(entry.seq());
                }
            }
        }
        updated > 0
    }

    /// Bootstrap from the first sync data: apply everything, report
    /// initialization, and self-insert if nobody advertised us.
    fn initial_on_data(this: &Rc<Self>, msg: &SyncStateMsg) {
        debug!("processing initial sync data");
        {
            let mut state = this.state.borrow_mut();
            Self::apply_updates(&mut state, msg);
        }
        Self::notify_initialized(this);

        let inserted = {
            let mut state = this.state.borrow_mut();
            let prefix = state.data_prefix.clone();
            if state.table.find(&prefix, state.session_id).is_none() {
                debug!("bootstrap data did not cover this participant, self-inserting");
                state.sequence_no += 1;
                let (session, seq) = (state.session_id, state.sequence_no.max(0) as u32);
                state.table.update(&prefix, session, seq)
            } else {
                false
            }
        };
        if inserted {
            Self::notify_initialized(this);
        }
    }

    /// Resolve a discovery answer, preferring a larger sequence learned
    /// while the query was in flight.
    fn on_discovery_data(state: &mut EngineState, interest: &Interest, msg: &SyncStateMsg) -> bool {
        let component = interest
            .name
            .get(state.broadcast.len() + 1)
            .unwrap_or_default();
        let Ok(session) = component.parse::<u32>() else {
            error!(component, "malformed session id in discovery answer");
            return false;
        };
        let Some(entry) = msg.ss.first() else {
            error!(session, "empty discovery payload, dropped");
            return false;
        };
        let Some(uri) = &entry.name else {
            error!(session, "discovery payload carries no name, dropped");
            return false;
        };

        let name = Name::from_uri(uri);
        let stored = state.outgoing_discovery.get(&session).copied();
        let seq = match stored {
            Some(stored) if stored > entry.seq() => stored,
            _ => entry.seq(),
        };
        debug!(session, prefix = %name, seq, "discovery answer received");
        state.table.update(&name, entry.session(), seq)
    }

    /// Build the caller-visible update list from a wire message, using
    /// the table's current sequence numbers (the payload's may already
    /// be superseded).
    fn collect_app_updates(state: &EngineState, msg: &SyncStateMsg) -> Vec<SyncUpdate> {
        let mut updates = Vec::new();
        for entry in &msg.ss {
            let name = match entry.action_type() {
                Some(ActionType::Update) => match &entry.name {
                    Some(uri) => Name::from_uri(uri),
                    None => continue,
                },
                Some(ActionType::UpdateNoName) => {
                    match state.table.session_name(entry.session()) {
                        Some(name) => name.clone(),
                        None => {
                            error!(
                                session = entry.session(),
                                "no name for session, cannot report update to application"
                            );
                            continue;
                        }
                    }
                }
                None => continue,
            };

            let sequence_no = state
                .table
                .find(&name, entry.session())
                .map(|index| state.table.get(index).sequence_no())
                .unwrap_or_else(|| entry.seq());
            updates.push(SyncUpdate {
                data_prefix: name,
                session_id: entry.session(),
                sequence_no,
                application_info: entry.application_info.clone().unwrap_or_default(),
            });
        }
        updates
    }

    // ── Timeouts ────────────────────────────────────────────────────

    /// No peer answered the newcomer interest: this participant is the
    /// first one, so it seeds the table with itself.
    fn handle_initial_timeout(this: &Rc<Self>, _interest: &Interest) {
        {
            let mut state = this.state.borrow_mut();
            if !state.enabled {
                return;
            }
            debug!("initial sync interest timed out, no other participants");
            state.sequence_no += 1;
            if state.sequence_no != state.initial_previous + 1 {
                let err = SyncError::SequenceMismatch {
                    expected: state.initial_previous + 1,
                    got: state.sequence_no,
                };
                error!(%err, "aborting bootstrap");
                return;
            }
            let prefix = state.data_prefix.clone();
            let (session, seq) = (state.session_id, state.sequence_no.max(0) as u32);
            state.table.update(&prefix, session, seq);
        }

        Self::notify_initialized(this);

        let mut state = this.state.borrow_mut();
        Self::send_sync_interest_with_name(this, &mut state, None);
    }

    /// A sync interest timed out. If its digest still matches the local
    /// root nobody expressed anything newer, so re-express it; a stale
    /// digest means someone else already moved the conversation on.
    fn handle_sync_timeout(this: &Rc<Self>, interest: &Interest) {
        let mut state = this.state.borrow_mut();
        if !state.enabled {
            return;
        }
        let component = interest
            .name
            .get(state.broadcast.len())
            .unwrap_or_default();
        if unescape(component) == state.table.root() {
            debug!(name = %interest.name, "sync interest timed out at current root, re-expressing");
            let name = interest.name.clone();
            Self::send_sync_interest_with_name(this, &mut state, Some(name));
        } else {
            debug!(name = %interest.name, "sync interest timed out on a stale root");
        }
    }

    /// Discovery interests are re-expressed until answered. Deployed
    /// peers expect the indefinite retry; there is no back-off.
    fn handle_discovery_timeout(this: &Rc<Self>, interest: &Interest) {
        let lifetime = {
            let state = this.state.borrow();
            if !state.enabled {
                return;
            }
            if !state.discovery {
                error!("discovery timeout but discovery mode is off, ignored");
                return;
            }
            let tag = state.broadcast.len();
            if interest.name.get(tag) != Some(DISCOVERY_COMPONENT) {
                error!(name = %interest.name, "unrecognized interest format in discovery timeout");
                return;
            }
            state.sync_lifetime
        };

        debug!(name = %interest.name, "discovery interest timed out, re-expressing");
        this.face
            .express_interest(
                Interest::new(interest.name.clone()).with_lifetime(lifetime),
                Self::data_callback(this),
                Self::discovery_nack_callback(this),
                Self::discovery_timeout_callback(this),
            )
            .detach();
    }

    // ── Outbound ────────────────────────────────────────────────────

    /// Express a sync interest carrying the current root, honoring the
    /// update-interval gate.
    fn send_sync_interest(this: &Rc<Self>, state: &mut EngineState) {
        if !state.enabled {
            return;
        }
        if state.update_interval.is_some()
            && state.next_interest_at.is_some_and(|at| Instant::now() < at)
        {
            debug!("sync interest suppressed, digest has not settled yet");
            return;
        }
        state.last_sent_digest = state.table.root().to_string();
        Self::send_sync_interest_with_name(this, state, None);
    }

    /// Express a sync interest with an explicit name (timeout resends)
    /// or the current root. Cancels the previously expressed interest.
    fn send_sync_interest_with_name(this: &Rc<Self>, state: &mut EngineState, name: Option<Name>) {
        let name = name.unwrap_or_else(|| state.broadcast.append(state.table.root()));
        let interest = Interest::new(name).with_lifetime(state.sync_lifetime);
        debug!(name = %interest.name, "sync interest expressed");

        state.last_expressed = None;
        let handle = this.face.express_interest(
            interest,
            Self::data_callback(this),
            Self::sync_nack_callback(this),
            Self::sync_timeout_callback(this),
        );
        state.last_expressed = Some(handle);

        if let Some(interval) = state.update_interval {
            state.next_interest_at = Some(Instant::now() + interval);
            Self::schedule_update_check(this, state, interval);
        }
    }

    /// Periodic check: if the root moved since the last expressed
    /// interest, send now. A generation counter keeps exactly one
    /// timer chain alive.
    fn schedule_update_check(this: &Rc<Self>, state: &mut EngineState, interval: Duration) {
        state.update_timer_gen += 1;
        let generation = state.update_timer_gen;
        let weak = this.weak.clone();
        this.scheduler.schedule(
            interval,
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    EngineShared::on_update_timer(&shared, generation);
                }
            }),
        );
    }

    fn on_update_timer(this: &Rc<Self>, generation: u64) {
        let mut state = this.state.borrow_mut();
        if !state.enabled || generation != state.update_timer_gen {
            return;
        }
        let Some(interval) = state.update_interval else {
            return;
        };
        if state.table.root() != state.last_sent_digest {
            debug!("state changed since last sync interest, sending now");
            state.last_sent_digest = state.table.root().to_string();
            Self::send_sync_interest_with_name(this, &mut state, None);
        } else {
            Self::schedule_update_check(this, &mut state, interval);
        }
    }

    /// Answer every parked interest the current state has a positive
    /// diff against; answered parks are removed, the rest stay until
    /// they expire.
    fn broadcast_sync_data(this: &Rc<Self>, state: &mut EngineState) {
        if state.no_data {
            debug!("no_data set, not broadcasting sync data");
            return;
        }
        let broadcast = state.broadcast.clone();
        let parked = state.pending.interests_with_prefix(&broadcast, false);
        debug!(count = parked.len(), "diffing parked interests against new state");

        for entry in parked.iter().rev() {
            let name = entry.name().clone();
            let digest = unescape(name.get(broadcast.len()).unwrap_or_default());
            let diff = state.table.diff(&digest);
            if !diff.has_positive() {
                debug!(digest = %digest, "no positive diff for parked interest");
                continue;
            }
            if Self::send_sync_data(this, state, &name, &diff.ahead, diff.push_names) {
                state.pending.interests_for_name(&name, true);
            } else {
                error!(digest = %digest, "failed to send sync data for parked interest");
            }
        }
    }

    /// Send the positive set of a diff as sync data named after the
    /// interest being answered. Returns true if a packet went out.
    fn send_sync_data(
        this: &Rc<Self>,
        state: &mut EngineState,
        name: &Name,
        ahead: &[usize],
        push_names: bool,
    ) -> bool {
        if state.no_data {
            debug!(name = %name, "no_data set, not sending sync data");
            return true;
        }

        // Discovery mode elides names (and the payload body) unless the
        // remote was missing a session outright.
        let include_names = !state.discovery || push_names;
        let mut msg = SyncStateMsg::default();
        for &index in ahead {
            let entry = state.table.get(index);
            let mut wire = if include_names {
                WireSyncState::update(entry.data_prefix(), entry.session_id(), entry.sequence_no())
            } else {
                WireSyncState::update_no_name(entry.session_id(), entry.sequence_no())
            };
            if entry.data_prefix() == &state.data_prefix
                && entry.session_id() == state.session_id
                && !state.last_app_info.is_empty()
            {
                wire = wire.with_application_info(state.last_app_info.clone());
            }
            debug!(
                session = entry.session_id(),
                seq = entry.sequence_no(),
                "sending diff entry"
            );
            msg.ss.push(wire);
        }
        if msg.ss.is_empty() {
            return false;
        }

        let content = if include_names {
            msg.encode_to_bytes()
        } else {
            Bytes::new()
        };
        Self::sign_and_put(this, state, Data::new(name.clone(), content), "sync data")
    }

    /// Sign and send a data packet, logging failures. Peers recover by
    /// re-expressing, so there is no retry.
    fn sign_and_put(this: &Rc<Self>, state: &EngineState, data: Data, what: &str) -> bool {
        let name = data.name.clone();
        match Self::try_sign_and_put(this, state, data) {
            Ok(()) => {
                debug!(name = %name, what, "data sent");
                true
            }
            Err(err) => {
                error!(%err, name = %name, what, "send failed");
                false
            }
        }
    }

    fn try_sign_and_put(
        this: &Rc<Self>,
        state: &EngineState,
        mut data: Data,
    ) -> Result<(), SyncError> {
        this.keychain.sign(&mut data, state.certificate_name.as_ref())?;
        this.face.put(data)?;
        Ok(())
    }

    // ── Application callbacks ───────────────────────────────────────

    fn notify_received(this: &Rc<Self>, updates: &[SyncUpdate]) {
        let mut handlers = this.handlers.borrow_mut();
        let result = catch_unwind(AssertUnwindSafe(|| {
            (handlers.on_received_sync_state)(updates, false)
        }));
        if result.is_err() {
            error!("on_received_sync_state callback panicked");
        }
    }

    fn notify_initialized(this: &Rc<Self>) {
        let mut handlers = this.handlers.borrow_mut();
        let result = catch_unwind(AssertUnwindSafe(|| (handlers.on_initialized)()));
        if result.is_err() {
            error!("on_initialized callback panicked");
        }
    }
}
