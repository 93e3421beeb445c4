//! The replicated vector state and its diff engine.
//!
//! Every participant keeps a [`VectorState`]: a sorted table mapping
//! `(data_prefix, session_id)` to the latest observed sequence number,
//! plus a derived root digest. Sync interests carry the root; the
//! [`VectorState::diff`] operation compares the local table against a
//! remote root and classifies the difference.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::escape::unescape;
use crate::name::Name;

/// The root digest of a state with no entries.
pub const EMPTY_ROOT: &str = "00";

/// One row of the replicated table: a producer session and its latest
/// observed sequence number.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEntry {
    data_prefix: Name,
    session_id: u32,
    sequence_no: u32,
    user_digest: String,
}

impl SessionEntry {
    fn new(data_prefix: Name, session_id: u32, sequence_no: u32) -> Self {
        let mut entry = Self {
            data_prefix,
            session_id,
            sequence_no,
            user_digest: String::new(),
        };
        entry.recompute_user_digest();
        entry
    }

    /// The producer's publishing prefix.
    pub fn data_prefix(&self) -> &Name {
        &self.data_prefix
    }

    /// The producer's session number.
    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    /// The latest observed sequence number.
    pub fn sequence_no(&self) -> u32 {
        self.sequence_no
    }

    /// The per-entry digest string, `"<session>,<seq>;"`.
    pub fn user_digest(&self) -> &str {
        &self.user_digest
    }

    fn set_sequence_no(&mut self, sequence_no: u32) {
        self.sequence_no = sequence_no;
        self.recompute_user_digest();
    }

    fn recompute_user_digest(&mut self) {
        self.user_digest = format!("{},{};", self.session_id, self.sequence_no);
    }
}

/// The classified difference between the local state and a remote digest.
///
/// `ahead` preserves local entry order; `behind` and `unknown` preserve
/// the order of the remote digest.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StateDiff {
    /// Indexes of local entries the remote is missing or behind on.
    pub ahead: Vec<usize>,
    /// `(session, seq)` pairs the local state is behind on.
    pub behind: Vec<(u32, u32)>,
    /// Remote sessions with no local entry.
    pub unknown: Vec<(u32, u32)>,
    /// True iff some local session id was absent from the remote digest
    /// entirely. Forces data-prefix names into the response even in
    /// discovery mode.
    pub push_names: bool,
}

impl StateDiff {
    /// True if the local state has anything to send.
    pub fn has_positive(&self) -> bool {
        !self.ahead.is_empty()
    }

    /// True if the two states matched exactly.
    pub fn is_empty(&self) -> bool {
        self.ahead.is_empty() && self.behind.is_empty() && self.unknown.is_empty()
    }
}

/// Parse an unescaped remote digest into `(session, seq)` pairs.
///
/// The digest is a `;`-separated list of `session,seq` segments. A
/// malformed segment ends the parse; the well-formed prefix is kept.
/// The trailing `;` every digest carries simply terminates the list.
pub fn parse_remote_state(digest: &str) -> Vec<(u32, u32)> {
    let mut pairs = Vec::new();
    for segment in digest.split(';') {
        if segment.is_empty() {
            break;
        }
        let Some((session, seq)) = segment.split_once(',') else {
            break;
        };
        match (session.trim().parse::<u32>(), seq.trim().parse::<u32>()) {
            (Ok(session), Ok(seq)) => pairs.push((session, seq)),
            _ => break,
        }
    }
    pairs
}

/// The sorted per-session table and its derived root digest.
#[derive(Clone, Debug, Default)]
pub struct VectorState {
    entries: Vec<SessionEntry>,
    root: String,
}

impl VectorState {
    /// Create an empty state with root [`EMPTY_ROOT`].
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            root: EMPTY_ROOT.to_string(),
        }
    }

    /// Record a sequence number for `(data_prefix, session_id)`.
    ///
    /// An existing entry is only advanced if `sequence_no` is strictly
    /// greater; an unknown pair is inserted at its sorted position.
    /// Returns true iff the table changed; the root is recomputed on
    /// every mutation.
    pub fn update(&mut self, data_prefix: &Name, session_id: u32, sequence_no: u32) -> bool {
        match self.find(data_prefix, session_id) {
            Some(index) => {
                if self.entries[index].sequence_no() < sequence_no {
                    self.entries[index].set_sequence_no(sequence_no);
                } else {
                    return false;
                }
            }
            None => {
                debug!(
                    prefix = %data_prefix, session_id, sequence_no,
                    "inserting new session entry"
                );
                let entry = SessionEntry::new(data_prefix.clone(), session_id, sequence_no);
                let at = self
                    .entries
                    .partition_point(|e| (e.data_prefix(), e.session_id()) < (data_prefix, session_id));
                self.entries.insert(at, entry);
            }
        }

        self.recompute_root();
        true
    }

    /// Index of the entry for `(data_prefix, session_id)`, if present.
    pub fn find(&self, data_prefix: &Name, session_id: u32) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.data_prefix() == data_prefix && e.session_id() == session_id)
    }

    /// Index of the first entry with `session_id`. Session ids are
    /// assumed unique across producers; ambiguity is a caller error.
    pub fn find_session(&self, session_id: u32) -> Option<usize> {
        self.entries.iter().position(|e| e.session_id() == session_id)
    }

    /// The data prefix registered for `session_id`, if known.
    pub fn session_name(&self, session_id: u32) -> Option<&Name> {
        let index = self.find_session(session_id)?;
        Some(self.entries[index].data_prefix())
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entry at `index`.
    ///
    /// Indexes are plain offsets and are invalidated by any mutation;
    /// callers must not retain them across calls.
    pub fn get(&self, index: usize) -> &SessionEntry {
        &self.entries[index]
    }

    /// Iterate over the entries in table order.
    pub fn entries(&self) -> impl Iterator<Item = &SessionEntry> {
        self.entries.iter()
    }

    /// The root digest: the ordered concatenation of every entry's
    /// digest string, or [`EMPTY_ROOT`] for an empty table.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Compare the local table against a remote root digest.
    ///
    /// `remote_encoded` may still carry `%HH` escapes from the wire;
    /// it is unescaped before parsing, and a malformed suffix is
    /// discarded (the well-formed prefix is compared).
    pub fn diff(&self, remote_encoded: &str) -> StateDiff {
        let remote = parse_remote_state(&unescape(remote_encoded));
        let mut diff = StateDiff::default();

        for (index, entry) in self.entries.iter().enumerate() {
            match remote.iter().find(|(session, _)| *session == entry.session_id()) {
                Some(&(_, remote_seq)) => {
                    if entry.sequence_no() > remote_seq {
                        diff.ahead.push(index);
                    }
                }
                None => {
                    // The remote has never heard of this session; the
                    // response must carry its name.
                    diff.push_names = true;
                    diff.ahead.push(index);
                }
            }
        }

        for &(session, seq) in &remote {
            match self.find_session(session) {
                Some(index) => {
                    if self.entries[index].sequence_no() < seq {
                        diff.behind.push((session, seq));
                    }
                }
                None => diff.unknown.push((session, seq)),
            }
        }

        debug!(
            local = %self.root, remote = remote_encoded,
            ahead = diff.ahead.len(), behind = diff.behind.len(), unknown = diff.unknown.len(),
            "state diff"
        );
        diff
    }

    fn recompute_root(&mut self) {
        if self.entries.is_empty() {
            self.root = EMPTY_ROOT.to_string();
            return;
        }
        let mut root = String::new();
        for entry in &self.entries {
            root.push_str(entry.user_digest());
        }
        self.root = root;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escape::escape_component;

    fn name(uri: &str) -> Name {
        Name::from_uri(uri)
    }

    #[test]
    fn empty_state_has_sentinel_root() {
        assert_eq!(VectorState::new().root(), EMPTY_ROOT);
    }

    #[test]
    fn insert_keeps_entries_sorted() {
        let mut state = VectorState::new();
        assert!(state.update(&name("/b"), 2, 1));
        assert!(state.update(&name("/a"), 1, 1));
        assert!(state.update(&name("/a"), 7, 3));

        let order: Vec<_> = state
            .entries()
            .map(|e| (e.data_prefix().to_uri(), e.session_id()))
            .collect();
        assert_eq!(
            order,
            vec![("/a".into(), 1), ("/a".into(), 7), ("/b".into(), 2)]
        );
        assert_eq!(state.root(), "1,1;7,3;2,1;");
    }

    #[test]
    fn root_is_concatenation_of_entry_digests() {
        let mut state = VectorState::new();
        state.update(&name("/a"), 1, 5);
        state.update(&name("/b"), 2, 3);

        let expected: String = state.entries().map(|e| e.user_digest()).collect();
        assert_eq!(state.root(), expected);
        assert_eq!(state.root(), "1,5;2,3;");
    }

    #[test]
    fn stale_update_is_discarded() {
        let mut state = VectorState::new();
        assert!(state.update(&name("/a"), 1, 5));
        assert!(!state.update(&name("/a"), 1, 3));
        assert!(!state.update(&name("/a"), 1, 5));
        assert_eq!(state.get(0).sequence_no(), 5);
        assert_eq!(state.root(), "1,5;");
    }

    #[test]
    fn update_advances_and_recomputes_root() {
        let mut state = VectorState::new();
        state.update(&name("/a"), 1, 1);
        assert_eq!(state.root(), "1,1;");
        assert!(state.update(&name("/a"), 1, 4));
        assert_eq!(state.root(), "1,4;");
    }

    #[test]
    fn find_variants() {
        let mut state = VectorState::new();
        state.update(&name("/a"), 1, 5);
        state.update(&name("/b"), 2, 3);

        assert_eq!(state.find(&name("/a"), 1), Some(0));
        assert_eq!(state.find(&name("/a"), 2), None);
        assert_eq!(state.find_session(2), Some(1));
        assert_eq!(state.find_session(9), None);
        assert_eq!(state.session_name(2), Some(&name("/b")));
        assert_eq!(state.session_name(9), None);
    }

    #[test]
    fn parse_remote_state_well_formed() {
        assert_eq!(parse_remote_state("1,5;2,3;"), vec![(1, 5), (2, 3)]);
        assert_eq!(parse_remote_state(""), vec![]);
        assert_eq!(parse_remote_state(EMPTY_ROOT), vec![]);
    }

    #[test]
    fn parse_remote_state_keeps_well_formed_prefix() {
        assert_eq!(parse_remote_state("1,5;bogus;2,3;"), vec![(1, 5)]);
        assert_eq!(parse_remote_state("1,5;2"), vec![(1, 5)]);
        assert_eq!(parse_remote_state("nonsense"), vec![]);
    }

    #[test]
    fn diff_of_identical_states_is_empty() {
        let mut state = VectorState::new();
        state.update(&name("/a"), 1, 5);
        state.update(&name("/b"), 2, 3);

        let diff = state.diff(state.root());
        assert!(diff.is_empty());
        assert!(!diff.has_positive());
        assert!(!diff.push_names);
    }

    #[test]
    fn diff_accepts_escaped_input() {
        let mut state = VectorState::new();
        state.update(&name("/a"), 1, 5);
        state.update(&name("/b"), 2, 3);

        let escaped = escape_component(state.root());
        assert!(state.diff(&escaped).is_empty());
    }

    #[test]
    fn diff_local_ahead() {
        // Local {1 -> 5, 2 -> 3}, remote {1 -> 5, 2 -> 2}: entry 2 is stale
        // on the remote side.
        let mut state = VectorState::new();
        state.update(&name("/a"), 1, 5);
        state.update(&name("/b"), 2, 3);

        let diff = state.diff("1,5;2,2;");
        assert_eq!(diff.ahead, vec![1]);
        assert!(diff.behind.is_empty());
        assert!(diff.unknown.is_empty());
        assert!(!diff.push_names);
    }

    #[test]
    fn diff_local_behind() {
        let mut state = VectorState::new();
        state.update(&name("/a"), 1, 5);
        state.update(&name("/b"), 2, 1);

        let diff = state.diff("1,5;2,4;");
        assert!(diff.ahead.is_empty());
        assert_eq!(diff.behind, vec![(2, 4)]);
        assert!(diff.unknown.is_empty());
    }

    #[test]
    fn diff_unknown_remote_session() {
        // Local {1 -> 5}, remote {1 -> 5, 7 -> 2}: session 7 needs discovery.
        let mut state = VectorState::new();
        state.update(&name("/a"), 1, 5);

        let diff = state.diff("1,5;7,2;");
        assert!(diff.ahead.is_empty());
        assert!(diff.behind.is_empty());
        assert_eq!(diff.unknown, vec![(7, 2)]);
        assert!(!diff.push_names);
    }

    #[test]
    fn diff_session_missing_from_remote_forces_names() {
        let mut state = VectorState::new();
        state.update(&name("/a"), 1, 5);
        state.update(&name("/b"), 2, 3);

        let diff = state.diff("1,5;");
        assert_eq!(diff.ahead, vec![1]);
        assert!(diff.push_names);
    }

    #[test]
    fn diff_preserves_remote_order() {
        let mut state = VectorState::new();
        state.update(&name("/a"), 1, 1);
        state.update(&name("/b"), 2, 1);

        let diff = state.diff("9,4;2,7;8,2;1,6;");
        assert_eq!(diff.behind, vec![(2, 7), (1, 6)]);
        assert_eq!(diff.unknown, vec![(9, 4), (8, 2)]);
    }

    #[test]
    fn diff_against_empty_root_advertises_everything() {
        let mut state = VectorState::new();
        state.update(&name("/a"), 1, 5);
        state.update(&name("/b"), 2, 3);

        let diff = state.diff(EMPTY_ROOT);
        assert_eq!(diff.ahead, vec![0, 1]);
        assert!(diff.push_names);
    }

    #[test]
    fn round_trip_through_root_digest() {
        let mut state = VectorState::new();
        state.update(&name("/a"), 1, 5);
        state.update(&name("/b"), 2, 3);
        state.update(&name("/c"), 17, 42);

        let pairs = parse_remote_state(&unescape(&escape_component(state.root())));
        let expected: Vec<_> = state
            .entries()
            .map(|e| (e.session_id(), e.sequence_no()))
            .collect();
        assert_eq!(pairs, expected);
    }
}
