//! # Vectorsync Core
//!
//! Pure primitives for the vectorsync protocol: hierarchical names,
//! percent-escaping, and the replicated vector state.
//!
//! This crate contains no I/O, no timers, no networking. It is pure
//! computation over the data structures every participant replicates.
//!
//! ## Key Types
//!
//! - [`Name`] - A hierarchical NDN-style name (`/a/b/c`)
//! - [`SessionEntry`] - One `(data_prefix, session_id) -> sequence_no` row
//! - [`VectorState`] - The sorted entry table and its derived root digest
//! - [`StateDiff`] - The classified difference against a remote digest
//!
//! ## The root digest
//!
//! The vector root is deliberately *not* a cryptographic hash: it is the
//! concatenation of per-entry `"<session>,<seq>;"` strings, so that a
//! peer can parse the digest it receives and compute a set difference
//! from it. Interoperability depends on this exact encoding.

pub mod escape;
pub mod name;
pub mod state;

pub use escape::{escape_component, unescape};
pub use name::Name;
pub use state::{parse_remote_state, SessionEntry, StateDiff, VectorState, EMPTY_ROOT};
