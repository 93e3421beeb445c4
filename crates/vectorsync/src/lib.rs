//! # Vectorsync
//!
//! Multi-party dataset synchronization over an NDN-style
//! interest/data substrate.
//!
//! Every participant publishes a monotonically increasing sequence of
//! items under a `(data_prefix, session_id)` session and replicates a
//! `(prefix, session) -> latest-seq` table across a common broadcast
//! prefix. Late joiners, missed updates, and concurrent publishers all
//! converge on the same table.
//!
//! ## Message Flow
//!
//! ```text
//! Participant A                          Participant B
//!   |-- interest broadcast/"00" ---------->|        (newcomer)
//!   |<- data [every known session] --------|
//!   |-- interest broadcast/<root> -------->|        (long-lived)
//!   |     ... B publishes ...              |
//!   |<- data [positive diff entries] ------|
//!   |-- interest broadcast/<new root> ---->|
//! ```
//!
//! An interest whose digest matches the receiver's root is *parked*
//! until a local publish produces a positive diff against it. In
//! discovery mode, sync data elides producer names and a separate
//! `broadcast/DISCOVERY/<session>` exchange resolves them.
//!
//! ## Key Properties
//!
//! - **Convergent**: any two participants sharing the broadcast prefix
//!   reach the same table under arbitrary loss and reorder.
//! - **Monotone**: a session's sequence number never decreases.
//! - **Single-threaded**: the engine runs entirely on the host event
//!   loop; callbacks run to completion and nothing blocks.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::rc::Rc;
//! use vectorsync::{SyncConfig, SyncEngine, SyncHandlers};
//! use vectorsync_core::Name;
//! use vectorsync_face::memory::{MemoryNetwork, TestKeyChain, TokioScheduler};
//!
//! # async fn example() {
//! let network = MemoryNetwork::new();
//! let config = SyncConfig::new(
//!     Name::from_uri("/alice/chat"),
//!     Name::from_uri("/broadcast/chat"),
//!     1,
//! );
//! let handlers = SyncHandlers::new(
//!     |updates, _recovery| println!("{} sessions updated", updates.len()),
//!     || println!("initialized"),
//! );
//! let engine = SyncEngine::new(
//!     config,
//!     handlers,
//!     Rc::new(network.face()),
//!     Rc::new(TestKeyChain::generate(Name::from_uri("/keys/alice"))),
//!     Rc::new(TokioScheduler),
//!     Box::new(|prefix| eprintln!("registration failed for {prefix}")),
//! );
//!
//! // After on_initialized fires:
//! engine.publish(bytes::Bytes::new());
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod messages;
pub mod pending;

pub use config::SyncConfig;
pub use engine::{SyncEngine, SyncHandlers};
pub use error::{Result, SyncError};
pub use messages::{ActionType, SyncStateMsg, SyncUpdate, WireSeqNo, WireSyncState};
pub use pending::{PendingInterest, PendingInterestStore};
