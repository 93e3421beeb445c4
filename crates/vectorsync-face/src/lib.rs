//! # Vectorsync Face
//!
//! The host-collaborator surface of the sync protocol: the [`Face`]
//! over which interests and data travel, the [`KeyChain`] that signs
//! outgoing data, and the [`Scheduler`] that runs delayed callbacks.
//!
//! The engine never owns a transport; it is handed these traits and
//! drives them from a single event-loop thread. Completion is always
//! delivered through a later callback, never through blocking.
//!
//! The [`memory`] module provides in-process implementations: a
//! broadcast [`memory::MemoryNetwork`] connecting any number of
//! [`memory::MemoryFace`]s, an ed25519 [`memory::TestKeyChain`], and a
//! [`memory::TokioScheduler`]. They run on a tokio `LocalSet` and are
//! the substrate for every integration test.

pub mod error;
pub mod memory;
pub mod packet;
pub mod traits;

pub use error::FaceError;
pub use packet::{Data, Interest, Nack, NackReason};
pub use traits::{
    Face, InterestHandle, KeyChain, OnData, OnInterest, OnNack, OnRegisterFailed, OnTimeout,
    RegisteredPrefix, Scheduler,
};
