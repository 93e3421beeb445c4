//! NDN-style packet types.
//!
//! Only the fields the sync protocol actually exercises are modelled:
//! names, interest lifetimes, data content, freshness, and an opaque
//! signature blob filled in by the [`crate::KeyChain`].

use std::time::Duration;

use bytes::Bytes;
use vectorsync_core::Name;

/// A request for data under a name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Interest {
    /// The requested name. Data whose name this is a prefix of
    /// satisfies the interest.
    pub name: Name,
    /// How long the interest stays pending. `None` never times out.
    pub lifetime: Option<Duration>,
}

impl Interest {
    /// Create an interest with no lifetime (never times out).
    pub fn new(name: Name) -> Self {
        Self {
            name,
            lifetime: None,
        }
    }

    /// Set the interest lifetime.
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    /// True if this interest would be satisfied by data named `name`.
    pub fn matches(&self, name: &Name) -> bool {
        self.name.is_prefix_of(name)
    }
}

/// A named, signed payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Data {
    /// The data name; must extend (or equal) the satisfied interest's name.
    pub name: Name,
    /// The payload.
    pub content: Bytes,
    /// How long caches may treat this data as fresh. `None` means the
    /// data must not be served to later requesters.
    pub freshness: Option<Duration>,
    /// Signature bytes, filled in by a [`crate::KeyChain`].
    pub signature: Option<Bytes>,
}

impl Data {
    /// Create unsigned data with the given name and content.
    pub fn new(name: Name, content: Bytes) -> Self {
        Self {
            name,
            content,
            freshness: None,
            signature: None,
        }
    }

    /// Set the freshness period.
    pub fn with_freshness(mut self, freshness: Duration) -> Self {
        self.freshness = Some(freshness);
        self
    }

    /// The byte string covered by the signature: the name URI followed
    /// by the content.
    pub fn signed_portion(&self) -> Vec<u8> {
        let uri = self.name.to_uri();
        let mut buf = Vec::with_capacity(uri.len() + self.content.len());
        buf.extend_from_slice(uri.as_bytes());
        buf.extend_from_slice(&self.content);
        buf
    }
}

/// A negative acknowledgement for an interest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Nack {
    /// Why the interest was refused.
    pub reason: NackReason,
}

/// Reasons a forwarder may refuse an interest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NackReason {
    Congestion,
    Duplicate,
    NoRoute,
}
