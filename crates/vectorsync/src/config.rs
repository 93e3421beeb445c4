//! Engine configuration.

use std::time::Duration;

use vectorsync_core::Name;

/// Configuration for a [`crate::SyncEngine`].
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// This participant's publishing prefix.
    pub data_prefix: Name,
    /// The common prefix all sync traffic travels under.
    pub broadcast_prefix: Name,
    /// This participant's session number, unique per (prefix, process
    /// lifetime).
    pub session_id: u32,
    /// Lifetime of outgoing sync interests.
    pub sync_lifetime: Duration,
    /// Sequence number to resume from; `-1` starts a fresh session.
    pub previous_sequence: i64,
    /// Enable the session-discovery exchange. Sync data then elides
    /// data-prefix names and unknown sessions are resolved through
    /// `DISCOVERY` interests.
    pub discovery: bool,
    /// Suppress all outgoing sync data (listen-only participant).
    pub no_data: bool,
    /// Minimum spacing between outgoing sync interests. `None` sends
    /// on every state change.
    pub update_interval: Option<Duration>,
    /// Certificate to sign outgoing data with; `None` uses the
    /// keychain's default identity.
    pub certificate_name: Option<Name>,
}

impl SyncConfig {
    /// Configuration with the protocol defaults.
    pub fn new(data_prefix: Name, broadcast_prefix: Name, session_id: u32) -> Self {
        Self {
            data_prefix,
            broadcast_prefix,
            session_id,
            sync_lifetime: Duration::from_millis(5000),
            previous_sequence: -1,
            discovery: false,
            no_data: false,
            update_interval: None,
            certificate_name: None,
        }
    }

    /// Set the sync interest lifetime.
    pub fn sync_lifetime(mut self, lifetime: Duration) -> Self {
        self.sync_lifetime = lifetime;
        self
    }

    /// Resume from a previously published sequence number.
    pub fn previous_sequence(mut self, sequence: i64) -> Self {
        self.previous_sequence = sequence;
        self
    }

    /// Enable discovery mode.
    pub fn discovery(mut self, discovery: bool) -> Self {
        self.discovery = discovery;
        self
    }

    /// Make this participant listen-only.
    pub fn no_data(mut self, no_data: bool) -> Self {
        self.no_data = no_data;
        self
    }

    /// Rate-limit outgoing sync interests.
    pub fn update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = Some(interval);
        self
    }

    /// Sign with a specific certificate.
    pub fn certificate_name(mut self, certificate: Name) -> Self {
        self.certificate_name = Some(certificate);
        self
    }
}
