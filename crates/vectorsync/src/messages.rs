//! Wire messages and the application-facing update type.
//!
//! The payload of every sync data packet is a length-delimited
//! protobuf `SyncStateMsg` carrying repeated `SyncState` entries. The
//! message structs are written out with prost derives so the field
//! tags stay fixed and visible; they must not change, since every
//! deployed participant parses this exact layout.

use bytes::Bytes;
use prost::Message;
use vectorsync_core::Name;

/// Action carried by a [`WireSyncState`] entry.
///
/// Tag 1 is reserved by the ancestor format and never sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ActionType {
    /// A sequence update carrying the producer's data prefix.
    Update = 0,
    /// A sequence update without a name; the receiver resolves the
    /// prefix from its own table (discovery mode).
    UpdateNoName = 2,
}

/// One `(session, seq)` pair.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct WireSeqNo {
    #[prost(uint32, tag = "1")]
    pub session: u32,
    #[prost(uint32, tag = "2")]
    pub seq: u32,
}

/// One entry of a sync payload.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WireSyncState {
    #[prost(enumeration = "ActionType", tag = "1")]
    pub action: i32,
    #[prost(string, optional, tag = "2")]
    pub name: Option<String>,
    #[prost(message, optional, tag = "3")]
    pub seqno: Option<WireSeqNo>,
    #[prost(bytes = "bytes", optional, tag = "4")]
    pub application_info: Option<Bytes>,
}

impl WireSyncState {
    /// Build an `UPDATE` entry with a full name.
    pub fn update(name: &Name, session: u32, seq: u32) -> Self {
        Self {
            action: ActionType::Update as i32,
            name: Some(name.to_uri()),
            seqno: Some(WireSeqNo { session, seq }),
            application_info: None,
        }
    }

    /// Build an `UPDATE_NO_NAME` entry.
    pub fn update_no_name(session: u32, seq: u32) -> Self {
        Self {
            action: ActionType::UpdateNoName as i32,
            name: None,
            seqno: Some(WireSeqNo { session, seq }),
            application_info: None,
        }
    }

    /// Attach an opaque application blob.
    pub fn with_application_info(mut self, info: Bytes) -> Self {
        self.application_info = Some(info);
        self
    }

    /// The decoded action, if the tag value is known.
    pub fn action_type(&self) -> Option<ActionType> {
        ActionType::try_from(self.action).ok()
    }

    /// Session number, `0` if the entry is missing its seqno.
    pub fn session(&self) -> u32 {
        self.seqno.map(|s| s.session).unwrap_or_default()
    }

    /// Sequence number, `0` if the entry is missing its seqno.
    pub fn seq(&self) -> u32 {
        self.seqno.map(|s| s.seq).unwrap_or_default()
    }
}

/// The payload of a sync data packet.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncStateMsg {
    #[prost(message, repeated, tag = "1")]
    pub ss: Vec<WireSyncState>,
}

impl SyncStateMsg {
    /// Encode to the length-delimited wire form.
    pub fn encode_to_bytes(&self) -> Bytes {
        Bytes::from(self.encode_length_delimited_to_vec())
    }

    /// Decode from the length-delimited wire form.
    pub fn decode_from_bytes(bytes: &[u8]) -> Result<Self, prost::DecodeError> {
        Self::decode_length_delimited(bytes)
    }
}

/// One update as delivered to the application.
///
/// This mirrors a wire entry but always carries a resolved data prefix
/// and the table's *current* sequence number, which may have superseded
/// the one on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncUpdate {
    /// The producer's publishing prefix.
    pub data_prefix: Name,
    /// The producer's session number.
    pub session_id: u32,
    /// The latest known sequence number for the session.
    pub sequence_no: u32,
    /// Opaque blob the producer attached to its publish, if any.
    pub application_info: Bytes,
}
