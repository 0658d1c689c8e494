//! The logger's own packet representation — decoupled from the arena wire
//! format so policies and triggers never touch `MessageView` lifetimes.

use crate::core::MessageView;

/// An immutable message observed on a source or trigger topic.
///
/// `id` and `mono_ts` come straight off the arena header (`seq` and
/// `timestamp_ns`); `wall_ts` is stamped by the reading thread at the moment
/// the packet is first observed, since the arena header carries only one
/// timestamp and policies need both bases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: u64,
    pub mono_ts: u64,
    pub wall_ts_ns: u64,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn from_view(view: &MessageView<'_>, wall_ts_ns: u64) -> Self {
        Self {
            id: view.seq,
            mono_ts: view.timestamp_ns,
            wall_ts_ns,
            payload: view.payload.to_vec(),
        }
    }
}
