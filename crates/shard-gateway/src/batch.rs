//! Bulk request batching
//!
//! Guild ids are packed into as few SYNC_GUILD / REQUEST_GUILD_MEMBERS frames as fit in
//! one 4096-byte gateway frame. The batcher also counts the responses still owed for
//! each guild, which is what decides when a shard has caught up after READY.

use crate::protocol::{GatewayMessage, RequestGuildMembersPayload};
use shard_core::Snowflake;
use std::collections::HashMap;

/// Which bulk request a batcher builds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    /// op 12, `d` is the id array
    GuildSync,
    /// op 8, `d.guild_id` is the id array
    MemberChunk,
}

impl BatchKind {
    /// Byte budget for the id array, derived from the frame envelope
    #[must_use]
    pub const fn default_budget(self) -> usize {
        match self {
            Self::GuildSync => 4_081,
            Self::MemberChunk => 4_048,
        }
    }
}

/// One flushed batch, ready to be framed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub kind: BatchKind,
    pub ids: Vec<Snowflake>,
}

impl Batch {
    #[must_use]
    pub fn into_message(self) -> GatewayMessage {
        match self.kind {
            BatchKind::GuildSync => GatewayMessage::sync_guilds(&self.ids),
            BatchKind::MemberChunk => {
                GatewayMessage::request_guild_members(&RequestGuildMembersPayload::all(self.ids))
            }
        }
    }
}

/// Size-bounded id accumulator with per-guild response tracking
#[derive(Debug)]
pub struct BulkRequestBatcher {
    kind: BatchKind,
    budget: usize,
    pending: Vec<Snowflake>,
    /// Serialized size estimate; each id costs its digits plus quotes and a comma
    pending_len: usize,
    outstanding: HashMap<Snowflake, u64>,
}

impl BulkRequestBatcher {
    /// Cost of one id beyond its digits: two quotes and a separator
    const ID_OVERHEAD: usize = 3;

    #[must_use]
    pub fn new(kind: BatchKind) -> Self {
        Self::with_budget(kind, kind.default_budget())
    }

    #[must_use]
    pub fn with_budget(kind: BatchKind, budget: usize) -> Self {
        Self {
            kind,
            budget,
            pending: Vec::new(),
            pending_len: 1,
            outstanding: HashMap::new(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> BatchKind {
        self.kind
    }

    /// Add an id; returns the previous batch if this id would not have fit in it
    pub fn enqueue(&mut self, id: Snowflake) -> Option<Batch> {
        let cost = id.rendered_len() + Self::ID_OVERHEAD;

        let flushed = if self.pending_len + cost > self.budget {
            self.flush()
        } else {
            None
        };

        self.pending.push(id);
        self.pending_len += cost;
        flushed
    }

    /// Flush whatever is pending once the shard no longer needs to accumulate
    pub fn flush_if_ready(&mut self, ready: bool) -> Option<Batch> {
        if ready {
            self.flush()
        } else {
            None
        }
    }

    /// Take the pending batch, if any
    pub fn flush(&mut self) -> Option<Batch> {
        if self.pending.is_empty() {
            return None;
        }
        self.pending_len = 1;
        Some(Batch {
            kind: self.kind,
            ids: std::mem::take(&mut self.pending),
        })
    }

    /// Record that `count` more responses are owed for `id`
    pub fn expect(&mut self, id: Snowflake, count: u64) {
        if count == 0 {
            return;
        }
        let owed = self.outstanding.entry(id).or_insert(0);
        *owed = owed.saturating_add(count);
    }

    /// Count one response for `id`; true when that settled the guild
    pub fn settle(&mut self, id: Snowflake) -> bool {
        match self.outstanding.get_mut(&id) {
            Some(owed) if *owed > 1 => {
                *owed -= 1;
                false
            }
            Some(_) => {
                self.outstanding.remove(&id);
                true
            }
            None => false,
        }
    }

    /// Nothing pending and no responses owed
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.pending.is_empty() && self.outstanding.is_empty()
    }

    /// Ids not yet flushed
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Guilds still owed at least one response
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Forget pending ids and owed responses
    pub fn clear(&mut self) {
        self.pending.clear();
        self.pending_len = 1;
        self.outstanding.clear();
    }
}

/// Number of GUILD_MEMBERS_CHUNK responses a full member request produces
#[must_use]
pub fn chunk_count(member_count: u64, members_per_chunk: u64) -> u64 {
    member_count.div_ceil(members_per_chunk.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const FRAME_LIMIT: usize = 4096;

    fn ids(raw: &[u64]) -> Vec<Snowflake> {
        raw.iter().copied().map(Snowflake::new).collect()
    }

    #[test]
    fn test_accumulates_until_flushed() {
        let mut batcher = BulkRequestBatcher::new(BatchKind::GuildSync);
        for id in ids(&[81_384_788_765_712_384, 81_384_788_765_712_385, 3]) {
            assert!(batcher.enqueue(id).is_none());
            assert!(batcher.flush_if_ready(false).is_none());
        }
        assert_eq!(batcher.pending(), 3);

        let batch = batcher.flush().unwrap();
        assert_eq!(batch.ids.len(), 3);
        assert!(batcher.flush().is_none());
    }

    #[test]
    fn test_flush_if_ready() {
        let mut batcher = BulkRequestBatcher::new(BatchKind::MemberChunk);
        batcher.enqueue(Snowflake::new(7));
        let batch = batcher.flush_if_ready(true).unwrap();
        assert_eq!(batch.ids, ids(&[7]));
        assert!(batcher.flush_if_ready(true).is_none());
    }

    #[test]
    fn test_overflow_seeds_next_batch() {
        // Budget fits exactly two 1-digit ids: 1 + 4 + 4 = 9
        let mut batcher = BulkRequestBatcher::with_budget(BatchKind::GuildSync, 9);
        assert!(batcher.enqueue(Snowflake::new(1)).is_none());
        assert!(batcher.enqueue(Snowflake::new(2)).is_none());

        let flushed = batcher.enqueue(Snowflake::new(3)).unwrap();
        assert_eq!(flushed.ids, ids(&[1, 2]));
        assert_eq!(batcher.pending(), 1);
        assert_eq!(batcher.flush().unwrap().ids, ids(&[3]));
    }

    #[test]
    fn test_outstanding_tracking() {
        let mut batcher = BulkRequestBatcher::new(BatchKind::MemberChunk);
        let guild = Snowflake::new(10);
        batcher.expect(guild, 2);
        batcher.expect(Snowflake::new(11), 0);
        assert_eq!(batcher.outstanding(), 1);
        assert!(!batcher.is_settled());

        assert!(!batcher.settle(guild));
        assert!(batcher.settle(guild));
        assert!(!batcher.settle(guild));
        assert!(batcher.is_settled());
    }

    #[test]
    fn test_pending_ids_block_settled() {
        let mut batcher = BulkRequestBatcher::new(BatchKind::GuildSync);
        batcher.enqueue(Snowflake::new(1));
        assert!(!batcher.is_settled());
        batcher.clear();
        assert!(batcher.is_settled());
    }

    #[test]
    fn test_chunk_count() {
        assert_eq!(chunk_count(1, 1000), 1);
        assert_eq!(chunk_count(1000, 1000), 1);
        assert_eq!(chunk_count(1001, 1000), 2);
        assert_eq!(chunk_count(250_000, 1000), 250);
        assert_eq!(chunk_count(5, 0), 5);
    }

    #[test]
    fn test_wire_shapes() {
        let sync = Batch {
            kind: BatchKind::GuildSync,
            ids: ids(&[5]),
        };
        assert_eq!(
            sync.into_message().to_json().unwrap(),
            r#"{"op":12,"d":["5"]}"#
        );

        let members = Batch {
            kind: BatchKind::MemberChunk,
            ids: ids(&[5]),
        };
        let json = members.into_message().to_json().unwrap();
        assert!(json.starts_with(r#"{"op":8,"d":{"#));
        assert!(json.contains(r#""guild_id":["5"]"#));
    }

    fn encoded_batches(kind: BatchKind, raw: &[u64]) -> Vec<(Vec<Snowflake>, usize)> {
        let mut batcher = BulkRequestBatcher::new(kind);
        let mut batches: Vec<Batch> = raw
            .iter()
            .filter_map(|&id| batcher.enqueue(Snowflake::new(id)))
            .collect();
        batches.extend(batcher.flush());

        batches
            .into_iter()
            .map(|batch| {
                let ids = batch.ids.clone();
                let len = batch.into_message().to_json().unwrap().len();
                (ids, len)
            })
            .collect()
    }

    proptest! {
        #[test]
        fn prop_guild_sync_frames_fit(raw in prop::collection::vec(any::<u64>(), 0..1200)) {
            let batches = encoded_batches(BatchKind::GuildSync, &raw);
            for (_, len) in &batches {
                prop_assert!(*len < FRAME_LIMIT, "frame of {} bytes", len);
            }
            let flattened: Vec<Snowflake> = batches.into_iter().flat_map(|(ids, _)| ids).collect();
            prop_assert_eq!(flattened, ids(&raw));
        }

        #[test]
        fn prop_member_chunk_frames_fit(raw in prop::collection::vec(any::<u64>(), 0..1200)) {
            let batches = encoded_batches(BatchKind::MemberChunk, &raw);
            for (_, len) in &batches {
                prop_assert!(*len < FRAME_LIMIT, "frame of {} bytes", len);
            }
            let flattened: Vec<Snowflake> = batches.into_iter().flat_map(|(ids, _)| ids).collect();
            prop_assert_eq!(flattened, ids(&raw));
        }
    }
}
