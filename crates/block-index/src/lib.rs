//! Atomic dedup primitives against a durable block index (C1).
//!
//! This crate defines the `BlockIndexClient` contract the Pipeline Core
//! drives, and ships `InMemoryBlockIndex`, a `Clone`-cheap, thread-safe
//! implementation suitable for tests and for embedding behind a real
//! database in a host binary. The durable schema itself is explicitly out
//! of scope — see §4.1 of the spec this crate implements.

mod error;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use common::{BlockKey, VolumeId, VolumeKind, VolumeState};
use futures::future::BoxFuture;
use tracing::debug;

pub use error::{BlockIndexError, BlockIndexResult};

/// Atomic primitives against the persistent `(hash_key, size) -> volume_id`
/// table, plus volume registration and transaction commit.
///
/// All operations are async because a real backend suspends on I/O; the
/// in-memory implementation below resolves immediately but keeps the same
/// shape so callers never need to special-case it.
pub trait BlockIndexClient: Send + Sync {
    /// Returns the volume id of an existing `(hash_key, size)` row, or
    /// `VolumeId::NONE` if absent.
    fn find_block_id(&self, key: &BlockKey) -> BoxFuture<'_, BlockIndexResult<VolumeId>>;

    /// Allocates a fresh volume id and registers it as `Temporary`.
    fn register_remote_volume(
        &self,
        filename: String,
        kind: VolumeKind,
    ) -> BoxFuture<'_, BlockIndexResult<VolumeId>>;

    /// Atomic upsert: inserts `(hash_key, size) -> volume_id` if absent and
    /// returns `true`, otherwise leaves the row untouched and returns
    /// `false`. Must be serializable against concurrent `add_block` and
    /// `move_block_to_volume` calls for the same key.
    fn add_block(
        &self,
        key: BlockKey,
        volume_id: VolumeId,
    ) -> BoxFuture<'_, BlockIndexResult<bool>>;

    /// Atomically reassigns a row from `from_volume_id` to `to_volume_id`.
    /// Fails with `BlockIndexError::StaleVolume` if the row's current
    /// volume doesn't match `from_volume_id`.
    fn move_block_to_volume(
        &self,
        key: BlockKey,
        from_volume_id: VolumeId,
        to_volume_id: VolumeId,
    ) -> BoxFuture<'_, BlockIndexResult<()>>;

    /// Flushes pending work to durable storage. `tag` is an opaque
    /// diagnostic label, logged but otherwise ignored.
    fn commit_transaction<'a>(&'a self, tag: &'a str) -> BoxFuture<'a, BlockIndexResult<()>>;
}

#[derive(Default)]
struct RegisteredVolume {
    #[allow(dead_code)]
    filename: String,
    kind: VolumeKind,
    state: VolumeState,
}

#[derive(Default)]
struct Inner {
    blocks: HashMap<BlockKey, VolumeId>,
    volumes: HashMap<VolumeId, RegisteredVolume>,
    next_volume_id: i64,
}

/// Thread-safe, in-process `BlockIndexClient`. Shared cheaply via `Clone`
/// (an `Arc<Mutex<_>>` handle), the same ownership shape the teacher's
/// `CapsuleRegistry` uses so multiple pipeline shards can race over one
/// index safely.
#[derive(Clone, Default)]
pub struct InMemoryBlockIndex {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryBlockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/diagnostic helper: current volume id backing a key, if any.
    pub fn volume_for(&self, key: &BlockKey) -> Option<VolumeId> {
        self.inner.lock().unwrap().blocks.get(key).copied()
    }

    /// Test/diagnostic helper: how many distinct blocks are indexed.
    pub fn block_count(&self) -> usize {
        self.inner.lock().unwrap().blocks.len()
    }
}

fn ready<'a, T: Send + 'a>(value: T) -> Pin<Box<dyn Future<Output = T> + Send + 'a>> {
    Box::pin(async move { value })
}

impl BlockIndexClient for InMemoryBlockIndex {
    fn find_block_id(&self, key: &BlockKey) -> BoxFuture<'_, BlockIndexResult<VolumeId>> {
        let found = self
            .inner
            .lock()
            .unwrap()
            .blocks
            .get(key)
            .copied()
            .unwrap_or(VolumeId::NONE);
        ready(Ok(found))
    }

    fn register_remote_volume(
        &self,
        filename: String,
        kind: VolumeKind,
    ) -> BoxFuture<'_, BlockIndexResult<VolumeId>> {
        let mut inner = self.inner.lock().unwrap();
        let id = VolumeId(inner.next_volume_id);
        inner.next_volume_id += 1;
        debug!(volume_id = %id, filename = %filename, "registering remote volume");
        inner.volumes.insert(
            id,
            RegisteredVolume {
                filename,
                kind,
                state: VolumeState::Temporary,
            },
        );
        ready(Ok(id))
    }

    fn add_block(
        &self,
        key: BlockKey,
        volume_id: VolumeId,
    ) -> BoxFuture<'_, BlockIndexResult<bool>> {
        let mut inner = self.inner.lock().unwrap();
        let was_new = match inner.blocks.get(&key) {
            Some(_) => false,
            None => {
                inner.blocks.insert(key, volume_id);
                true
            }
        };
        ready(Ok(was_new))
    }

    fn move_block_to_volume(
        &self,
        key: BlockKey,
        from_volume_id: VolumeId,
        to_volume_id: VolumeId,
    ) -> BoxFuture<'_, BlockIndexResult<()>> {
        let mut inner = self.inner.lock().unwrap();
        let result = match inner.blocks.get(&key).copied() {
            Some(current) if current == from_volume_id => {
                inner.blocks.insert(key, to_volume_id);
                Ok(())
            }
            _ => Err(BlockIndexError::StaleVolume {
                hash_key: key.hash_key.0,
                size: key.size,
                expected: from_volume_id,
            }),
        };
        ready(result)
    }

    fn commit_transaction<'a>(&'a self, tag: &'a str) -> BoxFuture<'a, BlockIndexResult<()>> {
        debug!(tag, "commit_transaction");
        ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::HashKey;

    fn key(hash: &str, size: u64) -> BlockKey {
        BlockKey::new(HashKey::new(hash), size)
    }

    #[tokio::test]
    async fn find_block_id_returns_none_sentinel_when_absent() {
        let index = InMemoryBlockIndex::new();
        let found = index.find_block_id(&key("A", 100)).await.unwrap();
        assert_eq!(found, VolumeId::NONE);
    }

    #[tokio::test]
    async fn add_block_upserts_once() {
        let index = InMemoryBlockIndex::new();
        let vol = index
            .register_remote_volume("vol-0".into(), VolumeKind::Blocks)
            .await
            .unwrap();

        let first = index.add_block(key("A", 100), vol).await.unwrap();
        let second = index.add_block(key("A", 100), VolumeId(vol.0 + 1)).await.unwrap();

        assert!(first, "first add_block should report was_new");
        assert!(!second, "second add_block with same key should not");
        assert_eq!(index.volume_for(&key("A", 100)), Some(vol));
    }

    #[tokio::test]
    async fn move_block_to_volume_requires_matching_from() {
        let index = InMemoryBlockIndex::new();
        let vol_a = index
            .register_remote_volume("vol-a".into(), VolumeKind::Blocks)
            .await
            .unwrap();
        let vol_b = index
            .register_remote_volume("vol-b".into(), VolumeKind::Blocks)
            .await
            .unwrap();

        index.add_block(key("A", 100), vol_a).await.unwrap();

        let stale = index
            .move_block_to_volume(key("A", 100), vol_b, vol_a)
            .await;
        assert!(matches!(stale, Err(BlockIndexError::StaleVolume { .. })));

        index
            .move_block_to_volume(key("A", 100), vol_a, vol_b)
            .await
            .unwrap();
        assert_eq!(index.volume_for(&key("A", 100)), Some(vol_b));
    }

    #[tokio::test]
    async fn dedup_race_only_one_winner() {
        let index = InMemoryBlockIndex::new();
        let vol_a = index
            .register_remote_volume("vol-a".into(), VolumeKind::Blocks)
            .await
            .unwrap();
        let vol_b = index
            .register_remote_volume("vol-b".into(), VolumeKind::Blocks)
            .await
            .unwrap();

        let first = index.add_block(key("race", 42), vol_a).await.unwrap();
        let second = index.add_block(key("race", 42), vol_b).await.unwrap();

        assert!(first);
        assert!(!second);
        assert_eq!(index.volume_for(&key("race", 42)), Some(vol_a));
    }
}
