use std::sync::Arc;

use block_index::BlockIndexClient;
use block_volume::{BlockVolumeWriter, CapacityPlanner, ClosedVolume, IndexAccumulator, IndexEntry};
use bytes::Bytes;
use common::{BlockKey, CompressionPolicy, HashKey, IndexFilePolicy, Options, VolumeId, VolumeKind};
use tokio::sync::oneshot;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::channels::ChannelFabric;
use crate::error::{PipelineError, PipelineResult};
use crate::task_reader::TaskReader;

/// A candidate data block arriving on Input.
pub struct Block {
    pub hash_key: HashKey,
    pub size: u64,
    pub data: Bytes,
    pub offset: u64,
    pub is_blocklist_hashes: bool,
    pub hint: CompressionPolicy,
    /// Resolved exactly once: `true` iff this call caused a new index row.
    pub completion: oneshot::Sender<bool>,
}

/// A pair `(block_volume, close_flag, index_accumulator?)` placed on
/// Output or SpillPickup.
pub struct VolumeUploadRequest {
    pub volume: ClosedVolume,
    pub close: bool,
    pub index: Option<IndexAccumulator>,
}

/// Owns at most one in-progress `BlockVolumeWriter`/`IndexAccumulator`
/// pair. Its `Drop` disposes anything still owned at unwind time, so a
/// `?`-propagated error can never leak a temp file.
#[derive(Default)]
struct VolumeSlot {
    writer: Option<BlockVolumeWriter>,
    index: Option<IndexAccumulator>,
}

impl VolumeSlot {
    fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Takes ownership of the contents out of the slot without running
    /// `Drop`'s disposal — for the case where the caller intends to
    /// finalize and emit them, not discard them.
    fn take(&mut self) -> (BlockVolumeWriter, Option<IndexAccumulator>) {
        (
            self.writer.take().expect("take called on an empty slot"),
            self.index.take(),
        )
    }
}

impl Drop for VolumeSlot {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.dispose();
        }
    }
}

fn new_volume_filename() -> String {
    format!("dblock-{}.bin", Uuid::new_v4())
}

/// The loop orchestrating the Block Index Client, Block Volume Writer,
/// Index Accumulator, and Capacity Planner: reads candidate blocks,
/// deduplicates, packs, rotates, emits upload requests, and handles
/// cancellation and graceful drain.
pub struct Pipeline<I> {
    index: Arc<I>,
    options: Options,
    fabric: ChannelFabric,
    task_reader: TaskReader,
}

impl<I: BlockIndexClient> Pipeline<I> {
    pub fn new(
        index: Arc<I>,
        options: Options,
        fabric: ChannelFabric,
        task_reader: TaskReader,
    ) -> Self {
        Self {
            index,
            options,
            fabric,
            task_reader,
        }
    }

    #[instrument(skip_all)]
    pub async fn run(mut self) -> PipelineResult<()> {
        let mut slot = VolumeSlot::default();

        loop {
            let block = match self.fabric.input.recv().await {
                Some(block) => block,
                None => {
                    info!("input retired, draining");
                    return self.drain(slot).await;
                }
            };

            self.handle_block(&mut slot, block).await?;
            self.task_reader.progress().await?;
        }
    }

    #[instrument(skip(self, slot, block), fields(hash_key = %block.hash_key, size = block.size))]
    async fn handle_block(&mut self, slot: &mut VolumeSlot, block: Block) -> PipelineResult<()> {
        let Block {
            hash_key,
            size,
            data,
            offset,
            is_blocklist_hashes,
            hint,
            completion,
        } = block;
        let key = BlockKey::new(hash_key.clone(), size);

        // Step 1: early dedup probe, pre-volume. Deliberately deferred
        // until at least one genuinely new block needs a volume; the
        // benign race this opens is resolved by step 3's atomic add.
        if !slot.is_open() {
            let existing = self.index.find_block_id(&key).await?;
            if !existing.is_none() {
                let _ = completion.send(false);
                return Ok(());
            }
        }

        // Step 2: lazy volume creation.
        if !slot.is_open() {
            self.open_new_volume(slot).await?;
        }

        // Step 3: atomic add — resolves the race from step 1.
        let current_id = slot.writer.as_ref().unwrap().volume_id();
        let was_new = self.index.add_block(key.clone(), current_id).await?;
        let _ = completion.send(was_new);
        if !was_new {
            return Ok(());
        }

        // Step 4: capacity check.
        let current_file_size = slot.writer.as_ref().unwrap().file_size();
        if CapacityPlanner::rotate_required(current_file_size, size, self.options.max_volume_size())
        {
            self.rotate(slot, &key, current_id).await?;
        }

        // Step 5: append.
        let writer = slot.writer.as_mut().expect("volume open after step 2/4");
        writer
            .add_block(&hash_key, &data, offset, size, &hint)
            .map_err(PipelineError::Volume)?;

        if is_blocklist_hashes {
            if let Some(accum) = slot.index.as_mut() {
                let start = offset as usize;
                let end = start + size as usize;
                accum
                    .append(&IndexEntry {
                        hash_key,
                        size,
                        payload: data.slice(start..end),
                    })
                    .map_err(PipelineError::Volume)?;
            }
        }

        Ok(())
    }

    async fn open_new_volume(&mut self, slot: &mut VolumeSlot) -> PipelineResult<()> {
        let filename = new_volume_filename();
        let volume_id = self
            .index
            .register_remote_volume(filename.clone(), VolumeKind::Blocks)
            .await?;
        let writer = BlockVolumeWriter::open(volume_id, filename).map_err(PipelineError::Volume)?;
        debug!(volume_id = %volume_id, "opened new block volume");

        slot.writer = Some(writer);
        slot.index = self.new_index_accumulator()?;
        Ok(())
    }

    fn new_index_accumulator(&self) -> PipelineResult<Option<IndexAccumulator>> {
        match self.options.index_file_policy {
            IndexFilePolicy::Full => {
                Ok(Some(IndexAccumulator::open().map_err(PipelineError::Volume)?))
            }
            IndexFilePolicy::None | IndexFilePolicy::Lookup => Ok(None),
        }
    }

    /// Rotation (step 4): allocates a fresh volume, moves the just-added
    /// block's row onto it, closes and emits the outgoing volume, then
    /// replaces the slot's contents with the new volume.
    #[instrument(skip(self, slot, triggering_key))]
    async fn rotate(
        &mut self,
        slot: &mut VolumeSlot,
        triggering_key: &BlockKey,
        current_id: VolumeId,
    ) -> PipelineResult<()> {
        let filename = new_volume_filename();
        let new_id = self
            .index
            .register_remote_volume(filename.clone(), VolumeKind::Blocks)
            .await?;
        let new_writer = match BlockVolumeWriter::open(new_id, filename) {
            Ok(writer) => writer,
            Err(err) => return Err(PipelineError::Volume(err)),
        };

        if let Err(err) = self
            .index
            .move_block_to_volume(triggering_key.clone(), current_id, new_id)
            .await
        {
            new_writer.dispose();
            return Err(PipelineError::Index(err));
        }

        let (mut outgoing_writer, outgoing_index) = slot.take();
        let closed = outgoing_writer.close().map_err(PipelineError::Volume)?;
        self.index.commit_transaction("CommitAddBlockToOutputFlush").await?;
        info!(volume_id = %closed.volume_id, file_size = closed.file_size, "rotating volume to output");
        self.send_output(closed, outgoing_index).await?;
        outgoing_writer.dispose();

        slot.writer = Some(new_writer);
        slot.index = self.new_index_accumulator()?;
        Ok(())
    }

    async fn send_output(
        &mut self,
        volume: ClosedVolume,
        index: Option<IndexAccumulator>,
    ) -> PipelineResult<()> {
        self.fabric.log.emit(format!(
            "volume {} ({} bytes) ready for upload",
            volume.volume_id, volume.file_size
        ));
        self.fabric
            .output
            .send(VolumeUploadRequest {
                volume,
                close: true,
                index,
            })
            .await
            .map_err(|_| PipelineError::Channel("output channel closed".into()))
    }

    /// Shutdown path: Input closed by upstream. If an Open volume has
    /// accepted any bytes, it is closed and handed to SpillPickup rather
    /// than discarded.
    async fn drain(mut self, mut slot: VolumeSlot) -> PipelineResult<()> {
        if !slot.is_open() {
            return Ok(());
        }
        if slot.writer.as_ref().unwrap().source_size() == 0 {
            return Ok(());
        }

        let (mut writer, index) = slot.take();
        let closed = writer.close().map_err(PipelineError::Volume)?;
        self.index.commit_transaction("CommitDrainToSpillPickup").await?;
        info!(volume_id = %closed.volume_id, file_size = closed.file_size, "draining partial volume to spill pickup");

        self.fabric.log.emit(format!(
            "volume {} drained to spill pickup ({} bytes)",
            closed.volume_id, closed.file_size
        ));
        self.fabric
            .spill_pickup
            .send(VolumeUploadRequest {
                volume: closed,
                close: true,
                index,
            })
            .await
            .map_err(|_| PipelineError::Channel("spill pickup channel closed".into()))?;
        writer.dispose();
        Ok(())
    }
}
