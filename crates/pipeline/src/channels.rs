use tokio::sync::mpsc;
use tracing::info;

use crate::engine::{Block, VolumeUploadRequest};

/// An explicit structured-logging escape hatch distinct from `tracing`:
/// every line is forwarded onto both the raw channel (for a consumer that
/// wants it verbatim, e.g. a progress UI) and `tracing::info!`, so nothing
/// is lost if nobody drains the channel.
pub struct LogChannel {
    sender: mpsc::UnboundedSender<String>,
}

impl LogChannel {
    pub fn new(sender: mpsc::UnboundedSender<String>) -> Self {
        Self { sender }
    }

    pub fn emit(&self, line: impl Into<String>) {
        let line = line.into();
        info!(target: "pipeline::log_channel", "{}", line);
        let _ = self.sender.send(line);
    }
}

/// The Pipeline Core's end of the typed queues connecting it to the
/// upstream chunker, the uploader, and the spill-pickup sink.
pub struct ChannelFabric {
    pub input: mpsc::Receiver<Block>,
    pub output: mpsc::Sender<VolumeUploadRequest>,
    pub spill_pickup: mpsc::Sender<VolumeUploadRequest>,
    pub log: LogChannel,
}

/// The producer/consumer endpoints a caller wires up outside the pipeline
/// (the chunker feeding `input_tx`, the uploader draining `output_rx` and
/// `spill_pickup_rx`, and whatever drains `log_rx`).
pub struct ChannelEndpoints {
    pub input_tx: mpsc::Sender<Block>,
    pub output_rx: mpsc::Receiver<VolumeUploadRequest>,
    pub spill_pickup_rx: mpsc::Receiver<VolumeUploadRequest>,
    pub log_rx: mpsc::UnboundedReceiver<String>,
}

impl ChannelFabric {
    /// Builds a bound set of channels, applying `capacity` as backpressure
    /// on `Input`/`Output`/`SpillPickup`.
    pub fn new(capacity: usize) -> (Self, ChannelEndpoints) {
        let (input_tx, input_rx) = mpsc::channel(capacity);
        let (output_tx, output_rx) = mpsc::channel(capacity);
        let (spill_tx, spill_rx) = mpsc::channel(capacity);
        let (log_tx, log_rx) = mpsc::unbounded_channel();

        let fabric = ChannelFabric {
            input: input_rx,
            output: output_tx,
            spill_pickup: spill_tx,
            log: LogChannel::new(log_tx),
        };
        let endpoints = ChannelEndpoints {
            input_tx,
            output_rx,
            spill_pickup_rx: spill_rx,
            log_rx,
        };
        (fabric, endpoints)
    }
}
