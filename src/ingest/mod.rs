//! Ingestion Pipeline
//!
//! One ingress function for every transport: split the delivery into frames, decode each
//! frame, then persist atoms and bits or forward everything else as a control notification.
//! Framing and decode failures are logged and counted; they never stop the next frame.

pub mod notify;
pub mod upsert;

pub use notify::{ChangeBus, Notification};
pub use upsert::{merge_record, upsert, UpsertOptions, UpsertOutcome};

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::cot;
use crate::frame::{Frame, FrameSplitter};
use crate::store::Store;

/// Where a delivery came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// One self-contained UDP datagram
    Datagram,
    /// A chunk of a persistent stream connection; frames may span chunks
    Stream,
    /// A complete HTTP body from the mission content endpoint
    MissionFetch,
}

impl Transport {
    /// Whether partial frames carry over to the next delivery
    pub fn is_continuous(self) -> bool {
        matches!(self, Transport::Stream)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Transport::Datagram => "datagram",
            Transport::Stream => "stream",
            Transport::MissionFetch => "mission_fetch",
        }
    }
}

/// Outcome of one delivery
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub frames: usize,
    pub upserted: Vec<UpsertOutcome>,
    pub forwarded: usize,
    pub framing_errors: usize,
    pub decode_errors: usize,
    pub store_errors: usize,
}

/// Shared ingress point. Safe to call from many tasks at once.
pub struct Ingestor {
    store: Arc<Store>,
    bus: ChangeBus,
    max_buffer_bytes: usize,
    stream: Mutex<FrameSplitter>,
}

impl Ingestor {
    pub fn new(store: Arc<Store>, bus: ChangeBus, max_buffer_bytes: usize) -> Self {
        Self {
            store,
            bus,
            max_buffer_bytes,
            stream: Mutex::new(FrameSplitter::new(max_buffer_bytes)),
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn bus(&self) -> &ChangeBus {
        &self.bus
    }

    pub fn ingest(&self, transport: Transport, delivery: &[u8]) -> IngestReport {
        self.ingest_with(transport, delivery, UpsertOptions::default())
    }

    pub fn ingest_with(
        &self,
        transport: Transport,
        delivery: &[u8],
        options: UpsertOptions,
    ) -> IngestReport {
        let split = if transport.is_continuous() {
            self.stream.lock().push(delivery)
        } else {
            let mut splitter = FrameSplitter::new(self.max_buffer_bytes);
            let split = splitter.push(delivery);
            if !splitter.remainder().is_empty() {
                warn!(
                    transport = transport.as_str(),
                    bytes = splitter.remainder().len(),
                    "Discarding unterminated frame in self-contained delivery"
                );
            }
            split
        };

        let mut report = IngestReport {
            frames: split.frames.len(),
            framing_errors: split.dropped.len(),
            ..IngestReport::default()
        };
        for frame in &split.frames {
            self.process_frame(transport, frame, options, &mut report);
        }
        report
    }

    /// Forget any partial stream frame, e.g. after a reconnect
    pub fn reset_stream(&self) -> usize {
        let mut splitter = self.stream.lock();
        let discarded = splitter.remainder().len();
        splitter.reset();
        discarded
    }

    fn process_frame(
        &self,
        transport: Transport,
        frame: &Frame,
        options: UpsertOptions,
        report: &mut IngestReport,
    ) {
        let event = match cot::decode(frame) {
            Ok(event) => event,
            Err(err) => {
                warn!(
                    transport = transport.as_str(),
                    binary = frame.is_binary(),
                    error = %err,
                    "Discarding undecodable frame"
                );
                report.decode_errors += 1;
                return;
            }
        };

        let kind = event.kind();
        if !kind.is_persistent() {
            debug!(uid = %event.uid, cot_type = %event.cot_type, ?kind, "Forwarding control event");
            self.bus.emit(Notification::ControlMessage {
                uid: event.uid,
                cot_type: event.cot_type,
                kind,
                time: event.time,
                raw: frame.payload().to_vec(),
            });
            report.forwarded += 1;
            return;
        }

        match upsert(&self.store, &self.bus, &event, frame.payload(), options) {
            Ok(outcome) => report.upserted.push(outcome),
            Err(err) => {
                error!(uid = %event.uid, error = %err, "Failed to persist entity");
                report.store_errors += 1;
            }
        }
    }
}
