//! Change notifications published to observers

use std::sync::mpsc::{channel, Receiver, Sender};

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::cot::EventKind;

/// A change observers may react to
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// An entity was inserted or updated
    EntityChanged {
        uid: String,
        local_id: u64,
        created: bool,
    },
    /// An entity was deleted by a sweep or a reconciliation
    EntityRemoved { uid: String, local_id: u64 },
    /// Every content fetch scheduled by a reconciliation finished
    MissionDownloadCompleted {
        mission: String,
        fetched: usize,
        failed: usize,
    },
    /// A stored entity predates the current record schema and was rewritten
    MigrationRequired {
        uid: String,
        from_version: u32,
        to_version: u32,
    },
    /// A tasking, reply, capability or unknown event, forwarded without persisting
    ControlMessage {
        uid: String,
        cot_type: String,
        kind: EventKind,
        time: DateTime<Utc>,
        raw: Vec<u8>,
    },
}

/// Fan-in channel for notifications. Cheap to clone; every clone feeds the same receiver.
#[derive(Clone)]
pub struct ChangeBus {
    sender: Sender<Notification>,
}

impl ChangeBus {
    pub fn new_pair() -> (Self, Receiver<Notification>) {
        let (sender, receiver) = channel();
        (Self { sender }, receiver)
    }

    /// Publish a notification. A bus nobody listens to drops it.
    pub fn emit(&self, notification: Notification) {
        if let Err(err) = self.sender.send(notification) {
            trace!(notification = ?err.0, "No notification receiver");
        }
    }
}
