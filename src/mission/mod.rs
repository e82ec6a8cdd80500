//! Mission Synchronization
//!
//! A mission is a server-side named set of items (CoT uids and content files). This module
//! models the remote descriptor, talks to the mission REST API, reconciles declared membership
//! against the local store, and drives the per-mission subscription lifecycle.

pub mod client;
pub mod fetch;
pub mod reconcile;
pub mod subscription;
pub mod wire;

pub use client::{HttpMissionClient, MissionApi, RetryPolicy, SubscriptionGrant};
pub use fetch::{ContentFetcher, FetchSummary};
pub use reconcile::{ReconcileReport, Reconciler};
pub use subscription::{MissionSync, SubscriptionController};

use std::collections::HashMap;

use chrono::{DateTime, Utc};

/// Remote declaration of a mission and its membership
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MissionDescriptor {
    pub name: String,
    pub description: String,
    pub creator_uid: String,
    pub groups: Vec<String>,
    pub guid: String,
    pub invite_only: bool,
    pub password_protected: bool,
    pub keywords: Vec<String>,
    pub create_time: Option<DateTime<Utc>>,
    pub items: Vec<DescriptorItem>,
}

impl MissionDescriptor {
    /// Descriptor declaring no items; reconciling it orphans everything local
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// One declared member of a mission
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorItem {
    pub uid: String,
    pub kind: ItemKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemKind {
    /// A CoT event the server can serve from its CoT endpoint
    Cot { cot_type: String, callsign: String },
    /// A file attachment, handled by importers
    Content {
        name: String,
        hash: String,
        size_bytes: u64,
    },
}

impl DescriptorItem {
    pub fn cot(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            kind: ItemKind::Cot {
                cot_type: String::new(),
                callsign: String::new(),
            },
        }
    }

    pub fn is_cot(&self) -> bool {
        matches!(self.kind, ItemKind::Cot { .. })
    }
}

/// Per-mission subscription state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscriptionState {
    #[default]
    Unsubscribed,
    Subscribing,
    Subscribed,
    Unsubscribing,
}

impl SubscriptionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionState::Unsubscribed => "unsubscribed",
            SubscriptionState::Subscribing => "subscribing",
            SubscriptionState::Subscribed => "subscribed",
            SubscriptionState::Unsubscribing => "unsubscribing",
        }
    }
}

/// Keep one descriptor per name: the one with the latest create time.
///
/// A missing create time sorts before any real one; ties keep the first seen. Output follows
/// the order in which names first appear.
pub fn dedupe_latest(descriptors: Vec<MissionDescriptor>) -> Vec<MissionDescriptor> {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut kept: Vec<MissionDescriptor> = Vec::new();

    for descriptor in descriptors {
        match slots.get(&descriptor.name) {
            Some(&slot) => {
                if descriptor.create_time > kept[slot].create_time {
                    kept[slot] = descriptor;
                }
            }
            None => {
                slots.insert(descriptor.name.clone(), kept.len());
                kept.push(descriptor);
            }
        }
    }
    kept
}
