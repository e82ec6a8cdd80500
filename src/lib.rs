//! cotsync: Cursor-on-Target Ingestion and Mission Synchronization
//!
//! Turns fragmented byte deliveries from datagram, stream and mission REST transports into
//! decoded CoT events, keeps a persistent entity store current with them, and reconciles
//! server-declared mission membership against local state.

pub mod config;
pub mod cot;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod logging;
pub mod mission;
pub mod store;
pub mod sweep;
pub mod transport;
