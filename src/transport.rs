//! Transport readers feeding the ingestor.
//!
//! Each reader owns its socket and calls the shared ingress function for every delivery it
//! receives. Readers stop on I/O error or end of stream and report why.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::ingest::{IngestReport, Ingestor, Transport};

/// Largest UDP payload
const MAX_DATAGRAM: usize = 65_535;

const STREAM_READ_CHUNK: usize = 16 * 1024;

/// Running totals for one reader
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransportStats {
    pub deliveries: u64,
    pub bytes: u64,
    pub frames: u64,
    pub upserted: u64,
}

impl TransportStats {
    fn record(&mut self, bytes: usize, report: &IngestReport) {
        self.deliveries += 1;
        self.bytes += bytes as u64;
        self.frames += report.frames as u64;
        self.upserted += report.upserted.len() as u64;
    }
}

/// Receive datagrams until the socket errors
pub async fn run_datagram_listener(socket: UdpSocket, ingestor: Arc<Ingestor>) -> io::Result<()> {
    info!(addr = ?socket.local_addr().ok(), "Datagram listener started");
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut stats = TransportStats::default();
    loop {
        let (len, peer) = socket.recv_from(&mut buf).await?;
        let report = ingestor.ingest(Transport::Datagram, &buf[..len]);
        debug!(
            %peer,
            bytes = len,
            frames = report.frames,
            upserted = report.upserted.len(),
            "Datagram ingested"
        );
        stats.record(len, &report);
    }
}

/// Read a stream connection to its end. A partial frame left when the stream ends or fails is
/// discarded so the next connection starts clean.
pub async fn run_stream_reader<R>(mut reader: R, ingestor: Arc<Ingestor>) -> io::Result<TransportStats>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; STREAM_READ_CHUNK];
    let mut stats = TransportStats::default();
    loop {
        let len = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(len) => len,
            Err(err) => {
                discard_partial(&ingestor, "stream failed");
                return Err(err);
            }
        };
        let report = ingestor.ingest(Transport::Stream, &buf[..len]);
        debug!(bytes = len, frames = report.frames, "Stream chunk ingested");
        stats.record(len, &report);
    }

    discard_partial(&ingestor, "stream closed");
    info!(
        deliveries = stats.deliveries,
        frames = stats.frames,
        upserted = stats.upserted,
        "Stream closed"
    );
    Ok(stats)
}

fn discard_partial(ingestor: &Ingestor, reason: &'static str) {
    let discarded = ingestor.reset_stream();
    if discarded > 0 {
        warn!(bytes = discarded, reason, "Partial stream frame discarded");
    }
}
