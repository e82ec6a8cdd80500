//! Transport readers feeding the ingestor

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use cotsync::ingest::Transport;
use cotsync::transport::{run_datagram_listener, run_stream_reader};
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};
use tokio::net::UdpSocket;

use super::support::{marker, Harness};

#[tokio::test]
async fn test_stream_reader_reassembles_chunks() {
    let harness = Harness::new();
    let (mut client, server) = tokio::io::duplex(32);
    let payload = format!("{}{}", marker("S1"), marker("S2"));

    let writer = tokio::spawn(async move {
        for chunk in payload.as_bytes().chunks(7) {
            client.write_all(chunk).await.unwrap();
        }
        client.write_all(b"<event uid=\"partial\"").await.unwrap();
    });

    let stats = run_stream_reader(server, harness.ingestor.clone()).await.unwrap();
    writer.await.unwrap();

    assert_eq!(stats.upserted, 2);
    assert!(harness.store.find_entity_by_uid("S1").unwrap().is_some());
    assert!(harness.store.find_entity_by_uid("S2").unwrap().is_some());
    assert_eq!(harness.ingestor.reset_stream(), 0, "partial frame dropped at close");
}

/// Replays scripted reads, then reports end of stream
struct ScriptedReader {
    reads: VecDeque<io::Result<Vec<u8>>>,
}

impl AsyncRead for ScriptedReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.reads.pop_front() {
            Some(Ok(bytes)) => {
                buf.put_slice(&bytes);
                Poll::Ready(Ok(()))
            }
            Some(Err(err)) => Poll::Ready(Err(err)),
            None => Poll::Ready(Ok(())),
        }
    }
}

#[tokio::test]
async fn test_reset_connection_discards_partial_frame() {
    let harness = Harness::new();
    let reader = ScriptedReader {
        reads: VecDeque::from(vec![
            Ok(b"<event uid=\"half\" type=".to_vec()),
            Err(io::Error::from(io::ErrorKind::ConnectionReset)),
        ]),
    };

    let err = run_stream_reader(reader, harness.ingestor.clone())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);

    let report = harness
        .ingestor
        .ingest(Transport::Stream, marker("AFTER").as_bytes());
    assert_eq!(report.decode_errors, 0);
    assert_eq!(report.upserted.len(), 1);
    assert_eq!(report.upserted[0].uid, "AFTER");
}

#[tokio::test]
async fn test_datagram_listener_ingests_packets() {
    let harness = Harness::new();
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let listener = tokio::spawn(run_datagram_listener(socket, harness.ingestor.clone()));

    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    sender.send_to(marker("D1").as_bytes(), addr).await.unwrap();

    let mut found = false;
    for _ in 0..100 {
        if harness.store.find_entity_by_uid("D1").unwrap().is_some() {
            found = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    listener.abort();
    assert!(found, "datagram was not ingested");
}
