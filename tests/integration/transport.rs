//! Transport scenarios: S2 (stream happy path), S3 (stream failure before
//! any bytes are written falling back to the datagram transport), and a
//! partial-body failure that must resume the datagram transport from the
//! true byte count rather than corrupting the scratch file.

use std::sync::Arc;
use std::time::Duration;

use rhizome_core::wire::{BlockKind, IncomingBlockHeader};
use rhizome_services::DEFAULT_PRIORITY;
use rhizomed::scheduler::Scheduler;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::infra::{self, peer_with_stream, test_config, AlwaysVerifies, FakeStore, NullSink, RecordingImporter};

/// S2 — a peer with a stream address serves the payload over HTTP/1.0 and
/// the engine writes it straight through, without ever touching the
/// datagram transport.
#[tokio::test]
async fn stream_happy_path_completes_without_falling_back() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = match listener.local_addr().unwrap() {
        std::net::SocketAddr::V4(v4) => v4,
        _ => unreachable!("loopback bind is always v4 here"),
    };
    let body = vec![0x42u8; 1234];

    let server = tokio::spawn({
        let body = body.clone();
        async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 512];
            let n = socket.read(&mut request).await.unwrap();
            let request = String::from_utf8_lossy(&request[..n]);
            assert!(request.starts_with("GET /rhizome/file/stream-hash"));

            let header = format!("HTTP/1.0 200 OK\r\nContent-Length: {}\r\n\r\n", body.len());
            socket.write_all(header.as_bytes()).await.unwrap();
            socket.write_all(&body).await.unwrap();
        }
    });

    let store = Arc::new(FakeStore::new());
    let verifier = Arc::new(AlwaysVerifies);
    let importer = Arc::new(RecordingImporter::new());
    let sink = Arc::new(NullSink);

    let (_tx, shutdown) = broadcast::channel(1);
    let scheduler = Scheduler::spawn(test_config(), store, verifier, importer.clone(), sink, shutdown);

    let manifest = infra::manifest(40, 1, body.len() as u64, "stream-hash");
    let peer = peer_with_stream(addr);
    scheduler.suggest_queue(manifest, peer, DEFAULT_PRIORITY).await;

    let imported = infra::wait_until(|| importer.payload_count() == 1, Duration::from_secs(2)).await;
    assert!(imported, "payload was never handed to the importer");
    assert_eq!(importer.last_payload_len(), Some(body.len() as u64));
    assert!(!scheduler.any_fetch_active().await);

    server.await.unwrap();
}

/// S3 — the peer's stream transport refuses the request (404), so the
/// engine falls back to the datagram transport; feeding it the payload
/// as three blocks (one out of order) completes the fetch.
#[tokio::test]
async fn stream_failure_falls_back_to_datagram_and_completes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = match listener.local_addr().unwrap() {
        std::net::SocketAddr::V4(v4) => v4,
        _ => unreachable!("loopback bind is always v4 here"),
    };

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 512];
        let _ = socket.read(&mut request).await.unwrap();
        socket.write_all(b"HTTP/1.0 404 Not Found\r\n\r\n").await.unwrap();
    });

    let store = Arc::new(FakeStore::new());
    let verifier = Arc::new(AlwaysVerifies);
    let importer = Arc::new(RecordingImporter::new());
    let sink = Arc::new(NullSink);

    let (_tx, shutdown) = broadcast::channel(1);
    let scheduler = Scheduler::spawn(test_config(), store, verifier, importer.clone(), sink, shutdown);

    let bundle_id = [41u8; 32];
    let manifest = rhizome_core::manifest::Manifest {
        bundle_id,
        version: 1,
        payload_length: 1234,
        payload_hash: "fallback-hash".to_string(),
        self_signed: true,
        ttl: 3600,
    };
    let peer = peer_with_stream(addr);
    scheduler.suggest_queue(manifest, peer, DEFAULT_PRIORITY).await;

    server.await.unwrap();

    // The stream task still has to read and parse the 404 and report
    // back over its own channel before the slot switches to RxDatagram;
    // give it a moment before sending blocks.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(scheduler.any_fetch_active().await, "slot should still be active after falling back");

    let bid_prefix = {
        let mut p = [0u8; 16];
        p.copy_from_slice(&bundle_id[..16]);
        p
    };

    let block_at = |offset: u64, len: usize, kind: BlockKind| IncomingBlockHeader {
        bid_prefix,
        version: 1,
        offset,
        count: len as u32,
        kind,
    };

    // Send the tail (offset 1200, 34 bytes) first, out of order.
    scheduler
        .received_content(block_at(1200, 34, BlockKind::Tail), vec![0x09u8; 34])
        .await;
    assert!(scheduler.any_fetch_active().await, "tail block alone is buffered, not contiguous yet");

    scheduler
        .received_content(block_at(0, 1000, BlockKind::Body), vec![0x01u8; 1000])
        .await;
    scheduler
        .received_content(block_at(1000, 200, BlockKind::Body), vec![0x02u8; 200])
        .await;

    let imported = infra::wait_until(|| importer.payload_count() == 1, Duration::from_secs(2)).await;
    assert!(imported, "payload was never completed over the datagram fallback");
    assert_eq!(importer.last_payload_len(), Some(1234));
    assert!(!scheduler.any_fetch_active().await);
}

/// The stream transport writes part of the body, then the connection drops
/// mid-body. The fallback to datagram must resume from the bytes already
/// on disk, not from offset 0 — otherwise the datagram transport's blocks
/// land in the scratch file on top of (or past) what the stream already
/// wrote, corrupting the payload.
#[tokio::test]
async fn stream_partial_body_failure_resumes_datagram_from_bytes_written() {
    const STREAM_PART: usize = 500;
    const TOTAL: usize = 1234;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = match listener.local_addr().unwrap() {
        std::net::SocketAddr::V4(v4) => v4,
        _ => unreachable!("loopback bind is always v4 here"),
    };

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 512];
        let _ = socket.read(&mut request).await.unwrap();
        let header = format!("HTTP/1.0 200 OK\r\nContent-Length: {TOTAL}\r\n\r\n");
        socket.write_all(header.as_bytes()).await.unwrap();
        socket.write_all(&[0xAAu8; STREAM_PART]).await.unwrap();
        // Drop the connection without writing the remaining body bytes.
    });

    let store = Arc::new(FakeStore::new());
    let verifier = Arc::new(AlwaysVerifies);
    let importer = Arc::new(RecordingImporter::new());
    let sink = Arc::new(NullSink);

    let (_tx, shutdown) = broadcast::channel(1);
    let scheduler = Scheduler::spawn(test_config(), store, verifier, importer.clone(), sink, shutdown);

    let bundle_id = [43u8; 32];
    let manifest = rhizome_core::manifest::Manifest {
        bundle_id,
        version: 1,
        payload_length: TOTAL as u64,
        payload_hash: "partial-fallback-hash".to_string(),
        self_signed: true,
        ttl: 3600,
    };
    let peer = peer_with_stream(addr);
    scheduler.suggest_queue(manifest, peer, DEFAULT_PRIORITY).await;

    server.await.unwrap();

    // Give the stream task time to observe EOF, report back, and have the
    // scheduler switch the slot into RxDatagram before sending blocks.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(scheduler.any_fetch_active().await, "slot should still be active after falling back");

    let bid_prefix = {
        let mut p = [0u8; 16];
        p.copy_from_slice(&bundle_id[..16]);
        p
    };
    let tail = IncomingBlockHeader {
        bid_prefix,
        version: 1,
        offset: STREAM_PART as u64,
        count: (TOTAL - STREAM_PART) as u32,
        kind: BlockKind::Tail,
    };
    scheduler
        .received_content(tail, vec![0xBBu8; TOTAL - STREAM_PART])
        .await;

    let imported = infra::wait_until(|| importer.payload_count() == 1, Duration::from_secs(2)).await;
    assert!(imported, "payload was never completed after the partial stream failure");
    assert_eq!(importer.last_payload_len(), Some(TOTAL as u64));

    let bytes = importer.last_payload_bytes().expect("scratch file should be readable");
    assert_eq!(&bytes[..STREAM_PART], &[0xAAu8; STREAM_PART][..], "stream-written prefix was corrupted");
    assert_eq!(&bytes[STREAM_PART..], &[0xBBu8; TOTAL - STREAM_PART][..], "datagram suffix landed at the wrong offset");
}
