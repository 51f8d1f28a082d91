//! Integration tests for the forwarding loop
//!
//! A `tokio::io::duplex` pair stands in for the TNC and an in-process
//! listener plays the APRS-IS server.

use bytes::Bytes;
use igate::{FrameOutcome, Forwarder, ForwarderConfig, GatewayError};
use igate_core::{Backoff, KissConnection, RelayClient, RelayConfig, TncError, TncInterface};
use igate_proto::{encode_frame, Address, DecodedPacket, FrameType, RawFrame};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const GATEWAY: &str = "N0CALL-10";

fn heard_packet(info: &'static [u8]) -> Vec<u8> {
    DecodedPacket {
        destination: Address::new("APRS", 0),
        source: Address::new("KJ5EVH", 7),
        digipeaters: vec![Address::new("WIDE1", 1)],
        info: Bytes::from_static(info),
    }
    .encode()
}

fn once_config() -> ForwarderConfig {
    let mut config = ForwarderConfig::new(GATEWAY);
    config.once = true;
    config.read_interval = Duration::from_millis(50);
    config
}

fn heard_frame(info: &'static [u8]) -> RawFrame {
    RawFrame {
        channel: 0,
        frame_type: FrameType::Data,
        payload: Bytes::from(heard_packet(info)),
    }
}

fn relay_config(port: u16) -> RelayConfig {
    let mut config = RelayConfig::new("127.0.0.1", port, GATEWAY, "12345");
    config.timeout = Duration::from_secs(2);
    config
}

const VERIFIED: &str = "# logresp N0CALL-10 verified, server T2TEST\r\n";

/// Accept one client, answer its login, and collect everything it sends after
async fn start_aprsis(response: &'static str) -> (u16, JoinHandle<(String, String)>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        write_half.write_all(b"# aprsc 2.1 test\r\n").await.unwrap();

        let mut login = String::new();
        reader.read_line(&mut login).await.unwrap();
        write_half.write_all(response.as_bytes()).await.unwrap();

        let mut rest = String::new();
        let _ = reader.read_to_string(&mut rest).await;
        (login.trim().to_string(), rest)
    });

    (port, handle)
}

#[tokio::test]
async fn test_heard_packet_relayed_with_q_construct() {
    let (port, server) = start_aprsis(VERIFIED).await;

    let (client, mut tnc_side) = tokio::io::duplex(4096);
    let mut tnc = KissConnection::new("duplex", client);
    tnc_side
        .write_all(&encode_frame(0, FrameType::Data, &heard_packet(b"!hello")))
        .await
        .unwrap();

    let relay = RelayClient::new(relay_config(port));
    let mut forwarder = Forwarder::new(once_config(), Some(relay));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    forwarder.run(&mut tnc, shutdown_rx).await.unwrap();

    let (login, sent) = server.await.unwrap();
    assert!(login.starts_with("user N0CALL-10 pass 12345 vers "));
    assert_eq!(sent, "KJ5EVH-7>APRS,WIDE1-1,qAR,N0CALL-10:!hello\n");

    let counters = forwarder.counters();
    assert_eq!(counters.frames_seen, 1);
    assert_eq!(counters.relayed_ok, 1);
    assert_eq!(counters.relayed_failed, 0);

    assert!(!tnc.is_connected());
    assert!(!forwarder.relay().unwrap().is_connected());
}

#[tokio::test]
async fn test_unreachable_server_gated_by_backoff() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let relay = RelayClient::new(relay_config(port));
    let mut forwarder = Forwarder::new(ForwarderConfig::new(GATEWAY), Some(relay));

    let frame = heard_frame(b"!first");
    let outcome = forwarder.handle_frame(frame.clone()).await;
    assert!(matches!(outcome, FrameOutcome::NotRelayed(_)));
    assert_eq!(forwarder.backoff().current_delay(), Duration::from_secs(4));

    // Second frame arrives inside the backoff window: no new attempt
    let outcome = forwarder.handle_frame(frame).await;
    assert!(matches!(outcome, FrameOutcome::NotRelayed(_)));
    assert_eq!(forwarder.backoff().current_delay(), Duration::from_secs(4));

    let counters = forwarder.counters();
    assert_eq!(counters.frames_seen, 2);
    assert_eq!(counters.relayed_ok, 0);
    assert_eq!(counters.relayed_failed, 0);
}

#[tokio::test]
async fn test_malformed_frame_skipped() {
    let (client, mut tnc_side) = tokio::io::duplex(4096);
    let mut tnc = KissConnection::new("duplex", client);

    let mut bytes = vec![0xC0, 0x00, 0xDB, 0x41, 0xC0];
    bytes.extend_from_slice(&encode_frame(0, FrameType::Data, &heard_packet(b"!ok")));
    tnc_side.write_all(&bytes).await.unwrap();

    let mut forwarder = Forwarder::new(once_config(), None);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    forwarder.run(&mut tnc, shutdown_rx).await.unwrap();
    assert_eq!(forwarder.counters().frames_seen, 1);
}

#[tokio::test]
async fn test_tnc_loss_ends_run() {
    let (client, tnc_side) = tokio::io::duplex(64);
    let mut tnc = KissConnection::new("duplex", client);
    drop(tnc_side);

    let mut forwarder = Forwarder::new(ForwarderConfig::new(GATEWAY), None);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let result = forwarder.run(&mut tnc, shutdown_rx).await;
    assert!(matches!(result, Err(GatewayError::Tnc(TncError::Closed))));
    assert!(!tnc.is_connected());
}

#[tokio::test]
async fn test_shutdown_signal_stops_idle_run() {
    let (client, _tnc_side) = tokio::io::duplex(64);
    let mut tnc = KissConnection::new("duplex", client);

    let mut config = ForwarderConfig::new(GATEWAY);
    config.read_interval = Duration::from_millis(20);
    let mut forwarder = Forwarder::new(config, None);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).unwrap();
    });

    tokio::time::timeout(Duration::from_secs(5), forwarder.run(&mut tnc, shutdown_rx))
        .await
        .expect("run did not observe shutdown")
        .unwrap();

    assert_eq!(forwarder.counters().frames_seen, 0);
    assert!(!tnc.is_connected());
}

#[tokio::test]
async fn test_non_data_frames_do_not_end_once_mode() {
    let (client, mut tnc_side) = tokio::io::duplex(4096);
    let mut tnc = KissConnection::new("duplex", client);

    let mut bytes = encode_frame(0, FrameType::TxDelay, &[0x32]);
    bytes.extend_from_slice(&encode_frame(1, FrameType::Data, &heard_packet(b"!data")));
    tnc_side.write_all(&bytes).await.unwrap();

    let mut forwarder = Forwarder::new(once_config(), None);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    forwarder.run(&mut tnc, shutdown_rx).await.unwrap();
    assert_eq!(forwarder.counters().frames_seen, 2);
}

/// Accept clients and never answer them; returns the port and an accept count
async fn start_silent_server() -> (u16, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let accepted = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&accepted);
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            held.push(stream);
        }
    });

    (port, accepted)
}

#[tokio::test]
async fn test_backoff_window_starts_after_slow_failure() {
    let (port, accepted) = start_silent_server().await;

    // Login timeout longer than the first retry delay
    let mut config = relay_config(port);
    config.timeout = Duration::from_millis(300);
    let backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1), 2.0).unwrap();
    let mut forwarder = Forwarder::new(ForwarderConfig::new(GATEWAY), Some(RelayClient::new(config)))
        .with_backoff(backoff);

    forwarder.try_connect().await;
    assert!(!forwarder.backoff().ready(Instant::now()));

    forwarder.try_connect().await;
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    assert!(!forwarder.relay().unwrap().is_connected());
}

#[tokio::test]
async fn test_shutdown_interrupts_slow_login() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        while stream.write_all(b"# aprsc keepalive\r\n").await.is_ok() {
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
    });

    let (client, _tnc_side) = tokio::io::duplex(64);
    let mut tnc = KissConnection::new("duplex", client);

    let mut config = ForwarderConfig::new(GATEWAY);
    config.read_interval = Duration::from_millis(50);
    let mut relay = relay_config(port);
    relay.timeout = Duration::from_secs(2);
    let mut forwarder = Forwarder::new(config, Some(RelayClient::new(relay)));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).unwrap();
    });

    let started = Instant::now();
    tokio::time::timeout(Duration::from_secs(1), forwarder.run(&mut tnc, shutdown_rx))
        .await
        .expect("login held up shutdown")
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!forwarder.relay().unwrap().is_connected());
    assert!(!tnc.is_connected());
}

#[tokio::test]
async fn test_send_failure_drops_session_and_resets_backoff() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let mut login = String::new();
        reader.read_line(&mut login).await.unwrap();
        write_half.write_all(VERIFIED.as_bytes()).await.unwrap();
        // Hang up right after the login
    });

    let relay = RelayClient::new(relay_config(port));
    let mut forwarder = Forwarder::new(ForwarderConfig::new(GATEWAY), Some(relay));

    forwarder.try_connect().await;
    assert!(forwarder.relay().unwrap().is_connected());

    // The first write after the hang-up may still be buffered by the kernel
    let mut failed = None;
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let outcome = forwarder.handle_frame(heard_frame(b"!again")).await;
        if matches!(outcome, FrameOutcome::RelayFailed(_)) {
            failed = Some(outcome);
            break;
        }
    }

    assert_eq!(
        failed,
        Some(FrameOutcome::RelayFailed(
            "KJ5EVH-7>APRS,WIDE1-1,qAR,N0CALL-10:!again".to_string()
        ))
    );
    assert_eq!(forwarder.counters().relayed_failed, 1);
    assert!(!forwarder.relay().unwrap().is_connected());
    assert!(forwarder.backoff().ready(Instant::now()));
    assert_eq!(forwarder.backoff().current_delay(), Duration::from_secs(2));
}

#[tokio::test]
async fn test_unverified_login_grows_backoff() {
    let (port, _server) = start_aprsis("# logresp N0CALL-10 unverified, server T2TEST\r\n").await;

    let relay = RelayClient::new(relay_config(port));
    let mut forwarder = Forwarder::new(ForwarderConfig::new(GATEWAY), Some(relay));

    let outcome = forwarder.handle_frame(heard_frame(b"!hello")).await;

    assert!(matches!(outcome, FrameOutcome::NotRelayed(_)));
    assert!(!forwarder.relay().unwrap().is_connected());
    assert!(!forwarder.backoff().ready(Instant::now()));
    assert_eq!(forwarder.backoff().current_delay(), Duration::from_secs(4));
    assert_eq!(forwarder.counters().relayed_failed, 0);
}
