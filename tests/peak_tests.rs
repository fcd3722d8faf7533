//! Integration tests for the peak-sample stream and the windowed peak
//! convenience operation.

use std::time::{Duration, Instant};

use pulse_async::{ConnectOptions, PulseClient, PulseError};
use pulse_protocol::mock::MockServer;
use tokio::time::timeout;
use tokio_stream::StreamExt;

const WAIT: Duration = Duration::from_secs(2);

async fn connected(server: &MockServer) -> PulseClient {
    env_logger::try_init().ok();
    let client = PulseClient::new("peak-test", None, server.backend()).unwrap();
    timeout(WAIT, client.connect(ConnectOptions::default()))
        .await
        .expect("connect timed out")
        .expect("connect failed");
    client
}

#[tokio::test]
async fn test_peak_stream_yields_decoded_levels() {
    let server = MockServer::new();
    server.set_source_level("mic", 0.6);
    let client = connected(&server).await;

    let samples = client
        .subscribe_peak(Some("mic"), 50, None, false)
        .unwrap();
    tokio::pin!(samples);
    for _ in 0..3 {
        let level = timeout(WAIT, samples.next()).await.unwrap().unwrap().unwrap();
        assert!((level - 0.6).abs() < 1e-6);
        assert!((0.0..=1.0).contains(&level));
    }
}

#[tokio::test]
async fn test_monitoring_defaults_to_the_default_source() {
    let server = MockServer::new();
    server.set_source_level("mic", 0.35);
    let client = connected(&server).await;

    let samples = client.subscribe_peak(None, 50, None, false).unwrap();
    tokio::pin!(samples);
    let level = timeout(WAIT, samples.next()).await.unwrap().unwrap().unwrap();
    assert!((level - 0.35).abs() < 1e-6);
}

#[tokio::test]
async fn test_levels_above_full_scale_are_clamped() {
    let server = MockServer::new();
    server.set_source_level("mic", 1.8);
    let client = connected(&server).await;

    let samples = client.subscribe_peak(Some("mic"), 50, None, false).unwrap();
    tokio::pin!(samples);
    let level = timeout(WAIT, samples.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(level, 1.0);
}

#[tokio::test]
async fn test_monitor_of_narrows_to_one_stream() {
    let server = MockServer::new();
    server.set_stream_level(40, 0.9);
    let client = connected(&server).await;

    let samples = client
        .subscribe_peak(Some("alpha.monitor"), 50, Some(40), false)
        .unwrap();
    tokio::pin!(samples);
    let level = timeout(WAIT, samples.next()).await.unwrap().unwrap().unwrap();
    assert!((level - 0.9).abs() < 1e-6);
}

#[tokio::test]
async fn test_dropping_the_stream_tears_down_the_native_stream() {
    let server = MockServer::new();
    server.set_source_level("mic", 0.4);
    let client = connected(&server).await;

    {
        let samples = client.subscribe_peak(Some("mic"), 50, None, false).unwrap();
        tokio::pin!(samples);
        timeout(WAIT, samples.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(server.live_record_streams(), 1);
    }
    assert_eq!(server.live_record_streams(), 0);
}

#[tokio::test]
async fn test_zero_rate_is_rejected_by_the_native_layer() {
    let server = MockServer::new();
    let client = connected(&server).await;
    let result = client.subscribe_peak(Some("mic"), 0, None, false);
    match result {
        Err(PulseError::OperationInvalid(_)) => {}
        Err(other) => panic!("expected operation error, got {other}"),
        Ok(_) => panic!("zero sample rate must be refused"),
    }
}

#[tokio::test]
async fn test_peak_over_window_returns_the_constant_level() {
    let server = MockServer::new();
    server.set_source_level("mic", 0.5);
    let client = connected(&server).await;

    let started = Instant::now();
    let peak = timeout(
        WAIT,
        client.peak_over_window(Some("mic"), Duration::from_millis(300), None),
    )
    .await
    .unwrap()
    .unwrap();
    assert!((peak - 0.5).abs() < 1e-6);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(server.live_record_streams(), 0);
}

#[tokio::test]
async fn test_peak_over_window_on_a_silent_source_is_zero() {
    let server = MockServer::new();
    let client = connected(&server).await;
    let peak = timeout(
        WAIT,
        client.peak_over_window(Some("ghost"), Duration::from_millis(200), None),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(peak, 0.0);
}

#[tokio::test]
async fn test_peak_over_window_propagates_disconnect() {
    let server = MockServer::new();
    server.set_source_level("mic", 0.5);
    let client = connected(&server).await;

    let peak = client.peak_over_window(Some("mic"), Duration::from_secs(5), None);
    let killer = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        server.drop_connections();
    };
    let (peak, ()) = timeout(WAIT, async { tokio::join!(peak, killer) })
        .await
        .unwrap();
    match peak {
        Err(PulseError::Disconnected) => {}
        other => panic!("expected disconnect, got {other:?}"),
    }
    assert_eq!(server.live_record_streams(), 0);
}
