//! Integration tests for connection lifecycle and the operation surface,
//! driven against the in-memory mock backend.

use std::time::Duration;

use pulse_async::{
    ChannelVolume, ConnectOptions, EntityKind, PulseClient, PulseError, StreamRestoreInfo,
    UpdateMode,
};
use pulse_protocol::mock::MockServer;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

async fn connected(server: &MockServer) -> PulseClient {
    let client = PulseClient::new("integration-test", None, server.backend()).unwrap();
    timeout(WAIT, client.connect(ConnectOptions::default()))
        .await
        .expect("connect timed out")
        .expect("connect failed");
    client
}

#[test_log::test(tokio::test)]
async fn test_connect_and_query_entities() {
    let server = MockServer::new();
    let client = connected(&server).await;

    let info = client.server_info().await.unwrap();
    assert_eq!(info.default_sink_name, "alpha");
    assert_eq!(info.default_source_name, "mic");

    let sinks = client.sink_list().await.unwrap();
    assert_eq!(sinks.len(), 2);
    assert!(sinks.iter().any(|s| s.name == "alpha"));
    assert!(sinks.iter().any(|s| s.name == "beta"));

    let sources = client.source_list().await.unwrap();
    assert!(sources.iter().any(|s| s.name == "mic"));
    assert!(sources.iter().any(|s| s.monitor_of_sink == Some(1)));

    assert_eq!(client.card_list().await.unwrap().len(), 1);
    assert_eq!(client.client_list().await.unwrap().len(), 1);
    assert!(!client.module_list().await.unwrap().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_query_by_name_and_missing_entities() {
    let server = MockServer::new();
    let client = connected(&server).await;

    let sink = client.get_sink_by_name("alpha").await.unwrap();
    assert_eq!(sink.index, 1);
    assert_eq!(sink.monitor_source_name, "alpha.monitor");

    match client.get_sink_by_name("no-such-sink").await {
        Err(PulseError::IndexNotFound(_)) => {}
        other => panic!("expected index-not-found, got {other:?}"),
    }
    match client.sink_info(999).await {
        Err(PulseError::IndexNotFound(_)) => {}
        other => panic!("expected index-not-found, got {other:?}"),
    }
    match client.source_info(999).await {
        Err(PulseError::IndexNotFound(_)) => {}
        other => panic!("expected index-not-found, got {other:?}"),
    }
}

#[test_log::test(tokio::test)]
async fn test_mute_roundtrip() {
    let server = MockServer::new();
    let client = connected(&server).await;

    client.mute(EntityKind::Sink, 1, true).await.unwrap();
    assert!(client.sink_info(1).await.unwrap().mute);
    assert!(server.sink_by_name("alpha").unwrap().mute);

    client.mute(EntityKind::Sink, 1, false).await.unwrap();
    assert!(!client.sink_info(1).await.unwrap().mute);

    client.mute(EntityKind::SinkInput, 40, true).await.unwrap();
    assert!(client.sink_input_info(40).await.unwrap().mute);
}

#[test_log::test(tokio::test)]
async fn test_volume_helpers() {
    let server = MockServer::new();
    let client = connected(&server).await;

    client
        .volume_set_all(EntityKind::Sink, 1, 0.5)
        .await
        .unwrap();
    let vol = client.sink_info(1).await.unwrap().volume;
    assert!((vol.value_flat() - 0.5).abs() < 1e-6);
    assert_eq!(vol.channels(), 2);

    client
        .volume_change_all(EntityKind::Sink, 1, 0.25)
        .await
        .unwrap();
    let vol = client.sink_info(1).await.unwrap().volume;
    assert!((vol.value_flat() - 0.75).abs() < 1e-6);

    // Large decrease floors at zero instead of going negative.
    client
        .volume_change_all(EntityKind::Sink, 1, -2.0)
        .await
        .unwrap();
    assert!(client.sink_info(1).await.unwrap().volume.value_flat() < 1e-6);

    client
        .volume_set(
            EntityKind::Source,
            100,
            &ChannelVolume::flat(1, 0.3),
        )
        .await
        .unwrap();
    let vol = client.source_info(100).await.unwrap().volume;
    assert!((vol.value_flat() - 0.3).abs() < 1e-6);
}

#[test_log::test(tokio::test)]
async fn test_mutation_on_unknown_index_is_rejected() {
    let server = MockServer::new();
    let client = connected(&server).await;
    match client.mute(EntityKind::Sink, 999, true).await {
        Err(PulseError::OperationInvalid(_)) => {}
        other => panic!("expected operation failure, got {other:?}"),
    }
}

#[test_log::test(tokio::test)]
async fn test_connect_to_unreachable_server_fails() {
    let server = MockServer::new();
    server.set_reachable(false);
    let client = PulseClient::new("integration-test", None, server.backend()).unwrap();
    match timeout(WAIT, client.connect(ConnectOptions::default()))
        .await
        .unwrap()
    {
        Err(PulseError::Connection(_)) => {}
        other => panic!("expected connection error, got {other:?}"),
    }
    // close() after a failed connect is a no-op, twice over.
    client.close();
    client.close();
}

#[test_log::test(tokio::test)]
async fn test_connect_timeout_forces_disconnect() {
    let server = MockServer::new();
    server.set_reachable(false);
    let client = PulseClient::new("integration-test", None, server.backend()).unwrap();
    let options = ConnectOptions {
        wait_for_server: true,
        timeout: Some(Duration::from_millis(50)),
        ..Default::default()
    };
    match timeout(WAIT, client.connect(options)).await.unwrap() {
        Err(PulseError::TimeoutExceeded(_)) => {}
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(client.phase().is_down());
}

#[test_log::test(tokio::test)]
async fn test_autospawn_starts_the_server() {
    let server = MockServer::new();
    server.set_reachable(false);
    let client = PulseClient::new("integration-test", None, server.backend()).unwrap();
    let options = ConnectOptions {
        autospawn: true,
        ..Default::default()
    };
    timeout(WAIT, client.connect(options))
        .await
        .unwrap()
        .unwrap();
    assert!(client.connected());
}

#[test_log::test(tokio::test)]
async fn test_disconnect_fails_every_pending_operation() {
    let server = MockServer::new();
    let client = connected(&server).await;
    server.set_response_delay(Duration::from_millis(200));

    let query = client.sink_list();
    let mutation = client.mute(EntityKind::Sink, 1, true);
    let killer = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        server.drop_connections();
    };
    let (query, mutation, ()) = timeout(WAIT, async { tokio::join!(query, mutation, killer) })
        .await
        .unwrap();
    match query {
        Err(PulseError::Disconnected) => {}
        other => panic!("expected disconnect for query, got {other:?}"),
    }
    match mutation {
        Err(PulseError::Disconnected) => {}
        other => panic!("expected disconnect for mutation, got {other:?}"),
    }
}

#[test_log::test(tokio::test)]
async fn test_reconnect_after_failure_reuses_the_client() {
    let server = MockServer::new();
    let client = connected(&server).await;

    server.drop_connections();
    timeout(WAIT, async {
        while client.connected() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("client never observed the disconnect");
    match timeout(WAIT, client.sink_list()).await.unwrap() {
        Err(PulseError::Disconnected) => {}
        other => panic!("expected disconnect, got {other:?}"),
    }

    server.set_reachable(true);
    timeout(WAIT, client.connect(ConnectOptions::default()))
        .await
        .unwrap()
        .unwrap();
    assert!(client.connected());
    assert_eq!(client.sink_list().await.unwrap().len(), 2);
}

#[test_log::test(tokio::test)]
async fn test_module_load_and_unload() {
    let server = MockServer::new();
    let client = connected(&server).await;

    let index = client
        .module_load("module-null-sink", "sink_name=test")
        .await
        .unwrap();
    let module = client.module_info(index).await.unwrap();
    assert_eq!(module.name, "module-null-sink");
    assert_eq!(module.argument, "sink_name=test");

    client.module_unload(index).await.unwrap();
    match client.module_info(index).await {
        Err(PulseError::IndexNotFound(_)) => {}
        other => panic!("expected index-not-found, got {other:?}"),
    }
    // Unloading twice is a server-side rejection.
    match client.module_unload(index).await {
        Err(PulseError::OperationInvalid(_)) => {}
        other => panic!("expected operation failure, got {other:?}"),
    }
}

#[test_log::test(tokio::test)]
async fn test_module_load_with_invalid_name_fails() {
    let server = MockServer::new();
    let client = connected(&server).await;
    match client.module_load("not-a-module", "").await {
        Err(PulseError::OperationInvalid(_)) => {}
        other => panic!("expected operation failure, got {other:?}"),
    }
}

#[test_log::test(tokio::test)]
async fn test_stream_restore_database() {
    let server = MockServer::new();
    let client = connected(&server).await;

    assert_eq!(client.stream_restore_test().await.unwrap(), Some(1));

    let entry = |name: &str, level: f32| StreamRestoreInfo {
        name: name.into(),
        device: Some("alpha".into()),
        mute: false,
        volume: ChannelVolume::flat(2, level),
    };

    client
        .stream_restore_write(
            vec![entry("app-music", 0.8), entry("app-voice", 0.4)],
            UpdateMode::Merge,
            false,
        )
        .await
        .unwrap();
    assert_eq!(client.stream_restore_list().await.unwrap().len(), 2);

    client
        .stream_restore_write(vec![entry("app-music", 0.2)], UpdateMode::Replace, true)
        .await
        .unwrap();
    let entries = client.stream_restore_list().await.unwrap();
    let music = entries.iter().find(|e| e.name == "app-music").unwrap();
    assert!((music.volume.value_flat() - 0.2).abs() < 1e-6);

    client
        .stream_restore_write(vec![entry("only-one", 0.5)], UpdateMode::Set, false)
        .await
        .unwrap();
    let entries = client.stream_restore_list().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "only-one");

    client.stream_restore_delete(&["only-one"]).await.unwrap();
    assert!(client.stream_restore_list().await.unwrap().is_empty());
    assert!(server.restore_entries().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_defaults_ports_profiles_and_moves() {
    let server = MockServer::new();
    let client = connected(&server).await;

    client.set_default(EntityKind::Sink, "beta").await.unwrap();
    assert_eq!(client.server_info().await.unwrap().default_sink_name, "beta");

    client.set_port(EntityKind::Sink, 1, "headphones").await.unwrap();
    assert_eq!(
        client.sink_info(1).await.unwrap().active_port.as_deref(),
        Some("headphones")
    );
    match client.set_port(EntityKind::Sink, 1, "no-such-port").await {
        Err(PulseError::OperationInvalid(_)) => {}
        other => panic!("expected operation failure, got {other:?}"),
    }

    client.card_profile_set(10, "off").await.unwrap();
    assert_eq!(
        client.card_info(10).await.unwrap().active_profile.as_deref(),
        Some("off")
    );

    client.suspend(EntityKind::Sink, 1, true).await.unwrap();
    assert!(client.sink_info(1).await.unwrap().suspended);

    client
        .move_stream(EntityKind::SinkInput, 40, 2)
        .await
        .unwrap();
    assert_eq!(client.sink_input_info(40).await.unwrap().sink, 2);
}

#[test_log::test(tokio::test)]
async fn test_play_sample() {
    let server = MockServer::new();
    let client = connected(&server).await;
    client
        .play_sample("bell", Some("alpha"), 0.8, None)
        .await
        .unwrap();
    match client.play_sample("", None, 1.0, None).await {
        Err(PulseError::OperationInvalid(_)) => {}
        other => panic!("expected operation failure, got {other:?}"),
    }
}
