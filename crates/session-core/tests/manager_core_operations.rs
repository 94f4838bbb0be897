//! Session manager CRUD, persistence and error mapping

mod common;

use common::*;
use soundrelay_session_core::{
    BridgeState, Direction, PersistedState, SessionConfigPatch, SessionError, SessionId, SessionManager,
};
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

fn read_store(path: &std::path::Path) -> PersistedState {
    let bytes = std::fs::read(path).unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_first_run_creates_empty_store() {
    let harness = rtp_harness().await;

    assert!(harness.store_path.exists());
    assert!(read_store(&harness.store_path).sessions.is_empty());
    assert!(harness.manager.list().is_empty());
}

#[tokio::test]
async fn test_create_capture_session() {
    let harness = rtp_harness().await;

    let state = assert_ok!(
        harness
            .manager
            .create(SessionConfigPatch::named("Mic In").with_direction(Direction::Capture))
            .await
    );

    assert_eq!(state.config.name, "Mic In");
    assert_eq!(state.config.direction, Direction::Capture);
    assert_eq!(state.config.output_device_id, None);
    assert_eq!(state.config.sample_rate, 48000);
    assert_eq!(state.config.channel_count, 2);
    assert_eq!(state.created_at, state.updated_at);

    let listed = harness.manager.list();
    assert_eq!(listed, vec![state.clone()]);
    assert_eq!(read_store(&harness.store_path).sessions, vec![state.clone()]);

    // Engines stay idle until an offer arrives
    let status = harness.manager.status(&state.id()).await.unwrap();
    assert_eq!(status.state, BridgeState::Idle);
    assert_eq!(harness.backend.open_count(), 0);
}

#[tokio::test]
async fn test_create_drops_device_of_unused_direction() {
    let harness = rtp_harness().await;

    let state = harness
        .manager
        .create(
            SessionConfigPatch::named("Speakers")
                .with_direction(Direction::Playback)
                .with_input_device(Some(1))
                .with_output_device(Some(2)),
        )
        .await
        .unwrap();

    assert_eq!(state.config.input_device_id, None);
    assert_eq!(state.config.output_device_id, Some(2));
}

#[tokio::test]
async fn test_create_requires_name() {
    let harness = rtp_harness().await;

    let err = assert_err!(harness.manager.create(SessionConfigPatch::default()).await);
    assert!(matches!(err, SessionError::Validation(_)));

    let err = assert_err!(harness.manager.create(SessionConfigPatch::named("   ")).await);
    assert_eq!(err.kind(), "ValidationError");

    let err = harness
        .manager
        .create(SessionConfigPatch::named("zero").with_sample_rate(0))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Validation(_)));

    assert!(harness.manager.list().is_empty());
    assert!(read_store(&harness.store_path).sessions.is_empty());
}

#[tokio::test]
async fn test_concurrent_creates_are_all_persisted() {
    let harness = rtp_harness().await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let manager = harness.manager.clone();
        handles.push(tokio::spawn(async move {
            manager.create(SessionConfigPatch::named(format!("session {}", i))).await
        }));
    }
    let mut created = Vec::new();
    for handle in handles {
        created.push(handle.await.unwrap().unwrap());
    }

    let listed = harness.manager.list();
    assert_eq!(listed.len(), 8);
    for state in &created {
        assert!(listed.contains(state));
    }

    let persisted = read_store(&harness.store_path);
    assert_eq!(persisted.sessions.len(), 8);
    for state in &created {
        assert!(persisted.sessions.contains(state));
    }
}

#[tokio::test]
async fn test_list_is_oldest_first() {
    let harness = rtp_harness().await;

    let first = harness.manager.create(SessionConfigPatch::named("first")).await.unwrap();
    let second = harness.manager.create(SessionConfigPatch::named("second")).await.unwrap();
    let third = harness.manager.create(SessionConfigPatch::named("third")).await.unwrap();

    let ids: Vec<SessionId> = harness.manager.list().iter().map(|s| s.id()).collect();
    assert_eq!(ids, vec![first.id(), second.id(), third.id()]);
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let harness = rtp_harness().await;
    let id = SessionId::new();

    assert!(matches!(harness.manager.get(&id), Err(SessionError::NotFound(_))));
    assert!(matches!(
        harness.manager.update(&id, SessionConfigPatch::default()).await,
        Err(SessionError::NotFound(_))
    ));
    assert!(matches!(harness.manager.remove(&id).await, Err(SessionError::NotFound(_))));
    assert!(matches!(
        harness.manager.handle_offer(&id, "v=0").await,
        Err(SessionError::NotFound(_))
    ));
    assert!(matches!(harness.manager.disconnect(&id).await, Err(SessionError::NotFound(_))));
    assert!(matches!(harness.manager.status(&id).await, Err(SessionError::NotFound(_))));

    let err = "not-a-uuid".parse::<SessionId>().unwrap_err();
    assert_eq!(err.kind(), "NotFoundError");
}

#[tokio::test]
async fn test_update_merges_and_persists() {
    let harness = rtp_harness().await;
    let created = harness
        .manager
        .create(SessionConfigPatch::named("Mic In").with_description(Some("desk".into())))
        .await
        .unwrap();

    let updated = harness
        .manager
        .update(
            &created.id(),
            SessionConfigPatch::default()
                .with_latency_ms(40)
                .with_description(None),
        )
        .await
        .unwrap();

    assert_eq!(updated.id(), created.id());
    assert_eq!(updated.config.name, "Mic In");
    assert_eq!(updated.config.latency_ms, 40);
    assert_eq!(updated.config.description, None);
    assert_eq!(updated.created_at, created.created_at);
    assert!(updated.updated_at >= created.updated_at);

    assert_eq!(harness.manager.get(&created.id()).unwrap(), updated);
    assert_eq!(read_store(&harness.store_path).sessions, vec![updated]);
}

#[tokio::test]
async fn test_invalid_update_changes_nothing() {
    let harness = rtp_harness().await;
    let created = harness.manager.create(SessionConfigPatch::named("Mic In")).await.unwrap();

    let err = harness
        .manager
        .update(&created.id(), SessionConfigPatch::default().with_channel_count(0))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Validation(_)));

    let mut blank = SessionConfigPatch::default();
    blank.name = Some(String::new());
    assert!(harness.manager.update(&created.id(), blank).await.is_err());

    assert_eq!(harness.manager.get(&created.id()).unwrap(), created);
    assert_eq!(read_store(&harness.store_path).sessions, vec![created]);
}

#[tokio::test]
async fn test_remove_forgets_session() {
    let harness = rtp_harness().await;
    let keep = harness.manager.create(SessionConfigPatch::named("keep")).await.unwrap();
    let gone = harness.manager.create(SessionConfigPatch::named("gone")).await.unwrap();

    harness.manager.remove(&gone.id()).await.unwrap();

    assert!(matches!(harness.manager.get(&gone.id()), Err(SessionError::NotFound(_))));
    assert!(matches!(
        harness.manager.remove(&gone.id()).await,
        Err(SessionError::NotFound(_))
    ));
    assert_eq!(harness.manager.list(), vec![keep.clone()]);
    assert_eq!(read_store(&harness.store_path).sessions, vec![keep]);
}

#[tokio::test]
async fn test_sessions_survive_restart() {
    let harness = rtp_harness().await;
    let mic = harness
        .manager
        .create(SessionConfigPatch::named("Mic In").with_input_device(Some(2)))
        .await
        .unwrap();
    let speakers = harness
        .manager
        .create(
            SessionConfigPatch::named("Speakers")
                .with_direction(Direction::Playback)
                .with_output_device(Some(3)),
        )
        .await
        .unwrap();
    harness.manager.shutdown_all().await;

    let reloaded = SessionManager::with_rtp(
        test_config(&harness.dir),
        Arc::new(harness.backend.clone()),
    )
    .await
    .unwrap();

    assert_eq!(reloaded.list(), vec![mic.clone(), speakers.clone()]);
    for state in [&mic, &speakers] {
        let status = reloaded.status(&state.id()).await.unwrap();
        assert_eq!(status.state, BridgeState::Idle);
    }
    assert_eq!(harness.backend.open_count(), 0);
}

#[tokio::test]
async fn test_corrupt_store_fails_load() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    std::fs::create_dir_all(config.store_path.parent().unwrap()).unwrap();
    std::fs::write(&config.store_path, b"{\"sessions\": [").unwrap();

    let err = SessionManager::with_rtp(config, Arc::new(soundrelay_audio_core::SimulatedBackend::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Storage(_)));
}

#[tokio::test]
async fn test_save_failure_is_storage_error() {
    let harness = rtp_harness().await;
    let existing = harness.manager.create(SessionConfigPatch::named("existing")).await.unwrap();

    // Replace the store directory with a plain file so the next save fails
    let data_dir = harness.store_path.parent().unwrap().to_path_buf();
    std::fs::remove_dir_all(&data_dir).unwrap();
    std::fs::write(&data_dir, b"").unwrap();

    let err = harness
        .manager
        .create(SessionConfigPatch::named("unsaved"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "StorageError");

    // A failed create leaves no trace in memory
    assert_eq!(harness.manager.list(), vec![existing]);
}

#[tokio::test]
async fn test_failed_remove_can_be_retried() {
    let harness = rtp_harness().await;
    let session = harness.manager.create(SessionConfigPatch::named("sticky")).await.unwrap();

    let data_dir = harness.store_path.parent().unwrap().to_path_buf();
    std::fs::remove_dir_all(&data_dir).unwrap();
    std::fs::write(&data_dir, b"").unwrap();

    let err = harness.manager.remove(&session.id()).await.unwrap_err();
    assert_eq!(err.kind(), "StorageError");
    assert_eq!(harness.manager.get(&session.id()).unwrap(), session);

    std::fs::remove_file(&data_dir).unwrap();
    assert_ok!(harness.manager.remove(&session.id()).await);
    assert!(matches!(harness.manager.get(&session.id()), Err(SessionError::NotFound(_))));
    assert!(read_store(&harness.store_path).sessions.is_empty());
}
