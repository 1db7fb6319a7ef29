use credence::federation::{StateManager, StateStats};
use credence::store::memory::MemoryEphemeralStore;
use credence::{CoreConfig, Error};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::advance;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ConnectProgress {
    step: u8,
    handle: String,
}

fn setup() -> (Arc<MemoryEphemeralStore>, StateManager) {
    let store = Arc::new(MemoryEphemeralStore::new());
    let manager = StateManager::new(store.clone(), CoreConfig::new());
    (store, manager)
}

#[tokio::test(start_paused = true)]
async fn state_is_consumed_once() -> Result<(), Error> {
    let (_, manager) = setup();
    let user_id = Uuid::new_v4();

    let state = manager.create_state(user_id, "instagram").await?;
    let Some(payload) = manager.verify_state(&state).await? else {
        panic!("fresh state should verify");
    };
    assert_eq!(payload.user_id, user_id);
    assert_eq!(payload.provider, "instagram");

    assert!(manager.verify_state(&state).await?.is_none());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn state_expires_after_ttl() -> Result<(), Error> {
    let (_, manager) = setup();
    let state = manager.create_state(Uuid::new_v4(), "instagram").await?;

    advance(Duration::from_secs(599)).await;
    assert_eq!(manager.stats().await?.active_states, 1);

    advance(Duration::from_secs(1)).await;
    assert!(manager.verify_state(&state).await?.is_none());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn code_verifier_is_returned_once() -> Result<(), Error> {
    let (_, manager) = setup();
    let state = manager.create_state(Uuid::new_v4(), "twitter").await?;

    manager.store_code_verifier(&state, "v").await?;
    assert_eq!(manager.get_code_verifier(&state).await?.as_deref(), Some("v"));
    assert!(manager.get_code_verifier(&state).await?.is_none());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn code_verifier_expires_independently_of_state() -> Result<(), Error> {
    let store = Arc::new(MemoryEphemeralStore::new());
    let manager = StateManager::new(
        store,
        CoreConfig::new().with_verifier_ttl(Duration::from_secs(60)),
    );
    let state = manager.create_state(Uuid::new_v4(), "twitter").await?;
    manager.store_code_verifier(&state, "v").await?;

    advance(Duration::from_secs(61)).await;
    assert!(manager.get_code_verifier(&state).await?.is_none());
    assert!(manager.verify_state(&state).await?.is_some());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn temp_data_survives_reads_until_ttl() -> Result<(), Error> {
    let (_, manager) = setup();
    let progress = ConnectProgress {
        step: 2,
        handle: "@creator".to_string(),
    };

    manager
        .store_temp_data("connect:42", &progress, Some(Duration::from_secs(60)))
        .await?;
    assert_eq!(
        manager.get_temp_data::<ConnectProgress>("connect:42").await?,
        Some(progress.clone())
    );
    assert_eq!(
        manager.get_temp_data::<ConnectProgress>("connect:42").await?,
        Some(progress)
    );

    advance(Duration::from_secs(60)).await;
    assert!(manager
        .get_temp_data::<ConnectProgress>("connect:42")
        .await?
        .is_none());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn temp_data_defaults_to_configured_ttl() -> Result<(), Error> {
    let (_, manager) = setup();
    manager.store_temp_data("k", &1u32, None).await?;

    advance(Duration::from_secs(599)).await;
    assert_eq!(manager.get_temp_data::<u32>("k").await?, Some(1));

    advance(Duration::from_secs(1)).await;
    assert_eq!(manager.get_temp_data::<u32>("k").await?, None);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cleanup_removes_only_lapsed_entries() -> Result<(), Error> {
    let (store, manager) = setup();
    let state = manager.create_state(Uuid::new_v4(), "gmail").await?;
    manager.store_code_verifier(&state, "v").await?;
    manager
        .store_temp_data("short", "x", Some(Duration::from_secs(10)))
        .await?;
    manager
        .store_temp_data("long", "y", Some(Duration::from_secs(3600)))
        .await?;

    assert_eq!(manager.cleanup().await?, 0);
    assert_eq!(store.len().await, 4);

    advance(Duration::from_secs(600)).await;
    assert_eq!(manager.cleanup().await?, 3);
    assert_eq!(store.len().await, 1);
    assert_eq!(
        manager.stats().await?,
        StateStats {
            active_states: 0,
            active_verifiers: 0,
            temp_data_count: 1,
        }
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_verification_has_one_winner() -> Result<(), Error> {
    let (_, manager) = setup();
    let manager = Arc::new(manager);
    let state = manager.create_state(Uuid::new_v4(), "youtube").await?;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let manager = manager.clone();
        let state = state.clone();
        handles.push(tokio::spawn(async move { manager.verify_state(&state).await }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await {
            Ok(Ok(Some(_))) => winners += 1,
            Ok(Ok(None)) => {}
            Ok(Err(err)) => panic!("unexpected error: {err}"),
            Err(err) => panic!("task failed: {err}"),
        }
    }
    assert_eq!(winners, 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn pkce_flow_across_legs() -> Result<(), Error> {
    let (_, manager) = setup();
    let user_id = Uuid::new_v4();

    let start = manager.begin_pkce(user_id, "tiktok").await?;
    assert_eq!(start.state.len(), 43);
    assert_eq!(manager.stats().await?.active_verifiers, 1);

    let callback = manager.complete_pkce(&start.state).await?;
    assert_eq!(callback.payload.user_id, user_id);
    assert_eq!(callback.code_verifier.challenge_s256(), start.code_challenge);
    assert_eq!(manager.stats().await?, StateStats::default());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn pkce_callback_after_ttl_fails() -> Result<(), Error> {
    let (_, manager) = setup();
    let start = manager.begin_pkce(Uuid::new_v4(), "tiktok").await?;

    advance(Duration::from_secs(601)).await;
    assert!(matches!(
        manager.complete_pkce(&start.state).await,
        Err(Error::StateNotFound)
    ));
    Ok(())
}
