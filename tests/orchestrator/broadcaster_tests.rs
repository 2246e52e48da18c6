use super::support::{counters, new_server, setup};
use gamehost_orchestrator::error::Result;
use gamehost_orchestrator::server::{ServerId, ServerState};
use gamehost_orchestrator::stats::{BroadcastMessage, Topic};
use gamehost_orchestrator::Orchestrator;
use std::time::Duration;
use tokio::sync::broadcast;

async fn running(orchestrator: &Orchestrator, owner: &str) -> Result<ServerId> {
    let manager = orchestrator.manager();
    let server = manager.register(new_server("minecraft-vanilla", owner)).await?;
    manager.provision(server.id).await?;
    manager.start(server.id).await?;
    Ok(server.id)
}

fn drain_stats(rx: &mut broadcast::Receiver<BroadcastMessage>) -> Vec<ServerId> {
    let mut ids = Vec::new();
    while let Ok(message) = rx.try_recv() {
        if let BroadcastMessage::Stats(snapshot) = message {
            ids.push(snapshot.server_id);
        }
    }
    ids
}

#[tokio::test]
async fn test_only_watched_servers_are_sampled() -> Result<()> {
    let (_runtime, orchestrator) = setup();
    let watched = running(&orchestrator, "frank").await?;
    let _ignored = running(&orchestrator, "frank").await?;
    let broadcaster = orchestrator.broadcaster();

    assert_eq!(broadcaster.tick().await?, 0);

    let mut rx = broadcaster.subscribe(Topic::Server(watched));
    assert_eq!(broadcaster.tick().await?, 1);
    assert_eq!(broadcaster.active_servers(), vec![watched]);
    assert_eq!(drain_stats(&mut rx), vec![watched]);

    drop(rx);
    assert_eq!(broadcaster.tick().await?, 0);
    assert!(broadcaster.active_servers().is_empty());
    assert_eq!(broadcaster.subscriber_count(Topic::Server(watched)), 0);

    Ok(())
}

#[tokio::test]
async fn test_admin_topic_sees_every_provisioned_server() -> Result<()> {
    let (_runtime, orchestrator) = setup();
    let first = running(&orchestrator, "grace").await?;
    let second = running(&orchestrator, "heidi").await?;
    let manager = orchestrator.manager();
    let unprovisioned = manager.register(new_server("minecraft-vanilla", "ivan")).await?;
    let broadcaster = orchestrator.broadcaster();

    let mut admin = broadcaster.subscribe(Topic::AdminAll);
    assert_eq!(broadcaster.tick().await?, 2);

    let mut seen = drain_stats(&mut admin);
    seen.sort();
    let mut expected = vec![first, second];
    expected.sort();
    assert_eq!(seen, expected);
    assert!(!seen.contains(&unprovisioned.id));

    Ok(())
}

#[tokio::test]
async fn test_resubscribe_starts_fresh_baseline() -> Result<()> {
    let (runtime, orchestrator) = setup();
    let id = running(&orchestrator, "judy").await?;
    let manager = orchestrator.manager();
    let handle = manager.get(id).await?.container.unwrap();
    let broadcaster = orchestrator.broadcaster();

    runtime.set_counters(&handle, counters(1_000_000_000, 10_000_000_000));
    let rx = broadcaster.subscribe(Topic::Server(id));
    broadcaster.tick().await?;
    assert!(manager.sampler().has_baseline(id));

    runtime.set_counters(&handle, counters(1_500_000_000, 11_000_000_000));
    let snapshot = manager.get_stats(id).await?;
    assert!(snapshot.has_baseline);
    assert_eq!(snapshot.cpu_percent, 100.0);

    drop(rx);
    let _rx = broadcaster.subscribe(Topic::Server(id));
    assert!(!manager.sampler().has_baseline(id));

    let mut rx = broadcaster.subscribe(Topic::Server(id));
    broadcaster.tick().await?;
    match rx.try_recv() {
        Ok(BroadcastMessage::Stats(snapshot)) => {
            assert!(!snapshot.has_baseline);
            assert_eq!(snapshot.cpu_percent, 0.0);
            assert!((snapshot.memory_percent - 29.296875).abs() < 1e-9);
        }
        other => panic!("expected stats, got {:?}", other),
    }

    Ok(())
}

#[tokio::test]
async fn test_engine_outage_yields_unavailable_snapshots() -> Result<()> {
    let (runtime, orchestrator) = setup();
    let id = running(&orchestrator, "kim").await?;
    let broadcaster = orchestrator.broadcaster();
    let mut rx = broadcaster.subscribe(Topic::Server(id));

    runtime.set_engine_down(true);
    assert_eq!(broadcaster.tick().await?, 1);

    match rx.try_recv() {
        Ok(BroadcastMessage::Stats(snapshot)) => assert!(snapshot.unavailable),
        other => panic!("expected stats, got {:?}", other),
    }

    // The server record is untouched by an outage
    let server = orchestrator.manager().get(id).await?;
    assert!(server.container.is_some());
    assert_eq!(server.desired_state, ServerState::Online);

    Ok(())
}

#[tokio::test]
async fn test_background_loop_forwards_status_changes() -> Result<()> {
    let (_runtime, mut orchestrator) = setup();
    let id = running(&orchestrator, "lena").await?;
    let mut rx = orchestrator.broadcaster().subscribe(Topic::Server(id));

    orchestrator.start()?;
    assert!(orchestrator.broadcaster().is_running());
    orchestrator.manager().stop(id).await?;

    let mut changes = Vec::new();
    let mut stats = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while (changes.len() < 2 || stats == 0) && tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
            Ok(Ok(BroadcastMessage::StatusChanged(change))) => changes.push(change.new),
            Ok(Ok(BroadcastMessage::Stats(_))) => stats += 1,
            _ => {}
        }
    }

    assert_eq!(changes, vec![ServerState::Stopping, ServerState::Offline]);
    assert!(stats > 0);

    orchestrator.shutdown().await?;
    assert!(!orchestrator.broadcaster().is_running());

    Ok(())
}
