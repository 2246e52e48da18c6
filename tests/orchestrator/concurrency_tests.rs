use super::support::{new_server, setup, setup_with, test_config};
use gamehost_orchestrator::error::{Error, ErrorClass, Result};
use gamehost_orchestrator::server::ServerState;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_second_operation_is_rejected_not_queued() -> Result<()> {
    let (runtime, orchestrator) = setup();
    let manager = Arc::clone(orchestrator.manager());

    let server = manager.register(new_server("minecraft-vanilla", "alice")).await?;
    manager.provision(server.id).await?;
    runtime.set_start_delay(Duration::from_millis(200));

    let starter = Arc::clone(&manager);
    let id = server.id;
    let start = tokio::spawn(async move { starter.start(id).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(manager.is_busy(id));

    let err = manager.stop(id).await.unwrap_err();
    assert!(matches!(err, Error::ConcurrencyConflict(_)), "got {:?}", err);
    assert_eq!(err.class(), ErrorClass::Conflict);
    assert!(matches!(
        manager.delete(id).await,
        Err(Error::ConcurrencyConflict(_))
    ));

    // Reads do not block and report the in-flight state
    let status = manager.get_status(id).await?;
    assert_eq!(status.desired, ServerState::Starting);

    let started = start.await.expect("start task panicked")?;
    assert_eq!(started.desired_state, ServerState::Online);
    assert!(!manager.is_busy(id));

    // The slot is released once the first operation finishes
    manager.stop(id).await?;
    Ok(())
}

#[tokio::test]
async fn test_different_servers_run_in_parallel() -> Result<()> {
    let (runtime, orchestrator) = setup();
    let manager = Arc::clone(orchestrator.manager());
    runtime.set_start_delay(Duration::from_millis(100));

    let mut ids = Vec::new();
    for _ in 0..3 {
        let server = manager.register(new_server("minecraft-vanilla", "dave")).await?;
        manager.provision(server.id).await?;
        ids.push(server.id);
    }

    let starts = ids.iter().map(|id| {
        let manager = Arc::clone(&manager);
        let id = *id;
        tokio::spawn(async move { manager.start(id).await })
    });

    for handle in futures::future::join_all(starts).await {
        let server = handle.expect("start task panicked")?;
        assert_eq!(server.desired_state, ServerState::Online);
    }

    Ok(())
}

#[tokio::test]
async fn test_exec_racing_delete_does_not_revive_record() -> Result<()> {
    let (runtime, orchestrator) = setup();
    let manager = Arc::clone(orchestrator.manager());

    let server = manager.register(new_server("minecraft-vanilla", "erin")).await?;
    manager.provision(server.id).await?;
    manager.start(server.id).await?;
    runtime.set_exec_delay(Duration::from_millis(300));

    let execer = Arc::clone(&manager);
    let id = server.id;
    let exec = tokio::spawn(async move { execer.exec_command(id, "save-all").await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    manager.delete(id).await?;
    assert!(matches!(manager.get(id).await, Err(Error::ServerNotFound(_))));

    let result = exec.await.expect("exec task panicked");
    assert!(matches!(result, Err(Error::NotFound(_))), "got {:?}", result);
    assert!(matches!(manager.get(id).await, Err(Error::ServerNotFound(_))));
    assert!(manager.list().await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_status_racing_stop_keeps_desired_state() -> Result<()> {
    let (runtime, orchestrator) = setup();
    let manager = Arc::clone(orchestrator.manager());

    let server = manager.register(new_server("minecraft-vanilla", "frank")).await?;
    manager.provision(server.id).await?;
    manager.start(server.id).await?;
    runtime.set_inspect_delay(Duration::from_millis(300));

    let reader = Arc::clone(&manager);
    let id = server.id;
    let status = tokio::spawn(async move { reader.get_status(id).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let stopped = manager.stop(id).await?;
    assert_eq!(stopped.desired_state, ServerState::Offline);

    // The read started before the stop and must not overwrite it
    status.await.expect("status task panicked")?;
    let record = manager.get(id).await?;
    assert_eq!(record.desired_state, ServerState::Offline);
    assert_eq!(record.observed_state, ServerState::Offline);

    runtime.set_inspect_delay(Duration::ZERO);
    assert_eq!(manager.start(id).await?.desired_state, ServerState::Online);

    Ok(())
}

#[tokio::test]
async fn test_parallel_provisions_respect_owner_quota() -> Result<()> {
    let mut config = test_config();
    config.limits.max_servers_per_owner = Some(2);
    let (runtime, orchestrator) = setup_with(config);
    let manager = Arc::clone(orchestrator.manager());

    let first = manager.register(new_server("minecraft-vanilla", "grace")).await?;
    manager.provision(first.id).await?;
    runtime.set_create_delay(Duration::from_millis(100));

    let mut ids = Vec::new();
    for _ in 0..2 {
        ids.push(manager.register(new_server("minecraft-vanilla", "grace")).await?.id);
    }

    let provisions = ids.iter().map(|id| {
        let manager = Arc::clone(&manager);
        let id = *id;
        tokio::spawn(async move { manager.provision(id).await })
    });

    let mut provisioned = 0;
    let mut rejected = 0;
    for handle in futures::future::join_all(provisions).await {
        match handle.expect("provision task panicked") {
            Ok(_) => provisioned += 1,
            Err(Error::ResourceLimitExceeded(_)) => rejected += 1,
            Err(e) => return Err(e),
        }
    }
    assert_eq!((provisioned, rejected), (1, 1));
    assert_eq!(runtime.container_count(), 2);

    // Nothing stays reserved once the provisions finish
    manager.delete(first.id).await?;
    let last = manager.list().await?.into_iter().find(|s| s.container.is_none());
    let last = last.expect("rejected server is still registered");
    manager.provision(last.id).await?;
    assert_eq!(runtime.container_count(), 2);

    Ok(())
}
