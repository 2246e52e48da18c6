use super::support::{new_server, setup};
use futures::StreamExt;
use gamehost_orchestrator::error::{Error, Result};
use gamehost_orchestrator::runtime::RuntimeError;
use gamehost_orchestrator::server::{ServerId, ServerState};
use gamehost_orchestrator::Orchestrator;

async fn provisioned(orchestrator: &Orchestrator) -> Result<ServerId> {
    let manager = orchestrator.manager();
    let server = manager.register(new_server("minecraft-vanilla", "alice")).await?;
    manager.provision(server.id).await?;
    Ok(server.id)
}

#[tokio::test]
async fn test_start_stop_restart_cycle() -> Result<()> {
    let (runtime, orchestrator) = setup();
    let manager = orchestrator.manager();
    let id = provisioned(&orchestrator).await?;
    let mut events = manager.events().subscribe();

    let server = manager.start(id).await?;
    assert_eq!(server.desired_state, ServerState::Online);
    let handle = server.container.clone().unwrap();
    assert!(runtime.is_running(&handle));

    let server = manager.restart(id).await?;
    assert_eq!(server.observed_state, ServerState::Online);

    let server = manager.stop(id).await?;
    assert_eq!(server.desired_state, ServerState::Offline);
    assert!(!runtime.is_running(&handle));

    let mut seen = Vec::new();
    while let Ok(change) = events.try_recv() {
        seen.push((change.old, change.new));
    }
    assert_eq!(
        seen,
        vec![
            (ServerState::Offline, ServerState::Starting),
            (ServerState::Starting, ServerState::Online),
            (ServerState::Online, ServerState::Restarting),
            (ServerState::Restarting, ServerState::Online),
            (ServerState::Online, ServerState::Stopping),
            (ServerState::Stopping, ServerState::Offline),
        ]
    );

    Ok(())
}

#[tokio::test]
async fn test_invalid_transitions_are_rejected() -> Result<()> {
    let (_runtime, orchestrator) = setup();
    let manager = orchestrator.manager();
    let id = provisioned(&orchestrator).await?;

    // Offline cannot stop or restart
    assert!(matches!(
        manager.stop(id).await,
        Err(Error::InvalidTransition {
            from: ServerState::Offline,
            to: ServerState::Stopping
        })
    ));
    assert!(matches!(
        manager.restart(id).await,
        Err(Error::InvalidTransition { .. })
    ));

    manager.start(id).await?;
    assert!(matches!(
        manager.start(id).await,
        Err(Error::InvalidTransition {
            from: ServerState::Online,
            to: ServerState::Starting
        })
    ));

    // Rejections leave the record alone
    assert_eq!(manager.get(id).await?.desired_state, ServerState::Online);

    Ok(())
}

#[tokio::test]
async fn test_operations_need_a_container() -> Result<()> {
    let (_runtime, orchestrator) = setup();
    let manager = orchestrator.manager();
    let server = manager.register(new_server("minecraft-vanilla", "alice")).await?;

    assert!(matches!(manager.start(server.id).await, Err(Error::NotProvisioned(_))));
    assert!(matches!(
        manager.exec_command(server.id, "say hi").await,
        Err(Error::NotProvisioned(_))
    ));
    assert!(matches!(
        manager.get_logs(server.id, 10).await,
        Err(Error::NotProvisioned(_))
    ));
    assert!(matches!(
        manager.start(ServerId::new()).await,
        Err(Error::ServerNotFound(_))
    ));

    Ok(())
}

#[tokio::test]
async fn test_start_that_never_runs_ends_in_error() -> Result<()> {
    let (runtime, orchestrator) = setup();
    let manager = orchestrator.manager();
    let id = provisioned(&orchestrator).await?;
    runtime.set_never_runs(true);

    let err = manager.start(id).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)), "got {:?}", err);

    let server = manager.get(id).await?;
    assert_eq!(server.desired_state, ServerState::Error);
    assert!(server.status_reason.unwrap().contains("3 checks"));
    assert!(server.container.is_some());

    // Error may be retried
    runtime.set_never_runs(false);
    let server = manager.start(id).await?;
    assert_eq!(server.desired_state, ServerState::Online);
    assert_eq!(server.status_reason, None);

    Ok(())
}

#[tokio::test]
async fn test_hung_stop_keeps_handle() -> Result<()> {
    let (runtime, orchestrator) = setup();
    let manager = orchestrator.manager();
    let id = provisioned(&orchestrator).await?;
    manager.start(id).await?;
    runtime.set_hang_stop(true);

    let err = manager.stop(id).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)), "got {:?}", err);

    let server = manager.get(id).await?;
    assert_eq!(server.desired_state, ServerState::Error);
    assert!(server.container.is_some());

    // Error can still be stopped once the engine answers
    runtime.set_hang_stop(false);
    assert_eq!(manager.stop(id).await?.desired_state, ServerState::Offline);

    Ok(())
}

#[tokio::test]
async fn test_restart_that_never_runs_ends_in_error() -> Result<()> {
    let (runtime, orchestrator) = setup();
    let manager = orchestrator.manager();
    let id = provisioned(&orchestrator).await?;
    manager.start(id).await?;
    runtime.set_never_runs(true);

    let err = manager.restart(id).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)), "got {:?}", err);

    let server = manager.get(id).await?;
    assert_eq!(server.desired_state, ServerState::Error);
    assert_eq!(server.observed_state, ServerState::Error);
    assert!(server.status_reason.unwrap().contains("3 checks"));
    assert!(server.container.is_some());

    runtime.set_never_runs(false);
    assert_eq!(manager.start(id).await?.desired_state, ServerState::Online);

    Ok(())
}

#[tokio::test]
async fn test_restart_with_hung_stop_ends_in_error() -> Result<()> {
    let (runtime, orchestrator) = setup();
    let manager = orchestrator.manager();
    let id = provisioned(&orchestrator).await?;
    let handle = manager.start(id).await?.container.unwrap();
    runtime.set_hang_stop(true);

    let err = manager.restart(id).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)), "got {:?}", err);

    let server = manager.get(id).await?;
    assert_eq!(server.desired_state, ServerState::Error);
    assert!(server.status_reason.unwrap().contains("during restart"));
    assert_eq!(server.container, Some(handle));
    assert!(!manager.is_busy(id));

    Ok(())
}

#[tokio::test]
async fn test_delete_is_idempotent() -> Result<()> {
    let (runtime, orchestrator) = setup();
    let manager = orchestrator.manager();
    let id = provisioned(&orchestrator).await?;
    manager.start(id).await?;

    manager.delete(id).await?;
    assert_eq!(runtime.container_count(), 0);
    assert!(matches!(manager.get(id).await, Err(Error::ServerNotFound(_))));

    manager.delete(id).await?;
    Ok(())
}

#[tokio::test]
async fn test_delete_keeps_record_when_engine_refuses() -> Result<()> {
    let (runtime, orchestrator) = setup();
    let manager = orchestrator.manager();
    let id = provisioned(&orchestrator).await?;
    runtime.set_fail_remove(Some(RuntimeError::Engine("device busy".to_string())));

    assert!(matches!(manager.delete(id).await, Err(Error::Engine(_))));
    assert!(manager.get(id).await?.container.is_some());

    runtime.set_fail_remove(None);
    manager.delete(id).await?;
    assert!(manager.list().await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_get_status_notices_crash() -> Result<()> {
    let (runtime, orchestrator) = setup();
    let manager = orchestrator.manager();
    let id = provisioned(&orchestrator).await?;
    let server = manager.start(id).await?;

    runtime.kill(server.container.as_ref().unwrap());

    let status = manager.get_status(id).await?;
    assert_eq!(status.desired, ServerState::Online);
    assert_eq!(status.observed, ServerState::Offline);

    Ok(())
}

#[tokio::test]
async fn test_exec_splits_on_whitespace() -> Result<()> {
    let (runtime, orchestrator) = setup();
    let manager = orchestrator.manager();
    let id = provisioned(&orchestrator).await?;
    manager.start(id).await?;

    let output = manager.exec_command(id, "  say   hello world ").await?;
    assert_eq!(output, "ran: say hello world");
    assert_eq!(runtime.execs(), vec![vec!["say", "hello", "world"]]);

    assert!(matches!(
        manager.exec_command(id, "   ").await,
        Err(Error::Validation(_))
    ));

    Ok(())
}

#[tokio::test]
async fn test_exec_times_out() -> Result<()> {
    let (runtime, orchestrator) = setup();
    let manager = orchestrator.manager();
    let id = provisioned(&orchestrator).await?;
    manager.start(id).await?;
    runtime.set_exec_delay(std::time::Duration::from_secs(3));

    assert!(matches!(
        manager.exec_command(id, "save-all").await,
        Err(Error::Timeout(_))
    ));

    Ok(())
}

#[tokio::test]
async fn test_logs_tail() -> Result<()> {
    let (runtime, orchestrator) = setup();
    let manager = orchestrator.manager();
    let id = provisioned(&orchestrator).await?;
    runtime.set_logs(&["booting", "loading world", "Done (3.2s)!"]);

    let lines: Vec<String> = manager
        .get_logs(id, 2)
        .await?
        .map(|line| line.unwrap())
        .collect()
        .await;
    assert_eq!(lines, vec!["loading world", "Done (3.2s)!"]);

    Ok(())
}
