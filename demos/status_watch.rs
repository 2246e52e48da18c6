use anyhow::Context;
use gamehost_orchestrator::Orchestrator;
use gamehost_orchestrator::server::NewServer;
use gamehost_orchestrator::stats::{BroadcastMessage, Topic};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG controls verbosity, e.g. RUST_LOG=gamehost_orchestrator=debug
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .init();

    let mut args = std::env::args().skip(1);
    let config_path = args.next().unwrap_or_else(|| "demos/gamehost.yaml".to_string());
    let template = args.next().unwrap_or_else(|| "minecraft-vanilla".to_string());

    tracing::info!(%config_path, %template, "Starting status_watch demo");

    let mut orchestrator = Orchestrator::from_config_file(&config_path)
        .await
        .with_context(|| format!("connecting with {}", config_path))?;
    orchestrator.start()?;

    let manager = orchestrator.manager().clone();
    let server = manager
        .register(NewServer {
            name: "Demo server".to_string(),
            game: "Demo".to_string(),
            template: template.clone(),
            limits: None,
            ports: Vec::new(),
            owner: "demo".to_string(),
        })
        .await?;

    println!("Provisioning {} from {}...", server.id, template);
    manager.provision(server.id).await?;
    println!("Starting...");
    manager.start(server.id).await?;

    let mut updates = orchestrator.broadcaster().subscribe(Topic::Server(server.id));
    println!("Watching live stats, press Ctrl-C to stop and clean up");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            message = updates.recv() => match message {
                Ok(BroadcastMessage::Stats(s)) if s.unavailable => {
                    println!("stats unavailable: {:?}", s.unavailable_reason);
                }
                Ok(BroadcastMessage::Stats(s)) => println!(
                    "cpu {:6.2}%  mem {:6.2}%  rx {:>10.0} B/s  tx {:>10.0} B/s",
                    s.cpu_percent, s.memory_percent, s.rx_bytes_per_sec, s.tx_bytes_per_sec
                ),
                Ok(BroadcastMessage::StatusChanged(change)) => {
                    println!("status {} -> {}", change.old, change.new);
                }
                Err(RecvError::Lagged(skipped)) => println!("(skipped {} updates)", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }

    println!("Cleaning up...");
    manager.delete(server.id).await?;
    orchestrator.shutdown().await?;

    Ok(())
}
