use std::{path::Path, sync::Arc, time::Duration};

use {
    anyhow::{Context, Result},
    nexus_channel::{ChannelOptions, SessionChannel},
    nexus_config::NexusConfig,
    nexus_discovery::{DiscoveryProbe, ProbeOptions},
    nexus_protocol::GameRecord,
    nexus_reconciler::{Reconciler, ReconcilerEvent, ReconcilerOptions},
    nexus_watchdog::ProcessWatchdog,
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use crate::discover_commands::cancel_on_ctrl_c;

pub async fn processes(config: &NexusConfig) -> Result<()> {
    let watchdog = ProcessWatchdog::system(config.watchdog.store_app_probe);
    let obs = watchdog.poll().await?;

    let mut names: Vec<_> = obs.processes.iter().collect();
    names.sort();
    for name in names {
        println!("{name}");
    }
    if let Some(app_id) = obs.external_app_id {
        println!("store app: {app_id}");
    }
    Ok(())
}

/// Read a catalog file: a JSON array of game records.
pub fn load_catalog(path: &Path) -> Result<Vec<GameRecord>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read catalog {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid catalog {}", path.display()))
}

async fn resolve_server(config: &NexusConfig, explicit: Option<&str>) -> Result<String> {
    if let Some(url) = explicit.or(config.client.server_address.as_deref()) {
        return Ok(url.trim_end_matches('/').to_string());
    }
    info!("no server configured, scanning the LAN");
    let probe = DiscoveryProbe::new(ProbeOptions::from(&config.discovery));
    probe
        .discover_preferred(None, &CancellationToken::new())
        .await
        .map(|found| found.address)
        .context("no server answered on the LAN")
}

pub async fn run(config: &NexusConfig, server: Option<&str>, catalog: &Path) -> Result<()> {
    let games = load_catalog(catalog)?;
    let server = resolve_server(config, server).await?;
    let client_id = config.client.resolved_client_id();
    info!(%server, %client_id, games = games.len(), "starting session tracking");

    let channel = SessionChannel::new(
        &server,
        client_id,
        ChannelOptions::from(&config.channel),
    )?;
    let _status = channel.on_status_change(|state| info!(%state, "session channel"));
    if let Err(e) = channel.connect().await {
        warn!(error = %e, "initial connect failed, retrying in the background");
    }

    let mut reconciler = Reconciler::new(
        Arc::new(channel.clone()),
        ProcessWatchdog::system(config.watchdog.store_app_probe),
        ReconcilerOptions::from(&config.watchdog),
    )
    .with_catalog(games);
    let mut events = reconciler.subscribe();
    let handle = reconciler.spawn();

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(&cancel);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(ReconcilerEvent::GameStarted(game)) => println!("started  {} ({})", game.name, game.id),
                Some(ReconcilerEvent::GameStopped(game)) => println!("stopped  {} ({})", game.name, game.id),
                Some(ReconcilerEvent::ExternalAppStarted(id)) => println!("started  store app {id}"),
                Some(ReconcilerEvent::ExternalAppStopped(id)) => println!("stopped  store app {id}"),
                Some(ReconcilerEvent::Corrected(verdict)) => println!("corrected {verdict:?}"),
                None => break,
            },
        }
    }

    handle.shutdown().await;
    if channel.current_session().is_some() && !channel.end_session() {
        warn!("could not close the open session before exit");
    }
    // Give the close frame a moment to flush.
    tokio::time::sleep(Duration::from_millis(200)).await;
    channel.disconnect();
    Ok(())
}
