use std::time::Duration;

use {
    anyhow::Result,
    nexus_config::NexusConfig,
    nexus_discovery::{
        DiscoveryEvent, DiscoveryProbe, ProbeOptions, ServerApi, ServerCandidate, ServerWatcher,
    },
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
};

/// Cancel `token` on Ctrl-C.
pub fn cancel_on_ctrl_c(token: &CancellationToken) {
    let token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });
}

fn print_candidate(prefix: &str, candidate: &ServerCandidate) {
    println!(
        "{prefix:<10} {:<32} {:<24} {}",
        candidate.address,
        candidate.label(),
        candidate.protocol_version.as_deref().unwrap_or("-")
    );
}

pub async fn discover(config: &NexusConfig, preferred: bool) -> Result<()> {
    let probe = DiscoveryProbe::new(ProbeOptions::from(&config.discovery));
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(&cancel);

    if preferred {
        let remembered = config.client.server_address.as_deref();
        match probe.discover_preferred(remembered, &cancel).await {
            Some(found) => println!("{}", found.address),
            None => anyhow::bail!("no server answered"),
        }
        return Ok(());
    }

    let found = probe.discover(&cancel).await;
    if found.is_empty() {
        println!("No servers found.");
        return Ok(());
    }
    println!("{:<10} {:<32} {:<24} VERSION", "", "ADDRESS", "NAME");
    for candidate in &found {
        print_candidate("found", candidate);
    }
    Ok(())
}

pub async fn watch(config: &NexusConfig) -> Result<()> {
    let probe = DiscoveryProbe::new(ProbeOptions::from(&config.discovery));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let watcher = ServerWatcher::spawn(
        probe,
        Duration::from_millis(config.discovery.watch_interval_ms),
        config.discovery.max_misses,
        tx,
    );

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(&cancel);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(DiscoveryEvent::Discovered(c)) => print_candidate("+", &c),
                Some(DiscoveryEvent::Updated(c)) => print_candidate("~", &c),
                Some(DiscoveryEvent::Evicted(c)) => print_candidate("-", &c),
                None => break,
            },
        }
    }

    watcher.stop().await;
    Ok(())
}

pub async fn health(config: &NexusConfig, url: &str) -> Result<()> {
    let api = ServerApi::new(Duration::from_millis(config.discovery.http_timeout_ms));
    let base = url.trim_end_matches('/');
    if !api.health(base).await {
        anyhow::bail!("{base} did not pass the update health check");
    }
    let name = api.server_name(base).await;
    println!("{base} healthy ({})", name.as_deref().unwrap_or("unnamed"));
    Ok(())
}
