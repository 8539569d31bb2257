//! latticed — federated logical infrastructure daemon.
//!
//! Wires together the CRDT resource model, fair-share scheduler, peer
//! sync engine, controller adapters, and the observability surface, in
//! the same config-load -> tracing-init -> validate -> construct-shared-
//! state -> spawn-workers -> signal-handler shape as the teacher's own
//! `main.rs`.

mod config;
mod controller;
mod error;
mod http;
mod metrics;
mod model;
mod scheduler;
mod store;
mod sync;
mod telemetry;
mod wire;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::Config;
use crate::controller::{ControllerRunner, NoopAdapter};
use crate::scheduler::Scheduler;
use crate::store::{MemStore, RedbStore, Snapshotter, Store};
use crate::sync::SyncManager;
use lattice_crdt::{HybridClock, PeerId};

/// Resolves the configuration path from CLI arguments. Supports
/// `-c <path>`, `--config <path>`, or a bare path; falls back to
/// `latticed.toml` when no argument is provided.
fn resolve_config_path() -> String {
    let mut args = std::env::args().skip(1);

    let raw_path = match args.next() {
        Some(flag) if flag == "-c" || flag == "--config" => args.next().unwrap_or_else(|| {
            eprintln!("Missing path after {}", flag);
            std::process::exit(1);
        }),
        Some(path) => path,
        None => "latticed.toml".to_string(),
    };

    match std::fs::canonicalize(Path::new(&raw_path)) {
        Ok(p) => p.to_string_lossy().into_owned(),
        Err(_) => raw_path,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = resolve_config_path();

    let config = Config::load(Path::new(&config_path)).map_err(|e| {
        eprintln!("ERROR: failed to load config from {}: {}", config_path, e);
        e
    })?;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match config.observability.log_format {
        crate::config::LogFormat::Json => {
            tracing_subscriber::fmt().with_env_filter(env_filter).with_target(true).json().init();
        }
        crate::config::LogFormat::Pretty => {
            tracing_subscriber::fmt().with_env_filter(env_filter).with_target(true).init();
        }
    }

    info!(peer_id = %config.peer.peer_id, peers = config.peer.peers.len(), "starting latticed");

    metrics::init();

    let peer_id = PeerId::new(config.peer.peer_id.clone());
    let clock = Arc::new(HybridClock::new(peer_id.clone()));

    let store: Arc<dyn Store> = match &config.store.path {
        Some(path) => {
            info!(path = %path, "opening redb store");
            Arc::new(RedbStore::open(path)?)
        }
        None => {
            info!("no store.path configured, using in-memory store (no persistence across restarts)");
            Arc::new(MemStore::new())
        }
    };

    let snapshotter = Arc::new(Snapshotter::new(
        store.clone(),
        peer_id.clone(),
        config.store.snapshot_interval_ops,
        config.store.snapshot_interval_seconds as i64,
        config.scheduler.default_share,
    ));

    let mut initial_state = snapshotter.load().await?;
    info!("replayed persisted state from store");
    for (tenant, share) in &config.scheduler.tenant_shares {
        initial_state.set_tenant_share(tenant, *share, clock.now());
    }
    let state = Arc::new(RwLock::new(initial_state));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Observability surface: /metrics and /healthz.
    {
        let addr = config.observability.metrics_addr.clone();
        tokio::spawn(async move {
            http::run_http_server(&addr).await;
        });
    }

    // Peer sync engine: dial every configured peer, accept inbound
    // connections, and flush pending outbound queues on a tick (spec §4.6).
    let sync_manager = SyncManager::new(&config.peer, &config.sync, state.clone(), clock.clone());

    for endpoint in config.peer.peers.clone() {
        let mgr = sync_manager.clone();
        let rx = shutdown_rx.clone();
        let local_host = sync_manager.host_id.clone();
        tokio::spawn(async move {
            mgr.run_outbound(PeerId::new(endpoint.peer_id), local_host, endpoint.url, rx).await;
        });
    }

    {
        let mgr = sync_manager.clone();
        let listen_addr = config.peer.sync_listen_addr.clone();
        let mut rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let listener = match tokio::net::TcpListener::bind(&listen_addr).await {
                Ok(l) => l,
                Err(e) => {
                    error!(addr = %listen_addr, error = %e, "failed to bind peer sync listener");
                    return;
                }
            };
            info!(addr = %listen_addr, "peer sync listener bound");
            loop {
                tokio::select! {
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            return;
                        }
                    }
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, remote_addr)) => {
                                let mgr = mgr.clone();
                                tokio::spawn(async move {
                                    if let Err(e) = mgr.accept_inbound(stream, remote_addr.to_string()).await {
                                        tracing::warn!(peer = %remote_addr, error = %e, "inbound peer connection ended");
                                    }
                                });
                            }
                            Err(e) => tracing::warn!(error = %e, "failed to accept inbound peer connection"),
                        }
                    }
                }
            }
        });
    }

    {
        let mgr = sync_manager.clone();
        let mut rx = shutdown_rx.clone();
        let flush_period = Duration::from_secs(1).max(Duration::from_secs(config.sync.sync_delta_secs) / 4);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(flush_period);
            loop {
                tokio::select! {
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            return;
                        }
                    }
                    _ = ticker.tick() => {
                        mgr.flush_due_peers().await;
                        sync::record_poll_tick(chrono::Utc::now().timestamp_millis());
                    }
                }
            }
        });
    }

    // Controller Contract: one runner per configured adapter. No concrete
    // provider is configured in spec.md's scope, so the default deployment
    // runs the no-op adapter (mirrors the teacher falling back to
    // `NoOpProvider` when no history backend is configured).
    {
        let adapter = Arc::new(NoopAdapter::new("manual", Duration::from_secs(60)));
        let runner = Arc::new(ControllerRunner::new(adapter, config.peer.peer_id.clone(), &config.controller, state.clone(), clock.clone()));
        let pull_interval = runner.pull_interval();
        let mut rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(pull_interval);
            loop {
                tokio::select! {
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            return;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = runner.run_pull().await {
                            tracing::warn!(error = %e, "controller inventory pull failed");
                        }
                        runner.run_placement_hooks().await;
                    }
                }
            }
        });
    }

    // Fair-share scheduler: admission, placement, and expiry on a fixed
    // cadence (spec §4.5). Runs on the same state lock as the sync engine;
    // spec §5 "Shared state" — at most one writer at a time.
    {
        let scheduler = Scheduler::new(Duration::from_millis(config.scheduler.admission_deadline_ms));
        let state = state.clone();
        let clock = clock.clone();
        let mut rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            return;
                        }
                    }
                    _ = ticker.tick() => {
                        let now_ms = clock.now().wall_ms;
                        let mut model = state.write();
                        scheduler.reconcile_admission_conflicts(&mut model, &clock);
                        for outcome in scheduler.run_admission_pass(&mut model, &clock, now_ms) {
                            match outcome.result {
                                Ok(()) => {
                                    if let Err(e) = scheduler.place_claim(&mut model, &outcome.claim_id, &clock, now_ms) {
                                        tracing::warn!(claim_id = %outcome.claim_id, error = %e, "placement failed after admission");
                                        metrics::CLAIMS_REJECTED.inc();
                                    } else {
                                        metrics::CLAIMS_ADMITTED.inc();
                                        metrics::CLAIMS_PLACED.inc();
                                    }
                                }
                                Err(_) => metrics::CLAIMS_REJECTED.inc(),
                            }
                        }
                        let expired = scheduler.expire_claims(&mut model, &clock, now_ms);
                        metrics::CLAIMS_EXPIRED.inc_by(expired.len() as u64);
                        metrics::CLAIMS_PENDING.set(model.claims().filter(|c| c.status.value() == crate::model::ClaimStatus::Pending).count() as i64);
                    }
                }
            }
        });
    }

    // Snapshot writer: periodically persists the merged state so restart
    // replays only the tail since the last snapshot (spec §4.4).
    {
        let snapshotter = snapshotter.clone();
        let state = state.clone();
        let mut rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(5));
            loop {
                tokio::select! {
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            return;
                        }
                    }
                    _ = ticker.tick() => {
                        let now_ms = chrono::Utc::now().timestamp_millis();
                        if snapshotter.is_due(now_ms) {
                            let snapshot_state = state.read().clone();
                            if let Err(e) = snapshotter.snapshot(&snapshot_state, now_ms).await {
                                tracing::warn!(error = %e, "snapshot write failed");
                            } else {
                                metrics::SNAPSHOT_WRITES.inc();
                            }
                        }
                    }
                }
            }
        });
    }

    // Graceful shutdown on SIGINT/SIGTERM.
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = sigint.recv() => info!("received SIGINT, shutting down"),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        }
        let _ = shutdown_tx.send(true);
    }

    // Give spawned tasks a moment to observe the shutdown signal and drain.
    tokio::time::sleep(Duration::from_millis(200)).await;
    info!("latticed shut down");
    Ok(())
}
