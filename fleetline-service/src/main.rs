//! Fleet worker binary.
//!
//! Started without `FLEETLINE_WORKER_SLOT` and with `MAX_CPU` above 1, the process
//! becomes the primary and supervises re-executed copies of itself. Every other process
//! attaches to NATS, loads its configuration and listens for reload notifications.
//! Setting `CONTROL_SUBJECT` also serves control-plane commands on that subject.
//!
//! SIGINT and SIGTERM stop any process. A worker also stops when its primary goes
//! away, however the primary ended. Fatal startup failures exit non-zero.

mod relay;

use anyhow::Context;
use fleetline::config::ServiceConfiguration;
use fleetline::control::ControlPlane;
use fleetline::relay::RelayContext;
use fleetline::reload::{InMemoryBus, ReloadChannel, ReloadPublisher};
use fleetline::store::{ConfigStore, InMemoryConfigStore, JsonFileStore};
use fleetline::telemetry::{shared, LogSink};
use fleetline::topology::{primary_exited, ExecSpawner, Role, Supervisor};
use fleetline::worker::WorkerRuntime;
use fleetline_nats::{ControlListener, NatsReloadBus, NatsTransport};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    install_panic_hook();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(error = format!("{error:#}"), "fatal startup failure, exiting");
            ExitCode::FAILURE
        }
    }
}

fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let location = info.location().map(|l| format!("{}:{}", l.file(), l.line())).unwrap_or_default();
        let message = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".into());
        tracing::error!(%location, %message, "panic");
    }));
}

async fn run() -> anyhow::Result<()> {
    let config = ServiceConfiguration::from_env().context("invalid service configuration")?;
    match Role::from_env(config.max_cpu) {
        Role::Primary { workers } => supervise(&config, workers).await,
        Role::Worker { slot } => serve(config, Some(slot)).await,
        Role::Sole => serve(config, None).await,
    }
}

async fn supervise(config: &ServiceConfiguration, workers: usize) -> anyhow::Result<()> {
    tracing::info!(
        target: "fleetline::topology",
        service = %config.service_name,
        workers,
        pid = std::process::id(),
        "primary starting"
    );
    let spawner = ExecSpawner::current_exe().context("cannot locate current executable")?;
    Supervisor::new(workers, config.restart, Arc::new(spawner))
        .with_sink(shared(LogSink))
        .run(shutdown_signal())
        .await?;
    Ok(())
}

async fn serve(config: ServiceConfiguration, slot: Option<usize>) -> anyhow::Result<()> {
    let store: Arc<dyn ConfigStore> = match &config.store_path {
        Some(path) => Arc::new(JsonFileStore::new(path)),
        None => {
            tracing::warn!(target: "fleetline::cache", "STORE_PATH not set, using a process-local store");
            Arc::new(InMemoryConfigStore::new())
        }
    };
    let bus: Arc<dyn ReloadChannel> = if config.mode.is_offline() {
        Arc::new(InMemoryBus::new())
    } else {
        Arc::new(NatsReloadBus::new(config.reload_url.clone()))
    };

    let relay = relay::start(&config, RelayContext::new(tracing::Span::current()).with_sink(shared(LogSink)))
        .await
        .context("relay plugin failed to start")?;
    let transport = NatsTransport::new(config.transport_url.clone(), Arc::new(relay::RelayHandler::new(relay)));

    let mut runtime = WorkerRuntime::new(config.clone(), store.clone())
        .with_bus(bus.clone())
        .with_sink(shared(LogSink));
    if let Some(slot) = slot {
        runtime = runtime.with_slot(slot);
    }
    let worker = runtime.start(&transport).await?;

    let stop = worker_stop(slot.is_some());
    match std::env::var("CONTROL_SUBJECT").ok().filter(|s| !s.is_empty()) {
        Some(subject) if !config.mode.is_offline() => {
            let publisher = ReloadPublisher::new(bus, config.reload_channel.clone()).with_sink(shared(LogSink));
            let plane = Arc::new(ControlPlane::new(store, publisher));
            ControlListener::new(config.transport_url.clone(), subject, plane)
                .serve(stop)
                .await
                .context("control listener failed")?;
        }
        _ => stop.await,
    }

    worker.shutdown();
    Ok(())
}

/// A spawned worker also stops once its primary is gone.
async fn worker_stop(spawned: bool) {
    if !spawned {
        return shutdown_signal().await;
    }
    tokio::select! {
        _ = shutdown_signal() => {}
        _ = primary_exited() => {
            tracing::warn!(target: "fleetline::topology", pid = std::process::id(), "primary exited, worker stopping");
        }
    }
}

async fn shutdown_signal() {
    let interrupt = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(%error, "cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(error) => {
                tracing::warn!(%error, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown requested");
}
