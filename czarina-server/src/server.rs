//! Long-running mode: the controller and daemon loops side by side

use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::orchestrator::Orchestrator;
use crate::Result;

/// Runs one tick loop and one scan loop until a shutdown signal
///
/// The loops are separate tasks that share nothing but the event log behind
/// the orchestrator, so a slow verification in the daemon never delays a
/// controller tick.
pub struct Server {
    orchestrator: Arc<Orchestrator>,
}

impl Server {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
        }
    }

    pub async fn run(self) -> Result<()> {
        let tick_every = self.orchestrator.controller().settings().tick_interval();
        let scan_every = self.orchestrator.daemon().settings().scan_interval();
        info!(
            "Starting orchestration loops (tick every {}s, scan every {}s)",
            tick_every.as_secs(),
            scan_every.as_secs()
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let controller = spawn_controller(self.orchestrator.clone(), tick_every, shutdown_rx.clone());
        let daemon = spawn_daemon(self.orchestrator.clone(), scan_every, shutdown_rx);

        wait_for_shutdown().await;
        info!("Shutting down orchestration loops...");
        let _ = shutdown_tx.send(true);

        for (name, handle) in [("controller", controller), ("daemon", daemon)] {
            if let Err(e) = handle.await {
                warn!("{} loop ended abnormally: {}", name, e);
            }
        }

        info!("Orchestration stopped; the event log is left as is for the next run");
        Ok(())
    }
}

fn spawn_controller(
    orchestrator: Arc<Orchestrator>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            match orchestrator.tick().await {
                Ok(report) => {
                    debug!(
                        "Tick: {} started, {} idle",
                        report.started.len(),
                        report.idle.len()
                    );
                    if report.session_complete {
                        info!("All workers finished; controller loop idle until shutdown");
                    }
                }
                Err(e) => error!("Tick aborted, retrying next cycle: {}", e),
            }
        }
        debug!("Controller loop stopped");
    })
}

fn spawn_daemon(
    orchestrator: Arc<Orchestrator>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            match orchestrator.scan().await {
                Ok(report) => debug!(
                    "Scan: {} actions, {} alerts raised, {} cleared",
                    report.actions.len(),
                    report.raised.len(),
                    report.cleared.len()
                ),
                Err(e) => error!("Scan aborted, retrying next cycle: {}", e),
            }
        }
        debug!("Daemon loop stopped");
    })
}

/// Wait for Ctrl-C or SIGTERM
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
