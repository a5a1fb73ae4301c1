mod ledger;
mod task;

pub use ledger::DedupLedger;
pub use task::{DirectionalRelayTask, RetryPolicy};

use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::sleep;
use crate::{
    chain_adapter::ChainClients,
    config::{Config, RelayerConfig},
    events::{self, EventSource, Subscription},
    types::RelayReport,
    Error,
};

const EVENT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Stopped,
    Running,
}

/// Supervises the two relay directions between a chain pair.
pub struct RelayEngine {
    directions: Vec<Arc<DirectionalRelayTask>>,
    event_sources: Vec<Arc<dyn EventSource>>,
    config: RelayerConfig,
    running: watch::Sender<bool>,
    // Bumped by every `stop`, so a `start` still awaiting can see it was cancelled.
    stop_requests: AtomicU64,
    wake: Arc<Notify>,
    poll_loop: Mutex<Option<JoinHandle<()>>>,
}

impl RelayEngine {
    pub fn new(directions: Vec<DirectionalRelayTask>, config: RelayerConfig) -> Self {
        let (running, _) = watch::channel(false);
        Self {
            directions: directions.into_iter().map(Arc::new).collect(),
            event_sources: Vec::new(),
            config,
            running,
            stop_requests: AtomicU64::new(0),
            wake: Arc::new(Notify::new()),
            poll_loop: Mutex::new(None),
        }
    }

    /// Registry event streams that wake the loop before the poll interval ends.
    pub fn with_event_sources(mut self, sources: Vec<Arc<dyn EventSource>>) -> Self {
        self.event_sources = sources;
        self
    }

    /// Connects both chains and wires A->B and B->A over a shared ledger.
    pub async fn from_config(config: &Config) -> Result<Self, Error> {
        let chain_a = ChainClients::connect(&config.chain_a).await?;
        let chain_b = ChainClients::connect(&config.chain_b).await?;
        info!(
            "Connected to chain {} ({}) and chain {} ({})",
            chain_a.name,
            chain_a.endpoint.chain_id(),
            chain_b.name,
            chain_b.endpoint.chain_id()
        );

        let ledger = Arc::new(match &config.relayer.ledger_path {
            Some(path) => DedupLedger::open(path).await?,
            None => DedupLedger::in_memory(),
        });
        let policy = RetryPolicy::from(&config.relayer);

        let a_to_b = DirectionalRelayTask::new(chain_a.registry.clone(), chain_b.bridge.clone(), ledger.clone(), policy);
        let b_to_a = DirectionalRelayTask::new(chain_b.registry.clone(), chain_a.bridge.clone(), ledger, policy);

        let engine = Self::new(vec![a_to_b, b_to_a], config.relayer.clone());
        if config.relayer.event_wakeup {
            return Ok(engine.with_event_sources(vec![
                chain_a.registry.clone() as Arc<dyn EventSource>,
                chain_b.registry.clone(),
            ]));
        }
        Ok(engine)
    }

    pub fn state(&self) -> EngineState {
        if *self.running.borrow() {
            EngineState::Running
        } else {
            EngineState::Stopped
        }
    }

    pub fn directions(&self) -> impl Iterator<Item = &DirectionalRelayTask> {
        self.directions.iter().map(|task| task.as_ref())
    }

    /// Verifies the adapters and spawns the poll loop. No-op while running.
    ///
    /// A `stop` issued before this returns wins: the engine stays stopped.
    pub async fn start(&self) -> Result<(), Error> {
        let mut poll_loop = self.poll_loop.lock().await;
        if self.state() == EngineState::Running {
            info!("Relay engine already running");
            return Ok(());
        }
        let stops_seen = self.stop_requests.load(Ordering::SeqCst);

        // A previous loop may still be finishing its last cycle.
        if let Some(previous) = poll_loop.take() {
            let _ = previous.await;
        }

        self.verify_chain_ids().await?;

        // Checked under the watch lock that `stop` also takes.
        let armed = self.running.send_if_modified(|running| {
            if self.stop_requests.load(Ordering::SeqCst) != stops_seen {
                return false;
            }
            *running = true;
            true
        });
        if !armed {
            info!("Relay engine stopped while starting; poll loop not spawned");
            return Ok(());
        }

        let forwarders = self
            .event_sources
            .iter()
            .map(|source| {
                let subscription = events::subscribe(source.clone(), EVENT_POLL_INTERVAL);
                tokio::spawn(forward_wakeups(subscription, self.wake.clone(), self.running.subscribe()))
            })
            .collect();

        *poll_loop = Some(tokio::spawn(run_poll_loop(
            self.directions.clone(),
            self.config.clone(),
            self.running.subscribe(),
            self.wake.clone(),
            forwarders,
        )));
        info!("Relay engine started with {} direction(s)", self.directions.len());
        Ok(())
    }

    /// Lets the current cycle finish, then ends the loop.
    pub fn stop(&self) {
        self.stop_requests.fetch_add(1, Ordering::SeqCst);
        if self.running.send_replace(false) {
            info!("Stopping relay engine");
        }
    }

    /// `stop` and wait for the loop to exit.
    pub async fn shutdown(&self) {
        self.stop();
        let handle = self.poll_loop.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Relay loop ended abnormally: {}", e);
            }
        }
        info!("Relay engine stopped");
    }

    async fn verify_chain_ids(&self) -> Result<(), Error> {
        for task in &self.directions {
            let expected_local = task.destination().chain_id();
            let expected_remote = task.source().chain_id();
            let reported = task.destination().chain_ids().await?;

            if reported.local != expected_local || reported.remote != expected_remote {
                warn!(
                    "[{}] adapter reports (local={}, remote={}), expected (local={}, remote={})",
                    task.label(),
                    reported.local,
                    reported.remote,
                    expected_local,
                    expected_remote
                );
            } else {
                debug!("[{}] adapter chain ids verified", task.label());
            }
        }
        Ok(())
    }
}

async fn run_poll_loop(
    directions: Vec<Arc<DirectionalRelayTask>>,
    config: RelayerConfig,
    mut running: watch::Receiver<bool>,
    wake: Arc<Notify>,
    forwarders: Vec<JoinHandle<()>>,
) {
    info!("Relay loop started");
    while *running.borrow() {
        let failed = run_cycle(&directions, config.concurrent_directions).await;
        if !*running.borrow() {
            break;
        }

        let pause = if failed { config.retry_delay() } else { config.poll_interval() };
        tokio::select! {
            _ = sleep(pause) => {}
            _ = wake.notified() => debug!("Relay loop woken by registry event"),
            changed = running.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    for forwarder in forwarders {
        let _ = forwarder.await;
    }
    info!("Relay loop exited");
}

/// Runs every direction once; true if any of them errored or panicked.
async fn run_cycle(directions: &[Arc<DirectionalRelayTask>], concurrent: bool) -> bool {
    let mut failed = false;
    if concurrent {
        let handles: Vec<_> = directions
            .iter()
            .map(|task| (task.label().to_string(), spawn_direction(task.clone())))
            .collect();
        for (label, handle) in handles {
            failed |= settle(&label, handle.await).is_err();
        }
    } else {
        for task in directions {
            let joined = spawn_direction(task.clone()).await;
            failed |= settle(task.label(), joined).is_err();
        }
    }
    failed
}

fn spawn_direction(task: Arc<DirectionalRelayTask>) -> JoinHandle<Result<RelayReport, Error>> {
    tokio::spawn(async move { task.run_cycle().await })
}

fn settle(label: &str, joined: Result<Result<RelayReport, Error>, JoinError>) -> Result<RelayReport, Error> {
    let result = joined
        .map_err(|e| Error::TaskPanicked(format!("{}: {}", label, e)))
        .and_then(|report| report);
    if let Err(e) = &result {
        error!("[{}] relay cycle failed: {}", label, e);
    }
    result
}

async fn forward_wakeups(mut subscription: Subscription, wake: Arc<Notify>, mut running: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            event = subscription.recv() => match event {
                Some(event) if event.signals_pending() => {
                    debug!("Registry event for {}, waking relay loop", event.message_id());
                    wake.notify_one();
                }
                Some(_) => {}
                None => break,
            },
            changed = running.changed() => {
                if changed.is_err() || !*running.borrow() {
                    break;
                }
            }
        }
    }
    subscription.unsubscribe().await;
}
