//! Background loop that evicts idle sessions.

use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace};

use super::store::{SessionStore, StoreInner};

/// `tokio::time::interval` panics on a zero period
const MIN_SWEEP_PERIOD: Duration = Duration::from_millis(1);

/// A running sweep loop.
pub(crate) struct Sweeper {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl<K, H> SessionStore<K, H>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    H: Clone + PartialEq + Send + Sync + 'static,
{
    /// Start sweeping idle sessions every `sweep_period`.
    ///
    /// Returns `false` if a sweeper is already running. The loop holds only a
    /// weak reference, so it also ends once every store clone is dropped.
    pub async fn start_sweeper(&self) -> bool {
        let mut sweeper = self.inner.sweeper.lock().await;
        if sweeper.is_some() {
            return false;
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let period = self.config().sweep_period.max(MIN_SWEEP_PERIOD);
        let task = tokio::spawn(run(Arc::downgrade(&self.inner), period, stop_rx));

        *sweeper = Some(Sweeper { stop_tx, task });
        info!(?period, "Session sweeper started");
        true
    }

    /// Ask the sweeper to stop and wait for it. A sweep already underway
    /// finishes first. Returns `false` if no sweeper was running.
    pub async fn stop_sweeper(&self) -> bool {
        let Some(Sweeper { stop_tx, task }) = self.inner.sweeper.lock().await.take() else {
            return false;
        };

        // The loop may already have exited on its own
        let _ = stop_tx.send(());
        if let Err(e) = task.await {
            error!(error = %e, "Session sweeper ended abnormally");
        }
        info!("Session sweeper stopped");
        true
    }

    pub async fn is_sweeping(&self) -> bool {
        self.inner.sweeper.lock().await.is_some()
    }
}

async fn run<K, H>(
    inner: Weak<StoreInner<K, H>>,
    period: Duration,
    mut stop_rx: oneshot::Receiver<()>,
) where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    H: Clone + PartialEq + Send + Sync + 'static,
{
    // First sweep one full period after start
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            _ = ticker.tick() => {}
        }

        let Some(inner) = inner.upgrade() else {
            debug!("Session store dropped, sweeper exiting");
            break;
        };
        let store = SessionStore { inner };

        // Own task, so a panic mid-sweep costs one iteration, not the loop
        match tokio::spawn(async move { store.sweep_idle_sessions().await }).await {
            Ok(0) => trace!("Idle sweep found nothing"),
            Ok(count) => info!(count, "Removed idle sessions"),
            Err(e) => error!(error = %e, "Idle sweep failed"),
        }
    }
}
