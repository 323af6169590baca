//! Background sweeps: player cache eviction, request expiry and autosave.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cache::PlayerDataCache;
use crate::config::Config;
use crate::helpers::now;
use crate::requests::ExpiringRequestStore;

pub struct ReaperScheduler;

/// Running sweep tasks. Dropping the handle leaves them running until the runtime stops.
pub struct ReaperHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl ReaperScheduler {
    /// Start the periodic sweeps on the current runtime.
    ///
    /// Each sweep runs on its own task so a slow autosave never delays
    /// request expiry. Ticks missed while a sweep was running are not
    /// replayed.
    pub fn spawn(
        config: &Config,
        players: PlayerDataCache,
        requests: Arc<ExpiringRequestStore>,
    ) -> ReaperHandle {
        let (shutdown, signal) = watch::channel(false);
        let mut tasks = Vec::with_capacity(3);

        let cache = players.clone();
        tasks.push((
            "player sweep",
            spawn_loop(config.player_sweep_interval, signal.clone(), move || {
                let cache = cache.clone();
                async move {
                    cache.evict_expired(now()).await;
                }
            }),
        ));

        tasks.push((
            "request sweep",
            spawn_loop(config.request_sweep_interval, signal.clone(), move || {
                let requests = Arc::clone(&requests);
                async move {
                    requests.evict_expired(now()).await;
                }
            }),
        ));

        tasks.push((
            "autosave",
            spawn_loop(config.autosave_interval, signal, move || {
                let players = players.clone();
                async move {
                    players.save_all().await;
                }
            }),
        ));

        info!(
            player_sweep_secs = config.player_sweep_interval.as_secs(),
            request_sweep_secs = config.request_sweep_interval.as_secs(),
            autosave_secs = config.autosave_interval.as_secs(),
            "started reaper"
        );
        ReaperHandle { shutdown, tasks }
    }
}

impl ReaperHandle {
    /// Stop every sweep and wait for any sweep in progress to finish.
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        for (name, task) in self.tasks {
            if let Err(err) = task.await {
                warn!(task = name, %err, "reaper task ended abnormally");
            }
        }
        debug!("reaper stopped");
    }
}

/// Run `sweep` every `period` until `shutdown` flips or its sender goes away.
///
/// A sweep that has started is never interrupted by the shutdown signal.
fn spawn_loop<F, Fut>(
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut sweep: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let ticked = tokio::select! {
                _ = interval.tick() => true,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    false
                }
            };
            if *shutdown.borrow() {
                break;
            }
            if ticked {
                sweep().await;
            }
        }
    })
}
