pub mod cache;
pub mod config;
mod error;
pub mod helpers;
pub mod names;
pub mod presence;
pub mod reaper;
pub mod requests;
pub mod validation;

use std::sync::{Arc, Mutex, PoisonError};

use azure_db::{BackingStore, PlayerId};
use tracing::info;

pub use cache::{EntryState, PlayerDataCache, SaveReport, SweepReport};
pub use config::Config;
pub use error::{CacheError, RequestError};
pub use names::NameIndex;
pub use presence::{PlayerJoin, PlayerLeave};
pub use reaper::{ReaperHandle, ReaperScheduler};
pub use requests::{ExpiringRequestStore, Request, RequestPolicy};

/// The player-state layer: cached records, the name index and pending
/// requests, in front of one backing store.
pub struct Azure {
    store: Arc<dyn BackingStore>,
    names: Arc<NameIndex>,
    players: PlayerDataCache,
    requests: Arc<ExpiringRequestStore>,
    config: Config,
    reaper: Mutex<Option<ReaperHandle>>,
}

impl Azure {
    pub fn new(store: Arc<dyn BackingStore>, config: Config) -> Self {
        let names = Arc::new(NameIndex::new());
        let players = PlayerDataCache::new(
            Arc::clone(&store),
            Arc::clone(&names),
            config.cache_grace_period,
        );
        let requests = Arc::new(ExpiringRequestStore::new(config.request_lifespan));

        Self {
            store,
            names,
            players,
            requests,
            config,
            reaper: Mutex::new(None),
        }
    }

    pub fn names(&self) -> &Arc<NameIndex> {
        &self.names
    }

    pub fn players(&self) -> &PlayerDataCache {
        &self.players
    }

    pub fn requests(&self) -> &Arc<ExpiringRequestStore> {
        &self.requests
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Load every stored name so offline players can be found by name.
    pub async fn warm_names(&self) -> Result<usize, CacheError> {
        let names = self.store.load_names().await?;
        let loaded = self.names.warm(names);
        info!(loaded, "warmed name index");
        Ok(loaded)
    }

    /// Start the background sweeps. Returns false if they are already running.
    pub fn start_reaper(&self) -> bool {
        let mut reaper = self.reaper.lock().unwrap_or_else(PoisonError::into_inner);
        if reaper.is_some() {
            return false;
        }
        *reaper = Some(ReaperScheduler::spawn(
            &self.config,
            self.players.clone(),
            Arc::clone(&self.requests),
        ));
        true
    }

    /// Stop the background sweeps and flush every unsaved record.
    pub async fn shutdown(&self) -> SaveReport {
        let reaper = self
            .reaper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reaper) = reaper {
            reaper.shutdown().await;
        }

        let report = self.players.save_all().await;
        info!(saved = report.saved, failed = report.failed, "flushed player records");
        report
    }

    /// Ask `target` for something on behalf of `initiator`, using the configured policy.
    pub async fn send_request(
        &self,
        initiator: PlayerId,
        target: PlayerId,
    ) -> Result<Request, RequestError> {
        self.requests
            .create(initiator, target, helpers::now(), self.config.request_policy)
            .await
    }

    /// `target` answers the request `initiator` sent them. `None` if there is
    /// no such request or it has expired.
    pub async fn answer_request(&self, initiator: PlayerId, target: PlayerId) -> Option<Request> {
        self.requests
            .consume_for(initiator, target, helpers::now())
            .await
    }

    /// Everyone currently waiting on an answer from `target`, oldest first.
    pub async fn pending_requests(&self, target: PlayerId) -> Vec<(PlayerId, Request)> {
        self.requests.find_by_target(target, helpers::now()).await
    }
}
