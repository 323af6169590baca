//! Hooks driven by the game's presence events, plus the record edits that ride on them.

use azure_db::{PlayerId, PlayerRecord, Position};
use tracing::{debug, warn};

use crate::Azure;
use crate::error::CacheError;
use crate::validation::{validate_home_name, validate_player_name};

/// A player connected.
#[derive(Debug, Clone)]
pub struct PlayerJoin {
    pub id: PlayerId,
    /// Name as reported by the game, not yet validated
    pub name: String,
    pub address: Option<String>,
    pub locale: Option<String>,
    pub now: i64,
}

/// A player disconnected.
#[derive(Debug, Clone)]
pub struct PlayerLeave {
    pub id: PlayerId,
    /// Where the player stood when they left
    pub position: Option<Position>,
    pub now: i64,
}

impl Azure {
    /// Start a session: record the reported name, make sure the player's
    /// record is cached for the whole session and refresh its connection details.
    pub async fn on_join(&self, join: PlayerJoin) -> Result<PlayerRecord, CacheError> {
        let PlayerJoin {
            id,
            name,
            address,
            locale,
            now,
        } = join;
        let name = validate_player_name(&name)?;

        let session = self.players().open_session(id);
        self.names().update(id, name);
        let record = self.players().get(id).await?;
        if !self.players().attach_session(id, session, record) {
            debug!(%id, "player left before their record was loaded");
        }

        let refreshed = self
            .players()
            .modify(id, |record| {
                record.name = name;
                if address.is_some() {
                    record.last_address = address;
                }
                if locale.is_some() {
                    record.locale = locale;
                }
                record.last_seen = now;
                record.clone()
            })
            .ok_or(CacheError::LoadAborted(id))?;

        debug!(%id, %name, "player joined");
        Ok(refreshed)
    }

    /// End a session. The record stays cached for the grace period and is
    /// saved in the background. Returns false if the player had neither a
    /// session nor a cached record.
    pub fn on_leave(&self, leave: PlayerLeave) -> bool {
        let PlayerLeave { id, position, now } = leave;

        let updated = self
            .players()
            .modify(id, |record| {
                if position.is_some() {
                    record.last_position = position;
                }
                record.last_seen = now;
            })
            .is_some();
        let closed = self.players().close_session(id, now);
        if !updated {
            if !closed {
                warn!(%id, "leave for a player with no session");
            }
            return closed;
        }

        let players = self.players().clone();
        tokio::spawn(async move {
            if let Err(err) = players.persist(id).await {
                warn!(%id, %err, "failed to save player record on leave");
            }
        });

        debug!(%id, "player left");
        true
    }

    /// Set or move a named home. Returns the position it replaced.
    pub async fn set_home(
        &self,
        id: PlayerId,
        home: &str,
        position: Position,
    ) -> Result<Option<Position>, CacheError> {
        validate_home_name(home)?;
        self.players().get(id).await?;
        self.players()
            .modify(id, |record| record.set_home(home, position))
            .ok_or(CacheError::LoadAborted(id))
    }

    pub async fn remove_home(&self, id: PlayerId, home: &str) -> Result<Option<Position>, CacheError> {
        validate_home_name(home)?;
        self.players().get(id).await?;
        self.players()
            .modify(id, |record| record.remove_home(home))
            .ok_or(CacheError::LoadAborted(id))
    }
}
