//! Load-through cache of player records.
//!
//! Each identity owns one slot in a concurrent map. A slot is either a
//! pending load that callers can attach to, or a ready entry carrying the
//! record together with its session and persistence metadata:
//!
//! ```text
//! absent -> pending -> present <-> scheduled-for-eviction -> absent
//!              \-> absent (load failed)
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use azure_db::{BackingStore, PlayerId, PlayerName, PlayerRecord};
use scc::HashMap;
use scc::hash_map::Entry;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::helpers::{now, secs};
use crate::names::NameIndex;

type LoadOutcome = Result<PlayerRecord, CacheError>;

/// Observable state of an identity's slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Absent,
    Pending,
    Present,
    ScheduledForEviction { at: i64 },
}

/// Result of one eviction sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries removed from the cache
    pub evicted: usize,
    /// Entries that were due but kept, because their record could not be saved yet
    pub deferred: usize,
}

/// Result of flushing modified records.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SaveReport {
    pub saved: usize,
    pub failed: usize,
}

struct CacheEntry {
    record: PlayerRecord,
    /// Owner currently has a session
    online: bool,
    evict_at: Option<i64>,
    /// Bumped on every change to `record`
    revision: u64,
    /// Highest revision known to be in the backing store
    saved_revision: u64,
    /// A save of this entry is in flight
    saving: bool,
}

impl CacheEntry {
    /// Entry for a player with an active session.
    fn online(record: PlayerRecord) -> Self {
        Self {
            record,
            online: true,
            evict_at: None,
            revision: 1,
            saved_revision: 0,
            saving: false,
        }
    }

    /// Entry hydrated by a load; evicted after `evict_at` unless a session claims it.
    fn hydrated(record: PlayerRecord, evict_at: i64, saved: bool) -> Self {
        Self {
            record,
            online: false,
            evict_at: Some(evict_at),
            revision: 1,
            saved_revision: if saved { 1 } else { 0 },
            saving: false,
        }
    }

    fn is_dirty(&self) -> bool {
        self.revision > self.saved_revision
    }

    /// Session state is read here, at sweep time, never cached from schedule time.
    fn is_evictable(&self, now: i64) -> bool {
        !self.online && self.evict_at.is_some_and(|at| now >= at)
    }

    fn state(&self) -> EntryState {
        match (self.online, self.evict_at) {
            (false, Some(at)) => EntryState::ScheduledForEviction { at },
            _ => EntryState::Present,
        }
    }
}

enum Slot {
    Pending(watch::Receiver<Option<LoadOutcome>>),
    Ready(CacheEntry),
}

struct Inner {
    entries: HashMap<PlayerId, Slot>,
    store: Arc<dyn BackingStore>,
    names: Arc<NameIndex>,
    /// Open presence session per identity, by session number
    sessions: HashMap<PlayerId, u64>,
    next_session: AtomicU64,
    grace_period: i64,
}

/// In-memory player records in front of a [`BackingStore`].
///
/// Cheap to clone; clones share the same cache.
#[derive(Clone)]
pub struct PlayerDataCache {
    inner: Arc<Inner>,
}

impl PlayerDataCache {
    pub fn new(store: Arc<dyn BackingStore>, names: Arc<NameIndex>, grace_period: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: HashMap::new(),
                store,
                names,
                sessions: HashMap::new(),
                next_session: AtomicU64::new(1),
                grace_period: secs(grace_period),
            }),
        }
    }

    pub fn names(&self) -> &Arc<NameIndex> {
        &self.inner.names
    }

    /// Cached record for `id`. Never loads.
    pub fn get_if_present(&self, id: PlayerId) -> Option<PlayerRecord> {
        self.inner
            .entries
            .read_sync(&id, |_, slot| match slot {
                Slot::Ready(entry) => Some(entry.record.clone()),
                Slot::Pending(_) => None,
            })
            .flatten()
    }

    pub fn state(&self, id: PlayerId) -> EntryState {
        self.inner
            .entries
            .read_sync(&id, |_, slot| match slot {
                Slot::Ready(entry) => entry.state(),
                Slot::Pending(_) => EntryState::Pending,
            })
            .unwrap_or(EntryState::Absent)
    }

    /// Record for `id`, loading it from the backing store on a miss.
    ///
    /// Concurrent misses for the same identity share one load. A player with
    /// no stored record gets a fresh one named after whatever the name index
    /// knows, which is cached and persisted. Failures are returned to every
    /// waiting caller and are not cached.
    pub async fn get(&self, id: PlayerId) -> Result<PlayerRecord, CacheError> {
        let mut pending = match self.inner.entries.entry_async(id).await {
            Entry::Occupied(occupied) => match occupied.get() {
                Slot::Ready(entry) => return Ok(entry.record.clone()),
                Slot::Pending(receiver) => receiver.clone(),
            },
            Entry::Vacant(vacant) => {
                let (sender, receiver) = watch::channel(None);
                vacant.insert_entry(Slot::Pending(receiver.clone()));
                self.spawn_load(id, sender);
                receiver
            }
        };

        let outcome = pending
            .wait_for(Option::is_some)
            .await
            .map_err(|_| CacheError::LoadAborted(id))?;
        match &*outcome {
            Some(outcome) => outcome.clone(),
            None => Err(CacheError::LoadAborted(id)),
        }
    }

    /// Record for the player currently called `name`.
    ///
    /// Names are resolved through the name index only; an unknown name is
    /// `Ok(None)` without touching the backing store.
    pub async fn get_by_name(&self, name: &str) -> Result<Option<PlayerRecord>, CacheError> {
        match self.inner.names.resolve_name(name) {
            Some(id) => self.get(id).await.map(Some),
            None => Ok(None),
        }
    }

    /// The load runs in its own task so it completes even if every caller goes away.
    fn spawn_load(&self, id: PlayerId, sender: watch::Sender<Option<LoadOutcome>>) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let loaded = inner.load(id).await;
            let outcome = inner.install(id, loaded).await;
            sender.send_replace(Some(outcome));
        });
    }

    /// Insert or overwrite the record for a player with an active session.
    pub fn put(&self, id: PlayerId, record: PlayerRecord) {
        debug_assert_eq!(id, record.id, "record stored under a foreign identity");
        self.inner.names.update(id, record.name);

        match self.inner.entries.entry_sync(id) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                match slot {
                    Slot::Ready(entry) => {
                        entry.record = record;
                        entry.online = true;
                        entry.evict_at = None;
                        entry.revision += 1;
                    }
                    // The in-flight load will see this entry and hand it to its waiters
                    Slot::Pending(_) => *slot = Slot::Ready(CacheEntry::online(record)),
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert_entry(Slot::Ready(CacheEntry::online(record)));
            }
        }
    }

    /// Apply `f` to the cached record. `None` if the record is not cached.
    pub fn modify<R>(&self, id: PlayerId, f: impl FnOnce(&mut PlayerRecord) -> R) -> Option<R> {
        let (result, renamed) = self
            .inner
            .entries
            .update_sync(&id, |_, slot| match slot {
                Slot::Ready(entry) => {
                    let before = entry.record.name;
                    let result = f(&mut entry.record);
                    entry.revision += 1;
                    let renamed = (entry.record.name != before).then_some(entry.record.name);
                    Some((result, renamed))
                }
                Slot::Pending(_) => None,
            })
            .flatten()?;

        // A cached name can be stale; only an actual rename reaches the index
        if let Some(name) = renamed {
            self.inner.names.update(id, name);
        }
        Some(result)
    }

    /// Start the grace period for `id`. Returns false if `id` is not cached.
    pub fn mark_session_ended(&self, id: PlayerId, now: i64) -> bool {
        let evict_at = now.saturating_add(self.inner.grace_period);
        let marked = self
            .inner
            .entries
            .update_sync(&id, |_, slot| match slot {
                Slot::Ready(entry) => {
                    entry.online = false;
                    entry.evict_at = Some(evict_at);
                    true
                }
                Slot::Pending(_) => false,
            })
            .unwrap_or(false);

        if marked {
            debug!(%id, evict_at, "scheduled player data eviction");
        }
        marked
    }

    /// Clear a scheduled eviction because the owner has a session again.
    /// Returns false if `id` is not cached.
    pub fn cancel_scheduled_eviction(&self, id: PlayerId) -> bool {
        self.inner
            .entries
            .update_sync(&id, |_, slot| match slot {
                Slot::Ready(entry) => {
                    entry.online = true;
                    entry.evict_at = None;
                    true
                }
                Slot::Pending(_) => false,
            })
            .unwrap_or(false)
    }

    /// Open a presence session for `id`, superseding any earlier one.
    /// The returned number is handed to [`attach_session`](Self::attach_session).
    pub fn open_session(&self, id: PlayerId) -> u64 {
        let session = self.inner.next_session.fetch_add(1, Ordering::Relaxed);
        match self.inner.sessions.entry_sync(id) {
            Entry::Occupied(mut occupied) => *occupied.get_mut() = session,
            Entry::Vacant(vacant) => {
                vacant.insert_entry(session);
            }
        }
        session
    }

    /// Pin the record for `id` in the cache for `session`, using `record` if
    /// the entry is gone.
    ///
    /// Returns false, and leaves any scheduled eviction alone, when the
    /// session was closed or superseded while the record was loading. The
    /// session stays locked while the entry is updated, so a concurrent
    /// [`close_session`](Self::close_session) is ordered entirely before or after.
    pub fn attach_session(&self, id: PlayerId, session: u64, record: PlayerRecord) -> bool {
        let Entry::Occupied(current) = self.inner.sessions.entry_sync(id) else {
            return false;
        };
        if *current.get() != session {
            return false;
        }

        match self.inner.entries.entry_sync(id) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                match slot {
                    Slot::Ready(entry) => {
                        entry.online = true;
                        entry.evict_at = None;
                    }
                    Slot::Pending(_) => *slot = Slot::Ready(CacheEntry::online(record)),
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert_entry(Slot::Ready(CacheEntry::online(record)));
            }
        }
        drop(current);
        true
    }

    /// Close the session for `id` and start the grace period of its record.
    /// Returns false if no session was open.
    pub fn close_session(&self, id: PlayerId, now: i64) -> bool {
        let closed = self.inner.sessions.remove_sync(&id).is_some();
        self.mark_session_ended(id, now);
        closed
    }

    /// Write the record for `id` to the backing store if it has unsaved changes.
    ///
    /// Returns `Ok(false)` when there was nothing to save or another save of
    /// the same record is already in flight. The write itself runs in its own
    /// task and finishes even if the caller stops waiting.
    pub async fn persist(&self, id: PlayerId) -> Result<bool, CacheError> {
        let snapshot = self
            .inner
            .entries
            .update_async(&id, |_, slot| match slot {
                Slot::Ready(entry) if entry.is_dirty() && !entry.saving => {
                    entry.saving = true;
                    Some((entry.record.clone(), entry.revision))
                }
                _ => None,
            })
            .await
            .flatten();
        let Some((record, revision)) = snapshot else {
            return Ok(false);
        };

        let inner = Arc::clone(&self.inner);
        let save = tokio::spawn(async move {
            let result = inner.store.save_record(&record).await;
            inner
                .entries
                .update_async(&id, |_, slot| {
                    if let Slot::Ready(entry) = slot {
                        entry.saving = false;
                        if result.is_ok() {
                            entry.saved_revision = entry.saved_revision.max(revision);
                        }
                    }
                })
                .await;
            result
        });

        match save.await {
            Ok(result) => result?,
            Err(_) => return Err(CacheError::SaveAborted(id)),
        }

        debug!(%id, revision, "persisted player record");
        Ok(true)
    }

    /// Save every record with unsaved changes. Failures are logged and counted.
    pub async fn save_all(&self) -> SaveReport {
        let mut dirty = Vec::new();
        self.inner
            .entries
            .retain_async(|id, slot| {
                if let Slot::Ready(entry) = slot {
                    if entry.is_dirty() {
                        dirty.push(*id);
                    }
                }
                true
            })
            .await;

        let mut report = SaveReport::default();
        for id in dirty {
            match self.persist(id).await {
                Ok(true) => report.saved += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(%id, %err, "failed to save player record");
                    report.failed += 1;
                }
            }
        }

        if report.saved > 0 || report.failed > 0 {
            debug!(saved = report.saved, failed = report.failed, "saved modified player records");
        }
        report
    }

    /// Remove entries whose grace period has elapsed and whose owner has no session.
    ///
    /// Clean entries are removed in place. Entries with unsaved changes are
    /// saved first and removed only if they are still due afterwards; if the
    /// save fails they stay cached until the next sweep.
    pub async fn evict_expired(&self, now: i64) -> SweepReport {
        let mut report = SweepReport::default();
        let mut unsaved = Vec::new();

        self.inner
            .entries
            .retain_async(|id, slot| match slot {
                Slot::Ready(entry) if entry.is_evictable(now) => {
                    if entry.is_dirty() {
                        unsaved.push(*id);
                        true
                    } else {
                        report.evicted += 1;
                        false
                    }
                }
                _ => true,
            })
            .await;

        for id in unsaved {
            if let Err(err) = self.persist(id).await {
                warn!(%id, %err, "failed to save player record before eviction, retrying next sweep");
                report.deferred += 1;
                continue;
            }

            let removed = self
                .inner
                .entries
                .remove_if_async(&id, |slot| {
                    matches!(slot, Slot::Ready(entry) if entry.is_evictable(now) && !entry.is_dirty())
                })
                .await;
            if removed.is_some() {
                report.evicted += 1;
            } else if self.state(id) != EntryState::Present {
                report.deferred += 1;
            }
        }

        if report.evicted > 0 || report.deferred > 0 {
            debug!(
                evicted = report.evicted,
                deferred = report.deferred,
                "swept player cache"
            );
        }
        report
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }
}

impl Inner {
    async fn load(&self, id: PlayerId) -> Result<(PlayerRecord, bool), CacheError> {
        match self.store.load_record(id).await {
            Ok(Some(record)) => {
                // The stored name may have been taken by someone else since
                self.names.insert_if_free(id, record.name);
                debug!(%id, "loaded player record");
                Ok((record, true))
            }
            Ok(None) => {
                let name = self.names.resolve_id(id).unwrap_or_else(PlayerName::new);
                let record = PlayerRecord::new(id, name, now());
                match self.store.save_record(&record).await {
                    Ok(()) => {
                        debug!(%id, %name, "created player record");
                        Ok((record, true))
                    }
                    Err(err) => {
                        // Cached as unsaved; the next sweep or autosave retries
                        warn!(%id, %err, "failed to persist new player record");
                        Ok((record, false))
                    }
                }
            }
            Err(err) => {
                warn!(%id, %err, "failed to load player record");
                Err(err.into())
            }
        }
    }

    /// Move the slot out of its pending state and produce the waiters' outcome.
    async fn install(
        &self,
        id: PlayerId,
        loaded: Result<(PlayerRecord, bool), CacheError>,
    ) -> LoadOutcome {
        let (record, saved) = match loaded {
            Ok(loaded) => loaded,
            Err(err) => {
                self.entries
                    .remove_if_async(&id, |slot| matches!(slot, Slot::Pending(_)))
                    .await;
                return Err(err);
            }
        };

        let evict_at = now().saturating_add(self.grace_period);
        let installed = self
            .entries
            .update_async(&id, |_, slot| match slot {
                // A put overtook the load; the newer record wins
                Slot::Ready(entry) => entry.record.clone(),
                Slot::Pending(_) => {
                    *slot = Slot::Ready(CacheEntry::hydrated(record.clone(), evict_at, saved));
                    record.clone()
                }
            })
            .await;

        Ok(installed.unwrap_or(record))
    }
}
