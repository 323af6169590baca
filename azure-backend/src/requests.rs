//! Directional, time-limited requests between two players (e.g. teleport requests).

use std::str::FromStr;
use std::time::Duration;

use azure_db::PlayerId;
use scc::HashMap;
use scc::hash_map::Entry;
use tracing::debug;

use crate::error::RequestError;
use crate::helpers::secs;

/// What `create` does when the initiator already has an unexpired request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPolicy {
    /// Refuse with [`RequestError::AlreadyPending`]
    Reject,
    /// Overwrite the pending request
    Replace,
}

impl FromStr for RequestPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "replace" => Ok(Self::Replace),
            other => Err(format!("unknown request policy {other:?}")),
        }
    }
}

/// A pending request, stored under the initiating player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub target: PlayerId,
    pub issued_at: i64,
    pub expires_at: i64,
}

impl Request {
    fn new(target: PlayerId, now: i64, lifespan: i64) -> Self {
        Self {
            target,
            issued_at: now,
            expires_at: now.saturating_add(lifespan),
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    /// Seconds remaining until expiry
    pub fn expires_in(&self, now: i64) -> i64 {
        (self.expires_at - now).max(0)
    }
}

/// At most one outstanding request per initiator, each with a fixed lifespan.
pub struct ExpiringRequestStore {
    requests: HashMap<PlayerId, Request>,
    lifespan: i64,
}

impl ExpiringRequestStore {
    pub fn new(lifespan: Duration) -> Self {
        Self {
            requests: HashMap::new(),
            lifespan: secs(lifespan),
        }
    }

    /// Issue a request from `initiator` to `target`.
    ///
    /// The existing entry is checked and replaced under one entry lock, so two
    /// concurrent callers can never both believe they created the live request.
    /// Expired requests are always replaced regardless of `policy`.
    pub async fn create(
        &self,
        initiator: PlayerId,
        target: PlayerId,
        now: i64,
        policy: RequestPolicy,
    ) -> Result<Request, RequestError> {
        let request = Request::new(target, now, self.lifespan);

        match self.requests.entry_async(initiator).await {
            Entry::Occupied(mut occupied) => {
                let pending = *occupied.get();
                if !pending.is_expired(now) && policy == RequestPolicy::Reject {
                    return Err(RequestError::AlreadyPending {
                        target: pending.target,
                        expires_in: pending.expires_in(now),
                    });
                }
                *occupied.get_mut() = request;
            }
            Entry::Vacant(vacant) => {
                vacant.insert_entry(request);
            }
        }

        debug!(%initiator, %target, expires_at = request.expires_at, "created request");
        Ok(request)
    }

    /// Remove and return the initiator's request. Expired requests count as absent.
    pub async fn consume(&self, initiator: PlayerId, now: i64) -> Option<Request> {
        let (_, request) = self.requests.remove_async(&initiator).await?;
        (!request.is_expired(now)).then_some(request)
    }

    /// Like [`consume`](Self::consume), but only if the request is addressed to `target`.
    /// Used when the target accepts or denies.
    pub async fn consume_for(
        &self,
        initiator: PlayerId,
        target: PlayerId,
        now: i64,
    ) -> Option<Request> {
        let (_, request) = self
            .requests
            .remove_if_async(&initiator, |request| request.target == target)
            .await?;
        (!request.is_expired(now)).then_some(request)
    }

    /// Withdraw the initiator's request. Returns whether one existed.
    pub async fn cancel(&self, initiator: PlayerId) -> bool {
        self.requests.remove_async(&initiator).await.is_some()
    }

    /// Everyone with an unexpired request addressed to `target`, oldest first.
    /// Expired entries met along the way are removed.
    pub async fn find_by_target(&self, target: PlayerId, now: i64) -> Vec<(PlayerId, Request)> {
        let mut found = Vec::new();
        self.requests
            .retain_async(|initiator, request| {
                if request.is_expired(now) {
                    return false;
                }
                if request.target == target {
                    found.push((*initiator, *request));
                }
                true
            })
            .await;
        found.sort_by_key(|(_, request)| request.issued_at);
        found
    }

    /// Remove every expired request. Returns how many were removed.
    pub async fn evict_expired(&self, now: i64) -> usize {
        let mut evicted = 0;
        self.requests
            .retain_async(|_, request| {
                let keep = !request.is_expired(now);
                if !keep {
                    evicted += 1;
                }
                keep
            })
            .await;

        if evicted > 0 {
            debug!(evicted, "cleaned up expired requests");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
