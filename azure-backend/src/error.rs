use std::sync::Arc;

use azure_db::{DbError, PlayerId};
use thiserror::Error;

use crate::validation::ValidationError;

/// Failure of a player-state operation.
///
/// Cloneable so that every caller waiting on the same load receives it.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("backing store failure: {0}")]
    Store(#[source] Arc<DbError>),

    #[error("load of player {0} was abandoned before it completed")]
    LoadAborted(PlayerId),

    #[error("save of player {0} was abandoned before it completed")]
    SaveAborted(PlayerId),

    #[error(transparent)]
    InvalidName(#[from] ValidationError),
}

impl From<DbError> for CacheError {
    fn from(err: DbError) -> Self {
        CacheError::Store(Arc::new(err))
    }
}

/// Refusal to create an interaction request.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RequestError {
    #[error("a request to {target} is already pending (expires in {expires_in}s)")]
    AlreadyPending { target: PlayerId, expires_in: i64 },
}
