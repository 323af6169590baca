use async_trait::async_trait;

use crate::Result;
use crate::models::{PlayerId, PlayerName, PlayerRecord};

/// Durable persistence for player records.
///
/// Both operations may be slow and may fail. Implementations own their
/// timeout policy; callers only assume per-call atomicity.
#[async_trait]
pub trait BackingStore: Send + Sync + 'static {
  /// Load the record for `id`. `Ok(None)` means the player has never been stored.
  async fn load_record(&self, id: PlayerId) -> Result<Option<PlayerRecord>>;

  /// Insert or replace the record (including its homes).
  async fn save_record(&self, record: &PlayerRecord) -> Result<()>;

  /// Every known identity with its last stored name, for warming name lookups.
  async fn load_names(&self) -> Result<Vec<(PlayerId, PlayerName)>> {
    Ok(Vec::new())
  }
}
