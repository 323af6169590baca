use std::collections::BTreeMap;

use arrayvec::ArrayString;
use uuid::Uuid;

/// Stable player identity. Never reused, never recomputed.
pub type PlayerId = Uuid;

/// Minecraft player name - max 16 characters, stored inline (no heap allocation).
pub type PlayerName = ArrayString<16>;

/// A point in some world, including facing.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
  /// Name of the world this position belongs to
  pub world: String,
  pub x: f64,
  pub y: f64,
  pub z: f64,
  pub yaw: f32,
  pub pitch: f32,
}

impl Position {
  pub fn new(world: impl Into<String>, x: f64, y: f64, z: f64, yaw: f32, pitch: f32) -> Self {
    Self {
      world: world.into(),
      x,
      y,
      z,
      yaw,
      pitch,
    }
  }
}

/// Everything the plugin remembers about a player between sessions.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerRecord {
  /// Identity key (immutable for the lifetime of the record)
  pub id: PlayerId,
  /// Name reported by the last presence event
  pub name: PlayerName,
  /// Nickname set through commands, if any
  pub custom_name: Option<String>,
  /// Last known network origin
  pub last_address: Option<String>,
  /// Country resolved from the last address
  pub country: Option<String>,
  /// Client locale, e.g. "en_us"
  pub locale: Option<String>,
  /// Unix timestamp of the last presence event
  pub last_seen: i64,
  /// Where the player was when they last left
  pub last_position: Option<Position>,
  /// Named homes, sorted by name
  pub homes: BTreeMap<String, Position>,
}

impl PlayerRecord {
  /// Minimal record for a player seen for the first time.
  pub fn new(id: PlayerId, name: PlayerName, now: i64) -> Self {
    Self {
      id,
      name,
      custom_name: None,
      last_address: None,
      country: None,
      locale: None,
      last_seen: now,
      last_position: None,
      homes: BTreeMap::new(),
    }
  }

  pub fn home(&self, name: &str) -> Option<&Position> {
    self.homes.get(name)
  }

  /// Set or overwrite a home. Returns the previous position, if any.
  pub fn set_home(&mut self, name: impl Into<String>, position: Position) -> Option<Position> {
    self.homes.insert(name.into(), position)
  }

  pub fn remove_home(&mut self, name: &str) -> Option<Position> {
    self.homes.remove(name)
  }

  /// Custom name if one is set, otherwise the account name.
  pub fn display_name(&self) -> &str {
    self.custom_name.as_deref().unwrap_or(self.name.as_str())
  }
}
