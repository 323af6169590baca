mod error;
mod models;
mod store;

pub use error::{DbError, Result};
pub use models::{PlayerId, PlayerName, PlayerRecord, Position};
pub use store::BackingStore;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use tokio_rusqlite::Connection;
use tokio_rusqlite::rusqlite::{self, OptionalExtension, params};
use tracing::{debug, info, warn};

/// Database wrapper for all player persistence.
#[derive(Clone)]
pub struct Database {
  conn: Connection,
}

/// Position columns as stored; `world` is NULL when there is no position.
struct StoredPosition {
  world: Option<String>,
  x: f64,
  y: f64,
  z: f64,
  yaw: f64,
  pitch: f64,
}

impl StoredPosition {
  fn into_position(self) -> Option<Position> {
    let world = self.world?;
    Some(Position {
      world,
      x: self.x,
      y: self.y,
      z: self.z,
      yaw: self.yaw as f32,
      pitch: self.pitch as f32,
    })
  }
}

/// A `player_records` row plus its homes, before name validation.
struct StoredRecord {
  name: String,
  custom_name: Option<String>,
  last_address: Option<String>,
  country: Option<String>,
  locale: Option<String>,
  last_seen: i64,
  last_position: StoredPosition,
  homes: Vec<(String, StoredPosition)>,
}

impl StoredRecord {
  fn into_record(self, id: PlayerId) -> Result<PlayerRecord> {
    let name = PlayerName::try_from(self.name.as_str()).map_err(|_| DbError::InvalidRecord {
      id: id.to_string(),
      reason: format!("name {:?} exceeds 16 characters", self.name),
    })?;

    let mut homes = BTreeMap::new();
    for (home_name, position) in self.homes {
      // A home row always has a world; skip anything that doesn't
      if let Some(position) = position.into_position() {
        homes.insert(home_name, position);
      }
    }

    Ok(PlayerRecord {
      id,
      name,
      custom_name: self.custom_name,
      last_address: self.last_address,
      country: self.country,
      locale: self.locale,
      last_seen: self.last_seen,
      last_position: self.last_position.into_position(),
      homes,
    })
  }
}

impl Database {
  /// Open or create a database at the given path.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = Connection::open(path).await.map_err(DbError::Sqlite)?;
    let db = Self { conn };
    db.initialize().await?;
    Ok(db)
  }

  /// Create an in-memory database (useful for testing).
  pub async fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .await
      .map_err(DbError::Sqlite)?;
    let db = Self { conn };
    db.initialize().await?;
    Ok(db)
  }

  /// Initialize the database schema.
  async fn initialize(&self) -> Result<()> {
    self.conn
            .call(|conn: &mut rusqlite::Connection| -> rusqlite::Result<()> {
                // Enable WAL mode for better concurrent read/write performance
                conn.pragma_update(None, "journal_mode", "WAL")?;

                // Enable foreign key constraints (must be set per-connection)
                conn.pragma_update(None, "foreign_keys", "ON")?;

                conn.execute_batch(
                    r#"
                    -- One row per player identity
                    CREATE TABLE IF NOT EXISTS player_records (
                        player_id TEXT PRIMARY KEY,
                        name TEXT NOT NULL,
                        custom_name TEXT,
                        last_address TEXT,
                        country TEXT,
                        locale TEXT,
                        last_seen INTEGER NOT NULL,
                        last_world TEXT,
                        last_x REAL NOT NULL DEFAULT 0,
                        last_y REAL NOT NULL DEFAULT 0,
                        last_z REAL NOT NULL DEFAULT 0,
                        last_yaw REAL NOT NULL DEFAULT 0,
                        last_pitch REAL NOT NULL DEFAULT 0
                    );

                    -- Named homes
                    CREATE TABLE IF NOT EXISTS player_homes (
                        player_id TEXT NOT NULL REFERENCES player_records(player_id) ON DELETE CASCADE,
                        name TEXT NOT NULL,
                        world TEXT NOT NULL,
                        x REAL NOT NULL,
                        y REAL NOT NULL,
                        z REAL NOT NULL,
                        yaw REAL NOT NULL,
                        pitch REAL NOT NULL,
                        PRIMARY KEY (player_id, name)
                    );

                    -- Index for name lookups when warming the name index
                    CREATE INDEX IF NOT EXISTS idx_player_records_name ON player_records(name);
                    "#,
                )?;
                Ok(())
            })
            .await?;

    info!("database initialized");
    Ok(())
  }

  // ========================================================================
  // Player Records
  // ========================================================================

  /// Get a player record by identity.
  /// Returns None if the player was never saved.
  pub async fn get_record(&self, id: PlayerId) -> Result<Option<PlayerRecord>> {
    let key = id.to_string();

    let stored = self
      .conn
      .call(move |conn: &mut rusqlite::Connection| -> rusqlite::Result<Option<StoredRecord>> {
        let row = conn
          .prepare_cached(
            r#"
            SELECT name, custom_name, last_address, country, locale, last_seen,
                   last_world, last_x, last_y, last_z, last_yaw, last_pitch
            FROM player_records WHERE player_id = ?1
            "#,
          )?
          .query_row(params![&key], |row| {
            Ok(StoredRecord {
              name: row.get(0)?,
              custom_name: row.get(1)?,
              last_address: row.get(2)?,
              country: row.get(3)?,
              locale: row.get(4)?,
              last_seen: row.get(5)?,
              last_position: StoredPosition {
                world: row.get(6)?,
                x: row.get(7)?,
                y: row.get(8)?,
                z: row.get(9)?,
                yaw: row.get(10)?,
                pitch: row.get(11)?,
              },
              homes: Vec::new(),
            })
          })
          .optional()?;

        let Some(mut stored) = row else {
          return Ok(None);
        };

        let mut stmt = conn.prepare_cached(
          "SELECT name, world, x, y, z, yaw, pitch FROM player_homes WHERE player_id = ?1 ORDER BY name",
        )?;
        stored.homes = stmt
          .query_map(params![&key], |row| {
            Ok((
              row.get(0)?,
              StoredPosition {
                world: Some(row.get(1)?),
                x: row.get(2)?,
                y: row.get(3)?,
                z: row.get(4)?,
                yaw: row.get(5)?,
                pitch: row.get(6)?,
              },
            ))
          })?
          .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Some(stored))
      })
      .await?;

    stored.map(|stored| stored.into_record(id)).transpose()
  }

  /// Insert or replace a player record together with all of its homes.
  pub async fn put_record(&self, record: PlayerRecord) -> Result<()> {
    let id = record.id;
    let home_count = record.homes.len();

    self
      .conn
      .call(move |conn: &mut rusqlite::Connection| -> rusqlite::Result<()> {
        let key = record.id.to_string();
        let tx = conn.transaction()?;

        let position = record.last_position.as_ref();
        tx.prepare_cached(
          r#"
          INSERT INTO player_records (
              player_id, name, custom_name, last_address, country, locale, last_seen,
              last_world, last_x, last_y, last_z, last_yaw, last_pitch
          ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
          ON CONFLICT(player_id) DO UPDATE SET
              name = excluded.name,
              custom_name = excluded.custom_name,
              last_address = excluded.last_address,
              country = excluded.country,
              locale = excluded.locale,
              last_seen = excluded.last_seen,
              last_world = excluded.last_world,
              last_x = excluded.last_x,
              last_y = excluded.last_y,
              last_z = excluded.last_z,
              last_yaw = excluded.last_yaw,
              last_pitch = excluded.last_pitch
          "#,
        )?
        .execute(params![
          &key,
          record.name.as_str(),
          &record.custom_name,
          &record.last_address,
          &record.country,
          &record.locale,
          record.last_seen,
          position.map(|p| p.world.as_str()),
          position.map_or(0.0, |p| p.x),
          position.map_or(0.0, |p| p.y),
          position.map_or(0.0, |p| p.z),
          position.map_or(0.0, |p| f64::from(p.yaw)),
          position.map_or(0.0, |p| f64::from(p.pitch)),
        ])?;

        // Homes are replaced wholesale so removed homes disappear too
        tx.prepare_cached("DELETE FROM player_homes WHERE player_id = ?1")?
          .execute(params![&key])?;

        {
          let mut insert_stmt = tx.prepare_cached(
            "INSERT INTO player_homes (player_id, name, world, x, y, z, yaw, pitch) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          )?;
          for (name, home) in &record.homes {
            insert_stmt.execute(params![
              &key,
              name,
              &home.world,
              home.x,
              home.y,
              home.z,
              f64::from(home.yaw),
              f64::from(home.pitch),
            ])?;
          }
        }

        tx.commit()?;
        Ok(())
      })
      .await?;

    debug!(%id, home_count, "saved player record");
    Ok(())
  }

  /// Get every stored identity with its last known name.
  /// Rows with a malformed identity or name are skipped.
  pub async fn get_names(&self) -> Result<Vec<(PlayerId, PlayerName)>> {
    let rows = self
      .conn
      .call(|conn: &mut rusqlite::Connection| -> rusqlite::Result<Vec<(String, String)>> {
        let mut stmt = conn.prepare_cached("SELECT player_id, name FROM player_records")?;

        let rows = stmt
          .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
          .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
      })
      .await?;

    let mut names = Vec::with_capacity(rows.len());
    for (key, name) in rows {
      match (PlayerId::parse_str(&key), PlayerName::try_from(name.as_str())) {
        (Ok(id), Ok(name)) => names.push((id, name)),
        _ => warn!(player_id = %key, %name, "skipping malformed player row"),
      }
    }

    Ok(names)
  }
}

#[async_trait]
impl BackingStore for Database {
  async fn load_record(&self, id: PlayerId) -> Result<Option<PlayerRecord>> {
    self.get_record(id).await
  }

  async fn save_record(&self, record: &PlayerRecord) -> Result<()> {
    self.put_record(record.clone()).await
  }

  async fn load_names(&self) -> Result<Vec<(PlayerId, PlayerName)>> {
    self.get_names().await
  }
}
