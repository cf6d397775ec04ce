//! Persistence store backed by SQLite
//!
//! All durable state lives in two tables: `players` (credentials, balances,
//! last settlement timestamp) and `buildings` (one row per occupied slot).
//! Row ids are allocated by the database, never by in-process counters, so a
//! restart cannot reissue an id. Multi-statement read-modify-write sequences
//! run in a transaction; callers that span several store calls additionally
//! hold the per-player lock (see `locks`).

use log::info;
use shared::catalog::BuildingKind;
use shared::protocol::BuildingEntry;
use shared::Resources;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("player {0} not found")]
    PlayerNotFound(i64),
    #[error("username already taken")]
    UsernameTaken,
    #[error("balance would go negative")]
    NegativeBalance,
    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

/// One row of the `players` table.
#[derive(Debug, Clone)]
pub struct PlayerRecord {
    pub id: i64,
    pub username: String,
    pub password: String,
    pub resources: Resources,
    /// Unix seconds of the last settlement.
    pub last_update: i64,
}

/// One row of the `buildings` table.
#[derive(Debug, Clone)]
pub struct BuildingRecord {
    pub id: i64,
    pub player_id: i64,
    pub slot_id: i64,
    pub kind: BuildingKind,
    pub stage: u32,
    /// Set while an upgrade (or initial construction) is in progress.
    pub upgrade_end_time: Option<i64>,
}

impl BuildingRecord {
    /// Wire-facing view of this row.
    pub fn entry(&self) -> BuildingEntry {
        BuildingEntry {
            id: self.id,
            slot_id: self.slot_id,
            kind: self.kind,
            stage: self.stage,
        }
    }
}

/// Handle to the database pool. Cheap to clone; all sessions share one store.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Opens (and if necessary creates) the database at `url`.
    ///
    /// In-memory databases exist per connection, so those pools are capped at
    /// a single connection to keep every session on the same database.
    pub async fn connect(url: &str) -> Result<Store, StoreError> {
        let in_memory = url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // The single in-memory connection must also never be reaped, or the
        // database vanishes with it.
        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        info!("Connected to database at {}", url);
        Ok(Store { pool })
    }

    /// Creates the schema if it does not exist yet.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS players (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                password TEXT NOT NULL,
                food INTEGER NOT NULL DEFAULT 0,
                steel INTEGER NOT NULL DEFAULT 0,
                energy INTEGER NOT NULL DEFAULT 0,
                last_update INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS buildings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                player_id INTEGER NOT NULL REFERENCES players(id),
                slot_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                stage INTEGER NOT NULL DEFAULT 0,
                upgrade_end_time INTEGER,
                UNIQUE(player_id, slot_id)
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Inserts a new player account. Fails with [`StoreError::UsernameTaken`]
    /// if the username exists.
    pub async fn create_player(
        &self,
        username: &str,
        password: &str,
        resources: Resources,
        now: i64,
    ) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO players (username, password, food, steel, energy, last_update)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(username)
        .bind(password)
        .bind(resources.food)
        .bind(resources.steel)
        .bind(resources.energy)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.message().contains("UNIQUE") => {
                StoreError::UsernameTaken
            }
            _ => StoreError::Database(e),
        })?;

        let id = result.last_insert_rowid();
        info!("Created player {} (id {})", username, id);
        Ok(id)
    }

    /// Looks up the account and checks the credential. `None` on unknown
    /// username or wrong password; the caller cannot tell which.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<PlayerRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM players WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let player = player_from_row(&row)?;
                if player.password == password {
                    Ok(Some(player))
                } else {
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    pub async fn player(&self, player_id: i64) -> Result<PlayerRecord, StoreError> {
        let row = sqlx::query("SELECT * FROM players WHERE id = ?")
            .bind(player_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::PlayerNotFound(player_id))?;
        player_from_row(&row)
    }

    /// All building rows for a player, ordered by slot.
    pub async fn buildings(&self, player_id: i64) -> Result<Vec<BuildingRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM buildings WHERE player_id = ? ORDER BY slot_id")
            .bind(player_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(building_from_row).collect()
    }

    pub async fn building_at(
        &self,
        player_id: i64,
        slot_id: i64,
    ) -> Result<Option<BuildingRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM buildings WHERE player_id = ? AND slot_id = ?")
            .bind(player_id)
            .bind(slot_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(building_from_row).transpose()
    }

    /// Inserts or replaces the building in a slot.
    pub async fn upsert_building(
        &self,
        player_id: i64,
        slot_id: i64,
        kind: BuildingKind,
        stage: u32,
        upgrade_end_time: Option<i64>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO buildings (player_id, slot_id, kind, stage, upgrade_end_time)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(player_id, slot_id) DO UPDATE SET
                 kind = excluded.kind,
                 stage = excluded.stage,
                 upgrade_end_time = excluded.upgrade_end_time",
        )
        .bind(player_id)
        .bind(slot_id)
        .bind(kind.tag())
        .bind(stage as i64)
        .bind(upgrade_end_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Empties a slot. Returns whether a building was actually there.
    pub async fn remove_building(&self, player_id: i64, slot_id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM buildings WHERE player_id = ? AND slot_id = ?")
            .bind(player_id)
            .bind(slot_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Marks a building as upgrading until `end_time`.
    pub async fn schedule_upgrade(
        &self,
        building_id: i64,
        end_time: i64,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE buildings SET upgrade_end_time = ? WHERE id = ?")
            .bind(end_time)
            .bind(building_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Applies a resource delta and advances the settlement timestamp, all in
    /// one transaction. `completions` are upgrade completions ((building id,
    /// new stage) pairs) committed atomically with the balances. The whole
    /// transaction is rejected if any balance would go negative.
    pub async fn settle(
        &self,
        player_id: i64,
        delta: Resources,
        completions: &[(i64, u32)],
        now: i64,
    ) -> Result<Resources, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT food, steel, energy FROM players WHERE id = ?")
            .bind(player_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::PlayerNotFound(player_id))?;

        let balances = Resources::new(
            row.try_get("food")?,
            row.try_get("steel")?,
            row.try_get("energy")?,
        );
        // All-or-nothing: dropping the transaction rolls everything back.
        let next = balances.apply(delta).ok_or(StoreError::NegativeBalance)?;

        sqlx::query(
            "UPDATE players SET food = ?, steel = ?, energy = ?, last_update = ? WHERE id = ?",
        )
        .bind(next.food)
        .bind(next.steel)
        .bind(next.energy)
        .bind(now)
        .bind(player_id)
        .execute(&mut *tx)
        .await?;

        for (building_id, new_stage) in completions {
            sqlx::query("UPDATE buildings SET stage = ?, upgrade_end_time = NULL WHERE id = ?")
                .bind(*new_stage as i64)
                .bind(*building_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(next)
    }

    /// Rewrites the settlement timestamp without touching balances. Used by
    /// seeding and test fixtures.
    pub async fn set_last_update(&self, player_id: i64, timestamp: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE players SET last_update = ? WHERE id = ?")
            .bind(timestamp)
            .bind(player_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn player_from_row(row: &SqliteRow) -> Result<PlayerRecord, StoreError> {
    Ok(PlayerRecord {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        password: row.try_get("password")?,
        resources: Resources::new(
            row.try_get("food")?,
            row.try_get("steel")?,
            row.try_get("energy")?,
        ),
        last_update: row.try_get("last_update")?,
    })
}

fn building_from_row(row: &SqliteRow) -> Result<BuildingRecord, StoreError> {
    let tag: String = row.try_get("kind")?;
    let kind = BuildingKind::from_str(&tag)
        .map_err(|_| StoreError::CorruptRow(format!("building kind `{}`", tag)))?;
    let stage: i64 = row.try_get("stage")?;

    Ok(BuildingRecord {
        id: row.try_get("id")?,
        player_id: row.try_get("player_id")?,
        slot_id: row.try_get("slot_id")?,
        kind,
        stage: stage as u32,
        upgrade_end_time: row.try_get("upgrade_end_time")?,
    })
}
