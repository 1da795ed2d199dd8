pub mod models;
pub mod queries;

use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

use models::ReportResult;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration failed: {0}")]
    Migration(String),
    #[error("Connection unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// A report that stopped partway through.
///
/// `rows` holds every genre block that was fully collected before the failure.
#[derive(Error, Debug)]
#[error("report incomplete after {} rows: {source}", .rows.len())]
pub struct PartialReport {
    pub rows: Vec<ReportResult>,
    #[source]
    pub source: DbError,
}

impl PartialReport {
    /// Best-effort output: whatever was collected before the failure.
    pub fn into_rows(self) -> Vec<ReportResult> {
        self.rows
    }
}

/// Hands out a live connection for a single operation.
///
/// Pooling and connection lifetime belong to the implementor.
pub trait ConnectionProvider {
    fn connection(&self) -> Result<&Connection>;
}

/// Lists every known genre. The returned order is the report's block order.
pub trait GenreLister {
    fn genres(&self) -> Result<Vec<String>>;
}

impl<T: ConnectionProvider + ?Sized> ConnectionProvider for &T {
    fn connection(&self) -> Result<&Connection> {
        (**self).connection()
    }
}

impl<T: GenreLister + ?Sized> GenreLister for &T {
    fn genres(&self) -> Result<Vec<String>> {
        (**self).genres()
    }
}

pub struct Database {
    pub conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        // WAL mode for better concurrent read performance
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        self.migrate()?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let version: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if version > SCHEMA_VERSION {
            return Err(DbError::Migration(format!(
                "database schema v{version} is newer than supported v{SCHEMA_VERSION}"
            )));
        }
        if version < 1 {
            self.migrate_v1()?;
        }

        self.conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
    }

    /// V1: artists, albums, and one row per play event
    fn migrate_v1(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS artists (
                artist_id       INTEGER PRIMARY KEY AUTOINCREMENT,
                name            TEXT NOT NULL,
                primary_genre   TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_artists_genre ON artists(primary_genre);

            CREATE TABLE IF NOT EXISTS albums (
                album_id        INTEGER PRIMARY KEY AUTOINCREMENT,
                artist_id       INTEGER NOT NULL REFERENCES artists(artist_id) ON DELETE CASCADE,
                title           TEXT NOT NULL,
                release_year    INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_albums_artist ON albums(artist_id);
            CREATE INDEX IF NOT EXISTS idx_albums_title ON albums(title);

            CREATE TABLE IF NOT EXISTS album_plays (
                play_id         INTEGER PRIMARY KEY AUTOINCREMENT,
                album_id        INTEGER NOT NULL REFERENCES albums(album_id) ON DELETE CASCADE,
                played_at       TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_plays_album ON album_plays(album_id);
            ",
        )?;
        Ok(())
    }
}

const SCHEMA_VERSION: i32 = 1;

impl ConnectionProvider for Database {
    fn connection(&self) -> Result<&Connection> {
        Ok(&self.conn)
    }
}

impl GenreLister for Database {
    fn genres(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT primary_genre FROM artists
             WHERE primary_genre IS NOT NULL
             ORDER BY primary_genre",
        )?;
        let genres = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(genres)
    }
}
