//! SQLite persistence layer (via sqlx) for accepted sensor readings.

use crate::reading::Reading;
use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;
use tracing::debug;

/// Handle to the readings database.
///
/// Cloning is shallow; the pool is shared. The storage worker is the only
/// writer, so the pool is kept at a single connection.
#[derive(Debug, Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
    table: String,
}

impl Db {
    /// Open (creating if missing) the database and ensure the readings
    /// table exists.
    ///
    /// db_url examples:
    /// - "sqlite:sensordata.db?mode=rwc"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str, table: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let db = Self {
            pool,
            table: table.to_string(),
        };
        db.ensure_table().await?;
        Ok(db)
    }

    /// `CREATE TABLE IF NOT EXISTS`, matching the published schema:
    /// auto-incrementing record id, sensor id, epoch-seconds timestamp,
    /// temperature value.
    async fn ensure_table(&self) -> Result<()> {
        // The table name is a configuration constant, not user input.
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             RecordID INTEGER PRIMARY KEY AUTOINCREMENT, \
             SensorID INTEGER NOT NULL, \
             Timestamp INTEGER NOT NULL, \
             Value REAL NOT NULL)",
            self.table
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        debug!(table = %self.table, "readings table checked/created");
        Ok(())
    }

    /// Persist one reading as one row.
    pub async fn insert_reading(&self, reading: &Reading) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (SensorID, Timestamp, Value) VALUES (?1, ?2, ?3)",
            self.table
        );
        sqlx::query(&sql)
            .bind(i64::from(reading.sensor_id))
            .bind(reading.ts)
            .bind(reading.value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Total number of persisted readings.
    pub async fn reading_count(&self) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) AS n FROM {}", self.table);
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        Ok(row.get::<i64, _>("n"))
    }

    /// Sensor ids in insertion order, oldest first. Used to verify the
    /// storage path's ordering guarantee.
    pub async fn sensor_ids_in_order(&self) -> Result<Vec<u16>> {
        let sql = format!("SELECT SensorID FROM {} ORDER BY RecordID", self.table);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|r| r.get::<i64, _>("SensorID") as u16)
            .collect())
    }

    /// Close the pool, releasing the underlying file handles.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
