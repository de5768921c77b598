#[cfg(test)]
pub(crate) mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use sqlx::{migrate::MigrateDatabase, sqlite::{SqlitePool, SqlitePoolOptions}, Row, Sqlite};

use crate::error::{Error, Result};
use crate::models::Poll;

/// Operations the pipeline needs from the poll store.
///
/// The ingestor only reads options, the aggregator only increments, and the
/// query service does the administrative reads and writes.
#[async_trait]
pub trait PollStore: Send + Sync {
    /// Every option string of every poll, without duplicates.
    async fn load_options(&self) -> Result<Vec<String>>;

    /// Adds `count` to the result of `option` in every poll offering it and
    /// returns how many polls were updated.
    async fn increment_option(&self, option: &str, count: u64) -> Result<u64>;

    async fn list_polls(&self) -> Result<Vec<Poll>>;

    async fn get_poll(&self, poll_id: &str) -> Result<Option<Poll>>;

    /// Fails with [`Error::PollExists`] if the id is taken.
    async fn create_poll(&self, poll: &Poll) -> Result<()>;

    /// Returns false when no poll had that id.
    async fn delete_poll(&self, poll_id: &str) -> Result<bool>;
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str, max_connections: u32) -> Result<Self> {
        // Create database if it doesn't exist
        if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
            info!("Creating database {}", db_url);
            Sqlite::create_database(db_url).await?;
        }

        // Connect to the database
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(db_url)
            .await?;

        // Initialize schema
        Self::init_schema(&pool).await?;

        Ok(Self { pool })
    }

    /// A private database living as long as its single pooled connection.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        Self::init_schema(&pool).await?;

        Ok(Self { pool })
    }

    /// Waits for checked-out connections to be returned, then closes them.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Closed database connection");
    }

    // Initialize the database schema
    async fn init_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS polls (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS poll_options (
                poll_id TEXT NOT NULL,
                text TEXT NOT NULL,
                position INTEGER NOT NULL,
                votes INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (poll_id, text),
                FOREIGN KEY (poll_id) REFERENCES polls(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS poll_options_text ON poll_options (text);")
            .execute(pool)
            .await?;

        Ok(())
    }
}

fn parse_created_at(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Store(format!("Failed to parse created_at {:?}: {}", raw, e)))
}

#[async_trait]
impl PollStore for Database {
    async fn load_options(&self) -> Result<Vec<String>> {
        let options = sqlx::query(
            r#"
            SELECT text
            FROM poll_options
            GROUP BY text
            ORDER BY MIN(position), text
            "#,
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| row.get::<String, _>("text"))
        .collect();

        Ok(options)
    }

    async fn increment_option(&self, option: &str, count: u64) -> Result<u64> {
        let count = i64::try_from(count)
            .map_err(|_| Error::Store(format!("increment for {} out of range: {}", option, count)))?;

        // One statement, so every matching poll is bumped atomically
        let updated = sqlx::query(
            r#"
            UPDATE poll_options
            SET votes = votes + ?
            WHERE text = ?
            "#,
        )
        .bind(count)
        .bind(option)
        .execute(&self.pool)
        .await?
        .rows_affected();

        debug!("Incremented {} by {} in {} poll(s)", option, count, updated);
        Ok(updated)
    }

    async fn list_polls(&self) -> Result<Vec<Poll>> {
        let rows = sqlx::query(
            r#"
            SELECT p.id, p.title, p.created_at, o.text, o.votes
            FROM polls p
            LEFT JOIN poll_options o ON o.poll_id = p.id
            ORDER BY p.created_at, p.id, o.position
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut polls: Vec<Poll> = Vec::new();
        for row in rows {
            let id = row.get::<String, _>("id");
            let is_new = polls.last().map(|poll| poll.id != id).unwrap_or(true);
            if is_new {
                polls.push(Poll {
                    id,
                    title: row.get("title"),
                    options: Vec::new(),
                    results: Default::default(),
                    created_at: parse_created_at(&row.get::<String, _>("created_at"))?,
                });
            }

            // LEFT JOIN yields NULLs for a poll with no option rows
            if let (Some(poll), Some(text)) = (polls.last_mut(), row.get::<Option<String>, _>("text")) {
                poll.results.insert(text.clone(), row.get::<i64, _>("votes"));
                poll.options.push(text);
            }
        }

        Ok(polls)
    }

    async fn get_poll(&self, poll_id: &str) -> Result<Option<Poll>> {
        let poll_row = sqlx::query(
            r#"
            SELECT id, title, created_at
            FROM polls
            WHERE id = ?
            "#,
        )
        .bind(poll_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(poll_row) = poll_row else {
            return Ok(None);
        };

        let mut poll = Poll {
            id: poll_row.get("id"),
            title: poll_row.get("title"),
            options: Vec::new(),
            results: Default::default(),
            created_at: parse_created_at(&poll_row.get::<String, _>("created_at"))?,
        };

        // Get options with their counts
        let option_rows = sqlx::query(
            r#"
            SELECT text, votes
            FROM poll_options
            WHERE poll_id = ?
            ORDER BY position
            "#,
        )
        .bind(poll_id)
        .fetch_all(&self.pool)
        .await?;

        for row in option_rows {
            let text = row.get::<String, _>("text");
            poll.results.insert(text.clone(), row.get::<i64, _>("votes"));
            poll.options.push(text);
        }

        Ok(Some(poll))
    }

    async fn create_poll(&self, poll: &Poll) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query("SELECT 1 FROM polls WHERE id = ?")
            .bind(&poll.id)
            .fetch_optional(&mut *tx)
            .await?
            .is_some();
        if exists {
            return Err(Error::PollExists(poll.id.clone()));
        }

        sqlx::query(
            r#"
            INSERT INTO polls (id, title, created_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(&poll.id)
        .bind(&poll.title)
        .bind(poll.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        // Insert poll options
        for (i, option) in poll.options.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO poll_options (poll_id, text, position, votes)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&poll.id)
            .bind(option)
            .bind(i as i64)
            .bind(poll.results.get(option).copied().unwrap_or(0))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!("Created poll {} with {} option(s)", poll.id, poll.options.len());
        Ok(())
    }

    async fn delete_poll(&self, poll_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM poll_options WHERE poll_id = ?")
            .bind(poll_id)
            .execute(&mut *tx)
            .await?;

        let deleted = sqlx::query("DELETE FROM polls WHERE id = ?")
            .bind(poll_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        if deleted > 0 {
            info!("Deleted poll {}", poll_id);
        }
        Ok(deleted > 0)
    }
}
