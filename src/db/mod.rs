// SPDX-License-Identifier: MPL-2.0

//! Durable storage for feed posts and the firehose checkpoint.
//!
//! The same two relations are served by SQLite or Postgres; the backend is
//! chosen from the shape of the connection string and the rest of the crate
//! only sees [`Database`].

mod postgres;
mod schema;
mod sqlite;

pub use postgres::PostgresDb;
pub use sqlite::SqliteDb;

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
    #[error("database path error: {0}")]
    Path(String),
    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A post accepted into the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub uri: String,
    pub cid: String,
    pub creator: String,
    pub indexed_at: String,
}

impl Post {
    pub fn key(&self) -> PostKey {
        PostKey {
            indexed_at: self.indexed_at.clone(),
            cid: self.cid.clone(),
        }
    }
}

/// Sort position of a post; feeds order by `(indexed_at, cid)` descending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostKey {
    pub indexed_at: String,
    pub cid: String,
}

/// Parameters for a page of posts, newest first.
#[derive(Debug, Clone, Default)]
pub struct PostQuery<'a> {
    /// Restrict to these creators; `None` means any creator
    pub creators: Option<&'a [String]>,
    /// Only posts indexed at or after this timestamp
    pub since: Option<&'a str>,
    /// Only posts strictly before this key
    pub before: Option<&'a PostKey>,
    pub limit: usize,
}

/// Storage handle shared by the indexer (sole writer) and feed queries.
#[derive(Clone)]
pub enum Database {
    Sqlite(SqliteDb),
    Postgres(PostgresDb),
}

impl Database {
    /// Open the backend named by `location`.
    ///
    /// `postgres://` and `postgresql://` URLs select Postgres; anything else is
    /// a SQLite file path, or `:memory:`.
    pub async fn connect(location: &str) -> Result<Self, DbError> {
        if is_postgres_url(location) {
            Ok(Database::Postgres(PostgresDb::connect(location).await?))
        } else {
            Ok(Database::Sqlite(SqliteDb::open(location)?))
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            Database::Sqlite(_) => "sqlite",
            Database::Postgres(_) => "postgres",
        }
    }

    /// Insert posts, ignoring any uri that is already stored.
    /// Returns the number of new rows.
    pub async fn insert_posts(&self, posts: &[Post]) -> Result<usize, DbError> {
        if posts.is_empty() {
            return Ok(0);
        }
        match self {
            Database::Sqlite(db) => db.insert_posts(posts).await,
            Database::Postgres(db) => db.insert_posts(posts).await,
        }
    }

    /// Delete posts by uri. Unknown uris are not an error.
    /// Returns the number of removed rows.
    pub async fn delete_posts(&self, uris: &[String]) -> Result<usize, DbError> {
        if uris.is_empty() {
            return Ok(0);
        }
        match self {
            Database::Sqlite(db) => db.delete_posts(uris).await,
            Database::Postgres(db) => db.delete_posts(uris).await,
        }
    }

    pub async fn get_cursor(&self, service: &str) -> Result<Option<i64>, DbError> {
        match self {
            Database::Sqlite(db) => db.get_cursor(service).await,
            Database::Postgres(db) => db.get_cursor(service).await,
        }
    }

    pub async fn upsert_cursor(&self, service: &str, cursor: i64) -> Result<(), DbError> {
        match self {
            Database::Sqlite(db) => db.upsert_cursor(service, cursor).await,
            Database::Postgres(db) => db.upsert_cursor(service, cursor).await,
        }
    }

    /// Select a page ordered by `(indexedAt DESC, cid DESC)`.
    pub async fn select_posts(&self, query: &PostQuery<'_>) -> Result<Vec<Post>, DbError> {
        if query.limit == 0 || query.creators.is_some_and(|c| c.is_empty()) {
            return Ok(Vec::new());
        }
        match self {
            Database::Sqlite(db) => db.select_posts(query).await,
            Database::Postgres(db) => db.select_posts(query).await,
        }
    }
}

fn is_postgres_url(location: &str) -> bool {
    location.starts_with("postgres://") || location.starts_with("postgresql://")
}

/// Timestamp format stored in `indexedAt`; lexical order matches time order.
pub fn format_indexed_at(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current time as an `indexedAt` value
pub fn now_indexed_at() -> String {
    format_indexed_at(Utc::now())
}
