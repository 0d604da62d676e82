// SPDX-License-Identifier: MPL-2.0

use crate::db::schema::SQLITE_SCHEMA;
use crate::db::{DbError, Post, PostKey, PostQuery};
use rusqlite::{Connection, OpenFlags, OptionalExtension, ToSql, params};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const MEMORY: &str = ":memory:";

/// Read-only connections kept open for feed queries
const READ_CONNECTIONS: usize = 4;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to a SQLite feed database.
///
/// One writer connection serves the indexer. File databases also get a small
/// set of read-only connections so feed queries run against WAL snapshots
/// without waiting on the writer. Every call runs on the blocking pool.
#[derive(Clone)]
pub struct SqliteDb {
    writer: Arc<Mutex<Connection>>,
    /// Empty for `:memory:`, where queries share the writer
    readers: Arc<Vec<Mutex<Connection>>>,
    next_reader: Arc<AtomicUsize>,
}

/// Owned copy of a [`PostQuery`] that can move to the blocking pool
struct OwnedQuery {
    creators: Option<Vec<String>>,
    since: Option<String>,
    before: Option<PostKey>,
    limit: usize,
}

impl OwnedQuery {
    fn from_query(query: &PostQuery<'_>) -> Self {
        Self {
            creators: query.creators.map(<[String]>::to_vec),
            since: query.since.map(String::from),
            before: query.before.cloned(),
            limit: query.limit,
        }
    }

    fn as_query(&self) -> PostQuery<'_> {
        PostQuery {
            creators: self.creators.as_deref(),
            since: self.since.as_deref(),
            before: self.before.as_ref(),
            limit: self.limit,
        }
    }
}

impl SqliteDb {
    /// Open or create the database at `location` (`:memory:` for a private
    /// in-memory database).
    pub fn open(location: &str) -> Result<Self, DbError> {
        if location == MEMORY {
            let conn = Connection::open_in_memory()?;
            Self::migrate(&conn)?;
            return Ok(Self::from_parts(conn, Vec::new()));
        }

        let path = Path::new(location);

        // Ensure parent directory exists
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DbError::Path(format!("failed to create database dir: {}", e))
            })?;
        }

        let writer = Connection::open(path)?;
        writer.pragma_update(None, "journal_mode", "WAL")?;
        writer.busy_timeout(BUSY_TIMEOUT)?;
        Self::migrate(&writer)?;

        let readers = (0..READ_CONNECTIONS)
            .map(|_| {
                let reader = Connection::open_with_flags(
                    path,
                    OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                )?;
                reader.busy_timeout(BUSY_TIMEOUT)?;
                Ok(reader)
            })
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(Self::from_parts(writer, readers))
    }

    fn from_parts(writer: Connection, readers: Vec<Connection>) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
            readers: Arc::new(readers.into_iter().map(Mutex::new).collect()),
            next_reader: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Run schema migrations
    fn migrate(conn: &Connection) -> Result<(), DbError> {
        // Execute the schema (all CREATE IF NOT EXISTS)
        conn.execute_batch(SQLITE_SCHEMA)?;
        Ok(())
    }

    fn writer(&self) -> MutexGuard<'_, Connection> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A free read connection, or the next one in turn if all are busy
    fn reader(&self) -> MutexGuard<'_, Connection> {
        if self.readers.is_empty() {
            return self.writer();
        }

        let start = self.next_reader.fetch_add(1, Ordering::Relaxed);
        let count = self.readers.len();
        for offset in 0..count {
            if let Ok(conn) = self.readers[(start + offset) % count].try_lock() {
                return conn;
            }
        }
        self.readers[start % count]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` on the blocking pool with a clone of this handle.
    async fn blocking<T, F>(&self, f: F) -> Result<T, DbError>
    where
        T: Send + 'static,
        F: FnOnce(&SqliteDb) -> Result<T, DbError> + Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || f(&db)).await?
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<(), DbError> {
        self.writer().execute_batch(sql)?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn lock_writer(&self) -> MutexGuard<'_, Connection> {
        self.writer()
    }

    pub async fn insert_posts(&self, posts: &[Post]) -> Result<usize, DbError> {
        let posts = posts.to_vec();
        self.blocking(move |db| db.write_posts(&posts)).await
    }

    pub async fn delete_posts(&self, uris: &[String]) -> Result<usize, DbError> {
        let uris = uris.to_vec();
        self.blocking(move |db| db.remove_posts(&uris)).await
    }

    pub async fn get_cursor(&self, service: &str) -> Result<Option<i64>, DbError> {
        let service = service.to_string();
        self.blocking(move |db| db.read_cursor(&service)).await
    }

    pub async fn upsert_cursor(&self, service: &str, cursor: i64) -> Result<(), DbError> {
        let service = service.to_string();
        self.blocking(move |db| db.write_cursor(&service, cursor))
            .await
    }

    pub async fn select_posts(&self, query: &PostQuery<'_>) -> Result<Vec<Post>, DbError> {
        let query = OwnedQuery::from_query(query);
        self.blocking(move |db| db.read_posts(&query.as_query()))
            .await
    }

    /// Insert posts in one statement, skipping existing uris
    fn write_posts(&self, posts: &[Post]) -> Result<usize, DbError> {
        let conn = self.writer();

        let rows: Vec<_> = (0..posts.len())
            .map(|i| {
                let base = i * 4;
                format!("(?{}, ?{}, ?{}, ?{})", base + 1, base + 2, base + 3, base + 4)
            })
            .collect();
        let sql = format!(
            r#"INSERT INTO post (uri, cid, creator, "indexedAt") VALUES {} ON CONFLICT(uri) DO NOTHING"#,
            rows.join(", ")
        );

        let params: Vec<&dyn ToSql> = posts
            .iter()
            .flat_map(|p| {
                [
                    &p.uri as &dyn ToSql,
                    &p.cid as &dyn ToSql,
                    &p.creator as &dyn ToSql,
                    &p.indexed_at as &dyn ToSql,
                ]
            })
            .collect();

        Ok(conn.execute(&sql, params.as_slice())?)
    }

    /// Delete posts by uri in one statement
    fn remove_posts(&self, uris: &[String]) -> Result<usize, DbError> {
        let conn = self.writer();

        let placeholders: Vec<_> = (1..=uris.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "DELETE FROM post WHERE uri IN ({})",
            placeholders.join(", ")
        );
        let params: Vec<&dyn ToSql> = uris.iter().map(|s| s as &dyn ToSql).collect();

        Ok(conn.execute(&sql, params.as_slice())?)
    }

    fn read_cursor(&self, service: &str) -> Result<Option<i64>, DbError> {
        let conn = self.writer();

        let cursor = conn
            .query_row(
                "SELECT cursor FROM sub_state WHERE service = ?",
                [service],
                |row| row.get(0),
            )
            .optional()?;

        Ok(cursor)
    }

    fn write_cursor(&self, service: &str, cursor: i64) -> Result<(), DbError> {
        let conn = self.writer();

        conn.execute(
            r#"
            INSERT INTO sub_state (service, cursor) VALUES (?1, ?2)
            ON CONFLICT(service) DO UPDATE SET cursor = excluded.cursor
            "#,
            params![service, cursor],
        )?;

        Ok(())
    }

    /// Get a page of posts, newest first
    fn read_posts(&self, query: &PostQuery<'_>) -> Result<Vec<Post>, DbError> {
        let limit = query.limit as i64;
        let mut clauses = Vec::new();
        let mut params: Vec<&dyn ToSql> = Vec::new();

        if let Some(creators) = query.creators {
            let start = params.len();
            let placeholders: Vec<_> = (1..=creators.len())
                .map(|i| format!("?{}", start + i))
                .collect();
            clauses.push(format!("creator IN ({})", placeholders.join(", ")));
            params.extend(creators.iter().map(|c| c as &dyn ToSql));
        }

        if let Some(since) = &query.since {
            params.push(since as &dyn ToSql);
            clauses.push(format!(r#""indexedAt" >= ?{}"#, params.len()));
        }

        if let Some(before) = query.before {
            params.push(&before.indexed_at as &dyn ToSql);
            let at = params.len();
            params.push(&before.cid as &dyn ToSql);
            let cid = params.len();
            clauses.push(format!(
                r#"("indexedAt" < ?{at} OR ("indexedAt" = ?{at} AND cid < ?{cid}))"#
            ));
        }

        params.push(&limit as &dyn ToSql);
        let limit_param = params.len();

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            r#"
            SELECT uri, cid, creator, "indexedAt"
            FROM post
            {where_sql}
            ORDER BY "indexedAt" DESC, cid DESC
            LIMIT ?{limit_param}
            "#
        );

        let conn = self.reader();
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params.as_slice())?;
        let mut posts = Vec::new();

        while let Some(row) = rows.next()? {
            posts.push(Self::row_to_post(row)?);
        }

        Ok(posts)
    }

    /// Convert a database row to a Post
    fn row_to_post(row: &rusqlite::Row) -> Result<Post, rusqlite::Error> {
        Ok(Post {
            uri: row.get(0)?,
            cid: row.get(1)?,
            creator: row.get(2)?,
            indexed_at: row.get(3)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    fn post(n: u32) -> Post {
        Post {
            uri: format!("at://did:plc:a/app.bsky.feed.post/{n}"),
            cid: format!("cid{n}"),
            creator: "did:plc:a".to_string(),
            indexed_at: format!("2025-03-15T00:00:0{n}.000Z"),
        }
    }

    fn all_posts() -> PostQuery<'static> {
        PostQuery {
            limit: 10,
            ..Default::default()
        }
    }

    fn file_db(dir: &tempfile::TempDir) -> SqliteDb {
        let path = dir.path().join("feed.sqlite");
        SqliteDb::open(path.to_str().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_reads_do_not_wait_for_writer() {
        let dir = tempfile::tempdir().unwrap();
        let db = file_db(&dir);
        db.insert_posts(&[post(1)]).await.unwrap();

        let _writer = db.lock_writer();
        let posts = timeout(Duration::from_secs(2), db.select_posts(&all_posts()))
            .await
            .expect("query blocked on the writer")
            .unwrap();
        assert_eq!(posts, vec![post(1)]);
    }

    #[tokio::test]
    async fn test_reads_see_only_committed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let db = file_db(&dir);
        db.insert_posts(&[post(1)]).await.unwrap();

        db.execute_batch(
            r#"BEGIN IMMEDIATE;
            INSERT INTO post (uri, cid, creator, "indexedAt")
            VALUES ('at://did:plc:a/app.bsky.feed.post/2', 'cid2', 'did:plc:a', '2025-03-15T00:00:02.000Z');"#,
        )
        .unwrap();
        assert_eq!(db.select_posts(&all_posts()).await.unwrap(), vec![post(1)]);

        db.execute_batch("COMMIT").unwrap();
        assert_eq!(
            db.select_posts(&all_posts()).await.unwrap(),
            vec![post(2), post(1)]
        );
    }

    #[tokio::test]
    async fn test_memory_database_reads_through_writer() {
        let db = SqliteDb::open(MEMORY).unwrap();
        assert!(db.readers.is_empty());
        db.insert_posts(&[post(1)]).await.unwrap();
        assert_eq!(db.select_posts(&all_posts()).await.unwrap(), vec![post(1)]);
    }
}
