// SPDX-License-Identifier: MPL-2.0

/// SQL schema for the SQLite backend
pub const SQLITE_SCHEMA: &str = r#"
-- Database version for migrations
PRAGMA user_version = 1;

-- post: feed candidates accepted from the firehose
CREATE TABLE IF NOT EXISTS post (
    uri TEXT PRIMARY KEY,
    cid TEXT NOT NULL,
    creator TEXT NOT NULL,
    "indexedAt" TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_post_indexed_at ON post("indexedAt" DESC, cid DESC);
CREATE INDEX IF NOT EXISTS idx_post_creator ON post(creator);

-- sub_state: last checkpointed firehose cursor per upstream service
CREATE TABLE IF NOT EXISTS sub_state (
    service TEXT PRIMARY KEY,
    cursor INTEGER NOT NULL
);
"#;

/// SQL schema for the Postgres backend
///
/// Sort columns use the "C" collation so ordering and cursor comparisons are
/// byte-wise, as in SQLite.
pub const POSTGRES_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS post (
    uri TEXT PRIMARY KEY,
    cid TEXT COLLATE "C" NOT NULL,
    creator TEXT NOT NULL,
    "indexedAt" TEXT COLLATE "C" NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_post_indexed_at ON post("indexedAt" DESC, cid DESC);
CREATE INDEX IF NOT EXISTS idx_post_creator ON post(creator);

CREATE TABLE IF NOT EXISTS sub_state (
    service TEXT PRIMARY KEY,
    cursor BIGINT NOT NULL
);
"#;
