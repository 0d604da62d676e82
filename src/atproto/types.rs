// SPDX-License-Identifier: MPL-2.0

use atrium_api::app::bsky::{feed, graph};
use ipld_core::cid::Cid;
use std::collections::HashMap;

/// Decoupled from the firehose wire structs so the indexer owns its input shape.
#[derive(Debug, Clone)]
pub struct CommitEnvelope {
    pub seq: i64,
    /// DID of the repository that produced the commit
    pub repo: String,
    pub time: String,
    pub ops: Vec<RepoOp>,
    /// Blocks carried in the commit's CAR section, keyed by CID
    pub blocks: HashMap<Cid, Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct RepoOp {
    pub action: String,
    /// `<collection>/<record-key>`
    pub path: String,
    pub cid: Option<Cid>,
}

/// One message read off the repo event stream.
#[derive(Debug, Clone)]
pub enum StreamMessage {
    Commit(CommitEnvelope),
    Identity { seq: i64, did: String },
    Account { seq: i64, did: String, active: bool },
    Sync { seq: i64, did: String },
    Info { name: String, message: Option<String> },
    /// A message type this service does not understand (`t` header value)
    Unknown(String),
    /// A well-framed message whose body failed to decode. `seq` is kept when
    /// it could still be read from the body.
    Malformed {
        t: String,
        seq: Option<i64>,
        error: String,
    },
}

impl StreamMessage {
    pub fn seq(&self) -> Option<i64> {
        match self {
            StreamMessage::Commit(commit) => Some(commit.seq),
            StreamMessage::Identity { seq, .. }
            | StreamMessage::Account { seq, .. }
            | StreamMessage::Sync { seq, .. } => Some(*seq),
            StreamMessage::Malformed { seq, .. } => *seq,
            StreamMessage::Info { .. } | StreamMessage::Unknown(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpAction {
    Create,
    Delete,
}

/// Record collections the feed generator understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Post,
    Repost,
    Like,
    Follow,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::Post,
        Collection::Repost,
        Collection::Like,
        Collection::Follow,
    ];

    pub fn nsid(self) -> &'static str {
        match self {
            Collection::Post => "app.bsky.feed.post",
            Collection::Repost => "app.bsky.feed.repost",
            Collection::Like => "app.bsky.feed.like",
            Collection::Follow => "app.bsky.graph.follow",
        }
    }

    pub fn from_nsid(nsid: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.nsid() == nsid)
    }
}

/// A schema-validated record from one of the known collections.
#[derive(Debug, Clone)]
pub enum Record {
    Post(Box<feed::post::Record>),
    Repost(Box<feed::repost::Record>),
    Like(Box<feed::like::Record>),
    Follow(Box<graph::follow::Record>),
}

impl Record {
    pub fn collection(&self) -> Collection {
        match self {
            Record::Post(_) => Collection::Post,
            Record::Repost(_) => Collection::Repost,
            Record::Like(_) => Collection::Like,
            Record::Follow(_) => Collection::Follow,
        }
    }
}

/// A repository operation after block lookup and record validation.
#[derive(Debug, Clone)]
pub struct DecodedOp {
    pub uri: String,
    /// Present for creates only
    pub cid: Option<String>,
    pub author: String,
    pub action: OpAction,
    /// Collection NSID taken from the op path
    pub collection: String,
    /// Present for creates only
    pub record: Option<Record>,
}

/// Build an `at://` URI for a record in a repository.
pub fn record_uri(repo: &str, collection: &str, rkey: &str) -> String {
    format!("at://{repo}/{collection}/{rkey}")
}

/// Split an op path into `(collection, rkey)`.
///
/// Returns `None` unless the path has exactly two non-empty segments.
pub fn split_path(path: &str) -> Option<(&str, &str)> {
    let (collection, rkey) = path.split_once('/')?;
    if collection.is_empty() || rkey.is_empty() || rkey.contains('/') {
        return None;
    }
    Some((collection, rkey))
}
