// SPDX-License-Identifier: MPL-2.0

use crate::atproto::{Collection, DecodedOp, OpAction, Record};
use atrium_api::app::bsky::{feed, graph};

#[derive(Debug, Clone)]
pub struct CreateOp<T> {
    pub uri: String,
    pub cid: String,
    pub author: String,
    pub record: T,
}

#[derive(Debug, Clone)]
pub struct DeleteOp {
    pub uri: String,
}

#[derive(Debug, Clone)]
pub struct Ops<T> {
    pub creates: Vec<CreateOp<T>>,
    pub deletes: Vec<DeleteOp>,
}

impl<T> Default for Ops<T> {
    fn default() -> Self {
        Self {
            creates: Vec::new(),
            deletes: Vec::new(),
        }
    }
}

impl<T> Ops<T> {
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.deletes.is_empty()
    }
}

/// Decoded ops bucketed by record type and action
#[derive(Debug, Clone, Default)]
pub struct OpsByType {
    pub posts: Ops<feed::post::Record>,
    pub reposts: Ops<feed::repost::Record>,
    pub likes: Ops<feed::like::Record>,
    pub follows: Ops<graph::follow::Record>,
}

impl OpsByType {
    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
            && self.reposts.is_empty()
            && self.likes.is_empty()
            && self.follows.is_empty()
    }
}

/// Partition decoded ops. Ops for unknown collections are dropped.
pub fn classify(ops: Vec<DecodedOp>) -> OpsByType {
    let mut by_type = OpsByType::default();

    for op in ops {
        match op.action {
            OpAction::Create => {
                let (Some(cid), Some(record)) = (op.cid, op.record) else {
                    continue;
                };
                let (uri, author) = (op.uri, op.author);
                match record {
                    Record::Post(record) => by_type.posts.creates.push(CreateOp {
                        uri,
                        cid,
                        author,
                        record: *record,
                    }),
                    Record::Repost(record) => by_type.reposts.creates.push(CreateOp {
                        uri,
                        cid,
                        author,
                        record: *record,
                    }),
                    Record::Like(record) => by_type.likes.creates.push(CreateOp {
                        uri,
                        cid,
                        author,
                        record: *record,
                    }),
                    Record::Follow(record) => by_type.follows.creates.push(CreateOp {
                        uri,
                        cid,
                        author,
                        record: *record,
                    }),
                }
            }
            OpAction::Delete => {
                let Some(collection) = Collection::from_nsid(&op.collection) else {
                    continue;
                };
                let delete = DeleteOp { uri: op.uri };
                match collection {
                    Collection::Post => by_type.posts.deletes.push(delete),
                    Collection::Repost => by_type.reposts.deletes.push(delete),
                    Collection::Like => by_type.likes.deletes.push(delete),
                    Collection::Follow => by_type.follows.deletes.push(delete),
                }
            }
        }
    }

    by_type
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atproto::decode_commit;
    use crate::atproto::testing::{
        CommitBuilder, follow_json, like_json, post_json, repost_json,
    };

    #[test]
    fn test_classify_buckets() {
        let subject = "at://did:plc:bob/app.bsky.feed.post/1";
        let commit = CommitBuilder::new(5, "did:plc:alice")
            .create("app.bsky.feed.post/a", &post_json("hi"))
            .create("app.bsky.feed.post/b", &post_json("again"))
            .create("app.bsky.feed.repost/c", &repost_json(subject))
            .create("app.bsky.feed.like/d", &like_json(subject))
            .create("app.bsky.graph.follow/e", &follow_json("did:plc:bob"))
            .op("delete", "app.bsky.feed.post/old")
            .op("delete", "app.bsky.feed.like/old")
            .op("delete", "app.bsky.graph.follow/old")
            .op("delete", "app.bsky.graph.block/old")
            .build();

        let ops = classify(decode_commit(&commit));

        assert_eq!(ops.posts.creates.len(), 2);
        assert_eq!(ops.posts.creates[0].record.text, "hi");
        assert_eq!(ops.posts.creates[0].author, "did:plc:alice");
        assert_eq!(ops.posts.deletes.len(), 1);
        assert_eq!(
            ops.posts.deletes[0].uri,
            "at://did:plc:alice/app.bsky.feed.post/old"
        );
        assert_eq!(ops.reposts.creates.len(), 1);
        assert!(ops.reposts.deletes.is_empty());
        assert_eq!(ops.likes.creates[0].record.subject.uri, subject);
        assert_eq!(ops.likes.deletes.len(), 1);
        assert_eq!(ops.follows.creates.len(), 1);
        assert_eq!(ops.follows.deletes.len(), 1);
    }

    #[test]
    fn test_classify_empty() {
        let ops = classify(Vec::new());
        assert!(ops.is_empty());
    }
}
