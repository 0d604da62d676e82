// SPDX-License-Identifier: MPL-2.0

use crate::community::CommunityMembers;
use crate::db::{Database, DbError, Post};
use crate::indexer::classify::OpsByType;

/// Row counts from applying one commit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub inserted: usize,
    pub deleted: usize,
    /// Post creates rejected by the membership filter
    pub filtered: usize,
}

/// Write the post ops of one commit to storage.
///
/// Deletes are applied unconditionally; creates only for community members
/// (or anyone, in open mode). Both are idempotent.
pub async fn apply_ops(
    db: &Database,
    members: &CommunityMembers,
    ops: &OpsByType,
    indexed_at: &str,
) -> Result<ApplyStats, DbError> {
    let mut stats = ApplyStats::default();

    let deletes: Vec<String> = ops.posts.deletes.iter().map(|d| d.uri.clone()).collect();
    stats.deleted = db.delete_posts(&deletes).await?;

    let posts: Vec<Post> = ops
        .posts
        .creates
        .iter()
        .filter(|create| members.accepts(&create.author))
        .map(|create| Post {
            uri: create.uri.clone(),
            cid: create.cid.clone(),
            creator: create.author.clone(),
            indexed_at: indexed_at.to_string(),
        })
        .collect();
    stats.filtered = ops.posts.creates.len() - posts.len();
    stats.inserted = db.insert_posts(&posts).await?;

    Ok(stats)
}
