// SPDX-License-Identifier: MPL-2.0

use crate::db::{PostKey, PostQuery, format_indexed_at};
use crate::feed::cursor::{decode_cursor, encode_cursor};
use crate::feed::{FeedContext, FeedError, FeedParams};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// How far back the trending window reaches
const TRENDING_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// Newest community posts first
    Recent,
    /// Recent posts from the last week, falling back to [`Algorithm::Recent`]
    Trending,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Skeleton {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    pub feed: Vec<SkeletonPost>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkeletonPost {
    pub post: String,
}

impl Algorithm {
    pub const ALL: [Algorithm; 2] = [Algorithm::Recent, Algorithm::Trending];

    pub fn shortname(&self) -> &'static str {
        match self {
            Algorithm::Recent => "community",
            Algorithm::Trending => "community-trending",
        }
    }

    pub fn from_shortname(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|algo| algo.shortname() == name)
    }

    pub async fn skeleton(
        &self,
        ctx: &FeedContext,
        params: &FeedParams,
        now: DateTime<Utc>,
    ) -> Result<Skeleton, FeedError> {
        let before = params.cursor.as_deref().map(decode_cursor).transpose()?;

        match self {
            Algorithm::Recent => page(ctx, None, before.as_ref(), params.limit).await,
            Algorithm::Trending => {
                let since = format_indexed_at(now - Duration::days(TRENDING_WINDOW_DAYS));
                let windowed = page(ctx, Some(&since), before.as_ref(), params.limit).await?;
                if !windowed.feed.is_empty() {
                    return Ok(windowed);
                }
                tracing::debug!("trending window empty, falling back to recent");
                page(ctx, None, before.as_ref(), params.limit).await
            }
        }
    }
}

async fn page(
    ctx: &FeedContext,
    since: Option<&str>,
    before: Option<&PostKey>,
    limit: usize,
) -> Result<Skeleton, FeedError> {
    let posts = ctx
        .db
        .select_posts(&PostQuery {
            creators: ctx.members.creator_filter(),
            since,
            before,
            limit,
        })
        .await?;

    // A short page is the last one
    let cursor = match posts.last() {
        Some(last) if posts.len() == limit => Some(encode_cursor(&last.key())),
        _ => None,
    };

    Ok(Skeleton {
        cursor,
        feed: posts
            .into_iter()
            .map(|post| SkeletonPost { post: post.uri })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::community::CommunityMembers;
    use crate::db::{Database, Post};
    use chrono::TimeZone;
    use std::sync::Arc;

    fn post(n: u32, creator: &str, indexed_at: &str) -> Post {
        Post {
            uri: format!("at://{creator}/app.bsky.feed.post/{n}"),
            cid: format!("cidT{n}"),
            creator: creator.to_string(),
            indexed_at: indexed_at.to_string(),
        }
    }

    async fn context(members: CommunityMembers, posts: &[Post]) -> FeedContext {
        let db = Database::connect(":memory:").await.unwrap();
        db.insert_posts(posts).await.unwrap();
        FeedContext {
            db,
            members: Arc::new(members),
        }
    }

    fn uris(skeleton: &Skeleton) -> Vec<&str> {
        skeleton.feed.iter().map(|p| p.post.as_str()).collect()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 20, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_shortnames() {
        assert_eq!(
            Algorithm::from_shortname("community"),
            Some(Algorithm::Recent)
        );
        assert_eq!(
            Algorithm::from_shortname("community-trending"),
            Some(Algorithm::Trending)
        );
        assert_eq!(Algorithm::from_shortname("whats-hot"), None);
    }

    #[tokio::test]
    async fn test_recent_pagination() {
        let ctx = context(
            CommunityMembers::new(["did:plc:a"]),
            &[
                post(1, "did:plc:a", "2025-03-15T00:00:01.000Z"),
                post(2, "did:plc:a", "2025-03-15T00:00:02.000Z"),
                post(3, "did:plc:a", "2025-03-15T00:00:03.000Z"),
            ],
        )
        .await;

        let first = Algorithm::Recent
            .skeleton(
                &ctx,
                &FeedParams {
                    limit: 2,
                    cursor: None,
                },
                now(),
            )
            .await
            .unwrap();
        assert_eq!(
            uris(&first),
            vec![
                "at://did:plc:a/app.bsky.feed.post/3",
                "at://did:plc:a/app.bsky.feed.post/2",
            ]
        );
        assert_eq!(
            first.cursor.as_deref(),
            Some("2025-03-15T00:00:02.000Z::cidT2")
        );

        let second = Algorithm::Recent
            .skeleton(
                &ctx,
                &FeedParams {
                    limit: 2,
                    cursor: first.cursor,
                },
                now(),
            )
            .await
            .unwrap();
        assert_eq!(uris(&second), vec!["at://did:plc:a/app.bsky.feed.post/1"]);
        assert_eq!(second.cursor, None);
    }

    #[tokio::test]
    async fn test_recent_restricted_to_members() {
        let ctx = context(
            CommunityMembers::new(["did:plc:a"]),
            &[
                post(1, "did:plc:a", "2025-03-15T00:00:01.000Z"),
                post(2, "did:plc:b", "2025-03-15T00:00:02.000Z"),
            ],
        )
        .await;

        let skeleton = Algorithm::Recent
            .skeleton(
                &ctx,
                &FeedParams {
                    limit: 10,
                    cursor: None,
                },
                now(),
            )
            .await
            .unwrap();
        assert_eq!(uris(&skeleton), vec!["at://did:plc:a/app.bsky.feed.post/1"]);
    }

    #[tokio::test]
    async fn test_trending_window() {
        let ctx = context(
            CommunityMembers::default(),
            &[
                post(1, "did:plc:a", "2025-03-01T00:00:00.000Z"),
                post(2, "did:plc:a", "2025-03-19T00:00:00.000Z"),
            ],
        )
        .await;

        let skeleton = Algorithm::Trending
            .skeleton(
                &ctx,
                &FeedParams {
                    limit: 10,
                    cursor: None,
                },
                now(),
            )
            .await
            .unwrap();
        assert_eq!(uris(&skeleton), vec!["at://did:plc:a/app.bsky.feed.post/2"]);
    }

    #[tokio::test]
    async fn test_trending_falls_back_to_recent() {
        let ctx = context(
            CommunityMembers::default(),
            &[
                post(1, "did:plc:a", "2025-01-01T00:00:00.000Z"),
                post(2, "did:plc:a", "2025-01-02T00:00:00.000Z"),
            ],
        )
        .await;

        let skeleton = Algorithm::Trending
            .skeleton(
                &ctx,
                &FeedParams {
                    limit: 10,
                    cursor: None,
                },
                now(),
            )
            .await
            .unwrap();
        assert_eq!(
            uris(&skeleton),
            vec![
                "at://did:plc:a/app.bsky.feed.post/2",
                "at://did:plc:a/app.bsky.feed.post/1",
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_store_gives_empty_page() {
        let ctx = context(CommunityMembers::default(), &[]).await;
        for algo in Algorithm::ALL {
            let skeleton = algo
                .skeleton(
                    &ctx,
                    &FeedParams {
                        limit: 10,
                        cursor: None,
                    },
                    now(),
                )
                .await
                .unwrap();
            assert_eq!(skeleton, Skeleton::default());
        }
    }

    #[tokio::test]
    async fn test_malformed_cursor() {
        let ctx = context(CommunityMembers::default(), &[]).await;
        let result = Algorithm::Recent
            .skeleton(
                &ctx,
                &FeedParams {
                    limit: 10,
                    cursor: Some("garbage".to_string()),
                },
                now(),
            )
            .await;
        assert!(matches!(result, Err(FeedError::InvalidRequest(_))));
    }
}
