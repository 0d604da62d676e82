// SPDX-License-Identifier: MPL-2.0

//! Read side of the feed: paged, deterministically ordered post skeletons.

mod algos;
mod cursor;

pub use algos::{Algorithm, Skeleton, SkeletonPost};
pub use cursor::{decode_cursor, encode_cursor};

use crate::community::CommunityMembers;
use crate::db::{Database, DbError};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error(transparent)]
    Db(#[from] DbError),
}

/// What every feed algorithm reads from.
#[derive(Clone)]
pub struct FeedContext {
    pub db: Database,
    pub members: Arc<CommunityMembers>,
}

/// One page request, after the limit has been clamped.
#[derive(Debug, Clone, Default)]
pub struct FeedParams {
    pub limit: usize,
    pub cursor: Option<String>,
}

/// Apply the default when absent, then clamp into `[1, max]`.
pub fn clamp_limit(requested: Option<usize>, default: usize, max: usize) -> usize {
    requested.unwrap_or(default).clamp(1, max.max(1))
}
