// SPDX-License-Identifier: MPL-2.0

use std::collections::BTreeSet;

/// The tracked set of community members (actor DIDs).
///
/// An empty set puts the feed in open mode: every creator is accepted by the
/// indexer and every creator is eligible in feed queries.
#[derive(Debug, Clone, Default)]
pub struct CommunityMembers {
    dids: BTreeSet<String>,
    /// Sorted copy handed to storage queries
    list: Vec<String>,
}

impl CommunityMembers {
    pub fn new<I, S>(dids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let dids: BTreeSet<String> = dids
            .into_iter()
            .map(Into::into)
            .map(|did| did.trim().to_string())
            .filter(|did| !did.is_empty())
            .collect();
        let list = dids.iter().cloned().collect();
        Self { dids, list }
    }

    pub fn is_open(&self) -> bool {
        self.dids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.dids.len()
    }

    pub fn contains(&self, did: &str) -> bool {
        self.dids.contains(did)
    }

    /// Whether a post created by `did` may enter the feed.
    pub fn accepts(&self, did: &str) -> bool {
        self.is_open() || self.contains(did)
    }

    /// Creator restriction for feed queries; `None` in open mode.
    pub fn creator_filter(&self) -> Option<&[String]> {
        if self.is_open() {
            None
        } else {
            Some(&self.list)
        }
    }
}
