// SPDX-License-Identifier: MPL-2.0

//! Turns a commit envelope into validated, typed repository operations.
//!
//! Records that fail to decode against their lexicon are dropped here and are
//! never surfaced as pipeline errors.

use crate::atproto::types::{
    Collection, CommitEnvelope, DecodedOp, OpAction, Record, record_uri, split_path,
};
use atrium_api::app::bsky::{feed, graph};
use serde::Deserialize;

#[derive(Deserialize)]
struct TypeProbe {
    #[serde(rename = "$type")]
    record_type: String,
}

/// Decode every supported op in a commit, in envelope order.
///
/// Updates, unknown actions, malformed paths, missing blocks and records that
/// fail validation are skipped individually.
pub fn decode_commit(commit: &CommitEnvelope) -> Vec<DecodedOp> {
    let mut decoded = Vec::with_capacity(commit.ops.len());

    for op in &commit.ops {
        let Some((collection, rkey)) = split_path(&op.path) else {
            tracing::debug!(seq = commit.seq, path = %op.path, "skipping op with malformed path");
            continue;
        };
        let uri = record_uri(&commit.repo, collection, rkey);

        match op.action.as_str() {
            "create" => {
                let Some(cid) = op.cid else {
                    tracing::debug!(seq = commit.seq, %uri, "create op without cid");
                    continue;
                };
                let Some(bytes) = commit.blocks.get(&cid) else {
                    tracing::debug!(seq = commit.seq, %uri, "create op block missing from commit");
                    continue;
                };
                let Some(kind) = Collection::from_nsid(collection) else {
                    continue;
                };
                let Some(record) = decode_record(kind, bytes) else {
                    tracing::debug!(seq = commit.seq, %uri, "dropping record that failed validation");
                    continue;
                };
                decoded.push(DecodedOp {
                    uri,
                    cid: Some(cid.to_string()),
                    author: commit.repo.clone(),
                    action: OpAction::Create,
                    collection: collection.to_string(),
                    record: Some(record),
                });
            }
            "delete" => decoded.push(DecodedOp {
                uri,
                cid: None,
                author: commit.repo.clone(),
                action: OpAction::Delete,
                collection: collection.to_string(),
                record: None,
            }),
            // Record revisions are not tracked
            "update" => {}
            other => {
                tracing::debug!(seq = commit.seq, action = other, "skipping unknown op action");
            }
        }
    }

    decoded
}

/// Decode a DAG-CBOR block as a record of the given collection.
///
/// The block's `$type` must name the same collection and the body must match
/// the lexicon, otherwise `None`.
pub fn decode_record(collection: Collection, bytes: &[u8]) -> Option<Record> {
    let probe: TypeProbe = serde_ipld_dagcbor::from_slice(bytes).ok()?;
    if probe.record_type != collection.nsid() {
        return None;
    }

    let record = match collection {
        Collection::Post => Record::Post(Box::new(
            serde_ipld_dagcbor::from_slice::<feed::post::Record>(bytes).ok()?,
        )),
        Collection::Repost => Record::Repost(Box::new(
            serde_ipld_dagcbor::from_slice::<feed::repost::Record>(bytes).ok()?,
        )),
        Collection::Like => Record::Like(Box::new(
            serde_ipld_dagcbor::from_slice::<feed::like::Record>(bytes).ok()?,
        )),
        Collection::Follow => Record::Follow(Box::new(
            serde_ipld_dagcbor::from_slice::<graph::follow::Record>(bytes).ok()?,
        )),
    };
    Some(record)
}
