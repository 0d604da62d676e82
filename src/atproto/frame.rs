// SPDX-License-Identifier: MPL-2.0

//! Event stream frame decoding.
//!
//! Each binary websocket frame on `com.atproto.sync.subscribeRepos` is two
//! concatenated CBOR objects: a small header naming the message type, then a
//! DAG-CBOR body. Commit bodies carry their blocks as a CARv1 byte string,
//! which is split into a CID-keyed map here so later stages never touch CAR.

use crate::atproto::types::{CommitEnvelope, RepoOp, StreamMessage};
use ipld_core::cid::Cid;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("invalid frame header: {0}")]
    Header(String),
    #[error("invalid {kind} body: {message}")]
    Body { kind: String, message: String },
    #[error("invalid CAR data: {0}")]
    Car(String),
    #[error("upstream error frame: {error}")]
    Upstream {
        error: String,
        message: Option<String>,
    },
    #[error("unsupported frame op {0}")]
    UnsupportedOp(i64),
}

#[derive(Deserialize)]
struct FrameHeader {
    op: i64,
    #[serde(default)]
    t: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct CommitBody {
    seq: i64,
    repo: String,
    #[serde(default)]
    time: String,
    blocks: serde_bytes::ByteBuf,
    ops: Vec<OpBody>,
}

#[derive(Deserialize)]
struct OpBody {
    action: String,
    path: String,
    #[serde(default)]
    cid: Option<Cid>,
}

#[derive(Deserialize)]
struct IdentityBody {
    seq: i64,
    did: String,
}

#[derive(Deserialize)]
struct AccountBody {
    seq: i64,
    did: String,
    active: bool,
}

/// Fallback read of a body that failed full decoding
#[derive(Deserialize)]
struct SeqOnly {
    seq: i64,
}

#[derive(Deserialize)]
struct InfoBody {
    name: String,
    #[serde(default)]
    message: Option<String>,
}

/// Decode one binary frame from the repo event stream.
///
/// Header problems, upstream error frames and unknown ops are errors. A body
/// that fails to decode under a valid header is returned as
/// [`StreamMessage::Malformed`] so the stream can move past it.
pub fn decode_frame(data: &[u8]) -> Result<StreamMessage, FrameError> {
    let mut cursor = Cursor::new(data);
    let header: FrameHeader =
        ciborium::de::from_reader(&mut cursor).map_err(|e| FrameError::Header(e.to_string()))?;
    let body = &data[cursor.position() as usize..];

    match header.op {
        -1 => {
            let err: ErrorBody = decode_body("error", body)?;
            Err(FrameError::Upstream {
                error: err.error,
                message: err.message,
            })
        }
        1 => {
            let t = header
                .t
                .ok_or_else(|| FrameError::Header("missing message type".to_string()))?;
            match decode_message(&t, body) {
                Ok(message) => Ok(message),
                Err(e) => Ok(StreamMessage::Malformed {
                    seq: serde_ipld_dagcbor::from_slice::<SeqOnly>(body)
                        .ok()
                        .map(|body| body.seq),
                    error: e.to_string(),
                    t,
                }),
            }
        }
        other => Err(FrameError::UnsupportedOp(other)),
    }
}

fn decode_message(t: &str, body: &[u8]) -> Result<StreamMessage, FrameError> {
    match t {
        "#commit" => {
            let commit: CommitBody = decode_body(t, body)?;
            let blocks = read_car_blocks(&commit.blocks)?;
            Ok(StreamMessage::Commit(CommitEnvelope {
                seq: commit.seq,
                repo: commit.repo,
                time: commit.time,
                ops: commit
                    .ops
                    .into_iter()
                    .map(|op| RepoOp {
                        action: op.action,
                        path: op.path,
                        cid: op.cid,
                    })
                    .collect(),
                blocks,
            }))
        }
        "#identity" => {
            let identity: IdentityBody = decode_body(t, body)?;
            Ok(StreamMessage::Identity {
                seq: identity.seq,
                did: identity.did,
            })
        }
        "#account" => {
            let account: AccountBody = decode_body(t, body)?;
            Ok(StreamMessage::Account {
                seq: account.seq,
                did: account.did,
                active: account.active,
            })
        }
        // #sync carries the same seq/did pair as #identity
        "#sync" => {
            let sync: IdentityBody = decode_body(t, body)?;
            Ok(StreamMessage::Sync {
                seq: sync.seq,
                did: sync.did,
            })
        }
        "#info" => {
            let info: InfoBody = decode_body(t, body)?;
            Ok(StreamMessage::Info {
                name: info.name,
                message: info.message,
            })
        }
        other => Ok(StreamMessage::Unknown(other.to_string())),
    }
}

fn decode_body<T: serde::de::DeserializeOwned>(kind: &str, body: &[u8]) -> Result<T, FrameError> {
    serde_ipld_dagcbor::from_slice(body).map_err(|e| FrameError::Body {
        kind: kind.to_string(),
        message: e.to_string(),
    })
}

/// Split a CARv1 byte string into its blocks. Roots are not needed.
pub fn read_car_blocks(car: &[u8]) -> Result<HashMap<Cid, Vec<u8>>, FrameError> {
    let mut blocks = HashMap::new();
    if car.is_empty() {
        return Ok(blocks);
    }

    let mut pos = 0;
    let header_len = read_uvarint(car, &mut pos)? as usize;
    pos = pos
        .checked_add(header_len)
        .filter(|end| *end <= car.len())
        .ok_or_else(|| FrameError::Car("truncated header".to_string()))?;

    while pos < car.len() {
        let section_len = read_uvarint(car, &mut pos)? as usize;
        let end = pos
            .checked_add(section_len)
            .filter(|end| *end <= car.len())
            .ok_or_else(|| FrameError::Car("truncated block".to_string()))?;

        let mut section = Cursor::new(&car[pos..end]);
        let cid = Cid::read_bytes(&mut section).map_err(|e| FrameError::Car(e.to_string()))?;
        let data_start = pos + section.position() as usize;
        blocks.insert(cid, car[data_start..end].to_vec());
        pos = end;
    }

    Ok(blocks)
}

/// Unsigned LEB128, as used for CAR section lengths.
fn read_uvarint(data: &[u8], pos: &mut usize) -> Result<u64, FrameError> {
    let mut value: u64 = 0;
    for shift in (0..64).step_by(7) {
        let byte = *data
            .get(*pos)
            .ok_or_else(|| FrameError::Car("truncated varint".to_string()))?;
        *pos += 1;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(FrameError::Car("varint overflow".to_string()))
}
