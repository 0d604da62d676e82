// SPDX-License-Identifier: MPL-2.0

//! Fixtures for building stream data in tests.

use crate::atproto::types::{CommitEnvelope, RepoOp};
use ipld_core::cid::Cid;
use ipld_core::cid::multihash::Multihash;
use serde::Serialize;
use serde_json::{Value, json};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

const DAG_CBOR: u64 = 0x71;
const SHA2_256: u64 = 0x12;

/// A structurally valid CIDv1 derived from a seed, not from content.
pub fn test_cid(seed: u32) -> Cid {
    let mut digest = [0u8; 32];
    digest[..4].copy_from_slice(&seed.to_be_bytes());
    let hash = Multihash::<64>::wrap(SHA2_256, &digest).unwrap();
    Cid::new_v1(DAG_CBOR, hash)
}

pub fn encode_block(seed: u32, value: &impl Serialize) -> (Cid, Vec<u8>) {
    (test_cid(seed), serde_ipld_dagcbor::to_vec(value).unwrap())
}

pub fn post_json(text: &str) -> Value {
    json!({
        "$type": "app.bsky.feed.post",
        "text": text,
        "createdAt": "2025-03-15T00:00:00.000Z",
    })
}

pub fn like_json(subject_uri: &str) -> Value {
    json!({
        "$type": "app.bsky.feed.like",
        "subject": { "uri": subject_uri, "cid": test_cid(9999).to_string() },
        "createdAt": "2025-03-15T00:00:00.000Z",
    })
}

pub fn repost_json(subject_uri: &str) -> Value {
    json!({
        "$type": "app.bsky.feed.repost",
        "subject": { "uri": subject_uri, "cid": test_cid(9998).to_string() },
        "createdAt": "2025-03-15T00:00:00.000Z",
    })
}

pub fn follow_json(subject: &str) -> Value {
    json!({
        "$type": "app.bsky.graph.follow",
        "subject": subject,
        "createdAt": "2025-03-15T00:00:00.000Z",
    })
}

/// Assemble a CARv1 byte string from blocks.
pub fn build_car(blocks: &[(Cid, Vec<u8>)]) -> Vec<u8> {
    let roots: Vec<Cid> = blocks.iter().take(1).map(|(cid, _)| *cid).collect();
    #[derive(Serialize)]
    struct CarHeader {
        roots: Vec<Cid>,
        version: u64,
    }
    let header = serde_ipld_dagcbor::to_vec(&CarHeader { roots, version: 1 }).unwrap();

    let mut car = Vec::new();
    write_uvarint(&mut car, header.len() as u64);
    car.extend_from_slice(&header);
    for (cid, data) in blocks {
        let cid_bytes = cid.to_bytes();
        write_uvarint(&mut car, (cid_bytes.len() + data.len()) as u64);
        car.extend_from_slice(&cid_bytes);
        car.extend_from_slice(data);
    }
    car
}

fn write_uvarint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Header plus body, as one websocket frame.
pub fn frame(op: i64, t: Option<&str>, body: &impl Serialize) -> Vec<u8> {
    let header = match t {
        Some(t) => json!({ "op": op, "t": t }),
        None => json!({ "op": op }),
    };
    let mut data = serde_ipld_dagcbor::to_vec(&header).unwrap();
    data.extend(serde_ipld_dagcbor::to_vec(body).unwrap());
    data
}

#[derive(Serialize)]
struct OpFrameBody<'a> {
    action: &'a str,
    path: &'a str,
    cid: Option<Cid>,
}

#[derive(Serialize)]
struct CommitFrameBody<'a> {
    seq: i64,
    repo: &'a str,
    time: &'a str,
    blocks: serde_bytes::ByteBuf,
    ops: Vec<OpFrameBody<'a>>,
}

/// Encode a commit as a `#commit` frame, dropping `truncate_car_by` bytes
/// from the end of its CAR section.
pub fn commit_frame(commit: &CommitEnvelope, truncate_car_by: usize) -> Vec<u8> {
    let blocks: Vec<(Cid, Vec<u8>)> = commit
        .blocks
        .iter()
        .map(|(cid, data)| (*cid, data.clone()))
        .collect();
    let mut car = build_car(&blocks);
    car.truncate(car.len().saturating_sub(truncate_car_by));

    let body = CommitFrameBody {
        seq: commit.seq,
        repo: &commit.repo,
        time: &commit.time,
        blocks: serde_bytes::ByteBuf::from(car),
        ops: commit
            .ops
            .iter()
            .map(|op| OpFrameBody {
                action: &op.action,
                path: &op.path,
                cid: op.cid,
            })
            .collect(),
    };
    frame(1, Some("#commit"), &body)
}

/// Incrementally builds a commit envelope for one repository.
pub struct CommitBuilder {
    seq: i64,
    repo: String,
    ops: Vec<RepoOp>,
    blocks: HashMap<Cid, Vec<u8>>,
    next_seed: u32,
}

impl CommitBuilder {
    pub fn new(seq: i64, repo: &str) -> Self {
        Self {
            seq,
            repo: repo.to_string(),
            ops: Vec::new(),
            blocks: HashMap::new(),
            next_seed: (seq as u32).wrapping_mul(1000),
        }
    }

    /// Add a create op with its block.
    pub fn create(mut self, path: &str, record: &Value) -> Self {
        self.next_seed += 1;
        let (cid, bytes) = encode_block(self.next_seed, record);
        self.blocks.insert(cid, bytes);
        self.ops.push(RepoOp {
            action: "create".to_string(),
            path: path.to_string(),
            cid: Some(cid),
        });
        self
    }

    /// Add a create op whose block is absent from the envelope.
    pub fn create_missing_block(mut self, path: &str) -> Self {
        self.next_seed += 1;
        self.ops.push(RepoOp {
            action: "create".to_string(),
            path: path.to_string(),
            cid: Some(test_cid(self.next_seed)),
        });
        self
    }

    pub fn op(mut self, action: &str, path: &str) -> Self {
        self.ops.push(RepoOp {
            action: action.to_string(),
            path: path.to_string(),
            cid: None,
        });
        self
    }

    pub fn build(self) -> CommitEnvelope {
        CommitEnvelope {
            seq: self.seq,
            repo: self.repo,
            time: "2025-03-15T00:00:00.000Z".to_string(),
            ops: self.ops,
            blocks: self.blocks,
        }
    }
}

/// A websocket relay on a local port.
pub struct TestRelay {
    pub url: String,
    /// Query string of each accepted connection, in order
    pub queries: Arc<Mutex<Vec<String>>>,
}

/// Serve `messages` to every connection, then close it unless `hold_open`.
pub async fn spawn_relay(messages: Vec<Message>, hold_open: bool) -> TestRelay {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let queries = Arc::new(Mutex::new(Vec::new()));
    let seen = queries.clone();

    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            let seen = seen.clone();
            let messages = messages.clone();
            tokio::spawn(async move {
                let record = move |request: &Request, response: Response| {
                    let query = request.uri().query().unwrap_or_default().to_string();
                    seen.lock().unwrap().push(query);
                    Ok::<_, ErrorResponse>(response)
                };
                let Ok(mut ws) = accept_hdr_async(tcp, record).await else {
                    return;
                };
                for message in messages {
                    if ws.send(message).await.is_err() {
                        return;
                    }
                }
                if !hold_open {
                    let _ = ws.close(None).await;
                }
                while let Some(Ok(_)) = ws.next().await {}
            });
        }
    });

    TestRelay { url, queries }
}
