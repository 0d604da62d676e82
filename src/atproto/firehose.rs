// SPDX-License-Identifier: MPL-2.0

use crate::atproto::frame::{FrameError, decode_frame};
use crate::atproto::types::StreamMessage;
use futures_util::StreamExt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

const SUBSCRIBE_REPOS_PATH: &str = "/xrpc/com.atproto.sync.subscribeRepos";

#[derive(Error, Debug)]
pub enum FirehoseError {
    #[error("invalid endpoint: {0}")]
    Endpoint(String),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("no frame received for {0:?}")]
    IdleTimeout(Duration),
}

/// Opens event streams positioned at an optional resume cursor.
pub trait Connector: Send + Sync {
    type Stream: MessageStream;

    fn connect(
        &self,
        cursor: Option<i64>,
    ) -> impl Future<Output = Result<Self::Stream, FirehoseError>> + Send;
}

/// A connected event stream. `Ok(None)` means the upstream closed cleanly.
pub trait MessageStream: Send {
    fn next_message(
        &mut self,
    ) -> impl Future<Output = Result<Option<StreamMessage>, FirehoseError>> + Send;
}

/// Connects to a relay's `subscribeRepos` websocket.
pub struct FirehoseClient {
    service_url: Url,
    idle_timeout: Duration,
}

impl FirehoseClient {
    /// `service` may be a bare host URL (`wss://bsky.network`) or already
    /// include the subscribeRepos path.
    pub fn new(service: &str, idle_timeout: Duration) -> Result<Self, FirehoseError> {
        let mut service_url =
            Url::parse(service).map_err(|e| FirehoseError::Endpoint(format!("{service}: {e}")))?;

        match service_url.scheme() {
            "ws" | "wss" => {}
            "http" => service_url
                .set_scheme("ws")
                .map_err(|_| FirehoseError::Endpoint(service.to_string()))?,
            "https" => service_url
                .set_scheme("wss")
                .map_err(|_| FirehoseError::Endpoint(service.to_string()))?,
            other => {
                return Err(FirehoseError::Endpoint(format!(
                    "unsupported scheme {other}"
                )));
            }
        }

        if !service_url.path().ends_with(SUBSCRIBE_REPOS_PATH) {
            let path = format!(
                "{}{}",
                service_url.path().trim_end_matches('/'),
                SUBSCRIBE_REPOS_PATH
            );
            service_url.set_path(&path);
        }

        Ok(Self {
            service_url,
            idle_timeout,
        })
    }

    /// Stream URL with the resume cursor applied.
    pub fn subscribe_url(&self, cursor: Option<i64>) -> Url {
        let mut url = self.service_url.clone();
        url.set_query(None);
        if let Some(cursor) = cursor {
            url.query_pairs_mut()
                .append_pair("cursor", &cursor.to_string());
        }
        url
    }
}

impl Connector for FirehoseClient {
    type Stream = FirehoseStream;

    async fn connect(&self, cursor: Option<i64>) -> Result<FirehoseStream, FirehoseError> {
        let url = self.subscribe_url(cursor);
        tracing::info!(url = %url, "connecting to firehose");
        let (socket, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        Ok(FirehoseStream {
            socket,
            idle_timeout: self.idle_timeout,
        })
    }
}

pub struct FirehoseStream {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    idle_timeout: Duration,
}

impl MessageStream for FirehoseStream {
    async fn next_message(&mut self) -> Result<Option<StreamMessage>, FirehoseError> {
        loop {
            // A connection that stays open but silent is treated as dead
            let next = tokio::time::timeout(self.idle_timeout, self.socket.next())
                .await
                .map_err(|_| FirehoseError::IdleTimeout(self.idle_timeout))?;

            match next {
                None => return Ok(None),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(Message::Binary(data))) => return Ok(Some(decode_frame(&data)?)),
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(?frame, "firehose closed by upstream");
                    return Ok(None);
                }
                // Pings are answered by tungstenite; text frames are not part of the protocol
                Some(Ok(_)) => continue,
            }
        }
    }
}
