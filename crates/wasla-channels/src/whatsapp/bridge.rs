//! Bridge client: thin WebSocket link over `tokio-tungstenite`.
//!
//! One handler task owns the socket. Commands from [`BridgeLink`] carry a
//! request id and a oneshot for the reply; lifecycle and message frames are
//! turned into [`LinkEvent`]s for the connection manager.

use super::events::{lifecycle_events, BridgeFrame, ClientFrame, DocumentRef};
use super::link::{Connector, LinkEvent, LinkSession};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;
use wasla_core::{
    error::WaslaError,
    message::{GroupInfo, OutboundPayload},
    traits::Link,
};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Successful bridge replies.
#[derive(Debug)]
enum BridgeReply {
    Sent(String),
    Groups(Vec<GroupInfo>),
}

type PendingTx = oneshot::Sender<Result<BridgeReply, String>>;

enum BridgeCommand {
    Request { frame: ClientFrame, reply: PendingTx },
    Close,
}

/// Opens links by dialing the bridge's WebSocket endpoint.
pub struct BridgeConnector {
    url: String,
    request_timeout: Duration,
}

impl BridgeConnector {
    pub fn new(url: &str, request_timeout: Duration) -> Self {
        Self {
            url: url.to_string(),
            request_timeout,
        }
    }
}

#[async_trait]
impl Connector for BridgeConnector {
    async fn connect(
        &self,
        auth_state: &str,
        creds: Option<Value>,
    ) -> Result<LinkSession, WaslaError> {
        let (mut ws, _) = connect_async(&self.url)
            .await
            .map_err(|e| WaslaError::Channel(format!("bridge connect to {} failed: {e}", self.url)))?;

        let hello = ClientFrame::Hello {
            auth_state: auth_state.to_string(),
            creds,
        };
        let json = serde_json::to_string(&hello)?;
        ws.send(Message::Text(json.into()))
            .await
            .map_err(|e| WaslaError::Channel(format!("bridge hello failed: {e}")))?;

        info!("bridge connected at {} (auth state: {auth_state})", self.url);

        let (cmd_tx, cmd_rx) = mpsc::channel::<BridgeCommand>(64);
        let (event_tx, event_rx) = mpsc::channel::<LinkEvent>(256);
        tokio::spawn(bridge_handler_loop(ws, cmd_rx, event_tx));

        Ok(LinkSession {
            link: Arc::new(BridgeLink {
                cmd_tx,
                request_timeout: self.request_timeout,
            }),
            events: event_rx,
        })
    }
}

/// Send handle for one bridge connection.
struct BridgeLink {
    cmd_tx: mpsc::Sender<BridgeCommand>,
    request_timeout: Duration,
}

impl BridgeLink {
    async fn request(&self, frame: ClientFrame) -> Result<BridgeReply, WaslaError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(BridgeCommand::Request { frame, reply: tx })
            .await
            .map_err(|_| WaslaError::Channel("bridge link closed".into()))?;

        tokio::time::timeout(self.request_timeout, rx)
            .await
            .map_err(|_| {
                WaslaError::Channel(format!(
                    "bridge did not answer within {}s",
                    self.request_timeout.as_secs()
                ))
            })?
            .map_err(|_| WaslaError::Channel("bridge reply dropped".into()))?
            .map_err(WaslaError::Channel)
    }
}

#[async_trait]
impl Link for BridgeLink {
    async fn send(&self, to: &str, payload: &OutboundPayload) -> Result<String, WaslaError> {
        let request_id = Uuid::new_v4().to_string();
        let frame = match payload {
            OutboundPayload::Text(text) => ClientFrame::Send {
                request_id,
                to: to.to_string(),
                text: Some(text.clone()),
                document: None,
            },
            OutboundPayload::Document {
                path,
                file_name,
                caption,
            } => ClientFrame::Send {
                request_id,
                to: to.to_string(),
                text: None,
                document: Some(DocumentRef {
                    path: path.clone(),
                    file_name: file_name.clone(),
                    caption: caption.clone(),
                }),
            },
        };

        match self.request(frame).await? {
            BridgeReply::Sent(id) => Ok(id),
            BridgeReply::Groups(_) => Err(WaslaError::Channel("unexpected bridge reply".into())),
        }
    }

    async fn fetch_groups(&self) -> Result<Vec<GroupInfo>, WaslaError> {
        let frame = ClientFrame::FetchGroups {
            request_id: Uuid::new_v4().to_string(),
        };
        match self.request(frame).await? {
            BridgeReply::Groups(groups) => Ok(groups),
            BridgeReply::Sent(_) => Err(WaslaError::Channel("unexpected bridge reply".into())),
        }
    }

    async fn close(&self) -> Result<(), WaslaError> {
        let _ = self.cmd_tx.send(BridgeCommand::Close).await;
        Ok(())
    }
}

/// Owns the socket: writes commands, routes replies, forwards events.
///
/// Events go through an unbounded relay so a slow consumer never stops the
/// loop from reading ack frames. Ends when the socket closes, the link handle
/// is dropped, or the manager stops listening. Pending requests fail with
/// "link closed".
async fn bridge_handler_loop(
    ws: WsStream,
    mut cmd_rx: mpsc::Receiver<BridgeCommand>,
    event_tx: mpsc::Sender<LinkEvent>,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut pending: HashMap<String, PendingTx> = HashMap::new();

    let (relay_tx, mut relay_rx) = mpsc::unbounded_channel::<LinkEvent>();
    tokio::spawn(async move {
        while let Some(event) = relay_rx.recv().await {
            if event_tx.send(event).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    BridgeCommand::Request { frame, reply } => {
                        let json = match serde_json::to_string(&frame) {
                            Ok(j) => j,
                            Err(e) => {
                                let _ = reply.send(Err(format!("encode failed: {e}")));
                                continue;
                            }
                        };
                        if let Some(id) = frame.request_id() {
                            pending.insert(id.to_string(), reply);
                        }
                        if ws_tx.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    BridgeCommand::Close => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            msg = ws_rx.next() => {
                let Some(Ok(msg)) = msg else { break };
                let text = match msg {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    _ => continue,
                };
                let frame: BridgeFrame = match serde_json::from_str(&text) {
                    Ok(f) => f,
                    Err(e) => {
                        warn!("bridge sent an unreadable frame: {e}");
                        continue;
                    }
                };
                match frame {
                    BridgeFrame::Ack { request_id, message_id } => {
                        if let Some(tx) = pending.remove(&request_id) {
                            let _ = tx.send(Ok(BridgeReply::Sent(message_id)));
                        }
                    }
                    BridgeFrame::Groups { request_id, groups } => {
                        if let Some(tx) = pending.remove(&request_id) {
                            let groups = groups.into_iter().map(GroupInfo::from).collect();
                            let _ = tx.send(Ok(BridgeReply::Groups(groups)));
                        }
                    }
                    BridgeFrame::Error { request_id, error } => {
                        match request_id.and_then(|id| pending.remove(&id)) {
                            Some(tx) => {
                                let _ = tx.send(Err(error));
                            }
                            None => warn!("bridge error: {error}"),
                        }
                    }
                    other => {
                        let forwarded = lifecycle_events(other)
                            .into_iter()
                            .all(|event| relay_tx.send(event).is_ok());
                        if !forwarded {
                            debug!("link event receiver dropped");
                            break;
                        }
                    }
                }
            }
        }
    }

    for (_, tx) in pending.drain() {
        let _ = tx.send(Err("link closed".into()));
    }
    debug!("bridge handler loop finished");
}
