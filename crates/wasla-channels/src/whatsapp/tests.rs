use super::events::{lifecycle_events, to_inbound, BridgeFrame, ClientFrame, WaMessage};
use super::*;
use crate::whatsapp_store::AuthStateStore;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use wasla_core::{
    error::WaslaError,
    message::{GroupInfo, InboundContent, InboundMessage, OutboundPayload},
    traits::Link,
};

// --- test doubles ---

struct NullLink;

#[async_trait]
impl Link for NullLink {
    async fn send(&self, _to: &str, _payload: &OutboundPayload) -> Result<String, WaslaError> {
        Ok("sent-1".into())
    }

    async fn fetch_groups(&self) -> Result<Vec<GroupInfo>, WaslaError> {
        Ok(Vec::new())
    }
}

/// Plays back one event script per `connect()` call.
struct ScriptedConnector {
    scripts: Mutex<VecDeque<Vec<LinkEvent>>>,
    seen_creds: Mutex<Vec<Option<Value>>>,
}

impl ScriptedConnector {
    fn new(scripts: Vec<Vec<LinkEvent>>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            seen_creds: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        _auth_state: &str,
        creds: Option<Value>,
    ) -> Result<LinkSession, WaslaError> {
        self.seen_creds.lock().unwrap().push(creds);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| WaslaError::Channel("no script left".into()))?;

        let (tx, rx) = mpsc::channel(script.len().max(1));
        for event in script {
            tx.send(event).await.unwrap();
        }
        Ok(LinkSession {
            link: Arc::new(NullLink),
            events: rx,
        })
    }
}

fn text_message(id: &str, text: &str) -> InboundMessage {
    InboundMessage {
        id: id.into(),
        chat_id: "111@s.whatsapp.net".into(),
        sender: "111".into(),
        sender_name: None,
        from_me: false,
        content: InboundContent::Text { text: text.into() },
        timestamp: chrono::Utc::now(),
    }
}

async fn manager(
    connector: Arc<ScriptedConnector>,
) -> (Arc<ConnectionManager>, AuthStateStore, mpsc::Receiver<InboundMessage>) {
    let auth = AuthStateStore::in_memory().await.unwrap();
    let (tx, rx) = mpsc::channel(16);
    let mgr = Arc::new(ConnectionManager::new(
        connector,
        auth.clone(),
        "auth_info",
        Duration::from_millis(1),
        tx,
    ));
    (mgr, auth, rx)
}

async fn wait_until(cond: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// --- connection lifecycle ---

#[tokio::test]
async fn test_logged_out_never_reconnects() {
    let connector = ScriptedConnector::new(vec![vec![
        LinkEvent::Open,
        LinkEvent::Closed(DisconnectReason::LoggedOut),
    ]]);
    let (mgr, _auth, _rx) = manager(connector).await;

    mgr.clone().run().await;

    assert_eq!(mgr.connect_attempts(), 1);
    assert!(mgr.is_logged_out());
    assert_eq!(mgr.state(), ConnectionState::Disconnected);
    assert!(mgr.link().is_none());
}

#[tokio::test]
async fn test_each_transient_close_reconnects_once() {
    let connector = ScriptedConnector::new(vec![
        vec![LinkEvent::Open, LinkEvent::Closed(DisconnectReason::ConnectionLost)],
        vec![LinkEvent::Closed(DisconnectReason::RestartRequired)],
        vec![LinkEvent::Closed(DisconnectReason::Other(503))],
        vec![LinkEvent::Closed(DisconnectReason::LoggedOut)],
    ]);
    let (mgr, _auth, _rx) = manager(connector).await;

    mgr.clone().run().await;

    assert_eq!(mgr.connect_attempts(), 4);
    assert!(mgr.is_logged_out());
}

#[tokio::test]
async fn test_stream_end_counts_as_transient_close() {
    let connector = ScriptedConnector::new(vec![
        vec![LinkEvent::Open],
        vec![LinkEvent::Closed(DisconnectReason::LoggedOut)],
    ]);
    let (mgr, _auth, _rx) = manager(connector).await;

    mgr.clone().run().await;

    assert_eq!(mgr.connect_attempts(), 2);
}

#[tokio::test]
async fn test_creds_persisted_and_reused_on_reconnect() {
    let connector = ScriptedConnector::new(vec![
        vec![
            LinkEvent::CredsUpdate(json!({"me": "966500000000"})),
            LinkEvent::Closed(DisconnectReason::ConnectionClosed),
        ],
        vec![LinkEvent::Closed(DisconnectReason::LoggedOut)],
    ]);
    let (mgr, auth, _rx) = manager(connector.clone()).await;

    mgr.clone().run().await;

    let seen = connector.seen_creds.lock().unwrap().clone();
    assert_eq!(seen, vec![None, Some(json!({"me": "966500000000"}))]);
    assert_eq!(
        auth.load("auth_info").await.unwrap(),
        Some(json!({"me": "966500000000"}))
    );
}

#[tokio::test]
async fn test_qr_and_open_are_broadcast() {
    let connector = ScriptedConnector::new(vec![vec![
        LinkEvent::Qr("2@abc".into()),
        LinkEvent::Open,
        LinkEvent::Closed(DisconnectReason::LoggedOut),
    ]]);
    let (mgr, _auth, _rx) = manager(connector).await;
    let mut updates = mgr.subscribe();

    mgr.clone().run().await;

    let first = updates.recv().await.unwrap();
    assert_eq!(first.state, ConnectionState::AwaitingScan);
    assert_eq!(first.qr.as_deref(), Some("2@abc"));

    let second = updates.recv().await.unwrap();
    assert_eq!(second.state, ConnectionState::Connected);
    assert!(second.qr.is_none(), "QR cleared once connected");

    let third = updates.recv().await.unwrap();
    assert_eq!(third.state, ConnectionState::Disconnected);
    assert!(mgr.pending_qr().is_none());
}

#[tokio::test]
async fn test_messages_forwarded_to_dispatcher() {
    let connector = ScriptedConnector::new(vec![vec![
        LinkEvent::Open,
        LinkEvent::Message(text_message("m1", "hi")),
        LinkEvent::Closed(DisconnectReason::LoggedOut),
    ]]);
    let (mgr, _auth, mut rx) = manager(connector).await;

    mgr.clone().run().await;

    let msg = rx.try_recv().unwrap();
    assert_eq!(msg.id, "m1");
    assert_eq!(msg.content.text(), Some("hi"));
}

#[tokio::test]
async fn test_connect_failure_is_retried() {
    // The first connect fails outright (no script), the second logs out.
    let connector = Arc::new(FlakyConnector {
        inner: ScriptedConnector::new(vec![vec![LinkEvent::Closed(
            DisconnectReason::LoggedOut,
        )]]),
        failures_left: Mutex::new(1),
    });
    let auth = AuthStateStore::in_memory().await.unwrap();
    let (tx, _rx) = mpsc::channel(4);
    let mgr = Arc::new(ConnectionManager::new(
        connector,
        auth,
        "auth_info",
        Duration::from_millis(1),
        tx,
    ));

    mgr.clone().run().await;

    assert_eq!(mgr.connect_attempts(), 2);
    assert!(mgr.is_logged_out());
}

struct FlakyConnector {
    inner: Arc<ScriptedConnector>,
    failures_left: Mutex<u32>,
}

#[async_trait]
impl Connector for FlakyConnector {
    async fn connect(
        &self,
        auth_state: &str,
        creds: Option<Value>,
    ) -> Result<LinkSession, WaslaError> {
        {
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(WaslaError::Channel("bridge unreachable".into()));
            }
        }
        self.inner.connect(auth_state, creds).await
    }
}

#[tokio::test]
async fn test_repair_clears_creds_and_restarts() {
    let connector = ScriptedConnector::new(vec![
        vec![
            LinkEvent::CredsUpdate(json!({"me": "old"})),
            LinkEvent::Closed(DisconnectReason::LoggedOut),
        ],
        vec![LinkEvent::Closed(DisconnectReason::LoggedOut)],
    ]);
    let (mgr, auth, _rx) = manager(connector.clone()).await;

    assert!(mgr.start());
    let m = mgr.clone();
    wait_until(move || m.is_logged_out() && !m.is_running()).await;
    assert!(auth.load("auth_info").await.unwrap().is_some());

    assert!(mgr.repair().await.unwrap());
    let m = mgr.clone();
    wait_until(move || m.connect_attempts() == 2 && !m.is_running()).await;

    let seen = connector.seen_creds.lock().unwrap().clone();
    assert_eq!(seen[1], None, "fresh pairing starts without credentials");
}

#[tokio::test]
async fn test_start_refused_while_running() {
    // An open link with no close keeps the loop busy.
    let connector = Arc::new(PendingConnector::default());
    let auth = AuthStateStore::in_memory().await.unwrap();
    let (tx, _rx) = mpsc::channel(4);
    let mgr = Arc::new(ConnectionManager::new(
        connector,
        auth,
        "auth_info",
        Duration::from_millis(1),
        tx,
    ));

    assert!(mgr.start());
    let m = mgr.clone();
    wait_until(move || m.is_connected()).await;
    assert!(mgr.link().is_some());
    assert!(!mgr.start());
    assert!(!mgr.repair().await.unwrap());

    mgr.shutdown().await;
    assert_eq!(mgr.state(), ConnectionState::Disconnected);
    assert!(mgr.link().is_none());
}

#[derive(Default)]
struct PendingConnector {
    senders: Mutex<Vec<mpsc::Sender<LinkEvent>>>,
}

#[async_trait]
impl Connector for PendingConnector {
    async fn connect(
        &self,
        _auth_state: &str,
        _creds: Option<Value>,
    ) -> Result<LinkSession, WaslaError> {
        let (tx, rx) = mpsc::channel(4);
        tx.send(LinkEvent::Open).await.unwrap();
        // Keep the sender alive so the stream never ends.
        self.senders.lock().unwrap().push(tx);
        Ok(LinkSession {
            link: Arc::new(NullLink),
            events: rx,
        })
    }
}

// --- bridge frames ---

#[test]
fn test_disconnect_reason_from_status_code() {
    assert_eq!(
        DisconnectReason::from_status_code(Some(401)),
        DisconnectReason::LoggedOut
    );
    assert_eq!(
        DisconnectReason::from_status_code(Some(515)),
        DisconnectReason::RestartRequired
    );
    assert_eq!(
        DisconnectReason::from_status_code(Some(418)),
        DisconnectReason::Other(418)
    );
    assert_eq!(
        DisconnectReason::from_status_code(None),
        DisconnectReason::Unknown
    );
    assert!(DisconnectReason::LoggedOut.is_terminal());
    assert!(!DisconnectReason::ConnectionReplaced.is_terminal());
}

#[test]
fn test_connection_update_emits_qr_then_close() {
    let frame: BridgeFrame = serde_json::from_value(json!({
        "type": "connection.update",
        "connection": "close",
        "qr": "2@xyz",
        "statusCode": 401
    }))
    .unwrap();

    let events = lifecycle_events(frame);
    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], LinkEvent::Qr(q) if q == "2@xyz"));
    assert!(matches!(
        events[1],
        LinkEvent::Closed(DisconnectReason::LoggedOut)
    ));
}

#[test]
fn test_connection_update_connecting_is_silent() {
    let frame: BridgeFrame = serde_json::from_value(json!({
        "type": "connection.update",
        "connection": "connecting"
    }))
    .unwrap();
    assert!(lifecycle_events(frame).is_empty());
}

#[test]
fn test_messages_upsert_resolves_text_and_skips_stubs() {
    let frame: BridgeFrame = serde_json::from_value(json!({
        "type": "messages.upsert",
        "messages": [
            {
                "key": {"id": "A1", "remoteJid": "966500000000@s.whatsapp.net", "fromMe": false},
                "pushName": "Sara",
                "message": {"conversation": "المنيو"},
                "messageTimestamp": 1700000000
            },
            {
                "key": {"id": "A2", "remoteJid": "966500000000@s.whatsapp.net"}
            }
        ]
    }))
    .unwrap();

    let events = lifecycle_events(frame);
    assert_eq!(events.len(), 1);
    let LinkEvent::Message(msg) = &events[0] else {
        panic!("expected a message event");
    };
    assert_eq!(msg.id, "A1");
    assert_eq!(msg.sender, "966500000000");
    assert_eq!(msg.sender_name.as_deref(), Some("Sara"));
    assert_eq!(msg.content.text(), Some("المنيو"));
    assert_eq!(msg.timestamp.timestamp(), 1_700_000_000);
}

#[test]
fn test_wrapped_extended_text_is_unwrapped() {
    let raw: WaMessage = serde_json::from_value(json!({
        "key": {"id": "B1", "remoteJid": "120363@g.us", "participant": "555@s.whatsapp.net"},
        "message": {
            "ephemeralMessage": {
                "message": {"extendedTextMessage": {"text": "hi there"}}
            }
        },
        "messageTimestamp": "1700000001"
    }))
    .unwrap();

    let msg = to_inbound(raw).unwrap();
    assert_eq!(msg.chat_id, "120363@g.us");
    assert_eq!(msg.sender, "555");
    assert_eq!(msg.content.text(), Some("hi there"));
    assert_eq!(msg.timestamp.timestamp(), 1_700_000_001);
}

#[test]
fn test_document_message_resolved() {
    let raw: WaMessage = serde_json::from_value(json!({
        "key": {"id": "C1", "remoteJid": "111@s.whatsapp.net", "fromMe": true},
        "message": {"documentMessage": {"fileName": "menu.pdf", "mimetype": "application/pdf"}}
    }))
    .unwrap();

    let msg = to_inbound(raw).unwrap();
    assert!(msg.from_me);
    assert_eq!(
        msg.content,
        InboundContent::Document {
            file_name: Some("menu.pdf".into()),
            mimetype: Some("application/pdf".into()),
        }
    );
}

#[test]
fn test_unknown_body_is_other() {
    let raw: WaMessage = serde_json::from_value(json!({
        "key": {"id": "D1", "remoteJid": "111@s.whatsapp.net"},
        "message": {"imageMessage": {"caption": "x"}}
    }))
    .unwrap();
    assert_eq!(to_inbound(raw).unwrap().content, InboundContent::Other);
}

#[test]
fn test_reply_frames_parse() {
    let ack: BridgeFrame =
        serde_json::from_value(json!({"type": "ack", "requestId": "r1", "messageId": "3EB0"}))
            .unwrap();
    assert!(matches!(ack, BridgeFrame::Ack { ref request_id, ref message_id }
        if request_id == "r1" && message_id == "3EB0"));

    let groups: BridgeFrame = serde_json::from_value(json!({
        "type": "groups",
        "requestId": "r2",
        "groups": [{"id": "1@g.us", "subject": "Friends", "participants": [{"id": "111@s.whatsapp.net"}]}]
    }))
    .unwrap();
    let BridgeFrame::Groups { groups, .. } = groups else {
        panic!("expected groups frame");
    };
    let info: Vec<GroupInfo> = groups.into_iter().map(GroupInfo::from).collect();
    assert_eq!(info[0].name, "Friends");
    assert_eq!(info[0].participants, vec!["111@s.whatsapp.net"]);

    let err: BridgeFrame =
        serde_json::from_value(json!({"type": "error", "error": "boom"})).unwrap();
    assert!(matches!(err, BridgeFrame::Error { request_id: None, .. }));
}

#[test]
fn test_client_frames_serialize() {
    let hello = serde_json::to_value(ClientFrame::Hello {
        auth_state: "auth_info".into(),
        creds: None,
    })
    .unwrap();
    assert_eq!(
        hello,
        json!({"type": "hello", "authState": "auth_info", "creds": null})
    );

    let send = ClientFrame::Send {
        request_id: "r1".into(),
        to: "111@s.whatsapp.net".into(),
        text: Some("hello".into()),
        document: None,
    };
    assert_eq!(send.request_id(), Some("r1"));
    assert_eq!(
        serde_json::to_value(&send).unwrap(),
        json!({"type": "send", "requestId": "r1", "to": "111@s.whatsapp.net", "text": "hello"})
    );

    let fetch = serde_json::to_value(ClientFrame::FetchGroups {
        request_id: "r2".into(),
    })
    .unwrap();
    assert_eq!(fetch["type"], "fetch_groups");
}

// --- bridge socket ---

#[tokio::test]
async fn test_ack_read_while_events_back_up() {
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let bridge = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let hello = ws.next().await.unwrap().unwrap();
        let hello: Value = serde_json::from_str(hello.to_text().unwrap()).unwrap();
        assert_eq!(hello["type"], "hello");

        // More events than the link's event channel holds, none of them read.
        for i in 0..600 {
            let frame = json!({
                "type": "messages.upsert",
                "messages": [{
                    "key": {"id": format!("m{i}"), "remoteJid": "111@s.whatsapp.net"},
                    "message": {"conversation": "hi"}
                }]
            });
            ws.send(Message::Text(frame.to_string().into())).await.unwrap();
        }

        while let Some(Ok(msg)) = ws.next().await {
            let Ok(text) = msg.to_text() else { continue };
            let Ok(frame) = serde_json::from_str::<Value>(text) else {
                continue;
            };
            if frame["type"] == "send" {
                let ack = json!({"type": "ack", "requestId": frame["requestId"], "messageId": "ACK-1"});
                ws.send(Message::Text(ack.to_string().into())).await.unwrap();
            }
        }
    });

    let connector = BridgeConnector::new(&format!("ws://{addr}"), Duration::from_secs(5));
    let session = connector.connect("auth_info", None).await.unwrap();

    // Let the bridge flood the socket before sending.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let id = session
        .link
        .send("111@s.whatsapp.net", &OutboundPayload::text("hello"))
        .await
        .unwrap();
    assert_eq!(id, "ACK-1");

    drop(session);
    bridge.abort();
}
