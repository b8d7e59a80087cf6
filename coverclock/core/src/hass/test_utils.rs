//! Scripted Home Assistant WebSocket server for tests

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use super::url::BaseUrl;

/// One frame pushed after a successful subscribe
#[derive(Clone, Debug)]
pub(crate) enum ScriptedFrame {
    /// Sent verbatim
    Raw(String),
    /// `state_changed` for the client's subscription: (entity, state)
    Event(String, String),
    /// `state_changed` tagged with a different subscription id
    ForeignEvent(String, String),
}

/// Behavior of one accepted connection
#[derive(Clone, Debug)]
pub(crate) struct ConnectionScript {
    pub greeting: String,
    pub auth_reply: String,
    pub subscribe_success: bool,
    pub frames: Vec<ScriptedFrame>,
    /// Close after the frames instead of holding the connection open
    pub close_after_frames: bool,
}

impl ConnectionScript {
    /// Well-behaved server that pushes `frames` and stays connected
    pub(crate) fn streaming(frames: Vec<ScriptedFrame>) -> Self {
        Self {
            greeting: json!({"type": "auth_required", "ha_version": "2024.6.0"}).to_string(),
            auth_reply: json!({"type": "auth_ok", "ha_version": "2024.6.0"}).to_string(),
            subscribe_success: true,
            frames,
            close_after_frames: false,
        }
    }

    /// Well-behaved server that pushes `frames` and hangs up
    pub(crate) fn dropping(frames: Vec<ScriptedFrame>) -> Self {
        Self {
            close_after_frames: true,
            ..Self::streaming(frames)
        }
    }
}

/// Loopback server; connection `n` follows script `n`, the last script repeats
pub(crate) struct FakeHass {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<Value>>>,
    connections: Arc<AtomicUsize>,
    accept_loop: JoinHandle<()>,
}

impl FakeHass {
    pub(crate) async fn start(scripts: Vec<ConnectionScript>) -> Self {
        assert!(!scripts.is_empty(), "at least one script required");
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let accept_loop = tokio::spawn({
            let received = Arc::clone(&received);
            let connections = Arc::clone(&connections);
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let n = connections.fetch_add(1, Ordering::SeqCst);
                    let script = scripts[n.min(scripts.len() - 1)].clone();
                    tokio::spawn(serve(stream, script, Arc::clone(&received)));
                }
            }
        });

        Self {
            addr,
            received,
            connections,
            accept_loop,
        }
    }

    pub(crate) fn base_url(&self) -> BaseUrl {
        BaseUrl::parse(&format!("http://{}", self.addr)).unwrap()
    }

    /// Every JSON message received from clients, in arrival order
    pub(crate) fn received(&self) -> Vec<Value> {
        self.received.lock().clone()
    }

    /// Number of accepted TCP connections
    pub(crate) fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for FakeHass {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

async fn serve(stream: TcpStream, script: ConnectionScript, received: Arc<Mutex<Vec<Value>>>) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };

    if ws.send(Message::Text(script.greeting.clone())).await.is_err() {
        return;
    }
    if read_json(&mut ws, &received).await.is_none() {
        return;
    }
    if ws.send(Message::Text(script.auth_reply.clone())).await.is_err() {
        return;
    }
    if !script.auth_reply.contains("auth_ok") {
        drain(&mut ws, &received).await;
        return;
    }

    let Some(subscribe) = read_json(&mut ws, &received).await else {
        return;
    };
    let id = subscribe["id"].as_u64().unwrap_or(0);
    let reply = json!({"id": id, "type": "result", "success": script.subscribe_success, "result": null});
    if ws.send(Message::Text(reply.to_string())).await.is_err() {
        return;
    }
    if !script.subscribe_success {
        drain(&mut ws, &received).await;
        return;
    }

    for frame in &script.frames {
        let text = match frame {
            ScriptedFrame::Raw(text) => text.clone(),
            ScriptedFrame::Event(entity, state) => event_json(id, entity, state),
            ScriptedFrame::ForeignEvent(entity, state) => event_json(id + 100, entity, state),
        };
        if ws.send(Message::Text(text)).await.is_err() {
            return;
        }
    }

    if script.close_after_frames {
        let _ = ws.close(None).await;
        return;
    }
    drain(&mut ws, &received).await;
}

/// Log client messages and answer pings until the client goes away
async fn drain(ws: &mut WebSocketStream<TcpStream>, received: &Arc<Mutex<Vec<Value>>>) {
    while let Some(value) = read_json(ws, received).await {
        if value["type"] == "ping" {
            let pong = json!({"id": value["id"], "type": "pong"});
            if ws.send(Message::Text(pong.to_string())).await.is_err() {
                return;
            }
        }
    }
}

async fn read_json(
    ws: &mut WebSocketStream<TcpStream>,
    received: &Arc<Mutex<Vec<Value>>>,
) -> Option<Value> {
    loop {
        match ws.next().await? {
            Ok(Message::Text(text)) => {
                let value: Value = serde_json::from_str(&text).ok()?;
                received.lock().push(value.clone());
                return Some(value);
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

pub(crate) fn event_json(id: u64, entity: &str, state: &str) -> String {
    json!({
        "id": id,
        "type": "event",
        "event": {
            "event_type": "state_changed",
            "data": {
                "entity_id": entity,
                "old_state": null,
                "new_state": {"entity_id": entity, "state": state, "attributes": {}}
            }
        }
    })
    .to_string()
}
