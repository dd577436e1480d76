//! In-process room server speaking the named-event protocol over WebSocket

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use meshcall_core::{
    CallKind, LocalIdentity, MeshCallConfig, ParticipantRef, PeerId, SessionHandle,
    SessionManager, SignalingCommand, SignalingEvent, SignalingTransport,
};
use meshcall_webrtc::{SampleMediaSource, WebRtcConnector, WsSignalingTransport};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};

pub const WAIT: Duration = Duration::from_secs(10);

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,meshcall_core=debug,meshcall_webrtc=debug")
        .with_test_writer()
        .try_init();
}

struct Client {
    tx: mpsc::UnboundedSender<Message>,
    room: Option<String>,
}

#[derive(Default)]
struct RoomState {
    next_id: u64,
    clients: HashMap<PeerId, Client>,
    log: Vec<(PeerId, SignalingCommand)>,
}

/// Relays offers, answers and candidates by `to`, broadcasts the rest
#[derive(Clone)]
pub struct RoomServer {
    url: String,
    state: Arc<Mutex<RoomState>>,
}

impl RoomServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let server = Self {
            url,
            state: Arc::new(Mutex::new(RoomState::default())),
        };

        let accept = server.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(accept.clone().serve(stream));
            }
        });

        server
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn commands_from(&self, id: &str) -> Vec<SignalingCommand> {
        let peer = PeerId::from(id);
        self.state
            .lock()
            .unwrap()
            .log
            .iter()
            .filter(|(from, _)| from == &peer)
            .map(|(_, command)| command.clone())
            .collect()
    }

    /// Poll the command log until `check` holds
    pub async fn wait_for(&self, check: impl Fn(&[(PeerId, SignalingCommand)]) -> bool) {
        tokio::time::timeout(WAIT, async {
            loop {
                if check(&self.state.lock().unwrap().log) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("server log never matched");
    }

    async fn serve(self, stream: TcpStream) {
        let ws = accept_async(stream).await.unwrap();
        let (mut write, mut read) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        let id = {
            let mut state = self.state.lock().unwrap();
            state.next_id += 1;
            let id = PeerId::new(state.next_id.to_string());
            state.clients.insert(id.clone(), Client { tx: tx.clone(), room: None });
            id
        };

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if write.send(msg).await.is_err() {
                    break;
                }
            }
        });

        send(&tx, SignalingEvent::Connected { peer_id: id.clone() });

        while let Some(Ok(msg)) = read.next().await {
            match msg {
                Message::Text(text) => {
                    if let Ok(command) = SignalingCommand::from_json(&text) {
                        self.route(&id, command);
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }

        self.disconnect(&id);
    }

    fn route(&self, from: &PeerId, command: SignalingCommand) {
        let mut state = self.state.lock().unwrap();
        state.log.push((from.clone(), command.clone()));

        match command {
            SignalingCommand::JoinRoom { room_id, .. } => {
                let existing: Vec<ParticipantRef> = state
                    .clients
                    .iter()
                    .filter(|(id, c)| *id != from && c.room.as_deref() == Some(room_id.as_str()))
                    .map(|(id, _)| ParticipantRef::new(id.clone()))
                    .collect();
                if let Some(client) = state.clients.get_mut(from) {
                    client.room = Some(room_id.clone());
                    send(&client.tx, SignalingEvent::ExistingUsers(existing));
                }
                broadcast(
                    &state,
                    from,
                    &room_id,
                    SignalingEvent::UserJoined(ParticipantRef::new(from.clone())),
                );
            }
            SignalingCommand::Offer { offer, to, .. } => {
                relay(&state, &to, SignalingEvent::Offer { offer, from: from.clone() });
            }
            SignalingCommand::Answer { answer, to, .. } => {
                relay(&state, &to, SignalingEvent::Answer { answer, from: from.clone() });
            }
            SignalingCommand::IceCandidate { candidate, to, .. } => {
                relay(
                    &state,
                    &to,
                    SignalingEvent::IceCandidate {
                        candidate: Some(candidate),
                        from: from.clone(),
                    },
                );
            }
            SignalingCommand::ToggleAudio { room_id, is_enabled } => {
                let event = SignalingEvent::UserToggledAudio {
                    peer_id: from.clone(),
                    is_enabled,
                };
                broadcast(&state, from, &room_id, event);
            }
            SignalingCommand::ToggleVideo { room_id, is_enabled } => {
                let event = SignalingEvent::UserToggledVideo {
                    peer_id: from.clone(),
                    is_enabled,
                };
                broadcast(&state, from, &room_id, event);
            }
            SignalingCommand::LeaveRoom(room_id) => {
                broadcast(&state, from, &room_id, SignalingEvent::UserLeft(from.clone()));
                if let Some(client) = state.clients.get_mut(from) {
                    client.room = None;
                }
            }
        }
    }

    fn disconnect(&self, id: &PeerId) {
        let mut state = self.state.lock().unwrap();
        if let Some(Client { room: Some(room), .. }) = state.clients.remove(id) {
            broadcast(&state, id, &room, SignalingEvent::UserLeft(id.clone()));
        }
    }
}

fn send(tx: &mpsc::UnboundedSender<Message>, event: SignalingEvent) {
    let _ = tx.send(Message::Text(event.to_json().unwrap()));
}

fn relay(state: &RoomState, to: &PeerId, event: SignalingEvent) {
    if let Some(client) = state.clients.get(to) {
        send(&client.tx, event);
    }
}

fn broadcast(state: &RoomState, from: &PeerId, room: &str, event: SignalingEvent) {
    for (id, client) in &state.clients {
        if id != from && client.room.as_deref() == Some(room) {
            send(&client.tx, event.clone());
        }
    }
}

/// A participant wired with the production transport, connector and media
pub struct Participant {
    pub peer_id: PeerId,
    pub handle: SessionHandle,
}

impl Participant {
    pub async fn join(server: &RoomServer, room: &str, name: &str, kind: CallKind) -> Self {
        let config = MeshCallConfig {
            signaling_url: server.url().to_string(),
            ..Default::default()
        };
        let (transport, events) = WsSignalingTransport::connect(server.url(), config.event_buffer)
            .await
            .unwrap();
        let peer_id = transport.local_peer_id().unwrap();

        // Host candidates only
        let connector = Arc::new(WebRtcConnector::new(&[]).unwrap());
        let handle = SessionManager::new(
            config,
            transport,
            Arc::new(SampleMediaSource::new()),
            connector,
        )
        .start(room, LocalIdentity::new(format!("user-{}", name), name), kind, events)
        .await
        .unwrap();

        Self { peer_id, handle }
    }

    pub async fn wait_for<F>(&self, pred: F)
    where
        F: Fn(&meshcall_core::RoomSnapshot) -> bool,
    {
        let mut rx = self.handle.subscribe();
        tokio::time::timeout(WAIT, rx.wait_for(|s| pred(s)))
            .await
            .expect("snapshot never matched")
            .unwrap();
    }
}
