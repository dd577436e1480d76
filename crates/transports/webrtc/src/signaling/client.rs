//! WebSocket signaling client for the named-event room protocol

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use meshcall_core::{Error, PeerId, Result, SignalingCommand, SignalingEvent, SignalingTransport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, instrument, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// How long `connect` waits for the server to assign our connection id
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket signaling transport
///
/// Outbound frames are queued to a sender task; inbound frames are parsed by
/// a receiver task and forwarded to the session actor. The receiver task
/// raises [`SignalingEvent::Disconnected`] when the socket goes away.
pub struct WsSignalingTransport {
    url: String,
    tx: mpsc::UnboundedSender<Message>,
    peer_id: Arc<OnceLock<PeerId>>,
    closed: Arc<AtomicBool>,
}

impl WsSignalingTransport {
    /// Connect and wait for the `connected` handshake
    ///
    /// Returns the transport together with the inbound event stream expected
    /// by `SessionManager::start`.
    #[instrument(skip(buffer))]
    pub async fn connect(
        url: &str,
        buffer: usize,
    ) -> Result<(Arc<Self>, mpsc::Receiver<SignalingEvent>)> {
        Self::connect_with_timeout(url, buffer, HANDSHAKE_TIMEOUT).await
    }

    pub async fn connect_with_timeout(
        url: &str,
        buffer: usize,
        handshake_timeout: Duration,
    ) -> Result<(Arc<Self>, mpsc::Receiver<SignalingEvent>)> {
        info!("Connecting to signaling server: {}", url);

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::SignalingError(format!("Failed to connect: {}", e)))?;

        let (write, read) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(buffer);
        let (handshake_tx, handshake_rx) = oneshot::channel();

        let peer_id = Arc::new(OnceLock::new());
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(Self::sender_task(write, rx));
        tokio::spawn(Self::receiver_task(
            read,
            events_tx,
            Arc::clone(&peer_id),
            Arc::clone(&closed),
            handshake_tx,
        ));

        let transport = Arc::new(Self {
            url: url.to_string(),
            tx,
            peer_id,
            closed,
        });

        match tokio::time::timeout(handshake_timeout, handshake_rx).await {
            Ok(Ok(id)) => {
                info!("Connected to signaling server as {}", id);
                Ok((transport, events_rx))
            }
            Ok(Err(_)) => {
                transport.shutdown();
                Err(Error::TransportDisconnected(
                    "Socket closed before the handshake".to_string(),
                ))
            }
            Err(_) => {
                transport.shutdown();
                Err(Error::SignalingError(format!(
                    "No connection id from {} within {}s",
                    url,
                    handshake_timeout.as_secs()
                )))
            }
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sender task: sends messages from channel to WebSocket
    async fn sender_task(
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
    ) {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = write.send(msg).await {
                error!("Failed to send WebSocket message: {}", e);
                break;
            }
            if closing {
                break;
            }
        }

        debug!("Sender task terminated");
    }

    /// Receiver task: parses frames and forwards them to the session actor
    async fn receiver_task(
        mut read: futures::stream::SplitStream<WsStream>,
        events: mpsc::Sender<SignalingEvent>,
        peer_id: Arc<OnceLock<PeerId>>,
        closed: Arc<AtomicBool>,
        handshake: oneshot::Sender<PeerId>,
    ) {
        let mut handshake = Some(handshake);

        let reason = loop {
            let text = match read.next().await {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(frame))) => {
                    break frame
                        .map(|f| f.reason.to_string())
                        .unwrap_or_else(|| "closed by server".to_string());
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => break format!("WebSocket error: {}", e),
                None => break "stream ended".to_string(),
            };

            let event = match SignalingEvent::from_json(&text) {
                Ok(event) => event,
                Err(e) => {
                    warn!("Dropping unparseable signaling frame: {}", e);
                    continue;
                }
            };
            debug!("Received signaling event: {}", event.event_name());

            if let SignalingEvent::Connected { peer_id: id } = &event {
                if peer_id.set(id.clone()).is_err() {
                    warn!("Ignoring repeated handshake ({})", id);
                }
                if let Some(done) = handshake.take() {
                    let _ = done.send(id.clone());
                }
                continue;
            }

            if events.send(event).await.is_err() {
                debug!("Session stopped listening; closing receiver");
                return;
            }
        };

        if closed.load(Ordering::Acquire) {
            debug!("Signaling socket closed ({})", reason);
        } else {
            warn!("Signaling connection lost: {}", reason);
            let _ = events.send(SignalingEvent::Disconnected { reason }).await;
        }

        debug!("Receiver task terminated");
    }

    fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.tx.send(Message::Close(None));
        }
    }
}

#[async_trait]
impl SignalingTransport for WsSignalingTransport {
    fn local_peer_id(&self) -> Option<PeerId> {
        self.peer_id.get().cloned()
    }

    async fn send(&self, command: SignalingCommand) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::TransportDisconnected(format!(
                "Cannot send {} on a closed transport",
                command.event_name()
            )));
        }

        let json = command.to_json()?;
        debug!("Sending signaling event: {}", command.event_name());
        self.tx
            .send(Message::Text(json))
            .map_err(|_| Error::TransportDisconnected("Sender task has exited".to_string()))
    }

    async fn close(&self) -> Result<()> {
        info!("Closing signaling connection to {}", self.url);
        self.shutdown();
        Ok(())
    }
}
