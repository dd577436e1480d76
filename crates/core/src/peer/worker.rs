//! Per-peer worker task
//!
//! Each peer gets one task that owns its [`PeerSession`]. Inputs for that peer
//! queue on its own channel, so one peer's slow negotiation step never holds
//! up another peer or the room actor.

use super::link::{LinkEvent, PeerConnector};
use super::session::{PeerSession, PeerUpdate, PeerUpdateKind};
use crate::identity::PeerId;
use crate::media::LocalTrack;
use crate::signaling::{NegotiationMessage, SignalingTransport};
use crate::Result;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Everything a worker needs to bring up one peer
pub struct PeerWorkerConfig {
    pub peer_id: PeerId,
    pub local_peer_id: PeerId,
    pub epoch: u64,
    pub tracks: Vec<Arc<dyn LocalTrack>>,
    pub connector: Arc<dyn PeerConnector>,
    pub transport: Arc<dyn SignalingTransport>,
    pub updates: mpsc::UnboundedSender<PeerUpdate>,
}

/// Room-side handle to a running worker
///
/// Dropping the handle closes the session as well.
pub struct PeerWorkerHandle {
    inputs: mpsc::UnboundedSender<NegotiationMessage>,
    close: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PeerWorkerHandle {
    /// Queue a negotiation message; fails once the worker has exited
    pub fn deliver(&self, message: NegotiationMessage) -> Result<()> {
        self.inputs
            .send(message)
            .map_err(|_| crate::Error::SessionClosed("peer worker exited".to_string()))
    }

    /// Abandon in-flight negotiation and release the connection
    pub fn close(&self) {
        let _ = self.close.send(true);
    }

    /// Close and wait for the worker to finish
    pub async fn shutdown(self) {
        self.close();
        if let Err(e) = self.task.await {
            warn!("Peer worker ended abnormally: {}", e);
        }
    }
}

/// Spawn the worker for one peer
pub fn spawn_peer_worker(config: PeerWorkerConfig) -> PeerWorkerHandle {
    let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
    let (close_tx, close_rx) = watch::channel(false);

    let task = tokio::spawn(run_worker(config, inputs_rx, close_rx));

    PeerWorkerHandle {
        inputs: inputs_tx,
        close: close_tx,
        task,
    }
}

enum WorkerInput {
    Negotiation(NegotiationMessage),
    Link(LinkEvent),
    Closed,
}

enum Step<T> {
    Done(T),
    Closed,
}

/// Race `work` against the close signal
async fn until_closed<T>(
    close: &mut watch::Receiver<bool>,
    work: impl std::future::Future<Output = T>,
) -> Step<T> {
    tokio::select! {
        biased;
        _ = close.wait_for(|closed| *closed) => Step::Closed,
        value = work => Step::Done(value),
    }
}

async fn run_worker(
    config: PeerWorkerConfig,
    mut inputs: mpsc::UnboundedReceiver<NegotiationMessage>,
    mut close: watch::Receiver<bool>,
) {
    let PeerWorkerConfig {
        peer_id,
        local_peer_id,
        epoch,
        tracks,
        connector,
        transport,
        updates,
    } = config;

    let (link_tx, mut link_events) = mpsc::unbounded_channel();
    let link = match until_closed(&mut close, connector.connect(&peer_id, link_tx)).await {
        Step::Done(Ok(link)) => link,
        Step::Done(Err(e)) => {
            warn!("Failed to create connection for peer {}: {}", peer_id, e);
            let _ = updates.send(PeerUpdate {
                peer_id,
                epoch,
                kind: PeerUpdateKind::Failed(e.to_string()),
            });
            return;
        }
        Step::Closed => return,
    };

    let mut session = PeerSession::new(peer_id, local_peer_id, epoch, link, transport, updates);

    match until_closed(&mut close, session.start(&tracks)).await {
        Step::Done(Ok(())) => {}
        Step::Done(Err(e)) => {
            session.fail(e).await;
            return;
        }
        Step::Closed => {
            session.close().await;
            return;
        }
    }

    loop {
        let input = tokio::select! {
            biased;
            _ = close.wait_for(|closed| *closed) => WorkerInput::Closed,
            Some(message) = inputs.recv() => WorkerInput::Negotiation(message),
            Some(event) = link_events.recv() => WorkerInput::Link(event),
            else => WorkerInput::Closed,
        };

        let step = match input {
            WorkerInput::Negotiation(message) => {
                until_closed(&mut close, session.handle_negotiation(message)).await
            }
            WorkerInput::Link(event) => {
                until_closed(&mut close, session.handle_link_event(event)).await
            }
            WorkerInput::Closed => Step::Closed,
        };

        match step {
            Step::Done(Ok(())) if session.is_closed() => break,
            Step::Done(Ok(())) => {}
            Step::Done(Err(e)) => {
                session.fail(e).await;
                break;
            }
            Step::Closed => {
                session.close().await;
                break;
            }
        }
    }

    debug!("Peer worker {} exited", session.peer_id());
}
