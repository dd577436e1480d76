//! Command handle for a running room session

use super::snapshot::{RoomPhase, RoomSnapshot};
use crate::media::LocalStream;
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

pub(crate) enum SessionCommand {
    SetAudio {
        enabled: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    SetVideo {
        enabled: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    ToggleAudio {
        reply: oneshot::Sender<Result<bool>>,
    },
    ToggleVideo {
        reply: oneshot::Sender<Result<bool>>,
    },
    Leave {
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Cloneable handle to the session actor
///
/// Commands are applied in the actor between inbound events. Once every
/// handle is dropped the actor leaves the room on its own.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    snapshot: watch::Receiver<RoomSnapshot>,
    local_stream: Option<Arc<dyn LocalStream>>,
}

impl SessionHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<SessionCommand>,
        snapshot: watch::Receiver<RoomSnapshot>,
        local_stream: Option<Arc<dyn LocalStream>>,
    ) -> Self {
        Self {
            commands,
            snapshot,
            local_stream,
        }
    }

    /// Current room view
    pub fn snapshot(&self) -> RoomSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that changes whenever the room view does
    pub fn subscribe(&self) -> watch::Receiver<RoomSnapshot> {
        self.snapshot.clone()
    }

    /// Local capture, for preview rendering
    pub fn local_stream(&self) -> Option<Arc<dyn LocalStream>> {
        self.local_stream.clone()
    }

    pub async fn set_audio_enabled(&self, enabled: bool) -> Result<()> {
        self.request(|reply| SessionCommand::SetAudio { enabled, reply })
            .await?
    }

    pub async fn set_video_enabled(&self, enabled: bool) -> Result<()> {
        self.request(|reply| SessionCommand::SetVideo { enabled, reply })
            .await?
    }

    pub async fn toggle_audio(&self) -> Result<bool> {
        self.request(|reply| SessionCommand::ToggleAudio { reply })
            .await?
    }

    pub async fn toggle_video(&self) -> Result<bool> {
        self.request(|reply| SessionCommand::ToggleVideo { reply })
            .await?
    }

    /// Leave the room; succeeds immediately if the session is already gone
    pub async fn leave(&self) -> Result<()> {
        if self.snapshot.borrow().phase == RoomPhase::Left {
            return Ok(());
        }
        match self.request(|reply| SessionCommand::Leave { reply }).await {
            Ok(result) => result,
            Err(Error::SessionClosed(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| Error::SessionClosed("session actor has exited".to_string()))?;
        rx.await
            .map_err(|_| Error::SessionClosed("session actor dropped the request".to_string()))
    }
}
