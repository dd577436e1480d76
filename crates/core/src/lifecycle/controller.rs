//! Call lifecycle on top of a room session
//!
//! The controller watches the room snapshot and enforces how a call ends:
//! an explicit request must be confirmed, back navigation counts as a
//! request, and a call left without any remote peer for the solo timeout
//! ends on its own.

use crate::presence::PresenceStore;
use crate::session::{RoomPhase, RoomSnapshot, SessionHandle};
use crate::{Error, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Sleep};
use tracing::{debug, info, warn};

/// Where the call is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Active,
    /// Waiting for the user to confirm ending the call
    ConfirmingEnd,
    /// Terminal
    Ended(EndReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// User confirmed the end request
    Confirmed,
    /// No remote peer for the whole solo timeout
    SoloTimeout,
    /// The room session went away underneath the call
    SessionClosed,
}

/// Published controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallStatus {
    pub phase: CallPhase,
    /// Deadline of the solo timer while it is armed
    pub solo_deadline: Option<Instant>,
}

impl CallStatus {
    pub fn is_ended(&self) -> bool {
        matches!(self.phase, CallPhase::Ended(_))
    }

    pub fn solo_timer_armed(&self) -> bool {
        self.solo_deadline.is_some()
    }
}

/// Inputs from the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallInput {
    RequestEnd,
    BackNavigation,
    ConfirmEnd,
    CancelEnd,
}

/// What the presence record needs to know about this call
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub meeting_url: String,
    pub room_id: String,
    pub caller_id: String,
    pub callee_ids: Vec<String>,
    pub caller_name: String,
}

/// Handle to a running call
pub struct CallHandle {
    inputs: mpsc::Sender<CallInput>,
    status: watch::Receiver<CallStatus>,
    session: SessionHandle,
    task: JoinHandle<()>,
}

impl CallHandle {
    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn status(&self) -> CallStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallStatus> {
        self.status.clone()
    }

    /// Ask to end the call; needs [`CallHandle::confirm_end`] to take effect
    pub async fn request_end(&self) -> Result<()> {
        self.send(CallInput::RequestEnd).await
    }

    /// Back navigation behaves like an end request
    pub async fn back_navigation(&self) -> Result<()> {
        self.send(CallInput::BackNavigation).await
    }

    pub async fn confirm_end(&self) -> Result<()> {
        self.send(CallInput::ConfirmEnd).await
    }

    pub async fn cancel_end(&self) -> Result<()> {
        self.send(CallInput::CancelEnd).await
    }

    /// Wait until the call has ended
    pub async fn ended(&self) -> EndReason {
        let mut status = self.status.clone();
        loop {
            if let CallPhase::Ended(reason) = status.borrow_and_update().phase {
                return reason;
            }
            if status.changed().await.is_err() {
                return match status.borrow().phase {
                    CallPhase::Ended(reason) => reason,
                    _ => EndReason::SessionClosed,
                };
            }
        }
    }

    /// Wait for the controller task to exit
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!("Call controller ended abnormally: {}", e);
        }
    }

    async fn send(&self, input: CallInput) -> Result<()> {
        if self.status().is_ended() {
            debug!("Ignoring {:?} after the call ended", input);
            return Ok(());
        }
        self.inputs
            .send(input)
            .await
            .map_err(|_| Error::SessionClosed("call controller has exited".to_string()))
    }
}

/// Drives the end-of-call rules for one room session
pub struct CallController {
    session: SessionHandle,
    presence: Arc<dyn PresenceStore>,
    record: CallRecord,
    solo_timeout: Duration,
    status: watch::Sender<CallStatus>,
    solo_timer: Option<Pin<Box<Sleep>>>,
    /// Pending presence write; joined before the record is marked ended
    recording: Option<JoinHandle<()>>,
}

impl CallController {
    /// Start supervising an already joined session
    pub fn spawn(
        session: SessionHandle,
        presence: Arc<dyn PresenceStore>,
        record: CallRecord,
        solo_timeout: Duration,
    ) -> CallHandle {
        let (inputs_tx, inputs_rx) = mpsc::channel(16);
        let (status_tx, status_rx) = watch::channel(CallStatus {
            phase: CallPhase::Active,
            solo_deadline: None,
        });

        let controller = Self {
            session: session.clone(),
            presence,
            record,
            solo_timeout,
            status: status_tx,
            solo_timer: None,
            recording: None,
        };
        let task = tokio::spawn(controller.run(inputs_rx));

        CallHandle {
            inputs: inputs_tx,
            status: status_rx,
            session,
            task,
        }
    }

    fn phase(&self) -> CallPhase {
        self.status.borrow().phase
    }

    fn set_phase(&mut self, phase: CallPhase) {
        debug!("Call phase {:?} -> {:?}", self.phase(), phase);
        self.status.send_modify(|s| s.phase = phase);
    }

    /// Arm the solo timer when alone, cancel it once someone is present
    fn update_solo_timer(&mut self, snapshot: &RoomSnapshot) {
        if snapshot.is_solo() {
            if self.solo_timer.is_none() {
                let deadline = Instant::now() + self.solo_timeout;
                info!(
                    "No remote participants; ending call in {}s unless someone joins",
                    self.solo_timeout.as_secs()
                );
                self.solo_timer = Some(Box::pin(tokio::time::sleep_until(deadline)));
                self.status.send_modify(|s| s.solo_deadline = Some(deadline));
            }
        } else if self.solo_timer.take().is_some() {
            info!("Participant present; solo timer cancelled");
            self.status.send_modify(|s| s.solo_deadline = None);
        }
    }

    /// Write the presence record off the control loop
    fn start_recording(&mut self) {
        let presence = Arc::clone(&self.presence);
        let record = self.record.clone();
        self.recording = Some(tokio::spawn(async move {
            if let Err(e) = presence
                .record_join(
                    &record.meeting_url,
                    &record.room_id,
                    &record.caller_id,
                    &record.callee_ids,
                    &record.caller_name,
                )
                .await
            {
                warn!("Failed to record call presence: {}", e);
            }
        }));
    }

    async fn run(mut self, mut inputs: mpsc::Receiver<CallInput>) {
        self.start_recording();

        let mut room = self.session.subscribe();
        let mut inputs_open = true;

        loop {
            let snapshot = room.borrow_and_update().clone();
            if snapshot.phase == RoomPhase::Left {
                self.finish(EndReason::SessionClosed).await;
                break;
            }
            self.update_solo_timer(&snapshot);

            let event = tokio::select! {
                changed = room.changed() => match changed {
                    Ok(()) => ControlEvent::RoomChanged,
                    Err(_) => ControlEvent::RoomGone,
                },
                input = inputs.recv(), if inputs_open => ControlEvent::Input(input),
                _ = solo_expired(&mut self.solo_timer) => ControlEvent::SoloExpired,
            };

            match event {
                ControlEvent::RoomChanged => {}
                ControlEvent::RoomGone => {
                    self.finish(EndReason::SessionClosed).await;
                    break;
                }
                ControlEvent::SoloExpired => {
                    info!("Alone for {}s; ending call", self.solo_timeout.as_secs());
                    self.finish(EndReason::SoloTimeout).await;
                    break;
                }
                ControlEvent::Input(Some(input)) => {
                    if self.handle_input(input).await {
                        break;
                    }
                }
                ControlEvent::Input(None) => inputs_open = false,
            }
        }

        debug!("Call controller exited");
    }

    /// Returns true once the call has ended
    async fn handle_input(&mut self, input: CallInput) -> bool {
        match (self.phase(), input) {
            (CallPhase::Active, CallInput::RequestEnd | CallInput::BackNavigation) => {
                self.set_phase(CallPhase::ConfirmingEnd);
            }
            (CallPhase::ConfirmingEnd, CallInput::ConfirmEnd) => {
                self.finish(EndReason::Confirmed).await;
                return true;
            }
            (CallPhase::ConfirmingEnd, CallInput::CancelEnd) => {
                self.set_phase(CallPhase::Active);
            }
            (phase, input) => debug!("Ignoring {:?} in phase {:?}", input, phase),
        }
        false
    }

    /// Mark the record ended, leave the room, then enter the terminal phase
    async fn finish(&mut self, reason: EndReason) {
        if matches!(self.phase(), CallPhase::Ended(_)) {
            return;
        }
        self.solo_timer = None;

        if let Some(recording) = self.recording.take() {
            if let Err(e) = recording.await {
                warn!("Presence write ended abnormally: {}", e);
            }
        }
        if let Err(e) = self.presence.mark_ended(&self.record.caller_id).await {
            warn!("Failed to mark call ended: {}", e);
        }
        if let Err(e) = self.session.leave().await {
            warn!("Leave failed while ending call: {}", e);
        }

        info!("Call ended ({:?})", reason);
        self.status.send_modify(|s| {
            s.phase = CallPhase::Ended(reason);
            s.solo_deadline = None;
        });
    }
}

enum ControlEvent {
    RoomChanged,
    RoomGone,
    Input(Option<CallInput>),
    SoloExpired,
}

/// Completes when the armed timer fires; pending forever when disarmed
fn solo_expired(timer: &mut Option<Pin<Box<Sleep>>>) -> impl Future<Output = ()> + '_ {
    async move {
        match timer.as_mut() {
            Some(timer) => timer.as_mut().await,
            None => std::future::pending().await,
        }
    }
}
