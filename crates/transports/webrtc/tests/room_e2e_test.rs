//! Room end-to-end tests over a real WebSocket and webrtc-rs peers
//!
//! Only the signaling leg has to succeed: assertions stop at negotiation and
//! room membership, which do not depend on ICE reaching the other side.

mod harness;

use harness::{init_logging, Participant, RoomServer};
use meshcall_core::signaling::SdpKind;
use meshcall_core::{CallKind, RoomPhase, SignalingCommand};

const ROOM: &str = "room-1700000000000";

fn is_offer(command: &SignalingCommand, to: &str) -> bool {
    matches!(command, SignalingCommand::Offer { offer, to: target, .. }
        if offer.kind == SdpKind::Offer && target.as_str() == to)
}

fn is_answer(command: &SignalingCommand, to: &str) -> bool {
    matches!(command, SignalingCommand::Answer { answer, to: target, .. }
        if answer.kind == SdpKind::Answer && target.as_str() == to)
}

#[tokio::test]
async fn test_two_participants_negotiate_once() {
    init_logging();
    let server = RoomServer::start().await;

    let first = Participant::join(&server, ROOM, "Ada", CallKind::Video).await;
    let second = Participant::join(&server, ROOM, "Grace", CallKind::Video).await;
    assert_eq!(first.peer_id.as_str(), "1");
    assert_eq!(second.peer_id.as_str(), "2");

    first.wait_for(|s| s.peer_count() == 1).await;
    second.wait_for(|s| s.peer_count() == 1).await;

    // The lower id offers; the other side only answers
    server
        .wait_for(|log| {
            log.iter().any(|(from, c)| from.as_str() == "2" && is_answer(c, "1"))
        })
        .await;
    let first_offers = server
        .commands_from("1")
        .iter()
        .filter(|c| is_offer(c, "2"))
        .count();
    assert_eq!(first_offers, 1);
    assert!(!server.commands_from("2").iter().any(|c| is_offer(c, "1")));

    first.handle.leave().await.unwrap();
    second.handle.leave().await.unwrap();
}

#[tokio::test]
async fn test_mute_reaches_the_other_side() {
    init_logging();
    let server = RoomServer::start().await;

    let first = Participant::join(&server, ROOM, "Ada", CallKind::Audio).await;
    let second = Participant::join(&server, ROOM, "Grace", CallKind::Audio).await;
    second.wait_for(|s| s.peer_count() == 1).await;

    let enabled = first.handle.toggle_audio().await.unwrap();
    assert!(!enabled);

    let first_id = first.peer_id.clone();
    second
        .wait_for(|s| s.peer(&first_id).is_some_and(|p| !p.remote_audio_enabled))
        .await;

    first.handle.leave().await.unwrap();
    second.handle.leave().await.unwrap();
}

#[tokio::test]
async fn test_leaving_removes_peer_elsewhere() {
    init_logging();
    let server = RoomServer::start().await;

    let first = Participant::join(&server, ROOM, "Ada", CallKind::Video).await;
    let second = Participant::join(&server, ROOM, "Grace", CallKind::Video).await;
    first.wait_for(|s| s.peer_count() == 1).await;

    second.handle.leave().await.unwrap();
    assert_eq!(second.handle.snapshot().phase, RoomPhase::Left);
    assert!(server
        .commands_from("2")
        .contains(&SignalingCommand::LeaveRoom(ROOM.to_string())));

    first.wait_for(|s| s.peer_count() == 0).await;
    first.handle.leave().await.unwrap();
}
