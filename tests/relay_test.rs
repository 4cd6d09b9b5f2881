//! Relay decision and delivery tests
//! Run with: cargo test --test relay_test

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{ensure_init, MockTransport, ALICE, BOT, MALLORY, ROOM};
use ledger_relay::application::messaging::REFUSAL;
use ledger_relay::application::services::{AllowList, Authorizer, Executor, Relay, SenderPolicy};
use ledger_relay::domain::entities::{Command, Identity, MessageType, OutgoingMessage, RoomEvent, RoomId};
use ledger_relay::domain::traits::EventHandler;

fn relay(transport: Arc<MockTransport>) -> Relay<MockTransport> {
    let bot = Identity::new(BOT);
    let allow = AllowList::parse(ALICE, &bot);
    Relay::new(transport, bot, Authorizer::new(allow), Executor::new(Duration::from_secs(5)))
}

fn cleared_room() -> Arc<MockTransport> {
    Arc::new(MockTransport::new().with_members(ROOM, &[ALICE, BOT]))
}

#[tokio::test]
async fn test_shell_command_end_to_end() {
    ensure_init();
    let transport = cleared_room();
    let relay = relay(transport.clone());

    relay.on_message(RoomEvent::text(ALICE, ROOM, "!sh echo hi")).await;

    assert_eq!(
        transport.sent(),
        vec![(
            RoomId::new(ROOM),
            OutgoingMessage::with_html("hi\n", "<pre>hi\n</pre>")
        )]
    );
}

#[tokio::test]
async fn test_echo_reply_is_plain() {
    let transport = cleared_room();
    relay(transport.clone())
        .on_message(RoomEvent::text(ALICE, ROOM, "!echo hello there"))
        .await;

    assert_eq!(transport.sent(), vec![(RoomId::new(ROOM), OutgoingMessage::plain("hello there"))]);
}

#[tokio::test]
async fn test_empty_reply_is_not_sent() {
    let transport = cleared_room();
    let relay = relay(transport.clone());
    relay.on_message(RoomEvent::text(ALICE, ROOM, "!echo ")).await;
    relay.on_message(RoomEvent::text(ALICE, ROOM, "!sh true")).await;
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn test_own_messages_never_produce_replies() {
    let transport = cleared_room();
    let relay = relay(transport.clone());

    for body in ["!sh echo hi", "!echo loop", "!ledger bal", "hello"] {
        let event = RoomEvent::text(BOT, ROOM, body);
        assert_eq!(relay.classify(&event), Command::None);
        assert!(relay.prepare_reply(&event).await.is_none());
    }
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn test_non_text_messages_are_ignored() {
    let transport = cleared_room();
    let relay = relay(transport.clone());

    relay
        .on_message(RoomEvent::message(ALICE, ROOM, MessageType::Notice, "!sh echo hi"))
        .await;
    relay
        .on_message(RoomEvent::message(ALICE, ROOM, MessageType::Other("m.image".into()), "!echo x"))
        .await;
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn test_plain_chatter_gets_no_reply() {
    let transport = cleared_room();
    relay(transport.clone())
        .on_message(RoomEvent::text(ALICE, ROOM, "good morning"))
        .await;
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn test_room_gate_replaces_output_with_refusal() {
    let transport = Arc::new(MockTransport::new().with_members(ROOM, &[ALICE, BOT, MALLORY]));
    relay(transport.clone())
        .on_message(RoomEvent::text(ALICE, ROOM, "!sh echo secret"))
        .await;

    assert_eq!(transport.sent(), vec![(RoomId::new(ROOM), OutgoingMessage::plain(REFUSAL))]);
}

#[tokio::test]
async fn test_membership_lookup_failure_closes_the_gate() {
    let transport = cleared_room();
    transport.fail_members.store(true, Ordering::SeqCst);
    relay(transport.clone())
        .on_message(RoomEvent::text(ALICE, ROOM, "!echo hi"))
        .await;

    assert_eq!(transport.sent(), vec![(RoomId::new(ROOM), OutgoingMessage::plain(REFUSAL))]);
}

#[tokio::test]
async fn test_replay_produces_identical_reply() {
    let transport = cleared_room();
    let relay = relay(transport);
    let event = RoomEvent::text(ALICE, ROOM, "!sh printf 'a\\nb'");

    let first = relay.prepare_reply(&event).await;
    let second = relay.prepare_reply(&event).await;
    assert!(first.is_some());
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_unlisted_sender_runs_commands_by_default() {
    // Only the reply visibility is gated: the room itself is all-allowed.
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("ran");
    let transport = cleared_room();
    let relay = relay(transport.clone());

    let body = format!("!sh touch {} && echo done", marker.display());
    relay.on_message(RoomEvent::text(MALLORY, ROOM, body)).await;

    assert!(marker.exists());
    assert_eq!(transport.sent()[0].1.body, "done\n");
}

#[tokio::test]
async fn test_strict_policy_discards_unlisted_senders() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("ran");
    let transport = cleared_room();
    let relay = relay(transport.clone()).with_sender_policy(SenderPolicy::RequireAllowed);

    let body = format!("!sh touch {}", marker.display());
    relay.on_message(RoomEvent::text(MALLORY, ROOM, body)).await;
    relay.on_message(RoomEvent::text(MALLORY, ROOM, "!echo hi")).await;

    assert!(!marker.exists());
    assert!(transport.sent().is_empty());

    relay.on_message(RoomEvent::text(ALICE, ROOM, "!echo hi")).await;
    assert_eq!(transport.sent().len(), 1);
}

#[tokio::test]
async fn test_failed_command_is_reported_to_room() {
    let transport = cleared_room();
    relay(transport.clone())
        .on_message(RoomEvent::text(ALICE, ROOM, "!sh exit 2"))
        .await;

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.body.starts_with("command failed: "), "{}", sent[0].1.body);
    assert!(sent[0].1.html.is_none());
}

#[tokio::test]
async fn test_ledger_command_keeps_executable_name() {
    let transport = cleared_room();
    let relay = relay(transport);
    let event = RoomEvent::text(ALICE, ROOM, "!ledger -f books.dat balance");
    assert_eq!(
        relay.classify(&event),
        Command::LedgerShell("ledger -f books.dat balance".to_string())
    );
}

#[tokio::test]
async fn test_send_failure_does_not_stop_later_events() {
    let transport = cleared_room();
    let relay = relay(transport.clone());

    transport.fail_sends.store(true, Ordering::SeqCst);
    relay.on_message(RoomEvent::text(ALICE, ROOM, "!echo lost")).await;
    transport.fail_sends.store(false, Ordering::SeqCst);
    relay.on_message(RoomEvent::text(ALICE, ROOM, "!echo delivered")).await;

    assert_eq!(transport.sent(), vec![(RoomId::new(ROOM), OutgoingMessage::plain("delivered"))]);
}

#[tokio::test]
async fn test_invite_from_listed_user_is_accepted() {
    let transport = Arc::new(MockTransport::new());
    relay(transport.clone())
        .dispatch(RoomEvent::invite(ALICE, "!new:example.com"))
        .await;
    assert_eq!(transport.joined(), vec![RoomId::new("!new:example.com")]);
}

#[tokio::test]
async fn test_invite_from_unlisted_user_is_ignored() {
    let transport = Arc::new(MockTransport::new());
    relay(transport.clone())
        .dispatch(RoomEvent::invite(MALLORY, "!trap:example.com"))
        .await;
    assert!(transport.joined().is_empty());
}

#[tokio::test]
async fn test_leave_changes_nothing() {
    let transport = cleared_room();
    relay(transport.clone())
        .dispatch(RoomEvent::leave(ALICE, ROOM))
        .await;
    assert!(transport.joined().is_empty());
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn test_join_before_reply() {
    let transport = cleared_room();
    relay(transport.clone())
        .with_join_before_reply(true)
        .on_message(RoomEvent::text(ALICE, ROOM, "!echo hi"))
        .await;
    assert_eq!(transport.joined(), vec![RoomId::new(ROOM)]);
    assert_eq!(transport.sent().len(), 1);
}

#[tokio::test]
async fn test_concurrent_events_are_independent() {
    let transport = cleared_room();
    let relay = Arc::new(relay(transport.clone()));

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let relay = relay.clone();
            tokio::spawn(async move {
                relay
                    .on_message(RoomEvent::text(ALICE, ROOM, format!("!sh echo {}", i)))
                    .await;
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let mut bodies: Vec<String> = transport.sent().into_iter().map(|(_, m)| m.body).collect();
    bodies.sort();
    assert_eq!(bodies, vec!["0\n", "1\n", "2\n", "3\n"]);
}
