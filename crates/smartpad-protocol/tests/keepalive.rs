//! Integration tests: keepalive, deadman timeout and message dispatch over
//! the in-memory channel.

use std::collections::VecDeque;
use std::time::Duration;

use smartpad_protocol::wire::{decode_frame, encode_frame};
use smartpad_protocol::{
    channel_pair, Channel, ChannelEvent, ChannelHandle, ConnectionHandler, KeepAliveConfig, Link,
    LinkControl, PeerConnection, ProtocolError,
};
use smartpad_types::{kind, Message, MessageId, Payload};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, PartialEq)]
enum Seen {
    Message(Message),
    Closed,
    Error(String),
}

struct Recorder {
    tx: mpsc::UnboundedSender<Seen>,
}

impl ConnectionHandler for Recorder {
    fn on_message(&mut self, _link: &mut Link, message: Message) {
        let _ = self.tx.send(Seen::Message(message));
    }

    fn on_connection_close(&mut self, _link: &mut Link) {
        let _ = self.tx.send(Seen::Closed);
    }

    fn on_connection_error(&mut self, _link: &mut Link, reason: String) {
        let _ = self.tx.send(Seen::Error(reason));
    }
}

struct Peer {
    control: LinkControl,
    seen: mpsc::UnboundedReceiver<Seen>,
    task: JoinHandle<Recorder>,
}

fn start(handle: ChannelHandle, keep_alive: bool) -> Peer {
    let (tx, seen) = mpsc::unbounded_channel();
    let (mut connection, control) =
        PeerConnection::new(KeepAliveConfig::default(), Recorder { tx });
    connection.attach(handle);
    connection.link_mut().set_keep_alive(keep_alive);
    let task = tokio::spawn(connection.run());
    Peer {
        control,
        seen,
        task,
    }
}

fn send_raw(channel: &dyn Channel, id: MessageId, kind: &str, data: Payload) {
    let mut message = Message::new(kind, data);
    message.id = id;
    channel.send(encode_frame(&message).unwrap());
}

async fn next_message(events: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> Message {
    loop {
        match events.recv().await {
            Some(ChannelEvent::Data(frame)) => return decode_frame(&frame).unwrap(),
            Some(ChannelEvent::Open) => {}
            other => panic!("expected a frame, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn ping_elicits_exactly_one_pong() {
    let (a, b) = channel_pair("host", "phone");
    let _peer = start(a.handle, false);
    let (raw, mut raw_events) = b.handle.into_parts();

    send_raw(raw.as_ref(), 41, kind::PING, Payload::None);

    let pong = next_message(&mut raw_events).await;
    assert_eq!(pong.kind, kind::PONG);
    assert_eq!(pong.data, Payload::Pong { id: 41 });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(raw_events.try_recv().is_err());
}

#[tokio::test]
async fn untyped_messages_never_reach_the_handler() {
    let (a, b) = channel_pair("host", "phone");
    let mut peer = start(a.handle, false);
    let raw = b.handle.channel();

    send_raw(raw, 0, "", Payload::None);
    send_raw(raw, 1, "", Payload::Bytes(vec![1, 2, 3]));
    let mut button = Message::button_update(5, true);
    button.id = 2;
    raw.send(encode_frame(&button).unwrap());

    assert_eq!(peer.seen.recv().await, Some(Seen::Message(button)));
}

#[tokio::test(start_paused = true)]
async fn silent_peer_is_closed_once_and_pings_stop() {
    let (a, b) = channel_pair("host", "phone");
    let mut peer = start(a.handle, true);
    let (_raw, mut raw_events) = b.handle.into_parts();
    let started = Instant::now();

    assert_eq!(peer.seen.recv().await, Some(Seen::Closed));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(5000), "closed after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(5100), "closed after {elapsed:?}");
    peer.task.await.unwrap();

    let mut ping_ids = Vec::new();
    loop {
        match raw_events.try_recv() {
            Ok(ChannelEvent::Open) => {}
            Ok(ChannelEvent::Data(frame)) => {
                let ping: Message = decode_frame(&frame).unwrap();
                assert_eq!(ping.kind, kind::PING);
                ping_ids.push(ping.id);
            }
            Ok(ChannelEvent::Close) => break,
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert!((45..=51).contains(&ping_ids.len()), "{} pings", ping_ids.len());
    assert!(ping_ids.windows(2).all(|w| w[1] > w[0]));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(raw_events.try_recv().is_err());
    assert!(peer.seen.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn answered_pings_keep_both_ends_alive() {
    let (a, b) = channel_pair("host", "phone");
    let host = start(a.handle, true);
    let phone = start(b.handle, true);

    tokio::time::sleep(Duration::from_secs(30)).await;

    assert!(host.control.is_running());
    assert!(phone.control.is_running());
    let stats = host.control.stats();
    assert_eq!(stats.samples, KeepAliveConfig::default().stored_pings);
    assert_eq!(stats.average_ping, Some(Duration::ZERO));
}

#[tokio::test(start_paused = true)]
async fn pongs_slower_than_the_interval_are_sampled() {
    const LATE: Duration = Duration::from_millis(150);

    let (a, b) = channel_pair("host", "phone");
    let host = start(a.handle, true);
    let (raw, mut raw_events) = b.handle.into_parts();

    let phone = tokio::spawn(async move {
        let mut due: VecDeque<(Instant, MessageId)> = VecDeque::new();
        loop {
            let next = due.front().map(|&(at, _)| at);
            tokio::select! {
                event = raw_events.recv() => match event {
                    Some(ChannelEvent::Data(frame)) => {
                        let ping: Message = decode_frame(&frame).unwrap();
                        if ping.kind == kind::PING {
                            due.push_back((Instant::now() + LATE, ping.id));
                        }
                    }
                    Some(ChannelEvent::Open) => {}
                    Some(_) | None => break,
                },
                () = async {
                    match next {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                } => {
                    if let Some((_, id)) = due.pop_front() {
                        send_raw(raw.as_ref(), 0, kind::PONG, Payload::Pong { id });
                    }
                }
            }
        }
    });

    tokio::time::sleep(Duration::from_secs(3)).await;

    assert!(host.control.is_running());
    let stats = host.control.stats();
    assert_eq!(stats.samples, KeepAliveConfig::default().stored_pings);
    assert_eq!(stats.last_ping, Some(LATE));
    assert_eq!(stats.average_ping, Some(LATE));
    phone.abort();
}

#[tokio::test(start_paused = true)]
async fn stalled_channel_is_detected_by_deadman() {
    let (a, b) = channel_pair("host", "phone");
    let stall = b.control.clone();
    let mut host = start(a.handle, true);
    let mut phone = start(b.handle, true);

    tokio::time::sleep(Duration::from_secs(1)).await;
    stall.stall(true);
    let stalled_at = Instant::now();

    assert_eq!(host.seen.recv().await, Some(Seen::Closed));
    assert_eq!(phone.seen.recv().await, Some(Seen::Closed));
    let elapsed = stalled_at.elapsed();
    assert!(elapsed >= Duration::from_millis(4900), "closed after {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(5100), "closed after {elapsed:?}");

    host.task.await.unwrap();
    phone.task.await.unwrap();
    assert!(host.seen.try_recv().is_err());
    assert!(phone.seen.try_recv().is_err());
}

#[tokio::test]
async fn channel_error_is_terminal() {
    let (a, _b) = channel_pair("host", "phone");
    let inject = a.control.clone();
    let mut peer = start(a.handle, true);

    inject.inject_error("ice failed");
    assert_eq!(
        peer.seen.recv().await,
        Some(Seen::Error("ice failed".to_string()))
    );
    peer.task.await.unwrap();
    assert!(peer.seen.try_recv().is_err());
    assert!(!inject.is_open());
}

#[tokio::test]
async fn close_command_reaches_both_ends() {
    let (a, b) = channel_pair("host", "phone");
    let mut peer = start(a.handle, false);
    let (_raw, mut raw_events) = b.handle.into_parts();

    peer.control.close().unwrap();
    assert_eq!(peer.seen.recv().await, Some(Seen::Closed));
    peer.control.closed().await;

    assert_eq!(raw_events.recv().await, Some(ChannelEvent::Open));
    assert_eq!(raw_events.recv().await, Some(ChannelEvent::Close));
    assert!(matches!(
        peer.control.send(Message::button_update(0, true)),
        Err(ProtocolError::ConnectionGone)
    ));
}

#[tokio::test]
async fn replaced_channel_no_longer_reaches_handler() {
    let (old_a, old_b) = channel_pair("host", "old-phone");
    let (new_a, new_b) = channel_pair("host", "new-phone");
    let (tx, mut seen) = mpsc::unbounded_channel();
    let (mut connection, control) =
        PeerConnection::new(KeepAliveConfig::default(), Recorder { tx });
    connection.attach(old_a.handle);
    connection.attach(new_a.handle);
    assert_eq!(connection.link().peer(), Some("new-phone"));
    tokio::spawn(connection.run());

    old_b.control.close();
    send_raw(old_b.handle.channel(), 0, kind::BUTTON_UPDATE, Payload::None);
    let mut sent = Message::axis_update(1, 0.5, -0.3);
    sent.id = 7;
    new_b.handle.channel().send(encode_frame(&sent).unwrap());

    assert_eq!(seen.recv().await, Some(Seen::Message(sent)));
    assert!(control.is_running());
}

#[tokio::test]
async fn queued_sends_get_increasing_ids() {
    let (a, b) = channel_pair("host", "phone");
    let peer = start(a.handle, false);
    let (_raw, mut raw_events) = b.handle.into_parts();

    for index in 0..10 {
        peer.control
            .send(Message::button_update(index, index % 2 == 0))
            .unwrap();
    }

    let mut last = None;
    for _ in 0..10 {
        let message = next_message(&mut raw_events).await;
        if let Some(previous) = last {
            assert!(message.id > previous);
        }
        last = Some(message.id);
    }
}
