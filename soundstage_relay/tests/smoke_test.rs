// Integration smoke test for the relay server.
//
// Starts a relay on localhost and drives it with plain TCP sockets using the
// protocol crate's framing and message types: handshake, the four control
// events with their fan-out rules, state requests, malformed input, and
// disconnects. A final test runs the real `TransportSession` against it.

use std::io::{BufReader, BufWriter};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use soundstage_protocol::framing::{read_message, write_message};
use soundstage_protocol::message::{ClientMessage, ServerMessage};
use soundstage_protocol::types::ConnectionId;
use soundstage_relay::config::RelayConfig;
use soundstage_relay::server::{RelayHandle, start_relay};
use soundstage_relay::transport::{TransportConfig, TransportEvent, TransportSession};

struct RawClient {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    id: ConnectionId,
}

impl RawClient {
    fn send(&mut self, msg: &ClientMessage) {
        write_message(&mut self.writer, &msg.encode().unwrap()).unwrap();
    }

    fn send_raw(&mut self, json: &str) {
        write_message(&mut self.writer, json.as_bytes()).unwrap();
    }

    fn recv(&mut self) -> ServerMessage {
        recv(&mut self.reader)
    }

    /// Drain whatever arrives within a short window.
    fn drain(&mut self) -> Vec<ServerMessage> {
        let stream = self.reader.get_ref();
        stream
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        let mut messages = Vec::new();
        while let Ok(bytes) = read_message(&mut self.reader) {
            messages.push(ServerMessage::decode(&bytes).unwrap());
        }
        self.reader
            .get_ref()
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        messages
    }
}

fn recv(reader: &mut BufReader<TcpStream>) -> ServerMessage {
    let bytes = read_message(reader).unwrap();
    ServerMessage::decode(&bytes).unwrap()
}

fn start_test_relay(default_mode: Option<&str>) -> (RelayHandle, SocketAddr) {
    let config = RelayConfig {
        port: 0,
        default_story_mode: default_mode.map(String::from),
        ..RelayConfig::default()
    };
    start_relay(config).unwrap()
}

fn open(addr: SocketAddr) -> (BufReader<TcpStream>, BufWriter<TcpStream>) {
    let stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let reader = BufReader::new(stream.try_clone().unwrap());
    (reader, BufWriter::new(stream))
}

/// Connect and complete the handshake.
fn join(addr: SocketAddr, name: &str) -> RawClient {
    let (mut reader, mut writer) = open(addr);
    let hello = ClientMessage::Hello {
        protocol_version: 1,
        device_name: name.into(),
    };
    write_message(&mut writer, &hello.encode().unwrap()).unwrap();

    let id = match recv(&mut reader) {
        ServerMessage::Welcome { connection_id } => connection_id,
        other => panic!("expected Welcome, got {other:?}"),
    };
    RawClient { reader, writer, id }
}

#[test]
fn control_events_follow_fan_out_rules() {
    let (handle, addr) = start_test_relay(Some("classic"));

    let mut a = join(addr, "controller");
    let mut b = join(addr, "host");
    let mut c = join(addr, "tablet");
    assert_ne!(a.id, b.id);
    assert_ne!(b.id, c.id);

    // Joins are silent.
    assert!(a.drain().is_empty());

    a.send(&ClientMessage::PlaySound {
        sound_id: Some("thunder".into()),
    });
    let triggered = ServerMessage::SoundTriggered {
        sound_id: "thunder".into(),
    };
    assert_eq!(b.recv(), triggered);
    assert_eq!(c.recv(), triggered);

    a.send(&ClientMessage::FadeOut {
        duration_ms: Some(1000),
    });
    assert_eq!(b.recv(), ServerMessage::FadeOutTriggered { duration_ms: 1000 });
    assert_eq!(c.recv(), ServerMessage::FadeOutTriggered { duration_ms: 1000 });

    b.send(&ClientMessage::StopAll);
    assert_eq!(a.recv(), ServerMessage::StopAllTriggered);
    assert_eq!(c.recv(), ServerMessage::StopAllTriggered);

    c.send(&ClientMessage::ChangeStoryMode {
        mode_id: Some("forest".into()),
    });
    let changed = ServerMessage::StoryModeChanged {
        mode_id: "forest".into(),
    };
    assert_eq!(a.recv(), changed);
    assert_eq!(b.recv(), changed);
    assert_eq!(c.recv(), changed);

    // The senders never heard their own commands, and nobody got duplicates.
    assert!(a.drain().is_empty());
    assert!(b.drain().is_empty());
    assert!(c.drain().is_empty());

    handle.stop();
}

#[test]
fn shorthand_and_malformed_payloads_are_tolerated() {
    let (handle, addr) = start_test_relay(None);
    let mut a = join(addr, "controller");
    let mut b = join(addr, "host");

    a.send_raw(r#""fadeOut""#);
    assert_eq!(b.recv(), ServerMessage::FadeOutTriggered { duration_ms: 2000 });

    a.send_raw(r#"{"fadeOut":{"durationMs":"soon"}}"#);
    assert_eq!(b.recv(), ServerMessage::FadeOutTriggered { duration_ms: 2000 });

    a.send_raw(r#"{"playSound":"rain"}"#);
    assert_eq!(
        b.recv(),
        ServerMessage::SoundTriggered {
            sound_id: "rain".into()
        }
    );

    // Garbage is ignored and the connection stays usable.
    a.send_raw("{{{ not json");
    a.send_raw(r#"{"launchRockets":true}"#);
    a.send(&ClientMessage::StopAll);
    assert_eq!(b.recv(), ServerMessage::StopAllTriggered);

    handle.stop();
}

#[test]
fn late_joiner_can_ask_for_current_mode() {
    let (handle, addr) = start_test_relay(Some("classic"));

    let mut early = join(addr, "early");
    early.send(&ClientMessage::ChangeStoryMode {
        mode_id: Some("magic".into()),
    });
    assert!(matches!(early.recv(), ServerMessage::StoryModeChanged { .. }));

    let mut late = join(addr, "late");
    assert!(late.drain().is_empty(), "joining does not replay state");

    late.send(&ClientMessage::RequestState);
    assert_eq!(
        late.recv(),
        ServerMessage::CurrentState {
            story_mode: Some("magic".into())
        }
    );
    assert!(early.drain().is_empty());

    handle.stop();
}

#[test]
fn wrong_protocol_version_is_rejected() {
    let (handle, addr) = start_test_relay(None);
    let (mut reader, mut writer) = open(addr);

    let hello = ClientMessage::Hello {
        protocol_version: 99,
        device_name: "future".into(),
    };
    write_message(&mut writer, &hello.encode().unwrap()).unwrap();
    match recv(&mut reader) {
        ServerMessage::Rejected { reason } => assert!(reason.contains("99"), "{reason}"),
        other => panic!("expected Rejected, got {other:?}"),
    }

    handle.stop();
}

#[test]
fn departed_connection_is_forgotten() {
    let (handle, addr) = start_test_relay(None);
    let mut a = join(addr, "a");
    let mut b = join(addr, "b");
    let departed_id = b.id;

    b.send(&ClientMessage::Goodbye);
    drop(b);
    // Leaving is silent too.
    assert!(a.drain().is_empty());

    // A reconnecting device gets a fresh identifier.
    let mut b2 = join(addr, "b");
    assert_ne!(b2.id, departed_id);

    a.send(&ClientMessage::StopAll);
    assert_eq!(b2.recv(), ServerMessage::StopAllTriggered);

    handle.stop();
}

#[test]
fn transport_session_connects_and_relays() {
    let (handle, addr) = start_test_relay(Some("classic"));

    let mut config = TransportConfig::new(addr.to_string(), "session-under-test");
    config.request_state_on_connect = true;
    let mut session = TransportSession::connect(config);

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut seen = Vec::new();
    while Instant::now() < deadline && seen.len() < 2 {
        if let Some(event) = session.recv_timeout(Duration::from_millis(100)) {
            seen.push(event);
        }
    }
    assert!(matches!(seen[0], TransportEvent::Connected { .. }));
    assert_eq!(
        seen[1],
        TransportEvent::Message(ServerMessage::CurrentState {
            story_mode: Some("classic".into())
        })
    );
    assert!(session.is_connected());

    let mut peer = join(addr, "peer");
    session.emit_sound("bell").unwrap();
    assert_eq!(
        peer.recv(),
        ServerMessage::SoundTriggered {
            sound_id: "bell".into()
        }
    );

    peer.send(&ClientMessage::FadeOut {
        duration_ms: Some(300),
    });
    let event = session.recv_timeout(Duration::from_secs(5));
    assert_eq!(
        event,
        Some(TransportEvent::Message(ServerMessage::FadeOutTriggered {
            duration_ms: 300
        }))
    );

    session.disconnect();
    assert!(!session.is_connected());
    handle.stop();
}
