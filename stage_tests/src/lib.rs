// Test-only devices for end-to-end storytelling sessions.
//
// `TestDevice` wraps the real `TransportSession` (from
// `soundstage_relay::transport`) with blocking helpers; `TestStage` adds a
// real `Host` (from `soundstage_stage::host`) on the silent backend, driven
// by a clock the test controls. All networking and scheduling goes through
// the same code paths as the `stage` binary; only the synchronous polling
// loops here are test-specific.
//
// See also: `tests/full_pipeline.rs` for the scenarios.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use soundstage_protocol::message::ServerMessage;
use soundstage_protocol::types::ConnectionId;
use soundstage_relay::transport::{
    ReconnectPolicy, TransportConfig, TransportEvent, TransportSession,
};
use soundstage_stage::catalog::StaticCatalog;
use soundstage_stage::host::{Host, HostSettings};
use soundstage_stage::silent::{ClipLog, SilentBackend};
use soundstage_stage::timer::Millis;

/// Default timeout for blocking waits.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// How long `expect_silence` listens before concluding nothing is coming.
const QUIET_WINDOW: Duration = Duration::from_millis(150);

/// Fast retries so reconnect tests do not wait seconds.
pub fn test_reconnect_policy() -> ReconnectPolicy {
    ReconnectPolicy {
        max_attempts: 50,
        base_delay_ms: 20,
        max_delay_ms: 100,
    }
}

/// A device connected to the relay through a real `TransportSession`.
pub struct TestDevice {
    session: TransportSession,
    pub connection_id: ConnectionId,
    /// Lifecycle events seen while waiting for messages.
    pub lifecycle: Vec<TransportEvent>,
}

impl TestDevice {
    /// Connect and block until the handshake completes.
    pub fn connect(addr: SocketAddr, name: &str) -> Self {
        Self::connect_with(addr, name, false)
    }

    pub fn connect_with(addr: SocketAddr, name: &str, request_state_on_connect: bool) -> Self {
        let mut config = TransportConfig::new(addr.to_string(), name);
        config.reconnect = test_reconnect_policy();
        config.request_state_on_connect = request_state_on_connect;
        let session = TransportSession::connect(config);

        let mut device = Self {
            session,
            connection_id: ConnectionId(u64::MAX),
            lifecycle: Vec::new(),
        };
        device.connection_id = device.wait_for_connect();
        device
    }

    /// Block until the next `Connected` event.
    pub fn wait_for_connect(&mut self) -> ConnectionId {
        let start = Instant::now();
        loop {
            assert!(start.elapsed() < POLL_TIMEOUT, "timed out connecting");
            match self.session.recv_timeout(Duration::from_millis(50)) {
                Some(TransportEvent::Connected { connection_id }) => {
                    self.connection_id = connection_id;
                    return connection_id;
                }
                Some(TransportEvent::GaveUp { attempts }) => {
                    panic!("gave up connecting after {attempts} attempts")
                }
                Some(event) => self.lifecycle.push(event),
                None => {}
            }
        }
    }

    pub fn session(&self) -> &TransportSession {
        &self.session
    }

    pub fn play(&self, sound_id: &str) {
        self.session.emit_sound(sound_id).expect("emit_sound failed");
    }

    pub fn fade(&self, duration_ms: Option<u64>) {
        self.session
            .emit_fade_out(duration_ms)
            .expect("emit_fade_out failed");
    }

    pub fn stop_all(&self) {
        self.session.emit_stop_all().expect("emit_stop_all failed");
    }

    pub fn change_mode(&self, mode_id: &str) {
        self.session
            .emit_story_mode_change(mode_id)
            .expect("emit_story_mode_change failed");
    }

    pub fn request_state(&self) {
        self.session
            .request_state()
            .expect("request_state failed");
    }

    /// Block until the next relay message.
    pub fn next_message(&mut self) -> ServerMessage {
        let start = Instant::now();
        loop {
            assert!(start.elapsed() < POLL_TIMEOUT, "timed out waiting for message");
            match self.session.recv_timeout(Duration::from_millis(50)) {
                Some(TransportEvent::Message(msg)) => return msg,
                Some(event) => self.lifecycle.push(event),
                None => {}
            }
        }
    }

    /// Assert nothing arrives within a short window.
    pub fn expect_silence(&mut self) {
        let start = Instant::now();
        while start.elapsed() < QUIET_WINDOW {
            match self.session.recv_timeout(Duration::from_millis(20)) {
                Some(TransportEvent::Message(msg)) => panic!("unexpected message: {msg:?}"),
                Some(event) => self.lifecycle.push(event),
                None => {}
            }
        }
    }

    /// Wait for a `Disconnected` event.
    pub fn wait_for_disconnect(&mut self) {
        let start = Instant::now();
        loop {
            assert!(start.elapsed() < POLL_TIMEOUT, "timed out waiting for disconnect");
            if let Some(TransportEvent::Disconnected { .. }) =
                self.session.recv_timeout(Duration::from_millis(50))
            {
                return;
            }
        }
    }

    pub fn disconnect(&mut self) {
        self.session.disconnect();
    }
}

/// The host device: a `TestDevice` feeding a real `Host`.
pub struct TestStage {
    pub device: TestDevice,
    pub host: Host,
    pub clips: ClipLog,
}

impl TestStage {
    /// Connect a host using the built-in catalog, starting in `mode`, with
    /// every clip `clip_ms` long.
    pub fn connect(addr: SocketAddr, mode: &str, clip_ms: Millis) -> Self {
        let backend = SilentBackend::new(clip_ms);
        let clips = backend.log();
        let mut host = Host::new(
            Box::new(StaticCatalog::builtin()),
            Box::new(backend),
            &HostSettings::default(),
        );
        host.select_story_mode(mode);
        host.advance(0);
        Self {
            device: TestDevice::connect(addr, "stage"),
            host,
            clips,
        }
    }

    /// Block for the next relay message, hand it to the host at `now`, and
    /// return it.
    pub fn receive(&mut self, now: Millis) -> ServerMessage {
        let msg = self.device.next_message();
        self.host.handle(now, &msg);
        msg
    }

    pub fn advance(&mut self, now: Millis) {
        self.host.advance(now);
    }
}
