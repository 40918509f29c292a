// Reconnecting device-side transport to the relay.
//
// One `TransportSession` per device. Architecture:
// - `connect()` spawns a supervisor thread and returns immediately; the
//   connection comes up in the background.
// - The supervisor connects, performs the `Hello`/`Welcome` handshake,
//   installs the write half in shared state, then blocks reading frames and
//   pushes everything it sees into an `mpsc` inbox as `TransportEvent`s.
//   When the stream drops it clears the write half and reconnects with
//   capped exponential backoff. After `max_attempts` consecutive failed
//   attempts it reports `GaveUp` and exits. A successful connect resets the
//   failure count.
// - The caller's thread emits through the shared write half and drains the
//   inbox with `poll()`, so it never blocks on network reads.
//
// Emits while disconnected are logged and dropped: nothing is buffered for
// later. Reconnecting does not replay missed events; a device that wants the
// current story mode after a reconnect sets `request_state_on_connect` or
// calls `request_state()` itself.

use std::io::{BufReader, BufWriter};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use soundstage_protocol::framing::{read_message, write_message};
use soundstage_protocol::message::{ClientMessage, PROTOCOL_VERSION, ServerMessage};
use soundstage_protocol::types::ConnectionId;
use tracing::{debug, info, warn};

use crate::error::TransportError;

/// Granularity of backoff sleeps, so `disconnect()` is honored promptly.
const SLEEP_SLICE: Duration = Duration::from_millis(20);

/// Reconnect schedule: `base * 2^failures`, capped at `max_delay_ms`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts tolerated before giving up.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay_ms: 1000,
            max_delay_ms: 5000,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the next attempt, given how many attempts in a row have
    /// failed so far.
    pub fn delay_after(&self, failures: u32) -> Duration {
        let factor = 1u64.checked_shl(failures.min(32)).unwrap_or(u64::MAX);
        let ms = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

/// Settings for one device's connection.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// `host:port` of the relay.
    pub relay_addr: String,
    pub device_name: String,
    pub reconnect: ReconnectPolicy,
    /// Send `requestState` right after every successful handshake.
    pub request_state_on_connect: bool,
    pub handshake_timeout: Duration,
}

impl TransportConfig {
    pub fn new(relay_addr: impl Into<String>, device_name: impl Into<String>) -> Self {
        Self {
            relay_addr: relay_addr.into(),
            device_name: device_name.into(),
            reconnect: ReconnectPolicy::default(),
            request_state_on_connect: false,
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

/// Everything the supervisor reports to the owning thread.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    /// Handshake completed.
    Connected { connection_id: ConnectionId },
    /// An established connection dropped.
    Disconnected { reason: String },
    /// A connection attempt failed (`attempt` counts consecutive failures).
    ConnectError { error: String, attempt: u32 },
    /// Retry budget exhausted; the session is permanently offline.
    GaveUp { attempts: u32 },
    /// A relay broadcast.
    Message(ServerMessage),
}

struct Shared {
    keep_running: AtomicBool,
    writer: Mutex<Option<BufWriter<TcpStream>>>,
    connection_id: Mutex<Option<ConnectionId>>,
}

impl Shared {
    fn writer(&self) -> MutexGuard<'_, Option<BufWriter<TcpStream>>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn connection_id(&self) -> MutexGuard<'_, Option<ConnectionId>> {
        self.connection_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop the write half, closing the socket so a blocked read returns.
    fn close_writer(&self) {
        if let Some(writer) = self.writer().take() {
            let _ = writer.get_ref().shutdown(Shutdown::Both);
        }
        *self.connection_id() = None;
    }
}

/// A device's persistent, self-healing connection to the relay.
pub struct TransportSession {
    shared: Arc<Shared>,
    inbox: Receiver<TransportEvent>,
    supervisor: Option<JoinHandle<()>>,
}

impl TransportSession {
    /// Start connecting in the background.
    pub fn connect(config: TransportConfig) -> Self {
        let shared = Arc::new(Shared {
            keep_running: AtomicBool::new(true),
            writer: Mutex::new(None),
            connection_id: Mutex::new(None),
        });
        let (tx, rx) = mpsc::channel();
        let shared_supervisor = shared.clone();
        let supervisor = thread::spawn(move || supervise(config, shared_supervisor, tx));
        Self {
            shared,
            inbox: rx,
            supervisor: Some(supervisor),
        }
    }

    /// Whether a handshake-complete connection is currently up.
    pub fn is_connected(&self) -> bool {
        self.shared.writer().is_some()
    }

    /// The relay-assigned ID of the current connection.
    pub fn connection_id(&self) -> Option<ConnectionId> {
        *self.shared.connection_id()
    }

    pub fn emit_sound(&self, sound_id: &str) -> Result<(), TransportError> {
        self.send(&ClientMessage::PlaySound {
            sound_id: Some(sound_id.into()),
        })
    }

    pub fn emit_fade_out(&self, duration_ms: Option<u64>) -> Result<(), TransportError> {
        self.send(&ClientMessage::FadeOut { duration_ms })
    }

    pub fn emit_stop_all(&self) -> Result<(), TransportError> {
        self.send(&ClientMessage::StopAll)
    }

    pub fn emit_story_mode_change(&self, mode_id: &str) -> Result<(), TransportError> {
        self.send(&ClientMessage::ChangeStoryMode {
            mode_id: Some(mode_id.into()),
        })
    }

    /// Ask the relay for the current story mode; the answer arrives as
    /// `ServerMessage::CurrentState`.
    pub fn request_state(&self) -> Result<(), TransportError> {
        self.send(&ClientMessage::RequestState)
    }

    /// Drain all queued events (non-blocking).
    pub fn poll(&self) -> Vec<TransportEvent> {
        self.inbox.try_iter().collect()
    }

    /// Wait up to `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<TransportEvent> {
        self.inbox.recv_timeout(timeout).ok()
    }

    /// Say goodbye, close the socket, and stop reconnecting. Idempotent.
    pub fn disconnect(&mut self) {
        if self.shared.keep_running.swap(false, Ordering::SeqCst) {
            if self.is_connected() {
                let _ = self.send(&ClientMessage::Goodbye);
            }
            self.shared.close_writer();
        }
        if let Some(handle) = self.supervisor.take() {
            let _ = handle.join();
        }
    }

    fn send(&self, msg: &ClientMessage) -> Result<(), TransportError> {
        let mut guard = self.shared.writer();
        let Some(writer) = guard.as_mut() else {
            warn!(event = msg.event_name(), "not connected, event dropped");
            return Err(TransportError::NotConnected);
        };
        let json = msg.encode()?;
        if let Err(e) = write_message(writer, &json) {
            warn!(event = msg.event_name(), error = %e, "write failed, event dropped");
            return Err(e.into());
        }
        debug!(event = msg.event_name(), "sent");
        Ok(())
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Supervisor thread: connect, read until the stream drops, back off, repeat.
fn supervise(config: TransportConfig, shared: Arc<Shared>, tx: Sender<TransportEvent>) {
    let mut failures = 0u32;

    while shared.keep_running.load(Ordering::SeqCst) {
        match establish(&config) {
            Ok((reader, writer, connection_id)) => {
                failures = 0;
                {
                    // Checked under the writer lock so a concurrent
                    // `disconnect()` either sees this writer or stops us here.
                    let mut slot = shared.writer();
                    if !shared.keep_running.load(Ordering::SeqCst) {
                        let _ = writer.get_ref().shutdown(Shutdown::Both);
                        break;
                    }
                    *slot = Some(writer);
                    *shared.connection_id() = Some(connection_id);
                }
                info!(connection = %connection_id, relay = %config.relay_addr, "connected");
                if tx.send(TransportEvent::Connected { connection_id }).is_err() {
                    break;
                }
                if config.request_state_on_connect {
                    send_request_state(&shared);
                }

                let reason = read_loop(reader, &tx);
                shared.close_writer();
                if !shared.keep_running.load(Ordering::SeqCst) {
                    break;
                }
                info!(%reason, "disconnected");
                if tx.send(TransportEvent::Disconnected { reason }).is_err() {
                    break;
                }
            }
            Err(e) => {
                failures += 1;
                warn!(attempt = failures, error = %e, relay = %config.relay_addr, "connect failed");
                let event = TransportEvent::ConnectError {
                    error: e.to_string(),
                    attempt: failures,
                };
                if tx.send(event).is_err() {
                    break;
                }
                if failures >= config.reconnect.max_attempts {
                    warn!(attempts = failures, "giving up on relay");
                    let _ = tx.send(TransportEvent::GaveUp { attempts: failures });
                    break;
                }
            }
        }
        sleep_while_running(&shared, config.reconnect.delay_after(failures));
    }
}

fn send_request_state(shared: &Shared) {
    let mut guard = shared.writer();
    if let Some(writer) = guard.as_mut() {
        let sent = ClientMessage::RequestState
            .encode()
            .map_err(TransportError::from)
            .and_then(|json| write_message(writer, &json).map_err(TransportError::from));
        if let Err(e) = sent {
            warn!(error = %e, "could not request state");
        }
    }
}

/// TCP connect plus `Hello`/`Welcome` under the handshake timeout.
fn establish(
    config: &TransportConfig,
) -> Result<(BufReader<TcpStream>, BufWriter<TcpStream>, ConnectionId), TransportError> {
    let addr = resolve(&config.relay_addr)?;
    let stream = TcpStream::connect_timeout(&addr, config.handshake_timeout)?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(config.handshake_timeout))?;

    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream);

    let hello = ClientMessage::Hello {
        protocol_version: PROTOCOL_VERSION,
        device_name: config.device_name.clone(),
    };
    write_message(&mut writer, &hello.encode()?)?;

    let reply = ServerMessage::decode(&read_message(&mut reader)?)?;
    let connection_id = match reply {
        ServerMessage::Welcome { connection_id } => connection_id,
        ServerMessage::Rejected { reason } => return Err(TransportError::Rejected(reason)),
        other => return Err(TransportError::Handshake(format!("{other:?}"))),
    };

    // Clear the timeout for the long-lived read loop.
    reader.get_ref().set_read_timeout(None)?;
    Ok((reader, writer, connection_id))
}

fn resolve(relay_addr: &str) -> Result<SocketAddr, TransportError> {
    relay_addr.to_socket_addrs()?.next().ok_or_else(|| {
        TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            format!("{relay_addr} did not resolve"),
        ))
    })
}

/// Push relay broadcasts into the inbox until the stream ends.
fn read_loop(mut reader: BufReader<TcpStream>, tx: &Sender<TransportEvent>) -> String {
    loop {
        let bytes = match read_message(&mut reader) {
            Ok(bytes) => bytes,
            Err(e) => return format!("transport closed: {e}"),
        };
        match ServerMessage::decode(&bytes) {
            Ok(msg) => {
                if tx.send(TransportEvent::Message(msg)).is_err() {
                    return "session dropped".into();
                }
            }
            Err(e) => warn!(error = %e, "ignoring undecodable relay message"),
        }
    }
}

fn sleep_while_running(shared: &Shared, total: Duration) {
    let deadline = Instant::now() + total;
    while shared.keep_running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        let policy = ReconnectPolicy {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 1000,
        };
        let delays: Vec<u64> = (0..6)
            .map(|n| policy.delay_after(n).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
        assert_eq!(policy.delay_after(u32::MAX), Duration::from_millis(1000));
    }

    #[test]
    fn emits_fail_fast_while_offline() {
        // Nothing listens on this port; the supervisor keeps failing.
        let mut config = TransportConfig::new("127.0.0.1:1", "offline-test");
        config.reconnect = ReconnectPolicy {
            max_attempts: 1,
            base_delay_ms: 10,
            max_delay_ms: 10,
        };
        let mut session = TransportSession::connect(config);

        assert!(!session.is_connected());
        assert!(matches!(
            session.emit_sound("rain"),
            Err(TransportError::NotConnected)
        ));
        assert!(matches!(
            session.emit_stop_all(),
            Err(TransportError::NotConnected)
        ));
        session.disconnect();
    }

    #[test]
    fn exhausting_retries_reports_gave_up() {
        let mut config = TransportConfig::new("127.0.0.1:1", "give-up-test");
        config.reconnect = ReconnectPolicy {
            max_attempts: 2,
            base_delay_ms: 5,
            max_delay_ms: 5,
        };
        let session = TransportSession::connect(config);

        let mut events = Vec::new();
        while let Some(event) = session.recv_timeout(Duration::from_secs(5)) {
            let done = matches!(event, TransportEvent::GaveUp { .. });
            events.push(event);
            if done {
                break;
            }
        }
        let attempts: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                TransportEvent::ConnectError { attempt, .. } => Some(*attempt),
                _ => None,
            })
            .collect();
        assert_eq!(attempts, vec![1, 2]);
        assert_eq!(events.last(), Some(&TransportEvent::GaveUp { attempts: 2 }));
    }
}
