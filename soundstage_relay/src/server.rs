// TCP server and hub event loop for the relay.
//
// Architecture: thread-per-connection readers feeding one hub thread through
// an `mpsc` channel.
//
// - **Listener thread** (`TcpListener::accept()` loop): assigns each accepted
//   socket a fresh `ConnectionId` and spawns its connection thread. Accept
//   errors are logged and retried; the loop ends only on shutdown.
// - **Connection threads** (one per device): perform the `Hello` handshake
//   under a read timeout, send `InternalEvent::Joined`, then call
//   `framing::read_message()` in a loop and forward each decoded
//   `ClientMessage` as `InternalEvent::MessageFrom`. On EOF or a framing
//   error they send `InternalEvent::Disconnected`.
// - **Hub thread**: owns the `Hub`, receives events from the channel, and
//   handles each one to completion before taking the next.
//
// The handshake runs on the connection thread so a slow or silent client
// never stalls the hub. Each connection's events travel through the channel
// from a single thread, so `Joined` always precedes that connection's
// messages and per-connection ordering is preserved end to end.
//
// The hub thread is the only writer to device sockets (via `Hub`). A frame
// that is well-formed but not a valid message is logged and skipped; only a
// broken stream ends the connection.
//
// Shutdown: `RelayHandle::stop` clears `keep_running`. The hub thread notices
// within one poll interval, shuts down every socket (waking blocked readers),
// and exits.

use std::io::{self, BufReader, BufWriter};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use soundstage_protocol::framing::{read_message, write_message};
use soundstage_protocol::message::{ClientMessage, PROTOCOL_VERSION, ServerMessage};
use soundstage_protocol::types::ConnectionId;
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::hub::Hub;

/// How long a new connection may take to send `Hello`.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// How often the hub and listener threads check `keep_running`.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Events sent from listener/connection threads to the hub thread.
enum InternalEvent {
    Joined {
        connection_id: ConnectionId,
        device_name: String,
        stream: TcpStream,
    },
    MessageFrom {
        connection_id: ConnectionId,
        message: ClientMessage,
    },
    Disconnected {
        connection_id: ConnectionId,
        reason: String,
    },
}

/// Handle returned by `start_relay` to control the running server.
pub struct RelayHandle {
    keep_running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl RelayHandle {
    /// Signal the relay to stop and wait for it to shut down.
    pub fn stop(mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        self.join();
    }

    /// Block until the relay exits on its own (it normally never does).
    pub fn wait(mut self) {
        self.join();
    }

    fn join(&mut self) {
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("relay hub thread panicked");
            }
        }
    }
}

/// Start the relay on background threads. Returns a handle for stopping it
/// and the bound address (useful when port 0 lets the OS pick).
pub fn start_relay(config: RelayConfig) -> Result<(RelayHandle, SocketAddr), RelayError> {
    let listen_addr = config.listen_addr();
    let listener = TcpListener::bind(&listen_addr).map_err(|source| RelayError::Bind {
        addr: listen_addr.clone(),
        source,
    })?;
    let addr = listener.local_addr()?;
    // Non-blocking so the accept loop can notice shutdown.
    listener.set_nonblocking(true)?;
    info!(%addr, default_mode = ?config.default_story_mode, "relay listening");

    let keep_running = Arc::new(AtomicBool::new(true));
    let (tx, rx) = mpsc::channel();

    let keep_running_listener = keep_running.clone();
    thread::spawn(move || accept_loop(listener, tx, keep_running_listener));

    let keep_running_hub = keep_running.clone();
    let default_mode = config.default_story_mode;
    let thread = thread::spawn(move || run_hub(rx, default_mode, keep_running_hub));

    Ok((
        RelayHandle {
            keep_running,
            thread: Some(thread),
        },
        addr,
    ))
}

/// Hub loop. Runs until `keep_running` is cleared.
fn run_hub(
    rx: Receiver<InternalEvent>,
    default_story_mode: Option<String>,
    keep_running: Arc<AtomicBool>,
) {
    let mut hub = Hub::new(default_story_mode);

    while keep_running.load(Ordering::SeqCst) {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(event) => handle_event(&mut hub, event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    info!(connections = hub.connection_count(), "relay shutting down");
    hub.shutdown();
}

/// Dispatch a single event to the hub.
fn handle_event(hub: &mut Hub, event: InternalEvent) {
    match event {
        InternalEvent::Joined {
            connection_id,
            device_name,
            stream,
        } => hub.add_connection(connection_id, device_name, stream),
        InternalEvent::MessageFrom {
            connection_id,
            message,
        } => hub.handle(connection_id, message),
        InternalEvent::Disconnected {
            connection_id,
            reason,
        } => {
            if hub.remove_connection(connection_id) {
                debug!(connection = %connection_id, %reason, "disconnect reason");
            }
        }
    }
}

/// Source of incoming sockets for `accept_loop`.
trait Acceptor {
    fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
}

impl Acceptor for TcpListener {
    fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self)
    }
}

/// Accept sockets until shutdown, spawning one connection thread each.
fn accept_loop<A: Acceptor>(listener: A, tx: Sender<InternalEvent>, keep_running: Arc<AtomicBool>) {
    let mut next_id = 0u64;
    while keep_running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                let connection_id = ConnectionId(next_id);
                next_id += 1;
                debug!(connection = %connection_id, %peer, "accepted");
                if let Err(e) = stream.set_nonblocking(false) {
                    warn!(connection = %connection_id, error = %e, "could not make socket blocking");
                    continue;
                }
                let tx_conn = tx.clone();
                let keep_running_conn = keep_running.clone();
                thread::spawn(move || {
                    connection_loop(stream, connection_id, tx_conn, keep_running_conn);
                });
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                // Out of descriptors, aborted handshakes and the like pass;
                // only shutdown ends the listener.
                warn!(error = %e, "accept failed, retrying");
                thread::sleep(POLL_INTERVAL);
            }
        }
    }
}

/// Handshake, then read frames until the stream ends. Runs in its own thread.
fn connection_loop(
    stream: TcpStream,
    connection_id: ConnectionId,
    tx: Sender<InternalEvent>,
    keep_running: Arc<AtomicBool>,
) {
    let Some((reader, device_name)) = handshake(&stream, connection_id) else {
        return;
    };
    let write_half = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            warn!(connection = %connection_id, error = %e, "could not clone socket");
            return;
        }
    };
    let joined = InternalEvent::Joined {
        connection_id,
        device_name,
        stream: write_half,
    };
    if tx.send(joined).is_err() {
        return;
    }

    let reason = reader_loop(reader, connection_id, &tx, &keep_running);
    let _ = tx.send(InternalEvent::Disconnected {
        connection_id,
        reason,
    });
}

/// Read and validate `Hello`. On a version mismatch, answer `Rejected` and
/// give up on the connection.
fn handshake(
    stream: &TcpStream,
    connection_id: ConnectionId,
) -> Option<(BufReader<TcpStream>, String)> {
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT)).ok()?;
    let mut reader = BufReader::new(stream.try_clone().ok()?);

    let hello = match read_message(&mut reader) {
        Ok(bytes) => ClientMessage::decode(&bytes),
        Err(e) => {
            debug!(connection = %connection_id, error = %e, "no handshake");
            return None;
        }
    };

    match hello {
        Ok(ClientMessage::Hello {
            protocol_version,
            device_name,
        }) => {
            if protocol_version != PROTOCOL_VERSION {
                warn!(
                    connection = %connection_id,
                    protocol_version,
                    "rejecting incompatible protocol version"
                );
                let reason = format!(
                    "protocol version {protocol_version} unsupported (relay speaks {PROTOCOL_VERSION})"
                );
                reject(stream, reason);
                return None;
            }
            // Clear the timeout for the long-lived reader loop.
            stream.set_read_timeout(None).ok()?;
            Some((reader, device_name))
        }
        Ok(other) => {
            debug!(connection = %connection_id, event = other.event_name(), "expected hello");
            reject(stream, "expected hello".into());
            None
        }
        Err(e) => {
            debug!(connection = %connection_id, error = %e, "undecodable handshake");
            None
        }
    }
}

fn reject(stream: &TcpStream, reason: String) {
    let Ok(write_half) = stream.try_clone() else {
        return;
    };
    if let Ok(json) = (ServerMessage::Rejected { reason }).encode() {
        let mut writer = BufWriter::new(write_half);
        let _ = write_message(&mut writer, &json);
    }
}

/// Forward decoded frames to the hub. Returns why the loop ended.
fn reader_loop(
    mut reader: BufReader<TcpStream>,
    connection_id: ConnectionId,
    tx: &Sender<InternalEvent>,
    keep_running: &AtomicBool,
) -> String {
    while keep_running.load(Ordering::SeqCst) {
        let bytes = match read_message(&mut reader) {
            Ok(bytes) => bytes,
            Err(e) => return format!("transport closed: {e}"),
        };
        match ClientMessage::decode(&bytes) {
            Ok(ClientMessage::Goodbye) => return "client goodbye".into(),
            Ok(message) => {
                let event = InternalEvent::MessageFrom {
                    connection_id,
                    message,
                };
                if tx.send(event).is_err() {
                    return "relay stopped".into();
                }
            }
            Err(e) => {
                warn!(connection = %connection_id, error = %e, "ignoring undecodable message");
            }
        }
    }
    "relay stopped".into()
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    /// Fails the first `failures` accepts, then defers to a real listener.
    struct FlakyListener {
        inner: TcpListener,
        failures: Cell<u32>,
    }

    impl Acceptor for FlakyListener {
        fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
            let left = self.failures.get();
            if left > 0 {
                self.failures.set(left - 1);
                return Err(io::Error::new(io::ErrorKind::ConnectionAborted, "aborted"));
            }
            self.inner.accept()
        }
    }

    #[test]
    fn listener_keeps_accepting_after_errors() {
        let inner = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = inner.local_addr().unwrap();
        inner.set_nonblocking(true).unwrap();
        let listener = FlakyListener {
            inner,
            failures: Cell::new(3),
        };

        let keep_running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel();
        let flag = keep_running.clone();
        let acceptor = thread::spawn(move || accept_loop(listener, tx, flag));

        let client = TcpStream::connect(addr).unwrap();
        let hello = ClientMessage::Hello {
            protocol_version: PROTOCOL_VERSION,
            device_name: "late-tablet".into(),
        };
        let mut writer = BufWriter::new(client.try_clone().unwrap());
        write_message(&mut writer, &hello.encode().unwrap()).unwrap();

        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let InternalEvent::Joined { device_name, .. } = event else {
            panic!("expected the connection to join");
        };
        assert_eq!(device_name, "late-tablet");

        keep_running.store(false, Ordering::SeqCst);
        acceptor.join().unwrap();
    }
}
