// Relay hub state: the live connection room and the current story mode.
//
// `Hub` is the data structure `server.rs` drives. All mutation happens from
// the server's single hub thread, one event at a time, so there is no
// internal locking and no two broadcasts can interleave.
//
// Fan-out rules:
// - `playSound`, `fadeOut`, `stopAll`: every connection except the sender.
//   The sender is the controller issuing the command, not a listener of it.
// - `changeStoryMode`: every connection including the sender, because it is
//   a global state broadcast the sender's own view must follow. Last write
//   wins; the hub does no conflict resolution.
// - `requestState`: unicast reply carrying the held story mode.
//
// Joins and leaves are silent to other connections.
//
// Writing to connections: `Hub` holds cloned `TcpStream` write halves
// wrapped in `BufWriter`, each with a write timeout. A write error on one
// connection is logged and the remaining recipients still get the message;
// the reader thread for the failed connection sees the broken pipe and
// reports the disconnect. A write that times out means the peer stopped
// reading, so the hub evicts it at once: its socket is shut down (waking its
// reader thread) and any half-written frame is discarded.

use std::collections::BTreeMap;
use std::io::{self, BufWriter};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use soundstage_protocol::framing::write_message;
use soundstage_protocol::message::{ClientMessage, ServerMessage, fade_duration_or_default};
use soundstage_protocol::types::ConnectionId;
use tracing::{debug, info, warn};

/// How long one frame may take to drain into a peer's socket.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Process-wide relay state.
pub struct Hub {
    connections: BTreeMap<ConnectionId, Connection>,
    story_mode: Option<String>,
    write_timeout: Duration,
}

struct Connection {
    device_name: String,
    writer: BufWriter<TcpStream>,
}

impl Hub {
    /// Empty room holding `default_story_mode`.
    pub fn new(default_story_mode: Option<String>) -> Self {
        Self {
            connections: BTreeMap::new(),
            story_mode: default_story_mode,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    /// Override the per-frame write timeout for connections added later.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Register a connection that completed its handshake and greet it with
    /// `Welcome`. Nobody else is told.
    pub fn add_connection(&mut self, id: ConnectionId, device_name: String, stream: TcpStream) {
        info!(connection = %id, device = %device_name, "connection joined");
        if let Err(e) = stream.set_write_timeout(Some(self.write_timeout)) {
            warn!(connection = %id, error = %e, "could not set write timeout, refusing connection");
            let _ = stream.shutdown(Shutdown::Both);
            return;
        }
        self.connections.insert(
            id,
            Connection {
                device_name,
                writer: BufWriter::new(stream),
            },
        );
        self.send_to(id, &ServerMessage::Welcome { connection_id: id });
    }

    /// Forget a connection. Returns false if it was already gone.
    pub fn remove_connection(&mut self, id: ConnectionId) -> bool {
        match self.connections.remove(&id) {
            Some(conn) => {
                info!(connection = %id, device = %conn.device_name, "connection left");
                true
            }
            None => false,
        }
    }

    /// Dispatch one client message from `from`. Messages from connections
    /// the hub no longer knows are dropped.
    pub fn handle(&mut self, from: ConnectionId, message: ClientMessage) {
        if !self.connections.contains_key(&from) {
            debug!(connection = %from, event = message.event_name(), "message from unknown connection");
            return;
        }
        match message {
            ClientMessage::PlaySound { sound_id } => self.play_sound(from, sound_id),
            ClientMessage::FadeOut { duration_ms } => self.fade_out(from, duration_ms),
            ClientMessage::StopAll => self.stop_all(from),
            ClientMessage::ChangeStoryMode { mode_id } => self.change_story_mode(from, mode_id),
            ClientMessage::RequestState => self.request_state(from),
            ClientMessage::Hello { .. } | ClientMessage::Goodbye => {
                // Hello is consumed by the handshake, Goodbye by the reader loop.
            }
        }
    }

    /// Relay a sound trigger to everyone but the sender.
    pub fn play_sound(&mut self, from: ConnectionId, sound_id: Option<String>) {
        let Some(sound_id) = sound_id else {
            warn!(connection = %from, "playSound without a usable sound id, dropped");
            return;
        };
        info!(connection = %from, sound = %sound_id, "playSound");
        self.broadcast_except(from, &ServerMessage::SoundTriggered { sound_id });
    }

    /// Relay a fade-out to everyone but the sender, defaulting the duration.
    pub fn fade_out(&mut self, from: ConnectionId, duration_ms: Option<u64>) {
        if duration_ms.is_none() {
            debug!(connection = %from, "fadeOut without a usable duration, using default");
        }
        let duration_ms = fade_duration_or_default(duration_ms);
        info!(connection = %from, duration_ms, "fadeOut");
        self.broadcast_except(from, &ServerMessage::FadeOutTriggered { duration_ms });
    }

    /// Relay an immediate stop to everyone but the sender.
    pub fn stop_all(&mut self, from: ConnectionId) {
        info!(connection = %from, "stopAll");
        self.broadcast_except(from, &ServerMessage::StopAllTriggered);
    }

    /// Replace the story mode and broadcast it to every connection,
    /// sender included.
    pub fn change_story_mode(&mut self, from: ConnectionId, mode_id: Option<String>) {
        let Some(mode_id) = mode_id else {
            warn!(connection = %from, "changeStoryMode without a usable mode id, dropped");
            return;
        };
        info!(connection = %from, mode = %mode_id, "changeStoryMode");
        self.story_mode = Some(mode_id.clone());
        self.broadcast(&ServerMessage::StoryModeChanged { mode_id });
    }

    /// Tell `from` which story mode the hub currently holds.
    pub fn request_state(&mut self, from: ConnectionId) {
        debug!(connection = %from, "requestState");
        let reply = ServerMessage::CurrentState {
            story_mode: self.story_mode.clone(),
        };
        self.send_to(from, &reply);
    }

    /// Returns the number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Returns the live connection IDs in ascending order.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    /// The authoritative story mode, if any has been set.
    pub fn story_mode(&self) -> Option<&str> {
        self.story_mode.as_deref()
    }

    /// Close every connection's socket so blocked reader threads wake up.
    pub fn shutdown(&mut self) {
        for (id, conn) in std::mem::take(&mut self.connections) {
            if let Err(e) = conn.writer.get_ref().shutdown(Shutdown::Both) {
                debug!(connection = %id, error = %e, "socket shutdown failed");
            }
        }
    }

    fn send_to(&mut self, id: ConnectionId, msg: &ServerMessage) {
        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };
        match send_message(&mut conn.writer, msg) {
            Ok(()) => {}
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                warn!(connection = %id, "peer stopped reading, evicting");
                self.evict(id);
            }
            Err(e) => warn!(connection = %id, error = %e, "write failed"),
        }
    }

    /// Drop a connection without flushing whatever it still has buffered.
    fn evict(&mut self, id: ConnectionId) {
        let Some(conn) = self.connections.remove(&id) else {
            return;
        };
        let (stream, _unsent) = conn.writer.into_parts();
        if let Err(e) = stream.shutdown(Shutdown::Both) {
            debug!(connection = %id, error = %e, "socket shutdown failed");
        }
        info!(connection = %id, device = %conn.device_name, "connection evicted");
    }

    fn broadcast(&mut self, msg: &ServerMessage) {
        for id in self.connection_ids() {
            self.send_to(id, msg);
        }
    }

    fn broadcast_except(&mut self, excluded: ConnectionId, msg: &ServerMessage) {
        for id in self.connection_ids() {
            if id != excluded {
                self.send_to(id, msg);
            }
        }
    }
}

/// Serialize a `ServerMessage` to JSON and write it with length-delimited
/// framing.
fn send_message(writer: &mut BufWriter<TcpStream>, msg: &ServerMessage) -> io::Result<()> {
    let json = msg.encode().map_err(io::Error::other)?;
    write_message(writer, &json)
}
