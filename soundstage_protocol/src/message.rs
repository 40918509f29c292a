// Protocol messages for device-relay communication.
//
// Two enums define the full vocabulary:
// - `ClientMessage`: sent by a device (controller or host) to the relay.
// - `ServerMessage`: sent by the relay to devices.
//
// Wire shape is serde's externally tagged form with camelCase names, so a
// play request looks like `{"playSound":{"soundId":"rain"}}` and a unit event
// like `"stopAll"`. Client payload fields are `Option`s filled through the
// lenient hooks in `lenient.rs`; the relay decides what an absent value means.
// Server payloads are always concrete because the relay has already resolved
// defaults by the time it broadcasts.

use serde::{Deserialize, Serialize};

use crate::lenient;
use crate::types::ConnectionId;

/// Protocol revision carried in `Hello`. The relay rejects mismatches.
pub const PROTOCOL_VERSION: u32 = 1;

/// Fade length applied when a `fadeOut` arrives without a usable duration.
pub const DEFAULT_FADE_MS: u64 = 2000;

/// Messages sent by a device to the relay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Handshake; must be the first frame on a connection.
    Hello {
        protocol_version: u32,
        device_name: String,
    },
    /// Ask every other device to play a sound.
    PlaySound {
        #[serde(default, deserialize_with = "lenient::identifier")]
        sound_id: Option<String>,
    },
    /// Ask every other device to fade all playing sounds to silence.
    FadeOut {
        #[serde(default, deserialize_with = "lenient::duration_ms")]
        duration_ms: Option<u64>,
    },
    /// Ask every other device to stop immediately.
    StopAll,
    /// Switch the global story mode (echoed to the sender too).
    ChangeStoryMode {
        #[serde(default, deserialize_with = "lenient::identifier")]
        mode_id: Option<String>,
    },
    /// Ask the relay for the current story mode.
    RequestState,
    /// Leaving gracefully.
    Goodbye,
}

impl ClientMessage {
    /// Decode a frame payload, expanding shorthand shapes first.
    pub fn decode(bytes: &[u8]) -> serde_json::Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        serde_json::from_value(lenient::normalize_client_value(value))
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Wire name of this event, for logging.
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::Hello { .. } => "hello",
            ClientMessage::PlaySound { .. } => "playSound",
            ClientMessage::FadeOut { .. } => "fadeOut",
            ClientMessage::StopAll => "stopAll",
            ClientMessage::ChangeStoryMode { .. } => "changeStoryMode",
            ClientMessage::RequestState => "requestState",
            ClientMessage::Goodbye => "goodbye",
        }
    }
}

/// Messages sent by the relay to a device.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Handshake accepted.
    Welcome { connection_id: ConnectionId },
    /// Handshake rejected; the relay closes the connection afterwards.
    Rejected { reason: String },
    /// Another device fired a sound.
    SoundTriggered { sound_id: String },
    /// Another device requested a fade-out of the given length.
    FadeOutTriggered { duration_ms: u64 },
    /// Another device requested an immediate stop.
    StopAllTriggered,
    /// The global story mode changed (sent to every device).
    StoryModeChanged { mode_id: String },
    /// Reply to `RequestState`.
    CurrentState { story_mode: Option<String> },
}

impl ServerMessage {
    pub fn decode(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Resolve an optional fade duration to the one the relay broadcasts.
pub fn fade_duration_or_default(duration_ms: Option<u64>) -> u64 {
    duration_ms.unwrap_or(DEFAULT_FADE_MS)
}
