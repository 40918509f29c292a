// soundstage_protocol: wire protocol between storytelling devices and the relay.
//
// Shared by the relay (`soundstage_relay`) and every device, with no
// dependency on audio or rendering code.
//
// Module overview:
// - `types.rs`:    `ConnectionId`, the relay-assigned connection handle.
// - `message.rs`:  `ClientMessage` / `ServerMessage` enums, protocol constants.
// - `lenient.rs`:  Coercion of malformed client payloads into usable values.
// - `framing.rs`:  Length-delimited framing over any `Read`/`Write` stream:
//                  4-byte big-endian length prefix, then JSON payload.
//
// JSON keeps frames human-readable in packet captures and matches the event
// names a browser client would use. Framing works on blocking `std::io`
// streams; there is no async runtime anywhere in the relay path.

pub mod framing;
pub mod lenient;
pub mod message;
pub mod types;

pub use framing::{MAX_MESSAGE_SIZE, read_message, write_message};
pub use message::{
    ClientMessage, DEFAULT_FADE_MS, PROTOCOL_VERSION, ServerMessage, fade_duration_or_default,
};
pub use types::ConnectionId;

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn client_json(msg: &ClientMessage) -> serde_json::Value {
        serde_json::from_slice(&msg.encode().unwrap()).unwrap()
    }

    fn server_json(msg: &ServerMessage) -> serde_json::Value {
        serde_json::from_slice(&msg.encode().unwrap()).unwrap()
    }

    #[test]
    fn client_events_use_camel_case_wire_names() {
        assert_eq!(
            client_json(&ClientMessage::PlaySound {
                sound_id: Some("rain".into())
            }),
            json!({"playSound": {"soundId": "rain"}})
        );
        assert_eq!(
            client_json(&ClientMessage::FadeOut {
                duration_ms: Some(1000)
            }),
            json!({"fadeOut": {"durationMs": 1000}})
        );
        assert_eq!(client_json(&ClientMessage::StopAll), json!("stopAll"));
        assert_eq!(
            client_json(&ClientMessage::Hello {
                protocol_version: PROTOCOL_VERSION,
                device_name: "host".into()
            }),
            json!({"hello": {"protocolVersion": 1, "deviceName": "host"}})
        );
    }

    #[test]
    fn server_events_use_camel_case_wire_names() {
        assert_eq!(
            server_json(&ServerMessage::SoundTriggered {
                sound_id: "thunder".into()
            }),
            json!({"soundTriggered": {"soundId": "thunder"}})
        );
        assert_eq!(
            server_json(&ServerMessage::FadeOutTriggered { duration_ms: 2000 }),
            json!({"fadeOutTriggered": {"durationMs": 2000}})
        );
        assert_eq!(
            server_json(&ServerMessage::StopAllTriggered),
            json!("stopAllTriggered")
        );
        assert_eq!(
            server_json(&ServerMessage::Welcome {
                connection_id: ConnectionId(4)
            }),
            json!({"welcome": {"connectionId": 4}})
        );
        assert_eq!(
            server_json(&ServerMessage::CurrentState { story_mode: None }),
            json!({"currentState": {"storyMode": null}})
        );
    }

    #[test]
    fn fade_without_duration_decodes_to_none() {
        for raw in [
            r#""fadeOut""#,
            r#"{"fadeOut":{}}"#,
            r#"{"fadeOut":null}"#,
            r#"{"fadeOut":{"durationMs":"later"}}"#,
            r#"{"fadeOut":{"durationMs":-20}}"#,
        ] {
            let msg = ClientMessage::decode(raw.as_bytes()).unwrap();
            assert_eq!(msg, ClientMessage::FadeOut { duration_ms: None }, "{raw}");
            let ClientMessage::FadeOut { duration_ms } = msg else {
                unreachable!()
            };
            assert_eq!(fade_duration_or_default(duration_ms), DEFAULT_FADE_MS);
        }
    }

    #[test]
    fn payload_free_events_ignore_stray_bodies() {
        for raw in [
            r#""stopAll""#,
            r#"{"stopAll":null}"#,
            r#"{"stopAll":{}}"#,
            r#"{"stopAll":[]}"#,
            r#"{"stopAll":{"durationMs":5}}"#,
        ] {
            let msg = ClientMessage::decode(raw.as_bytes()).unwrap();
            assert_eq!(msg, ClientMessage::StopAll, "{raw}");
        }
        assert_eq!(
            ClientMessage::decode(br#"{"requestState":{}}"#).unwrap(),
            ClientMessage::RequestState
        );
        assert_eq!(
            ClientMessage::decode(br#"{"goodbye":[]}"#).unwrap(),
            ClientMessage::Goodbye
        );
    }

    #[test]
    fn positional_and_numeric_payloads_are_coerced() {
        assert_eq!(
            ClientMessage::decode(br#"{"playSound":42}"#).unwrap(),
            ClientMessage::PlaySound {
                sound_id: Some("42".into())
            }
        );
        assert_eq!(
            ClientMessage::decode(br#"{"fadeOut":"1500"}"#).unwrap(),
            ClientMessage::FadeOut {
                duration_ms: Some(1500)
            }
        );
        assert_eq!(
            ClientMessage::decode(br#"{"changeStoryMode":{"modeId":["x"]}}"#).unwrap(),
            ClientMessage::ChangeStoryMode { mode_id: None }
        );
    }

    #[test]
    fn unknown_events_fail_to_decode() {
        assert!(ClientMessage::decode(br#"{"launchRockets":{}}"#).is_err());
        assert!(ClientMessage::decode(b"not json").is_err());
    }

    #[test]
    fn framed_message_survives_the_wire() {
        let msg = ServerMessage::StoryModeChanged {
            mode_id: "forest".into(),
        };
        let mut wire = Vec::new();
        write_message(&mut wire, &msg.encode().unwrap()).unwrap();

        let bytes = read_message(&mut Cursor::new(&wire)).unwrap();
        assert_eq!(ServerMessage::decode(&bytes).unwrap(), msg);
    }
}
