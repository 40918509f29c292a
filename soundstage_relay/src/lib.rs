// soundstage_relay: event relay hub for live storytelling sessions.
//
// The relay is a thin broadcaster: devices connect over TCP, send control
// events (play a sound, fade out, stop everything, change the story mode),
// and the relay fans each event out to the other connected devices. It never
// plays audio or renders anything; that happens on the host device
// (`soundstage_stage`).
//
// Module overview:
// - `hub.rs`:       Relay state: the connection room, the current story mode,
//                   and the per-event fan-out rules.
// - `server.rs`:    TCP listener, per-connection reader threads, and the
//                   single hub thread that owns `Hub`.
// - `transport.rs`: Device-side reconnecting connection (`TransportSession`)
//                   with typed emits and a polled inbox.
// - `config.rs`:    `RelayConfig` and the shared TOML/env loading helpers.
// - `error.rs`:     `RelayError`, `TransportError`, `ConfigError`.
//
// Dependencies: `soundstage_protocol` for messages and framing. Everything
// runs on `std` threads and channels; there is no async runtime.
//
// The relay runs as a standalone binary (`main.rs`) or embedded in another
// process via `start_relay`.

pub mod config;
pub mod error;
pub mod hub;
pub mod server;
pub mod transport;

pub use config::RelayConfig;
pub use error::{ConfigError, RelayError, TransportError};
pub use server::{RelayHandle, start_relay};
pub use transport::{ReconnectPolicy, TransportConfig, TransportEvent, TransportSession};
