// soundstage_stage: the host device's playback and effect core.
//
// The host is the one device that actually makes noise and draws effects.
// It listens to the relay (see `soundstage_relay`) and turns each broadcast
// into clip state changes and particle effects. Everything here is
// single-threaded and driven by an explicit millisecond clock: the caller
// feeds messages and calls `advance`/`frame`, so every state machine can be
// stepped deterministically in tests.
//
// Module overview:
// - `timer.rs`:    Cancellable timer table (`Timers`) and `MonotonicClock`.
// - `catalog.rs`:  `SoundEntry`, `StoryMode`, `CatalogProvider`, and the
//                  built-in / TOML-loaded `StaticCatalog`.
// - `audio.rs`:    `AudioBackend` / `ClipHandle` seam.
// - `silent.rs`:   Headless `SilentBackend` that records calls in a `ClipLog`.
// - `playback.rs`: `PlaybackScheduler`: monophonic clips, fades, stop-all,
//                  catalog switching.
// - `effects/`:    `EffectScheduler`, particle populations, render surface.
// - `host.rs`:     `Host`: maps `ServerMessage`s onto both schedulers.
// - `config.rs`:   `StageConfig` for the `stage` binary.
// - `error.rs`:    `StageError`, `CatalogError`.

pub mod audio;
pub mod catalog;
pub mod config;
pub mod effects;
pub mod error;
pub mod host;
pub mod playback;
pub mod silent;
pub mod timer;

pub use catalog::{CatalogProvider, SoundEntry, StaticCatalog, StoryMode};
pub use config::StageConfig;
pub use effects::{EffectCategory, EffectScheduler};
pub use error::{CatalogError, StageError};
pub use host::{Host, HostSettings};
pub use playback::{ClipPhase, PlaybackScheduler};
pub use silent::{ClipLog, SilentBackend};
pub use timer::{Millis, MonotonicClock, Timers};
