// Audio backend seam.
//
// The playback scheduler only ever talks to clips through `ClipHandle`, so a
// real audio engine and the headless `SilentBackend` are interchangeable.
// Loading is asynchronous from the scheduler's point of view: `load()` starts
// it and `poll_load()` reports progress until the clip settles on `Loaded` or
// `Failed`.

use crate::timer::Millis;

#[derive(Clone, Debug, PartialEq)]
pub enum LoadStatus {
    Pending,
    Loaded { duration_ms: Millis },
    Failed(String),
}

/// One loaded, playable sound. Dropping the handle unloads it.
pub trait ClipHandle {
    fn load(&mut self);
    fn poll_load(&mut self) -> LoadStatus;
    /// Start from position zero.
    fn play(&mut self);
    fn stop(&mut self);
    fn set_volume(&mut self, volume: f32);
    fn is_playing(&self) -> bool;
    /// Measured length, once loaded.
    fn duration_ms(&self) -> Option<Millis>;
}

pub trait AudioBackend {
    fn open(&mut self, uri: &str) -> Box<dyn ClipHandle>;
}
