// Headless audio backend.
//
// Clips never produce sound. They load instantly with a nominal duration
// (per-URI overrides, or a default), and every call the scheduler makes is
// appended to a shared `ClipLog`. The headless `stage host` binary runs on
// it, and tests use the log to check exactly what reached the backend.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::audio::{AudioBackend, ClipHandle, LoadStatus};
use crate::timer::Millis;

/// Default nominal length for clips without an override.
pub const DEFAULT_SILENT_DURATION_MS: Millis = 3000;

#[derive(Clone, Debug, PartialEq)]
pub enum ClipOp {
    Load,
    Play,
    Stop,
    SetVolume(f32),
    Unload,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClipCall {
    pub uri: String,
    pub op: ClipOp,
}

#[derive(Debug, Default)]
struct LogState {
    calls: Vec<ClipCall>,
    /// URIs whose current playback has ended on its own.
    ended: HashSet<String>,
}

/// Shared record of backend calls. Cheap to clone.
#[derive(Clone, Debug, Default)]
pub struct ClipLog {
    state: Arc<Mutex<LogState>>,
}

impl ClipLog {
    fn state(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, uri: &str, op: ClipOp) {
        self.state().calls.push(ClipCall {
            uri: uri.into(),
            op,
        });
    }

    pub fn calls(&self) -> Vec<ClipCall> {
        self.state().calls.clone()
    }

    pub fn ops_for(&self, uri: &str) -> Vec<ClipOp> {
        self.state()
            .calls
            .iter()
            .filter(|call| call.uri == uri)
            .map(|call| call.op.clone())
            .collect()
    }

    /// Volumes set on `uri`, in call order.
    pub fn volumes_for(&self, uri: &str) -> Vec<f32> {
        self.ops_for(uri)
            .into_iter()
            .filter_map(|op| match op {
                ClipOp::SetVolume(v) => Some(v),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, uri: &str, op: &ClipOp) -> usize {
        self.ops_for(uri).iter().filter(|o| *o == op).count()
    }

    pub fn len(&self) -> usize {
        self.state().calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pretend the clip at `uri` reached its end on its own.
    pub fn end_playback(&self, uri: &str) {
        self.state().ended.insert(uri.into());
    }

    fn take_ended(&self, uri: &str) -> bool {
        self.state().ended.remove(uri)
    }
}

#[derive(Debug, Default)]
pub struct SilentBackend {
    default_duration_ms: Millis,
    durations: HashMap<String, Millis>,
    failing: HashSet<String>,
    log: ClipLog,
}

impl SilentBackend {
    pub fn new(default_duration_ms: Millis) -> Self {
        Self {
            default_duration_ms,
            ..Self::default()
        }
    }

    pub fn with_duration(mut self, uri: &str, duration_ms: Millis) -> Self {
        self.durations.insert(uri.into(), duration_ms);
        self
    }

    /// Make every clip opened for `uri` fail to load.
    pub fn with_failure(mut self, uri: &str) -> Self {
        self.failing.insert(uri.into());
        self
    }

    pub fn log(&self) -> ClipLog {
        self.log.clone()
    }
}

impl AudioBackend for SilentBackend {
    fn open(&mut self, uri: &str) -> Box<dyn ClipHandle> {
        let outcome = if self.failing.contains(uri) {
            LoadStatus::Failed(format!("{uri}: no such asset"))
        } else {
            LoadStatus::Loaded {
                duration_ms: self
                    .durations
                    .get(uri)
                    .copied()
                    .unwrap_or(self.default_duration_ms),
            }
        };
        Box::new(SilentClip {
            uri: uri.into(),
            outcome,
            started: false,
            playing: false,
            log: self.log.clone(),
        })
    }
}

struct SilentClip {
    uri: String,
    outcome: LoadStatus,
    started: bool,
    playing: bool,
    log: ClipLog,
}

impl ClipHandle for SilentClip {
    fn load(&mut self) {
        self.started = true;
        self.log.record(&self.uri, ClipOp::Load);
    }

    fn poll_load(&mut self) -> LoadStatus {
        if self.started {
            self.outcome.clone()
        } else {
            LoadStatus::Pending
        }
    }

    fn play(&mut self) {
        self.log.take_ended(&self.uri);
        self.playing = true;
        self.log.record(&self.uri, ClipOp::Play);
    }

    fn stop(&mut self) {
        self.playing = false;
        self.log.record(&self.uri, ClipOp::Stop);
    }

    fn set_volume(&mut self, volume: f32) {
        self.log.record(&self.uri, ClipOp::SetVolume(volume));
    }

    fn is_playing(&self) -> bool {
        if self.playing && self.log.state().ended.contains(&self.uri) {
            return false;
        }
        self.playing
    }

    fn duration_ms(&self) -> Option<Millis> {
        match self.outcome {
            LoadStatus::Loaded { duration_ms } if self.started => Some(duration_ms),
            _ => None,
        }
    }
}

impl Drop for SilentClip {
    fn drop(&mut self) {
        self.log.record(&self.uri, ClipOp::Unload);
    }
}
