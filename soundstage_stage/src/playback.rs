// Playback scheduler: the host's bank of clips and their state machines.
//
// Each catalog entry gets one clip, and each clip is monophonic:
//
//   Idle ──trigger──> Playing ──fade_out_all──> Fading ──last step──> Idle
//    ^                  │  ^                      │
//    └──stop/natural end┘  └──────trigger─────────┘ (restart from zero)
//
// Fades are linear ramps from the clip's volume at the moment the fade
// starts down to zero, one step every `FADE_STEP_MS`. When a ramp finishes
// the clip is stopped and its volume restored to base, so the next trigger
// is not silently muted. Every fade owns a repeating timer in `timers`;
// `stop_all_now`, a new trigger of the same clip, a replacement fade, and a
// catalog switch all cancel that timer explicitly. A timer that still fires
// for a clip it no longer owns is ignored.
//
// Time is always passed in (`now`), never read from a clock, so the whole
// state machine is deterministic under test.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, info, warn};

use crate::audio::{AudioBackend, ClipHandle, LoadStatus};
use crate::catalog::{SoundEntry, clamp_volume};
use crate::timer::{Millis, TimerHandle, Timers};

/// Interval between fade volume steps.
pub const FADE_STEP_MS: Millis = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClipPhase {
    Idle,
    Playing,
    Fading,
}

#[derive(Clone, Debug, PartialEq)]
enum LoadState {
    Loading,
    Ready { duration_ms: Millis },
    Failed(String),
}

#[derive(Clone, Copy, Debug)]
struct Fade {
    timer: TimerHandle,
    from: f32,
    steps: u32,
    taken: u32,
}

struct Clip {
    entry: SoundEntry,
    handle: Box<dyn ClipHandle>,
    load: LoadState,
    base_volume: f32,
    volume: f32,
    phase: ClipPhase,
    started_at: Millis,
    fade: Option<Fade>,
}

impl Clip {
    fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
        self.handle.set_volume(volume);
    }

    fn duration_ms(&self) -> Option<Millis> {
        match self.load {
            LoadState::Ready { duration_ms } => Some(duration_ms),
            _ => None,
        }
    }
}

/// What a successful trigger reports back to the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Triggered {
    /// Measured clip length, if loading has finished.
    pub duration_ms: Option<Millis>,
    /// Whether an already-playing instance was cut off and restarted.
    pub restarted: bool,
}

pub struct PlaybackScheduler {
    backend: Box<dyn AudioBackend>,
    /// Catalog order is kept so iteration (and therefore backend call order)
    /// is stable.
    clips: Vec<Clip>,
    index: HashMap<String, usize>,
    fade_owners: HashMap<TimerHandle, usize>,
    timers: Timers,
    master_volume: f32,
    catalog_id: Option<String>,
}

impl PlaybackScheduler {
    pub fn new(backend: Box<dyn AudioBackend>) -> Self {
        Self {
            backend,
            clips: Vec::new(),
            index: HashMap::new(),
            fade_owners: HashMap::new(),
            timers: Timers::new(),
            master_volume: 1.0,
            catalog_id: None,
        }
    }

    pub fn with_master_volume(mut self, volume: f32) -> Self {
        self.master_volume = clamp_volume(volume);
        self
    }

    /// Stop everything, release the current clips, and load one clip per
    /// entry of the new catalog. Load failures surface later through
    /// `advance` and only affect their own clip.
    pub fn switch_catalog(&mut self, catalog_id: &str, entries: &[SoundEntry]) {
        self.stop_all_now();
        self.timers.clear();
        self.fade_owners.clear();
        self.index.clear();
        let released = self.clips.len();
        self.clips.clear();
        debug!(released, "released previous clips");

        for entry in entries {
            let mut handle = self.backend.open(&entry.audio_ref);
            let base_volume = entry.volume * self.master_volume;
            handle.set_volume(base_volume);
            handle.load();
            self.index.insert(entry.id.clone(), self.clips.len());
            self.clips.push(Clip {
                entry: entry.clone(),
                handle,
                load: LoadState::Loading,
                base_volume,
                volume: base_volume,
                phase: ClipPhase::Idle,
                started_at: 0,
                fade: None,
            });
        }
        self.catalog_id = Some(catalog_id.into());
        info!(catalog = catalog_id, clips = self.clips.len(), "catalog loaded");
    }

    /// Play `sound_id` from the beginning, cutting off any instance already
    /// playing. Unknown and failed ids are logged and ignored.
    pub fn trigger(&mut self, now: Millis, sound_id: &str) -> Option<Triggered> {
        let Some(&i) = self.index.get(sound_id) else {
            warn!(sound = sound_id, "trigger for unknown sound ignored");
            return None;
        };
        if let LoadState::Failed(reason) = &self.clips[i].load {
            warn!(sound = sound_id, %reason, "trigger for unplayable sound ignored");
            return None;
        }

        self.cancel_fade(i);
        let clip = &mut self.clips[i];
        let restarted = clip.phase != ClipPhase::Idle;
        if restarted {
            clip.handle.stop();
        }
        let base = clip.base_volume;
        clip.set_volume(base);
        clip.handle.play();
        clip.phase = ClipPhase::Playing;
        clip.started_at = now;
        debug!(sound = sound_id, restarted, "clip started");

        Some(Triggered {
            duration_ms: clip.duration_ms(),
            restarted,
        })
    }

    /// Start a linear fade to silence on every playing clip. A clip that is
    /// already fading starts over from its current volume with the new
    /// duration. Returns how many clips are now fading.
    pub fn fade_out_all(&mut self, now: Millis, duration_ms: Millis) -> usize {
        let steps = u32::try_from(duration_ms.div_ceil(FADE_STEP_MS).max(1)).unwrap_or(u32::MAX);
        let mut fading = 0;
        for i in 0..self.clips.len() {
            if self.clips[i].phase == ClipPhase::Idle {
                continue;
            }
            self.cancel_fade(i);
            let timer = self.timers.repeating(now, FADE_STEP_MS);
            self.fade_owners.insert(timer, i);
            let clip = &mut self.clips[i];
            clip.fade = Some(Fade {
                timer,
                from: clip.volume,
                steps,
                taken: 0,
            });
            clip.phase = ClipPhase::Fading;
            fading += 1;
        }
        if fading > 0 {
            info!(duration_ms, clips = fading, "fade out started");
        }
        fading
    }

    /// Stop every clip immediately, cancel all fades, and restore volumes.
    pub fn stop_all_now(&mut self) {
        let mut stopped = 0;
        for i in 0..self.clips.len() {
            self.cancel_fade(i);
            let clip = &mut self.clips[i];
            if clip.phase != ClipPhase::Idle {
                clip.handle.stop();
                clip.phase = ClipPhase::Idle;
                stopped += 1;
            }
            if clip.volume != clip.base_volume {
                let base = clip.base_volume;
                clip.set_volume(base);
            }
        }
        if stopped > 0 {
            info!(clips = stopped, "stopped all");
        }
    }

    /// Poll pending loads, run due fade steps, and retire clips that have
    /// reached their end.
    pub fn advance(&mut self, now: Millis) {
        self.poll_loads();

        for timer in self.timers.fire_due(now) {
            self.fade_step(timer);
        }

        for clip in &mut self.clips {
            if clip.phase == ClipPhase::Idle {
                continue;
            }
            let elapsed = clip
                .duration_ms()
                .is_some_and(|d| now >= clip.started_at.saturating_add(d));
            if elapsed || !clip.handle.is_playing() {
                if let Some(fade) = clip.fade.take() {
                    self.timers.cancel(fade.timer);
                    self.fade_owners.remove(&fade.timer);
                }
                clip.handle.stop();
                clip.phase = ClipPhase::Idle;
                if clip.volume != clip.base_volume {
                    let base = clip.base_volume;
                    clip.set_volume(base);
                }
                debug!(sound = %clip.entry.id, "clip ended");
            }
        }
    }

    /// Set the master multiplier and rescale base volumes. Fading clips keep
    /// their ramp and pick up the new base when it finishes.
    pub fn set_master_volume(&mut self, volume: f32) {
        self.master_volume = clamp_volume(volume);
        for clip in &mut self.clips {
            clip.base_volume = clip.entry.volume * self.master_volume;
            if clip.phase != ClipPhase::Fading {
                let base = clip.base_volume;
                clip.set_volume(base);
            }
        }
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }

    pub fn catalog_id(&self) -> Option<&str> {
        self.catalog_id.as_deref()
    }

    /// Ids of clips that are playing or fading.
    pub fn playing_sounds(&self) -> BTreeSet<String> {
        self.clips
            .iter()
            .filter(|c| c.phase != ClipPhase::Idle)
            .map(|c| c.entry.id.clone())
            .collect()
    }

    pub fn is_fading(&self) -> bool {
        self.clips.iter().any(|c| c.phase == ClipPhase::Fading)
    }

    pub fn volume(&self, sound_id: &str) -> Option<f32> {
        self.clip(sound_id).map(|c| c.volume)
    }

    pub fn clip_phase(&self, sound_id: &str) -> Option<ClipPhase> {
        self.clip(sound_id).map(|c| c.phase)
    }

    pub fn duration_ms(&self, sound_id: &str) -> Option<Millis> {
        self.clip(sound_id).and_then(Clip::duration_ms)
    }

    pub fn clip_count(&self) -> usize {
        self.clips.len()
    }

    pub fn loaded_count(&self) -> usize {
        self.clips
            .iter()
            .filter(|c| matches!(c.load, LoadState::Ready { .. }))
            .count()
    }

    pub fn failed_sounds(&self) -> Vec<&str> {
        self.clips
            .iter()
            .filter(|c| matches!(c.load, LoadState::Failed(_)))
            .map(|c| c.entry.id.as_str())
            .collect()
    }

    fn clip(&self, sound_id: &str) -> Option<&Clip> {
        self.index.get(sound_id).map(|&i| &self.clips[i])
    }

    fn poll_loads(&mut self) {
        for clip in &mut self.clips {
            if clip.load != LoadState::Loading {
                continue;
            }
            match clip.handle.poll_load() {
                LoadStatus::Pending => {}
                LoadStatus::Loaded { duration_ms } => {
                    debug!(sound = %clip.entry.id, duration_ms, "clip loaded");
                    clip.load = LoadState::Ready { duration_ms };
                }
                LoadStatus::Failed(reason) => {
                    warn!(sound = %clip.entry.id, uri = %clip.entry.audio_ref, %reason, "clip failed to load");
                    if clip.phase != ClipPhase::Idle {
                        clip.handle.stop();
                        clip.phase = ClipPhase::Idle;
                    }
                    clip.load = LoadState::Failed(reason);
                }
            }
        }
    }

    fn fade_step(&mut self, timer: TimerHandle) {
        let Some(&i) = self.fade_owners.get(&timer) else {
            debug!(?timer, "stale fade timer ignored");
            return;
        };
        let clip = &mut self.clips[i];
        let Some(fade) = clip.fade.as_mut().filter(|f| f.timer == timer) else {
            debug!(?timer, "stale fade timer ignored");
            return;
        };

        fade.taken += 1;
        if fade.taken < fade.steps {
            let remaining = 1.0 - fade.taken as f32 / fade.steps as f32;
            let volume = fade.from * remaining;
            clip.set_volume(volume);
            return;
        }

        clip.set_volume(0.0);
        clip.handle.stop();
        let base = clip.base_volume;
        clip.set_volume(base);
        clip.phase = ClipPhase::Idle;
        clip.fade = None;
        self.timers.cancel(timer);
        self.fade_owners.remove(&timer);
        debug!(sound = %clip.entry.id, "fade complete");
    }

    fn cancel_fade(&mut self, i: usize) {
        if let Some(fade) = self.clips[i].fade.take() {
            self.timers.cancel(fade.timer);
            self.fade_owners.remove(&fade.timer);
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::silent::{ClipLog, ClipOp, SilentBackend};

    fn entries() -> Vec<SoundEntry> {
        vec![
            SoundEntry::new("rain", "Rain", "", "rain.ogg", ""),
            SoundEntry::new("thunder", "Thunder", "", "thunder.ogg", ""),
            SoundEntry::new("crowd", "Crowd", "", "crowd.ogg", "").with_volume(0.5),
        ]
    }

    fn scheduler(backend: SilentBackend) -> (PlaybackScheduler, ClipLog) {
        let log = backend.log();
        let mut playback = PlaybackScheduler::new(Box::new(backend));
        playback.switch_catalog("test", &entries());
        playback.advance(0);
        (playback, log)
    }

    fn ids(playback: &PlaybackScheduler) -> Vec<String> {
        playback.playing_sounds().into_iter().collect()
    }

    #[test]
    fn trigger_reports_measured_duration() {
        let (mut playback, _) = scheduler(SilentBackend::new(4000).with_duration("rain.ogg", 9000));
        let t = playback.trigger(0, "rain").unwrap();
        assert_eq!(t.duration_ms, Some(9000));
        assert!(!t.restarted);
        assert_eq!(playback.clip_phase("rain"), Some(ClipPhase::Playing));
        assert_eq!(playback.loaded_count(), 3);
    }

    #[test]
    fn retrigger_restarts_instead_of_overlapping() {
        let (mut playback, log) = scheduler(SilentBackend::new(4000));
        playback.trigger(0, "rain");
        let again = playback.trigger(100, "rain").unwrap();
        assert!(again.restarted);
        assert_eq!(ids(&playback), ["rain"]);
        assert_eq!(log.count("rain.ogg", &ClipOp::Play), 2);
        assert_eq!(log.count("rain.ogg", &ClipOp::Stop), 1);

        // The restart resets the clock: still playing past the first end time.
        playback.advance(4050);
        assert_eq!(ids(&playback), ["rain"]);
        playback.advance(4100);
        assert!(playback.playing_sounds().is_empty());
    }

    #[test]
    fn unknown_and_failed_ids_are_no_ops() {
        let (mut playback, log) = scheduler(SilentBackend::new(1000).with_failure("thunder.ogg"));
        assert_eq!(playback.failed_sounds(), ["thunder"]);
        assert_eq!(playback.loaded_count(), 2);

        let before = log.len();
        assert_eq!(playback.trigger(0, "thunder"), None);
        assert_eq!(playback.trigger(0, "kazoo"), None);
        assert_eq!(log.len(), before);

        // Siblings still play.
        assert!(playback.trigger(0, "rain").is_some());
    }

    #[test]
    fn fade_ramps_each_clip_to_zero_then_restores_base() {
        let (mut playback, log) = scheduler(SilentBackend::new(60_000));
        playback.trigger(0, "rain");
        playback.trigger(0, "crowd");
        assert_eq!(playback.fade_out_all(1000, 1000), 2);
        assert!(playback.is_fading());

        let mut last_rain = 1.0;
        let mut last_crowd = 0.5;
        for t in (1050..2000).step_by(50) {
            playback.advance(t);
            let rain = playback.volume("rain").unwrap();
            let crowd = playback.volume("crowd").unwrap();
            assert!(rain < last_rain, "rain not decreasing at {t}");
            assert!(crowd < last_crowd, "crowd not decreasing at {t}");
            last_rain = rain;
            last_crowd = crowd;
        }
        assert_eq!(ids(&playback), ["crowd", "rain"]);

        playback.advance(2000);
        assert!(playback.playing_sounds().is_empty());
        assert!(!playback.is_fading());
        assert_eq!(playback.volume("rain"), Some(1.0));
        assert_eq!(playback.volume("crowd"), Some(0.5));

        let rain_volumes = log.volumes_for("rain.ogg");
        let tail = &rain_volumes[rain_volumes.len() - 2..];
        assert_eq!(tail, [0.0, 1.0]);
        let ops = log.ops_for("rain.ogg");
        let stop_at = ops.iter().rposition(|op| *op == ClipOp::Stop).unwrap();
        assert_eq!(ops[stop_at - 1], ClipOp::SetVolume(0.0));
        assert_eq!(ops[stop_at + 1], ClipOp::SetVolume(1.0));
    }

    #[test]
    fn stop_all_mid_fade_cancels_further_mutation() {
        let (mut playback, log) = scheduler(SilentBackend::new(60_000));
        playback.trigger(0, "rain");
        playback.fade_out_all(0, 1000);
        playback.advance(200);
        assert!(playback.volume("rain").unwrap() < 1.0);

        playback.stop_all_now();
        assert_eq!(playback.volume("rain"), Some(1.0));
        let calls_after_stop = log.len();

        for t in (250..3000).step_by(50) {
            playback.advance(t);
        }
        assert_eq!(log.len(), calls_after_stop);
        assert!(playback.playing_sounds().is_empty());
    }

    #[test]
    fn clip_started_mid_fade_is_not_faded() {
        let (mut playback, _) = scheduler(SilentBackend::new(60_000));
        playback.trigger(0, "rain");
        playback.fade_out_all(0, 500);
        playback.advance(100);
        playback.trigger(100, "thunder");

        playback.advance(500);
        assert_eq!(ids(&playback), ["thunder"]);
        assert_eq!(playback.volume("thunder"), Some(1.0));
        assert_eq!(playback.clip_phase("thunder"), Some(ClipPhase::Playing));
    }

    #[test]
    fn retrigger_during_fade_cancels_that_clips_fade() {
        let (mut playback, _) = scheduler(SilentBackend::new(60_000));
        playback.trigger(0, "rain");
        playback.fade_out_all(0, 500);
        playback.advance(200);
        playback.trigger(200, "rain");
        assert_eq!(playback.volume("rain"), Some(1.0));

        playback.advance(1000);
        assert_eq!(playback.clip_phase("rain"), Some(ClipPhase::Playing));
        assert_eq!(playback.volume("rain"), Some(1.0));
    }

    #[test]
    fn second_fade_replaces_first_from_current_volume() {
        let (mut playback, _) = scheduler(SilentBackend::new(60_000));
        playback.trigger(0, "rain");
        playback.fade_out_all(0, 1000);
        playback.advance(500);
        let midway = playback.volume("rain").unwrap();
        assert!((midway - 0.5).abs() < 1e-6);

        playback.fade_out_all(500, 2000);
        // The first fade would have finished at 1000.
        playback.advance(1000);
        assert_eq!(playback.clip_phase("rain"), Some(ClipPhase::Fading));
        let later = playback.volume("rain").unwrap();
        assert!(later < midway && later > 0.0);

        playback.advance(2500);
        assert_eq!(playback.clip_phase("rain"), Some(ClipPhase::Idle));
    }

    #[test]
    fn zero_duration_fade_finishes_on_first_step() {
        let (mut playback, _) = scheduler(SilentBackend::new(60_000));
        playback.trigger(0, "rain");
        playback.fade_out_all(0, 0);
        playback.advance(49);
        assert_eq!(playback.clip_phase("rain"), Some(ClipPhase::Fading));
        playback.advance(50);
        assert_eq!(playback.clip_phase("rain"), Some(ClipPhase::Idle));
    }

    #[test]
    fn switching_catalog_stops_everything_and_kills_fades() {
        let (mut playback, log) = scheduler(SilentBackend::new(60_000));
        playback.trigger(0, "rain");
        playback.trigger(0, "thunder");
        playback.fade_out_all(0, 1000);
        playback.advance(100);

        let replacement = vec![SoundEntry::new("owl", "Owl", "", "owl.ogg", "")];
        playback.switch_catalog("night", &replacement);
        assert!(playback.playing_sounds().is_empty());
        assert_eq!(playback.clip_count(), 1);
        assert_eq!(playback.catalog_id(), Some("night"));

        // Old clips were stopped before being unloaded.
        let rain_ops = log.ops_for("rain.ogg");
        assert_eq!(rain_ops[rain_ops.len() - 1], ClipOp::Unload);
        assert!(rain_ops.contains(&ClipOp::Stop));

        // Nothing from the old catalog is still playing when the new one opens.
        let calls = log.calls();
        let last_rain_stop = calls
            .iter()
            .rposition(|c| c.uri == "rain.ogg" && c.op == ClipOp::Stop)
            .unwrap();
        let last_thunder_stop = calls
            .iter()
            .rposition(|c| c.uri == "thunder.ogg" && c.op == ClipOp::Stop)
            .unwrap();
        let owl_load = calls
            .iter()
            .position(|c| c.uri == "owl.ogg" && c.op == ClipOp::Load)
            .unwrap();
        assert!(last_rain_stop < owl_load);
        assert!(last_thunder_stop < owl_load);
        let unloads_before = log.count("rain.ogg", &ClipOp::Unload);

        // Old fade timers are gone, not just ignored.
        let calls = log.len();
        playback.advance(5000);
        assert_eq!(log.count("rain.ogg", &ClipOp::Unload), unloads_before);
        assert!(log.calls()[calls..].iter().all(|c| c.uri == "owl.ogg"));
    }

    #[test]
    fn natural_end_reported_by_backend_retires_clip() {
        let (mut playback, log) = scheduler(SilentBackend::new(60_000));
        playback.trigger(0, "crowd");
        log.end_playback("crowd.ogg");
        playback.advance(10);
        assert!(playback.playing_sounds().is_empty());
    }

    #[test]
    fn master_volume_scales_bases() {
        let (mut playback, _) = scheduler(SilentBackend::new(60_000));
        playback.set_master_volume(0.5);
        assert_eq!(playback.volume("rain"), Some(0.5));
        assert_eq!(playback.volume("crowd"), Some(0.25));

        playback.trigger(0, "crowd");
        playback.fade_out_all(0, 100);
        playback.advance(100);
        assert_eq!(playback.volume("crowd"), Some(0.25));

        playback.set_master_volume(7.0);
        assert_eq!(playback.master_volume(), 1.0);
    }
}
