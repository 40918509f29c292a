// Host dispatcher: turns relay broadcasts into playback and effect actions.
//
// `Host` owns the catalog and both schedulers. The embedding loop feeds it
// `ServerMessage`s as they arrive and calls `advance`/`frame` on its own
// cadence; `Host` never touches the network itself.
//
//   soundTriggered(id)   -> play the clip, start its effect for the clip's
//                           measured length (or `default_effect_ms`)
//   fadeOutTriggered(d)  -> fade every playing clip over d, and make every
//                           effect expire within d
//   stopAllTriggered     -> stop all clips, clear all effects
//   storyModeChanged(m)  -> switch catalog if m differs from the current one
//   currentState(m)      -> same, for the reply to `requestState`

use soundstage_protocol::message::ServerMessage;
use tracing::{debug, info, warn};

use crate::audio::AudioBackend;
use crate::catalog::{CatalogProvider, StoryMode};
use crate::effects::{EffectScheduler, Viewport, effect_for_sound};
use crate::playback::PlaybackScheduler;
use crate::timer::Millis;

#[derive(Clone, Debug, PartialEq)]
pub struct HostSettings {
    /// Effect lifetime when the clip length is not known yet.
    pub default_effect_ms: Millis,
    pub master_volume: f32,
    pub viewport: Viewport,
    pub effect_seed: u64,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            default_effect_ms: 5000,
            master_volume: 1.0,
            viewport: Viewport::default(),
            effect_seed: 0x5eed,
        }
    }
}

pub struct Host {
    catalog: Box<dyn CatalogProvider>,
    playback: PlaybackScheduler,
    effects: EffectScheduler,
    story_mode: Option<String>,
    default_effect_ms: Millis,
}

impl Host {
    pub fn new(
        catalog: Box<dyn CatalogProvider>,
        backend: Box<dyn AudioBackend>,
        settings: &HostSettings,
    ) -> Self {
        Self {
            catalog,
            playback: PlaybackScheduler::new(backend).with_master_volume(settings.master_volume),
            effects: EffectScheduler::new(settings.viewport, settings.effect_seed),
            story_mode: None,
            default_effect_ms: settings.default_effect_ms,
        }
    }

    /// React to one relay broadcast.
    pub fn handle(&mut self, now: Millis, message: &ServerMessage) {
        match message {
            ServerMessage::SoundTriggered { sound_id } => self.play(now, sound_id),
            ServerMessage::FadeOutTriggered { duration_ms } => {
                self.playback.fade_out_all(now, *duration_ms);
                self.effects.expire_within(now, *duration_ms);
            }
            ServerMessage::StopAllTriggered => {
                self.playback.stop_all_now();
                self.effects.deactivate_all();
            }
            ServerMessage::StoryModeChanged { mode_id } => {
                self.select_story_mode(mode_id);
            }
            ServerMessage::CurrentState {
                story_mode: Some(mode_id),
            } => {
                self.select_story_mode(mode_id);
            }
            ServerMessage::CurrentState { story_mode: None } => {
                debug!("relay has no story mode yet");
            }
            ServerMessage::Welcome { .. } | ServerMessage::Rejected { .. } => {}
        }
    }

    /// Play a sound locally, exactly as if it had been broadcast.
    pub fn play(&mut self, now: Millis, sound_id: &str) {
        let Some(triggered) = self.playback.trigger(now, sound_id) else {
            return;
        };
        let duration = triggered.duration_ms.unwrap_or(self.default_effect_ms);
        self.effects
            .activate(now, effect_for_sound(sound_id), duration);
    }

    /// Switch to `mode_id` unless it is already active. Unknown modes are
    /// logged and leave the current catalog in place. Returns whether the
    /// catalog changed.
    pub fn select_story_mode(&mut self, mode_id: &str) -> bool {
        if self.story_mode.as_deref() == Some(mode_id) {
            debug!(mode = mode_id, "story mode unchanged");
            return false;
        }
        let Some(entries) = self.catalog.catalog(mode_id) else {
            warn!(mode = mode_id, "unknown story mode ignored");
            return false;
        };
        self.effects.deactivate_all();
        self.playback.switch_catalog(mode_id, entries);
        self.story_mode = Some(mode_id.into());
        info!(mode = mode_id, "story mode switched");
        true
    }

    /// Load pending clips, run fades and expiries.
    pub fn advance(&mut self, now: Millis) {
        self.playback.advance(now);
        self.effects.advance(now);
    }

    /// Draw one effect frame if presenting.
    pub fn frame(&mut self, now: Millis) -> bool {
        self.effects.tick(now)
    }

    pub fn story_mode(&self) -> Option<&str> {
        self.story_mode.as_deref()
    }

    pub fn story_modes(&self) -> &[StoryMode] {
        self.catalog.story_modes()
    }

    pub fn playback(&self) -> &PlaybackScheduler {
        &self.playback
    }

    pub fn playback_mut(&mut self) -> &mut PlaybackScheduler {
        &mut self.playback
    }

    pub fn effects(&self) -> &EffectScheduler {
        &self.effects
    }

    pub fn effects_mut(&mut self) -> &mut EffectScheduler {
        &mut self.effects
    }
}
