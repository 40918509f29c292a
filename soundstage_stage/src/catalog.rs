// Story modes and their sound catalogs.
//
// A story mode is an ordered list of `SoundEntry` values; the playback
// scheduler loads one clip per entry when the mode becomes active. The
// built-in catalog ships three modes. A TOML file with the same shape can
// replace it:
//
//   [[mode]]
//   id = "classic"
//   name = "Classic"
//   description = "..."
//
//   [[mode.sounds]]
//   id = "rain"
//   label = "Rain"
//   icon = "🌧️"
//   audio_ref = "sounds/rain.mp3"
//   color = "blue"
//   volume = 0.8
//
// Entries are validated once at construction (unique, non-blank ids; volume
// clamped to [0, 1]) and immutable afterwards.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CatalogError;

fn default_volume() -> f32 {
    1.0
}

/// One playable button on the board.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SoundEntry {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub icon: String,
    pub audio_ref: String,
    #[serde(default)]
    pub color: String,
    /// Base volume in [0, 1] before the master multiplier.
    #[serde(default = "default_volume")]
    pub volume: f32,
}

impl SoundEntry {
    pub fn new(id: &str, label: &str, icon: &str, audio_ref: &str, color: &str) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            icon: icon.into(),
            audio_ref: audio_ref.into(),
            color: color.into(),
            volume: 1.0,
        }
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = clamp_volume(volume);
        self
    }
}

/// Clamp to [0, 1]; NaN becomes silence.
pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoryMode {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub sounds: Vec<SoundEntry>,
}

/// Source of story modes for the host.
pub trait CatalogProvider {
    /// Every available mode, in display order.
    fn story_modes(&self) -> &[StoryMode];

    /// The ordered entries of one mode, or `None` for an unknown id.
    fn catalog(&self, mode_id: &str) -> Option<&[SoundEntry]> {
        self.story_modes()
            .iter()
            .find(|mode| mode.id == mode_id)
            .map(|mode| mode.sounds.as_slice())
    }
}

/// In-memory catalog, either built in or loaded from TOML.
#[derive(Clone, Debug, PartialEq)]
pub struct StaticCatalog {
    modes: Vec<StoryMode>,
}

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(default, rename = "mode")]
    modes: Vec<StoryMode>,
}

impl StaticCatalog {
    /// Validate and normalize a list of modes.
    pub fn from_modes(mut modes: Vec<StoryMode>) -> Result<Self, CatalogError> {
        let mut mode_ids = HashSet::new();
        for mode in &mut modes {
            if mode.id.trim().is_empty() {
                return Err(CatalogError::BlankId);
            }
            if !mode_ids.insert(mode.id.clone()) {
                return Err(CatalogError::DuplicateMode(mode.id.clone()));
            }
            let mut sound_ids = HashSet::new();
            for sound in &mut mode.sounds {
                if sound.id.trim().is_empty() {
                    return Err(CatalogError::BlankId);
                }
                if !sound_ids.insert(sound.id.clone()) {
                    return Err(CatalogError::DuplicateSound {
                        mode: mode.id.clone(),
                        sound: sound.id.clone(),
                    });
                }
                sound.volume = clamp_volume(sound.volume);
            }
        }
        Ok(Self { modes })
    }

    pub fn from_toml_str(text: &str, origin: &Path) -> Result<Self, CatalogError> {
        let file: CatalogFile = toml::from_str(text).map_err(|e| CatalogError::Parse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_modes(file.modes)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let text = std::fs::read_to_string(path).map_err(|source| CatalogError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text, path)
    }

    /// The stock board: "classic", "forest" and "magic".
    pub fn builtin() -> Self {
        Self {
            modes: vec![classic_mode(), forest_mode(), magic_mode()],
        }
    }
}

impl CatalogProvider for StaticCatalog {
    fn story_modes(&self) -> &[StoryMode] {
        &self.modes
    }
}

fn classic_mode() -> StoryMode {
    StoryMode {
        id: "classic".into(),
        name: "Classic".into(),
        description: "Weather, nature and everyday sounds for any story.".into(),
        sounds: vec![
            SoundEntry::new("wind", "Wind", "💨", "sounds/wind.mp3", "cyan"),
            SoundEntry::new("thunder", "Thunder", "⚡", "sounds/thunder.mp3", "yellow"),
            SoundEntry::new("rain", "Rain", "🌧️", "sounds/rain.mp3", "blue").with_volume(0.8),
            SoundEntry::new("fire", "Fire", "🔥", "sounds/fire.mp3", "red"),
            SoundEntry::new("forest", "Forest", "🌲", "sounds/forest.mp3", "green"),
            SoundEntry::new("water", "Water", "🌊", "sounds/water.mp3", "blue"),
            SoundEntry::new("birds", "Birds", "🐦", "sounds/birds.mp3", "orange"),
            SoundEntry::new("horse", "Horse", "🐎", "sounds/horse.mp3", "amber"),
            SoundEntry::new("door", "Door", "🚪", "sounds/door.mp3", "gray"),
            SoundEntry::new("footsteps", "Footsteps", "👣", "sounds/footsteps.mp3", "purple"),
            SoundEntry::new("bell", "Bell", "🔔", "sounds/bell.mp3", "yellow"),
            SoundEntry::new("crowd", "Crowd", "👥", "sounds/crowd.mp3", "pink").with_volume(0.7),
        ],
    }
}

fn forest_mode() -> StoryMode {
    StoryMode {
        id: "forest".into(),
        name: "Enchanted Forest".into(),
        description: "A walk through the woods, from dawn birdsong to a campfire at night."
            .into(),
        sounds: vec![
            SoundEntry::new("forest", "Forest", "🌲", "sounds/forest.mp3", "green"),
            SoundEntry::new("birds", "Birds", "🐦", "sounds/birds.mp3", "orange"),
            SoundEntry::new("stream", "Stream", "🏞️", "sounds/stream.mp3", "blue"),
            SoundEntry::new("wind", "Wind", "💨", "sounds/wind.mp3", "cyan"),
            SoundEntry::new("rain", "Rain", "🌧️", "sounds/rain.mp3", "blue").with_volume(0.8),
            SoundEntry::new("thunder", "Thunder", "⚡", "sounds/thunder.mp3", "yellow"),
            SoundEntry::new("campfire", "Campfire", "🔥", "sounds/campfire.mp3", "red"),
            SoundEntry::new("owl", "Owl", "🦉", "sounds/owl.mp3", "gray").with_volume(0.6),
        ],
    }
}

fn magic_mode() -> StoryMode {
    StoryMode {
        id: "magic".into(),
        name: "Magic".into(),
        description: "Spells, fairies and castle halls.".into(),
        sounds: vec![
            SoundEntry::new("butterflies", "Butterflies", "🦋", "sounds/butterflies.mp3", "violet"),
            SoundEntry::new("chimes", "Chimes", "🎐", "sounds/chimes.mp3", "yellow"),
            SoundEntry::new("spell", "Spell", "✨", "sounds/spell.mp3", "purple"),
            SoundEntry::new("wind", "Wind", "💨", "sounds/wind.mp3", "cyan"),
            SoundEntry::new("door", "Castle Door", "🚪", "sounds/door.mp3", "gray"),
            SoundEntry::new("whisper", "Whisper", "🤫", "sounds/whisper.mp3", "pink")
                .with_volume(0.5),
        ],
    }
}
