// Error types for the stage crate.
//
// Playback and effect faults are absorbed inside the schedulers (a clip that
// fails to load is logged and skipped). What remains here are the startup
// failures a binary can report: bad config and bad catalog data.

use std::io;
use std::path::PathBuf;

use soundstage_relay::ConfigError;
use thiserror::Error;

/// Problems building a story-mode catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse catalog {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("story mode {0:?} is defined more than once")]
    DuplicateMode(String),

    #[error("sound {sound:?} appears twice in story mode {mode:?}")]
    DuplicateSound { mode: String, sound: String },

    #[error("story mode and sound ids must not be blank")]
    BlankId,
}

/// Top-level failures for the stage binary.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("initial story mode {0:?} is not in the catalog")]
    UnknownStoryMode(String),
}
