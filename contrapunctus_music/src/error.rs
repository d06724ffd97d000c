// Error taxonomy for piece construction, movement validation, and search.
//
// Construction problems (bad notes, empty ranges, unstable endpoints) surface
// once when a `Piece` is built. Lookup misses and illegal movements surface
// at the call that caused them. Rule predicates and scoring functions never
// produce errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MusicError {
    #[error("unknown note name `{0}`")]
    UnknownNote(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("no pitches from {scale} between {lowest} and {highest}")]
    EmptyRange {
        scale: String,
        lowest: String,
        highest: String,
    },

    #[error("{note} is not a tonic triad member for {scale}")]
    InvalidEndpoint { note: String, scale: String },

    #[error("{what} does not belong to {scale}")]
    NotInScale { what: String, scale: String },

    #[error("{what} index {index} is out of range (len {len})")]
    OutOfRange {
        what: &'static str,
        index: usize,
        len: usize,
    },

    #[error("movement {movement} (duration {duration}) is not valid for line {line}")]
    InvalidMovement {
        line: usize,
        movement: i32,
        duration: usize,
    },

    #[error("expected {expected} movements, got {got}")]
    MovementCount { expected: usize, got: usize },

    #[error("action {action} is not valid in the current state")]
    InvalidAction { action: usize },

    #[error("episode is already finished")]
    EpisodeFinished,

    #[error("invalid search parameters: {0}")]
    InvalidSearch(String),

    #[error("search produced no complete piece")]
    NoCompleteSequences,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MusicError>;
