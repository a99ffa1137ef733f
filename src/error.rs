use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DataError>;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Could not decode WAV file {path:?}: {source}")]
    Wav {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },
    #[error("Audio file referenced by the manifest is missing: {0:?}")]
    MissingAudio(PathBuf),
    #[error("{path:?}: sample rate {found} doesn't match target {expected}")]
    SampleRateMismatch { path: PathBuf, found: u32, expected: u32 },
    #[error("Malformed manifest row {manifest:?}:{line}: {row:?} (expected `path|transcript|speaker_id`)")]
    MalformedManifestRow { manifest: PathBuf, line: usize, row: String },
    #[error("No manifest files found for glob: {0}")]
    EmptyManifestGlob(String),
    #[error("Invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error("Could not read a path matched by the manifest glob: {0}")]
    Glob(#[from] glob::GlobError),
    #[error("Oversample weight for speaker {speaker:?} must be a positive integer, got {weight}")]
    InvalidOversampleWeight { speaker: String, weight: usize },
    #[error("Speaker {0:?} is not in the speaker id map")]
    UnknownSpeaker(String),
    #[error("Unknown symbol set: {0}")]
    UnknownSymbolSet(String),
    #[error("Unknown text cleaner: {0}")]
    UnknownCleaner(String),
    #[error("Invalid sampler configuration: {0}")]
    InvalidSampler(String),
    #[error("Malformed spectrogram cache file {path:?}: {reason}")]
    CorruptCache { path: PathBuf, reason: String },
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error("Ndarray shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),
    #[error("Invalid data configuration: {0}")]
    InvalidConfig(String),
    /// Failure inside an injected collaborator (custom transform, embedder, pitch tracker).
    #[error("{0}")]
    External(String),
}

impl DataError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DataError::Io { path: path.into(), source }
    }
}
