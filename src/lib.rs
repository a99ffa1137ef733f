//! Turns paired audio/transcript examples into padded, length-bucketed training batches.
//!
//! The flow is: manifest -> [`ExampleStore`] (oversample, filter, cache lengths) ->
//! [`DistributedBucketSampler`] (index batches per epoch and replica) -> [`FeatureExtractor`]
//! (one record per index) -> [`TextMelCollate`] / [`TextAudioCollate`] (dense batches).
//! [`BatchLoader`] ties the last three together.

pub mod audio;
pub mod cache;
pub mod collate;
pub mod config;
pub mod dataset;
pub mod error;
pub mod features;
pub mod loader;
pub mod manifest;
pub mod pitch;
pub mod sampler;
pub mod text;

pub use audio::{SpectrogramKind, SpectrogramTransform, Stft, StftParams};
pub use cache::{MemoryCache, NoCache, SidecarCache, SpectrogramCache};
pub use collate::{
    InferenceBatch, TextAudioBatch, TextAudioCollate, TextMelBatch, TextMelCollate, pad_sequences,
    prepare_input_sequence,
};
pub use config::{DataConfig, LengthSource, SamplerConfig};
pub use dataset::ExampleStore;
pub use error::{DataError, Result};
pub use features::{FeatureExtractor, StyleEmbedder, TextAudioRecord, TextMelRecord};
pub use loader::{BatchLoader, Collate};
pub use manifest::{Example, SpeakerIdMap};
pub use pitch::{PitchTrack, PitchTracker, Yin};
pub use sampler::DistributedBucketSampler;
pub use text::{SymbolEncoder, TextEncoder, intersperse};
