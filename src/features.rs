//! Per-example feature extraction.
//!
//! A [`FeatureExtractor`] only holds read-only configuration and its injected collaborators,
//! so one instance can be shared by every worker thread.

use std::sync::Arc;

use ndarray::{Array1, Array2};
use tracing::error;

use crate::audio::{SpectrogramKind, SpectrogramTransform, Stft, StftParams, load_wav};
use crate::cache::{NoCache, SpectrogramCache};
use crate::config::DataConfig;
use crate::dataset::ExampleStore;
use crate::error::{DataError, Result};
use crate::manifest::Example;
use crate::pitch::{PitchParams, PitchTracker, Yin, align_f0};
use crate::text::{SymbolEncoder, TextEncoder, intersperse};

/// Computes a fixed-size style vector from a transcript.
pub trait StyleEmbedder: Send + Sync {
    fn embed(&self, transcript: &str) -> Result<Vec<f32>>;
}

impl<F> StyleEmbedder for F
where
    F: Fn(&str) -> Result<Vec<f32>> + Send + Sync,
{
    fn embed(&self, transcript: &str) -> Result<Vec<f32>> {
        self(transcript)
    }
}

/// Text + mel record for attention-based acoustic models.
#[derive(Debug, Clone)]
pub struct TextMelRecord {
    pub text_sequence: Vec<i64>,
    /// `[n_mel_channels, frames]`
    pub mel: Array2<f32>,
    pub speaker_id: usize,
    /// One value per mel frame.
    pub f0: Option<Array1<f32>>,
    pub style_embedding: Option<Vec<f32>>,
}

/// Text + linear spectrogram + waveform record for end-to-end models.
#[derive(Debug, Clone)]
pub struct TextAudioRecord {
    pub text_sequence: Vec<i64>,
    /// `[filter_length / 2 + 1, frames]`
    pub spec: Array2<f32>,
    /// Normalized waveform.
    pub wav: Array1<f32>,
    pub speaker_id: usize,
}

pub struct FeatureExtractor {
    config: DataConfig,
    encoder: Arc<dyn TextEncoder>,
    transform: Arc<dyn SpectrogramTransform>,
    pitch: Arc<dyn PitchTracker>,
    cache: Arc<dyn SpectrogramCache>,
    style: Option<Arc<dyn StyleEmbedder>>,
}

impl FeatureExtractor {
    /// Default collaborators: symbol-set encoder, STFT, YIN and no spectrogram cache.
    pub fn new(config: DataConfig) -> Result<Self> {
        config.validate()?;
        let encoder = SymbolEncoder::new(&config.symbol_set, &config.text_cleaners, config.p_arpabet)?;
        let stft = Stft::new(StftParams::from_config(&config));
        Ok(Self {
            config,
            encoder: Arc::new(encoder),
            transform: Arc::new(stft),
            pitch: Arc::new(Yin),
            cache: Arc::new(NoCache),
            style: None,
        })
    }

    pub fn with_encoder(mut self, encoder: Arc<dyn TextEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn with_transform(mut self, transform: Arc<dyn SpectrogramTransform>) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_pitch_tracker(mut self, pitch: Arc<dyn PitchTracker>) -> Self {
        self.pitch = pitch;
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn SpectrogramCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_style_embedder(mut self, style: Arc<dyn StyleEmbedder>) -> Self {
        self.style = Some(style);
        self
    }

    pub fn config(&self) -> &DataConfig {
        &self.config
    }

    pub fn encoder(&self) -> &dyn TextEncoder {
        self.encoder.as_ref()
    }

    /// Encodes a transcript, interspersing the blank token when configured.
    pub fn text_sequence(&self, transcript: &str) -> Result<Vec<i64>> {
        let ids = if self.config.cleaned_text {
            self.encoder.encode_cleaned(transcript)?
        } else {
            self.encoder.encode(transcript)?
        };
        Ok(if self.config.intersperse_text { intersperse(&ids, self.config.intersperse_token) } else { ids })
    }

    /// Raw samples after checking the sample rate; never resamples.
    fn read_audio(&self, example: &Example) -> Result<Vec<f32>> {
        let (sample_rate, samples) = load_wav(&example.audio_path)?;
        if sample_rate != self.config.sampling_rate {
            return Err(DataError::SampleRateMismatch {
                path: example.audio_path.clone(),
                found: sample_rate,
                expected: self.config.sampling_rate,
            });
        }
        Ok(samples)
    }

    fn spectrogram(&self, example: &Example, normalized: &[f32], kind: SpectrogramKind) -> Result<Array2<f32>> {
        self.cache
            .get_or_compute(&example.audio_path, kind, &mut || self.transform.transform(normalized, kind))
    }

    fn pitch_contour(&self, samples: &[f32], n_frames: usize) -> Array1<f32> {
        let params = PitchParams {
            sample_rate: self.config.sampling_rate,
            frame_length: self.config.filter_length,
            hop_length: self.config.hop_length,
            f0_min: self.config.f0_min,
            f0_max: self.config.f0_max,
            harmonic_threshold: self.config.harmonic_threshold,
        };
        let track = self.pitch.track(samples, &params);
        Array1::from(align_f0(&track.f0, self.config.f0_edge_pad(), n_frames))
    }

    fn build_text_mel(&self, example: &Example, speaker_id: usize) -> Result<TextMelRecord> {
        let samples = self.read_audio(example)?;
        let text_sequence = self.text_sequence(&example.transcript)?;
        let normalized: Vec<f32> = samples.iter().map(|s| s / self.config.max_wav_value).collect();
        let mel = self.spectrogram(example, &normalized, SpectrogramKind::Mel)?;

        let style_embedding = match &self.style {
            Some(style) => Some(style.embed(&example.transcript)?),
            None => None,
        };
        // Pitch is tracked on the unnormalized waveform.
        let f0 = self.config.include_f0.then(|| self.pitch_contour(&samples, mel.ncols()));

        Ok(TextMelRecord { text_sequence, mel, speaker_id, f0, style_embedding })
    }

    fn build_text_audio(&self, example: &Example, speaker_id: usize) -> Result<TextAudioRecord> {
        let samples = self.read_audio(example)?;
        let text_sequence = self.text_sequence(&example.transcript)?;
        let wav: Array1<f32> = samples.iter().map(|s| s / self.config.max_wav_value).collect();
        let spec = self.spectrogram(example, wav.as_slice().unwrap_or_default(), SpectrogramKind::Linear)?;
        Ok(TextAudioRecord { text_sequence, spec, wav, speaker_id })
    }

    pub fn extract_text_mel(&self, example: &Example, speaker_id: usize) -> Result<TextMelRecord> {
        self.build_text_mel(example, speaker_id).inspect_err(|e| {
            error!("Error while getting data: {:?}: {}", example.audio_path, e);
        })
    }

    pub fn extract_text_audio(&self, example: &Example, speaker_id: usize) -> Result<TextAudioRecord> {
        self.build_text_audio(example, speaker_id).inspect_err(|e| {
            error!("Error while getting data: {:?}: {}", example.audio_path, e);
        })
    }

    /// Looks up example `index` in `store` and extracts its text + mel record.
    pub fn text_mel_at(&self, store: &ExampleStore, index: usize) -> Result<TextMelRecord> {
        self.extract_text_mel(store.get(index), store.dense_speaker_id(index)?)
    }

    pub fn text_audio_at(&self, store: &ExampleStore, index: usize) -> Result<TextAudioRecord> {
        self.extract_text_audio(store.get(index), store.dense_speaker_id(index)?)
    }
}
