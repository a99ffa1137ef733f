//! Configuration for how examples are turned into training batches.
//!
//! Everything the data pipeline can be tuned with lives in [`DataConfig`]. It mirrors the
//! hyperparameter files used by the training jobs, so it can be loaded straight from their
//! JSON with [`DataConfig::from_json_file`]; any key that is missing falls back to its default.
//!
//! The static tables (symbol sets, cache suffixes) follow below it. Symbol sets are looked up
//! by name, so a hyperparameter file only has to say `"symbol_set": "ipa"`.

use std::{collections::HashMap, fs, path::Path};

use phf::phf_map;
use serde::{Deserialize, Serialize};

use crate::error::{DataError, Result};

// Seed for the one-off shuffle of the example list before filtering, used when shuffling is
// requested without an explicit `shuffle_seed`.
pub const DEFAULT_SHUFFLE_SEED: u64 = 1234;

// Ceiling of 16-bit PCM audio.
pub const DEFAULT_MAX_WAV_VALUE: f32 = 32768.0;

// Sidecar suffixes for cached spectrograms, appended to the audio file's stem.
pub const LINEAR_CACHE_SUFFIX: &str = "spec.parquet";
pub const MEL_CACHE_SUFFIX: &str = "mel.parquet";

/// How the per-example length used for bucketing is estimated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LengthSource {
    /// `file_size / (2 * hop_length)`: assumes mono 16-bit PCM, needs only a `stat`.
    #[default]
    FileSize,
    /// `duration / hop_length` read from the WAV header.
    WavHeader,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Cleaner names applied to transcripts before symbolization, in order.
    pub text_cleaners: Vec<String>,
    /// Probability of swapping a word for its ARPAbet spelling.
    pub p_arpabet: f64,
    /// Name of an entry in [`SYMBOL_SETS`].
    pub symbol_set: String,
    /// Transcripts are already cleaned symbol strings; skip the cleaners.
    pub cleaned_text: bool,
    /// Insert `intersperse_token` between every pair of symbols and at both ends.
    pub intersperse_text: bool,
    pub intersperse_token: i64,

    pub sampling_rate: u32,
    pub max_wav_value: f32,
    pub filter_length: usize,
    pub hop_length: usize,
    pub win_length: usize,
    pub n_mel_channels: usize,
    pub mel_fmin: f64,
    pub mel_fmax: Option<f64>,
    /// Explicit reflect padding on both edges. `None` centres frames with `filter_length / 2`.
    pub padding: Option<usize>,

    pub include_f0: bool,
    pub f0_min: u32,
    pub f0_max: u32,
    pub harmonic_threshold: f32,

    /// Speaker id -> number of times each of its rows appears. Unlisted speakers appear once.
    pub oversample_weights: HashMap<String, usize>,
    /// Keep only transcripts whose character count lies in `[min_text_len, max_text_len]`.
    pub filter_text_len: bool,
    pub min_text_len: usize,
    pub max_text_len: usize,
    /// Shuffle the oversampled list with this seed before filtering.
    pub shuffle_seed: Option<u64>,
    pub length_source: LengthSource,

    pub debug: bool,
    pub debug_dataset_size: Option<usize>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            text_cleaners: vec!["english_cleaners".to_string()],
            p_arpabet: 0.0,
            symbol_set: "nvidia_taco2".to_string(),
            cleaned_text: false,
            intersperse_text: false,
            intersperse_token: 0,
            sampling_rate: 22050,
            max_wav_value: DEFAULT_MAX_WAV_VALUE,
            filter_length: 1024,
            hop_length: 256,
            win_length: 1024,
            n_mel_channels: 80,
            mel_fmin: 0.0,
            mel_fmax: Some(8000.0),
            padding: None,
            include_f0: false,
            f0_min: 80,
            f0_max: 880,
            harmonic_threshold: 0.25,
            oversample_weights: HashMap::new(),
            filter_text_len: false,
            min_text_len: 1,
            max_text_len: 190,
            shuffle_seed: None,
            length_source: LengthSource::FileSize,
            debug: false,
            debug_dataset_size: None,
        }
    }
}

impl DataConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| DataError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects STFT and pitch parameters that would make frame arithmetic meaningless.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(DataError::InvalidConfig(reason));
        if self.filter_length == 0 || self.hop_length == 0 || self.win_length == 0 {
            return invalid(format!(
                "filter_length ({}), hop_length ({}) and win_length ({}) must all be positive",
                self.filter_length, self.hop_length, self.win_length
            ));
        }
        if self.win_length > self.filter_length {
            return invalid(format!(
                "win_length ({}) exceeds filter_length ({})",
                self.win_length, self.filter_length
            ));
        }
        if self.f0_min > self.f0_max {
            return invalid(format!("f0_min ({}) exceeds f0_max ({})", self.f0_min, self.f0_max));
        }
        Ok(())
    }

    /// Shuffles the example list with [`DEFAULT_SHUFFLE_SEED`] unless a seed is already set.
    pub fn with_default_shuffle(mut self) -> Self {
        self.shuffle_seed.get_or_insert(DEFAULT_SHUFFLE_SEED);
        self
    }

    /// Frames of zero pitch added on each edge of a pitch contour so that it lines up
    /// with the spectrogram frames.
    pub fn f0_edge_pad(&self) -> usize {
        (self.filter_length / self.hop_length) / 2
    }

    /// Padding used for the linear spectrograms of the text+audio path.
    pub fn linear_padding(&self) -> usize {
        self.filter_length.saturating_sub(self.hop_length) / 2
    }
}

/// Parameters of the length-bucketed distributed sampler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerConfig {
    pub batch_size: usize,
    /// Ascending bucket boundaries; bucket `i` holds lengths in `(b[i], b[i + 1]]`.
    pub boundaries: Vec<usize>,
    pub num_replicas: usize,
    pub rank: usize,
    pub shuffle: bool,
}

// Definition of a symbol set. The final symbol list is
// `[pad] + special + punctuation + letters (+ "@"-prefixed ARPAbet phones)`.
pub struct SymbolSetSpec {
    pub pad: &'static str,
    pub special: &'static str,
    pub punctuation: &'static str,
    pub letters: &'static str,
    pub arpabet: bool,
}

pub const SYMBOL_SETS: phf::Map<&'static str, SymbolSetSpec> = phf_map! {
    "default" => SymbolSetSpec {
        pad: "_",
        special: "-",
        punctuation: "!'\",.:;? ",
        letters: "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz",
        arpabet: true,
    },
    "nvidia_taco2" => SymbolSetSpec {
        pad: "_",
        special: "-",
        punctuation: "!'(),.:;? ",
        letters: "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz",
        arpabet: true,
    },
    "grad_tts" => SymbolSetSpec {
        pad: "_",
        special: "-",
        punctuation: "!'(),.:;? ",
        letters: "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz",
        arpabet: true,
    },
    // Symbols for phonemized (IPA) transcripts. These are fed with `cleaned_text`.
    "ipa" => SymbolSetSpec {
        pad: "_",
        special: "",
        punctuation: ";:,.!?¡¿—…\"«»“” ",
        letters: "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyzɑɐɒæɓʙβɔɕçɗɖðʤəɘɚɛɜɝɞɟʄɡɠɢʛɦɧħɥʜɨɪʝɭɬɫɮʟɱɯɰŋɳɲɴøɵɸθœɶʘɹɺɾɻʀʁɽʂʃʈʧʉʊʋⱱʌɣɤʍχʎʏʑʐʒʔʡʕʢǀǁǂǃˈˌːˑʼʴʰʱʲʷˠˤ˞↓↑→↗↘'̩'ᵻ",
        arpabet: false,
    },
};

// CMU dictionary phones with stress markers.
pub const ARPABET_PHONES: &[&str] = &[
    "AA", "AA0", "AA1", "AA2", "AE", "AE0", "AE1", "AE2", "AH", "AH0", "AH1", "AH2",
    "AO", "AO0", "AO1", "AO2", "AW", "AW0", "AW1", "AW2", "AY", "AY0", "AY1", "AY2",
    "B", "CH", "D", "DH", "EH", "EH0", "EH1", "EH2", "ER", "ER0", "ER1", "ER2",
    "EY", "EY0", "EY1", "EY2", "F", "G", "HH", "IH", "IH0", "IH1", "IH2", "IY",
    "IY0", "IY1", "IY2", "JH", "K", "L", "M", "N", "NG", "OW", "OW0", "OW1",
    "OW2", "OY", "OY0", "OY1", "OY2", "P", "R", "S", "SH", "T", "TH", "UH",
    "UH0", "UH1", "UH2", "UW", "UW0", "UW1", "UW2", "V", "W", "Y", "Z", "ZH",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: DataConfig =
            serde_json::from_str(r#"{"sampling_rate": 24000, "oversample_weights": {"7": 3}}"#).unwrap();
        assert_eq!(config.sampling_rate, 24000);
        assert_eq!(config.oversample_weights.get("7"), Some(&3));
        assert_eq!(config.hop_length, 256);
        assert_eq!(config.symbol_set, "nvidia_taco2");
        assert_eq!(config.length_source, LengthSource::FileSize);
    }

    #[test]
    fn f0_pad_is_half_the_frame_ratio() {
        let config = DataConfig::default();
        assert_eq!(config.f0_edge_pad(), 2);
        assert_eq!(config.linear_padding(), 384);
    }

    #[test]
    fn defaults_are_valid() {
        assert!(DataConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_frame_sizes_are_rejected() {
        for config in [
            DataConfig { hop_length: 0, ..DataConfig::default() },
            DataConfig { filter_length: 0, ..DataConfig::default() },
            DataConfig { win_length: 0, ..DataConfig::default() },
        ] {
            assert!(matches!(config.validate(), Err(DataError::InvalidConfig(_))));
        }
    }

    #[test]
    fn window_longer_than_filter_is_rejected() {
        let config = DataConfig { win_length: 2048, filter_length: 1024, ..DataConfig::default() };
        assert!(matches!(config.validate(), Err(DataError::InvalidConfig(_))));
    }

    #[test]
    fn inverted_f0_range_is_rejected() {
        let config = DataConfig { f0_min: 900, f0_max: 80, ..DataConfig::default() };
        assert!(matches!(config.validate(), Err(DataError::InvalidConfig(_))));
    }

    #[test]
    fn json_file_with_zero_hop_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("hparams.json");
        fs::write(&path, r#"{"hop_length": 0}"#).unwrap();
        assert!(matches!(DataConfig::from_json_file(&path), Err(DataError::InvalidConfig(_))));
    }

    #[test]
    fn default_shuffle_keeps_an_explicit_seed() {
        assert_eq!(DataConfig::default().with_default_shuffle().shuffle_seed, Some(DEFAULT_SHUFFLE_SEED));
        let seeded = DataConfig { shuffle_seed: Some(7), ..DataConfig::default() };
        assert_eq!(seeded.with_default_shuffle().shuffle_seed, Some(7));
    }

    #[test]
    fn arpabet_has_every_cmu_phone() {
        assert_eq!(ARPABET_PHONES.len(), 84);
        assert!(SYMBOL_SETS.get("ipa").is_some());
    }
}
