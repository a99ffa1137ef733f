//! The working list of examples: oversampled, optionally shuffled and filtered, with a dense
//! speaker map and a cached length per example for bucketing.

use std::{fs, path::Path};

use rand::{Rng, SeedableRng, rngs::StdRng, seq::{SliceRandom, index}};
use rayon::prelude::*;
use tracing::info;

use crate::config::{DataConfig, LengthSource};
use crate::error::{DataError, Result};
use crate::manifest::{Example, SpeakerIdMap, load_manifest, oversample};

pub struct ExampleStore {
    examples: Vec<Example>,
    speaker_ids: SpeakerIdMap,
    lengths: Vec<usize>,
    limit: Option<usize>,
}

impl ExampleStore {
    /// Loads every manifest matching `pattern` and builds the store from its rows.
    pub fn open(pattern: &str, config: &DataConfig) -> Result<Self> {
        Self::from_examples(load_manifest(pattern)?, config)
    }

    pub fn from_examples(rows: Vec<Example>, config: &DataConfig) -> Result<Self> {
        let loaded = rows.len();
        let mut examples = oversample(rows, &config.oversample_weights)?;
        if let Some(seed) = config.shuffle_seed {
            examples.shuffle(&mut StdRng::seed_from_u64(seed));
        }
        if config.filter_text_len {
            examples.retain(|e| {
                let chars = e.transcript.chars().count();
                config.min_text_len <= chars && chars <= config.max_text_len
            });
        }

        let speaker_ids = SpeakerIdMap::build(examples.iter().map(|e| e.speaker_id.as_str()));
        let lengths = examples
            .par_iter()
            .map(|e| estimate_length(&e.audio_path, config))
            .collect::<Result<Vec<_>>>()?;

        let limit = if config.debug { config.debug_dataset_size } else { None };
        info!(
            "Loaded {} manifest rows -> {} examples, {} speakers",
            loaded,
            examples.len(),
            speaker_ids.len()
        );
        Ok(Self { examples, speaker_ids, lengths, limit })
    }

    pub fn len(&self) -> usize {
        match self.limit {
            Some(cap) => cap.min(self.examples.len()),
            None => self.examples.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// # Panics
    /// If `index >= self.len()`.
    pub fn get(&self, index: usize) -> &Example {
        assert!(index < self.len(), "index {index} out of range for {} examples", self.len());
        &self.examples[index]
    }

    /// Precomputed frame-count estimate for every visible example.
    pub fn lengths(&self) -> &[usize] {
        &self.lengths[..self.len()]
    }

    pub fn speaker_ids(&self) -> &SpeakerIdMap {
        &self.speaker_ids
    }

    pub fn dense_speaker_id(&self, index: usize) -> Result<usize> {
        self.speaker_ids.get(&self.get(index).speaker_id)
    }

    /// `size` distinct random indices, e.g. for a fixed evaluation batch.
    pub fn sample_indices<R: Rng + ?Sized>(&self, size: usize, rng: &mut R) -> Vec<usize> {
        index::sample(rng, self.len(), size.min(self.len())).into_vec()
    }
}

/// Frames the sampler uses to bucket `audio_path`.
pub fn estimate_length(audio_path: &Path, config: &DataConfig) -> Result<usize> {
    let hop = config.hop_length.max(1);
    match config.length_source {
        LengthSource::FileSize => {
            let meta = fs::metadata(audio_path).map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => DataError::MissingAudio(audio_path.to_path_buf()),
                _ => DataError::io(audio_path, e),
            })?;
            // mono 16-bit: file_size / 2 samples
            Ok(meta.len() as usize / (2 * hop))
        }
        LengthSource::WavHeader => {
            let reader = hound::WavReader::open(audio_path).map_err(|e| match e {
                hound::Error::IoError(ref io) if io.kind() == std::io::ErrorKind::NotFound => {
                    DataError::MissingAudio(audio_path.to_path_buf())
                }
                source => DataError::Wav { path: audio_path.to_path_buf(), source },
            })?;
            Ok(reader.duration() as usize / hop)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn write_silence(dir: &Path, name: &str, samples: usize) -> std::path::PathBuf {
        let path = dir.join(name);
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..samples {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
        path
    }

    #[test]
    fn builds_oversampled_filtered_store() {
        let dir = TempDir::new().unwrap();
        let a = write_silence(dir.path(), "a.wav", 2560);
        let b = write_silence(dir.path(), "b.wav", 5120);
        let rows = vec![
            Example::new(&a, "short", "1"),
            Example::new(&b, "x".repeat(300), "2"),
            Example::new(&b, "fine text", "2"),
        ];
        let config = DataConfig {
            oversample_weights: HashMap::from([("1".to_string(), 2)]),
            filter_text_len: true,
            length_source: LengthSource::WavHeader,
            ..DataConfig::default()
        };
        let store = ExampleStore::from_examples(rows, &config).unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(store.lengths(), &[10, 10, 20]);
        assert_eq!(store.dense_speaker_id(2).unwrap(), 1);
    }

    #[test]
    fn file_size_length_needs_the_file() {
        let rows = vec![Example::new("/nonexistent/clip.wav", "hello", "0")];
        assert!(matches!(
            ExampleStore::from_examples(rows, &DataConfig::default()),
            Err(DataError::MissingAudio(_))
        ));
    }

    #[test]
    fn debug_cap_limits_len_and_lengths() {
        let dir = TempDir::new().unwrap();
        let a = write_silence(dir.path(), "a.wav", 512);
        let rows = (0..5).map(|i| Example::new(&a, format!("t{i}"), "0")).collect();
        let config = DataConfig { debug: true, debug_dataset_size: Some(2), ..DataConfig::default() };
        let store = ExampleStore::from_examples(rows, &config).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.lengths().len(), 2);
        let mut rng = StdRng::seed_from_u64(0);
        let picked = store.sample_indices(10, &mut rng);
        assert_eq!(picked.len(), 2);
    }

    #[test]
    fn seeded_shuffle_is_reproducible() {
        let dir = TempDir::new().unwrap();
        let a = write_silence(dir.path(), "a.wav", 512);
        let rows: Vec<Example> = (0..20).map(|i| Example::new(&a, format!("t{i}"), "0")).collect();
        let config = DataConfig { shuffle_seed: Some(1234), ..DataConfig::default() };
        let first = ExampleStore::from_examples(rows.clone(), &config).unwrap();
        let second = ExampleStore::from_examples(rows, &config).unwrap();
        let order = |s: &ExampleStore| (0..s.len()).map(|i| s.get(i).transcript.clone()).collect::<Vec<_>>();
        assert_eq!(order(&first), order(&second));
    }
}
