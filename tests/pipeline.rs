//! Manifest -> store -> sampler -> extractor -> collator on synthetic audio.

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use speech_bake::{
    BatchLoader, DataConfig, DataError, DistributedBucketSampler, ExampleStore, FeatureExtractor, LengthSource,
    MemoryCache, SamplerConfig, SidecarCache, TextAudioCollate, TextMelCollate,
};
use tempfile::TempDir;

const SAMPLE_RATE: u32 = 22050;

fn write_wav(path: &Path, samples: usize) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..samples {
        let v = (2.0 * std::f32::consts::PI * 150.0 * i as f32 / SAMPLE_RATE as f32).sin();
        writer.write_sample((v * 8000.0) as i16).unwrap();
    }
    writer.finalize().unwrap();
}

/// Writes `clips` as `(samples, transcript, speaker)` and a manifest listing them.
fn fixture(clips: &[(usize, &str, &str)]) -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let mut manifest = String::new();
    for (i, (samples, text, speaker)) in clips.iter().enumerate() {
        let wav = dir.path().join(format!("clip{i}.wav"));
        write_wav(&wav, *samples);
        manifest.push_str(&format!("{}|{}|{}\n", wav.display(), text, speaker));
    }
    let manifest_path = dir.path().join("train.txt");
    fs::write(&manifest_path, manifest).unwrap();
    (dir, manifest_path)
}

fn clips() -> Vec<(usize, &'static str, &'static str)> {
    vec![
        (2560, "one", "11"),
        (2816, "two two", "11"),
        (3072, "three three three", "4"),
        (5120, "four", "4"),
        (5376, "five five", "11"),
        (5632, "six six six", "4"),
        (20000, "far too long for the buckets", "4"),
    ]
}

fn config() -> DataConfig {
    DataConfig {
        length_source: LengthSource::WavHeader,
        ..DataConfig::default()
    }
}

#[test]
fn text_mel_epoch_end_to_end() {
    let (_dir, manifest) = fixture(&clips());
    let store = ExampleStore::open(manifest.to_str().unwrap(), &config()).unwrap();
    assert_eq!(store.len(), 7);
    assert_eq!(store.speaker_ids().len(), 2);
    assert_eq!(store.dense_speaker_id(0).unwrap(), 1);

    let mut sampler = DistributedBucketSampler::new(
        store.lengths(),
        &SamplerConfig {
            batch_size: 2,
            boundaries: vec![5, 15, 30],
            num_replicas: 1,
            rank: 0,
            shuffle: true,
        },
    )
    .unwrap();
    sampler.set_epoch(0);
    assert_eq!(sampler.len(), 4);

    let cache = Arc::new(MemoryCache::default());
    let extractor = FeatureExtractor::new(config()).unwrap().with_cache(cache.clone());
    let collate = TextMelCollate::new(2, false);
    let loader = BatchLoader::new(&store, &extractor, &collate);

    let mut seen = HashSet::new();
    for (indices, batch) in sampler.batches().into_iter().zip(loader.epoch(&sampler)) {
        let batch = batch.unwrap();
        seen.extend(indices);
        assert_eq!(batch.mel_padded.dim().0, 2);
        assert_eq!(batch.mel_padded.dim().1, 80);
        assert_eq!(batch.mel_padded.dim().2 % 2, 0);
        assert!(batch.input_lengths[0] >= batch.input_lengths[1]);
        let last = batch.output_lengths[0] as usize - 1;
        assert_eq!(batch.gate_padded[[0, last]], 1.0);
    }
    // The 20000-sample clip is longer than the last boundary.
    assert_eq!(seen, (0..6).collect::<HashSet<_>>());
    assert_eq!(cache.len(), 6);
}

#[test]
fn text_audio_batches_use_sidecar_cache() {
    let (dir, manifest) = fixture(&clips()[..4]);
    let store = ExampleStore::open(manifest.to_str().unwrap(), &config()).unwrap();
    let extractor = FeatureExtractor::new(config()).unwrap().with_cache(Arc::new(SidecarCache));
    let collate = TextAudioCollate::new(true);
    let loader = BatchLoader::new(&store, &extractor, &collate);

    let batch = loader.load(&[0, 3, 1]).unwrap();
    assert_eq!(batch.ids_sorted_decreasing, Some(vec![1, 2, 0]));
    assert_eq!(batch.wav_lengths.to_vec(), vec![5120, 2816, 2560]);
    assert_eq!(batch.spec_padded.dim().1, 513);
    assert!(dir.path().join("clip3.spec.parquet").exists());

    // Second load reads the sidecars back and yields identical spectrograms.
    let again = loader.load(&[0, 3, 1]).unwrap();
    assert_eq!(again.spec_padded, batch.spec_padded);
}

#[test]
fn missing_audio_fails_the_batch() {
    let (dir, manifest) = fixture(&clips()[..2]);
    let store = ExampleStore::open(manifest.to_str().unwrap(), &config()).unwrap();
    fs::remove_file(dir.path().join("clip1.wav")).unwrap();

    let extractor = FeatureExtractor::new(config()).unwrap();
    let collate = TextMelCollate::new(1, false);
    let loader = BatchLoader::new(&store, &extractor, &collate);
    assert!(matches!(loader.load(&[0, 1]), Err(DataError::MissingAudio(_))));
}

#[test]
fn oversampled_speakers_appear_weight_times() {
    let (_dir, manifest) = fixture(&clips()[..3]);
    let config = DataConfig {
        oversample_weights: [("4".to_string(), 3)].into_iter().collect(),
        ..config()
    };
    let store = ExampleStore::open(manifest.to_str().unwrap(), &config).unwrap();
    assert_eq!(store.len(), 2 + 3);
    let speaker_4 = (0..store.len()).filter(|&i| store.get(i).speaker_id == "4").count();
    assert_eq!(speaker_4, 3);
}

#[test]
fn empty_manifest_glob_is_an_error() {
    let dir = TempDir::new().unwrap();
    let pattern = format!("{}/*.txt", dir.path().display());
    assert!(matches!(
        ExampleStore::open(&pattern, &DataConfig::default()),
        Err(DataError::EmptyManifestGlob(_))
    ));
}
