//! Glue from sampled index batches to collated batches.

use rand::Rng;
use rayon::prelude::*;

use crate::collate::{TextAudioBatch, TextAudioCollate, TextMelBatch, TextMelCollate};
use crate::dataset::ExampleStore;
use crate::error::Result;
use crate::features::{FeatureExtractor, TextAudioRecord, TextMelRecord};
use crate::sampler::DistributedBucketSampler;

/// A collator together with the record type it consumes.
pub trait Collate: Send + Sync {
    type Record: Send;
    type Batch;

    fn extract(&self, extractor: &FeatureExtractor, store: &ExampleStore, index: usize) -> Result<Self::Record>;
    fn collate(&self, records: &[Self::Record]) -> Self::Batch;
}

impl Collate for TextMelCollate {
    type Record = TextMelRecord;
    type Batch = TextMelBatch;

    fn extract(&self, extractor: &FeatureExtractor, store: &ExampleStore, index: usize) -> Result<TextMelRecord> {
        extractor.text_mel_at(store, index)
    }

    fn collate(&self, records: &[TextMelRecord]) -> TextMelBatch {
        TextMelCollate::collate(self, records)
    }
}

impl Collate for TextAudioCollate {
    type Record = TextAudioRecord;
    type Batch = TextAudioBatch;

    fn extract(&self, extractor: &FeatureExtractor, store: &ExampleStore, index: usize) -> Result<TextAudioRecord> {
        extractor.text_audio_at(store, index)
    }

    fn collate(&self, records: &[TextAudioRecord]) -> TextAudioBatch {
        TextAudioCollate::collate(self, records)
    }
}

/// Materializes index batches: records are extracted in parallel, then collated.
///
/// Everything is borrowed read-only, so any number of loaders may share one store and
/// extractor. A failing example fails its whole batch; the caller decides whether to skip it.
pub struct BatchLoader<'a, C: Collate> {
    store: &'a ExampleStore,
    extractor: &'a FeatureExtractor,
    collate: &'a C,
}

impl<'a, C: Collate> BatchLoader<'a, C> {
    pub fn new(store: &'a ExampleStore, extractor: &'a FeatureExtractor, collate: &'a C) -> Self {
        Self { store, extractor, collate }
    }

    pub fn load(&self, indices: &[usize]) -> Result<C::Batch> {
        let records = indices
            .par_iter()
            .map(|&index| self.collate.extract(self.extractor, self.store, index))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.collate.collate(&records))
    }

    /// Collated batches for the sampler's current epoch, in sampler order.
    pub fn epoch<'s>(&'s self, sampler: &DistributedBucketSampler) -> impl Iterator<Item = Result<C::Batch>> + 's {
        sampler.batches().into_iter().map(move |indices| self.load(&indices))
    }

    /// A batch of `size` distinct random examples.
    pub fn sample_test_batch<R: Rng + ?Sized>(&self, size: usize, rng: &mut R) -> Result<C::Batch> {
        self.load(&self.store.sample_indices(size, rng))
    }
}
