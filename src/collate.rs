//! Zero-padding of variable-length records into dense batches.

use std::{
    cmp::Reverse,
    sync::atomic::{AtomicUsize, Ordering},
};

use ndarray::{Array1, Array2, Array3, s};

use crate::error::Result;
use crate::features::{TextAudioRecord, TextMelRecord};
use crate::text::TextEncoder;

/// Right zero-pads `sequences` to the longest one, keeping input order.
pub fn pad_sequences(sequences: &[Vec<i64>]) -> (Array2<i64>, Array1<i64>) {
    let max_len = sequences.iter().map(Vec::len).max().unwrap_or(0);
    let mut padded = Array2::<i64>::zeros((sequences.len(), max_len));
    for (i, seq) in sequences.iter().enumerate() {
        padded.slice_mut(s![i, ..seq.len()]).assign(&Array1::from(seq.clone()));
    }
    let lengths = sequences.iter().map(|seq| seq.len() as i64).collect();
    (padded, lengths)
}

/// Model inputs for synthesis from raw text.
#[derive(Debug, Clone)]
pub struct InferenceBatch {
    pub text_int_padded: Array2<i64>,
    pub input_lengths: Array1<i64>,
    pub speaker_ids: Option<Array1<i64>>,
}

impl InferenceBatch {
    pub fn with_speaker_ids(mut self, speaker_ids: Array1<i64>) -> Self {
        self.speaker_ids = Some(speaker_ids);
        self
    }
}

/// Encodes and pads a list of texts for inference.
pub fn prepare_input_sequence(texts: &[&str], encoder: &dyn TextEncoder) -> Result<InferenceBatch> {
    let sequences = texts.iter().map(|t| encoder.encode(t)).collect::<Result<Vec<_>>>()?;
    let (text_int_padded, input_lengths) = pad_sequences(&sequences);
    Ok(InferenceBatch { text_int_padded, input_lengths, speaker_ids: None })
}

/// Indices of `keys` ordered by descending key; ties keep their input order.
fn sorted_decreasing(keys: impl Iterator<Item = usize>) -> Vec<usize> {
    let keys: Vec<usize> = keys.collect();
    let mut order: Vec<usize> = (0..keys.len()).collect();
    order.sort_by_key(|&i| Reverse(keys[i]));
    order
}

#[derive(Debug, Clone)]
pub struct TextMelBatch {
    /// `[batch, max_input_len]`, sorted by descending text length.
    pub text_padded: Array2<i64>,
    pub input_lengths: Array1<i64>,
    /// `[batch, n_mel_channels, max_target_len]`
    pub mel_padded: Array3<f32>,
    /// 1 from the last valid frame onward.
    pub gate_padded: Array2<f32>,
    pub output_lengths: Array1<i64>,
    pub speaker_ids: Array1<i64>,
    /// `[batch, 1, max_target_len]` when pitch collation is on.
    pub f0_padded: Option<Array3<f32>>,
    /// `[batch, embedding_dim]` when the records carry style embeddings.
    pub style_embeddings: Option<Array2<f32>>,
}

/// Collates [`TextMelRecord`]s.
///
/// The frames-per-step factor can be changed between calls (gradual training starts with a
/// large reduction factor and lowers it); padding always rounds the target length up to it.
#[derive(Debug)]
pub struct TextMelCollate {
    n_frames_per_step: AtomicUsize,
    include_f0: bool,
}

impl TextMelCollate {
    pub fn new(n_frames_per_step: usize, include_f0: bool) -> Self {
        Self {
            n_frames_per_step: AtomicUsize::new(n_frames_per_step.max(1)),
            include_f0,
        }
    }

    pub fn set_frames_per_step(&self, n_frames_per_step: usize) {
        self.n_frames_per_step.store(n_frames_per_step.max(1), Ordering::Relaxed);
    }

    pub fn frames_per_step(&self) -> usize {
        self.n_frames_per_step.load(Ordering::Relaxed)
    }

    /// # Panics
    /// On an empty batch, on records that disagree on mel channels or style-embedding
    /// presence, or on a record without pitch when pitch collation is on.
    pub fn collate(&self, batch: &[TextMelRecord]) -> TextMelBatch {
        assert!(!batch.is_empty(), "cannot collate an empty batch");
        let n = batch.len();
        let order = sorted_decreasing(batch.iter().map(|r| r.text_sequence.len()));

        let max_input_len = batch[order[0]].text_sequence.len();
        let mut text_padded = Array2::<i64>::zeros((n, max_input_len));
        let mut input_lengths = Array1::<i64>::zeros(n);
        for (i, &src) in order.iter().enumerate() {
            let text = &batch[src].text_sequence;
            text_padded.slice_mut(s![i, ..text.len()]).assign(&Array1::from(text.clone()));
            input_lengths[i] = text.len() as i64;
        }

        let num_mels = batch[0].mel.nrows();
        let step = self.frames_per_step();
        let mut max_target_len = batch.iter().map(|r| r.mel.ncols()).max().unwrap_or(0);
        if max_target_len % step != 0 {
            max_target_len += step - max_target_len % step;
        }

        let mut mel_padded = Array3::<f32>::zeros((n, num_mels, max_target_len));
        let mut gate_padded = Array2::<f32>::zeros((n, max_target_len));
        let mut output_lengths = Array1::<i64>::zeros(n);
        let mut speaker_ids = Array1::<i64>::zeros(n);
        let mut f0_padded = self.include_f0.then(|| Array3::<f32>::zeros((n, 1, max_target_len)));

        for (i, &src) in order.iter().enumerate() {
            let record = &batch[src];
            let frames = record.mel.ncols();
            assert_eq!(record.mel.nrows(), num_mels, "mel channel count differs within the batch");
            mel_padded.slice_mut(s![i, .., ..frames]).assign(&record.mel);
            gate_padded.slice_mut(s![i, frames.saturating_sub(1)..]).fill(1.0);
            output_lengths[i] = frames as i64;
            speaker_ids[i] = record.speaker_id as i64;

            if let Some(f0_padded) = f0_padded.as_mut() {
                let f0 = record.f0.as_ref().expect("pitch collation needs an f0 contour on every record");
                let len = f0.len().min(max_target_len);
                f0_padded.slice_mut(s![i, 0, ..len]).assign(&f0.slice(s![..len]));
            }
        }

        let style_embeddings = stack_style_embeddings(batch, &order);

        TextMelBatch {
            text_padded,
            input_lengths,
            mel_padded,
            gate_padded,
            output_lengths,
            speaker_ids,
            f0_padded,
            style_embeddings,
        }
    }
}

fn stack_style_embeddings(batch: &[TextMelRecord], order: &[usize]) -> Option<Array2<f32>> {
    let present = batch.iter().filter(|r| r.style_embedding.is_some()).count();
    assert!(
        present == 0 || present == batch.len(),
        "style embeddings must be present on all records or none ({present} of {})",
        batch.len()
    );
    if present == 0 {
        return None;
    }
    let dim = batch[0].style_embedding.as_ref().map_or(0, Vec::len);
    let mut stacked = Array2::<f32>::zeros((batch.len(), dim));
    for (i, &src) in order.iter().enumerate() {
        let embedding = batch[src].style_embedding.as_deref().unwrap_or_default();
        assert_eq!(embedding.len(), dim, "style embedding size differs within the batch");
        stacked.row_mut(i).assign(&Array1::from(embedding.to_vec()));
    }
    Some(stacked)
}

#[derive(Debug, Clone)]
pub struct TextAudioBatch {
    pub text_padded: Array2<i64>,
    pub text_lengths: Array1<i64>,
    /// `[batch, spec_channels, max_spec_len]`, sorted by descending spectrogram length.
    pub spec_padded: Array3<f32>,
    pub spec_lengths: Array1<i64>,
    /// `[batch, 1, max_wav_len]`
    pub wav_padded: Array3<f32>,
    pub wav_lengths: Array1<i64>,
    pub speaker_ids: Array1<i64>,
    /// Position `i` holds the input index of output row `i`.
    pub ids_sorted_decreasing: Option<Vec<usize>>,
}

/// Collates [`TextAudioRecord`]s, each stream padded to its own maximum.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextAudioCollate {
    pub return_ids: bool,
}

impl TextAudioCollate {
    pub fn new(return_ids: bool) -> Self {
        Self { return_ids }
    }

    /// # Panics
    /// On an empty batch or records that disagree on spectrogram channels.
    pub fn collate(&self, batch: &[TextAudioRecord]) -> TextAudioBatch {
        assert!(!batch.is_empty(), "cannot collate an empty batch");
        let n = batch.len();
        let order = sorted_decreasing(batch.iter().map(|r| r.spec.ncols()));

        let max_text_len = batch.iter().map(|r| r.text_sequence.len()).max().unwrap_or(0);
        let max_spec_len = batch.iter().map(|r| r.spec.ncols()).max().unwrap_or(0);
        let max_wav_len = batch.iter().map(|r| r.wav.len()).max().unwrap_or(0);
        let spec_channels = batch[0].spec.nrows();

        let mut text_padded = Array2::<i64>::zeros((n, max_text_len));
        let mut spec_padded = Array3::<f32>::zeros((n, spec_channels, max_spec_len));
        let mut wav_padded = Array3::<f32>::zeros((n, 1, max_wav_len));
        let mut text_lengths = Array1::<i64>::zeros(n);
        let mut spec_lengths = Array1::<i64>::zeros(n);
        let mut wav_lengths = Array1::<i64>::zeros(n);
        let mut speaker_ids = Array1::<i64>::zeros(n);

        for (i, &src) in order.iter().enumerate() {
            let row = &batch[src];
            assert_eq!(row.spec.nrows(), spec_channels, "spectrogram channel count differs within the batch");

            let text = &row.text_sequence;
            text_padded.slice_mut(s![i, ..text.len()]).assign(&Array1::from(text.clone()));
            text_lengths[i] = text.len() as i64;

            spec_padded.slice_mut(s![i, .., ..row.spec.ncols()]).assign(&row.spec);
            spec_lengths[i] = row.spec.ncols() as i64;

            wav_padded.slice_mut(s![i, 0, ..row.wav.len()]).assign(&row.wav);
            wav_lengths[i] = row.wav.len() as i64;

            speaker_ids[i] = row.speaker_id as i64;
        }

        TextAudioBatch {
            text_padded,
            text_lengths,
            spec_padded,
            spec_lengths,
            wav_padded,
            wav_lengths,
            speaker_ids,
            ids_sorted_decreasing: self.return_ids.then_some(order),
        }
    }
}
