//! Advisory on-disk and in-memory caches for computed spectrograms.
//!
//! A cache never changes what a feature looks like, only whether it is recomputed. Sidecar
//! files are written to a unique temporary file and renamed into place, so two workers racing
//! on the same audio file both produce a complete file and the last rename wins.

use std::{
    collections::HashMap,
    fs::{self, File},
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use arrow::{
    array::{Array, ArrayRef, Float32Array, RecordBatch},
    datatypes::{DataType, Field, Schema},
};
use ndarray::Array2;
use parquet::arrow::{ArrowWriter, arrow_reader::ParquetRecordBatchReaderBuilder};
use tracing::debug;

use crate::audio::SpectrogramKind;
use crate::config::{LINEAR_CACHE_SUFFIX, MEL_CACHE_SUFFIX};
use crate::error::{DataError, Result};

pub trait SpectrogramCache: Send + Sync {
    /// Returns the cached spectrogram for `audio_path`, or computes and stores it.
    fn get_or_compute(
        &self,
        audio_path: &Path,
        kind: SpectrogramKind,
        compute: &mut dyn FnMut() -> Result<Array2<f32>>,
    ) -> Result<Array2<f32>>;
}

/// Always recomputes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl SpectrogramCache for NoCache {
    fn get_or_compute(
        &self,
        _audio_path: &Path,
        _kind: SpectrogramKind,
        compute: &mut dyn FnMut() -> Result<Array2<f32>>,
    ) -> Result<Array2<f32>> {
        compute()
    }
}

/// Process-local cache keyed by audio path.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<(PathBuf, SpectrogramKind), Arc<Array2<f32>>>>,
}

impl MemoryCache {
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SpectrogramCache for MemoryCache {
    fn get_or_compute(
        &self,
        audio_path: &Path,
        kind: SpectrogramKind,
        compute: &mut dyn FnMut() -> Result<Array2<f32>>,
    ) -> Result<Array2<f32>> {
        let key = (audio_path.to_path_buf(), kind);
        if let Some(hit) = self.entries.lock().ok().and_then(|e| e.get(&key).cloned()) {
            return Ok(hit.as_ref().clone());
        }
        // Computed outside the lock; concurrent misses each compute the same value.
        let spec = compute()?;
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key, Arc::new(spec.clone()));
        }
        Ok(spec)
    }
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Stores each spectrogram as a Parquet file next to its audio: `clip.wav` -> `clip.spec.parquet`.
///
/// The file holds one `Float32` column per channel (`ch0`, `ch1`, ...) and one row per frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct SidecarCache;

impl SidecarCache {
    pub fn sidecar_path(audio_path: &Path, kind: SpectrogramKind) -> PathBuf {
        let suffix = match kind {
            SpectrogramKind::Linear => LINEAR_CACHE_SUFFIX,
            SpectrogramKind::Mel => MEL_CACHE_SUFFIX,
        };
        audio_path.with_extension(suffix)
    }

    pub fn read(path: &Path) -> Result<Array2<f32>> {
        let file = File::open(path).map_err(|e| DataError::io(path, e))?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        let channels = builder.schema().fields().len();
        let reader = builder.build()?;

        let mut columns: Vec<Vec<f32>> = vec![Vec::new(); channels];
        for batch in reader {
            let batch = batch?;
            for (c, column) in columns.iter_mut().enumerate() {
                let values = batch
                    .column(c)
                    .as_any()
                    .downcast_ref::<Float32Array>()
                    .ok_or_else(|| DataError::CorruptCache {
                        path: path.to_path_buf(),
                        reason: format!("column {c} is not Float32"),
                    })?;
                column.extend_from_slice(values.values());
            }
        }

        let frames = columns.first().map_or(0, Vec::len);
        let flat: Vec<f32> = columns.into_iter().flatten().collect();
        Ok(Array2::from_shape_vec((channels, frames), flat)?)
    }

    pub fn write(path: &Path, spec: &Array2<f32>) -> Result<()> {
        let fields: Vec<Field> = (0..spec.nrows())
            .map(|c| Field::new(format!("ch{c}"), DataType::Float32, false))
            .collect();
        let columns: Vec<ArrayRef> = spec
            .rows()
            .into_iter()
            .map(|row| Arc::new(Float32Array::from(row.to_vec())) as ArrayRef)
            .collect();
        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;

        // Use a unique temporary name first to avoid exposing partial writes.
        let temp_path = path.with_extension(format!(
            "{}-{}.tmp",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let file = File::create(&temp_path).map_err(|e| DataError::io(&temp_path, e))?;
        let written = Self::write_batch(file, &batch)
            .and_then(|()| fs::rename(&temp_path, path).map_err(|e| DataError::io(path, e)));
        if written.is_err() {
            // The write error is what gets reported; a failed cleanup only leaves a stray .tmp.
            let _ = fs::remove_file(&temp_path);
        }
        written
    }

    fn write_batch(file: File, batch: &RecordBatch) -> Result<()> {
        let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
        writer.write(batch)?;
        writer.close()?;
        Ok(())
    }
}

impl SpectrogramCache for SidecarCache {
    fn get_or_compute(
        &self,
        audio_path: &Path,
        kind: SpectrogramKind,
        compute: &mut dyn FnMut() -> Result<Array2<f32>>,
    ) -> Result<Array2<f32>> {
        let path = Self::sidecar_path(audio_path, kind);
        if path.exists() {
            debug!("Spectrogram cache hit: {:?}", path);
            return Self::read(&path);
        }
        debug!("Spectrogram cache miss: {:?}", path);
        let spec = compute()?;
        if spec.nrows() > 0 {
            Self::write(&path, &spec)?;
        } else {
            // Parquet needs at least one column.
            debug!("Not caching zero-channel spectrogram for {:?}", audio_path);
        }
        Ok(spec)
    }
}
