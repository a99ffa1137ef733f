//! Waveform loading and STFT-based spectrograms.

use std::{path::Path, sync::Arc};

use hound::{SampleFormat, WavReader};
use ndarray::Array2;
use rustfft::{Fft, FftPlanner, num_complex::Complex};

use crate::config::DataConfig;
use crate::error::{DataError, Result};

/// Reads a WAV file, returning its sample rate and mono samples.
///
/// Samples keep their raw integer scale (e.g. `-32768..32767` for 16-bit PCM); callers divide
/// by `max_wav_value` themselves. Multi-channel files are averaged down to mono.
pub fn load_wav(path: &Path) -> Result<(u32, Vec<f32>)> {
    let mut reader = WavReader::open(path).map_err(|e| wav_error(path, e))?;
    let spec = reader.spec();
    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Int => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32))
            .collect::<std::result::Result<Vec<f32>, _>>(),
        SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<Vec<f32>, _>>(),
    }
    .map_err(|e| wav_error(path, e))?;

    let channels = spec.channels.max(1) as usize;
    if channels == 1 {
        return Ok((spec.sample_rate, interleaved));
    }
    let mono = interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();
    Ok((spec.sample_rate, mono))
}

fn wav_error(path: &Path, err: hound::Error) -> DataError {
    match err {
        hound::Error::IoError(ref io) if io.kind() == std::io::ErrorKind::NotFound => {
            DataError::MissingAudio(path.to_path_buf())
        }
        source => DataError::Wav { path: path.to_path_buf(), source },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpectrogramKind {
    /// Magnitude spectrogram with `filter_length / 2 + 1` channels.
    Linear,
    /// Log-compressed mel spectrogram with `n_mel_channels` channels.
    Mel,
}

/// Waveform (already normalized to `[-1, 1]`) -> `[channels, frames]` spectrogram.
pub trait SpectrogramTransform: Send + Sync {
    fn transform(&self, audio: &[f32], kind: SpectrogramKind) -> Result<Array2<f32>>;
}

#[derive(Debug, Clone)]
pub struct StftParams {
    pub filter_length: usize,
    pub hop_length: usize,
    pub win_length: usize,
    pub n_mel_channels: usize,
    pub sampling_rate: u32,
    pub mel_fmin: f64,
    pub mel_fmax: Option<f64>,
    /// Reflect padding for mel frames; `None` centres with `filter_length / 2`.
    pub mel_padding: Option<usize>,
    /// Reflect padding for linear frames; `None` centres with `filter_length / 2`.
    pub linear_padding: Option<usize>,
}

impl StftParams {
    pub fn from_config(config: &DataConfig) -> Self {
        Self {
            filter_length: config.filter_length,
            hop_length: config.hop_length,
            win_length: config.win_length,
            n_mel_channels: config.n_mel_channels,
            sampling_rate: config.sampling_rate,
            mel_fmin: config.mel_fmin,
            mel_fmax: config.mel_fmax,
            mel_padding: config.padding,
            linear_padding: Some(config.linear_padding()),
        }
    }
}

pub struct Stft {
    params: StftParams,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    mel_basis: Array2<f32>,
}

impl Stft {
    pub fn new(params: StftParams) -> Self {
        let n_fft = params.filter_length;
        let win_length = params.win_length.min(n_fft);
        // Periodic Hann window, zero-padded to n_fft and centred.
        let mut window = vec![0.0f32; n_fft];
        let offset = (n_fft - win_length) / 2;
        for n in 0..win_length {
            let x = 2.0 * std::f32::consts::PI * n as f32 / win_length as f32;
            window[offset + n] = 0.5 * (1.0 - x.cos());
        }
        let fft = FftPlanner::<f32>::new().plan_fft_forward(n_fft);
        let mel_basis = mel_filterbank(
            n_fft,
            params.n_mel_channels,
            params.sampling_rate,
            params.mel_fmin,
            params.mel_fmax,
        );
        Self { params, window, fft, mel_basis }
    }

    pub fn params(&self) -> &StftParams {
        &self.params
    }

    /// Frame magnitudes, `[filter_length / 2 + 1, frames]`.
    fn magnitudes(&self, audio: &[f32], padding: Option<usize>, eps: f32) -> Array2<f32> {
        let n_fft = self.params.filter_length;
        let hop = self.params.hop_length.max(1);
        let pad = padding.unwrap_or(n_fft / 2);
        let padded = reflect_pad(audio, pad);
        let n_freqs = n_fft / 2 + 1;
        let n_frames = if padded.len() >= n_fft { (padded.len() - n_fft) / hop + 1 } else { 0 };

        let mut out = Array2::<f32>::zeros((n_freqs, n_frames));
        let mut buffer = vec![Complex::new(0.0f32, 0.0); n_fft];
        for frame in 0..n_frames {
            let start = frame * hop;
            for (i, slot) in buffer.iter_mut().enumerate() {
                *slot = Complex::new(padded[start + i] * self.window[i], 0.0);
            }
            self.fft.process(&mut buffer);
            for (freq, value) in buffer[..n_freqs].iter().enumerate() {
                out[[freq, frame]] = (value.re * value.re + value.im * value.im + eps).sqrt();
            }
        }
        out
    }

    pub fn spectrogram(&self, audio: &[f32]) -> Array2<f32> {
        self.magnitudes(audio, self.params.linear_padding, 1e-6)
    }

    pub fn mel_spectrogram(&self, audio: &[f32]) -> Array2<f32> {
        let magnitudes = self.magnitudes(audio, self.params.mel_padding, 0.0);
        self.mel_basis.dot(&magnitudes).mapv(|v| v.max(1e-5).ln())
    }
}

impl SpectrogramTransform for Stft {
    fn transform(&self, audio: &[f32], kind: SpectrogramKind) -> Result<Array2<f32>> {
        Ok(match kind {
            SpectrogramKind::Linear => self.spectrogram(audio),
            SpectrogramKind::Mel => self.mel_spectrogram(audio),
        })
    }
}

fn reflect_pad(signal: &[f32], pad: usize) -> Vec<f32> {
    let n = signal.len();
    if n == 0 {
        return vec![0.0; pad * 2];
    }
    let mut padded = Vec::with_capacity(n + pad * 2);
    padded.extend((1..=pad).rev().map(|i| signal[i.min(n - 1)]));
    padded.extend_from_slice(signal);
    padded.extend((0..pad).map(|i| signal[(n - 1).saturating_sub(i + 1)]));
    padded
}

/// Slaney-style mel filterbank, `[n_mels, n_fft / 2 + 1]`, area normalized.
pub fn mel_filterbank(n_fft: usize, n_mels: usize, sample_rate: u32, fmin: f64, fmax: Option<f64>) -> Array2<f32> {
    let fmax = fmax.unwrap_or(sample_rate as f64 / 2.0);
    let n_freqs = n_fft / 2 + 1;

    // Linear below 1 kHz, logarithmic above.
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = 6.4f64.ln() / 27.0;
    let hz_to_mel = |hz: f64| if hz < min_log_hz { hz / f_sp } else { min_log_mel + (hz / min_log_hz).ln() / logstep };
    let mel_to_hz = |mel: f64| if mel < min_log_mel { mel * f_sp } else { min_log_hz * ((mel - min_log_mel) * logstep).exp() };

    let (mel_lo, mel_hi) = (hz_to_mel(fmin), hz_to_mel(fmax));
    let hz_points: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_lo + (mel_hi - mel_lo) * i as f64 / (n_mels + 1) as f64))
        .collect();

    let mut basis = Array2::<f32>::zeros((n_mels, n_freqs));
    for m in 0..n_mels {
        let (left, center, right) = (hz_points[m], hz_points[m + 1], hz_points[m + 2]);
        let enorm = 2.0 / (right - left);
        for bin in 0..n_freqs {
            let freq = bin as f64 * sample_rate as f64 / n_fft as f64;
            let lower = if center > left { (freq - left) / (center - left) } else { 0.0 };
            let upper = if right > center { (right - freq) / (right - center) } else { 0.0 };
            basis[[m, bin]] = (lower.min(upper).max(0.0) * enorm) as f32;
        }
    }
    basis
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_params() -> StftParams {
        StftParams {
            filter_length: 64,
            hop_length: 16,
            win_length: 64,
            n_mel_channels: 8,
            sampling_rate: 8000,
            mel_fmin: 0.0,
            mel_fmax: None,
            mel_padding: None,
            linear_padding: Some(24),
        }
    }

    #[test]
    fn frame_counts_follow_padding() {
        let stft = Stft::new(small_params());
        let audio: Vec<f32> = (0..160).map(|i| (i as f32 * 0.3).sin()).collect();
        // Centred: 160 + 64 padded samples.
        assert_eq!(stft.mel_spectrogram(&audio).dim(), (8, 11));
        // (64 - 16) / 2 on each side: 208 samples.
        assert_eq!(stft.spectrogram(&audio).dim(), (33, 10));
    }

    #[test]
    fn sine_peaks_at_its_bin() {
        let stft = Stft::new(small_params());
        // 1 kHz at 8 kHz with n_fft 64 sits on bin 8.
        let audio: Vec<f32> = (0..512)
            .map(|i| (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / 8000.0).sin())
            .collect();
        let spec = stft.spectrogram(&audio);
        let column = spec.column(spec.ncols() / 2);
        let peak = column
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 8);
    }

    #[test]
    fn silence_hits_the_log_floor() {
        let stft = Stft::new(small_params());
        let mel = stft.mel_spectrogram(&[0.0; 128]);
        assert!(mel.iter().all(|&v| (v - 1e-5f32.ln()).abs() < 1e-4));
    }

    #[test]
    fn filterbank_rows_are_non_negative() {
        let basis = mel_filterbank(1024, 80, 22050, 0.0, Some(8000.0));
        assert_eq!(basis.dim(), (80, 513));
        assert!(basis.iter().all(|&w| w >= 0.0));
        assert!(basis.rows().into_iter().all(|row| row.sum() > 0.0));
    }

    #[test]
    fn reflect_pad_mirrors_without_edge() {
        assert_eq!(reflect_pad(&[1.0, 2.0, 3.0, 4.0], 2), vec![3.0, 2.0, 1.0, 2.0, 3.0, 4.0, 3.0, 2.0]);
    }
}
