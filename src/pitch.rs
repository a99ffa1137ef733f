//! Fundamental frequency tracking.

/// Output of a pitch tracker, one entry per analysis frame.
#[derive(Debug, Clone, Default)]
pub struct PitchTrack {
    /// Estimated f0 in Hz, `0.0` where the frame is unvoiced.
    pub f0: Vec<f32>,
    pub harmonic_rates: Vec<f32>,
    /// `sample_rate / argmin(cmndf)` for every frame whose minimum lies above `tau_min`.
    pub argmins: Vec<f32>,
    /// Frame start times in seconds.
    pub times: Vec<f32>,
}

#[derive(Debug, Clone, Copy)]
pub struct PitchParams {
    pub sample_rate: u32,
    pub frame_length: usize,
    pub hop_length: usize,
    pub f0_min: u32,
    pub f0_max: u32,
    pub harmonic_threshold: f32,
}

pub trait PitchTracker: Send + Sync {
    fn track(&self, audio: &[f32], params: &PitchParams) -> PitchTrack;
}

/// The YIN estimator (de Cheveigné & Kawahara, 2002).
#[derive(Debug, Clone, Copy, Default)]
pub struct Yin;

impl Yin {
    fn difference(frame: &[f32], tau_max: usize) -> Vec<f32> {
        let w = frame.len();
        (0..tau_max)
            .map(|tau| {
                if tau >= w {
                    return 0.0;
                }
                frame[..w - tau]
                    .iter()
                    .zip(&frame[tau..])
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum()
            })
            .collect()
    }

    fn cumulative_mean_normalized(df: &[f32]) -> Vec<f32> {
        let mut out = vec![1.0f32; df.len()];
        let mut running = 0.0f32;
        for tau in 1..df.len() {
            running += df[tau];
            out[tau] = if running > 0.0 { df[tau] * tau as f32 / running } else { 1.0 };
        }
        out
    }

    // First dip below the threshold, followed down to its local minimum. 0 means unvoiced.
    fn pitch_period(cmndf: &[f32], tau_min: usize, tau_max: usize, threshold: f32) -> usize {
        let mut tau = tau_min;
        while tau < tau_max {
            if cmndf[tau] < threshold {
                while tau + 1 < tau_max && cmndf[tau + 1] < cmndf[tau] {
                    tau += 1;
                }
                return tau;
            }
            tau += 1;
        }
        0
    }
}

impl PitchTracker for Yin {
    fn track(&self, audio: &[f32], params: &PitchParams) -> PitchTrack {
        let sr = params.sample_rate as f32;
        let tau_min = (params.sample_rate / params.f0_max.max(1)) as usize;
        let tau_max = (params.sample_rate / params.f0_min.max(1)) as usize;
        let w = params.frame_length;
        let hop = params.hop_length.max(1);

        let starts: Vec<usize> = if audio.len() > w { (0..audio.len() - w).step_by(hop).collect() } else { Vec::new() };
        let mut track = PitchTrack {
            f0: vec![0.0; starts.len()],
            harmonic_rates: vec![0.0; starts.len()],
            argmins: vec![0.0; starts.len()],
            times: starts.iter().map(|&s| s as f32 / sr).collect(),
        };

        for (i, &start) in starts.iter().enumerate() {
            let frame = &audio[start..start + w];
            let cmndf = Self::cumulative_mean_normalized(&Self::difference(frame, tau_max));
            let tau_limit = tau_max.min(cmndf.len());

            let (argmin, min) = cmndf
                .iter()
                .enumerate()
                .fold((0, f32::INFINITY), |acc, (t, &v)| if v < acc.1 { (t, v) } else { acc });
            if argmin > tau_min {
                track.argmins[i] = sr / argmin as f32;
            }

            let period = Self::pitch_period(&cmndf, tau_min, tau_limit, params.harmonic_threshold);
            if period != 0 {
                track.f0[i] = sr / period as f32;
                track.harmonic_rates[i] = cmndf[period];
            } else {
                track.harmonic_rates[i] = min;
            }
        }
        track
    }
}

/// Pads `f0` with `edge_pad` zeros on both sides, then cuts or zero-extends it to `n_frames`.
pub fn align_f0(f0: &[f32], edge_pad: usize, n_frames: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(n_frames.max(f0.len() + edge_pad * 2));
    out.resize(edge_pad, 0.0);
    out.extend_from_slice(f0);
    out.resize(out.len() + edge_pad, 0.0);
    out.resize(n_frames, 0.0);
    out
}
