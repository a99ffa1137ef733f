//! The baking script: precomputes every spectrogram of a manifest into sidecar Parquet files
//! and reports how the bucket sampler will lay the data out across replicas.
//!
//! Running this once before training means no worker ever has to compute an STFT during an
//! epoch. The run is embarrassingly parallel; the thread count only needs lowering when memory
//! is tight, since each thread holds one decoded waveform and its spectrogram.

use std::{sync::Arc, time::Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use rayon::{ThreadPoolBuilder, iter::{IntoParallelIterator, ParallelIterator}};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use speech_bake::{
    DataConfig, DistributedBucketSampler, ExampleStore, FeatureExtractor, SamplerConfig, SidecarCache,
};

#[derive(Parser, Debug)]
#[command(name = "speech-bake", about = "Warm the spectrogram cache and inspect bucketing for a manifest")]
struct Args {
    /// Manifest file or glob pattern (`path|transcript|speaker_id` per line).
    manifest: String,

    /// JSON hyperparameter file; missing keys use the defaults.
    #[arg(long)]
    config: Option<String>,

    /// Ascending bucket boundaries in frames.
    #[arg(long, value_delimiter = ',', default_value = "32,300,400,500,600,700,800,900,1000")]
    boundaries: Vec<usize>,

    #[arg(long, default_value_t = 32)]
    batch_size: usize,

    #[arg(long, default_value_t = 1)]
    num_replicas: usize,

    /// Threads used to compute spectrograms.
    #[arg(long, default_value_t = 8)]
    threads: usize,

    /// Cache mel spectrograms instead of linear ones.
    #[arg(long)]
    mel: bool,

    /// Only report the bucket layout.
    #[arg(long)]
    skip_cache: bool,

    /// Shuffle the example list once before filtering, with the config's seed or the default one.
    #[arg(long)]
    shuffle: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let start_time = Instant::now();

    let mut config = match &args.config {
        Some(path) => DataConfig::from_json_file(path).with_context(|| format!("Failed to read config {path}"))?,
        None => DataConfig::default(),
    };
    if args.shuffle {
        config = config.with_default_shuffle();
    }

    // --- Step 1: Load, oversample and filter the manifest ---
    let store = ExampleStore::open(&args.manifest, &config)
        .with_context(|| format!("Failed to build the example store for {}", args.manifest))?;
    if store.is_empty() {
        bail!("No examples left in '{}' after filtering", args.manifest);
    }
    info!("{} examples from {} speakers", store.len(), store.speaker_ids().len());

    // --- Step 2: Warm the sidecar spectrogram cache ---
    if !args.skip_cache {
        let extractor = FeatureExtractor::new(config.clone())?.with_cache(Arc::new(SidecarCache));

        let pb = ProgressBar::new(store.len() as u64);
        pb.set_style(ProgressStyle::default_bar()
            .template("{spinner:.green} {prefix:20.bold.dim} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"));
        pb.set_prefix("Caching spectrograms");

        let pool = ThreadPoolBuilder::new().num_threads(args.threads).build()?;
        let failures: Vec<String> = pool.install(|| {
            (0..store.len())
                .into_par_iter()
                .progress_with(pb)
                .filter_map(|index| {
                    let result = if args.mel {
                        extractor.text_mel_at(&store, index).map(|_| ())
                    } else {
                        extractor.text_audio_at(&store, index).map(|_| ())
                    };
                    result.err().map(|e| format!("{:?}: {e}", store.get(index).audio_path))
                })
                .collect()
        });

        if !failures.is_empty() {
            for failure in &failures {
                warn!("{failure}");
            }
            bail!("{} of {} examples failed; fix them before training", failures.len(), store.len());
        }
    }

    // --- Step 3: Report the bucket layout per replica ---
    for rank in 0..args.num_replicas {
        let sampler = DistributedBucketSampler::new(
            store.lengths(),
            &SamplerConfig {
                batch_size: args.batch_size,
                boundaries: args.boundaries.clone(),
                num_replicas: args.num_replicas,
                rank,
                shuffle: true,
            },
        )?;
        if rank == 0 {
            println!("Boundaries after removing empty buckets: {:?}", sampler.boundaries());
            for (bucket, padded) in sampler.buckets().iter().zip(sampler.num_samples_per_bucket()) {
                println!("  - {} examples, padded to {}", bucket.len(), padded);
            }
            let kept: usize = sampler.buckets().iter().map(Vec::len).sum();
            println!("Dropped {} examples outside the boundaries", store.len() - kept);
        }
        println!("Rank {}: {} samples, {} batches per epoch", rank, sampler.num_samples(), sampler.len());
    }

    println!("\n✅ Bake complete!");
    println!("Total time elapsed: {:?}", start_time.elapsed());

    Ok(())
}
