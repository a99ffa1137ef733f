//! Length-bucketed sampling sharded across distributed replicas.
//!
//! Every batch only holds examples from one length bucket: with boundaries `[b0, b1, b2]` a
//! batch is drawn either from `{x | b0 < len(x) <= b1}` or from `{x | b1 < len(x) <= b2}`.
//! Examples with `len(x) <= b0` or `len(x) > b2` are dropped.
//!
//! Each bucket is padded (by repeating its own indices) to a multiple of
//! `num_replicas * batch_size`, so every replica gets the same number of full batches. All
//! replicas shuffle with the same epoch seed and then take every `num_replicas`-th index
//! starting at their rank. The epoch has to be set by the caller before each epoch.

use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use tracing::{debug, info};

use crate::config::SamplerConfig;
use crate::error::{DataError, Result};

#[derive(Debug, Clone)]
pub struct DistributedBucketSampler {
    batch_size: usize,
    boundaries: Vec<usize>,
    num_replicas: usize,
    rank: usize,
    shuffle: bool,
    epoch: u64,
    buckets: Vec<Vec<usize>>,
    num_samples_per_bucket: Vec<usize>,
    total_size: usize,
    num_samples: usize,
}

impl DistributedBucketSampler {
    pub fn new(lengths: &[usize], config: &SamplerConfig) -> Result<Self> {
        let SamplerConfig { batch_size, ref boundaries, num_replicas, rank, shuffle } = *config;
        if batch_size == 0 {
            return Err(DataError::InvalidSampler("batch_size must be positive".into()));
        }
        if num_replicas == 0 || rank >= num_replicas {
            return Err(DataError::InvalidSampler(format!(
                "rank {rank} is not valid for {num_replicas} replicas"
            )));
        }
        if boundaries.len() < 2 || boundaries.windows(2).any(|w| w[0] >= w[1]) {
            return Err(DataError::InvalidSampler(format!(
                "boundaries must be strictly ascending with at least two values, got {boundaries:?}"
            )));
        }

        let mut sampler = Self {
            batch_size,
            boundaries: boundaries.clone(),
            num_replicas,
            rank,
            shuffle,
            epoch: 0,
            buckets: Vec::new(),
            num_samples_per_bucket: Vec::new(),
            total_size: 0,
            num_samples: 0,
        };
        sampler.create_buckets(lengths);
        sampler.total_size = sampler.num_samples_per_bucket.iter().sum();
        sampler.num_samples = sampler.total_size / num_replicas;
        info!(
            "Bucket sampler (rank {}/{}): {} buckets, {} samples per replica, {} batches",
            rank,
            num_replicas,
            sampler.buckets.len(),
            sampler.num_samples,
            sampler.len()
        );
        Ok(sampler)
    }

    fn create_buckets(&mut self, lengths: &[usize]) {
        let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); self.boundaries.len() - 1];
        for (i, &length) in lengths.iter().enumerate() {
            if let Some(bucket) = self.bisect(length) {
                buckets[bucket].push(i);
            }
        }

        // Drop empty buckets along with one of their boundaries, keeping
        // `boundaries.len() == buckets.len() + 1`. The first bucket gives up its lower edge,
        // every other bucket its upper one.
        for i in (0..buckets.len()).rev() {
            if buckets[i].is_empty() {
                debug!("Removing empty bucket ({}, {}]", self.boundaries[i], self.boundaries[i + 1]);
                buckets.remove(i);
                self.boundaries.remove(if i == 0 { 0 } else { i + 1 });
            }
        }

        let total_batch_size = self.num_replicas * self.batch_size;
        self.num_samples_per_bucket = buckets
            .iter()
            .map(|bucket| {
                let rem = (total_batch_size - bucket.len() % total_batch_size) % total_batch_size;
                bucket.len() + rem
            })
            .collect();
        self.buckets = buckets;
    }

    /// Bucket holding `length`, i.e. the `i` with `boundaries[i] < length <= boundaries[i + 1]`.
    pub fn bisect(&self, length: usize) -> Option<usize> {
        let (mut lo, mut hi) = (0, self.boundaries.len() - 1);
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.boundaries[mid] < length && length <= self.boundaries[mid + 1] {
                return Some(mid);
            } else if length <= self.boundaries[mid] {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        None
    }

    /// Seeds the shuffle for the next call to [`batches`](Self::batches).
    pub fn set_epoch(&mut self, epoch: u64) {
        self.epoch = epoch;
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// This replica's batches for the current epoch.
    ///
    /// # Panics
    /// If the batch count disagrees with `num_samples`, which means the buckets are broken.
    pub fn batches(&self) -> Vec<Vec<usize>> {
        let mut rng = StdRng::seed_from_u64(self.epoch);

        let mut batches = Vec::with_capacity(self.len());
        for (bucket, &num_samples_bucket) in self.buckets.iter().zip(&self.num_samples_per_bucket) {
            let len_bucket = bucket.len();
            let mut ids_bucket: Vec<usize> = (0..len_bucket).collect();
            if self.shuffle {
                ids_bucket.shuffle(&mut rng);
            }

            // Wrap around the shuffled order until the bucket divides evenly.
            let padded: Vec<usize> = ids_bucket.iter().copied().cycle().take(num_samples_bucket).collect();

            let shard: Vec<usize> = padded
                .into_iter()
                .skip(self.rank)
                .step_by(self.num_replicas)
                .map(|idx| bucket[idx])
                .collect();

            batches.extend(shard.chunks_exact(self.batch_size).map(<[usize]>::to_vec));
        }

        if self.shuffle {
            batches.shuffle(&mut rng);
        }

        assert_eq!(
            batches.len() * self.batch_size,
            self.num_samples,
            "bucketed batches do not cover num_samples"
        );
        batches
    }

    /// Batches per replica per epoch.
    pub fn len(&self) -> usize {
        self.num_samples / self.batch_size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn boundaries(&self) -> &[usize] {
        &self.boundaries
    }

    pub fn buckets(&self) -> &[Vec<usize>] {
        &self.buckets
    }

    pub fn num_samples_per_bucket(&self) -> &[usize] {
        &self.num_samples_per_bucket
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples
    }
}

impl<'a> IntoIterator for &'a DistributedBucketSampler {
    type Item = Vec<usize>;
    type IntoIter = std::vec::IntoIter<Vec<usize>>;

    fn into_iter(self) -> Self::IntoIter {
        self.batches().into_iter()
    }
}
