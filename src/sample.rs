use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Interaction counts and timing for one sampled simulation step.
///
/// The four counters are per-step instantaneous totals for that step alone,
/// not cumulative across samples. `real_*` counts pairs whose squared distance
/// lies within the kernel support; `candidate_*` counts every pair examined by
/// the neighbor search. The `_bound`/`_fluid` split follows the probing
/// particle's kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Sample {
    /// Simulation step index at which the sample was taken.
    pub step: u32,
    /// Wall-clock duration of the sampled step, in seconds.
    pub step_time: f64,
    /// Cumulative simulation time at the sample, in seconds.
    pub sim_time: f64,
    /// Pairs examined with a boundary probe.
    pub candidate_bound: u64,
    /// Within-support pairs with a boundary probe.
    pub real_bound: u64,
    /// Pairs examined with a fluid probe.
    pub candidate_fluid: u64,
    /// Within-support pairs with a fluid probe.
    pub real_fluid: u64,
}

impl Sample {
    /// Combined within-support count (fluid + boundary probes).
    #[inline]
    pub fn real_total(&self) -> u64 {
        self.real_fluid + self.real_bound
    }
}

/// Append-only, insertion-ordered sequence of [`Sample`]s plus a cursor over
/// the leading records already persisted.
///
/// Entries are never reordered, edited, or deleted; the store grows for the
/// run's duration and is torn down with the engine. Overflowing `max_samples`
/// is fatal: silently truncating performance history would corrupt later
/// derivation.
#[derive(Debug)]
pub struct SampleStore {
    samples: Vec<Sample>,
    flushed: usize,
    max_samples: usize,
}

impl SampleStore {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: Vec::new(),
            flushed: 0,
            max_samples,
        }
    }

    /// Appends a sample, failing once the configured ceiling is reached.
    pub fn push(&mut self, sample: Sample) -> Result<()> {
        if self.samples.len() >= self.max_samples {
            anyhow::bail!(
                "sample store ceiling reached ({} samples); raise max_samples or the sampling stride",
                self.max_samples
            );
        }
        self.samples.push(sample);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Sample> {
        self.samples.get(index)
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Number of leading samples already written to the log.
    pub fn flushed(&self) -> usize {
        self.flushed
    }

    /// Samples appended since the last flush.
    pub fn unflushed(&self) -> &[Sample] {
        &self.samples[self.flushed..]
    }

    /// Advances the flush cursor to the current store length.
    pub fn mark_flushed(&mut self) {
        self.flushed = self.samples.len();
    }

    /// Bytes currently allocated for sample storage.
    pub fn allocated_bytes(&self) -> usize {
        std::mem::size_of::<Sample>() * self.samples.capacity()
    }
}
