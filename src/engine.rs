use crate::config::{ExecutionMode, PipsConfig};
use crate::diagnostics::DiagnosticSink;
use crate::neighbor::{pair_metric, NeighborQuery, ALMOST_ZERO};
use crate::sample::{Sample, SampleStore};
use crate::vecmath::DVec3;
use anyhow::{Context, Result};
use log::{debug, info};
use rayon::prelude::*;
use std::fs::OpenOptions;
use std::ops::Range;

/// Log file name inside the run's output directory.
pub const LOG_FILE_NAME: &str = "PIPS.csv";

const CSV_HEADER: [&str; 12] = [
    "StepTime [s]",
    "Time [s]",
    "Nstep",
    "RealFluid [PIs]",
    "RealBound [PIs]",
    "ChkFluid [PIs]",
    "ChkBound [PIs]",
    "GPIPS",
    "RealFluid [GPIs]",
    "RealBound [GPIs]",
    "ChkFluid [GPIs]",
    "ChkBound [GPIs]",
];

/// Borrowed view of one simulation step, everything the counting pass reads.
///
/// Particles are laid out in two blocks: boundary in `[0, boundary_count)`,
/// fluid in `[boundary_count, particle_count)`. Only the first
/// `eligible_boundary` boundary particles act as probes.
#[derive(Debug, Clone, Copy)]
pub struct StepSnapshot<'a> {
    pub step: u32,
    /// Wall-clock duration of this step, in seconds.
    pub step_time: f64,
    /// Cumulative simulation time, in seconds.
    pub sim_time: f64,
    pub particle_count: usize,
    pub boundary_count: usize,
    pub eligible_boundary: usize,
    /// Squared compact-support radius of the interaction kernel.
    pub support_radius_sq: f32,
    pub positions: &'a [DVec3],
    pub cell_codes: &'a [u32],
    /// Worker-thread hint for the counting pass.
    pub workers: usize,
}

/// Private per-worker accumulator; one instance per chunk, summed sequentially
/// after the parallel region so the result never depends on scheduling.
#[derive(Debug, Default, Clone, Copy)]
struct Counts {
    candidate_bound: u64,
    real_bound: u64,
    candidate_fluid: u64,
    real_fluid: u64,
}

impl Counts {
    fn add(&mut self, other: &Counts) {
        self.candidate_bound += other.candidate_bound;
        self.real_bound += other.real_bound;
        self.candidate_fluid += other.candidate_fluid;
        self.real_fluid += other.real_fluid;
    }
}

/// Splits `[begin, end)` into at most `parts` contiguous, disjoint chunks.
fn split_range(begin: usize, end: usize, parts: usize) -> Vec<Range<usize>> {
    let len = end.saturating_sub(begin);
    if len == 0 {
        return Vec::new();
    }
    let parts = parts.clamp(1, len);
    let chunk = (len + parts - 1) / parts;
    (0..parts)
        .map(|i| {
            let s = begin + i * chunk;
            let e = (s + chunk).min(end);
            s..e
        })
        .filter(|r| !r.is_empty())
        .collect()
}

/// Counts candidates and within-support pairs for a chunk of boundary probes.
/// Boundary probes scan fluid neighbor cells only.
fn count_boundary_probes<Q: NeighborQuery>(
    snap: &StepSnapshot,
    query: &Q,
    range: Range<usize>,
) -> Counts {
    let mut counts = Counts::default();
    for p1 in range {
        let pos1 = snap.positions[p1];
        let qs = query.init_query(snap.cell_codes[p1], false);
        for z in qs.z_begin..qs.z_end {
            for y in qs.y_begin..qs.y_end {
                let (begin, end) = query.particle_range(y, z, &qs);
                for p2 in begin..end {
                    let dr = pair_metric(pos1, snap.positions[p2 as usize]);
                    if dr.dist_sq <= snap.support_radius_sq && dr.dist_sq >= ALMOST_ZERO {
                        counts.real_bound += 1;
                    }
                    counts.candidate_bound += 1;
                }
            }
        }
    }
    counts
}

/// Counts candidates and within-support pairs for a chunk of fluid probes.
/// Fluid probes scan boundary neighbor cells, then fluid neighbor cells.
fn count_fluid_probes<Q: NeighborQuery>(
    snap: &StepSnapshot,
    query: &Q,
    range: Range<usize>,
) -> Counts {
    let mut counts = Counts::default();
    for p1 in range {
        let pos1 = snap.positions[p1];
        for boundary_cells in [true, false] {
            let qs = query.init_query(snap.cell_codes[p1], boundary_cells);
            for z in qs.z_begin..qs.z_end {
                for y in qs.y_begin..qs.y_end {
                    let (begin, end) = query.particle_range(y, z, &qs);
                    for p2 in begin..end {
                        let dr = pair_metric(pos1, snap.positions[p2 as usize]);
                        if dr.dist_sq <= snap.support_radius_sq && dr.dist_sq >= ALMOST_ZERO {
                            counts.real_fluid += 1;
                        }
                        counts.candidate_fluid += 1;
                    }
                }
            }
        }
    }
    counts
}

/// Runtime throughput instrumentation for a particle simulation.
///
/// Once per sampled step the simulator hands the engine a [`StepSnapshot`] and
/// the borrowed neighbor index; the engine records one [`Sample`] and offers
/// pull-based throughput derivation plus incremental CSV persistence. Append
/// calls must be serialized by the caller; derivation is read-only.
pub struct PipsEngine {
    config: PipsConfig,
    store: SampleStore,
    next_sample_step: u32,
    diagnostics: Box<dyn DiagnosticSink>,
}

impl PipsEngine {
    pub fn new(config: PipsConfig, diagnostics: Box<dyn DiagnosticSink>) -> Result<Self> {
        config.validate()?;
        let store = SampleStore::new(config.max_samples);
        Ok(Self {
            config,
            store,
            next_sample_step: 0,
            diagnostics,
        })
    }

    pub fn config(&self) -> &PipsConfig {
        &self.config
    }

    pub fn samples(&self) -> &[Sample] {
        self.store.samples()
    }

    /// Bytes allocated for sample storage.
    pub fn allocated_bytes(&self) -> usize {
        self.store.allocated_bytes()
    }

    /// Step index at which the next sample is due.
    pub fn next_sample_step(&self) -> u32 {
        self.next_sample_step
    }

    /// Whether the simulator should run a counting pass at `step`.
    pub fn due(&self, step: u32) -> bool {
        step >= self.next_sample_step
    }

    /// Runs one counting pass over the snapshot, appends the resulting sample,
    /// advances the next-sample cursor and emits one diagnostic line.
    pub fn run_sample<Q: NeighborQuery>(
        &mut self,
        snap: &StepSnapshot,
        query: &Q,
    ) -> Result<()> {
        let counts = match self.config.mode {
            ExecutionMode::Cpu => self.compute_cpu(snap, query),
            ExecutionMode::Accelerator => {
                anyhow::bail!("accelerator counting path is not implemented")
            }
        };
        let sample = Sample {
            step: snap.step,
            step_time: snap.step_time,
            sim_time: snap.sim_time,
            candidate_bound: counts.candidate_bound,
            real_bound: counts.real_bound,
            candidate_fluid: counts.candidate_fluid,
            real_fluid: counts.real_fluid,
        };
        self.store.push(sample)?;
        self.next_sample_step += self.config.sample_stride;
        self.diagnostics.sample_recorded(&sample);
        Ok(())
    }

    /// Chunked parallel counting: probe ranges split into `workers` disjoint
    /// chunks, each with a private accumulator, summed in one sequential pass.
    /// Counter values are identical for any worker count.
    fn compute_cpu<Q: NeighborQuery>(&self, snap: &StepSnapshot, query: &Q) -> Counts {
        let workers = snap.workers.max(1);

        let bound_chunks: Vec<Counts> = split_range(0, snap.eligible_boundary, workers)
            .into_par_iter()
            .map(|r| count_boundary_probes(snap, query, r))
            .collect();
        let fluid_chunks: Vec<Counts> =
            split_range(snap.boundary_count, snap.particle_count, workers)
                .into_par_iter()
                .map(|r| count_fluid_probes(snap, query, r))
                .collect();

        let mut totals = Counts::default();
        for c in bound_chunks.iter().chain(fluid_chunks.iter()) {
            totals.add(c);
        }
        totals
    }

    /// Trapezoidal interval estimator over the counter picked by `select`.
    ///
    /// Counts are per-step instantaneous totals sampled at the interval
    /// endpoints; the per-step rate in between is linearly interpolated, and
    /// the end sample is subtracted once because it also starts the next
    /// interval. Exact when the true rate is constant between samples.
    fn interval_estimate(&self, i: usize, select: impl Fn(&Sample) -> u64) -> f64 {
        if i == 0 || i >= self.store.len() {
            return 0.0;
        }
        let samples = self.store.samples();
        let pi0 = select(&samples[i - 1]) as f64;
        let pi1 = select(&samples[i]) as f64;
        let nsteps = (samples[i].step - samples[i - 1].step + 1) as f64;
        ((pi0 / 2.0 + pi1 / 2.0) * nsteps - pi1) / 1e9 * self.config.times_factor as f64
    }

    /// Combined (fluid + boundary) within-support interactions over interval
    /// `i`, in giga-interactions. Zero outside `[1, len)`.
    pub fn interval_interactions(&self, i: usize) -> f64 {
        self.interval_estimate(i, |s| s.real_fluid + s.real_bound)
    }

    /// Per-kind within-support interactions over interval `i`, in
    /// giga-interactions.
    pub fn interval_interactions_by_kind(&self, i: usize, fluid: bool) -> f64 {
        self.interval_estimate(i, move |s| if fluid { s.real_fluid } else { s.real_bound })
    }

    /// Per-kind candidate checks over interval `i`, in giga-interactions.
    pub fn interval_candidates_by_kind(&self, i: usize, fluid: bool) -> f64 {
        self.interval_estimate(i, move |s| {
            if fluid {
                s.candidate_fluid
            } else {
                s.candidate_bound
            }
        })
    }

    /// Run totals of within-support interactions as `(fluid, boundary)`, in
    /// giga-interactions.
    pub fn total_interactions(&self) -> (f64, f64) {
        let mut fluid = 0.0;
        let mut bound = 0.0;
        for i in 1..self.store.len() {
            fluid += self.interval_interactions_by_kind(i, true);
            bound += self.interval_interactions_by_kind(i, false);
        }
        (fluid, bound)
    }

    /// Average giga-interactions per second across the run; zero for a
    /// non-positive total simulation time.
    pub fn overall_throughput(&self, sim_time: f64) -> f64 {
        let (fluid, bound) = self.total_interactions();
        if sim_time > 0.0 {
            (fluid + bound) / sim_time
        } else {
            0.0
        }
    }

    /// Total interactions with an auto-scaled unit, e.g.
    /// `0.123456 TPIs (1.0000e2 + 2.3456e1)`. The parenthesized fluid and
    /// boundary totals stay in giga-interactions.
    pub fn formatted_total(&self) -> String {
        let (fluid, bound) = self.total_interactions();
        let (v, unit) = scale_unit(fluid + bound);
        format!("{:.6} {}PIs ({:.4e} + {:.4e})", v, unit, fluid, bound)
    }

    /// Appends every not-yet-persisted sample to `<output_dir>/PIPS.csv`.
    ///
    /// The header is written only when the file is first created; rows already
    /// flushed are never rewritten or reordered, and a call with nothing
    /// pending does not touch the file. I/O failures are fatal.
    pub fn flush(&mut self) -> Result<()> {
        if !self.config.save_data || self.store.unflushed().is_empty() {
            return Ok(());
        }
        let path = self.config.output_dir.join(LOG_FILE_NAME);
        let new_file = !path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open PIPS log '{}'", path.display()))?;
        let delimiter = if self.config.csv_sep_comma { b',' } else { b';' };
        let mut writer = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_writer(file);
        if new_file {
            info!("Created PIPS log '{}'", path.display());
            writer.write_record(CSV_HEADER)?;
        }

        let samples = self.store.samples();
        for i in self.store.flushed()..samples.len() {
            let s = &samples[i];
            let gpis = self.interval_interactions(i);
            // The first-ever row has no predecessor; divide by unit time.
            let t = if i > 0 {
                s.sim_time - samples[i - 1].sim_time
            } else {
                1.0
            };
            let gpips = if t > 0.0 { gpis / t } else { 0.0 };
            writer.write_record(&[
                format!("{}", s.step_time),
                format!("{}", s.sim_time),
                format!("{}", s.step),
                format!("{}", s.real_fluid),
                format!("{}", s.real_bound),
                format!("{}", s.candidate_fluid),
                format!("{}", s.candidate_bound),
                format!("{}", gpips),
                format!("{}", self.interval_interactions_by_kind(i, true)),
                format!("{}", self.interval_interactions_by_kind(i, false)),
                format!("{}", self.interval_candidates_by_kind(i, true)),
                format!("{}", self.interval_candidates_by_kind(i, false)),
            ])?;
        }
        writer
            .flush()
            .with_context(|| format!("Failed to append to PIPS log '{}'", path.display()))?;
        let appended = samples.len() - self.store.flushed();
        self.store.mark_flushed();
        debug!("Appended {} rows to the PIPS log.", appended);
        Ok(())
    }
}

/// Auto-scales a giga-interactions magnitude: two independent scale-up checks
/// below 0.1 (Mega, then kilo), then one scale-down check per tier through
/// Yotta, each applied to the already-scaled value.
fn scale_unit(mut v: f64) -> (f64, char) {
    let mut unit = 'G';
    if v < 0.1 {
        v *= 1.0e3;
        unit = 'M';
    }
    if v < 0.1 {
        v *= 1.0e3;
        unit = 'k';
    }
    for next in ['T', 'P', 'E', 'Z', 'Y'] {
        if v > 1.0e3 {
            v /= 1.0e3;
            unit = next;
        }
    }
    (v, unit)
}
